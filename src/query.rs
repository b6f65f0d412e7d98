//! Declarative live-data query: per-column filter constraints, ordered sort
//! keys and a page window.
//!
//! The serde shape follows the host query protocol
//! (`{"filters": [{"property", "constraints": [{"operator", "value"}]}], "sort": [...], "offset", "limit"}`);
//! the `--filter`/`--sort` expression parsers cover the command line.

use color_eyre::eyre::{eyre, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::normalize::Column;

/// Filter operators understood by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Case-insensitive prefix match on the plain text
    StartsWith,
    /// Exact match on the plain text
    Equals,
    /// Case-insensitive substring match on the plain text
    Contains,
    /// Inclusive `begin/end` ISO-8601 range on the parsed date
    Between,
}

impl Operator {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "startsWith" => Some(Self::StartsWith),
            "equals" => Some(Self::Equals),
            "contains" => Some(Self::Contains),
            "between" => Some(Self::Between),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::StartsWith => "startsWith",
            Self::Equals => "equals",
            Self::Contains => "contains",
            Self::Between => "between",
        }
    }
}

fn default_operator() -> String {
    Operator::Contains.name().to_string()
}

/// Constraint values arrive as any JSON scalar; they are matched as text.
fn scalar_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Null => Ok(String::new()),
        Value::Array(_) | Value::Object(_) => Err(serde::de::Error::custom(
            "constraint value must be a string, number or boolean",
        )),
        other => Ok(other.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    /// Operator name as sent by the host; unknown names behave like `contains`
    #[serde(default = "default_operator")]
    pub operator: String,
    #[serde(default, deserialize_with = "scalar_as_string")]
    pub value: String,
}

impl Constraint {
    pub fn new(operator: Operator, value: impl Into<String>) -> Self {
        Self {
            operator: operator.name().to_string(),
            value: value.into(),
        }
    }

    /// The operator to evaluate, `contains` when the name is not recognized.
    pub fn operator_kind(&self) -> Operator {
        Operator::from_name(&self.operator).unwrap_or(Operator::Contains)
    }

    pub fn is_recognized(&self) -> bool {
        Operator::from_name(&self.operator).is_some()
    }
}

/// All constraints attached to one property. Every constraint must hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub property: String,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortEntry {
    pub property: String,
    #[serde(default)]
    pub descending: bool,
}

impl SortEntry {
    pub fn ascending(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            descending: false,
        }
    }

    pub fn descending(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            descending: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub sort: Vec<SortEntry>,
    pub offset: usize,
    /// No limit returns every entry after the offset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Query {
    /// Parse a query in the host protocol JSON shape. Unknown fields are ignored.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| eyre!("Invalid query JSON: {}", e))
    }

    /// Add a constraint, merging it into an existing filter on the same property.
    pub fn add_constraint(&mut self, property: impl Into<String>, constraint: Constraint) {
        let property = property.into();
        match self.filters.iter_mut().find(|f| f.property == property) {
            Some(filter) => filter.constraints.push(constraint),
            None => self.filters.push(Filter {
                property,
                constraints: vec![constraint],
            }),
        }
    }

    /// Build a query from command-line `--filter` and `--sort` expressions.
    pub fn from_expressions(
        filters: &[String],
        sorts: &[String],
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Self> {
        let mut query = Query {
            offset,
            limit,
            ..Default::default()
        };
        for expr in filters {
            let (property, constraint) = parse_filter_expr(expr)?;
            query.add_constraint(property, constraint);
        }
        for expr in sorts {
            query.sort.push(parse_sort_expr(expr)?);
        }
        Ok(query)
    }

    /// Rewrite properties that name a column into that column's ordinal key.
    /// Properties that already are ordinal keys, or match nothing, are left alone.
    pub fn resolve_properties(&mut self, columns: &[Column]) {
        let resolve = |property: &mut String| {
            if columns.iter().any(|c| c.key() == *property) {
                return;
            }
            if let Some(column) = columns.iter().find(|c| c.name == *property) {
                debug!(name = %property, ordinal = column.ordinal, "resolved property by column name");
                *property = column.key();
            }
        };
        for filter in &mut self.filters {
            resolve(&mut filter.property);
        }
        for sort in &mut self.sort {
            resolve(&mut sort.property);
        }
    }
}

/// Parse `COL:OP:VALUE` (or `COL:VALUE`, meaning `contains`).
///
/// The value may itself contain `:`; the middle part is only taken as the
/// operator when it is a known operator name.
pub fn parse_filter_expr(expr: &str) -> Result<(String, Constraint)> {
    let (property, rest) = expr
        .split_once(':')
        .ok_or_else(|| eyre!("Invalid filter '{}': expected COL:OP:VALUE", expr))?;
    let property = property.trim();
    if property.is_empty() {
        return Err(eyre!("Invalid filter '{}': empty column", expr));
    }
    let constraint = match rest.split_once(':') {
        Some((op, value)) if Operator::from_name(op.trim()).is_some() => Constraint {
            operator: op.trim().to_string(),
            value: value.to_string(),
        },
        _ => Constraint::new(Operator::Contains, rest),
    };
    Ok((property.to_string(), constraint))
}

/// Parse `COL`, `COL:asc` or `COL:desc`.
pub fn parse_sort_expr(expr: &str) -> Result<SortEntry> {
    let (property, descending) = match expr.rsplit_once(':') {
        Some((property, dir)) => match dir.trim().to_lowercase().as_str() {
            "asc" => (property, false),
            "desc" => (property, true),
            other => {
                return Err(eyre!(
                    "Invalid sort '{}': direction must be asc or desc, got '{}'",
                    expr,
                    other
                ))
            }
        },
        None => (expr, false),
    };
    let property = property.trim();
    if property.is_empty() {
        return Err(eyre!("Invalid sort '{}': empty column", expr));
    }
    Ok(SortEntry {
        property: property.to_string(),
        descending,
    })
}
