//! Live-data descriptors handed to the display framework.
//!
//! A [`LiveDataDescriptor`] tells the framework which source to query, with
//! which entries reference, and how to present each column. When a view has
//! no column information, [`default_configuration`] provides generic
//! descriptors for the first [`DEFAULT_PROPERTY_COUNT`] ordinals.

use serde::{Deserialize, Serialize};

use crate::error::{Error, PayloadError, Result};
use crate::executor::ROW_ID_PROPERTY;
use crate::normalize::Column;
use crate::payload::decode_columns;

/// Source identifier the descriptor points the framework at
pub const SOURCE_ID: &str = "livetab";
/// Number of generic property descriptors in the default configuration
pub const DEFAULT_PROPERTY_COUNT: usize = 100;
/// Displayer used for every property; display values are rendered markup
pub const DEFAULT_DISPLAYER: &str = "html";
/// Page size of a freshly rendered view
pub const DEFAULT_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub property_type: Option<String>,
    pub sortable: bool,
    pub filterable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editable: Option<bool>,
}

impl PropertyDescriptor {
    /// Descriptor of a rendered column: keyed by ordinal, labelled by name.
    pub fn for_column(column: &Column, sortable: bool, filterable: bool) -> Self {
        Self {
            id: column.key(),
            name: column.name.clone(),
            description: String::new(),
            property_type: None,
            sortable,
            filterable,
            visible: None,
            editable: None,
        }
    }

    /// Read-only, filterable, unsortable string property.
    pub fn generic(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            property_type: Some("String".to_string()),
            sortable: false,
            filterable: true,
            visible: Some(true),
            editable: Some(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationConfiguration {
    pub show_page_size_dropdown: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryDescriptor {
    pub id_property: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_displayer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_descriptor: Option<EntryDescriptor>,
    #[serde(default)]
    pub property_descriptors: Vec<PropertyDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub id: String,
    /// Cache key or inline entries payload
    pub entries: String,
    /// Inline column names payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorQuery {
    pub properties: Vec<String>,
    pub source: SourceDescriptor,
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveDataDescriptor {
    pub query: DescriptorQuery,
    pub meta: DescriptorMeta,
}

/// Per-view presentation switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorOptions {
    pub sortable: bool,
    pub filterable: bool,
    pub limit: usize,
}

impl Default for DescriptorOptions {
    fn default() -> Self {
        Self {
            sortable: true,
            filterable: true,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl LiveDataDescriptor {
    pub fn new(
        columns: &[Column],
        entries: impl Into<String>,
        fields: Option<String>,
        options: DescriptorOptions,
    ) -> Self {
        Self {
            query: DescriptorQuery {
                properties: columns.iter().map(Column::key).collect(),
                source: SourceDescriptor {
                    id: SOURCE_ID.to_string(),
                    entries: entries.into(),
                    fields,
                },
                offset: 0,
                limit: options.limit,
            },
            meta: DescriptorMeta {
                default_displayer: Some(DEFAULT_DISPLAYER.to_string()),
                pagination: None,
                entry_descriptor: None,
                property_descriptors: columns
                    .iter()
                    .map(|c| PropertyDescriptor::for_column(c, options.sortable, options.filterable))
                    .collect(),
            },
        }
    }

    pub fn to_json(&self, pretty: bool) -> Result<String> {
        let json = if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        };
        json.map_err(Error::Descriptor)
    }
}

/// Source-level configuration merged under every view of this source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveDataConfiguration {
    pub meta: DescriptorMeta,
}

pub fn default_configuration() -> LiveDataConfiguration {
    LiveDataConfiguration {
        meta: DescriptorMeta {
            default_displayer: Some(DEFAULT_DISPLAYER.to_string()),
            pagination: Some(PaginationConfiguration {
                show_page_size_dropdown: true,
            }),
            entry_descriptor: Some(EntryDescriptor {
                id_property: ROW_ID_PROPERTY.to_string(),
            }),
            property_descriptors: (0..DEFAULT_PROPERTY_COUNT)
                .map(|i| PropertyDescriptor::generic(i.to_string(), i.to_string()))
                .collect(),
        },
    }
}

/// Property descriptors for a columns payload, one per column in ordinal order.
pub fn property_descriptors(fields: &str) -> Result<Vec<PropertyDescriptor>, PayloadError> {
    Ok(decode_columns(fields)?
        .iter()
        .map(|c| PropertyDescriptor::generic(c.key(), c.name.clone()))
        .collect())
}
