//! Table normalization: abstract table rows into columns and row entries.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::table::{find_table, Block, CellRenderer, Row, Table};
use livetab_cli::HeaderDetection;

/// Key prefix of the plain-text value of a column
pub const TEXT_PREFIX: &str = "text.";
/// Key prefix of the parsed timestamp (epoch seconds) of a column
pub const DATE_PREFIX: &str = "date.";

/// Default separator between date formats (and header names)
pub const DEFAULT_LIST_SEPARATOR: &str = r"\|\|";

/// Handling of a first row containing header cells.
///
/// In every mode the header cells name their columns. `Keep` and `Ignore`
/// both retain the row as the first entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderPolicy {
    #[default]
    #[serde(alias = "REMOVE")]
    Remove,
    #[serde(alias = "KEEP")]
    Keep,
    #[serde(alias = "IGNORE")]
    Ignore,
}

impl HeaderPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeaderPolicy::Remove => "remove",
            HeaderPolicy::Keep => "keep",
            HeaderPolicy::Ignore => "ignore",
        }
    }

    fn removes_header_row(&self) -> bool {
        matches!(self, HeaderPolicy::Remove)
    }
}

impl From<HeaderDetection> for HeaderPolicy {
    fn from(value: HeaderDetection) -> Self {
        match value {
            HeaderDetection::Remove => HeaderPolicy::Remove,
            HeaderDetection::Keep => HeaderPolicy::Keep,
            HeaderDetection::Ignore => HeaderPolicy::Ignore,
        }
    }
}

/// Split a delimited parameter value, dropping blank items.
pub fn split_list(value: &str, separator: &Regex) -> Vec<String> {
    separator
        .split(value)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Ordered date formats (chrono strftime syntax). The first format that
/// parses a value wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateFormats {
    formats: Vec<String>,
}

impl DateFormats {
    pub fn new<I, S>(formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            formats: formats.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a delimited list of formats, e.g. `"%Y-%m-%d||%d/%m/%Y"`.
    pub fn parse(list: &str, separator: &Regex) -> Self {
        Self {
            formats: split_list(list, separator),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    pub fn formats(&self) -> &[String] {
        &self.formats
    }

    /// Epoch seconds of the first format that parses `text`, if any.
    ///
    /// Formats without an offset are read as UTC; date-only formats as midnight UTC.
    pub fn parse_timestamp(&self, text: &str) -> Option<i64> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        self.formats
            .iter()
            .find_map(|format| parse_with_format(text, format))
    }
}

fn parse_with_format(text: &str, format: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_str(text, format) {
        return Some(dt.timestamp());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
        return Some(dt.and_utc().timestamp());
    }
    NaiveDate::parse_from_str(text, format)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
}

#[derive(Debug, Clone, Default)]
pub struct NormalizeOptions {
    pub header_policy: HeaderPolicy,
    pub date_formats: DateFormats,
    /// Column names applied positionally after header detection
    pub header_override: Vec<String>,
}

/// A positional column. The ordinal is the property key; the name is for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub ordinal: usize,
    pub name: String,
}

impl Column {
    pub fn new(ordinal: usize) -> Self {
        Self {
            ordinal,
            name: ordinal.to_string(),
        }
    }

    pub fn key(&self) -> String {
        self.ordinal.to_string()
    }
}

/// What one cell contributes to its entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellValue {
    /// Rendered markup, for display only
    pub display: String,
    /// Plain text, used for filtering, sorting and date parsing
    pub text: String,
    /// Epoch seconds when the text matched a configured date format
    pub date: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowEntry {
    /// Cells by column ordinal; ragged rows simply lack the trailing ordinals
    pub cells: BTreeMap<usize, CellValue>,
}

/// Columns and entries of one normalized table. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTable {
    pub columns: Vec<Column>,
    pub entries: Vec<RowEntry>,
}

impl ParsedTable {
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.entries.is_empty()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

/// Builds a [`ParsedTable`] from a document table using the given renderer.
pub struct TableNormalizer<'r, R: CellRenderer> {
    renderer: &'r R,
    options: NormalizeOptions,
}

impl<'r, R: CellRenderer> TableNormalizer<'r, R> {
    pub fn new(renderer: &'r R, options: NormalizeOptions) -> Self {
        Self { renderer, options }
    }

    /// Normalize the first table found in a document. No table yields an empty result.
    pub fn normalize_document(&self, blocks: &[Block]) -> ParsedTable {
        let table = find_table(blocks);
        if table.is_none() {
            debug!("no table found in document content");
        }
        self.normalize(table)
    }

    pub fn normalize(&self, table: Option<&Table>) -> ParsedTable {
        let Some(table) = table else {
            return ParsedTable::default();
        };

        let mut columns: Vec<Column> = (0..table.column_count()).map(Column::new).collect();
        let mut entries = Vec::with_capacity(table.rows.len());
        let header_detected = table.rows.first().is_some_and(Row::has_header_cells);

        for (row_index, row) in table.rows.iter().enumerate() {
            let mut entry = RowEntry::default();
            for (ordinal, cell) in row.cells.iter().enumerate() {
                let text = self.renderer.plain_text(cell);
                if row_index == 0 && cell.header {
                    columns[ordinal].name = text.clone();
                }
                let date = if self.options.date_formats.is_empty() {
                    None
                } else {
                    self.options.date_formats.parse_timestamp(&text)
                };
                entry.cells.insert(
                    ordinal,
                    CellValue {
                        display: self.renderer.rich_text(cell),
                        text,
                        date,
                    },
                );
            }
            entries.push(entry);
        }

        if header_detected && self.options.header_policy.removes_header_row() {
            entries.remove(0);
        }

        for (column, name) in columns.iter_mut().zip(&self.options.header_override) {
            column.name = name.clone();
        }

        debug!(
            columns = columns.len(),
            entries = entries.len(),
            header_detected,
            header_policy = self.options.header_policy.as_str(),
            "normalized table"
        );

        ParsedTable { columns, entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Cell;

    struct Bold;

    impl CellRenderer for Bold {
        fn plain_text(&self, cell: &Cell) -> String {
            cell.content.clone()
        }

        fn rich_text(&self, cell: &Cell) -> String {
            format!("<b>{}</b>", cell.content)
        }
    }

    fn table_with_header() -> Table {
        Table::new(vec![
            Row::new(vec![Cell::header("Name"), Cell::header("Born")]),
            Row::new(vec![Cell::data("Ada"), Cell::data("1815-12-10")]),
            Row::new(vec![Cell::data("Alan")]),
        ])
    }

    #[test]
    fn test_no_table_yields_empty() {
        let normalizer = TableNormalizer::new(&Bold, NormalizeOptions::default());
        let parsed = normalizer.normalize(None);
        assert!(parsed.is_empty());

        let parsed = normalizer.normalize_document(&[Block::Text("prose".to_string())]);
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_header_remove() {
        let normalizer = TableNormalizer::new(&Bold, NormalizeOptions::default());
        let parsed = normalizer.normalize(Some(&table_with_header()));
        assert_eq!(parsed.column_names(), vec!["Name", "Born"]);
        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.entries[0].cells[&0].text, "Ada");
        assert_eq!(parsed.entries[0].cells[&0].display, "<b>Ada</b>");
    }

    #[test]
    fn test_header_keep_and_ignore_retain_row() {
        for policy in [HeaderPolicy::Keep, HeaderPolicy::Ignore] {
            let options = NormalizeOptions {
                header_policy: policy,
                ..Default::default()
            };
            let parsed = TableNormalizer::new(&Bold, options).normalize(Some(&table_with_header()));
            assert_eq!(parsed.column_names(), vec!["Name", "Born"]);
            assert_eq!(parsed.entries.len(), 3, "policy {:?}", policy);
            assert_eq!(parsed.entries[0].cells[&0].text, "Name");
        }
    }

    #[test]
    fn test_no_header_keeps_ordinal_names() {
        let table = Table::new(vec![
            Row::new(vec![Cell::data("a"), Cell::data("b")]),
            Row::new(vec![Cell::data("c")]),
        ]);
        let parsed = TableNormalizer::new(&Bold, NormalizeOptions::default()).normalize(Some(&table));
        assert_eq!(parsed.column_names(), vec!["0", "1"]);
        assert_eq!(parsed.entries.len(), 2);
        assert!(!parsed.entries[1].cells.contains_key(&1));
    }

    #[test]
    fn test_header_cells_outside_first_row_are_data() {
        let table = Table::new(vec![
            Row::new(vec![Cell::data("a")]),
            Row::new(vec![Cell::header("H")]),
        ]);
        let parsed = TableNormalizer::new(&Bold, NormalizeOptions::default()).normalize(Some(&table));
        assert_eq!(parsed.column_names(), vec!["0"]);
        assert_eq!(parsed.entries.len(), 2);
    }

    #[test]
    fn test_header_override() {
        let options = NormalizeOptions {
            header_override: vec!["Who".to_string()],
            ..Default::default()
        };
        let parsed = TableNormalizer::new(&Bold, options).normalize(Some(&table_with_header()));
        assert_eq!(parsed.column_names(), vec!["Who", "Born"]);
    }

    #[test]
    fn test_date_parsing() {
        let options = NormalizeOptions {
            date_formats: DateFormats::new(["%d/%m/%Y", "%Y-%m-%d"]),
            ..Default::default()
        };
        let parsed = TableNormalizer::new(&Bold, options).normalize(Some(&table_with_header()));
        let born = &parsed.entries[0].cells[&1];
        assert_eq!(born.date, Some(-4_861_728_000));
        // Names do not parse as dates
        assert_eq!(parsed.entries[0].cells[&0].date, None);
    }

    #[test]
    fn test_date_formats_first_match_wins() {
        let formats = DateFormats::new(["%Y-%m-%d %H:%M:%S", "%Y-%m-%d"]);
        assert_eq!(
            formats.parse_timestamp("2023-11-14 22:13:20"),
            Some(1_700_000_000)
        );
        assert_eq!(formats.parse_timestamp("1970-01-02"), Some(86_400));
        assert_eq!(formats.parse_timestamp("not a date"), None);
        assert_eq!(formats.parse_timestamp("   "), None);
    }

    #[test]
    fn test_date_format_with_offset() {
        let formats = DateFormats::new(["%Y-%m-%dT%H:%M:%S%z"]);
        assert_eq!(
            formats.parse_timestamp("1970-01-01T01:00:00+0100"),
            Some(0)
        );
    }

    #[test]
    fn test_split_list() {
        let separator = Regex::new(DEFAULT_LIST_SEPARATOR).unwrap();
        assert_eq!(
            split_list("%Y-%m-%d || %d/%m/%Y||", &separator),
            vec!["%Y-%m-%d", "%d/%m/%Y"]
        );
        assert!(split_list("", &separator).is_empty());
        let parsed = DateFormats::parse("%Y||%m", &separator);
        assert_eq!(parsed.formats(), &["%Y".to_string(), "%m".to_string()]);
    }
}
