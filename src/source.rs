//! Wiki table markup reader used by the command line.
//!
//! Understands the subset needed to feed the normalizer:
//! - `|=Name|=Born` header rows and `|Ada|1815-12-10` data rows; consecutive
//!   row lines form one table, anything else ends it
//! - `(((` / `)))` group blocks, which may nest
//! - `~` escapes the next character (so `~|` is a literal pipe)
//! - `**bold**`, `//italic//` and `__underline__` inline formatting

use regex::Regex;

use crate::table::{Block, Cell, CellRenderer, Row, Table};

const GROUP_OPEN: &str = "(((";
const GROUP_CLOSE: &str = ")))";

struct Builder {
    /// Open containers; the first one is the document itself
    stack: Vec<Vec<Block>>,
    table: Option<Table>,
}

impl Builder {
    fn current(&mut self) -> &mut Vec<Block> {
        if self.stack.is_empty() {
            self.stack.push(Vec::new());
        }
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    fn flush_table(&mut self) {
        if let Some(table) = self.table.take() {
            self.current().push(Block::Table(table));
        }
    }

    fn close_group(&mut self) -> bool {
        if self.stack.len() < 2 {
            return false;
        }
        self.flush_table();
        if let Some(children) = self.stack.pop() {
            self.current().push(Block::Group(children));
        }
        true
    }

    fn finish(mut self) -> Vec<Block> {
        self.flush_table();
        // Unclosed groups end with the document
        while self.close_group() {}
        self.stack.pop().unwrap_or_default()
    }
}

/// Parse document markup into blocks.
pub fn parse_document(input: &str) -> Vec<Block> {
    let mut builder = Builder {
        stack: vec![Vec::new()],
        table: None,
    };

    for line in input.lines() {
        let trimmed = line.trim();
        if trimmed == GROUP_OPEN {
            builder.flush_table();
            builder.stack.push(Vec::new());
        } else if trimmed == GROUP_CLOSE {
            if !builder.close_group() {
                builder.flush_table();
                builder.current().push(Block::Text(trimmed.to_string()));
            }
        } else if let Some(rest) = trimmed.strip_prefix('|') {
            builder
                .table
                .get_or_insert_with(Table::default)
                .rows
                .push(parse_row(rest));
        } else {
            builder.flush_table();
            if !trimmed.is_empty() {
                builder.current().push(Block::Text(trimmed.to_string()));
            }
        }
    }

    builder.finish()
}

/// Split a row line (without its leading `|`) into cells.
fn parse_row(line: &str) -> Row {
    let mut raw_cells = Vec::new();
    let mut current = String::new();
    let mut ended_with_separator = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        ended_with_separator = false;
        match c {
            '~' => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '|' => {
                raw_cells.push(std::mem::take(&mut current));
                ended_with_separator = true;
            }
            _ => current.push(c),
        }
    }
    if !ended_with_separator {
        raw_cells.push(current);
    }

    Row::new(
        raw_cells
            .into_iter()
            .map(|raw| match raw.strip_prefix('=') {
                Some(content) => Cell::header(content),
                None => Cell::data(raw),
            })
            .collect(),
    )
}

/// Renders cell markup as plain text or as HTML.
pub struct MarkupRenderer {
    bold: Regex,
    italic: Regex,
    underline: Regex,
    escape: Regex,
}

impl MarkupRenderer {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            bold: Regex::new(r"\*\*(.+?)\*\*")?,
            italic: Regex::new(r"//(.+?)//")?,
            underline: Regex::new(r"__(.+?)__")?,
            escape: Regex::new(r"~(.)")?,
        })
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

impl CellRenderer for MarkupRenderer {
    fn plain_text(&self, cell: &Cell) -> String {
        let text = self.bold.replace_all(cell.content.trim(), "$1");
        let text = self.italic.replace_all(&text, "$1");
        let text = self.underline.replace_all(&text, "$1");
        self.escape.replace_all(&text, "$1").into_owned()
    }

    fn rich_text(&self, cell: &Cell) -> String {
        let html = escape_html(cell.content.trim());
        let html = self.bold.replace_all(&html, "<strong>$1</strong>");
        let html = self.italic.replace_all(&html, "<em>$1</em>");
        let html = self.underline.replace_all(&html, "<ins>$1</ins>");
        self.escape.replace_all(&html, "$1").into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::find_table;

    #[test]
    fn test_parse_simple_table() {
        let blocks = parse_document("|=Name|=Born\n|Ada|1815-12-10\n|Alan|1912-06-23\n");
        assert_eq!(blocks.len(), 1);
        let table = find_table(&blocks).expect("table");
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.rows[0].cells, vec![Cell::header("Name"), Cell::header("Born")]);
        assert_eq!(table.rows[1].cells, vec![Cell::data("Ada"), Cell::data("1815-12-10")]);
    }

    #[test]
    fn test_trailing_pipe_and_empty_cells() {
        let blocks = parse_document("|a||c|\n");
        let table = find_table(&blocks).expect("table");
        assert_eq!(
            table.rows[0].cells,
            vec![Cell::data("a"), Cell::data(""), Cell::data("c")]
        );
    }

    #[test]
    fn test_escaped_pipe_stays_in_cell() {
        let blocks = parse_document("|a~|b|c\n");
        let table = find_table(&blocks).expect("table");
        assert_eq!(table.rows[0].cells.len(), 2);
        let renderer = MarkupRenderer::new().unwrap();
        assert_eq!(renderer.plain_text(&table.rows[0].cells[0]), "a|b");
    }

    #[test]
    fn test_text_and_groups() {
        let input = "Intro paragraph\n\n(((\nNested text\n|x|y\n)))\n|second|table\n";
        let blocks = parse_document(input);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0], Block::Text("Intro paragraph".to_string()));
        match &blocks[1] {
            Block::Group(children) => {
                assert_eq!(children.len(), 2);
                assert!(matches!(children[1], Block::Table(_)));
            }
            other => panic!("expected group, got {:?}", other),
        }
        // The nested table is found first
        let table = find_table(&blocks).expect("table");
        assert_eq!(table.rows[0].cells[0], Cell::data("x"));
    }

    #[test]
    fn test_blank_line_splits_tables() {
        let blocks = parse_document("|a\n\n|b\n");
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn test_unbalanced_groups() {
        let blocks = parse_document(")))\n(((\n|a\n");
        assert_eq!(blocks[0], Block::Text(")))".to_string()));
        assert!(matches!(blocks[1], Block::Group(_)));
        assert!(find_table(&blocks).is_some());
    }

    #[test]
    fn test_renderer_formats() {
        let renderer = MarkupRenderer::new().unwrap();
        let cell = Cell::data(" **Ada** <Lovelace> & //co// ");
        assert_eq!(renderer.plain_text(&cell), "Ada <Lovelace> & co");
        assert_eq!(
            renderer.rich_text(&cell),
            "<strong>Ada</strong> &lt;Lovelace&gt; &amp; <em>co</em>"
        );
        let cell = Cell::data("__under__");
        assert_eq!(renderer.rich_text(&cell), "<ins>under</ins>");
    }
}
