//! Abstract document tree handed over by the document parser.
//!
//! Only the shape needed to locate a table and read its cells is modelled
//! here; turning a cell into text is delegated to a [`CellRenderer`].

/// A node of a parsed document.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Table(Table),
    /// Any container block (paragraph, section, macro body...) with children.
    Group(Vec<Block>),
    /// Leaf content that is not a table.
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    /// Whether this cell was written as a header cell
    pub header: bool,
    /// Raw cell content as written in the document
    pub content: String,
}

impl Cell {
    pub fn data(content: impl Into<String>) -> Self {
        Self {
            header: false,
            content: content.into(),
        }
    }

    pub fn header(content: impl Into<String>) -> Self {
        Self {
            header: true,
            content: content.into(),
        }
    }
}

impl Row {
    pub fn new(cells: Vec<Cell>) -> Self {
        Self { cells }
    }

    /// True when at least one cell of the row is a header cell.
    pub fn has_header_cells(&self) -> bool {
        self.cells.iter().any(|c| c.header)
    }
}

impl Table {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    /// Number of columns: the widest row wins, shorter rows are ragged.
    pub fn column_count(&self) -> usize {
        self.rows.iter().map(|r| r.cells.len()).max().unwrap_or(0)
    }
}

/// Renders cell content for the two uses the table pipeline has for it.
pub trait CellRenderer {
    /// Plain text used for filtering, sorting and date parsing.
    fn plain_text(&self, cell: &Cell) -> String;
    /// Rich markup used only for display.
    fn rich_text(&self, cell: &Cell) -> String;
}

/// Depth-first search for the first table in a block list.
pub fn find_table(blocks: &[Block]) -> Option<&Table> {
    for block in blocks {
        match block {
            Block::Table(table) => return Some(table),
            Block::Group(children) => {
                if let Some(table) = find_table(children) {
                    return Some(table);
                }
            }
            Block::Text(_) => {}
        }
    }
    None
}
