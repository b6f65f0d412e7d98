//! Shared CLI definitions for livetab.
//!
//! Used by the main application and by the build script (manpage) and
//! gen_docs binary (command-line-options markdown).

use clap::{Args as ClapArgs, CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Compression applied to encoded payloads
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Default)]
pub enum CompressionFormat {
    /// Gzip compression - Most common, good balance of speed and compression
    #[default]
    Gzip,
    /// Zstandard compression - Modern, fast compression with good ratios
    Zstd,
    /// Bzip2 compression - Good compression ratio, slower than gzip
    Bzip2,
    /// XZ compression - Excellent compression ratio, slower than bzip2
    Xz,
}

impl CompressionFormat {
    /// Parse a format from its configuration name (e.g. "gzip", "zstd").
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "gzip" | "gz" => Some(Self::Gzip),
            "zstd" | "zst" => Some(Self::Zstd),
            "bzip2" | "bz2" => Some(Self::Bzip2),
            "xz" => Some(Self::Xz),
            _ => None,
        }
    }

    /// Configuration name for this compression format
    pub fn name(&self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
            Self::Bzip2 => "bzip2",
            Self::Xz => "xz",
        }
    }

    /// Detect the compression format from the leading magic bytes of a stream.
    pub fn from_magic(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0x1f, 0x8b]) {
            Some(Self::Gzip)
        } else if bytes.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Some(Self::Zstd)
        } else if bytes.starts_with(b"BZh") {
            Some(Self::Bzip2)
        } else if bytes.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
            Some(Self::Xz)
        } else {
            None
        }
    }
}

/// What to do with a first row made of header cells
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Default)]
pub enum HeaderDetection {
    /// Use the header row for column names and drop it from the entries
    #[default]
    Remove,
    /// Use the header row for column names and keep it as the first entry
    Keep,
    /// Treat the header row as a normal entry (column names are still taken from it)
    Ignore,
}

/// Command-line arguments for livetab
#[derive(Clone, Parser, Debug)]
#[command(
    name = "livetab",
    version,
    about = "Live-data views over tables embedded in documents",
    long_about = include_str!("../long_about.txt")
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Enable debug logging (overrides config [logging] level; RUST_LOG still wins)
    #[arg(long = "debug", global = true, action)]
    pub debug: bool,

    /// Generate default configuration file at ~/.config/livetab/config.toml
    #[arg(long = "generate-config", action)]
    pub generate_config: bool,

    /// Force overwrite existing config file when using --generate-config
    #[arg(long = "force", requires = "generate_config", action)]
    pub force: bool,
}

#[derive(Clone, Subcommand, Debug)]
pub enum Command {
    /// Read table markup and print the live-data descriptor for it
    Render(RenderArgs),
    /// Run a filter/sort/pagination query against an encoded payload
    Query(QueryArgs),
    /// Answer newline-delimited JSON render/query requests on stdin, sharing one payload cache
    Serve(ServeArgs),
}

#[derive(Clone, ClapArgs, Debug)]
pub struct RenderArgs {
    /// Path to the document holding the table, or "-" for stdin
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    /// Identifier of the generated live-data view
    #[arg(long = "id")]
    pub id: Option<String>,

    /// How a leading header row is handled (overrides config [table] header_detection)
    #[arg(long = "header-detection", value_enum)]
    pub header_detection: Option<HeaderDetection>,

    /// Explicit column names, split with the date formats separator. Example: "Name||Born"
    #[arg(long = "header", value_name = "NAMES")]
    pub header: Option<String>,

    /// Date formats (chrono strftime) probed against every cell, split with the separator. Example: "%Y-%m-%d||%d/%m/%Y"
    #[arg(long = "date-formats", value_name = "FORMATS")]
    pub date_formats: Option<String>,

    /// Regular expression separating date formats and header names (default: \|\|)
    #[arg(long = "date-formats-separator", value_name = "REGEX")]
    pub date_formats_separator: Option<String>,

    /// Mark columns as not sortable in the descriptor
    #[arg(long = "no-sorting", action)]
    pub no_sorting: bool,

    /// Mark columns as not filterable in the descriptor
    #[arg(long = "no-filtering", action)]
    pub no_filtering: bool,

    /// Compression used for the payload (gzip, zstd, bzip2, xz)
    #[arg(long = "compression", value_enum)]
    pub compression: Option<CompressionFormat>,

    /// Pretty-print the JSON output
    #[arg(long = "pretty", action)]
    pub pretty: bool,
}

#[derive(Clone, ClapArgs, Debug)]
pub struct QueryArgs {
    /// Encoded entries payload (or a cache key, which falls back to being read as the payload)
    #[arg(value_name = "ENTRIES")]
    pub entries: String,

    /// Encoded column names payload, used to resolve filter/sort columns given by name
    #[arg(long = "fields", value_name = "PAYLOAD")]
    pub fields: Option<String>,

    /// Filter constraint COL:OP:VALUE (OP: contains, startsWith, equals, between). Repeatable
    #[arg(long = "filter", value_name = "COL:OP:VALUE")]
    pub filter: Vec<String>,

    /// Sort key COL[:asc|:desc], applied in the order given. Repeatable
    #[arg(long = "sort", value_name = "COL[:DIR]")]
    pub sort: Vec<String>,

    /// Number of matching entries to skip
    #[arg(long = "offset")]
    pub offset: Option<usize>,

    /// Maximum number of entries to return (default: config [query] default_limit)
    #[arg(long = "limit")]
    pub limit: Option<usize>,

    /// Read the query (filters, sort, offset, limit) from a JSON file instead
    #[arg(long = "query-json", value_name = "FILE", conflicts_with_all = ["filter", "sort"])]
    pub query_json: Option<PathBuf>,

    /// Pretty-print the JSON output
    #[arg(long = "pretty", action)]
    pub pretty: bool,
}

#[derive(Clone, ClapArgs, Debug)]
pub struct ServeArgs {
    /// Inline payloads in rendered descriptors instead of caching them (overrides config [cache] enabled)
    #[arg(long = "no-cache", action)]
    pub no_cache: bool,

    /// Compression used for rendered payloads (gzip, zstd, bzip2, xz)
    #[arg(long = "compression", value_enum)]
    pub compression: Option<CompressionFormat>,
}

/// Escape `|` and newlines for use in markdown table cells.
fn escape_table_cell(s: &str) -> String {
    s.replace('|', "\\|").replace(['\n', '\r'], " ")
}

fn option_string(arg: &clap::Arg) -> String {
    let value_names = |arg: &clap::Arg| -> String {
        arg.get_value_names()
            .map(|names| {
                names
                    .iter()
                    .map(|n: &clap::builder::Str| format!("<{}>", n.as_ref() as &str))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default()
    };

    if arg.is_positional() {
        let placeholder = value_names(arg);
        return if arg.is_required_set() {
            placeholder
        } else {
            format!("[{placeholder}]")
        };
    }

    let mut parts = Vec::new();
    if let Some(s) = arg.get_short() {
        parts.push(format!("-{s}"));
    }
    if let Some(l) = arg.get_long() {
        parts.push(format!("--{l}"));
    }
    let op = parts.join(", ");
    let placeholder = if arg.get_action().takes_values() {
        value_names(arg)
    } else {
        String::new()
    };
    if placeholder.is_empty() {
        op
    } else {
        format!("{op} {placeholder}")
    }
}

fn push_options_table(out: &mut String, cmd: &clap::Command) {
    out.push_str("| Option | Description |\n");
    out.push_str("|--------|-------------|\n");

    for arg in cmd.get_arguments() {
        let id = arg.get_id().as_ref().to_string();
        if id == "help" || id == "version" {
            continue;
        }
        let help = arg
            .get_help()
            .map(|h| escape_table_cell(&h.to_string()))
            .unwrap_or_else(|| "-".to_string());

        out.push_str(&format!("| `{}` | {help} |\n", option_string(arg)));
    }
}

/// Render command-line options as markdown.
///
/// Used by the gen_docs binary; output is written to stdout and then
/// to `docs/reference/command-line-options.md` by the docs build process.
pub fn render_options_markdown() -> String {
    let mut cmd = Args::command();
    cmd.build();

    let mut out = String::from("# Command Line Options\n\n");

    out.push_str("## Usage\n\n```\n");
    let usage = cmd.render_usage();
    out.push_str(&usage.to_string());
    out.push_str("\n```\n\n");

    out.push_str("## Options\n\n");
    push_options_table(&mut out, &cmd);

    for sub in cmd.get_subcommands() {
        if sub.get_name() == "help" {
            continue;
        }
        out.push_str(&format!("\n## `{}`\n\n", sub.get_name()));
        if let Some(about) = sub.get_about() {
            out.push_str(&format!("{}\n\n", about));
        }
        push_options_table(&mut out, sub);
    }

    out
}
