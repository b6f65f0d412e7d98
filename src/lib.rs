//! Filterable, sortable live-data views over tables embedded in documents.
//!
//! The write path ([`render`]) normalizes a document table, encodes it into
//! a compact payload and optionally caches it behind a short key. The read
//! path ([`executor`]) resolves such a reference and runs a [`query::Query`]
//! against it.

pub mod cache;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod executor;
pub mod normalize;
pub mod payload;
pub mod query;
pub mod render;
pub mod serve;
pub mod source;
pub mod table;

/// Application name used for the config directory and cache namespace
pub const APP_NAME: &str = "livetab";

pub use cache::{init_cache, payload_key, CacheBackend, CacheRegistry, CacheSettings, PayloadCache};
pub use config::{AppConfig, ConfigManager};
pub use descriptor::{default_configuration, property_descriptors, LiveDataDescriptor};
pub use error::{
    user_message, user_message_from_io, user_message_from_report, CacheBackendError, Error,
    PayloadError,
};
pub use executor::{Entry, EntryStore, QueryResult, ROW_ID_PROPERTY};
pub use livetab_cli::Args;
pub use normalize::{HeaderPolicy, NormalizeOptions, ParsedTable, TableNormalizer};
pub use payload::{CompressionFormat, FieldValue, PayloadCodec};
pub use query::{Constraint, Filter, Operator, Query, SortEntry};
pub use render::{MacroParameters, RenderedView, TableRenderer};
pub use serve::{Request, Session};
