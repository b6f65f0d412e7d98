//! Request handling shared by the command line and the stdio request loop.
//!
//! A [`Session`] owns the collaborators of both paths: the cell renderer and
//! codec used to render tables, and the payload cache that rendered views and
//! queries share for as long as the session lives.

use serde::Deserialize;
use serde_json::{json, Value};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::PayloadCache;
use crate::descriptor::{default_configuration, property_descriptors};
use crate::error::{user_message, Error, Result};
use crate::executor::{EntryStore, QueryResult};
use crate::payload::{decode_columns, PayloadCodec};
use crate::query::Query;
use crate::render::{MacroParameters, RenderedView, TableRenderer};
use crate::source::parse_document;
use crate::table::CellRenderer;

/// One line of the request protocol.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Request {
    /// Render the first table of some document markup
    Render {
        content: String,
        #[serde(default)]
        params: MacroParameters,
    },
    /// Query an entries reference (cache key or inline payload)
    Query {
        entries: String,
        /// Columns payload used to resolve properties given by column name
        #[serde(default)]
        fields: Option<String>,
        #[serde(default)]
        query: Query,
    },
    /// Source-level default configuration; with a columns payload, its
    /// property descriptors replace the generic ones
    Configuration {
        #[serde(default)]
        fields: Option<String>,
    },
}

pub struct Session<R: CellRenderer> {
    renderer: R,
    codec: PayloadCodec,
    cache: Option<Arc<PayloadCache>>,
    default_limit: usize,
    date_formats: Vec<String>,
}

impl<R: CellRenderer> Session<R> {
    pub fn new(
        renderer: R,
        codec: PayloadCodec,
        cache: Option<Arc<PayloadCache>>,
        default_limit: usize,
    ) -> Self {
        Self {
            renderer,
            codec,
            cache,
            default_limit,
            date_formats: Vec::new(),
        }
    }

    /// Date formats applied to rendered tables whose parameters name none.
    pub fn with_date_formats(mut self, date_formats: Vec<String>) -> Self {
        self.date_formats = date_formats;
        self
    }

    pub fn render(&self, content: &str, params: &MacroParameters) -> Result<RenderedView> {
        let mut params = params.clone();
        if params.default_date_formats.is_empty() {
            params.default_date_formats = self.date_formats.clone();
        }
        TableRenderer::new(&self.renderer, self.codec, self.cache.as_deref())
            .with_limit(self.default_limit)
            .render(&parse_document(content), &params)
    }

    /// Run a query; a missing limit means the session's default page size.
    pub fn query(&self, entries: &str, fields: Option<&str>, query: &Query) -> Result<QueryResult> {
        let mut query = query.clone();
        if query.limit.is_none() {
            query.limit = Some(self.default_limit);
        }
        if let Some(fields) = fields {
            query.resolve_properties(&decode_columns(fields)?);
        }
        EntryStore::new(self.cache.as_deref()).execute(entries, &query)
    }

    pub fn handle(&self, request: &Request) -> Result<Value> {
        let value = match request {
            Request::Render { content, params } => {
                serde_json::to_value(self.render(content, params)?)
            }
            Request::Query {
                entries,
                fields,
                query,
            } => serde_json::to_value(self.query(entries, fields.as_deref(), query)?),
            Request::Configuration { fields } => {
                let mut configuration = default_configuration();
                if let Some(fields) = fields {
                    configuration.meta.property_descriptors = property_descriptors(fields)?;
                }
                serde_json::to_value(configuration)
            }
        };
        value.map_err(Error::Descriptor)
    }

    /// Answer one request line with one response line.
    pub fn handle_line(&self, line: &str) -> String {
        let response = match serde_json::from_str::<Request>(line) {
            Ok(request) => match self.handle(&request) {
                Ok(result) => json!({ "result": result }),
                Err(e) => {
                    warn!(error = %e, "request failed");
                    json!({ "error": user_message(&e) })
                }
            },
            Err(e) => {
                debug!(error = %e, "unparseable request");
                json!({ "error": format!("Invalid request: {}", e) })
            }
        };
        response.to_string()
    }

    /// Answer requests line by line until the input ends. Blank lines are skipped.
    pub fn run(&self, input: impl BufRead, mut output: impl Write) -> io::Result<()> {
        for line in input.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            writeln!(output, "{}", self.handle_line(&line))?;
            output.flush()?;
        }
        Ok(())
    }
}
