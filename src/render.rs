//! Turning a document's table into a live-data view.
//!
//! [`TableRenderer`] runs the write path: normalize the first table, encode
//! entries and column names, store the entries payload behind a short key
//! when a cache is available, and describe the view for the display framework.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::{payload_key, PayloadCache};
use crate::descriptor::{DescriptorOptions, LiveDataDescriptor, DEFAULT_LIMIT};
use crate::error::{Error, Result};
use crate::normalize::{
    split_list, DateFormats, HeaderPolicy, NormalizeOptions, ParsedTable, TableNormalizer,
    DEFAULT_LIST_SEPARATOR,
};
use crate::payload::PayloadCodec;
use crate::table::{Block, CellRenderer};

/// Parameters of one embedded table view.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MacroParameters {
    /// Identifier of the generated view
    pub id: Option<String>,
    pub header_detection: HeaderPolicy,
    /// Explicit column names, split with `date_formats_separator`
    pub header: Option<String>,
    /// Date formats, split with `date_formats_separator`
    pub date_formats: Option<String>,
    /// Regular expression separating list parameters
    pub date_formats_separator: String,
    pub sorting: bool,
    pub filtering: bool,
    /// Date formats used when `date_formats` is not given
    #[serde(skip)]
    pub default_date_formats: Vec<String>,
}

impl Default for MacroParameters {
    fn default() -> Self {
        Self {
            id: None,
            header_detection: HeaderPolicy::default(),
            header: None,
            date_formats: None,
            date_formats_separator: DEFAULT_LIST_SEPARATOR.to_string(),
            sorting: true,
            filtering: true,
            default_date_formats: Vec::new(),
        }
    }
}

impl MacroParameters {
    pub fn normalize_options(&self) -> Result<NormalizeOptions> {
        let separator =
            Regex::new(&self.date_formats_separator).map_err(|e| Error::InvalidParameter {
                name: "dateFormatsSeparator",
                reason: e.to_string(),
            })?;
        Ok(NormalizeOptions {
            header_policy: self.header_detection,
            date_formats: match self.date_formats.as_deref() {
                Some(list) => DateFormats::parse(list, &separator),
                None => DateFormats::new(self.default_date_formats.iter().cloned()),
            },
            header_override: self
                .header
                .as_deref()
                .map(|list| split_list(list, &separator))
                .unwrap_or_default(),
        })
    }
}

/// A rendered view: its identifier and the descriptor handed to the framework.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub live_data: LiveDataDescriptor,
}

pub struct TableRenderer<'a, R: CellRenderer> {
    renderer: &'a R,
    codec: PayloadCodec,
    cache: Option<&'a PayloadCache>,
    limit: usize,
}

impl<'a, R: CellRenderer> TableRenderer<'a, R> {
    pub fn new(renderer: &'a R, codec: PayloadCodec, cache: Option<&'a PayloadCache>) -> Self {
        Self {
            renderer,
            codec,
            cache,
            limit: DEFAULT_LIMIT,
        }
    }

    /// Page size of the generated view.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn parse(&self, blocks: &[Block], params: &MacroParameters) -> Result<ParsedTable> {
        let options = params.normalize_options()?;
        Ok(TableNormalizer::new(self.renderer, options).normalize_document(blocks))
    }

    pub fn render(&self, blocks: &[Block], params: &MacroParameters) -> Result<RenderedView> {
        let parsed = self.parse(blocks, params)?;

        let entries = self.codec.encode_rows(&parsed.entries)?;
        let fields = self.codec.encode_columns(&parsed.columns)?;
        let reference = match self.cache {
            Some(cache) => {
                let key = payload_key(&entries);
                debug!(cache = cache.id(), %key, len = entries.len(), "storing entries payload");
                cache.put(key.clone(), entries);
                key
            }
            None => entries,
        };

        let descriptor = LiveDataDescriptor::new(
            &parsed.columns,
            reference,
            Some(fields),
            DescriptorOptions {
                sortable: params.sorting,
                filterable: params.filtering,
                limit: self.limit,
            },
        );

        info!(
            id = params.id.as_deref().unwrap_or(""),
            columns = parsed.columns.len(),
            entries = parsed.entries.len(),
            compression = self.codec.compression().name(),
            cached = self.cache.is_some(),
            "rendered table view"
        );

        Ok(RenderedView {
            id: params.id.clone(),
            live_data: descriptor,
        })
    }
}
