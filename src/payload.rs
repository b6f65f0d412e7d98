//! Compact payload codec.
//!
//! Entries (and column names) travel as JSON, compressed, then encoded as
//! URL-safe Base64 so they can be used as a query parameter or a cache value.
//! Decoding detects the compression from the stream's magic bytes.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::{Read, Write};

use crate::error::PayloadError;
use crate::normalize::{CellValue, Column, RowEntry, DATE_PREFIX, TEXT_PREFIX};
pub use livetab_cli::CompressionFormat;

/// URL-safe alphabet; encodes without padding, decodes with or without it.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Compress bytes. Empty input compresses to empty output.
pub fn compress(bytes: &[u8], format: CompressionFormat) -> Result<Vec<u8>, PayloadError> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    let out = match format {
        CompressionFormat::Gzip => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(bytes)?;
            encoder.finish()?
        }
        CompressionFormat::Zstd => zstd::encode_all(bytes, 0)?,
        CompressionFormat::Bzip2 => {
            let mut encoder =
                bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
            encoder.write_all(bytes)?;
            encoder.finish()?
        }
        CompressionFormat::Xz => {
            let mut encoder = xz2::write::XzEncoder::new(
                Vec::new(),
                6, // compression level
            );
            encoder.write_all(bytes)?;
            encoder.finish()?
        }
    };
    Ok(out)
}

/// Decompress bytes produced by [`compress`]. Empty input decompresses to empty output.
///
/// Streams without a known magic number are accepted as-is when they look like
/// plain JSON, so uncompressed payloads still decode.
pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>, PayloadError> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    let mut reader: Box<dyn Read + '_> = match CompressionFormat::from_magic(bytes) {
        Some(CompressionFormat::Gzip) => Box::new(flate2::read::GzDecoder::new(bytes)),
        Some(CompressionFormat::Zstd) => Box::new(zstd::Decoder::new(bytes)?),
        Some(CompressionFormat::Bzip2) => Box::new(bzip2::read::BzDecoder::new(bytes)),
        Some(CompressionFormat::Xz) => Box::new(xz2::read::XzDecoder::new(bytes)),
        None if looks_like_json(bytes) => return Ok(bytes.to_vec()),
        None => {
            return Err(PayloadError::Compression(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "unrecognized compression format",
            )))
        }
    };
    let mut out = Vec::new();
    reader.read_to_end(&mut out)?;
    Ok(out)
}

fn looks_like_json(bytes: &[u8]) -> bool {
    matches!(
        bytes.iter().find(|b| !b.is_ascii_whitespace()),
        Some(b'[') | Some(b'{')
    )
}

/// Base64-decode and decompress a payload into its JSON text.
fn decode_text(payload: &str) -> Result<String, PayloadError> {
    let compressed = URL_SAFE_LENIENT.decode(payload.trim())?;
    let json = decompress(&compressed)?;
    Ok(String::from_utf8(json)?)
}

fn parse_json(payload: &str) -> Result<Option<Value>, PayloadError> {
    let json = decode_text(payload)?;
    if json.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&json)?))
}

/// Encodes tables into payloads with a fixed compression format.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadCodec {
    compression: CompressionFormat,
}

impl PayloadCodec {
    pub fn new(compression: CompressionFormat) -> Self {
        Self { compression }
    }

    pub fn compression(&self) -> CompressionFormat {
        self.compression
    }

    pub(crate) fn encode_value<T: Serialize>(&self, value: &T) -> Result<String, PayloadError> {
        let json = serde_json::to_vec(value)?;
        let compressed = compress(&json, self.compression)?;
        Ok(URL_SAFE_LENIENT.encode(compressed))
    }

    /// Encode row entries as an array of objects keyed by ordinal,
    /// `text.<ordinal>` and `date.<ordinal>`.
    pub fn encode_rows(&self, entries: &[RowEntry]) -> Result<String, PayloadError> {
        let rows: Vec<Map<String, Value>> = entries.iter().map(row_to_json).collect();
        self.encode_value(&rows)
    }

    /// Encode the column names as an array of strings in ordinal order.
    pub fn encode_columns(&self, columns: &[Column]) -> Result<String, PayloadError> {
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        self.encode_value(&names)
    }
}

fn row_to_json(entry: &RowEntry) -> Map<String, Value> {
    let mut map = Map::new();
    for (ordinal, cell) in &entry.cells {
        map.insert(ordinal.to_string(), Value::String(cell.display.clone()));
        map.insert(
            format!("{}{}", TEXT_PREFIX, ordinal),
            Value::String(cell.text.clone()),
        );
        if let Some(date) = cell.date {
            map.insert(format!("{}{}", DATE_PREFIX, ordinal), Value::from(date));
        }
    }
    map
}

fn expect_array(value: Option<Value>) -> Result<Vec<Value>, PayloadError> {
    match value {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(PayloadError::shape(format!(
            "expected an array, found {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn parse_ordinal(key: &str) -> Result<usize, PayloadError> {
    key.parse::<usize>()
        .map_err(|_| PayloadError::shape(format!("unexpected entry key '{}'", key)))
}

fn scalar_text(value: &Value) -> Result<String, PayloadError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(PayloadError::shape(format!(
            "expected a scalar value, found {}",
            json_kind(other)
        ))),
    }
}

/// Decode a rows payload back into row entries, keeping all values as strings.
pub fn decode_rows(payload: &str) -> Result<Vec<RowEntry>, PayloadError> {
    let items = expect_array(parse_json(payload)?)?;
    let mut entries = Vec::with_capacity(items.len());
    for item in items {
        let map = match item {
            Value::Object(map) => map,
            other => {
                return Err(PayloadError::shape(format!(
                    "expected an object per entry, found {}",
                    json_kind(&other)
                )))
            }
        };
        let mut entry = RowEntry::default();
        for (key, value) in &map {
            let (ordinal, slot) = if let Some(rest) = key.strip_prefix(TEXT_PREFIX) {
                (parse_ordinal(rest)?, Slot::Text)
            } else if let Some(rest) = key.strip_prefix(DATE_PREFIX) {
                (parse_ordinal(rest)?, Slot::Date)
            } else {
                (parse_ordinal(key)?, Slot::Display)
            };
            let cell = entry.cells.entry(ordinal).or_insert_with(|| CellValue {
                display: String::new(),
                text: String::new(),
                date: None,
            });
            match slot {
                Slot::Display => cell.display = scalar_text(value)?,
                Slot::Text => cell.text = scalar_text(value)?,
                Slot::Date => {
                    cell.date = Some(value.as_i64().ok_or_else(|| {
                        PayloadError::shape(format!("'{}' is not an integer timestamp", key))
                    })?)
                }
            }
        }
        entries.push(entry);
    }
    Ok(entries)
}

enum Slot {
    Display,
    Text,
    Date,
}

/// Decode a columns payload into column names in ordinal order.
pub fn decode_columns(payload: &str) -> Result<Vec<Column>, PayloadError> {
    let items = expect_array(parse_json(payload)?)?;
    items
        .iter()
        .enumerate()
        .map(|(ordinal, item)| {
            Ok(Column {
                ordinal,
                name: scalar_text(item)?,
            })
        })
        .collect()
}

/// One value of a decoded entry, typed for query use.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(Number),
    Text(String),
}

impl FieldValue {
    /// Strings that are the canonical spelling of a number become numbers;
    /// anything else stays text. Null values are dropped.
    fn from_json(value: Value) -> Result<Option<Self>, PayloadError> {
        match value {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(FieldValue::Text(b.to_string()))),
            Value::Number(n) => Ok(Some(FieldValue::Number(n))),
            Value::String(s) => Ok(Some(match s.parse::<Number>() {
                Ok(n) if n.to_string() == s => FieldValue::Number(n),
                _ => FieldValue::Text(s),
            })),
            other @ (Value::Array(_) | Value::Object(_)) => Err(PayloadError::shape(format!(
                "expected a scalar value, found {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            FieldValue::Number(n) => Cow::Owned(n.to_string()),
            FieldValue::Text(s) => Cow::Borrowed(s),
        }
    }

    /// Integer epoch seconds, when the value can be read as one.
    pub fn as_timestamp(&self) -> Option<i64> {
        match self {
            FieldValue::Number(n) => n.as_i64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite() && f.fract() == 0.0)
                    .map(|f| f as i64)
            }),
            FieldValue::Text(s) => s.trim().parse::<i64>().ok(),
        }
    }
}

/// The values of one decoded entry, by key.
pub type Fields = BTreeMap<String, FieldValue>;

/// Decode a rows payload for querying: keys are kept as written and values typed.
pub fn decode_entries(payload: &str) -> Result<Vec<Fields>, PayloadError> {
    let items = expect_array(parse_json(payload)?)?;
    let mut entries = Vec::with_capacity(items.len());
    for item in items {
        let map = match item {
            Value::Object(map) => map,
            other => {
                return Err(PayloadError::shape(format!(
                    "expected an object per entry, found {}",
                    json_kind(&other)
                )))
            }
        };
        let mut fields = Fields::new();
        for (key, value) in map {
            if let Some(value) = FieldValue::from_json(value)? {
                fields.insert(key, value);
            }
        }
        entries.push(fields);
    }
    Ok(entries)
}
