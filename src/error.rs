//! Error types and user-facing error message formatting.
//!
//! Payload and cache failures are typed so the request boundary can pick
//! the right message without string parsing.

use std::io;
use thiserror::Error;

/// Failure to encode or decode a compact payload.
#[derive(Error, Debug)]
pub enum PayloadError {
    /// Not URL-safe Base64
    #[error("not valid encoded data: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Compression or decompression failed (corrupt or truncated stream)
    #[error("not valid encoded data: {0}")]
    Compression(#[from] io::Error),

    /// Decompressed bytes are not UTF-8
    #[error("not valid encoded data: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Valid encoding, but the content is not valid JSON
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Valid JSON with an unexpected shape
    #[error("malformed payload: {reason}")]
    Shape { reason: String },
}

impl PayloadError {
    pub(crate) fn shape(reason: impl Into<String>) -> Self {
        Self::Shape {
            reason: reason.into(),
        }
    }

    /// True when the input was not valid encoded data at all, as opposed to
    /// a valid encoding carrying malformed content.
    pub fn is_encoding(&self) -> bool {
        matches!(self, Self::Base64(_) | Self::Compression(_) | Self::Utf8(_))
    }
}

/// The cache store could not be created.
#[derive(Error, Debug)]
pub enum CacheBackendError {
    #[error("cache '{id}' already exists")]
    AlreadyExists { id: String },

    #[error("cache backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("could not create cache '{base_id}' after {attempts} attempts: {last}")]
    Exhausted {
        base_id: String,
        attempts: usize,
        #[source]
        last: Box<CacheBackendError>,
    },
}

/// Request-level failure.
#[derive(Error, Debug)]
pub enum Error {
    /// The reference was not a cache key and could not be decoded as a payload itself.
    #[error("Failed to retrieve entries. The entries reference is not in cache or is not valid.")]
    UnresolvedReference(#[source] PayloadError),

    /// The reference was found in cache but the cached payload could not be decoded.
    #[error("Failed to retrieve entries. The data was found in cache but is not valid.")]
    CorruptCachedData(#[source] PayloadError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    CacheBackend(#[from] CacheBackendError),

    #[error("Failed to serialize the live-data descriptor: {0}")]
    Descriptor(#[source] serde_json::Error),

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Format a request error as a one-line user-facing message, including the
/// underlying payload problem when there is one.
pub fn user_message(err: &Error) -> String {
    match err {
        Error::UnresolvedReference(cause) | Error::CorruptCachedData(cause) => {
            format!("{} ({})", err, cause)
        }
        _ => err.to_string(),
    }
}

/// Format an io::Error as a user-facing message by matching on ErrorKind.
pub fn user_message_from_io(err: &io::Error, context: Option<&str>) -> String {
    use std::io::ErrorKind;

    let base: String = match err.kind() {
        ErrorKind::NotFound => "File or directory not found.".to_string(),
        ErrorKind::PermissionDenied => "Permission denied. Check read access.".to_string(),
        ErrorKind::InvalidData | ErrorKind::InvalidInput => {
            "Invalid or corrupted data.".to_string()
        }
        ErrorKind::UnexpectedEof => "Unexpected end of file.".to_string(),
        ErrorKind::Interrupted => "Operation interrupted.".to_string(),
        _ => err.to_string(),
    };

    match context {
        Some(ctx) if !ctx.is_empty() => format!("{} {}", base, ctx),
        _ => base,
    }
}

/// Format a color_eyre Report by downcasting to known error types.
/// Walks the cause chain to find a request error, a cache error or an io::Error.
pub fn user_message_from_report(report: &color_eyre::eyre::Report) -> String {
    for cause in report.chain() {
        if let Some(err) = cause.downcast_ref::<Error>() {
            return user_message(err);
        }
        if let Some(err) = cause.downcast_ref::<CacheBackendError>() {
            return format!("Cache setup failed: {}", err);
        }
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return user_message_from_io(io_err, None);
        }
    }

    // Fallback: use first line of display to avoid long tracebacks
    let display = report.to_string();
    display
        .lines()
        .next()
        .map(str::trim)
        .unwrap_or("An error occurred")
        .to_string()
}
