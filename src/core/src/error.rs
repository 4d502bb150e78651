use thiserror::Error;

/// ocipeek error types.
#[derive(Error, Debug)]
pub enum PeekError {
    /// The requested path was not found in any layer of the image.
    #[error("file {path} not found in any layer of {image}")]
    FileNotFound { image: String, path: String },

    /// The matched tar entry is a symlink or hardlink.
    #[error("{path} is a symlink to {target}, extract the target instead")]
    LinkTarget { path: String, target: String },

    /// The matched tar entry is a directory, device, FIFO, or other
    /// non-regular entry.
    #[error("{path} is not a regular file ({kind})")]
    NotRegularFile { path: String, kind: String },

    /// The blob server does not support HTTP range requests.
    #[error("server does not support range requests: {url}")]
    RangeUnsupported { url: String },

    /// A layer did not parse as the attempted format.
    #[error("format mismatch: {0}")]
    FormatMismatch(String),

    /// Non-success HTTP status from a registry or blob endpoint.
    #[error("{context}: unexpected status {status}")]
    HttpStatus { context: String, status: u16 },

    /// Transport-level HTTP failure.
    #[error("http transport error: {0}")]
    Transport(String),

    /// Registry protocol error (bad manifest, missing digest, ...).
    #[error("registry error: {0}")]
    Registry(String),

    /// Malformed image reference.
    #[error("invalid image reference: {0}")]
    InvalidReference(String),

    /// Serialization error (manifest, TOC, zTOC).
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Local I/O error (output file, directories).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl PeekError {
    /// Whether this error aborts the whole call instead of the current
    /// strategy. Local I/O failures and cancellation bypass the
    /// strategy fallback chain; everything else is advisory between
    /// strategies and layers.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PeekError::Io(_) | PeekError::Cancelled)
    }
}

/// Result type alias for ocipeek operations.
pub type Result<T> = std::result::Result<T, PeekError>;
