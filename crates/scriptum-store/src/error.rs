//! Error types for the object store.

/// Errors that can occur when storing, versioning, or encoding objects.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Malformed handle: {0}")]
    MalformedHandle(String),

    #[error("Object name is empty after sanitization: {0:?}")]
    EmptyName(String),

    #[error("No version strategy for value type: {0}")]
    UnsupportedValueType(String),

    #[error("Version provider does not match payload: {0}")]
    ProviderMismatch(String),

    #[error("No codec entry for value type: {0}")]
    UnknownCodecEntry(String),

    #[error("Codec entry for {0} rejected the value")]
    CodecMismatch(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
