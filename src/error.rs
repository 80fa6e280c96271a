//! Error taxonomy shared by every component.
//!
//! Every public failure carries `is_permanent()` so a caller-side retry
//! policy can differentiate without string-matching messages, per the
//! configuration/validation/transport/upload split documented in spec.md §7.

use std::fmt;

/// Top-level error type returned by all public operations.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    // --- Configuration (permanent) ---
    #[error("configuration unavailable: {0}")]
    ConfigurationUnavailable(String),

    #[error("no writable containers advertised by the resource cache")]
    NoContainers,

    #[error("no ingestion queues advertised by the resource cache")]
    NoQueues,

    #[error("no status table advertised by the resource cache")]
    NoStatusTable,

    // --- Validation (permanent) ---
    #[error("source is empty: {source_id}")]
    SourceEmpty { source_id: String },

    #[error("source is not readable: {source_id}: {message}")]
    SourceNotReadable { source_id: String, message: String },

    #[error("source {source_id} exceeds the configured size limit ({size} > {limit} bytes)")]
    SourceSizeLimitExceeded {
        source_id: String,
        size: u64,
        limit: u64,
    },

    #[error("sources do not share a single format: {0:?}")]
    FormatMismatch(Vec<String>),

    #[error("duplicate blob URL(s) after staging: {0:?}")]
    DuplicateBlob(Vec<DuplicateBlobEntry>),

    #[error("batch of {count} sources exceeds the limit of {limit}")]
    MultiIngestExceededLimit { count: usize, limit: usize },

    #[error("unsupported source kind: {0}")]
    UnsupportedSourceKind(String),

    #[error("{0}")]
    InvalidProperties(String),

    // --- Transport ---
    /// spec.md §4.6 classifies a streaming 404 as permanent ("no retry"),
    /// while spec.md §4.7 classifies a queued-path 404 as transient (the DM
    /// URL may just be misconfigured) — `permanent` carries that per-caller
    /// distinction instead of hardcoding one classification for both paths.
    #[error("endpoint not found (404): {endpoint}")]
    EndpointNotFound { endpoint: String, permanent: bool },

    #[error("transient service error: {code:?} {message}")]
    ServiceError {
        message: String,
        code: Option<String>,
        error_type: Option<String>,
        failure_code: Option<String>,
    },

    #[error("permanent request error: {code:?} {message}")]
    RequestError {
        message: String,
        code: Option<String>,
        error_type: Option<String>,
        failure_code: Option<String>,
    },

    #[error("request body of {actual} bytes exceeds the streaming limit of {limit} bytes")]
    RequestTooLarge { actual: u64, limit: u64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out waiting for completion: {0}")]
    OperationTimeout(String),

    // --- Upload ---
    #[error("upload failed ({kind:?}): {message}")]
    UploadFailed {
        kind: UploadFailureKind,
        message: String,
        #[source]
        cause: Option<Box<IngestError>>,
    },

    // --- Glue ---
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFailureKind {
    Permanent,
    Transient,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateBlobEntry {
    pub source_id: String,
    pub blob_url: String,
}

impl fmt::Display for DuplicateBlobEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.source_id, self.blob_url)
    }
}

impl IngestError {
    /// Whether a caller-side retry policy should ever retry this failure.
    pub fn is_permanent(&self) -> bool {
        match self {
            IngestError::ConfigurationUnavailable(_)
            | IngestError::NoContainers
            | IngestError::NoQueues
            | IngestError::NoStatusTable
            | IngestError::SourceEmpty { .. }
            | IngestError::SourceNotReadable { .. }
            | IngestError::SourceSizeLimitExceeded { .. }
            | IngestError::FormatMismatch(_)
            | IngestError::DuplicateBlob(_)
            | IngestError::MultiIngestExceededLimit { .. }
            | IngestError::UnsupportedSourceKind(_)
            | IngestError::InvalidProperties(_)
            | IngestError::RequestError { .. }
            | IngestError::RequestTooLarge { .. } => true,

            IngestError::ServiceError { .. }
            | IngestError::Cancelled
            | IngestError::OperationTimeout(_)
            | IngestError::Transport(_)
            | IngestError::Serialization(_)
            | IngestError::Io(_) => false,

            IngestError::EndpointNotFound { permanent, .. } => *permanent,

            IngestError::UploadFailed { kind, .. } => matches!(kind, UploadFailureKind::Permanent),
        }
    }

    pub fn upload_failed(kind: UploadFailureKind, message: impl Into<String>) -> Self {
        IngestError::UploadFailed {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn upload_failed_with_cause(
        kind: UploadFailureKind,
        message: impl Into<String>,
        cause: IngestError,
    ) -> Self {
        IngestError::UploadFailed {
            kind,
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;

/// Strip a query string (SAS token) from a URL for safe inclusion in log
/// and error messages, or for query-stripped identity comparisons.
///
/// Grounded on `ResourceUri`'s `service_uri`/`object_name` split in
/// `examples/other_examples/.../resource_manager.rs`: we only ever need the
/// scheme+host+path, never the query, once a blob has been staged.
pub fn strip_query(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.into()
        }
        Err(_) => url.split('?').next().unwrap_or(url).to_string(),
    }
}
