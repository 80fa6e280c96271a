//! Wire and domain types shared across components (spec.md §3).

use std::collections::HashMap;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use uuid::Uuid;

/// Source format enumeration. Deliberately flat (not every format needs
/// special-cased behavior) rather than a family of marker types, mirroring
/// how the teacher keeps `ContentTypesSubConfig` a flat struct of options.
/// spec.md §3: "format (mandatory; defaulted to csv or taken from the
/// source)".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Csv,
    Tsv,
    Json,
    Multijson,
    Avro,
    Apacheavro,
    Parquet,
    Orc,
    Psv,
    Txt,
    W3clogfile,
}

impl Format {
    /// `true` for formats whose bytes are already binary/compressed, so
    /// client-side gzip would be wasted or harmful.
    pub fn is_precompressed_binary(self) -> bool {
        matches!(self, Format::Avro | Format::Apacheavro | Format::Parquet | Format::Orc)
    }

    pub fn as_stream_format(self) -> &'static str {
        match self {
            Format::Csv => "csv",
            Format::Tsv => "tsv",
            Format::Json => "json",
            Format::Multijson => "multijson",
            Format::Avro => "avro",
            Format::Apacheavro => "apacheavro",
            Format::Parquet => "parquet",
            Format::Orc => "orc",
            Format::Psv => "psv",
            Format::Txt => "txt",
            Format::W3clogfile => "w3clogfile",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    None,
    Gzip,
    Zip,
}

impl CompressionType {
    pub fn suffix(self) -> Option<&'static str> {
        match self {
            CompressionType::None => None,
            CompressionType::Gzip => Some("gz"),
            CompressionType::Zip => Some("zip"),
        }
    }
}

/// A `Send`-able boxed async byte stream, used for both file- and in-memory
/// stream-backed local sources.
pub type BoxedAsyncRead = Pin<Box<dyn AsyncRead + Send + Sync>>;

/// Tagged variant of everything `IngestFacade::ingest` can accept
/// (spec.md §3 `IngestionSource`).
pub enum IngestionSource {
    File {
        path: std::path::PathBuf,
        format: Format,
        compression_type: CompressionType,
        source_id: String,
    },
    Stream {
        reader: BoxedAsyncRead,
        name: String,
        format: Format,
        compression_type: CompressionType,
        source_id: String,
        /// Size hint, when known up front (streams rarely know their own
        /// length; `None` disables the pre-upload size-limit check for
        /// this source unless `ignore_size_limit` is also set).
        size_hint: Option<u64>,
    },
    Blob {
        blob_url: String,
        format: Format,
        compression_type: CompressionType,
        source_id: String,
        exact_size: Option<u64>,
    },
}

impl IngestionSource {
    pub fn source_id(&self) -> &str {
        match self {
            IngestionSource::File { source_id, .. } => source_id,
            IngestionSource::Stream { source_id, .. } => source_id,
            IngestionSource::Blob { source_id, .. } => source_id,
        }
    }

    pub fn format(&self) -> Format {
        match self {
            IngestionSource::File { format, .. } => *format,
            IngestionSource::Stream { format, .. } => *format,
            IngestionSource::Blob { format, .. } => *format,
        }
    }

    pub fn compression_type(&self) -> CompressionType {
        match self {
            IngestionSource::File { compression_type, .. } => *compression_type,
            IngestionSource::Stream { compression_type, .. } => *compression_type,
            IngestionSource::Blob { compression_type, .. } => *compression_type,
        }
    }

    pub fn is_blob(&self) -> bool {
        matches!(self, IngestionSource::Blob { .. })
    }

    /// `LocalSource.shouldCompress()` from spec.md §3: true iff uncompressed
    /// and the format is textually compressible.
    pub fn should_compress(&self) -> bool {
        if self.is_blob() {
            return false;
        }
        self.compression_type() == CompressionType::None && !self.format().is_precompressed_binary()
    }
}

/// spec.md §2's `ingest(database, table, source[, props])` /
/// `ingest(database, table, sources[], props)` overload pair, collapsed into
/// one Rust parameter type so `IngestFacade::ingest` can expose a single
/// entry point rather than one method per arity.
pub enum IngestionSources {
    Single(IngestionSource),
    Many(Vec<IngestionSource>),
}

impl From<IngestionSource> for IngestionSources {
    fn from(source: IngestionSource) -> Self {
        IngestionSources::Single(source)
    }
}

impl From<Vec<IngestionSource>> for IngestionSources {
    fn from(sources: Vec<IngestionSource>) -> Self {
        IngestionSources::Many(sources)
    }
}

/// A local (non-blob) source, used internally once `Blob` variants have
/// been partitioned out in `QueuedEngine` (spec.md §4.7 "Staging").
pub enum LocalSource {
    File {
        path: std::path::PathBuf,
        format: Format,
        compression_type: CompressionType,
        source_id: String,
    },
    Stream {
        reader: BoxedAsyncRead,
        name: String,
        format: Format,
        compression_type: CompressionType,
        source_id: String,
        size_hint: Option<u64>,
    },
}

impl LocalSource {
    pub fn source_id(&self) -> &str {
        match self {
            LocalSource::File { source_id, .. } => source_id,
            LocalSource::Stream { source_id, .. } => source_id,
        }
    }

    pub fn format(&self) -> Format {
        match self {
            LocalSource::File { format, .. } => *format,
            LocalSource::Stream { format, .. } => *format,
        }
    }

    pub fn compression_type(&self) -> CompressionType {
        match self {
            LocalSource::File { compression_type, .. } => *compression_type,
            LocalSource::Stream { compression_type, .. } => *compression_type,
        }
    }

    pub fn should_compress(&self) -> bool {
        self.compression_type() == CompressionType::None && !self.format().is_precompressed_binary()
    }

    /// Estimated length used by `Uploader`'s pre-stage size check
    /// (spec.md §4.5 "Validation"): the file's on-disk size for `File`
    /// sources, or the caller-supplied `size_hint` for `Stream` sources
    /// (streams otherwise have no length until fully read).
    pub async fn estimated_size(&self) -> std::io::Result<Option<u64>> {
        match self {
            LocalSource::File { path, .. } => Ok(Some(tokio::fs::metadata(path).await?.len())),
            LocalSource::Stream { size_hint, .. } => Ok(*size_hint),
        }
    }

    pub fn base_name(&self) -> String {
        match self {
            LocalSource::File { path, .. } => path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("source")
                .to_string(),
            LocalSource::Stream { name, .. } => {
                std::path::Path::new(name)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or(name.as_str())
                    .to_string()
            }
        }
    }
}

impl TryFrom<IngestionSource> for LocalSource {
    type Error = IngestionSource;

    fn try_from(value: IngestionSource) -> Result<Self, Self::Error> {
        match value {
            IngestionSource::File { path, format, compression_type, source_id } => {
                Ok(LocalSource::File { path, format, compression_type, source_id })
            }
            IngestionSource::Stream { reader, name, format, compression_type, source_id, size_hint } => {
                Ok(LocalSource::Stream { reader, name, format, compression_type, source_id, size_hint })
            }
            blob @ IngestionSource::Blob { .. } => Err(blob),
        }
    }
}

/// spec.md §3 `IngestRequestProperties`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestRequestProperties {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub enable_tracking: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingestion_mapping_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingestion_mapping: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ingest_if_not_exists: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_batching: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_after_download: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_size_limit: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_first_record: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_last_record_if_invalid: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extend_schema: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recreate_schema: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_policy: Option<String>,
    pub format: Format,
}

impl IngestRequestProperties {
    pub fn ignore_size_limit(&self) -> bool {
        self.ignore_size_limit.unwrap_or(false)
    }

    /// Mutually-exclusive mapping fields must not both be set
    /// (spec.md §3: "mutually exclusive").
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.ingestion_mapping_reference.is_some() && self.ingestion_mapping.is_some() {
            return Err(crate::error::IngestError::InvalidProperties(
                "ingestionMappingReference and ingestionMapping are mutually exclusive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionKind {
    Streaming,
    Queued,
}

/// spec.md §3 `IngestionOperation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionOperation {
    pub operation_id: String,
    pub database: String,
    pub table: String,
    pub kind: IngestionKind,
}

impl IngestionOperation {
    pub fn new_streaming(database: impl Into<String>, table: impl Into<String>) -> Self {
        IngestionOperation {
            operation_id: Uuid::new_v4().to_string(),
            database: database.into(),
            table: table.into(),
            kind: IngestionKind::Streaming,
        }
    }

    pub fn new_queued(
        operation_id: impl Into<String>,
        database: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        IngestionOperation {
            operation_id: operation_id.into(),
            database: database.into(),
            table: table.into(),
            kind: IngestionKind::Queued,
        }
    }
}

/// spec.md §3 `BlobDescriptor` — sent to the DM endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobDescriptor {
    #[serde(rename = "blobPath")]
    pub blob_path: String,
    #[serde(rename = "sourceId")]
    pub source_id: String,
    #[serde(rename = "rawSize", skip_serializing_if = "Option::is_none")]
    pub raw_size: Option<u64>,
}

/// spec.md §3 `IngestJob` — the queued-ingest job descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestJob {
    pub timestamp: DateTime<Utc>,
    pub database: String,
    pub table: String,
    pub blobs: Vec<BlobDescriptor>,
    pub properties: IngestRequestProperties,
}

/// A successfully-staged blob, carrying any access credential in its URL
/// (spec.md §4.5: "blob handle with attached access credentials").
#[derive(Debug, Clone)]
pub struct BlobSource {
    pub blob_url: String,
    pub format: Format,
    pub compression_type: CompressionType,
    pub source_id: String,
    pub exact_size: Option<u64>,
}

impl BlobSource {
    pub fn into_ingestion_source(self) -> IngestionSource {
        IngestionSource::Blob {
            blob_url: self.blob_url,
            format: self.format,
            compression_type: self.compression_type,
            source_id: self.source_id,
            exact_size: self.exact_size,
        }
    }
}

/// Outcome of one `Uploader::upload_many` item (spec.md §4.5).
pub enum UploadResult {
    Success(BlobSource),
    Failure {
        source_id: String,
        error: crate::error::IngestError,
    },
}

/// spec.md §3 `ContainerInfo`.
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub url: String,
    pub sas_token: Option<String>,
    pub kind: ContainerKind,
    pub account_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    Storage,
    Lake,
}

#[derive(Debug, Clone)]
pub struct QueueInfo {
    pub url: String,
    pub sas_token: Option<String>,
    pub account_name: String,
}

#[derive(Debug, Clone)]
pub struct TableInfo {
    pub url: String,
    pub sas_token: Option<String>,
}

/// spec.md §4.1 `Snapshot`.
#[derive(Debug, Clone)]
pub struct ResourceSnapshot {
    pub containers: Vec<ContainerInfo>,
    pub lake_folders: Vec<ContainerInfo>,
    pub queues: Vec<QueueInfo>,
    pub status_table: TableInfo,
    pub preferred_upload_method: Option<ContainerKind>,
    pub max_blobs_per_batch: Option<usize>,
}

/// spec.md §4.7 aggregate status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    pub succeeded: usize,
    pub failed: usize,
    pub in_progress: usize,
    pub canceled: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobIngestionStatus {
    Queued,
    InProgress,
    Succeeded,
    Failed,
    PartiallySucceeded,
    SkippedDueToDedup,
}

impl BlobIngestionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BlobIngestionStatus::Succeeded
                | BlobIngestionStatus::Failed
                | BlobIngestionStatus::PartiallySucceeded
                | BlobIngestionStatus::SkippedDueToDedup
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStatus {
    Transient,
    Permanent,
    Exhausted,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct BlobStatus {
    pub source_id: String,
    pub status: BlobIngestionStatus,
    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub error_code: Option<String>,
    pub failure_status: Option<FailureStatus>,
    pub details: Option<String>,
}

/// spec.md §4.7 `getOperationDetails` result.
///
/// `aggregate` is populated when the status table returned the
/// `details=false` shape (spec.md §6): `blobs` is then empty, not because
/// there's no work outstanding, but because that shape never carries
/// per-blob detail.
#[derive(Debug, Clone, Default)]
pub struct StatusResponse {
    pub blobs: Vec<BlobStatus>,
    pub aggregate: Option<Status>,
}

impl StatusResponse {
    pub fn is_complete(&self, aggregate: &Status) -> bool {
        if self.blobs.is_empty() {
            return aggregate.in_progress == 0;
        }
        aggregate.in_progress == 0 || self.blobs.iter().all(|b| b.status.is_terminal())
    }

    pub fn to_status(&self) -> Status {
        if let Some(aggregate) = &self.aggregate {
            return aggregate.clone();
        }
        let mut status = Status::default();
        for blob in &self.blobs {
            match blob.status {
                BlobIngestionStatus::Succeeded
                | BlobIngestionStatus::PartiallySucceeded
                | BlobIngestionStatus::SkippedDueToDedup => status.succeeded += 1,
                BlobIngestionStatus::Failed => status.failed += 1,
                BlobIngestionStatus::InProgress | BlobIngestionStatus::Queued => {
                    status.in_progress += 1
                }
            }
        }
        status
    }
}

/// Server error envelope shape (spec.md §4.6 "Response handling").
#[derive(Debug, Clone, Deserialize)]
pub struct ServerErrorEnvelope {
    pub error: ServerErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerErrorBody {
    pub code: Option<String>,
    pub message: Option<String>,
    #[serde(rename = "@type")]
    pub at_type: Option<String>,
    #[serde(rename = "@message")]
    pub at_message: Option<String>,
    #[serde(rename = "@failureCode")]
    pub at_failure_code: Option<String>,
    #[serde(rename = "@permanent")]
    pub at_permanent: Option<bool>,
}

pub type ArbitraryJson = HashMap<String, serde_json::Value>;
