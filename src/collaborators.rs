//! Narrow trait boundaries for everything spec.md §1 calls "external
//! collaborators": HTTP transport, auth/token acquisition, the storage SDK.
//!
//! Grounded on `examples/other_examples/.../blob_storage.rs`'s
//! `#[async_trait] trait BlobStorage` shape (one trait per concern, errors
//! folded into the crate's own taxonomy) and on the teacher's `Interface`
//! trait in `interfaces/file_interface.rs` (one async method, `Send`-able
//! trait objects). Each trait has one reqwest-backed default adapter in
//! `transport.rs`; consumers may swap in their own (e.g. one backed by
//! `azure_storage_blobs`, as `examples/other_examples`'s Kusto client does).

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::model::{BlobDescriptor, IngestRequestProperties, ResourceSnapshot, StatusResponse};

/// Fetches the server-advertised resource list (spec.md §6 "Resource
/// discovery endpoint"). Consumed by `ResourceCache`.
#[async_trait]
pub trait ResourceDiscoveryClient: Send + Sync {
    async fn fetch_resources(&self) -> Result<ResourceSnapshot>;
}

/// Fetches the per-tenant ingestion authorization token. Kept separate from
/// `ResourceDiscoveryClient` because spec.md §4.1 refreshes it on its own
/// timer, independent of the resource list.
#[async_trait]
pub trait AuthTokenClient: Send + Sync {
    async fn fetch_auth_token(&self) -> Result<String>;
}

/// One outcome of a single storage PUT (spec.md §6 "Storage / lake upload").
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub status_code: u16,
    pub etag: Option<String>,
}

/// The narrow interface the core uses to stage bytes into cloud storage
/// (spec.md §1: "cloud-storage SDK calls ... are consumed through a narrow
/// interface"). A container/lake-folder URL, optional SAS, and the byte
/// stream go in; one HTTP response summary comes out. Chunking, block
/// lists, and parallel-part upload are an implementation's business, not
/// this trait's.
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn upload(
        &self,
        url: &str,
        sas_token: Option<&str>,
        body: Bytes,
        block_size: u64,
        max_concurrency: usize,
        max_single_upload_size: u64,
        timeout: std::time::Duration,
    ) -> Result<UploadOutcome>;
}

/// spec.md §6 "Engine streaming endpoint".
#[derive(Debug, Clone)]
pub struct EngineResponse {
    pub status_code: u16,
    pub body: Bytes,
}

#[async_trait]
pub trait EngineClient: Send + Sync {
    async fn post_streaming(
        &self,
        database: &str,
        table: &str,
        stream_format: &str,
        mapping_name: Option<&str>,
        content_type: &str,
        content_encoding: Option<&str>,
        source_kind: Option<&str>,
        body: Bytes,
    ) -> Result<EngineResponse>;
}

/// spec.md §6 "DM queued endpoint".
#[derive(Debug, Clone)]
pub struct DmResponse {
    pub status_code: u16,
    pub body: Bytes,
}

#[async_trait]
pub trait DmClient: Send + Sync {
    async fn post_queued_ingest(
        &self,
        database: &str,
        table: &str,
        timestamp: chrono::DateTime<chrono::Utc>,
        blobs: &[BlobDescriptor],
        properties: &IngestRequestProperties,
    ) -> Result<DmResponse>;
}

/// spec.md §6 "Status table endpoint".
#[async_trait]
pub trait StatusClient: Send + Sync {
    async fn get_ingest_status(
        &self,
        database: &str,
        table: &str,
        operation_id: &str,
        details: bool,
    ) -> Result<StatusResponse>;
}
