//! Default reqwest-backed adapters for the traits in `collaborators.rs`.
//!
//! These are the "external collaborator" implementations spec.md §1 treats
//! as out of core scope; they exist so the crate is directly usable, but
//! any consumer may substitute their own (e.g. a `StorageClient` backed by
//! `azure_storage_blobs`, as `examples/other_examples`'s Kusto client uses).
//! Grounded on the teacher's use of a single shared `reqwest::Client` built
//! once in `collector.rs::initialize_channels` and cloned per worker.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::collaborators::{
    AuthTokenClient, DmClient, DmResponse, EngineClient, EngineResponse, ResourceDiscoveryClient,
    StatusClient, StorageClient, UploadOutcome,
};
use crate::error::{IngestError, Result};
use crate::model::{BlobDescriptor, ContainerInfo, ContainerKind, IngestJob, IngestRequestProperties, QueueInfo, ResourceSnapshot, StatusResponse, TableInfo};

/// Raw shape of spec.md §6's resource-discovery response.
#[derive(Debug, serde::Deserialize)]
struct RawResourceResponse {
    #[serde(rename = "containerSettings")]
    container_settings: RawContainerSettings,
    #[serde(rename = "queueSettings")]
    queue_settings: RawQueueSettings,
    #[serde(rename = "statusTable")]
    status_table: RawUrlEntry,
    #[serde(rename = "ingestionSettings")]
    ingestion_settings: RawIngestionSettings,
}

#[derive(Debug, serde::Deserialize)]
struct RawContainerSettings {
    containers: Vec<RawUrlEntry>,
    #[serde(rename = "lakeFolders", default)]
    lake_folders: Vec<RawUrlEntry>,
    #[serde(rename = "preferredUploadMethod", default)]
    preferred_upload_method: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct RawQueueSettings {
    queues: Vec<RawUrlEntry>,
}

#[derive(Debug, serde::Deserialize)]
struct RawIngestionSettings {
    #[serde(rename = "maxBlobsPerBatch", default)]
    max_blobs_per_batch: Option<usize>,
}

#[derive(Debug, serde::Deserialize)]
struct RawUrlEntry {
    url: String,
}

fn split_sas(url: &str) -> (String, Option<String>) {
    match url::Url::parse(url) {
        Ok(parsed) => {
            let sas = parsed.query().map(|q| q.to_string());
            let mut stripped = parsed;
            stripped.set_query(None);
            (stripped.into(), sas)
        }
        Err(_) => (url.to_string(), None),
    }
}

fn account_name_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.split('.').next().unwrap_or(h).to_string()))
        .unwrap_or_else(|| url.to_string())
}

impl From<RawUrlEntry> for ContainerInfo {
    fn from(entry: RawUrlEntry) -> Self {
        let (url, sas_token) = split_sas(&entry.url);
        let account_name = account_name_of(&url);
        ContainerInfo {
            url,
            sas_token,
            kind: ContainerKind::Storage,
            account_name,
        }
    }
}

/// A plain HTTP(S) resource-discovery and auth-token client, hitting the
/// "Resource discovery endpoint" described in spec.md §6.
pub struct HttpResourceClient {
    http: reqwest::Client,
    discovery_url: String,
    token_url: String,
}

impl HttpResourceClient {
    pub fn new(http: reqwest::Client, discovery_url: impl Into<String>, token_url: impl Into<String>) -> Self {
        HttpResourceClient {
            http,
            discovery_url: discovery_url.into(),
            token_url: token_url.into(),
        }
    }
}

#[async_trait]
impl ResourceDiscoveryClient for HttpResourceClient {
    async fn fetch_resources(&self) -> Result<ResourceSnapshot> {
        let response = self
            .http
            .get(&self.discovery_url)
            .send()
            .await
            .map_err(|e| IngestError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(IngestError::ConfigurationUnavailable(format!(
                "resource discovery returned {}",
                response.status()
            )));
        }

        let raw: RawResourceResponse = response
            .json()
            .await
            .map_err(|e| IngestError::Transport(e.to_string()))?;

        let containers = raw
            .container_settings
            .containers
            .into_iter()
            .map(ContainerInfo::from)
            .collect();
        let lake_folders = raw
            .container_settings
            .lake_folders
            .into_iter()
            .map(|entry| {
                let mut info = ContainerInfo::from(entry);
                info.kind = ContainerKind::Lake;
                info
            })
            .collect();
        let queues = raw
            .queue_settings
            .queues
            .into_iter()
            .map(|entry| {
                let (url, sas_token) = split_sas(&entry.url);
                let account_name = account_name_of(&url);
                QueueInfo { url, sas_token, account_name }
            })
            .collect();
        let (status_url, status_sas) = split_sas(&raw.status_table.url);

        Ok(ResourceSnapshot {
            containers,
            lake_folders,
            queues,
            status_table: TableInfo { url: status_url, sas_token: status_sas },
            preferred_upload_method: raw
                .container_settings
                .preferred_upload_method
                .as_deref()
                .map(|m| match m {
                    "lake" => ContainerKind::Lake,
                    _ => ContainerKind::Storage,
                }),
            max_blobs_per_batch: raw.ingestion_settings.max_blobs_per_batch,
        })
    }
}

#[async_trait]
impl AuthTokenClient for HttpResourceClient {
    async fn fetch_auth_token(&self) -> Result<String> {
        #[derive(serde::Deserialize)]
        struct TokenResponse {
            token: String,
        }

        let response = self
            .http
            .get(&self.token_url)
            .send()
            .await
            .map_err(|e| IngestError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(IngestError::ConfigurationUnavailable(format!(
                "auth token endpoint returned {}",
                response.status()
            )));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| IngestError::Transport(e.to_string()))?;
        Ok(parsed.token)
    }
}

/// Single-PUT storage adapter. Block-size/concurrency/max-single-size are
/// accepted for interface parity with spec.md §6 but a simple adapter
/// issues one request; a richer, chunked implementation is the kind of
/// thing a consumer swaps in (see module docs).
pub struct HttpStorageClient {
    http: reqwest::Client,
}

impl HttpStorageClient {
    pub fn new(http: reqwest::Client) -> Self {
        HttpStorageClient { http }
    }
}

#[async_trait]
impl StorageClient for HttpStorageClient {
    async fn upload(
        &self,
        url: &str,
        sas_token: Option<&str>,
        body: Bytes,
        _block_size: u64,
        _max_concurrency: usize,
        _max_single_upload_size: u64,
        timeout: Duration,
    ) -> Result<UploadOutcome> {
        let full_url = match sas_token {
            Some(sas) if !sas.is_empty() => format!("{url}?{sas}"),
            _ => url.to_string(),
        };

        let response = self
            .http
            .put(&full_url)
            .timeout(timeout)
            .header("x-ms-blob-type", "BlockBlob")
            .body(body)
            .send()
            .await
            .map_err(|e| IngestError::Transport(e.to_string()))?;

        let status_code = response.status().as_u16();
        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        Ok(UploadOutcome { status_code, etag })
    }
}

pub struct HttpEngineClient {
    http: reqwest::Client,
    engine_url: String,
}

impl HttpEngineClient {
    pub fn new(http: reqwest::Client, engine_url: impl Into<String>) -> Self {
        HttpEngineClient { http, engine_url: engine_url.into() }
    }
}

#[async_trait]
impl EngineClient for HttpEngineClient {
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
    ) -> Result<EngineResponse> {
        let mut url = format!(
            "{}/v1/rest/ingest/{}/{}?streamFormat={}",
            self.engine_url, database, table, stream_format
        );
        if let Some(mapping) = mapping_name {
            url.push_str(&format!("&mappingName={mapping}"));
        }

        let mut request = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header(reqwest::header::ACCEPT_ENCODING, "gzip");
        if let Some(encoding) = content_encoding {
            request = request.header(reqwest::header::CONTENT_ENCODING, encoding);
        }
        if let Some(kind) = source_kind {
            request = request.header("x-ms-source-kind", kind);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| IngestError::Transport(e.to_string()))?;
        let status_code = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| IngestError::Transport(e.to_string()))?;
        Ok(EngineResponse { status_code, body })
    }
}

pub struct HttpDmClient {
    http: reqwest::Client,
    dm_url: String,
}

impl HttpDmClient {
    pub fn new(http: reqwest::Client, dm_url: impl Into<String>) -> Self {
        HttpDmClient { http, dm_url: dm_url.into() }
    }
}

#[async_trait]
impl DmClient for HttpDmClient {
    async fn post_queued_ingest(
        &self,
        database: &str,
        table: &str,
        timestamp: chrono::DateTime<chrono::Utc>,
        blobs: &[BlobDescriptor],
        properties: &IngestRequestProperties,
    ) -> Result<DmResponse> {
        let job = IngestJob {
            timestamp,
            database: database.to_string(),
            table: table.to_string(),
            blobs: blobs.to_vec(),
            properties: properties.clone(),
        };

        let url = format!("{}/v1/rest/queuedIngest", self.dm_url);
        let response = self
            .http
            .post(&url)
            .json(&job)
            .send()
            .await
            .map_err(|e| IngestError::Transport(e.to_string()))?;
        let status_code = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| IngestError::Transport(e.to_string()))?;
        Ok(DmResponse { status_code, body })
    }
}

pub struct HttpStatusClient {
    http: reqwest::Client,
    dm_url: String,
}

impl HttpStatusClient {
    pub fn new(http: reqwest::Client, dm_url: impl Into<String>) -> Self {
        HttpStatusClient { http, dm_url: dm_url.into() }
    }
}

#[async_trait]
impl StatusClient for HttpStatusClient {
    async fn get_ingest_status(
        &self,
        database: &str,
        table: &str,
        operation_id: &str,
        details: bool,
    ) -> Result<StatusResponse> {
        let url = format!(
            "{}/v1/rest/ingestStatus/{}/{}/{}?details={}",
            self.dm_url, database, table, operation_id, details
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| IngestError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(IngestError::ServiceError {
                message: format!("status lookup returned {}", response.status()),
                code: None,
                error_type: None,
                failure_code: None,
            });
        }

        crate::status_wire::parse_status_response(
            response.bytes().await.map_err(|e| IngestError::Transport(e.to_string()))?.as_ref(),
            details,
        )
    }
}
