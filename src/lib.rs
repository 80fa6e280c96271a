//! Client-side orchestration for ingesting external data into a remote
//! analytical column-store cluster, via the streaming and queued paths
//! described in spec.md / SPEC_FULL.md.
//!
//! Wiring a client looks roughly like:
//!
//! ```no_run
//! use std::sync::Arc;
//! use kusto_ingest_core::{
//!     account_ranker::AccountRanker,
//!     collaborators::{AuthTokenClient, ResourceDiscoveryClient},
//!     compression::GzipCompressor,
//!     config::ClientConfig,
//!     facade::IngestFacade,
//!     queued::QueuedEngine,
//!     resource_cache::ResourceCache,
//!     retry::ExponentialBackoffRetryPolicy,
//!     streaming::StreamingEngine,
//!     transport::{HttpDmClient, HttpEngineClient, HttpResourceClient, HttpStatusClient, HttpStorageClient},
//!     uploader::Uploader,
//! };
//!
//! # async fn wire() -> kusto_ingest_core::error::Result<()> {
//! let http = reqwest::Client::new();
//! let config = ClientConfig::default();
//! let resource_client = Arc::new(HttpResourceClient::new(
//!     http.clone(),
//!     "https://cluster.example/resources",
//!     "https://cluster.example/token",
//! ));
//! let resources = Arc::new(ResourceCache::new(resource_client.clone(), resource_client, &config));
//!
//! let compressor = Arc::new(GzipCompressor);
//! let retry_policy = Arc::new(ExponentialBackoffRetryPolicy::from_config(&config));
//! let ranker = AccountRanker::new();
//! let storage = Arc::new(HttpStorageClient::new(http.clone()));
//! let uploader = Arc::new(Uploader::new(storage, compressor.clone(), retry_policy, ranker, config.clone()));
//!
//! let engine = Arc::new(HttpEngineClient::new(http.clone(), "https://cluster.example"));
//! let streaming = StreamingEngine::new(engine, compressor, config.clone());
//!
//! let dm = Arc::new(HttpDmClient::new(http.clone(), "https://dm.example"));
//! let status = Arc::new(HttpStatusClient::new(http, "https://dm.example"));
//! let queued = QueuedEngine::new(uploader.clone(), dm, status, config.clone());
//!
//! // Each facade is bound to one ingestion flavor at construction
//! // (spec.md §9); an application typically keeps both around.
//! let _streaming_facade = IngestFacade::streaming(streaming, uploader.clone(), true);
//! let _queued_facade = IngestFacade::queued(resources, queued, uploader, true, config);
//! # Ok(())
//! # }
//! ```

pub mod account_ranker;
pub mod collaborators;
pub mod compression;
pub mod config;
pub mod error;
pub mod facade;
pub mod model;
pub mod queued;
pub mod resource_cache;
pub mod retry;
pub mod status_wire;
pub mod streaming;
pub mod transport;
pub mod uploader;

pub use error::{IngestError, Result};
pub use facade::IngestFacade;
pub use model::{
    BlobSource, CompressionType, Format, IngestRequestProperties, IngestionKind, IngestionOperation,
    IngestionSource, IngestionSources, Status, StatusResponse,
};
