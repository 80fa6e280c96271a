//! C8 IngestFacade (spec.md §4.8 "Facade").
//!
//! spec.md §2/§9: "the streaming vs queued flavor is a runtime choice;
//! model as two concrete engines implementing a common `Engine` capability
//! `{ingest, summary, details}` and a facade that selects one at
//! construction." `IngestFacade::streaming`/`IngestFacade::queued` pick the
//! flavor once; from then on the facade exposes a single overloaded
//! `ingest(database, table, source|sources[], props?)` entry point
//! (spec.md §2's `C8` row) rather than one method per engine. `owns_uploader`
//! mirrors spec.md's "ownsUploader" flag: when the facade constructed its
//! own `Uploader` (the common case), dropping the facade is enough to
//! release it; when a caller supplied a shared `Uploader` instance, the
//! facade must not assume exclusive ownership of its lifecycle (e.g. must
//! not be the one deciding to shut down any background refresh tasks it was
//! handed alongside it).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::error::{IngestError, Result};
use crate::model::{
    ContainerInfo, ContainerKind, IngestRequestProperties, IngestionOperation, IngestionSources, Status,
    StatusResponse,
};
use crate::queued::QueuedEngine;
use crate::resource_cache::{effective_upload_method, ResourceCache};
use crate::streaming::StreamingEngine;
use crate::uploader::Uploader;

/// spec.md §9's "common `Engine` capability" both concrete ingestion paths
/// implement, letting `IngestFacade` hold one trait object chosen at
/// construction instead of branching on `IngestionKind` per call.
#[async_trait]
trait Engine: Send + Sync {
    async fn ingest(
        &self,
        database: &str,
        table: &str,
        sources: IngestionSources,
        properties: &IngestRequestProperties,
        cancel: Option<&CancellationToken>,
    ) -> Result<IngestionOperation>;

    async fn summary(&self, operation: &IngestionOperation) -> Result<Status>;

    async fn details(&self, operation: &IngestionOperation) -> Result<StatusResponse>;

    async fn poll_until_completion(
        &self,
        operation: &IngestionOperation,
        poll_interval: Option<Duration>,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> Result<StatusResponse>;
}

/// spec.md §4.8 "Streaming facade: one source per call, uses
/// StreamingEngine" — a `Many` batch is rejected rather than silently
/// ingesting only the first source.
struct StreamingAdapter {
    engine: StreamingEngine,
}

#[async_trait]
impl Engine for StreamingAdapter {
    async fn ingest(
        &self,
        database: &str,
        table: &str,
        sources: IngestionSources,
        properties: &IngestRequestProperties,
        cancel: Option<&CancellationToken>,
    ) -> Result<IngestionOperation> {
        match sources {
            IngestionSources::Single(source) => self.engine.ingest(database, table, source, properties, cancel).await,
            IngestionSources::Many(_) => {
                Err(IngestError::InvalidProperties("streaming ingest accepts a single source, not a batch".into()))
            }
        }
    }

    async fn summary(&self, _operation: &IngestionOperation) -> Result<Status> {
        self.engine.get_operation_summary().await
    }

    async fn details(&self, _operation: &IngestionOperation) -> Result<StatusResponse> {
        self.engine.get_operation_details().await
    }

    async fn poll_until_completion(
        &self,
        _operation: &IngestionOperation,
        _poll_interval: Option<Duration>,
        _timeout: Option<Duration>,
        _cancel: Option<&CancellationToken>,
    ) -> Result<StatusResponse> {
        // spec.md §4.6: streaming has no asynchronous status to poll, so
        // "completion" is immediate and always empty.
        self.engine.get_operation_details().await
    }
}

/// spec.md §4.8 "Queued facade: `ingest(src)` wraps `[src]` and calls
/// multi-ingest; `ingest(srcs[])` goes straight to QueuedEngine."
struct QueuedAdapter {
    engine: QueuedEngine,
    resources: Arc<ResourceCache>,
    config: ClientConfig,
}

impl QueuedAdapter {
    fn containers_for(
        &self,
        snapshot: &crate::model::ResourceSnapshot,
        method: Option<ContainerKind>,
    ) -> Result<Vec<ContainerInfo>> {
        match method {
            Some(ContainerKind::Storage) => Ok(snapshot.containers.clone()),
            Some(ContainerKind::Lake) => Ok(snapshot.lake_folders.clone()),
            None => Err(IngestError::NoContainers),
        }
    }
}

#[async_trait]
impl Engine for QueuedAdapter {
    async fn ingest(
        &self,
        database: &str,
        table: &str,
        sources: IngestionSources,
        properties: &IngestRequestProperties,
        cancel: Option<&CancellationToken>,
    ) -> Result<IngestionOperation> {
        let sources = match sources {
            IngestionSources::Single(source) => vec![source],
            IngestionSources::Many(sources) => sources,
        };
        let snapshot = self.resources.get_resources().await?;
        let method = effective_upload_method(&snapshot, None);
        let containers = self.containers_for(&snapshot, method)?;
        let max_batch = snapshot.max_blobs_per_batch.unwrap_or(self.config.max_blobs_per_batch_fallback);
        self.engine.ingest(database, table, sources, properties, &containers, max_batch, cancel).await
    }

    async fn summary(&self, operation: &IngestionOperation) -> Result<Status> {
        self.engine.get_operation_summary(operation).await
    }

    async fn details(&self, operation: &IngestionOperation) -> Result<StatusResponse> {
        self.engine.get_operation_details(operation).await
    }

    async fn poll_until_completion(
        &self,
        operation: &IngestionOperation,
        poll_interval: Option<Duration>,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> Result<StatusResponse> {
        self.engine.poll_until_completion(operation, poll_interval, timeout, cancel).await
    }
}

pub struct IngestFacade {
    engine: Box<dyn Engine>,
    uploader: Arc<Uploader>,
    owns_uploader: bool,
}

impl IngestFacade {
    /// Binds this facade to the streaming path for its whole lifetime
    /// (spec.md §9: "a facade that selects one at construction").
    pub fn streaming(streaming: StreamingEngine, uploader: Arc<Uploader>, owns_uploader: bool) -> Self {
        IngestFacade { engine: Box::new(StreamingAdapter { engine: streaming }), uploader, owns_uploader }
    }

    /// Binds this facade to the queued path for its whole lifetime.
    pub fn queued(
        resources: Arc<ResourceCache>,
        queued: QueuedEngine,
        uploader: Arc<Uploader>,
        owns_uploader: bool,
        config: ClientConfig,
    ) -> Self {
        IngestFacade {
            engine: Box::new(QueuedAdapter { engine: queued, resources, config }),
            uploader,
            owns_uploader,
        }
    }

    pub fn owns_uploader(&self) -> bool {
        self.owns_uploader
    }

    /// spec.md §2's single entry point: `ingest(database, table, source[,
    /// props])` and `ingest(database, table, sources[], props)` collapsed
    /// into one method accepting anything `Into<IngestionSources>` —
    /// a bare `IngestionSource` or a `Vec<IngestionSource>`.
    pub async fn ingest(
        &self,
        database: &str,
        table: &str,
        sources: impl Into<IngestionSources>,
        properties: &IngestRequestProperties,
    ) -> Result<IngestionOperation> {
        self.ingest_cancellable(database, table, sources, properties, None).await
    }

    /// Same as `ingest`, but observing `cancel` per spec.md §4's
    /// cancellation contract (fails before transmission, aborts in-flight
    /// uploads, never retried once cancelled).
    pub async fn ingest_cancellable(
        &self,
        database: &str,
        table: &str,
        sources: impl Into<IngestionSources>,
        properties: &IngestRequestProperties,
        cancel: Option<&CancellationToken>,
    ) -> Result<IngestionOperation> {
        self.engine.ingest(database, table, sources.into(), properties, cancel).await
    }

    /// spec.md §4.6/§4.7: streaming operations have no tracking and always
    /// report empty/no-op status; only queued operations hit the status
    /// table.
    pub async fn get_operation_summary(&self, operation: &IngestionOperation) -> Result<Status> {
        self.engine.summary(operation).await
    }

    pub async fn get_operation_details(&self, operation: &IngestionOperation) -> Result<StatusResponse> {
        self.engine.details(operation).await
    }

    pub async fn poll_until_completion(
        &self,
        operation: &IngestionOperation,
        poll_interval: Option<Duration>,
        timeout: Option<Duration>,
    ) -> Result<StatusResponse> {
        self.engine.poll_until_completion(operation, poll_interval, timeout, None).await
    }

    /// Same as `poll_until_completion`, but exits `Cancelled` with the
    /// latest snapshot as soon as `cancel` fires (spec.md §4: "during
    /// polling: exits with `Cancelled` and the latest snapshot").
    pub async fn poll_until_completion_cancellable(
        &self,
        operation: &IngestionOperation,
        poll_interval: Option<Duration>,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> Result<StatusResponse> {
        self.engine.poll_until_completion(operation, poll_interval, timeout, cancel).await
    }

    pub fn uploader(&self) -> Arc<Uploader> {
        self.uploader.clone()
    }
}
