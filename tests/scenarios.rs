//! Facade-level scenario tests mirroring spec.md §8's S1-S6, each driven
//! through in-memory fakes for the external collaborator traits so no
//! network call is ever made.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use kusto_ingest_core::collaborators::{
    AuthTokenClient, DmClient, DmResponse, EngineClient, EngineResponse, ResourceDiscoveryClient, StatusClient,
    StorageClient, UploadOutcome,
};
use kusto_ingest_core::compression::GzipCompressor;
use kusto_ingest_core::config::ClientConfig;
use kusto_ingest_core::error::{IngestError, Result};
use kusto_ingest_core::facade::IngestFacade;
use kusto_ingest_core::model::{
    BlobDescriptor, CompressionType, ContainerInfo, ContainerKind, Format, IngestRequestProperties, IngestionSource,
    QueueInfo, ResourceSnapshot, StatusResponse, TableInfo,
};
use kusto_ingest_core::queued::QueuedEngine;
use kusto_ingest_core::resource_cache::ResourceCache;
use kusto_ingest_core::retry::ExponentialBackoffRetryPolicy;
use kusto_ingest_core::streaming::StreamingEngine;
use kusto_ingest_core::uploader::Uploader;
use kusto_ingest_core::account_ranker::AccountRanker;

struct StaticDiscovery(ResourceSnapshot);

#[async_trait]
impl ResourceDiscoveryClient for StaticDiscovery {
    async fn fetch_resources(&self) -> Result<ResourceSnapshot> {
        Ok(self.0.clone())
    }
}

struct StaticAuth;

#[async_trait]
impl AuthTokenClient for StaticAuth {
    async fn fetch_auth_token(&self) -> Result<String> {
        Ok("token".into())
    }
}

fn sample_snapshot() -> ResourceSnapshot {
    ResourceSnapshot {
        containers: vec![ContainerInfo {
            url: "https://acct.blob.core.windows.net/ingest".into(),
            sas_token: Some("sv=x".into()),
            kind: ContainerKind::Storage,
            account_name: "acct".into(),
        }],
        lake_folders: vec![],
        queues: vec![QueueInfo {
            url: "https://acct.queue.core.windows.net/q".into(),
            sas_token: Some("sv=x".into()),
            account_name: "acct".into(),
        }],
        status_table: TableInfo { url: "https://acct.table.core.windows.net/t".into(), sas_token: None },
        preferred_upload_method: None,
        max_blobs_per_batch: Some(500),
    }
}

fn csv_properties() -> IngestRequestProperties {
    IngestRequestProperties { format: Format::Csv, ..Default::default() }
}

/// Captures the exact call shape `StreamingEngine` hands to its
/// `EngineClient`, and always answers 2xx unless scripted otherwise.
#[derive(Default)]
struct CapturingEngine {
    calls: Mutex<Vec<CapturedCall>>,
}

#[derive(Clone, Debug)]
struct CapturedCall {
    content_type: String,
    content_encoding: Option<String>,
    source_kind: Option<String>,
    body: Bytes,
}

#[async_trait]
impl EngineClient for CapturingEngine {
    async fn post_streaming(
        &self,
        _database: &str,
        _table: &str,
        _stream_format: &str,
        _mapping_name: Option<&str>,
        content_type: &str,
        content_encoding: Option<&str>,
        source_kind: Option<&str>,
        body: Bytes,
    ) -> Result<EngineResponse> {
        self.calls.lock().unwrap().push(CapturedCall {
            content_type: content_type.to_string(),
            content_encoding: content_encoding.map(|s| s.to_string()),
            source_kind: source_kind.map(|s| s.to_string()),
            body,
        });
        Ok(EngineResponse { status_code: 200, body: Bytes::new() })
    }
}

fn facade_with_engine(engine: Arc<CapturingEngine>, storage: Arc<dyn StorageClient>) -> IngestFacade {
    let config = ClientConfig::default();

    let compressor = Arc::new(GzipCompressor);
    let retry_policy = Arc::new(ExponentialBackoffRetryPolicy {
        max_attempts: 3,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    });
    let uploader = Arc::new(Uploader::new(storage, compressor.clone(), retry_policy, AccountRanker::new(), config.clone()));

    let streaming = StreamingEngine::new(engine, compressor, config);

    IngestFacade::streaming(streaming, uploader, true)
}

struct AlwaysOkStorage;
#[async_trait]
impl StorageClient for AlwaysOkStorage {
    async fn upload(
        &self,
        _url: &str,
        _sas: Option<&str>,
        _body: Bytes,
        _block_size: u64,
        _max_concurrency: usize,
        _max_single_upload_size: u64,
        _timeout: Duration,
    ) -> Result<UploadOutcome> {
        Ok(UploadOutcome { status_code: 201, etag: Some("etag".into()) })
    }
}

/// S1 - Streaming blob passthrough: a `Blob` source is dispatched as a
/// `SourceUri` JSON reference, not read into memory.
#[tokio::test]
async fn s1_streaming_blob_passthrough() {
    let engine = Arc::new(CapturingEngine::default());
    let facade = facade_with_engine(engine.clone(), Arc::new(AlwaysOkStorage));

    let source = IngestionSource::Blob {
        blob_url: "https://s/b?sas=x".into(),
        format: Format::Csv,
        compression_type: CompressionType::None,
        source_id: "src-1".into(),
        exact_size: None,
    };

    let operation = facade.ingest("d", "t", source, &csv_properties()).await.unwrap();
    assert_eq!(operation.kind, kusto_ingest_core::model::IngestionKind::Streaming);
    assert_eq!(operation.database, "d");
    assert_eq!(operation.table, "t");

    let calls = engine.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert_eq!(call.content_type, "application/json");
    assert_eq!(call.source_kind.as_deref(), Some("uri"));
    assert!(call.content_encoding.is_none());
    assert_eq!(call.body.as_ref(), br#"{"SourceUri":"https://s/b?sas=x"}"#);
}

/// S2 - Streaming size reject: an oversized uncompressed csv body is
/// rejected before any request reaches the engine.
#[tokio::test]
async fn s2_streaming_size_reject() {
    let engine = Arc::new(CapturingEngine::default());
    let facade = facade_with_engine(engine.clone(), Arc::new(AlwaysOkStorage));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big.csv");
    let oversized = vec![b'a'; 5 * 1024 * 1024];
    tokio::fs::write(&path, &oversized).await.unwrap();

    let source = IngestionSource::File {
        path,
        format: Format::Csv,
        compression_type: CompressionType::None,
        source_id: "src-2".into(),
    };

    let error = facade.ingest("d", "t", source, &csv_properties()).await.unwrap_err();
    assert!(matches!(error, IngestError::RequestTooLarge { .. }));
    assert!(error.is_permanent());
    assert_eq!(engine.calls.lock().unwrap().len(), 0, "no request should have been issued");
}

struct SequenceStatus {
    count: AtomicUsize,
}

#[async_trait]
impl StatusClient for SequenceStatus {
    async fn get_ingest_status(&self, _d: &str, _t: &str, _op: &str, _details: bool) -> Result<StatusResponse> {
        use kusto_ingest_core::model::{BlobIngestionStatus, BlobStatus};

        let n = self.count.fetch_add(1, Ordering::SeqCst);
        let status = if n == 0 { BlobIngestionStatus::InProgress } else { BlobIngestionStatus::Succeeded };
        Ok(StatusResponse {
            blobs: vec![BlobStatus {
                source_id: "s1".into(),
                status,
                started_at: Utc::now(),
                last_updated_at: Utc::now(),
                error_code: None,
                failure_status: None,
                details: None,
            }],
            aggregate: None,
        })
    }
}

struct AckingDm;
#[async_trait]
impl DmClient for AckingDm {
    async fn post_queued_ingest(
        &self,
        _database: &str,
        _table: &str,
        _timestamp: DateTime<Utc>,
        _blobs: &[BlobDescriptor],
        _properties: &IngestRequestProperties,
    ) -> Result<DmResponse> {
        Ok(DmResponse { status_code: 200, body: Bytes::from_static(br#"{"ingestionOperationId":"op-42"}"#) })
    }
}

fn facade_with_queued(storage: Arc<dyn StorageClient>, dm: Arc<dyn DmClient>, status: Arc<dyn StatusClient>) -> IngestFacade {
    let config = ClientConfig::default();
    let discovery = Arc::new(StaticDiscovery(sample_snapshot()));
    let resources = Arc::new(ResourceCache::new(discovery, Arc::new(StaticAuth), &config));
    let compressor = Arc::new(GzipCompressor);
    let retry_policy = Arc::new(ExponentialBackoffRetryPolicy {
        max_attempts: 3,
        base_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    });
    let uploader = Arc::new(Uploader::new(storage, compressor, retry_policy, AccountRanker::new(), config.clone()));
    let queued = QueuedEngine::new(uploader.clone(), dm, status, config.clone());
    IngestFacade::queued(resources, queued, uploader, true, config)
}

struct NotFoundDm;
#[async_trait]
impl DmClient for NotFoundDm {
    async fn post_queued_ingest(
        &self,
        _database: &str,
        _table: &str,
        _timestamp: DateTime<Utc>,
        _blobs: &[BlobDescriptor],
        _properties: &IngestRequestProperties,
    ) -> Result<DmResponse> {
        Ok(DmResponse { status_code: 404, body: Bytes::new() })
    }
}

/// spec.md §4.7: "On 404, raise EndpointNotFound (transient: DM URL may be
/// misconfigured)" — distinct from the streaming path's permanent 404.
#[tokio::test]
async fn queued_dm_404_is_a_transient_endpoint_not_found() {
    let facade = facade_with_queued(
        Arc::new(AlwaysOkStorage),
        Arc::new(NotFoundDm),
        Arc::new(SequenceStatus { count: AtomicUsize::new(0) }),
    );

    let source = IngestionSource::Blob {
        blob_url: "https://s/b".into(),
        format: Format::Csv,
        compression_type: CompressionType::None,
        source_id: "s1".into(),
        exact_size: None,
    };

    let error = facade.ingest("d", "t", vec![source], &csv_properties()).await.unwrap_err();
    match error {
        IngestError::EndpointNotFound { permanent, .. } => assert!(!permanent),
        other => panic!("expected a transient EndpointNotFound, got {other}"),
    }
    assert!(!error.is_permanent());
}

/// spec.md §4's cancellation contract: a token cancelled before the call
/// fails `Cancelled` with no side effects, rather than the DM ever seeing
/// the submission.
#[tokio::test]
async fn cancelled_token_fails_queued_ingest_before_submission() {
    struct PanicsOnPost;
    #[async_trait]
    impl DmClient for PanicsOnPost {
        async fn post_queued_ingest(
            &self,
            _d: &str,
            _t: &str,
            _ts: DateTime<Utc>,
            _blobs: &[BlobDescriptor],
            _p: &IngestRequestProperties,
        ) -> Result<DmResponse> {
            panic!("a cancelled ingest must never reach the DM")
        }
    }
    let facade = facade_with_queued(
        Arc::new(AlwaysOkStorage),
        Arc::new(PanicsOnPost),
        Arc::new(SequenceStatus { count: AtomicUsize::new(0) }),
    );

    let source = IngestionSource::Blob {
        blob_url: "https://s/b".into(),
        format: Format::Csv,
        compression_type: CompressionType::None,
        source_id: "s1".into(),
        exact_size: None,
    };

    let token = CancellationToken::new();
    token.cancel();
    let error = facade
        .ingest_cancellable("d", "t", vec![source], &csv_properties(), Some(&token))
        .await
        .unwrap_err();
    assert!(matches!(error, IngestError::Cancelled));
}

/// S3 - Queued duplicate detection: two sources resolving to the same
/// blob URL (differing only by SAS) fail with `DuplicateBlob` and no POST
/// reaches the DM endpoint.
#[tokio::test]
async fn s3_queued_duplicate_detection() {
    struct PanicsOnPost;
    #[async_trait]
    impl DmClient for PanicsOnPost {
        async fn post_queued_ingest(
            &self,
            _d: &str,
            _t: &str,
            _ts: DateTime<Utc>,
            _blobs: &[BlobDescriptor],
            _p: &IngestRequestProperties,
        ) -> Result<DmResponse> {
            panic!("duplicate detection must prevent the job from ever being posted")
        }
    }
    let facade = facade_with_queued(
        Arc::new(AlwaysOkStorage),
        Arc::new(PanicsOnPost),
        Arc::new(SequenceStatus { count: AtomicUsize::new(0) }),
    );

    let sources = vec![
        IngestionSource::Blob {
            blob_url: "https://s/b?sas=a".into(),
            format: Format::Csv,
            compression_type: CompressionType::None,
            source_id: "src-a".into(),
            exact_size: None,
        },
        IngestionSource::Blob {
            blob_url: "https://s/b?sas=b".into(),
            format: Format::Csv,
            compression_type: CompressionType::None,
            source_id: "src-b".into(),
            exact_size: None,
        },
    ];

    let error = facade.ingest("d", "t", sources, &csv_properties()).await.unwrap_err();
    match error {
        IngestError::DuplicateBlob(entries) => {
            let ids: Vec<&str> = entries.iter().map(|e| e.source_id.as_str()).collect();
            assert!(ids.contains(&"src-a"));
            assert!(ids.contains(&"src-b"));
        }
        other => panic!("expected DuplicateBlob, got {other}"),
    }
}

/// S4 - Queued mixed upload: a blob plus two local sources (same format)
/// stage concurrently, and the posted job preserves caller order.
#[tokio::test]
async fn s4_queued_mixed_upload_preserves_order() {
    struct OrderCapturingDm {
        seen_source_ids: Mutex<Vec<String>>,
    }
    #[async_trait]
    impl DmClient for OrderCapturingDm {
        async fn post_queued_ingest(
            &self,
            _d: &str,
            _t: &str,
            _ts: DateTime<Utc>,
            blobs: &[BlobDescriptor],
            _p: &IngestRequestProperties,
        ) -> Result<DmResponse> {
            *self.seen_source_ids.lock().unwrap() = blobs.iter().map(|b| b.source_id.clone()).collect();
            Ok(DmResponse { status_code: 200, body: Bytes::from_static(br#"{"ingestionOperationId":"op-42"}"#) })
        }
    }

    let dm = Arc::new(OrderCapturingDm { seen_source_ids: Mutex::new(Vec::new()) });
    let facade = facade_with_queued(
        Arc::new(AlwaysOkStorage),
        dm.clone(),
        Arc::new(SequenceStatus { count: AtomicUsize::new(0) }),
    );

    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("f1.json");
    tokio::fs::write(&file_path, b"{\"a\":1}\n").await.unwrap();

    let stream_reader: kusto_ingest_core::model::BoxedAsyncRead =
        Box::pin(std::io::Cursor::new(b"{\"a\":2}\n".to_vec()));

    let sources = vec![
        IngestionSource::Blob {
            blob_url: "https://s/b1".into(),
            format: Format::Json,
            compression_type: CompressionType::None,
            source_id: "b1".into(),
            exact_size: Some(10),
        },
        IngestionSource::File {
            path: file_path,
            format: Format::Json,
            compression_type: CompressionType::None,
            source_id: "f1".into(),
        },
        IngestionSource::Stream {
            reader: stream_reader,
            name: "s1.json".into(),
            format: Format::Json,
            compression_type: CompressionType::None,
            source_id: "s1".into(),
            size_hint: None,
        },
    ];

    let properties = IngestRequestProperties { format: Format::Json, enable_tracking: true, ..Default::default() };
    let operation = facade.ingest("d", "t", sources, &properties).await.unwrap();
    assert_eq!(operation.operation_id, "op-42");

    let seen = dm.seen_source_ids.lock().unwrap().clone();
    assert_eq!(seen, vec!["b1".to_string(), "f1".to_string(), "s1".to_string()]);
}

/// S6 - Poll terminal: the first tick reports `InProgress`, the second
/// reports `Succeeded`; `pollUntilCompletion` returns on the terminal tick
/// rather than timing out.
#[tokio::test]
async fn s6_poll_until_completion_returns_on_terminal_status() {
    let facade = facade_with_queued(
        Arc::new(AlwaysOkStorage),
        Arc::new(AckingDm),
        Arc::new(SequenceStatus { count: AtomicUsize::new(0) }),
    );

    let sources = vec![IngestionSource::Blob {
        blob_url: "https://s/b".into(),
        format: Format::Csv,
        compression_type: CompressionType::None,
        source_id: "s1".into(),
        exact_size: None,
    }];
    let operation = facade.ingest("d", "t", sources, &csv_properties()).await.unwrap();

    let result = facade
        .poll_until_completion(&operation, Some(Duration::from_millis(1)), Some(Duration::from_secs(5)))
        .await
        .unwrap();

    assert!(result.blobs.iter().all(|b| b.status.is_terminal()));
}

/// spec.md §4.6 "Getting status": streaming operations have no server-side
/// tracking, so status lookups against one must return empty records
/// rather than erroring, even though the underlying `StatusClient` in this
/// facade wiring would panic if ever called.
#[tokio::test]
async fn streaming_operation_status_is_always_empty_and_never_errors() {
    let engine = Arc::new(CapturingEngine::default());
    let facade = facade_with_engine(engine, Arc::new(AlwaysOkStorage));

    let source = IngestionSource::Blob {
        blob_url: "https://s/b".into(),
        format: Format::Csv,
        compression_type: CompressionType::None,
        source_id: "src-1".into(),
        exact_size: None,
    };
    let operation = facade.ingest("d", "t", source, &csv_properties()).await.unwrap();

    let summary = facade.get_operation_summary(&operation).await.unwrap();
    assert_eq!(summary, kusto_ingest_core::model::Status::default());

    let details = facade.get_operation_details(&operation).await.unwrap();
    assert!(details.blobs.is_empty());

    let polled = facade
        .poll_until_completion(&operation, Some(Duration::from_millis(1)), Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert!(polled.blobs.is_empty());
}
