//! C5 Uploader (spec.md §4.5 "Staging / upload").
//!
//! Picks a container (ranked, tie-shuffled), compresses if needed, names
//! the blob, and PUTs it through `StorageClient`, rotating to the next
//! container and consulting `RetryPolicy` on failure. Bounded concurrency
//! across many sources follows `collector.rs`'s `max_threads`-bounded
//! worker pool, implemented here with a `tokio::sync::Semaphore` guarding
//! each spawned upload task rather than a fixed channel of workers, since
//! sources arrive as a `Vec` rather than a continuous feed.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, warn};
use rand::Rng;
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::account_ranker::AccountRanker;
use crate::collaborators::StorageClient;
use crate::compression::Compressor;
use crate::config::ClientConfig;
use crate::error::{IngestError, Result};
use crate::model::{BlobSource, CompressionType, ContainerInfo, LocalSource, UploadResult};
use crate::retry::RetryPolicy;

/// Builds the blob name spec.md §4.5 describes:
/// `{database}__{table}__{baseName}__{uuid}[.{format}][.{compressionSuffix}]`.
pub fn build_blob_name(database: &str, table: &str, base_name: &str, source: &LocalSource) -> String {
    let mut name = format!("{database}__{table}__{base_name}__{}", Uuid::new_v4());
    name.push('.');
    name.push_str(source.format().as_stream_format());
    if let Some(suffix) = source.compression_type().suffix() {
        name.push('.');
        name.push_str(suffix);
    } else if source.should_compress() {
        // The bytes we're about to write will actually be gzip-compressed
        // even though the source itself wasn't, so the name must say so.
        name.push_str(".gz");
    }
    name
}

/// C5: stages local sources into cloud storage, returning blob handles with
/// attached access credentials (spec.md §4.5).
pub struct Uploader {
    storage: Arc<dyn StorageClient>,
    compressor: Arc<dyn Compressor>,
    retry_policy: Arc<dyn RetryPolicy>,
    ranker: AccountRanker,
    config: ClientConfig,
}

impl Uploader {
    pub fn new(
        storage: Arc<dyn StorageClient>,
        compressor: Arc<dyn Compressor>,
        retry_policy: Arc<dyn RetryPolicy>,
        ranker: AccountRanker,
        config: ClientConfig,
    ) -> Self {
        Uploader { storage, compressor, retry_policy, ranker, config }
    }

    /// Stages every source into the given candidate containers, bounding
    /// concurrent uploads at `config.max_concurrency` (spec.md §5).
    ///
    /// spec.md §4's cancellation contract: a source whose slot hasn't
    /// started transmission yet fails `Cancelled` with no side effects;
    /// one already in flight is signaled to abort. Already-succeeded
    /// uploads are not rolled back, so the returned `Vec` is a genuine
    /// partial-success report even when `cancel` fires mid-batch.
    pub async fn upload_many(
        &self,
        sources: Vec<LocalSource>,
        database: &str,
        table: &str,
        containers: &[ContainerInfo],
        ignore_size_limit: bool,
        cancel: Option<&CancellationToken>,
    ) -> Vec<UploadResult> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut tasks = FuturesUnordered::new();
        let cancel = cancel.cloned();

        for source in sources {
            let semaphore = semaphore.clone();
            let containers = self.rank_containers(containers).await;
            let database = database.to_string();
            let table = table.to_string();
            let cancel = cancel.clone();
            tasks.push(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                self.upload_one(source, &database, &table, &containers, ignore_size_limit, cancel.as_ref()).await
            });
        }

        let mut results = Vec::new();
        while let Some(result) = tasks.next().await {
            results.push(result);
        }
        results
    }

    pub async fn upload(
        &self,
        source: LocalSource,
        database: &str,
        table: &str,
        containers: &[ContainerInfo],
        ignore_size_limit: bool,
        cancel: Option<&CancellationToken>,
    ) -> UploadResult {
        let ranked = self.rank_containers(containers).await;
        self.upload_one(source, database, table, &ranked, ignore_size_limit, cancel).await
    }

    async fn rank_containers(&self, containers: &[ContainerInfo]) -> Vec<ContainerInfo> {
        self.ranker.rank(containers.to_vec(), |c| c.account_name.as_str()).await
    }

    async fn upload_one(
        &self,
        source: LocalSource,
        database: &str,
        table: &str,
        ranked_containers: &[ContainerInfo],
        ignore_size_limit: bool,
        cancel: Option<&CancellationToken>,
    ) -> UploadResult {
        let source_id = source.source_id().to_string();
        if let Some(token) = cancel {
            if token.is_cancelled() {
                return UploadResult::Failure { source_id, error: IngestError::Cancelled };
            }
        }
        if ranked_containers.is_empty() {
            return UploadResult::Failure { source_id, error: IngestError::NoContainers };
        }

        // spec.md §4.5 "Validation": reject a source whose estimated
        // length exceeds `maxDataSize`, unless the caller opted out.
        if !ignore_size_limit {
            match source.estimated_size().await {
                Ok(Some(size)) if size > self.config.max_data_size => {
                    return UploadResult::Failure {
                        source_id,
                        error: IngestError::SourceSizeLimitExceeded {
                            source_id: source.source_id().to_string(),
                            size,
                            limit: self.config.max_data_size,
                        },
                    };
                }
                Ok(_) => {}
                Err(e) => {
                    return UploadResult::Failure {
                        source_id,
                        error: IngestError::SourceNotReadable { source_id: source.source_id().to_string(), message: e.to_string() },
                    };
                }
            }
        }

        let base_name = source.base_name();
        let blob_name = build_blob_name(database, table, &base_name, &source);
        let should_compress = source.should_compress();
        let format = source.format();

        let body = match self.materialize(source, should_compress, &source_id).await {
            Ok(body) => body,
            Err(error) => return UploadResult::Failure { source_id, error },
        };

        let effective_compression = if should_compress { CompressionType::Gzip } else { CompressionType::None };

        // spec.md §4.5 "Attempt loop": one attempt = one container = one
        // call. A random starting index, then `(i+1) mod N` on every
        // transient retry — never re-trying the same container twice in a
        // row, and wrapping back around once the list is exhausted.
        let container_count = ranked_containers.len();
        let start = rand::thread_rng().gen_range(0..container_count);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let container = &ranked_containers[(start + attempt as usize - 1) % container_count];
            let url = format!("{}/{}", container.url.trim_end_matches('/'), blob_name);

            let upload = self.storage.upload(
                &url,
                container.sas_token.as_deref(),
                body.clone(),
                self.config.upload_block_size,
                self.config.max_concurrency,
                self.config.upload_max_single_size,
                self.config.blob_upload_timeout,
            );

            // spec.md §4's cancellation contract: a storage call already in
            // flight is signaled to abort rather than left to finish.
            let outcome = match cancel {
                Some(token) => {
                    tokio::select! {
                        result = upload => result,
                        _ = token.cancelled() => return UploadResult::Failure { source_id, error: IngestError::Cancelled },
                    }
                }
                None => upload.await,
            };

            let error = match outcome {
                Ok(outcome) if (200..300).contains(&outcome.status_code) => {
                    self.ranker.record_success(&container.account_name).await;
                    let blob_url = match &container.sas_token {
                        Some(sas) if !sas.is_empty() => format!("{url}?{sas}"),
                        _ => url,
                    };
                    return UploadResult::Success(BlobSource {
                        blob_url,
                        format,
                        compression_type: effective_compression,
                        source_id,
                        exact_size: Some(body.len() as u64),
                    });
                }
                // 4xx from storage is permanent; anything else (5xx) is
                // transient (spec.md §4.5: "permanent error (4xx response
                // ...): raise immediately — no retry").
                Ok(outcome) if (400..500).contains(&outcome.status_code) => {
                    self.ranker.record_failure(&container.account_name).await;
                    IngestError::upload_failed(
                        crate::error::UploadFailureKind::Permanent,
                        format!("storage returned status {}", outcome.status_code),
                    )
                }
                Ok(outcome) => {
                    self.ranker.record_failure(&container.account_name).await;
                    IngestError::upload_failed(
                        crate::error::UploadFailureKind::Transient,
                        format!("storage returned status {}", outcome.status_code),
                    )
                }
                Err(error) => {
                    self.ranker.record_failure(&container.account_name).await;
                    warn!("upload attempt {attempt} to {} failed: {error}", container.account_name);
                    if error.is_permanent() {
                        IngestError::upload_failed_with_cause(
                            crate::error::UploadFailureKind::Permanent,
                            "storage upload failed permanently",
                            error,
                        )
                    } else {
                        error
                    }
                }
            };

            if error.is_permanent() {
                return UploadResult::Failure { source_id, error };
            }

            match self.retry_policy.next_delay(attempt, &error) {
                Some(delay) => {
                    debug!("retrying upload in {delay:?}");
                    match cancel {
                        Some(token) => {
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = token.cancelled() => {
                                    return UploadResult::Failure { source_id, error: IngestError::Cancelled }
                                }
                            }
                        }
                        None => tokio::time::sleep(delay).await,
                    }
                }
                None => return UploadResult::Failure { source_id, error },
            }
        }
    }

    async fn materialize(&self, source: LocalSource, should_compress: bool, source_id: &str) -> Result<Bytes> {
        let reader = match source {
            LocalSource::File { path, .. } => {
                let file = tokio::fs::File::open(&path).await.map_err(|e| {
                    IngestError::SourceNotReadable { source_id: path.display().to_string(), message: e.to_string() }
                })?;
                Box::pin(file) as crate::model::BoxedAsyncRead
            }
            LocalSource::Stream { reader, .. } => reader,
        };

        let mut wrapped = if should_compress {
            self.compressor.wrap(reader, CompressionType::Gzip)
        } else {
            reader
        };

        let mut buffer = BytesMut::new();
        let mut chunk = [0u8; 64 * 1024];
        loop {
            let read = wrapped
                .read(&mut chunk)
                .await
                .map_err(|e| IngestError::SourceNotReadable { source_id: source_id.to_string(), message: e.to_string() })?;
            if read == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..read]);
        }

        if buffer.is_empty() {
            return Err(IngestError::SourceEmpty { source_id: source_id.to_string() });
        }

        Ok(buffer.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CompressionType, Format};

    #[test]
    fn blob_name_adds_gz_suffix_for_client_side_compression() {
        let source = LocalSource::File {
            path: "events.csv".into(),
            format: Format::Csv,
            compression_type: CompressionType::None,
            source_id: "s1".into(),
        };
        let name = build_blob_name("db", "tbl", "events", &source);
        assert!(name.starts_with("db__tbl__events__"));
        assert!(name.ends_with(".csv.gz"));
    }

    #[test]
    fn blob_name_keeps_existing_compression_suffix() {
        let source = LocalSource::File {
            path: "events.csv.gz".into(),
            format: Format::Csv,
            compression_type: CompressionType::Gzip,
            source_id: "s1".into(),
        };
        let name = build_blob_name("db", "tbl", "events", &source);
        assert!(name.ends_with(".csv.gz"));
    }

    #[test]
    fn blob_name_has_no_compression_suffix_for_precompressed_binary_formats() {
        let source = LocalSource::File {
            path: "events.parquet".into(),
            format: Format::Parquet,
            compression_type: CompressionType::None,
            source_id: "s1".into(),
        };
        let name = build_blob_name("db", "tbl", "events", &source);
        assert!(name.ends_with(".parquet"));
    }

    use crate::collaborators::{StorageClient, UploadOutcome};
    use crate::model::{ContainerKind, UploadResult};
    use crate::retry::ExponentialBackoffRetryPolicy;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Records which account each call landed on and returns a scripted
    /// status code sequence, used to reproduce spec.md §8 scenario S5
    /// ("Uploader cycling").
    struct ScriptedStorage {
        calls: StdMutex<Vec<String>>,
        statuses: StdMutex<std::collections::VecDeque<u16>>,
    }

    #[async_trait]
    impl StorageClient for ScriptedStorage {
        async fn upload(
            &self,
            url: &str,
            _sas_token: Option<&str>,
            _body: Bytes,
            _block_size: u64,
            _max_concurrency: usize,
            _max_single_upload_size: u64,
            _timeout: Duration,
        ) -> Result<UploadOutcome> {
            let account = url.split('/').nth(2).unwrap_or(url).to_string();
            self.calls.lock().unwrap().push(account);
            let status = self.statuses.lock().unwrap().pop_front().unwrap_or(500);
            Ok(UploadOutcome { status_code: status, etag: None })
        }
    }

    fn container(account: &str) -> ContainerInfo {
        ContainerInfo {
            url: format!("https://{account}/ingest"),
            sas_token: None,
            kind: ContainerKind::Storage,
            account_name: account.to_string(),
        }
    }

    #[tokio::test]
    async fn cycles_containers_on_transient_failure_and_wraps_around() {
        let storage = Arc::new(ScriptedStorage {
            calls: StdMutex::new(Vec::new()),
            statuses: StdMutex::new(vec![500u16, 500, 200].into()),
        });
        let retry_policy = Arc::new(ExponentialBackoffRetryPolicy {
            max_attempts: 3,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        });
        let uploader = Uploader::new(
            storage.clone(),
            Arc::new(crate::compression::GzipCompressor),
            retry_policy,
            AccountRanker::new(),
            ClientConfig::default(),
        );
        // materialize() reads from disk, so feed a real temp file.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.csv");
        tokio::fs::write(&path, b"a,b\n1,2\n").await.unwrap();
        let source = LocalSource::File {
            path,
            format: Format::Csv,
            compression_type: CompressionType::None,
            source_id: "s1".into(),
        };

        let containers = vec![container("c1"), container("c2")];
        let result = uploader.upload(source, "db", "tbl", &containers, false, None).await;

        let calls = storage.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 3, "expected exactly 3 storage calls, got {calls:?}");
        // Exactly one account switch per attempt, wrapping back to the
        // first container on the third attempt (2 containers, 3 attempts).
        assert_eq!(calls[0], calls[2], "third attempt should wrap back to the first container");
        assert_ne!(calls[0], calls[1], "second attempt should move to the other container");

        match result {
            UploadResult::Success(blob) => assert!(blob.blob_url.contains(&calls[2])),
            UploadResult::Failure { error, .. } => panic!("expected eventual success, got {error}"),
        }
    }

    #[tokio::test]
    async fn permanent_4xx_storage_response_fails_without_retrying() {
        let storage = Arc::new(ScriptedStorage {
            calls: StdMutex::new(Vec::new()),
            statuses: StdMutex::new(vec![403u16, 200].into()),
        });
        let retry_policy = Arc::new(ExponentialBackoffRetryPolicy {
            max_attempts: 5,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        });
        let uploader = Uploader::new(
            storage.clone(),
            Arc::new(crate::compression::GzipCompressor),
            retry_policy,
            AccountRanker::new(),
            ClientConfig::default(),
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.csv");
        tokio::fs::write(&path, b"a,b\n1,2\n").await.unwrap();
        let source = LocalSource::File {
            path,
            format: Format::Csv,
            compression_type: CompressionType::None,
            source_id: "s1".into(),
        };

        let containers = vec![container("only")];
        let result = uploader.upload(source, "db", "tbl", &containers, false, None).await;

        assert_eq!(storage.calls.lock().unwrap().len(), 1, "a 4xx must not be retried");
        match result {
            UploadResult::Failure { error, .. } => assert!(error.is_permanent()),
            UploadResult::Success(_) => panic!("expected a permanent failure"),
        }
    }

    #[tokio::test]
    async fn oversized_file_is_rejected_before_any_storage_call() {
        let storage = Arc::new(ScriptedStorage {
            calls: StdMutex::new(Vec::new()),
            statuses: StdMutex::new(vec![200u16].into()),
        });
        let mut config = ClientConfig::default();
        config.max_data_size = 4;
        let uploader = Uploader::new(
            storage.clone(),
            Arc::new(crate::compression::GzipCompressor),
            Arc::new(ExponentialBackoffRetryPolicy::default()),
            AccountRanker::new(),
            config,
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.csv");
        tokio::fs::write(&path, b"a,b\n1,2\n").await.unwrap();
        let source = LocalSource::File {
            path,
            format: Format::Csv,
            compression_type: CompressionType::None,
            source_id: "s1".into(),
        };

        let containers = vec![container("only")];
        let result = uploader.upload(source, "db", "tbl", &containers, false, None).await;

        assert_eq!(storage.calls.lock().unwrap().len(), 0, "an oversized source must never reach storage");
        match result {
            UploadResult::Failure { error, .. } => {
                assert!(matches!(error, IngestError::SourceSizeLimitExceeded { .. }));
                assert!(error.is_permanent());
            }
            UploadResult::Success(_) => panic!("expected SourceSizeLimitExceeded"),
        }
    }

    #[tokio::test]
    async fn cancelled_token_fails_before_any_storage_call() {
        let storage = Arc::new(ScriptedStorage {
            calls: StdMutex::new(Vec::new()),
            statuses: StdMutex::new(vec![200u16].into()),
        });
        let uploader = Uploader::new(
            storage.clone(),
            Arc::new(crate::compression::GzipCompressor),
            Arc::new(ExponentialBackoffRetryPolicy::default()),
            AccountRanker::new(),
            ClientConfig::default(),
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.csv");
        tokio::fs::write(&path, b"a,b\n1,2\n").await.unwrap();
        let source = LocalSource::File {
            path,
            format: Format::Csv,
            compression_type: CompressionType::None,
            source_id: "s1".into(),
        };

        let token = CancellationToken::new();
        token.cancel();
        let containers = vec![container("only")];
        let result = uploader.upload(source, "db", "tbl", &containers, false, Some(&token)).await;

        assert_eq!(storage.calls.lock().unwrap().len(), 0, "a pre-cancelled upload must never reach storage");
        match result {
            UploadResult::Failure { error, .. } => assert!(matches!(error, IngestError::Cancelled)),
            UploadResult::Success(_) => panic!("expected Cancelled"),
        }
    }

    #[tokio::test]
    async fn oversized_file_is_accepted_when_size_limit_ignored() {
        let storage = Arc::new(ScriptedStorage {
            calls: StdMutex::new(Vec::new()),
            statuses: StdMutex::new(vec![200u16].into()),
        });
        let mut config = ClientConfig::default();
        config.max_data_size = 4;
        let uploader = Uploader::new(
            storage.clone(),
            Arc::new(crate::compression::GzipCompressor),
            Arc::new(ExponentialBackoffRetryPolicy::default()),
            AccountRanker::new(),
            config,
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.csv");
        tokio::fs::write(&path, b"a,b\n1,2\n").await.unwrap();
        let source = LocalSource::File {
            path,
            format: Format::Csv,
            compression_type: CompressionType::None,
            source_id: "s1".into(),
        };

        let containers = vec![container("only")];
        let result = uploader.upload(source, "db", "tbl", &containers, true, None).await;

        assert_eq!(storage.calls.lock().unwrap().len(), 1);
        assert!(matches!(result, UploadResult::Success(_)));
    }
}
