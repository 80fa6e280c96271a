//! C7 QueuedEngine (spec.md §4.7 "Queued ingestion").
//!
//! Validates a batch of sources (single shared format, size limit,
//! duplicate-blob rejection), stages any local sources through `Uploader`
//! while leaving already-staged blobs untouched, submits the resulting job
//! descriptor through `DmClient`, and polls `StatusClient` for completion.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::info;
use tokio_util::sync::CancellationToken;

use crate::collaborators::{DmClient, StatusClient};
use crate::config::ClientConfig;
use crate::error::{strip_query, DuplicateBlobEntry, IngestError, Result};
use crate::model::{
    BlobDescriptor, ContainerInfo, IngestRequestProperties, IngestionOperation, IngestionSource, LocalSource,
    Status, StatusResponse, UploadResult,
};
use crate::uploader::Uploader;

pub struct QueuedEngine {
    uploader: Arc<Uploader>,
    dm: Arc<dyn DmClient>,
    status: Arc<dyn StatusClient>,
    config: ClientConfig,
}

impl QueuedEngine {
    pub fn new(uploader: Arc<Uploader>, dm: Arc<dyn DmClient>, status: Arc<dyn StatusClient>, config: ClientConfig) -> Self {
        QueuedEngine { uploader, dm, status, config }
    }

    /// Stages (if necessary) and submits one batch of sources as a single
    /// queued-ingest job (spec.md §4.7).
    ///
    /// spec.md §4's cancellation contract: a cancelled `cancel` token fails
    /// `Cancelled` before any upload or DM request is issued, and is handed
    /// to `Uploader::upload_many` so an in-flight stage can be aborted too.
    pub async fn ingest(
        &self,
        database: &str,
        table: &str,
        sources: Vec<IngestionSource>,
        properties: &IngestRequestProperties,
        containers: &[ContainerInfo],
        max_blobs_per_batch: usize,
        cancel: Option<&CancellationToken>,
    ) -> Result<IngestionOperation> {
        if let Some(token) = cancel {
            if token.is_cancelled() {
                return Err(IngestError::Cancelled);
            }
        }
        properties.validate()?;
        validate_batch(&sources, max_blobs_per_batch)?;

        // Partition while remembering each source's position in the
        // caller-observed order (spec.md §4.7 "Staging" / §5 "the posted
        // blobs[] preserves caller order" even though uploads, run
        // concurrently via `Uploader::upload_many`, may complete out of
        // order). Locals are matched back to their slot by `sourceId`
        // (spec.md §3: unique per source) since `upload_many` returns
        // results in completion order, not submission order.
        let mut slots: Vec<Option<BlobDescriptor>> = (0..sources.len()).map(|_| None).collect();
        let mut source_id_to_index = std::collections::HashMap::new();
        let mut locals = Vec::new();
        for (index, source) in sources.into_iter().enumerate() {
            match LocalSource::try_from(source) {
                Ok(local) => {
                    source_id_to_index.insert(local.source_id().to_string(), index);
                    locals.push(local);
                }
                Err(IngestionSource::Blob { blob_url, source_id, exact_size, .. }) => {
                    slots[index] = Some(BlobDescriptor { blob_path: blob_url, source_id, raw_size: exact_size });
                }
                Err(_) => unreachable!("try_from only fails for the Blob variant"),
            }
        }

        if !locals.is_empty() {
            let results = self
                .uploader
                .upload_many(locals, database, table, containers, properties.ignore_size_limit(), cancel)
                .await;
            for result in results {
                match result {
                    UploadResult::Success(blob) => {
                        let index = source_id_to_index[&blob.source_id];
                        slots[index] = Some(BlobDescriptor {
                            blob_path: blob.blob_url,
                            source_id: blob.source_id,
                            raw_size: blob.exact_size,
                        })
                    }
                    // spec.md §4's cancellation contract: a cancelled stage
                    // fails the whole batch `Cancelled`, distinct from an
                    // ordinary transient staging failure.
                    UploadResult::Failure { error: IngestError::Cancelled, .. } => return Err(IngestError::Cancelled),
                    UploadResult::Failure { source_id, error } => {
                        return Err(IngestError::upload_failed_with_cause(
                            crate::error::UploadFailureKind::Transient,
                            format!("staging source {source_id} failed"),
                            error,
                        ))
                    }
                }
            }
        }

        let blobs: Vec<BlobDescriptor> = slots
            .into_iter()
            .map(|slot| slot.expect("every index is filled by either the blob or local branch above"))
            .collect();

        reject_duplicate_blobs(&blobs)?;

        if let Some(token) = cancel {
            if token.is_cancelled() {
                return Err(IngestError::Cancelled);
            }
        }

        let timestamp = Utc::now();
        let response = self.dm.post_queued_ingest(database, table, timestamp, &blobs, properties).await?;

        if response.status_code == 404 {
            // spec.md §4.7: "On 404, raise EndpointNotFound (transient: DM
            // URL may be misconfigured)" — transient unlike the streaming
            // path's 404, which is permanent.
            return Err(IngestError::EndpointNotFound {
                endpoint: "DM queuedIngest endpoint".into(),
                permanent: false,
            });
        }
        if !(200..300).contains(&response.status_code) {
            return Err(IngestError::ServiceError {
                message: format!("queued ingest submission returned {}", response.status_code),
                code: None,
                error_type: None,
                failure_code: None,
            });
        }

        // spec.md §6 "DM queued endpoint": "Returns { ingestionOperationId:
        // string }" — always the server-returned id, independent of
        // `enableTracking` (that flag only controls whether the server
        // persists per-blob status for later polling).
        #[derive(serde::Deserialize)]
        struct SubmitAck {
            #[serde(rename = "ingestionOperationId")]
            ingestion_operation_id: String,
        }
        let ack: SubmitAck = serde_json::from_slice(&response.body).unwrap_or(SubmitAck {
            ingestion_operation_id: uuid::Uuid::new_v4().to_string(),
        });
        let operation = IngestionOperation::new_queued(ack.ingestion_operation_id, database, table);

        info!("submitted queued ingest job {} with {} blob(s)", operation.operation_id, blobs.len());
        Ok(operation)
    }

    /// spec.md §4.7 `getOperationSummary`: aggregate counts, no per-blob
    /// detail.
    pub async fn get_operation_summary(&self, operation: &IngestionOperation) -> Result<Status> {
        let response = self
            .status
            .get_ingest_status(&operation.database, &operation.table, &operation.operation_id, false)
            .await?;
        Ok(response.to_status())
    }

    /// spec.md §4.7 `getOperationDetails`: full per-blob status.
    pub async fn get_operation_details(&self, operation: &IngestionOperation) -> Result<StatusResponse> {
        self.status
            .get_ingest_status(&operation.database, &operation.table, &operation.operation_id, true)
            .await
    }

    /// Polls until every blob reaches a terminal status or `timeout`
    /// elapses, sleeping `poll_interval` between checks (spec.md §4.7
    /// "pollUntilCompletion").
    ///
    /// spec.md §4's cancellation contract: polling exits `Cancelled` as
    /// soon as `cancel` fires, logging the latest snapshot observed so far
    /// rather than silently discarding it.
    pub async fn poll_until_completion(
        &self,
        operation: &IngestionOperation,
        poll_interval: Option<Duration>,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> Result<StatusResponse> {
        let poll_interval = poll_interval.unwrap_or(self.config.default_polling_interval);
        let timeout = timeout.unwrap_or(self.config.default_poll_timeout);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    return Err(IngestError::Cancelled);
                }
            }

            let details = self.get_operation_details(operation).await?;
            let aggregate = details.to_status();
            if details.is_complete(&aggregate) {
                return Ok(details);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(IngestError::OperationTimeout(operation.operation_id.clone()));
            }

            let sleep = tokio::time::sleep(poll_interval.min(deadline - tokio::time::Instant::now()));
            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = sleep => {}
                        _ = token.cancelled() => {
                            info!(
                                "queued poll for {} cancelled; latest snapshot: {:?}",
                                operation.operation_id, aggregate
                            );
                            return Err(IngestError::Cancelled);
                        }
                    }
                }
                None => sleep.await,
            }
        }
    }
}

fn validate_batch(sources: &[IngestionSource], max_blobs_per_batch: usize) -> Result<()> {
    if sources.is_empty() {
        return Err(IngestError::SourceEmpty { source_id: "batch".into() });
    }
    if sources.len() > max_blobs_per_batch {
        return Err(IngestError::MultiIngestExceededLimit { count: sources.len(), limit: max_blobs_per_batch });
    }

    let mut formats: HashSet<String> = sources.iter().map(|s| s.format().as_stream_format().to_string()).collect();
    if formats.len() > 1 {
        let mut list: Vec<String> = formats.drain().collect();
        list.sort();
        return Err(IngestError::FormatMismatch(list));
    }

    Ok(())
}

/// spec.md §4.7: duplicate detection compares blob URLs with their SAS
/// query string stripped, since two entries differing only by token are
/// still the same underlying blob.
fn reject_duplicate_blobs(blobs: &[BlobDescriptor]) -> Result<()> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for blob in blobs {
        let stripped = strip_query(&blob.blob_path);
        if !seen.insert(stripped.clone()) {
            duplicates.push(DuplicateBlobEntry { source_id: blob.source_id.clone(), blob_url: stripped });
        }
    }
    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(IngestError::DuplicateBlob(duplicates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Format;

    #[test]
    fn batch_above_limit_is_rejected() {
        let sources: Vec<IngestionSource> = (0..3)
            .map(|i| IngestionSource::Blob {
                blob_url: format!("https://x/{i}"),
                format: Format::Csv,
                compression_type: crate::model::CompressionType::None,
                source_id: format!("s{i}"),
                exact_size: None,
            })
            .collect();
        let err = validate_batch(&sources, 2).unwrap_err();
        assert!(matches!(err, IngestError::MultiIngestExceededLimit { count: 3, limit: 2 }));
    }

    #[test]
    fn mixed_formats_are_rejected() {
        let sources = vec![
            IngestionSource::Blob {
                blob_url: "https://x/1".into(),
                format: Format::Csv,
                compression_type: crate::model::CompressionType::None,
                source_id: "s1".into(),
                exact_size: None,
            },
            IngestionSource::Blob {
                blob_url: "https://x/2".into(),
                format: Format::Json,
                compression_type: crate::model::CompressionType::None,
                source_id: "s2".into(),
                exact_size: None,
            },
        ];
        assert!(matches!(validate_batch(&sources, 10), Err(IngestError::FormatMismatch(_))));
    }

    #[test]
    fn duplicate_blob_urls_differing_only_by_sas_are_rejected() {
        let blobs = vec![
            BlobDescriptor { blob_path: "https://a/b?sv=1".into(), source_id: "s1".into(), raw_size: None },
            BlobDescriptor { blob_path: "https://a/b?sv=2".into(), source_id: "s2".into(), raw_size: None },
        ];
        assert!(matches!(reject_duplicate_blobs(&blobs), Err(IngestError::DuplicateBlob(_))));
    }

    #[test]
    fn distinct_blob_urls_pass() {
        let blobs = vec![
            BlobDescriptor { blob_path: "https://a/b".into(), source_id: "s1".into(), raw_size: None },
            BlobDescriptor { blob_path: "https://a/c".into(), source_id: "s2".into(), raw_size: None },
        ];
        assert!(reject_duplicate_blobs(&blobs).is_ok());
    }
}
