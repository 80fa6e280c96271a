//! Wire parsing for the status-table endpoint (spec.md §6 "Status table
//! endpoint"), shared between `transport.rs` and tests that fabricate a
//! response body. Kept separate from `model.rs` because this is parsing
//! logic, not a domain type.
//!
//! spec.md §6: the endpoint "returns either the aggregate or detailed form"
//! depending on the `details` query flag the caller sent — not one shape
//! that happens to omit fields. `getOperationSummary` (spec.md §4.7) calls
//! `getIngestStatus(details=false)` and gets back
//! `{succeeded, failed, inProgress, canceled}` with no `blobs` key at all,
//! so parsing must branch on which request was made rather than guessing
//! from the body.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{IngestError, Result};
use crate::model::{BlobIngestionStatus, BlobStatus, FailureStatus, Status, StatusResponse};

#[derive(Debug, Deserialize)]
struct RawBlobStatus {
    #[serde(rename = "sourceId")]
    source_id: String,
    status: String,
    #[serde(rename = "startedAt")]
    started_at: DateTime<Utc>,
    #[serde(rename = "lastUpdatedAt")]
    last_updated_at: DateTime<Utc>,
    #[serde(rename = "errorCode", default)]
    error_code: Option<String>,
    #[serde(rename = "failureStatus", default)]
    failure_status: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawStatusResponse {
    #[serde(default)]
    blobs: Vec<RawBlobStatus>,
}

/// spec.md §3/§6 aggregate shape: `{succeeded, failed, inProgress, canceled}`.
#[derive(Debug, Deserialize)]
struct RawAggregateStatus {
    succeeded: usize,
    failed: usize,
    #[serde(rename = "inProgress")]
    in_progress: usize,
    canceled: usize,
}

fn parse_status(s: &str) -> BlobIngestionStatus {
    match s {
        "Queued" => BlobIngestionStatus::Queued,
        "InProgress" => BlobIngestionStatus::InProgress,
        "Succeeded" => BlobIngestionStatus::Succeeded,
        "Failed" => BlobIngestionStatus::Failed,
        "PartiallySucceeded" => BlobIngestionStatus::PartiallySucceeded,
        "SkippedDueToDedup" => BlobIngestionStatus::SkippedDueToDedup,
        _ => BlobIngestionStatus::InProgress,
    }
}

fn parse_failure_status(s: &str) -> FailureStatus {
    match s {
        "Transient" => FailureStatus::Transient,
        "Permanent" => FailureStatus::Permanent,
        "Exhausted" => FailureStatus::Exhausted,
        _ => FailureStatus::Unknown,
    }
}

/// Parses the status-table response. `details` must match the `details`
/// query flag the request was sent with (spec.md §6): `true` decodes the
/// per-blob form into `StatusResponse.blobs`; `false` decodes the aggregate
/// counters into `StatusResponse.aggregate`, with `blobs` left empty.
pub fn parse_status_response(body: &[u8], details: bool) -> Result<StatusResponse> {
    if !details {
        let raw: RawAggregateStatus =
            serde_json::from_slice(body).map_err(IngestError::Serialization)?;
        return Ok(StatusResponse {
            blobs: Vec::new(),
            aggregate: Some(Status {
                succeeded: raw.succeeded,
                failed: raw.failed,
                in_progress: raw.in_progress,
                canceled: raw.canceled,
            }),
        });
    }

    let raw: RawStatusResponse =
        serde_json::from_slice(body).map_err(IngestError::Serialization)?;

    let blobs = raw
        .blobs
        .into_iter()
        .map(|b| BlobStatus {
            source_id: b.source_id,
            status: parse_status(&b.status),
            started_at: b.started_at,
            last_updated_at: b.last_updated_at,
            error_code: b.error_code,
            failure_status: b.failure_status.as_deref().map(parse_failure_status),
            details: b.details,
        })
        .collect();

    Ok(StatusResponse { blobs, aggregate: None })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_terminal_and_in_progress_blobs() {
        let body = br#"{"blobs":[
            {"sourceId":"a","status":"Succeeded","startedAt":"2026-01-01T00:00:00Z","lastUpdatedAt":"2026-01-01T00:00:01Z"},
            {"sourceId":"b","status":"InProgress","startedAt":"2026-01-01T00:00:00Z","lastUpdatedAt":"2026-01-01T00:00:01Z"}
        ]}"#;
        let parsed = parse_status_response(body, true).unwrap();
        assert_eq!(parsed.blobs.len(), 2);
        assert!(parsed.blobs[0].status.is_terminal());
        assert!(!parsed.blobs[1].status.is_terminal());
    }

    #[test]
    fn parses_failure_status() {
        let body = br#"{"blobs":[
            {"sourceId":"a","status":"Failed","startedAt":"2026-01-01T00:00:00Z","lastUpdatedAt":"2026-01-01T00:00:01Z","failureStatus":"Permanent","errorCode":"BadRequest"}
        ]}"#;
        let parsed = parse_status_response(body, true).unwrap();
        assert_eq!(parsed.blobs[0].failure_status, Some(FailureStatus::Permanent));
        assert_eq!(parsed.blobs[0].error_code.as_deref(), Some("BadRequest"));
    }

    #[test]
    fn parses_the_aggregate_shape_with_no_blobs_key() {
        let body = br#"{"succeeded":3,"failed":1,"inProgress":2,"canceled":0}"#;
        let parsed = parse_status_response(body, false).unwrap();
        assert!(parsed.blobs.is_empty());
        assert_eq!(
            parsed.aggregate,
            Some(Status { succeeded: 3, failed: 1, in_progress: 2, canceled: 0 })
        );
        assert_eq!(parsed.to_status(), Status { succeeded: 3, failed: 1, in_progress: 2, canceled: 0 });
    }
}
