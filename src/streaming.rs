//! C6 StreamingEngine (spec.md §4.6 "Streaming ingestion").
//!
//! Encodes one source's body, posts it straight to the engine's streaming
//! endpoint, and turns the HTTP response (success or the
//! `@type`/`@message`/`@failureCode`/`@permanent` error envelope from
//! spec.md §4.6) into an `IngestError`. No status tracking exists on this
//! path, matching spec.md: "the streaming path has no asynchronous status
//! to poll".

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::collaborators::EngineClient;
use crate::compression::Compressor;
use crate::config::ClientConfig;
use crate::error::{IngestError, Result};
use crate::model::{
    CompressionType, Format, IngestRequestProperties, IngestionOperation, IngestionSource, LocalSource,
    ServerErrorEnvelope, Status, StatusResponse,
};

/// Per-format/compression multiplier against `streaming_max_body_size`
/// (spec.md §4.6's factor table), consolidating the dual row-store
/// size-factor tables spec.md §9's Open Question leaves unresolved into
/// one canonical lookup (see DESIGN.md: "the factor table is canonical").
fn max_body_size_factor(format: Format, compression: CompressionType) -> f64 {
    let compressed = matches!(compression, CompressionType::Gzip | CompressionType::Zip);
    match (format, compressed) {
        (Format::Csv, false) => 0.45,
        (Format::Csv, true) => 3.6,
        (Format::Tsv | Format::Psv, false) => 1.0,
        (Format::Tsv | Format::Psv, true) => 1.5,
        (Format::Json, false) => 0.33,
        (Format::Json, true) => 3.6,
        (Format::Multijson, false) => 1.0,
        (Format::Multijson, true) => 5.15,
        (Format::Txt, false) => 0.15,
        (Format::Txt, true) => 1.8,
        (Format::Avro | Format::Apacheavro, false) => 0.55,
        (Format::Avro | Format::Apacheavro, true) => 1.0,
        (Format::Parquet, false) => 3.35,
        (Format::Parquet, true) => 1.0,
        (_, _) => 1.0,
    }
}

pub struct StreamingEngine {
    engine: Arc<dyn EngineClient>,
    compressor: Arc<dyn Compressor>,
    config: ClientConfig,
}

#[derive(Serialize)]
struct SourceUriBody<'a> {
    #[serde(rename = "SourceUri")]
    source_uri: &'a str,
}

impl StreamingEngine {
    pub fn new(engine: Arc<dyn EngineClient>, compressor: Arc<dyn Compressor>, config: ClientConfig) -> Self {
        StreamingEngine { engine, compressor, config }
    }

    /// Accepts either a local source (read fully into memory, optionally
    /// gzipped) or an already-staged blob (dispatched by reference) — both
    /// are valid streaming sources per spec.md §4.6's "Body encoding" and
    /// §8 scenario S1 ("Streaming blob passthrough").
    ///
    /// spec.md §4's cancellation contract: a cancelled `cancel` token fails
    /// `Cancelled` before the request is ever posted, since streaming has
    /// no asynchronous stage to abort mid-flight.
    pub async fn ingest(
        &self,
        database: &str,
        table: &str,
        source: IngestionSource,
        properties: &IngestRequestProperties,
        cancel: Option<&CancellationToken>,
    ) -> Result<IngestionOperation> {
        if let Some(token) = cancel {
            if token.is_cancelled() {
                return Err(IngestError::Cancelled);
            }
        }
        properties.validate()?;
        let source_id = source.source_id().to_string();
        let format = source.format();

        match LocalSource::try_from(source) {
            Err(IngestionSource::Blob { blob_url, compression_type, exact_size, .. }) => {
                self.check_size_limit(&source_id, format, compression_type, exact_size, properties)?;

                let body = serde_json::to_vec(&SourceUriBody { source_uri: &blob_url })
                    .map_err(IngestError::Serialization)?;
                let response = self
                    .engine
                    .post_streaming(
                        database,
                        table,
                        format.as_stream_format(),
                        properties.ingestion_mapping_reference.as_deref(),
                        "application/json",
                        None,
                        Some("uri"),
                        Bytes::from(body),
                    )
                    .await?;
                self.handle_response(response, database, table)
            }
            Ok(local) => {
                let should_compress = local.should_compress();
                let body = self.encode(local, should_compress, &source_id).await?;
                let effective_compression = if should_compress { CompressionType::Gzip } else { CompressionType::None };
                self.check_size_limit(&source_id, format, effective_compression, Some(body.len() as u64), properties)?;

                let content_encoding = if should_compress { Some("gzip") } else { None };
                let response = self
                    .engine
                    .post_streaming(
                        database,
                        table,
                        format.as_stream_format(),
                        properties.ingestion_mapping_reference.as_deref(),
                        "application/octet-stream",
                        content_encoding,
                        None,
                        body,
                    )
                    .await?;
                self.handle_response(response, database, table)
            }
            Err(_) => unreachable!("try_from only fails for the Blob variant"),
        }
    }

    /// spec.md §4.6 "Getting status": streaming has no server-side
    /// tracking, so these always return empty records and never error,
    /// regardless of what `operation` actually refers to.
    pub async fn get_operation_summary(&self) -> Result<Status> {
        Ok(Status::default())
    }

    pub async fn get_operation_details(&self) -> Result<StatusResponse> {
        Ok(StatusResponse::default())
    }

    fn check_size_limit(
        &self,
        source_id: &str,
        format: Format,
        compression: CompressionType,
        size: Option<u64>,
        properties: &IngestRequestProperties,
    ) -> Result<()> {
        let Some(size) = size else { return Ok(()) };
        let limit = (self.config.streaming_max_body_size as f64 * max_body_size_factor(format, compression)) as u64;
        if !properties.ignore_size_limit() && size > limit {
            return Err(IngestError::RequestTooLarge { actual: size, limit });
        }
        let _ = source_id;
        Ok(())
    }

    fn handle_response(
        &self,
        response: crate::collaborators::EngineResponse,
        database: &str,
        table: &str,
    ) -> Result<IngestionOperation> {
        if (200..300).contains(&response.status_code) {
            // Streaming has no server-side tracking; the operation id is
            // client-generated purely for symmetry with the queued path
            // (spec.md §4.6: "the id is client-generated for symmetry").
            return Ok(IngestionOperation::new_streaming(database, table));
        }
        Err(parse_streaming_error(response.status_code, &response.body))
    }

    async fn encode(&self, source: LocalSource, should_compress: bool, source_id: &str) -> Result<Bytes> {
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

/// spec.md §4.6 "Response handling": a 404 is *permanent* on the streaming
/// path ("404: permanent `EndpointNotFound`"). A parseable error envelope is
/// classified by its `@permanent` flag (falling back to the HTTP status
/// class when absent); a body that fails to parse is also permanent
/// ("`RequestError` (permanent) if `@permanent==true` or parsing failed").
fn parse_streaming_error(status_code: u16, body: &Bytes) -> IngestError {
    if status_code == 404 {
        return IngestError::EndpointNotFound { endpoint: "engine streaming endpoint".into(), permanent: true };
    }

    match serde_json::from_slice::<ServerErrorEnvelope>(body) {
        Ok(envelope) => {
            let message = envelope.error.at_message.or(envelope.error.message).unwrap_or_default();
            let code = envelope.error.code;
            let error_type = envelope.error.at_type;
            let failure_code = envelope.error.at_failure_code;
            let permanent = envelope.error.at_permanent.unwrap_or(status_code < 500);
            if permanent {
                IngestError::RequestError { message, code, error_type, failure_code }
            } else {
                IngestError::ServiceError { message, code, error_type, failure_code }
            }
        }
        Err(_) => IngestError::RequestError {
            message: format!("engine returned status {status_code} with an unparseable error body"),
            code: None,
            error_type: None,
            failure_code: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_limit_matches_the_spec_factor_table() {
        assert_eq!(max_body_size_factor(Format::Csv, CompressionType::None), 0.45);
        assert_eq!(max_body_size_factor(Format::Csv, CompressionType::Gzip), 3.6);
        assert_eq!(max_body_size_factor(Format::Json, CompressionType::None), 0.33);
        assert_eq!(max_body_size_factor(Format::Multijson, CompressionType::Gzip), 5.15);
        assert_eq!(max_body_size_factor(Format::Txt, CompressionType::None), 0.15);
        assert_eq!(max_body_size_factor(Format::Parquet, CompressionType::None), 3.35);
        assert_eq!(max_body_size_factor(Format::Parquet, CompressionType::Gzip), 1.0);
        assert_eq!(max_body_size_factor(Format::W3clogfile, CompressionType::None), 1.0);
    }

    #[test]
    fn not_found_status_maps_to_a_permanent_endpoint_not_found() {
        let err = parse_streaming_error(404, &Bytes::new());
        assert!(matches!(err, IngestError::EndpointNotFound { .. }));
        assert!(err.is_permanent());
    }

    #[test]
    fn unparseable_error_body_is_treated_as_permanent() {
        let err = parse_streaming_error(400, &Bytes::from_static(b"not json"));
        assert!(matches!(err, IngestError::RequestError { .. }));
        assert!(err.is_permanent());
    }

    #[test]
    fn permanent_envelope_flag_produces_request_error() {
        let body = Bytes::from_static(
            br#"{"error":{"code":"BadRequest","@message":"bad mapping","@permanent":true}}"#,
        );
        let err = parse_streaming_error(400, &body);
        assert!(matches!(err, IngestError::RequestError { .. }));
        assert!(err.is_permanent());
    }

    #[test]
    fn transient_envelope_flag_produces_service_error() {
        let body = Bytes::from_static(
            br#"{"error":{"code":"Throttled","@message":"try later","@permanent":false}}"#,
        );
        let err = parse_streaming_error(429, &body);
        assert!(matches!(err, IngestError::ServiceError { .. }));
        assert!(!err.is_permanent());
    }

    #[test]
    fn csv_body_over_the_scaled_limit_is_rejected_before_transmission() {
        // S2: 4 MiB * 0.45 = 1.8 MiB; a 5 MiB uncompressed csv body exceeds it.
        let config = ClientConfig::default();
        let limit = (config.streaming_max_body_size as f64 * max_body_size_factor(Format::Csv, CompressionType::None)) as u64;
        assert_eq!(limit, (4 * 1024 * 1024) * 45 / 100);
        assert!(5 * 1024 * 1024 > limit);
    }
}
