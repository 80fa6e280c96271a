//! C4 Compressor (spec.md §4.5 "Compression").
//!
//! Sources arrive as `AsyncRead` streams (not buffers) so compression has
//! to wrap a stream rather than transform bytes in place; `async-compression`
//! is the ecosystem's answer to that (used the same way by `vector`'s sink
//! pipeline for gzip-over-`AsyncRead` body encoding), rather than hand
//! rolling a gzip writer.

use std::pin::Pin;

use async_compression::tokio::bufread::GzipEncoder;
use tokio::io::{AsyncRead, BufReader};

use crate::model::{BoxedAsyncRead, CompressionType};

/// Wraps a reader so its output bytes are compressed, or returns it
/// unchanged for `CompressionType::None` (spec.md: "Zip... stored but not
/// reproduced client-side", i.e. only gzip is ever generated here).
pub trait Compressor: Send + Sync {
    fn wrap(&self, reader: BoxedAsyncRead, compression: CompressionType) -> BoxedAsyncRead;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GzipCompressor;

impl Compressor for GzipCompressor {
    fn wrap(&self, reader: BoxedAsyncRead, compression: CompressionType) -> BoxedAsyncRead {
        match compression {
            CompressionType::Gzip => {
                let encoder = GzipEncoder::new(BufReader::new(reader));
                Box::pin(encoder) as Pin<Box<dyn AsyncRead + Send + Sync>>
            }
            CompressionType::None | CompressionType::Zip => reader,
        }
    }
}
