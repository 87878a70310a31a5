//! Streaming gzip upload of local files

use async_compression::tokio::bufread::GzipEncoder;
use eyre::{Context, Result};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::sync::mpsc;

/// Bytes read from the compressor per chunk
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Compressed chunks buffered between compressor and uploader
const PIPE_DEPTH: usize = 16;

/// Receiving end of the compression pipe
///
/// An `Err` item means the producer failed and the upload must be abandoned.
pub type ChunkReceiver = mpsc::Receiver<std::io::Result<Vec<u8>>>;

/// Object storage the S3 sink uploads into
pub trait ObjectUploader: Send + Sync {
    /// Upload a body arriving in chunks, returning the number of bytes stored
    ///
    /// # Errors
    /// Returns an error if the storage rejects the upload or a chunk is an
    /// `Err`; a partially written object must not be left behind.
    fn upload_stream(
        &self,
        key: &str,
        chunks: ChunkReceiver,
    ) -> impl std::future::Future<Output = Result<u64>> + Send;

    /// Upload a small body in one request
    fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Gzip a local file and upload it under `key`
///
/// Compression and upload run side by side connected by a bounded pipe, so
/// memory use does not grow with the file size.
pub async fn gzip_upload<U: ObjectUploader>(uploader: &U, path: &Path, key: &str) -> Result<u64> {
    let file = File::open(path)
        .await
        .with_context(|| format!("Failed to open {} for upload", path.display()))?;
    let mut encoder = GzipEncoder::new(BufReader::new(file));
    let (tx, rx) = mpsc::channel(PIPE_DEPTH);

    let compress = async move {
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            match encoder.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(Ok(buf[..n].to_vec())).await.is_err() {
                        // uploader gave up, its error is reported instead
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    break;
                }
            }
        }
    };

    let ((), uploaded) = tokio::join!(compress, uploader.upload_stream(key, rx));
    let bytes = uploaded.with_context(|| format!("Failed to upload {}", key))?;
    log::debug!("Uploaded {} ({} bytes compressed)", key, bytes);
    Ok(bytes)
}
