//! Local CSV file sink

use crate::etl::Sink;
use eyre::{Context, Result, eyre};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Writes each payload as one line of `<destination>/<table>.csv`
///
/// The file is written through a large buffer that is flushed once less
/// than a tenth of it remains free, and always on finish.
#[derive(Debug)]
pub struct CsvSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    capacity: usize,
    rows: u64,
}

impl CsvSink {
    /// Create (or truncate) the CSV file
    ///
    /// # Errors
    /// Returns an error if the file cannot be created; the table cannot be
    /// exported without it.
    pub async fn create(path: impl Into<PathBuf>, capacity: usize) -> Result<Self> {
        let path = path.into();
        let file = File::create(&path)
            .await
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let capacity = capacity.max(1);
        log::debug!("Writing {} with a {} byte buffer", path.display(), capacity);

        Ok(Self {
            path,
            writer: Some(BufWriter::with_capacity(capacity, file)),
            capacity,
            rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| eyre!("{} is already closed", self.path.display()))
    }

    /// Flush everything buffered and sync the file to disk
    pub async fn finish_file(&mut self) -> Result<()> {
        let path = self.path.clone();
        let writer = self.writer()?;
        writer
            .flush()
            .await
            .with_context(|| format!("Failed to flush {}", path.display()))?;
        writer.get_ref().sync_all().await?;
        log::debug!("Flushed {} rows to {}", self.rows, path.display());
        Ok(())
    }

    /// Drop the file handle; later writes fail
    pub async fn close_file(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.shutdown().await?;
        }
        Ok(())
    }
}

impl Sink for CsvSink {
    async fn write(&mut self, payload: Vec<u8>) -> Result<()> {
        let capacity = self.capacity;
        let writer = self.writer()?;
        writer.write_all(&payload).await?;
        writer.write_all(b"\n").await?;

        if capacity - writer.buffer().len().min(capacity) < capacity / 10 {
            writer.flush().await?;
        }
        self.rows += 1;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.finish_file().await
    }

    async fn close(&mut self) -> Result<()> {
        self.close_file().await
    }
}
