//! S3 sink: the CSV sink plus a gzip upload and schema artifacts

use super::CsvSink;
use crate::etl::Sink;
use crate::schema::Catalog;
use crate::storage::{ArtifactFiles, ObjectUploader, S3Layout, gzip_upload};
use eyre::{Context, Result};
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::sync::Arc;

/// Buffers rows into a local CSV file and ships it to S3 on finish
///
/// On finish the CSV file is gzipped into `<date>/data/`, then the table's
/// schema and JSON paths go to `<date>/schemas/` and `<date>/paths/`. Local
/// files are removed once uploaded. Any upload failure fails the table.
pub struct S3Sink<U, C> {
    csv: CsvSink,
    table: String,
    layout: S3Layout,
    artifacts: ArtifactFiles,
    uploader: Arc<U>,
    catalog: Arc<C>,
}

impl<U: ObjectUploader, C: Catalog> S3Sink<U, C> {
    pub fn new(
        csv: CsvSink,
        table: impl Into<String>,
        layout: S3Layout,
        artifact_dir: impl Into<PathBuf>,
        uploader: Arc<U>,
        catalog: Arc<C>,
    ) -> Self {
        let table = table.into();
        let artifacts = ArtifactFiles::new(artifact_dir.into(), &table);
        Self {
            csv,
            table,
            layout,
            artifacts,
            uploader,
            catalog,
        }
    }

    async fn upload_data(&mut self) -> Result<()> {
        self.csv.close_file().await?;

        let key = self.layout.data_key(&self.table);
        log::info!("Uploading {} to {}", self.table.cyan(), key.bright_black());
        gzip_upload(self.uploader.as_ref(), self.csv.path(), &key).await?;

        tokio::fs::remove_file(self.csv.path())
            .await
            .with_context(|| format!("Failed to remove {}", self.csv.path().display()))?;
        Ok(())
    }

    async fn upload_schema(&self) -> Result<()> {
        let (schema, paths) = self
            .catalog
            .table_schema(&self.table)
            .await
            .with_context(|| format!("Failed to fetch the schema of {}", self.table))?;
        let (schema_body, paths_body) = self.artifacts.write(&schema, &paths).await?;

        let schema_key = self.layout.schema_key(&self.table);
        self.uploader
            .put_object(&schema_key, schema_body)
            .await
            .with_context(|| format!("Failed to upload {}", schema_key))?;

        let paths_key = self.layout.paths_key(&self.table);
        self.uploader
            .put_object(&paths_key, paths_body)
            .await
            .with_context(|| format!("Failed to upload {}", paths_key))?;

        self.artifacts.remove().await
    }
}

impl<U, C> Sink for S3Sink<U, C>
where
    U: ObjectUploader + 'static,
    C: Catalog + 'static,
{
    async fn write(&mut self, payload: Vec<u8>) -> Result<()> {
        self.csv.write(payload).await
    }

    async fn finish(&mut self) -> Result<()> {
        self.csv.finish_file().await?;
        self.upload_data().await?;
        self.upload_schema().await?;
        log::debug!("Uploaded {} rows of {}", self.csv.rows(), self.table);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.csv.close_file().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, Schema};
    use crate::storage::ChunkReceiver;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct MemoryUploader {
        objects: Mutex<BTreeMap<String, Vec<u8>>>,
    }

    impl ObjectUploader for MemoryUploader {
        async fn upload_stream(&self, key: &str, mut chunks: ChunkReceiver) -> Result<u64> {
            let mut body = Vec::new();
            while let Some(chunk) = chunks.recv().await {
                body.extend(chunk?);
            }
            let len = body.len() as u64;
            self.objects.lock().unwrap().insert(key.to_string(), body);
            Ok(len)
        }

        async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<()> {
            self.objects.lock().unwrap().insert(key.to_string(), body);
            Ok(())
        }
    }

    struct OneTable;

    impl Catalog for OneTable {
        async fn tables(&self) -> Result<Vec<String>> {
            Ok(vec!["t".to_string()])
        }

        async fn schema(&self, _table: &str) -> Result<Schema> {
            Ok(Schema::new(vec![
                Field::new("id", "int(11)", false),
                Field::new("name", "varchar(10)", true),
            ]))
        }
    }

    #[tokio::test]
    async fn test_finish_uploads_data_and_artifacts() {
        let temp = TempDir::new().unwrap();
        let csv_path = temp.path().join("t.csv");
        let csv = CsvSink::create(&csv_path, 1024).await.unwrap();
        let uploader = Arc::new(MemoryUploader::default());
        let layout = S3Layout::for_date("exports", NaiveDate::from_ymd_opt(2024, 1, 31).unwrap());

        let mut sink = S3Sink::new(csv, "t", layout, temp.path(), uploader.clone(), Arc::new(OneTable));
        sink.write("1,'x'".into()).await.unwrap();
        sink.write("2,'y'".into()).await.unwrap();
        sink.finish().await.unwrap();
        sink.close().await.unwrap();

        let objects = uploader.objects.lock().unwrap();
        let keys: Vec<&str> = objects.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "exports/2024/01/31/data/t.csv.gz",
                "exports/2024/01/31/paths/tpaths.json",
                "exports/2024/01/31/schemas/t.json",
            ]
        );

        let paths: serde_json::Value =
            serde_json::from_slice(&objects["exports/2024/01/31/paths/tpaths.json"]).unwrap();
        assert_eq!(paths["jsonpaths"][1], "$['name']");

        assert!(!csv_path.exists());
        assert!(!temp.path().join("t.json").exists());
        assert!(!temp.path().join("tpaths.json").exists());
    }
}
