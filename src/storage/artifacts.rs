//! Schema and JSON-paths artifacts written next to the exported data

use crate::schema::{Paths, Schema};
use eyre::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Local artifact files for one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFiles {
    pub schema: PathBuf,
    pub paths: PathBuf,
}

impl ArtifactFiles {
    /// `<dir>/<table>.json` and `<dir>/<table>paths.json`
    pub fn new(dir: impl AsRef<Path>, table: &str) -> Self {
        let dir = dir.as_ref();
        Self {
            schema: dir.join(format!("{}.json", table)),
            paths: dir.join(format!("{}paths.json", table)),
        }
    }

    /// Write both artifacts and return their encoded bodies
    pub async fn write(&self, schema: &Schema, paths: &Paths) -> Result<(Vec<u8>, Vec<u8>)> {
        let schema_body = write_json(&self.schema, schema).await?;
        let paths_body = write_json(&self.paths, paths).await?;
        Ok((schema_body, paths_body))
    }

    /// Delete both artifacts, ignoring files that are already gone
    pub async fn remove(&self) -> Result<()> {
        for path in [&self.schema, &self.paths] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to remove {}", path.display()));
                }
            }
        }
        Ok(())
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(value)?;
    tokio::fs::write(path, &body)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_artifact_shapes() {
        let temp = TempDir::new().unwrap();
        let schema = Schema::new(vec![
            Field::new("id", "int(11)", false),
            Field::new("name", "varchar(64)", true),
        ]);
        let files = ArtifactFiles::new(temp.path(), "users");

        let (schema_body, paths_body) = files.write(&schema, &schema.paths()).await.unwrap();

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&files.schema).unwrap()).unwrap();
        assert_eq!(
            written,
            json!({"fields": [
                {"name": "id", "type": "int(11)", "null": "NO"},
                {"name": "name", "type": "varchar(64)", "null": "YES"},
            ]})
        );
        assert_eq!(serde_json::from_slice::<serde_json::Value>(&schema_body).unwrap(), written);

        let paths: serde_json::Value = serde_json::from_slice(&paths_body).unwrap();
        assert_eq!(paths, json!({"jsonpaths": ["$['id']", "$['name']"]}));
        assert!(files.paths.ends_with("userspaths.json"));

        files.remove().await.unwrap();
        assert!(!files.schema.exists());
        assert!(!files.paths.exists());
        files.remove().await.unwrap();
    }
}
