//! Private option file handed to the dump process

use eyre::{Context, Result};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// A `[client]` option file holding the database password
///
/// Readable by the owner only, and removed when dropped.
#[derive(Debug)]
pub struct DefaultsFile {
    file: NamedTempFile,
}

impl DefaultsFile {
    pub fn create(password: &str) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("skrape-")
            .suffix(".cnf")
            .tempfile()
            .context("Failed to create the credentials file")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }

        write!(file, "[client]\npassword={}\n", password)?;
        file.flush()?;
        log::debug!("Wrote credentials to {}", file.path().display());
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}
