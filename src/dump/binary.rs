//! Locating and verifying the `mysqldump` executable

use eyre::{Context, Result, bail, eyre};
use regex::Regex;
use semver::Version;
use std::path::{Path, PathBuf};

/// Typical install location on macOS
pub const MACOS_PATH: &str = "/usr/local/bin/mysqldump";

/// Typical install location on Linux
pub const LINUX_PATH: &str = "/usr/bin/mysqldump";

const BINARY_NAME: &str = "mysqldump";

/// Oldest supported `mysqldump` version (`Ver 10.13`)
pub const MIN_VERSION: Version = Version::new(10, 13, 0);

/// A resolved dump executable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpBinary {
    path: PathBuf,
}

impl DumpBinary {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Resolve the dump binary
    ///
    /// Order: the custom path (a directory holding `mysqldump` or the binary
    /// itself), the macOS location, the Linux location, then `mysqldump` on `PATH`.
    pub fn locate(custom: Option<&Path>) -> Self {
        if let Some(custom) = custom {
            let candidate = if custom.is_dir() {
                custom.join(BINARY_NAME)
            } else {
                custom.to_path_buf()
            };
            if candidate.exists() {
                return Self::new(candidate);
            }
            log::warn!(
                "Custom dump path {} not found, falling back to default locations",
                candidate.display()
            );
        }

        [MACOS_PATH, LINUX_PATH]
            .iter()
            .map(Path::new)
            .find(|p| p.exists())
            .map(Self::new)
            .unwrap_or_else(|| Self::new(BINARY_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `--version` and check the reported version is recent enough
    ///
    /// # Errors
    /// Returns an error if the binary cannot be run, its version cannot be
    /// read, or it is older than [`MIN_VERSION`].
    pub async fn verify(&self) -> Result<Version> {
        let output = tokio::process::Command::new(&self.path)
            .arg("--version")
            .output()
            .await
            .with_context(|| missing_binary_help(&self.path))?;

        let text = String::from_utf8_lossy(&output.stdout);
        let version = parse_version(&text)
            .ok_or_else(|| eyre!("Could not read a version from: {}", text.trim()))?;

        if version < MIN_VERSION {
            bail!(
                "{} {} found, {}.{} or greater is required",
                BINARY_NAME,
                version,
                MIN_VERSION.major,
                MIN_VERSION.minor
            );
        }
        log::debug!("{} {} at {}", BINARY_NAME, version, self.path.display());
        Ok(version)
    }
}

/// Extract `Ver <major>.<minor>` from `mysqldump --version` output
pub fn parse_version(text: &str) -> Option<Version> {
    let re = Regex::new(r"Ver ([0-9]{1,2})\.([0-9]{1,2})").ok()?;
    let caps = re.captures(text)?;
    let major = caps.get(1)?.as_str().parse().ok()?;
    let minor = caps.get(2)?.as_str().parse().ok()?;
    Some(Version::new(major, minor, 0))
}

fn missing_binary_help(path: &Path) -> String {
    format!(
        "Failed to run {}. mysqldump Ver {}.{} or greater is required; if it is \
         installed in a non-typical location, point to it with --mysqldump-path",
        path.display(),
        MIN_VERSION.major,
        MIN_VERSION.minor
    )
}
