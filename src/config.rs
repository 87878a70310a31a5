//! Run configuration
//!
//! [`ConnectionConfig`] is built once per run from CLI flags and environment,
//! and is passed explicitly into every component that needs it.

use clap::ValueEnum;
use eyre::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Rows the bounded queue between transform and sink can hold
pub const QUEUE_CAPACITY: usize = 10_000;

/// Write buffer of the CSV sink, 200 MiB
pub const BUFFER_SIZE: usize = 200 * 1024 * 1024;

/// Records accumulated before the Kinesis sink puts a batch
pub const KINESIS_BATCH_SIZE: usize = 1000;

/// Placeholder substituted with the table name in a stream name template
pub const TABLE_NAME_PLACEHOLDER: &str = "{TABLE_NAME}";

/// Region used when none is configured
pub const DEFAULT_REGION: &str = "us-east-1";

/// Destination kind for exported rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum SinkType {
    /// Local `<table>.csv` files
    Csv,
    /// Gzipped CSV plus schema artifacts uploaded to S3
    #[default]
    S3,
    /// JSON records put to a Kinesis stream
    Kinesis,
}

impl std::fmt::Display for SinkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Csv => write!(f, "csv"),
            Self::S3 => write!(f, "s3"),
            Self::Kinesis => write!(f, "kinesis"),
        }
    }
}

/// Database connection and run settings
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub user: String,
    pub port: Option<u16>,
    pub database: String,
    /// Local directory receiving CSV files
    pub destination: PathBuf,
    /// Maximum tables exported at once
    pub concurrency: usize,
    /// Use one worker slot per table instead of `concurrency`
    pub match_tables: bool,
    /// Tables moved to the front of the export order
    pub priority: Vec<String>,
    /// Tables never exported
    pub exclude: Vec<String>,
    pub sink: SinkType,
    pub buffer_size: usize,
    pub batch_size: usize,
    pub aws: AwsConfig,
    pub kinesis: Option<KinesisConfig>,
    pub s3: Option<S3Config>,
}

impl ConnectionConfig {
    /// A configuration with defaults for everything but the connection target
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        database: impl Into<String>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            port: None,
            database: database.into(),
            destination: destination.into(),
            concurrency: 10,
            match_tables: false,
            priority: Vec::new(),
            exclude: Vec::new(),
            sink: SinkType::Csv,
            buffer_size: BUFFER_SIZE,
            batch_size: KINESIS_BATCH_SIZE,
            aws: AwsConfig::default(),
            kinesis: None,
            s3: None,
        }
    }

    /// Check the settings required by the selected sink are present
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() || self.user.is_empty() || self.database.is_empty() {
            bail!("host, user and database are required");
        }
        if !self.match_tables && self.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        match self.sink {
            SinkType::S3 if self.s3.is_none() => {
                bail!("the s3 sink requires S3_BUCKET to be set")
            }
            SinkType::Kinesis if self.kinesis.is_none() => {
                bail!("the kinesis sink requires --kinesis-stream")
            }
            _ => Ok(()),
        }
    }
}

/// AWS session settings shared by the S3 and Kinesis clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsConfig {
    pub region: String,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
        }
    }
}

/// Kinesis destination settings
#[derive(Debug, Clone, PartialEq)]
pub struct KinesisConfig {
    /// Stream name, optionally containing `{TABLE_NAME}`
    pub stream_name: String,
    /// Endpoint override, e.g. a local Kinesis emulator
    pub endpoint: Option<Url>,
    pub shard_count: i32,
    pub retry: RetryPolicy,
}

impl KinesisConfig {
    pub fn new(stream_name: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            endpoint: None,
            shard_count: 1,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Result<Self> {
        let url = Url::parse(endpoint)
            .with_context(|| format!("Invalid Kinesis endpoint: {}", endpoint))?;
        self.endpoint = Some(url);
        Ok(self)
    }

    /// Stream for `table`, substituting the placeholder when present
    pub fn stream_for(&self, table: &str) -> String {
        self.stream_name.replace(TABLE_NAME_PLACEHOLDER, table)
    }
}

/// How often failed records are put again during one batch flush
///
/// The default retries until every record is accepted, without delay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after a put with failed records, `None` for unbounded
    pub max_retries: Option<u32>,
    /// Pause between a partially failed put and the retry
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn bounded(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries: Some(max_retries),
            backoff,
        }
    }

    /// Whether another retry is allowed after `retries` have been made
    pub fn allows(&self, retries: u32) -> bool {
        self.max_retries.is_none_or(|max| retries < max)
    }
}

/// S3 destination settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Config {
    pub bucket: String,
    /// Key prefix in front of the date partition
    pub prefix: String,
}

impl S3Config {
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }
}

/// Table ordering lists kept in a YAML file
///
/// ```yaml
/// priority:
///   - orders
/// exclude:
///   - audit_log
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableLists {
    #[serde(default)]
    pub priority: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl TableLists {
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read table lists: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse table lists: {}", path.display()))
    }

    /// Append entries not already present in `priority`/`exclude`
    pub fn merge_into(self, priority: &mut Vec<String>, exclude: &mut Vec<String>) {
        for name in self.priority {
            if !priority.contains(&name) {
                priority.push(name);
            }
        }
        for name in self.exclude {
            if !exclude.contains(&name) {
                exclude.push(name);
            }
        }
    }
}
