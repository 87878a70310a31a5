//! skrape
//!
//! Exports MySQL tables by driving `mysqldump` once per table and streaming
//! its output into a CSV file, a gzipped upload to S3, or a Kinesis stream.

pub mod cli;
pub mod client;
pub mod config;
pub mod dump;
pub mod etl;
pub mod record;
pub mod schema;
pub mod sink;
pub mod storage;
pub mod tables;

// Re-exports for convenience
pub use config::{ConnectionConfig, SinkType};
pub use etl::{DumpTransform, Exporter, Sink, SinkFactory};
pub use schema::{Catalog, Field, Paths, Schema};
pub use tables::{Table, TableExport, TableHandler};
