//! Object storage plumbing for the S3 sink
//!
//! This module handles:
//! - Date-partitioned object keys
//! - Streaming gzip compression into an uploader
//! - Schema and JSON-paths artifact files

mod artifacts;
mod layout;
mod upload;

pub use artifacts::ArtifactFiles;
pub use layout::S3Layout;
pub use upload::{CHUNK_SIZE, ChunkReceiver, ObjectUploader, gzip_upload};
