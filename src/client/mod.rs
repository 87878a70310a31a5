//! Clients for the services around an export
//!
//! - [`MySqlCatalog`]: table names and column metadata
//! - [`S3Uploader`] and [`KinesisClient`]: the remote destinations
//! - [`DefaultsFile`]: the credentials file read by the dump process

mod aws;
mod credentials;
mod mysql;

pub use aws::{KinesisClient, PART_SIZE, S3Uploader, load_sdk_config};
pub use credentials::DefaultsFile;
pub use mysql::MySqlCatalog;
