//! CLI helper functions

use crate::{
    client::{DefaultsFile, KinesisClient, MySqlCatalog, S3Uploader, load_sdk_config},
    config::{ConnectionConfig, S3Config, SinkType},
    dump::DumpBinary,
    etl::Exporter,
    schema::Catalog,
    sink::Destinations,
    tables::{RunReport, Table, TableHandler, effective_concurrency, exclude, prioritize},
};
use eyre::{Context, Result, eyre};
use owo_colors::OwoColorize;
use std::path::Path;
use std::sync::Arc;

/// Database password for the dump process and catalog queries
pub const PASSWORD_VAR: &str = "MYSQL_PASSWORD";

/// Bucket receiving S3 exports
pub const S3_BUCKET_VAR: &str = "S3_BUCKET";

/// Key prefix in front of the date partition
pub const S3_KEY_VAR: &str = "S3_KEY";

/// Region for the S3 and Kinesis clients
pub const AWS_REGION_VAR: &str = "AWS_REGION";

/// Read the database password from the environment
pub fn mysql_password() -> Option<String> {
    std::env::var(PASSWORD_VAR).ok()
}

/// S3 settings from the environment
///
/// Expected environment variables:
/// - S3_BUCKET: destination bucket (required for the s3 sink)
/// - S3_KEY: key prefix (optional, defaults to the bucket root)
pub fn s3_config_from_env() -> Option<S3Config> {
    let bucket = std::env::var(S3_BUCKET_VAR).ok().filter(|b| !b.is_empty())?;
    let prefix = std::env::var(S3_KEY_VAR).unwrap_or_default();
    Some(S3Config::new(bucket, prefix))
}

/// Region from the environment, if set
pub fn aws_region_from_env() -> Option<String> {
    std::env::var(AWS_REGION_VAR).ok().filter(|r| !r.is_empty())
}

/// Locate the dump binary and make sure it is recent enough
pub async fn check_binary(custom: Option<&Path>) -> Result<DumpBinary> {
    let binary = DumpBinary::locate(custom);
    let version = binary.verify().await?;
    log::info!(
        "Using {} ({})",
        binary.path().display().bright_black(),
        version.cyan()
    );
    Ok(binary)
}

/// Enumerate tables, prioritized and filtered per the configuration
pub async fn ordered_tables<C: Catalog>(catalog: &C, conn: &ConnectionConfig) -> Result<Vec<String>> {
    let tables = catalog
        .tables()
        .await
        .with_context(|| format!("Failed to enumerate the tables of {}", conn.database))?;
    let tables = prioritize(tables, &conn.priority);
    Ok(exclude(tables, &conn.exclude))
}

/// The tables an export would process, in order
pub async fn list_tables(conn: &ConnectionConfig) -> Result<Vec<String>> {
    let catalog = MySqlCatalog::new(conn, mysql_password());
    ordered_tables(&catalog, conn).await
}

/// Schema and JSON paths of `table` as pretty JSON
pub async fn print_schema(conn: &ConnectionConfig, table: &str) -> Result<String> {
    let catalog = MySqlCatalog::new(conn, mysql_password());
    let (schema, paths) = catalog.table_schema(table).await?;
    let doc = serde_json::json!({
        "schema": schema,
        "paths": paths,
    });
    Ok(serde_json::to_string_pretty(&doc)?)
}

/// Export every selected table to the configured sink
///
/// Table failures are logged and collected in the report; only setup
/// failures (credentials, catalog, clients) are returned as errors.
pub async fn export_tables(conn: ConnectionConfig, binary: DumpBinary) -> Result<RunReport> {
    conn.validate()?;
    let password = mysql_password().unwrap_or_default();
    let defaults = DefaultsFile::create(&password)?;
    let catalog = Arc::new(MySqlCatalog::new(&conn, Some(password)));

    let names = ordered_tables(catalog.as_ref(), &conn).await?;
    let concurrency = effective_concurrency(conn.concurrency, conn.match_tables, names.len());
    let tables: Vec<Table> = names
        .iter()
        .map(|name| Table::new(name, &conn.destination))
        .collect();

    tokio::fs::create_dir_all(&conn.destination)
        .await
        .with_context(|| format!("Failed to create {}", conn.destination.display()))?;

    let conn = Arc::new(conn);
    let mut destinations: Destinations<MySqlCatalog, S3Uploader, KinesisClient> =
        Destinations::new(Arc::clone(&conn), catalog);
    match conn.sink {
        SinkType::Csv => {}
        SinkType::S3 => {
            let s3 = conn.s3.as_ref().ok_or_else(|| eyre!("S3 settings are missing"))?;
            let sdk = load_sdk_config(&conn.aws).await;
            log::info!("Uploading to bucket {}", s3.bucket.cyan());
            destinations = destinations.with_uploader(Arc::new(S3Uploader::new(&sdk, &s3.bucket)));
        }
        SinkType::Kinesis => {
            let kinesis = conn
                .kinesis
                .as_ref()
                .ok_or_else(|| eyre!("Kinesis settings are missing"))?;
            let sdk = load_sdk_config(&conn.aws).await;
            destinations = destinations.with_streams(Arc::new(KinesisClient::new(&sdk, kinesis)));
        }
    }

    log::info!(
        "Exporting {} from {} to {}",
        conn.database.cyan(),
        conn.host.bright_black(),
        conn.sink.cyan()
    );
    let exporter = Exporter::new(Arc::clone(&conn), binary, defaults.path(), destinations);
    let report = TableHandler::new(exporter, concurrency).run(tables).await;

    drop(defaults);
    Ok(report)
}
