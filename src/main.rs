use clap::{Args, Parser, Subcommand, builder::styling};
use eyre::{Result, bail};
use owo_colors::OwoColorize;
use skrape::{
    cli::{aws_region_from_env, check_binary, export_tables, list_tables, print_schema, s3_config_from_env},
    config::{
        AwsConfig, BUFFER_SIZE, ConnectionConfig, KINESIS_BATCH_SIZE, KinesisConfig, RetryPolicy,
        SinkType, TableLists,
    },
};
use std::path::PathBuf;
use std::time::Duration;

// CLI Styling
const STYLES: styling::Styles = styling::Styles::styled()
    .header(styling::AnsiColor::BrightWhite.on_default())
    .usage(styling::AnsiColor::BrightWhite.on_default())
    .literal(styling::AnsiColor::Green.on_default())
    .placeholder(styling::AnsiColor::Cyan.on_default());

/// skrape: dump MySQL tables into CSV files, gzipped CSV on S3, or a Kinesis stream
#[derive(Parser)]
#[command(name = "skrape", version, styles = STYLES)]
struct Cli {
    /// The dotenv file to source credentials from
    #[arg(short, long, global = true, default_value = ".env")]
    env: String,

    /// More verbose logging
    #[arg(long, global = true)]
    debug: bool,

    /// Command to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export every selected table to the chosen sink
    Export {
        #[command(flatten)]
        connection: ConnectionArgs,

        #[command(flatten)]
        selection: SelectionArgs,

        #[command(flatten)]
        export: ExportArgs,
    },

    /// Print the tables an export would process, in order
    Tables {
        #[command(flatten)]
        connection: ConnectionArgs,

        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Print the schema and JSON paths of a table
    Schema {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// Table to describe
        table: String,
    },

    /// Verify the mysqldump binary is present and recent enough
    Check {
        /// Directory containing mysqldump, or the binary itself
        #[arg(long)]
        mysqldump_path: Option<PathBuf>,
    },
}

#[derive(Args)]
struct ConnectionArgs {
    /// Database host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Database user; the password comes from MYSQL_PASSWORD
    #[arg(short, long, default_value = "root")]
    user: String,

    /// Database port
    #[arg(long)]
    port: Option<u16>,

    /// Database to export
    #[arg(short, long)]
    database: String,
}

#[derive(Args)]
struct SelectionArgs {
    /// Comma-separated tables to export first, in this order
    #[arg(long, value_delimiter = ',')]
    priority: Vec<String>,

    /// Comma-separated tables to skip
    #[arg(long, value_delimiter = ',')]
    exclude: Vec<String>,

    /// YAML file with `priority` and `exclude` lists
    #[arg(long)]
    tables_file: Option<PathBuf>,
}

#[derive(Args)]
struct ExportArgs {
    /// Directory for local CSV files
    #[arg(long, default_value = ".")]
    destination: PathBuf,

    /// Tables exported at once
    #[arg(short, long, default_value_t = 10)]
    concurrency: usize,

    /// Export all tables at once, one worker per table
    #[arg(long = "match")]
    match_tables: bool,

    /// Where exported rows go
    #[arg(long, value_enum, default_value_t = SinkType::S3)]
    sink: SinkType,

    /// CSV write buffer in bytes
    #[arg(long, default_value_t = BUFFER_SIZE)]
    buffer_size: usize,

    /// Records per Kinesis batch
    #[arg(long, default_value_t = KINESIS_BATCH_SIZE)]
    batch_size: usize,

    /// Directory containing mysqldump, or the binary itself
    #[arg(long)]
    mysqldump_path: Option<PathBuf>,

    /// Kinesis stream name; `{TABLE_NAME}` is replaced per table
    #[arg(long)]
    kinesis_stream: Option<String>,

    /// Kinesis endpoint override
    #[arg(long)]
    kinesis_endpoint: Option<String>,

    /// Shards for streams created by the export
    #[arg(long, default_value_t = 1)]
    kinesis_shards: i32,

    /// AWS region, defaults to AWS_REGION or us-east-1
    #[arg(long)]
    aws_region: Option<String>,

    /// Give up after this many retries of failed Kinesis records
    #[arg(long)]
    max_put_retries: Option<u32>,

    /// Pause between Kinesis retries in milliseconds
    #[arg(long, default_value_t = 0)]
    put_backoff_ms: u64,
}

impl ConnectionArgs {
    fn into_config(self, destination: PathBuf) -> ConnectionConfig {
        let mut conn = ConnectionConfig::new(self.host, self.user, self.database, destination);
        conn.port = self.port;
        conn
    }
}

impl SelectionArgs {
    fn apply(self, conn: &mut ConnectionConfig) -> Result<()> {
        conn.priority = self.priority;
        conn.exclude = self.exclude;
        if let Some(path) = self.tables_file {
            TableLists::read(&path)?.merge_into(&mut conn.priority, &mut conn.exclude);
        }
        Ok(())
    }
}

impl ExportArgs {
    fn apply(self, conn: &mut ConnectionConfig) -> Result<()> {
        conn.concurrency = self.concurrency;
        conn.match_tables = self.match_tables;
        conn.sink = self.sink;
        conn.buffer_size = self.buffer_size;
        conn.batch_size = self.batch_size;

        let region = self.aws_region.or_else(aws_region_from_env);
        if let Some(region) = region {
            conn.aws = AwsConfig { region };
        }
        conn.s3 = s3_config_from_env();

        if let Some(stream) = self.kinesis_stream {
            let mut kinesis = KinesisConfig::new(stream);
            if let Some(endpoint) = &self.kinesis_endpoint {
                kinesis = kinesis.with_endpoint(endpoint)?;
            }
            kinesis.shard_count = self.kinesis_shards;
            kinesis.retry = RetryPolicy {
                max_retries: self.max_put_retries,
                backoff: Duration::from_millis(self.put_backoff_ms),
            };
            conn.kinesis = Some(kinesis);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match dotenvy::from_filename(&cli.env) {
        Ok(_) => {}
        Err(e) if e.not_found() => {}
        Err(e) => return Err(e.into()),
    }

    let log_level = match cli.debug {
        true => "debug",
        false => "info",
    };
    let env = env_logger::Env::default().filter_or("LOG_LEVEL", log_level);
    env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .init();

    match cli.command {
        Commands::Export {
            connection,
            selection,
            export,
        } => {
            let binary = check_binary(export.mysqldump_path.as_deref()).await?;
            let mut conn = connection.into_config(export.destination.clone());
            selection.apply(&mut conn)?;
            export.apply(&mut conn)?;

            let report = export_tables(conn, binary).await?;
            if !report.is_success() {
                for (table, _) in &report.failed {
                    log::error!("Failed: {}", table.red());
                }
                bail!(
                    "{} of {} tables failed to export",
                    report.failed.len(),
                    report.total()
                );
            }
        }
        Commands::Tables {
            connection,
            selection,
        } => {
            let mut conn = connection.into_config(PathBuf::from("."));
            selection.apply(&mut conn)?;
            for table in list_tables(&conn).await? {
                println!("{}", table);
            }
        }
        Commands::Schema { connection, table } => {
            let conn = connection.into_config(PathBuf::from("."));
            println!("{}", print_schema(&conn, &table).await?);
        }
        Commands::Check { mysqldump_path } => {
            let binary = check_binary(mysqldump_path.as_deref()).await?;
            log::info!("{} is ready", binary.path().display().green());
        }
    }

    Ok(())
}
