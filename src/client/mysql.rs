//! MySQL catalog queries

use crate::config::ConnectionConfig;
use crate::schema::{Catalog, Field, Schema};
use eyre::{Context, Result, bail};
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts, OptsBuilder};

const TABLES_QUERY: &str = "SELECT TABLE_NAME FROM information_schema.TABLES \
     WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_NAME";

const COLUMNS_QUERY: &str = "SELECT COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE \
     FROM information_schema.COLUMNS \
     WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION";

/// [`Catalog`] backed by `information_schema`
///
/// Every call opens its own connection and closes it before returning.
#[derive(Debug, Clone)]
pub struct MySqlCatalog {
    opts: Opts,
    database: String,
}

impl MySqlCatalog {
    pub fn new(conn: &ConnectionConfig, password: Option<String>) -> Self {
        let mut builder = OptsBuilder::default()
            .ip_or_hostname(conn.host.clone())
            .user(Some(conn.user.clone()))
            .pass(password)
            .db_name(Some(conn.database.clone()));
        if let Some(port) = conn.port {
            builder = builder.tcp_port(port);
        }

        Self {
            opts: builder.into(),
            database: conn.database.clone(),
        }
    }

    async fn connect(&self) -> Result<Conn> {
        Conn::new(self.opts.clone())
            .await
            .with_context(|| format!("Failed to connect to MySQL database {}", self.database))
    }
}

impl Catalog for MySqlCatalog {
    async fn tables(&self) -> Result<Vec<String>> {
        let mut conn = self.connect().await?;
        let tables: Vec<String> = conn
            .exec(TABLES_QUERY, (self.database.as_str(),))
            .await
            .with_context(|| format!("Failed to list tables of {}", self.database))?;
        conn.disconnect().await?;

        log::debug!("Found {} tables in {}", tables.len(), self.database);
        Ok(tables)
    }

    async fn schema(&self, table: &str) -> Result<Schema> {
        let mut conn = self.connect().await?;
        let columns: Vec<(String, String, String)> = conn
            .exec(COLUMNS_QUERY, (self.database.as_str(), table))
            .await
            .with_context(|| format!("Failed to read the columns of {}", table))?;
        conn.disconnect().await?;

        if columns.is_empty() {
            bail!("Table {} has no columns in {}", table, self.database);
        }
        Ok(columns
            .into_iter()
            .map(|(name, sql_type, nullable)| {
                Field::new(name, sql_type, nullable.eq_ignore_ascii_case("YES"))
            })
            .collect())
    }
}
