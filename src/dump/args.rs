//! Dump invocation arguments

use crate::config::ConnectionConfig;
use std::path::Path;

/// Options that make the dump emit only data lines, one row per `INSERT`
///
/// `--skip-opt` turns off extended inserts, so each line holds one value tuple.
pub const DUMP_OPTIONS: [&str; 7] = [
    "--skip-opt",
    "--compact",
    "--no-create-db",
    "--no-create-info",
    "--quick",
    "--single-transaction",
    "--default-character-set=utf8",
];

/// Build the argument list for dumping one table
///
/// # Example
/// ```
/// use skrape::config::ConnectionConfig;
/// use skrape::dump::dump_args;
/// use std::path::Path;
///
/// let conn = ConnectionConfig::new("db.local", "reader", "shop", "/tmp/out");
/// let args = dump_args(&conn, Path::new("/tmp/my.cnf"), "orders");
/// assert_eq!(args.first().unwrap(), "--defaults-file=/tmp/my.cnf");
/// assert_eq!(args.last().unwrap(), "orders");
/// ```
pub fn dump_args(conn: &ConnectionConfig, defaults_file: &Path, table: &str) -> Vec<String> {
    let mut args = vec![
        format!("--defaults-file={}", defaults_file.display()),
        format!("--host={}", conn.host),
        format!("--user={}", conn.user),
    ];
    if let Some(port) = conn.port {
        args.push(format!("--port={}", port));
    }
    args.extend(DUMP_OPTIONS.iter().map(|s| s.to_string()));
    args.push(conn.database.clone());
    args.push(table.to_string());
    args
}
