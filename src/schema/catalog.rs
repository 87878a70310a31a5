//! Catalog trait for table enumeration and column metadata

use super::{Paths, Schema};
use eyre::Result;

/// Source of table names and column metadata for one database
///
/// Implementors talk to the database catalog. The exporter only relies on the
/// results: table names for the handler, and [`Schema`]/[`Paths`] for sinks
/// that need type information or schema artifacts.
///
/// # Example
/// ```no_run
/// use skrape::schema::{Catalog, Field, Schema};
/// use eyre::Result;
///
/// struct FixedCatalog;
///
/// impl Catalog for FixedCatalog {
///     async fn tables(&self) -> Result<Vec<String>> {
///         Ok(vec!["users".to_string()])
///     }
///
///     async fn schema(&self, _table: &str) -> Result<Schema> {
///         Ok(Schema::new(vec![Field::new("id", "int(11)", false)]))
///     }
/// }
/// ```
pub trait Catalog: Send + Sync {
    /// All base table names of the configured database, views excluded
    fn tables(&self) -> impl std::future::Future<Output = Result<Vec<String>>> + Send;

    /// Columns of `table` in catalog order
    ///
    /// # Errors
    /// Any catalog failure is an error; a table with unknown shape cannot be exported.
    fn schema(&self, table: &str) -> impl std::future::Future<Output = Result<Schema>> + Send;

    /// Schema plus its JSON paths list
    fn table_schema(
        &self,
        table: &str,
    ) -> impl std::future::Future<Output = Result<(Schema, Paths)>> + Send {
        async move {
            let schema = self.schema(table).await?;
            let paths = schema.paths();
            Ok((schema, paths))
        }
    }
}
