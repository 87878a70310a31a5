//! Table selection and the concurrency-bounded export run

use crate::etl::{ExportSummary, WorkerState};
use eyre::Result;
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// A table to export and where its local files go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    pub destination: PathBuf,
}

impl Table {
    pub fn new(name: impl Into<String>, destination: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            destination: destination.as_ref().to_path_buf(),
        }
    }

    /// `<destination>/<table>.csv`
    pub fn csv_path(&self) -> PathBuf {
        self.destination.join(format!("{}.csv", self.name))
    }
}

/// Move prioritized tables to the front
///
/// Prioritized tables keep the order of the priority list; the rest keep
/// their original order. Priority entries that are not tables are ignored.
///
/// # Example
/// ```
/// use skrape::tables::prioritize;
///
/// let tables = ["a", "b", "c", "d", "e"].map(String::from).to_vec();
/// let priority = ["b", "d"].map(String::from);
/// assert_eq!(prioritize(tables, &priority), ["b", "d", "a", "c", "e"]);
/// ```
pub fn prioritize(tables: Vec<String>, priority: &[String]) -> Vec<String> {
    let mut ordered: Vec<String> = Vec::with_capacity(tables.len());
    for name in priority {
        if tables.contains(name) && !ordered.contains(name) {
            ordered.push(name.clone());
        }
    }
    ordered.extend(tables.into_iter().filter(|name| !priority.contains(name)));
    ordered
}

/// Drop every table named in `exclude`
pub fn exclude(tables: Vec<String>, exclude: &[String]) -> Vec<String> {
    tables
        .into_iter()
        .filter(|name| !exclude.contains(name))
        .collect()
}

/// Worker slots for a run: the table count in match mode, else the configured limit
pub fn effective_concurrency(configured: usize, match_tables: bool, table_count: usize) -> usize {
    if match_tables {
        table_count.max(1)
    } else {
        configured.max(1)
    }
}

/// Exports one table; implemented by the per-table worker
pub trait TableExport: Send + Sync + 'static {
    fn export(&self, table: &Table) -> impl std::future::Future<Output = Result<ExportSummary>> + Send;
}

/// Per-table results of a run
#[derive(Debug, Default)]
pub struct RunReport {
    pub exported: Vec<ExportSummary>,
    pub failed: Vec<(String, eyre::Report)>,
}

impl RunReport {
    pub fn total(&self) -> usize {
        self.exported.len() + self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runs table exports under a counting semaphore
pub struct TableHandler<E> {
    exporter: Arc<E>,
    concurrency: usize,
}

impl<E: TableExport> TableHandler<E> {
    pub fn new(exporter: E, concurrency: usize) -> Self {
        Self {
            exporter: Arc::new(exporter),
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Export every table, at most `concurrency` at a time
    ///
    /// A slot is acquired before each worker starts and returned when the
    /// worker ends, however it ends. Failed tables are logged and recorded;
    /// they never stop sibling workers. Returns once every worker is done.
    pub async fn run(&self, tables: Vec<Table>) -> RunReport {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut workers = JoinSet::new();
        let mut report = RunReport::default();
        log::info!(
            "Exporting {} tables with {} workers",
            tables.len(),
            self.concurrency
        );

        for table in tables {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    report.failed.push((table.name, e.into()));
                    continue;
                }
            };
            let exporter = Arc::clone(&self.exporter);
            workers.spawn(async move {
                let result = exporter.export(&table).await;
                drop(permit);
                log::debug!("{}: {}", table.name, WorkerState::SlotReleased);
                (table.name, result)
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((_, Ok(summary))) => report.exported.push(summary),
                Ok((name, Err(e))) => {
                    log::error!("Export of {} failed: {:#}", name.cyan(), e);
                    report.failed.push((name, e));
                }
                Err(e) => {
                    log::error!("Export worker panicked: {}", e);
                    report.failed.push(("<unknown>".to_string(), e.into()));
                }
            }
        }

        log::info!(
            "Exported {} of {} tables",
            report.exported.len(),
            report.total()
        );
        report
    }
}
