use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use duckdb::Connection;
use duckdb::types::Value as DuckValue;
use serde_json::Value;
use tracing::{debug, warn};

use crate::dataset::{
    discover_parquet_tables, load_spatial, open_in_memory, register_views, value_to_json,
};

pub(crate) type ResultRow = Vec<Value>;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum QueryOutcome {
    Success {
        rows: Vec<ResultRow>,
        elapsed: Duration,
    },
    Timeout,
    ExecutionError(String),
}

/// Executes gold SQL against the Parquet views of the dataset, one
/// statement at a time.
pub(crate) struct QueryRunner {
    connection: Connection,
}

impl QueryRunner {
    pub(crate) fn open(data_dir: &Path, spatial: bool) -> Result<Self> {
        let connection = open_in_memory()?;
        if spatial {
            load_spatial(&connection);
        }
        let tables = discover_parquet_tables(data_dir)?;
        if tables.is_empty() {
            warn!(dir = %data_dir.display(), "no parquet files found");
        }
        register_views(&connection, &tables)?;
        Ok(Self { connection })
    }

    #[cfg(test)]
    pub(crate) fn with_connection(connection: Connection) -> Self {
        Self { connection }
    }

    /// Runs `sql` and collects every row. A watchdog thread interrupts the
    /// connection once `deadline` passes; an interrupted statement is
    /// reported as [`QueryOutcome::Timeout`].
    pub(crate) fn run_with_deadline(&self, sql: &str, deadline: Duration) -> QueryOutcome {
        let interrupt = self.connection.interrupt_handle();
        let fired = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let watchdog = {
            let fired = Arc::clone(&fired);
            thread::spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = done_rx.recv_timeout(deadline) {
                    fired.store(true, Ordering::SeqCst);
                    interrupt.interrupt();
                }
            })
        };

        let started = Instant::now();
        let result = self.collect_rows(sql);
        let elapsed = started.elapsed();

        let _ = done_tx.send(());
        let _ = watchdog.join();

        match result {
            Ok(rows) => QueryOutcome::Success { rows, elapsed },
            Err(err) if fired.load(Ordering::SeqCst) || is_interruption(&err) => {
                debug!(elapsed_ms = elapsed.as_millis() as u64, "query interrupted");
                QueryOutcome::Timeout
            }
            Err(err) => QueryOutcome::ExecutionError(err.to_string()),
        }
    }

    fn collect_rows(&self, sql: &str) -> duckdb::Result<Vec<ResultRow>> {
        let mut statement = self.connection.prepare(sql)?;
        let mut rows = statement.query([])?;
        let column_count = rows
            .as_ref()
            .map(|statement| statement.column_count())
            .unwrap_or_default();

        let mut out = Vec::<ResultRow>::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::<Value>::with_capacity(column_count);
            for index in 0..column_count {
                values.push(value_to_json(row.get::<_, DuckValue>(index)?));
            }
            out.push(values);
        }
        Ok(out)
    }
}

fn is_interruption(err: &duckdb::Error) -> bool {
    err.to_string().to_ascii_lowercase().contains("interrupt")
}
