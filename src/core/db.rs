//! Database connection discipline.
//!
//! - WAL mode for multi-reader concurrency
//! - Foreign keys enforced (required for embedding CASCADE delete)
//! - 5-second busy timeout for lock contention

use crate::core::error::ChoraError;
use rusqlite::Connection;
use std::path::Path;

/// Open a SQLite connection with Chora's standard configuration.
///
/// Mutating code must not call this directly; writes go through
/// `Store::with_write` so they serialize on the writer mutex and land in
/// the event log.
pub fn db_connect(db_path: &Path) -> Result<Connection, ChoraError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}
