pub mod schema;
pub mod writer;
pub mod query;

use anyhow::{Context, Result};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::Path;

pub type DbPool = r2d2::Pool<SqliteConnectionManager>;

pub fn open_or_create<P: AsRef<Path>>(db_path: P) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    schema::apply_pragmas(&conn)?;
    schema::apply_schema(&conn)?;
    Ok(conn)
}

/// Pooled connections for the HTTP handlers and the attendance writer.
/// The schema is applied once up front; every pooled connection gets the
/// same pragmas.
pub fn create_pool<P: AsRef<Path>>(db_path: P, size: u32) -> Result<DbPool> {
    let db_path = db_path.as_ref();
    drop(open_or_create(db_path)?);
    let manager = SqliteConnectionManager::file(db_path).with_init(|c| {
        c.pragma_update(None, "journal_mode", "WAL")?;
        c.pragma_update(None, "synchronous", "NORMAL")?;
        c.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(())
    });
    r2d2::Pool::builder()
        .max_size(size)
        .build(manager)
        .context("Failed to build SQLite connection pool")
}
