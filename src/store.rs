//! Read/write contracts the pipeline consumes, plus the SQLite and
//! filesystem implementations used by the server.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::path::{Component, Path, PathBuf};

use crate::db::{self, DbPool};
use crate::models::attendance::AttendanceEvent;
use crate::models::student::StudentRef;

/// Read side of the student registry store.
pub trait StudentStore: Send + Sync {
    /// Every student with a reference image, in store order.
    fn list_students(&self) -> Result<Vec<StudentRef>>;
}

/// The attendance log as seen by the deduplicator.
pub trait AttendanceStore: Send + Sync {
    fn exists(&self, identity_id: &str, date: NaiveDate) -> Result<bool>;

    /// Insert `event` unless one already exists for its `(identity_id, date)`.
    /// Returns whether a row was written.
    fn insert_if_absent(&self, event: &AttendanceEvent) -> Result<bool>;
}

/// Reference image bytes by stored path.
pub trait ImageStore: Send + Sync {
    fn load(&self, path: &str) -> Result<Vec<u8>>;
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

}

impl StudentStore for SqliteStore {
    fn list_students(&self) -> Result<Vec<StudentRef>> {
        let conn = self.pool.get().context("No database connection available")?;
        let students = db::query::list_students(&conn)?;
        Ok(students.into_iter().map(StudentRef::from).collect())
    }
}

impl AttendanceStore for SqliteStore {
    fn exists(&self, identity_id: &str, date: NaiveDate) -> Result<bool> {
        let conn = self.pool.get().context("No database connection available")?;
        db::query::attendance_exists(&conn, identity_id, date)
    }

    fn insert_if_absent(&self, event: &AttendanceEvent) -> Result<bool> {
        let conn = self.pool.get().context("No database connection available")?;
        db::writer::insert_attendance_if_absent(&conn, event)
    }
}

/// Reference images on local disk, addressed relative to `root`.
#[derive(Clone, Debug)]
pub struct FsImageStore {
    root: PathBuf,
}

impl FsImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a stored path under the root. Absolute paths and `..`
    /// segments are refused.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let rel = Path::new(path);
        if rel.components().any(|c| !matches!(c, Component::Normal(_))) {
            anyhow::bail!("Reference image path {:?} escapes the image root", path);
        }
        Ok(self.root.join(rel))
    }
}

impl ImageStore for FsImageStore {
    fn load(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        std::fs::read(&full).context(format!("Failed to read reference image {:?}", full))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn fs_store_refuses_escaping_paths() {
        let store = FsImageStore::new("/data/student_images");
        assert!(store.resolve("../secret").is_err());
        assert!(store.resolve("/etc/passwd").is_err());
        assert_eq!(store.resolve("s001.jpg").unwrap(), PathBuf::from("/data/student_images/s001.jpg"));
    }

    #[test]
    fn fs_store_reads_bytes() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.bin"), b"abc").unwrap();
        let store = FsImageStore::new(tmp.path());
        assert_eq!(store.load("a.bin").unwrap(), b"abc");
        assert!(store.load("missing.bin").is_err());
    }

    #[test]
    fn sqlite_store_round_trips_existence() {
        let tmp = TempDir::new().unwrap();
        let pool = db::create_pool(tmp.path().join("t.db"), 2).unwrap();
        let store = SqliteStore::new(pool);
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert!(!store.exists("S001", date).unwrap());
        let ev = AttendanceEvent { identity_id: "S001".into(), display_name: "Alice".into(), timestamp: 0, date };
        assert!(store.insert_if_absent(&ev).unwrap());
        assert!(!store.insert_if_absent(&ev).unwrap());
        assert!(store.exists("S001", date).unwrap());
    }
}
