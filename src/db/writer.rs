use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::attendance::AttendanceEvent;

/// Insert a student. Returns `None` when the `student_id` is already taken.
pub fn insert_student(conn: &Connection, student_id: &str, name: &str, image_path: &str) -> Result<Option<i64>> {
    let now = chrono::Utc::now().timestamp();
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO students (student_id, name, image_path, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![student_id, name, image_path, now],
    )?;
    if inserted == 0 {
        return Ok(None);
    }
    Ok(Some(conn.last_insert_rowid()))
}

pub fn update_student_name(conn: &Connection, student_id: &str, name: &str) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE students SET name = ?1 WHERE student_id = ?2",
        params![name, student_id],
    )?;
    Ok(updated > 0)
}

/// Delete a student and hand back its reference image path so the caller
/// can remove the file.
pub fn delete_student(conn: &Connection, student_id: &str) -> Result<Option<String>> {
    let tx = conn.unchecked_transaction()?;
    let image_path: Option<String> = tx
        .query_row("SELECT image_path FROM students WHERE student_id = ?1", params![student_id], |r| r.get(0))
        .optional()?;
    if image_path.is_some() {
        tx.execute("DELETE FROM students WHERE student_id = ?1", params![student_id])?;
    }
    tx.commit()?;
    Ok(image_path)
}

/// Insert one attendance event unless `(student_id, date)` already has one.
/// The unique index decides; a lost race reports `false`.
pub fn insert_attendance_if_absent(conn: &Connection, event: &AttendanceEvent) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO attendance (student_id, name, timestamp, date) VALUES (?1, ?2, ?3, ?4)",
        params![
            event.identity_id,
            event.display_name,
            event.timestamp,
            event.date.format("%Y-%m-%d").to_string(),
        ],
    )?;
    Ok(inserted == 1)
}

/// Remove one attendance row by id, returning the student it belonged to.
pub fn delete_attendance(conn: &Connection, id: i64) -> Result<Option<String>> {
    let student_id = conn
        .query_row("DELETE FROM attendance WHERE id = ?1 RETURNING student_id", params![id], |r| r.get(0))
        .optional()?;
    Ok(student_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::schema::apply_schema(&conn).unwrap();
        conn
    }

    fn event(id: &str, day: u32, ts: i64) -> AttendanceEvent {
        AttendanceEvent {
            identity_id: id.to_string(),
            display_name: "Alice".to_string(),
            timestamp: ts,
            date: NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
        }
    }

    #[test]
    fn duplicate_student_id_is_ignored() {
        let conn = conn();
        assert!(insert_student(&conn, "S001", "Alice", "s001.jpg").unwrap().is_some());
        assert!(insert_student(&conn, "S001", "Other", "other.jpg").unwrap().is_none());
    }

    #[test]
    fn delete_student_returns_image_path() {
        let conn = conn();
        insert_student(&conn, "S001", "Alice", "s001.jpg").unwrap();
        assert_eq!(delete_student(&conn, "S001").unwrap(), Some("s001.jpg".to_string()));
        assert_eq!(delete_student(&conn, "S001").unwrap(), None);
    }

    #[test]
    fn second_insert_same_day_reports_false() {
        let conn = conn();
        assert!(insert_attendance_if_absent(&conn, &event("S001", 1, 100)).unwrap());
        assert!(!insert_attendance_if_absent(&conn, &event("S001", 1, 105)).unwrap());
        assert!(insert_attendance_if_absent(&conn, &event("S001", 2, 200)).unwrap());
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM attendance", [], |r| r.get(0)).unwrap();
        assert_eq!(n, 2);
    }

    #[test]
    fn delete_attendance_reports_owner() {
        let conn = conn();
        insert_attendance_if_absent(&conn, &event("S001", 1, 100)).unwrap();
        let id: i64 = conn.query_row("SELECT id FROM attendance", [], |r| r.get(0)).unwrap();
        assert_eq!(delete_attendance(&conn, id).unwrap(), Some("S001".to_string()));
        assert_eq!(delete_attendance(&conn, id).unwrap(), None);
    }

    #[test]
    fn update_name_of_missing_student() {
        let conn = conn();
        assert!(!update_student_name(&conn, "nobody", "X").unwrap());
    }
}
