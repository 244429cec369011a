use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::attendance::AttendanceRow;
use crate::models::student::Student;

fn row_to_student(row: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: row.get("id")?,
        student_id: row.get("student_id")?,
        name: row.get("name")?,
        image_path: row.get("image_path")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_attendance(row: &Row<'_>) -> rusqlite::Result<AttendanceRow> {
    Ok(AttendanceRow {
        id: row.get("id")?,
        student_id: row.get("student_id")?,
        name: row.get("name")?,
        timestamp: row.get("timestamp")?,
        date: row.get("date")?,
    })
}

/// All students in insertion order. Registry order follows this.
pub fn list_students(conn: &Connection) -> Result<Vec<Student>> {
    let mut stmt = conn.prepare("SELECT * FROM students ORDER BY id ASC")?;
    let items = stmt.query_map([], row_to_student)?.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(items)
}

pub fn get_student(conn: &Connection, student_id: &str) -> Result<Option<Student>> {
    let mut stmt = conn.prepare("SELECT * FROM students WHERE student_id = ?")?;
    let row = stmt.query_row(params![student_id], row_to_student).optional()?;
    Ok(row)
}

pub fn attendance_exists(conn: &Connection, student_id: &str, date: NaiveDate) -> Result<bool> {
    let mut stmt = conn.prepare("SELECT 1 FROM attendance WHERE student_id = ?1 AND date = ?2 LIMIT 1")?;
    let found = stmt
        .query_row(params![student_id, date.format("%Y-%m-%d").to_string()], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

pub fn list_attendance(conn: &Connection, date: Option<NaiveDate>) -> Result<Vec<AttendanceRow>> {
    let items = match date {
        Some(d) => {
            let mut stmt = conn.prepare("SELECT * FROM attendance WHERE date = ? ORDER BY timestamp ASC, id ASC")?;
            let rows = stmt.query_map(params![d.format("%Y-%m-%d").to_string()], row_to_attendance)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        }
        None => {
            let mut stmt = conn.prepare("SELECT * FROM attendance ORDER BY timestamp DESC, id DESC")?;
            let rows = stmt.query_map([], row_to_attendance)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        }
    };
    Ok(items)
}

pub fn count_attendance(conn: &Connection, student_id: &str, date: NaiveDate) -> Result<i64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM attendance WHERE student_id = ?1 AND date = ?2",
        params![student_id, date.format("%Y-%m-%d").to_string()],
        |r| r.get(0),
    )?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, writer};
    use crate::models::attendance::AttendanceEvent;
    use tempfile::TempDir;

    fn setup_test_db() -> (TempDir, Connection) {
        let tmp = TempDir::new().unwrap();
        let conn = db::open_or_create(tmp.path().join("test.db")).unwrap();
        (tmp, conn)
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[test]
    fn test_list_students_keeps_insertion_order() {
        let (_tmp, conn) = setup_test_db();
        writer::insert_student(&conn, "S003", "Carol", "c.jpg").unwrap();
        writer::insert_student(&conn, "S001", "Alice", "a.jpg").unwrap();
        writer::insert_student(&conn, "S002", "Bob", "b.jpg").unwrap();
        let ids: Vec<String> = list_students(&conn).unwrap().into_iter().map(|s| s.student_id).collect();
        assert_eq!(ids, vec!["S003", "S001", "S002"]);
    }

    #[test]
    fn test_get_student_not_found() {
        let (_tmp, conn) = setup_test_db();
        assert!(get_student(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn test_attendance_exists_is_per_day() {
        let (_tmp, conn) = setup_test_db();
        let ev = AttendanceEvent {
            identity_id: "S001".into(),
            display_name: "Alice".into(),
            timestamp: 1_714_550_400,
            date: day(1),
        };
        writer::insert_attendance_if_absent(&conn, &ev).unwrap();
        assert!(attendance_exists(&conn, "S001", day(1)).unwrap());
        assert!(!attendance_exists(&conn, "S001", day(2)).unwrap());
        assert!(!attendance_exists(&conn, "S002", day(1)).unwrap());
    }

    #[test]
    fn test_list_attendance_filters_by_date() {
        let (_tmp, conn) = setup_test_db();
        for (id, d, ts) in [("S001", 1, 10), ("S002", 1, 5), ("S001", 2, 20)] {
            let ev = AttendanceEvent { identity_id: id.into(), display_name: id.into(), timestamp: ts, date: day(d) };
            writer::insert_attendance_if_absent(&conn, &ev).unwrap();
        }
        let first = list_attendance(&conn, Some(day(1))).unwrap();
        assert_eq!(first.iter().map(|r| r.student_id.as_str()).collect::<Vec<_>>(), vec!["S002", "S001"]);
        assert_eq!(list_attendance(&conn, None).unwrap().len(), 3);
        assert_eq!(count_attendance(&conn, "S001", day(2)).unwrap(), 1);
    }
}
