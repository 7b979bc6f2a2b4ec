use academicsd::calc::{overall_attendance, CourseRecord, LetterGrade, SemesterRecord};
use academicsd::upload::UploadRow;
use rusqlite::{Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;
use uuid::Uuid;

pub const DB_FILE_NAME: &str = "academics.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            usn TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            phone TEXT,
            branch TEXT NOT NULL,
            semester INTEGER NOT NULL,
            year TEXT,
            batch_id TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_semesters(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            semester INTEGER NOT NULL,
            academic_year TEXT NOT NULL,
            sgpa REAL NOT NULL DEFAULT 0,
            updated_at TEXT,
            UNIQUE(student_id, semester)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_academic_semesters_student ON academic_semesters(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS semester_courses(
            semester_id TEXT NOT NULL,
            sl_no INTEGER NOT NULL,
            course_code TEXT NOT NULL,
            course_name TEXT NOT NULL,
            attendance_percent REAL NOT NULL DEFAULT 0,
            ia1 REAL NOT NULL DEFAULT 0,
            ia2 REAL NOT NULL DEFAULT 0,
            ia3 REAL NOT NULL DEFAULT 0,
            lab_marks REAL NOT NULL DEFAULT 0,
            other_marks REAL NOT NULL DEFAULT 0,
            external_marks REAL NOT NULL DEFAULT 0,
            credits REAL NOT NULL DEFAULT 0,
            total_internal INTEGER NOT NULL DEFAULT 0,
            total INTEGER NOT NULL DEFAULT 0,
            letter_grade TEXT,
            grade_points INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY(semester_id, sl_no),
            FOREIGN KEY(semester_id) REFERENCES academic_semesters(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS upload_batches(
            id TEXT PRIMARY KEY,
            fingerprint TEXT NOT NULL,
            row_count INTEGER NOT NULL,
            imported_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_upload_batches_fingerprint ON upload_batches(fingerprint)",
        [],
    )?;

    Ok(conn)
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

fn parse_letter_grade(s: Option<String>) -> Option<LetterGrade> {
    match s.as_deref() {
        Some("S") => Some(LetterGrade::S),
        Some("A") => Some(LetterGrade::A),
        Some("B") => Some(LetterGrade::B),
        Some("C") => Some(LetterGrade::C),
        Some("D") => Some(LetterGrade::D),
        Some("E") => Some(LetterGrade::E),
        Some("F") => Some(LetterGrade::F),
        _ => None,
    }
}

fn load_courses(conn: &Connection, semester_id: &str) -> anyhow::Result<Vec<CourseRecord>> {
    let mut stmt = conn.prepare(
        "SELECT sl_no, course_code, course_name, attendance_percent, ia1, ia2, ia3,
                lab_marks, other_marks, external_marks, credits,
                total_internal, total, letter_grade, grade_points
         FROM semester_courses
         WHERE semester_id = ?
         ORDER BY sl_no",
    )?;
    let courses = stmt
        .query_map([semester_id], |r| {
            Ok(CourseRecord {
                sl_no: r.get(0)?,
                course_code: r.get(1)?,
                course_name: r.get(2)?,
                attendance_percent: r.get(3)?,
                ia1: r.get(4)?,
                ia2: r.get(5)?,
                ia3: r.get(6)?,
                lab_marks: r.get(7)?,
                other_marks: r.get(8)?,
                external_marks: r.get(9)?,
                credits: r.get(10)?,
                total_internal: r.get(11)?,
                total: r.get(12)?,
                letter_grade: parse_letter_grade(r.get(13)?),
                grade_points: r.get(14)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(courses)
}

pub fn semester_load(
    conn: &Connection,
    student_id: &str,
    semester: i64,
) -> anyhow::Result<Option<SemesterRecord>> {
    let row: Option<(String, String, f64, Option<String>)> = conn
        .query_row(
            "SELECT id, academic_year, sgpa, updated_at
             FROM academic_semesters
             WHERE student_id = ? AND semester = ?",
            (student_id, semester),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?;
    let Some((id, academic_year, sgpa, updated_at)) = row else {
        return Ok(None);
    };
    let courses = load_courses(conn, &id)?;
    Ok(Some(SemesterRecord {
        student_id: student_id.to_string(),
        semester,
        academic_year,
        overall_attendance: overall_attendance(&courses),
        courses,
        sgpa,
        updated_at,
    }))
}

pub fn semesters_for_student(conn: &Connection, student_id: &str) -> anyhow::Result<Vec<SemesterRecord>> {
    let mut stmt = conn.prepare(
        "SELECT semester FROM academic_semesters WHERE student_id = ? ORDER BY semester",
    )?;
    let numbers = stmt
        .query_map([student_id], |r| r.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = Vec::with_capacity(numbers.len());
    for n in numbers {
        if let Some(s) = semester_load(conn, student_id, n)? {
            out.push(s);
        }
    }
    Ok(out)
}

/// Replace the stored semester (header row and all course rows) in one
/// transaction. Sets `updated_at` on the record.
pub fn semester_store(conn: &mut Connection, record: &mut SemesterRecord) -> anyhow::Result<()> {
    let updated_at = now_rfc3339();
    let tx = conn.transaction()?;
    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM academic_semesters WHERE student_id = ? AND semester = ?",
            (&record.student_id, record.semester),
            |r| r.get(0),
        )
        .optional()?;
    let semester_id = match existing {
        Some(id) => {
            tx.execute(
                "UPDATE academic_semesters SET academic_year = ?, sgpa = ?, updated_at = ? WHERE id = ?",
                (&record.academic_year, record.sgpa, &updated_at, &id),
            )?;
            tx.execute("DELETE FROM semester_courses WHERE semester_id = ?", [&id])?;
            id
        }
        None => {
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO academic_semesters(id, student_id, semester, academic_year, sgpa, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (
                    &id,
                    &record.student_id,
                    record.semester,
                    &record.academic_year,
                    record.sgpa,
                    &updated_at,
                ),
            )?;
            id
        }
    };
    {
        let mut insert = tx.prepare(
            "INSERT INTO semester_courses(
                semester_id, sl_no, course_code, course_name, attendance_percent,
                ia1, ia2, ia3, lab_marks, other_marks, external_marks, credits,
                total_internal, total, letter_grade, grade_points)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for c in &record.courses {
            insert.execute(rusqlite::params![
                &semester_id,
                c.sl_no,
                &c.course_code,
                &c.course_name,
                c.attendance_percent,
                c.ia1,
                c.ia2,
                c.ia3,
                c.lab_marks,
                c.other_marks,
                c.external_marks,
                c.credits,
                c.total_internal,
                c.total,
                c.letter_grade.map(|g| g.as_str()),
                c.grade_points,
            ])?;
        }
    }
    tx.commit()?;
    record.updated_at = Some(updated_at);
    Ok(())
}

/// Drop a semester and (via cascade) its courses. Returns false when there
/// was nothing to delete.
pub fn semester_delete(conn: &Connection, student_id: &str, semester: i64) -> anyhow::Result<bool> {
    let n = conn.execute(
        "DELETE FROM academic_semesters WHERE student_id = ? AND semester = ?",
        (student_id, semester),
    )?;
    Ok(n > 0)
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub usn: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub branch: String,
    pub semester: i64,
    pub year: Option<String>,
    pub batch_id: Option<String>,
    pub updated_at: Option<String>,
}

pub fn students_list(conn: &Connection) -> anyhow::Result<Vec<StudentRow>> {
    let mut stmt = conn.prepare(
        "SELECT usn, name, email, phone, branch, semester, year, batch_id, updated_at
         FROM students
         ORDER BY usn",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(StudentRow {
                usn: r.get(0)?,
                name: r.get(1)?,
                email: r.get(2)?,
                phone: r.get(3)?,
                branch: r.get(4)?,
                semester: r.get(5)?,
                year: r.get(6)?,
                batch_id: r.get(7)?,
                updated_at: r.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn upload_batch_find(conn: &Connection, fingerprint: &str) -> anyhow::Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT id FROM upload_batches WHERE fingerprint = ? ORDER BY imported_at LIMIT 1",
            [fingerprint],
            |r| r.get(0),
        )
        .optional()?)
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

pub struct ImportOutcome {
    pub batch_id: String,
    /// Distinct USNs written; a repeated USN counts once (last row wins).
    pub students: usize,
}

/// Upsert validated rows keyed by USN and record the batch.
pub fn import_students(
    conn: &mut Connection,
    rows: &[UploadRow],
    fingerprint: &str,
) -> anyhow::Result<ImportOutcome> {
    let batch_id = Uuid::new_v4().to_string();
    let now = now_rfc3339();
    let mut written = BTreeSet::new();
    let tx = conn.transaction()?;
    {
        let mut upsert = tx.prepare(
            "INSERT INTO students(usn, name, email, phone, branch, semester, year, batch_id, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(usn) DO UPDATE SET
               name = excluded.name,
               email = excluded.email,
               phone = excluded.phone,
               branch = excluded.branch,
               semester = excluded.semester,
               year = excluded.year,
               batch_id = excluded.batch_id,
               updated_at = excluded.updated_at",
        )?;
        for row in rows {
            // Validation already pinned Semester to 1..=8.
            let semester = row.get("Semester").parse::<f64>().unwrap_or(0.0) as i64;
            upsert.execute(rusqlite::params![
                row.get("USN"),
                row.get("Name"),
                row.get("Email"),
                non_empty(row.get("Phone")),
                row.get("Branch"),
                semester,
                non_empty(row.get("Year")),
                &batch_id,
                &now,
            ])?;
            written.insert(row.get("USN"));
        }
    }
    tx.execute(
        "INSERT INTO upload_batches(id, fingerprint, row_count, imported_at) VALUES(?, ?, ?, ?)",
        (&batch_id, fingerprint, rows.len() as i64, &now),
    )?;
    tx.commit()?;
    Ok(ImportOutcome {
        batch_id,
        students: written.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use academicsd::upload::parse_csv;

    fn temp_workspace(prefix: &str) -> std::path::PathBuf {
        let p = std::env::temp_dir().join(format!("{}-{}", prefix, Uuid::new_v4()));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    #[test]
    fn semester_roundtrips_through_storage() {
        let ws = temp_workspace("academicsd-db-semester");
        let mut conn = open_db(&ws).expect("open db");

        let mut sem = SemesterRecord::empty("stu-1", 2, "2024-2025");
        let i = sem.add_course();
        let patch = serde_json::json!({ "courseCode": "CS201", "ia1": 28, "externalMarks": 70, "credits": 4 });
        sem.update_course(i, patch.as_object().unwrap(), false).unwrap();
        semester_store(&mut conn, &mut sem).expect("store");
        assert!(sem.updated_at.is_some());

        let loaded = semester_load(&conn, "stu-1", 2).expect("load").expect("exists");
        assert_eq!(loaded.courses, sem.courses);
        assert_eq!(loaded.sgpa, sem.sgpa);

        sem.remove_course(0).unwrap();
        semester_store(&mut conn, &mut sem).expect("store again");
        let loaded = semester_load(&conn, "stu-1", 2).expect("load").expect("exists");
        assert!(loaded.courses.is_empty());
        assert_eq!(semesters_for_student(&conn, "stu-1").unwrap().len(), 1);
        assert!(semester_load(&conn, "stu-1", 3).unwrap().is_none());

        assert!(semester_delete(&conn, "stu-1", 2).expect("delete"));
        assert!(semester_load(&conn, "stu-1", 2).unwrap().is_none());
        let orphans: i64 = conn
            .query_row("SELECT COUNT(*) FROM semester_courses", [], |r| r.get(0))
            .unwrap();
        assert_eq!(orphans, 0);
        assert!(!semester_delete(&conn, "stu-1", 2).expect("delete again"));
    }

    #[test]
    fn import_upserts_by_usn() {
        let ws = temp_workspace("academicsd-db-import");
        let mut conn = open_db(&ws).expect("open db");
        let first = parse_csv("Name,USN,Email,Branch,Semester\nA,U1,a@x.io,CSE,3\n").unwrap();
        let second = parse_csv("Name,USN,Email,Branch,Semester\nA2,U1,a@x.io,ISE,4\n").unwrap();
        assert_eq!(import_students(&mut conn, &first.rows, "f1").unwrap().students, 1);
        import_students(&mut conn, &second.rows, "f2").unwrap();
        let students = students_list(&conn).unwrap();
        assert_eq!(students.len(), 1);
        assert_eq!(students[0].name, "A2");
        assert_eq!(students[0].semester, 4);
        assert_eq!(students[0].phone, None);
        assert!(upload_batch_find(&conn, "f1").unwrap().is_some());
        assert!(upload_batch_find(&conn, "nope").unwrap().is_none());

        let repeated = parse_csv(
            "Name,USN,Email,Branch,Semester\nB,U2,b@x.io,CSE,1\nB2,U2,b@x.io,CSE,2\nC,U3,c@x.io,CSE,1\n",
        )
        .unwrap();
        let outcome = import_students(&mut conn, &repeated.rows, "f3").unwrap();
        assert_eq!(outcome.students, 2);
        assert_eq!(students_list(&conn).unwrap().len(), 3);
    }
}
