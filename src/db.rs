use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;

use crate::grading::{self, Grade, MarkEntry, StatusContext, StudentProgress};
use crate::model::StudentStatus;

pub const DB_FILE_NAME: &str = "progress.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            student_no TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            phone TEXT,
            department TEXT NOT NULL,
            semester INTEGER NOT NULL,
            section TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            date_of_birth TEXT,
            address TEXT,
            cgpa REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'Not Evaluated',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_department ON students(department, semester)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            department TEXT NOT NULL,
            semester INTEGER NOT NULL,
            credits INTEGER NOT NULL,
            subject_type TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(department, semester, code)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS marks(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            theory REAL NOT NULL,
            practical REAL NOT NULL,
            internal REAL NOT NULL,
            attendance REAL NOT NULL,
            total_marks INTEGER NOT NULL,
            grade TEXT NOT NULL,
            grade_points INTEGER NOT NULL,
            credits_earned INTEGER NOT NULL,
            result TEXT NOT NULL,
            exam_date TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            UNIQUE(student_id, subject_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_student ON marks(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_subject ON marks(subject_id)",
        [],
    )?;

    Ok(conn)
}

pub fn now_ts() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: String,
    pub student_id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub department: String,
    pub semester: i64,
    pub section: String,
    pub academic_year: String,
    pub date_of_birth: Option<String>,
    pub address: Option<String>,
    pub cgpa: f64,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

pub const STUDENT_COLUMNS: &str = "id, student_no, name, email, phone, department, semester, section,
     academic_year, date_of_birth, address, cgpa, status, created_at, updated_at";

pub fn student_from_row(r: &Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        id: r.get(0)?,
        student_id: r.get(1)?,
        name: r.get(2)?,
        email: r.get(3)?,
        phone: r.get(4)?,
        department: r.get(5)?,
        semester: r.get(6)?,
        section: r.get(7)?,
        academic_year: r.get(8)?,
        date_of_birth: r.get(9)?,
        address: r.get(10)?,
        cgpa: r.get(11)?,
        status: r.get(12)?,
        created_at: r.get(13)?,
        updated_at: r.get(14)?,
    })
}

/// Looks a student up by internal id or by the external student number.
pub fn find_student(conn: &Connection, key: &str) -> rusqlite::Result<Option<StudentRow>> {
    let sql = format!(
        "SELECT {} FROM students WHERE id = ?1 OR student_no = ?1",
        STUDENT_COLUMNS
    );
    conn.query_row(&sql, [key], student_from_row).optional()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRow {
    pub id: String,
    pub code: String,
    pub name: String,
    pub department: String,
    pub semester: i64,
    pub credits: i64,
    #[serde(rename = "type")]
    pub subject_type: String,
}

pub const SUBJECT_COLUMNS: &str = "id, code, name, department, semester, credits, subject_type";

pub fn subject_from_row(r: &Row<'_>) -> rusqlite::Result<SubjectRow> {
    Ok(SubjectRow {
        id: r.get(0)?,
        code: r.get(1)?,
        name: r.get(2)?,
        department: r.get(3)?,
        semester: r.get(4)?,
        credits: r.get(5)?,
        subject_type: r.get(6)?,
    })
}

pub fn find_subject(conn: &Connection, id: &str) -> rusqlite::Result<Option<SubjectRow>> {
    let sql = format!("SELECT {} FROM subjects WHERE id = ?", SUBJECT_COLUMNS);
    conn.query_row(&sql, [id], subject_from_row).optional()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkRow {
    pub id: String,
    pub student_id: String,
    pub subject: SubjectRow,
    pub theory: f64,
    pub practical: f64,
    pub internal: f64,
    pub attendance: f64,
    pub total_marks: i64,
    pub grade: String,
    pub grade_points: i64,
    pub credits_earned: i64,
    pub result: String,
    pub exam_date: String,
    pub updated_at: String,
}

impl MarkRow {
    pub fn entry(&self) -> MarkEntry {
        MarkEntry {
            semester: self.subject.semester,
            credits: self.subject.credits,
            total_marks: self.total_marks,
            grade: Grade::parse(&self.grade).unwrap_or(Grade::F),
            grade_points: self.grade_points,
            credits_earned: self.credits_earned,
        }
    }
}

const MARK_SELECT: &str = "SELECT m.id, m.student_id, m.theory, m.practical, m.internal, m.attendance,
        m.total_marks, m.grade, m.grade_points, m.credits_earned, m.result, m.exam_date, m.updated_at,
        s.id, s.code, s.name, s.department, s.semester, s.credits, s.subject_type
     FROM marks m
     JOIN subjects s ON s.id = m.subject_id";

fn mark_from_row(r: &Row<'_>) -> rusqlite::Result<MarkRow> {
    Ok(MarkRow {
        id: r.get(0)?,
        student_id: r.get(1)?,
        theory: r.get(2)?,
        practical: r.get(3)?,
        internal: r.get(4)?,
        attendance: r.get(5)?,
        total_marks: r.get(6)?,
        grade: r.get(7)?,
        grade_points: r.get(8)?,
        credits_earned: r.get(9)?,
        result: r.get(10)?,
        exam_date: r.get(11)?,
        updated_at: r.get(12)?,
        subject: SubjectRow {
            id: r.get(13)?,
            code: r.get(14)?,
            name: r.get(15)?,
            department: r.get(16)?,
            semester: r.get(17)?,
            credits: r.get(18)?,
            subject_type: r.get(19)?,
        },
    })
}

pub fn marks_for_student(conn: &Connection, student_id: &str) -> rusqlite::Result<Vec<MarkRow>> {
    let sql = format!(
        "{} WHERE m.student_id = ? ORDER BY s.semester, s.code",
        MARK_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([student_id], mark_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn find_mark(conn: &Connection, mark_id: &str) -> rusqlite::Result<Option<MarkRow>> {
    let sql = format!("{} WHERE m.id = ?", MARK_SELECT);
    conn.query_row(&sql, [mark_id], mark_from_row).optional()
}

pub fn offered_subject_count(
    conn: &Connection,
    department: &str,
    semester: i64,
) -> rusqlite::Result<usize> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM subjects WHERE department = ? AND semester = ?",
        (department, semester),
        |r| r.get(0),
    )?;
    Ok(n.max(0) as usize)
}

/// Computes a student's aggregate from every stored mark without writing.
pub fn student_progress(
    conn: &Connection,
    student: &StudentRow,
) -> rusqlite::Result<(Vec<MarkRow>, StudentProgress)> {
    let marks = marks_for_student(conn, &student.id)?;
    let entries: Vec<MarkEntry> = marks.iter().map(MarkRow::entry).collect();
    let ctx = StatusContext {
        current: StudentStatus::parse(&student.status).unwrap_or(StudentStatus::Active),
        current_semester: student.semester,
        offered_subjects: offered_subject_count(conn, &student.department, student.semester)?,
    };
    let progress = grading::summarize_student(&entries, &ctx);
    Ok((marks, progress))
}

/// Rebuilds a student's aggregate from every stored mark and persists the
/// derived CGPA and status. Returns `None` when the student does not exist.
pub fn recompute_student(
    conn: &Connection,
    student_id: &str,
) -> rusqlite::Result<Option<StudentProgress>> {
    let Some(student) = find_student(conn, student_id)? else {
        return Ok(None);
    };
    let (_, progress) = student_progress(conn, &student)?;

    conn.execute(
        "UPDATE students SET cgpa = ?, status = ? WHERE id = ?",
        (progress.cgpa, progress.status.as_str(), &student.id),
    )?;
    tracing::debug!(
        student = %student.student_id,
        cgpa = progress.cgpa,
        status = progress.status.as_str(),
        "recomputed student progress"
    );
    Ok(Some(progress))
}

/// Students holding a mark in the given subject, or enrolled in the
/// subject's department/semester (whose completeness depends on it).
pub fn students_affected_by_subject(
    conn: &Connection,
    subject_id: &str,
    department: &str,
    semester: i64,
) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT student_id FROM marks WHERE subject_id = ?1
         UNION
         SELECT id FROM students WHERE department = ?2 AND semester = ?3",
    )?;
    let ids = stmt
        .query_map((subject_id, department, semester), |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}
