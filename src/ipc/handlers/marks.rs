use crate::db::{self, StudentRow, SubjectRow};
use crate::grading::{self, Components, GradedMark};
use crate::ipc::error::{respond, HandlerErr, HandlerResult};
use crate::ipc::helpers::{db_conn, opt_f64, opt_i64, opt_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::model;
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

fn parse_components(src: &serde_json::Value) -> Result<Components, HandlerErr> {
    Ok(Components {
        theory: opt_f64(src, "theory")?,
        practical: opt_f64(src, "practical")?,
        internal: opt_f64(src, "internal")?,
        attendance: opt_f64(src, "attendance")?,
    })
}

fn parse_exam_date(src: &serde_json::Value) -> Result<String, HandlerErr> {
    match opt_str(src, "examDate")? {
        Some(d) => model::validate_date(&d).map_err(|e| HandlerErr::validation(&[e])),
        None => Ok(chrono::Local::now().date_naive().format("%Y-%m-%d").to_string()),
    }
}

fn fetch_student(conn: &Connection, key: &str) -> Result<StudentRow, HandlerErr> {
    db::find_student(conn, key)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::not_found("student"))
}

fn fetch_subject(conn: &Connection, id: &str) -> Result<SubjectRow, HandlerErr> {
    db::find_subject(conn, id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::not_found("subject"))
}

/// A fully checked mark submission, ready to be written.
struct PendingMark {
    subject: SubjectRow,
    components: Components,
    graded: GradedMark,
    exam_date: String,
}

fn prepare_mark(conn: &Connection, src: &serde_json::Value) -> Result<PendingMark, HandlerErr> {
    let subject_id = required_str(src, "subjectId")?;
    let components = parse_components(src)?;
    let exam_date = parse_exam_date(src)?;
    let subject = fetch_subject(conn, &subject_id)?;
    let graded = grading::grade_mark(&components, subject.credits);
    Ok(PendingMark {
        subject,
        components,
        graded,
        exam_date,
    })
}

/// Writes one mark, replacing any existing record for the same pair.
fn upsert_mark(conn: &Connection, student_id: &str, m: &PendingMark) -> Result<(), HandlerErr> {
    let c = m.components.clamped();
    let now = db::now_ts();
    conn.execute(
        "INSERT INTO marks(id, student_id, subject_id, theory, practical, internal, attendance,
            total_marks, grade, grade_points, credits_earned, result, exam_date, created_at, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
         ON CONFLICT(student_id, subject_id) DO UPDATE SET
            theory = excluded.theory,
            practical = excluded.practical,
            internal = excluded.internal,
            attendance = excluded.attendance,
            total_marks = excluded.total_marks,
            grade = excluded.grade,
            grade_points = excluded.grade_points,
            credits_earned = excluded.credits_earned,
            result = excluded.result,
            exam_date = excluded.exam_date,
            updated_at = excluded.updated_at",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            student_id,
            &m.subject.id,
            c.theory,
            c.practical,
            c.internal,
            c.attendance,
            m.graded.total_marks,
            m.graded.grade.as_str(),
            m.graded.grade_points,
            m.graded.credits_earned,
            m.graded.result.as_str(),
            &m.exam_date,
            now,
        ],
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "marks" })))?;
    Ok(())
}

fn recompute(conn: &Connection, student_id: &str) -> Result<serde_json::Value, HandlerErr> {
    let progress = db::recompute_student(conn, student_id)
        .map_err(|e| HandlerErr::db("db_update_failed", e))?
        .ok_or_else(|| HandlerErr::not_found("student"))?;
    Ok(json!(progress))
}

fn handle_marks_preview(_state: &mut AppState, req: &Request) -> HandlerResult {
    let components = parse_components(&req.params)?;
    let credits = opt_i64(&req.params, "credits")?.unwrap_or(0).max(0);
    let graded = grading::grade_mark(&components, credits);
    Ok(json!({
        "components": components.clamped(),
        "totalMarks": graded.total_marks,
        "grade": graded.grade,
        "gradePoints": graded.grade_points,
        "creditsEarned": graded.credits_earned,
        "result": graded.result,
    }))
}

fn handle_marks_upsert(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let student_key = required_str(&req.params, "studentId")?;
    let student = fetch_student(conn, &student_key)?;
    let pending = prepare_mark(conn, &req.params)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    upsert_mark(&tx, &student.id, &pending)?;
    let progress = recompute(&tx, &student.id)?;
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    let mark = db::marks_for_student(conn, &student.id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .into_iter()
        .find(|m| m.subject.id == pending.subject.id)
        .ok_or_else(|| HandlerErr::not_found("mark"))?;
    tracing::info!(
        student = %student.student_id,
        subject = %pending.subject.code,
        total = pending.graded.total_marks,
        grade = pending.graded.grade.as_str(),
        "mark saved"
    );
    Ok(json!({ "mark": mark, "progress": progress }))
}

fn handle_marks_bulk_upsert(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let student_key = required_str(&req.params, "studentId")?;
    let entries = req
        .params
        .get("entries")
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::bad_params("missing entries"))?;
    if entries.is_empty() {
        return Err(HandlerErr::bad_params("entries must not be empty"));
    }
    let student = fetch_student(conn, &student_key)?;

    // Every entry is checked before anything is written.
    let mut pending = Vec::with_capacity(entries.len());
    let mut seen = HashSet::new();
    for (index, entry) in entries.iter().enumerate() {
        let m = prepare_mark(conn, entry).map_err(|e| {
            let details = json!({ "index": index, "cause": e.details });
            HandlerErr::new(e.code, format!("entry {}: {}", index, e.message)).with_details(details)
        })?;
        if !seen.insert(m.subject.id.clone()) {
            return Err(HandlerErr::bad_params(format!(
                "entry {}: subject {} appears more than once",
                index, m.subject.code
            ))
            .with_details(json!({ "index": index })));
        }
        pending.push(m);
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    for m in &pending {
        upsert_mark(&tx, &student.id, m)?;
    }
    let progress = recompute(&tx, &student.id)?;
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    tracing::info!(student = %student.student_id, saved = pending.len(), "marks saved");
    Ok(json!({ "saved": pending.len(), "progress": progress }))
}

fn handle_marks_for_student(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let student_key = required_str(&req.params, "studentId")?;
    let student = fetch_student(conn, &student_key)?;
    let (marks, progress) =
        db::student_progress(conn, &student).map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "student": student, "marks": marks, "progress": progress }))
}

fn handle_marks_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let mark_id = required_str(&req.params, "markId")?;
    let mark = db::find_mark(conn, &mark_id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::not_found("mark"))?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    tx.execute("DELETE FROM marks WHERE id = ?", [&mark.id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e).with_details(json!({ "table": "marks" })))?;
    let progress = recompute(&tx, &mark.student_id)?;
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    tracing::info!(mark = %mark.id, subject = %mark.subject.code, "mark deleted");
    Ok(json!({ "progress": progress }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let outcome = match req.method.as_str() {
        "marks.preview" => handle_marks_preview(state, req),
        "marks.upsert" => handle_marks_upsert(state, req),
        "marks.bulkUpsert" => handle_marks_bulk_upsert(state, req),
        "marks.forStudent" => handle_marks_for_student(state, req),
        "marks.delete" => handle_marks_delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, outcome))
}
