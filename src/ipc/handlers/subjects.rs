use crate::db::{self, SubjectRow};
use crate::ipc::error::{respond, HandlerErr, HandlerResult};
use crate::ipc::helpers::{db_conn, opt_i64, opt_str, patch_obj, required_str};
use crate::ipc::types::{AppState, Request};
use crate::model::{self, Department, SubjectType, ValidationError};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde_json::json;
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct SubjectFields {
    code: Option<String>,
    name: Option<String>,
    department: Option<String>,
    semester: Option<i64>,
    credits: Option<i64>,
    subject_type: Option<String>,
}

#[derive(Debug, Clone)]
struct ValidSubject {
    code: String,
    name: String,
    department: Department,
    semester: i64,
    credits: i64,
    subject_type: SubjectType,
}

impl SubjectFields {
    fn from_row(row: &SubjectRow) -> Self {
        Self {
            code: Some(row.code.clone()),
            name: Some(row.name.clone()),
            department: Some(row.department.clone()),
            semester: Some(row.semester),
            credits: Some(row.credits),
            subject_type: Some(row.subject_type.clone()),
        }
    }

    fn apply(&mut self, src: &serde_json::Value) -> Result<(), HandlerErr> {
        let has = |k: &str| src.get(k).is_some();
        if has("code") {
            self.code = opt_str(src, "code")?;
        }
        if has("name") {
            self.name = opt_str(src, "name")?;
        }
        if has("department") {
            self.department = opt_str(src, "department")?;
        }
        if has("semester") {
            self.semester = opt_i64(src, "semester")?;
        }
        if has("credits") {
            self.credits = opt_i64(src, "credits")?;
        }
        if has("type") {
            self.subject_type = opt_str(src, "type")?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<ValidSubject, Vec<ValidationError>> {
        let mut errors = Vec::new();
        let code = self
            .code
            .as_ref()
            .map(|c| c.to_ascii_uppercase())
            .or_else(|| {
                errors.push(ValidationError::Required { field: "code" });
                None
            });
        let name = self.name.clone().or_else(|| {
            errors.push(ValidationError::Required { field: "name" });
            None
        });
        let department = match self.department.as_deref() {
            None => {
                errors.push(ValidationError::Required { field: "department" });
                None
            }
            Some(d) => Department::parse(d).map_err(|e| errors.push(e)).ok(),
        };
        let semester = match self.semester {
            None => {
                errors.push(ValidationError::Required { field: "semester" });
                None
            }
            Some(s) => model::validate_semester(s).map_err(|e| errors.push(e)).ok(),
        };
        let credits = match self.credits {
            None => {
                errors.push(ValidationError::Required { field: "credits" });
                None
            }
            Some(c) => model::validate_credits(c).map_err(|e| errors.push(e)).ok(),
        };
        let subject_type = SubjectType::parse(self.subject_type.as_deref().unwrap_or("Theory"))
            .map_err(|e| errors.push(e))
            .ok();

        match (code, name, department, semester, credits, subject_type) {
            (
                Some(code),
                Some(name),
                Some(department),
                Some(semester),
                Some(credits),
                Some(subject_type),
            ) if errors.is_empty() => Ok(ValidSubject {
                code,
                name,
                department,
                semester,
                credits,
                subject_type,
            }),
            _ => Err(errors),
        }
    }
}

fn fetch_subject(conn: &Connection, id: &str) -> Result<SubjectRow, HandlerErr> {
    db::find_subject(conn, id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::not_found("subject"))
}

fn duplicate_code(v: &ValidSubject) -> HandlerErr {
    HandlerErr::conflict(format!(
        "subject {} already exists for {} semester {}",
        v.code,
        v.department.code(),
        v.semester
    ))
    .with_details(json!({ "field": "code" }))
}

fn recompute_all(conn: &Connection, student_ids: &BTreeSet<String>) -> Result<(), HandlerErr> {
    for sid in student_ids {
        db::recompute_student(conn, sid).map_err(|e| HandlerErr::db("db_update_failed", e))?;
    }
    Ok(())
}

fn affected_students(
    conn: &Connection,
    subject_id: &str,
    department: &str,
    semester: i64,
) -> Result<Vec<String>, HandlerErr> {
    db::students_affected_by_subject(conn, subject_id, department, semester)
        .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();

    if let Some(d) = opt_str(&req.params, "department")? {
        let dept = Department::parse(&d).map_err(|e| HandlerErr::validation(&[e]))?;
        clauses.push("department = ?");
        binds.push(Value::Text(dept.code().to_string()));
    }
    if let Some(s) = opt_i64(&req.params, "semester")? {
        clauses.push("semester = ?");
        binds.push(Value::Integer(s));
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    let sql = format!(
        "SELECT {} FROM subjects{} ORDER BY department, semester, code",
        db::SUBJECT_COLUMNS,
        where_sql
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let subjects = stmt
        .query_map(params_from_iter(binds.iter()), db::subject_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(json!({ "subjects": subjects }))
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let mut fields = SubjectFields::default();
    fields.apply(&req.params)?;
    let valid = fields.validate().map_err(|e| HandlerErr::validation(&e))?;

    let id = Uuid::new_v4().to_string();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    tx.execute(
        "INSERT INTO subjects(id, code, name, department, semester, credits, subject_type, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &id,
            &valid.code,
            &valid.name,
            valid.department.code(),
            valid.semester,
            valid.credits,
            valid.subject_type.as_str(),
            db::now_ts(),
        ],
    )
    .map_err(|e| {
        if db::is_unique_violation(&e) {
            duplicate_code(&valid)
        } else {
            HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "subjects" }))
        }
    })?;
    // A new offering can make a finished semester incomplete again.
    let affected: BTreeSet<String> =
        affected_students(&tx, &id, valid.department.code(), valid.semester)?
            .into_iter()
            .collect();
    recompute_all(&tx, &affected)?;
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    let subject = fetch_subject(conn, &id)?;
    tracing::info!(code = %subject.code, department = %subject.department, "subject created");
    Ok(json!({ "subject": subject }))
}

fn handle_subjects_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let subject_id = required_str(&req.params, "subjectId")?;
    let patch = patch_obj(req)?;
    let existing = fetch_subject(conn, &subject_id)?;

    let mut fields = SubjectFields::from_row(&existing);
    fields.apply(patch)?;
    let valid = fields.validate().map_err(|e| HandlerErr::validation(&e))?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let mut affected: BTreeSet<String> =
        affected_students(&tx, &existing.id, &existing.department, existing.semester)?
            .into_iter()
            .collect();

    tx.execute(
        "UPDATE subjects SET code = ?, name = ?, department = ?, semester = ?, credits = ?, subject_type = ?
         WHERE id = ?",
        rusqlite::params![
            &valid.code,
            &valid.name,
            valid.department.code(),
            valid.semester,
            valid.credits,
            valid.subject_type.as_str(),
            &existing.id,
        ],
    )
    .map_err(|e| {
        if db::is_unique_violation(&e) {
            duplicate_code(&valid)
        } else {
            HandlerErr::db("db_update_failed", e).with_details(json!({ "table": "subjects" }))
        }
    })?;

    if valid.credits != existing.credits {
        tx.execute(
            "UPDATE marks SET credits_earned = CASE WHEN grade = 'F' THEN 0 ELSE ? END,
               updated_at = ?
             WHERE subject_id = ?",
            rusqlite::params![valid.credits, db::now_ts(), &existing.id],
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e).with_details(json!({ "table": "marks" })))?;
    }

    affected.extend(affected_students(
        &tx,
        &existing.id,
        valid.department.code(),
        valid.semester,
    )?);
    recompute_all(&tx, &affected)?;
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    let subject = fetch_subject(conn, &existing.id)?;
    tracing::info!(code = %subject.code, recomputed = affected.len(), "subject updated");
    Ok(json!({ "subject": subject }))
}

fn handle_subjects_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let subject_id = required_str(&req.params, "subjectId")?;
    let existing = fetch_subject(conn, &subject_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let affected: BTreeSet<String> =
        affected_students(&tx, &existing.id, &existing.department, existing.semester)?
            .into_iter()
            .collect();
    let deleted_marks = tx
        .execute("DELETE FROM marks WHERE subject_id = ?", [&existing.id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e).with_details(json!({ "table": "marks" })))?;
    tx.execute("DELETE FROM subjects WHERE id = ?", [&existing.id])
        .map_err(|e| {
            HandlerErr::db("db_delete_failed", e).with_details(json!({ "table": "subjects" }))
        })?;
    recompute_all(&tx, &affected)?;
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    tracing::info!(code = %existing.code, deleted_marks, "subject removed");
    Ok(json!({ "subjectId": existing.id, "deletedMarks": deleted_marks }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let outcome = match req.method.as_str() {
        "subjects.list" => handle_subjects_list(state, req),
        "subjects.create" => handle_subjects_create(state, req),
        "subjects.update" => handle_subjects_update(state, req),
        "subjects.delete" => handle_subjects_delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, outcome))
}
