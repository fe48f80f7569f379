use crate::db::{self, StudentRow};
use crate::ipc::error::{respond, HandlerErr, HandlerResult};
use crate::ipc::helpers::{db_conn, opt_i64, opt_str, patch_obj, required_str};
use crate::ipc::types::{AppState, Request};
use crate::model::{self, Department, StudentStatus, ValidationError};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde_json::json;
use uuid::Uuid;

/// Editable student fields as received, before validation.
#[derive(Debug, Clone)]
struct StudentFields {
    name: String,
    email: String,
    phone: Option<String>,
    department: Option<String>,
    semester: Option<i64>,
    section: Option<String>,
    academic_year: Option<String>,
    date_of_birth: Option<String>,
    address: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Clone)]
struct ValidStudent {
    name: String,
    email: String,
    phone: Option<String>,
    department: Department,
    semester: i64,
    section: String,
    academic_year: String,
    date_of_birth: Option<String>,
    address: Option<String>,
    status: Option<StudentStatus>,
}

impl StudentFields {
    fn enrollment_defaults() -> Self {
        let today = chrono::Local::now().date_naive();
        Self {
            name: String::new(),
            email: String::new(),
            phone: None,
            department: Some(Department::Cse.code().to_string()),
            semester: Some(1),
            section: Some("A".to_string()),
            academic_year: Some(model::default_academic_year(today)),
            date_of_birth: None,
            address: None,
            status: None,
        }
    }

    fn from_row(row: &StudentRow) -> Self {
        Self {
            name: row.name.clone(),
            email: row.email.clone(),
            phone: row.phone.clone(),
            department: Some(row.department.clone()),
            semester: Some(row.semester),
            section: Some(row.section.clone()),
            academic_year: Some(row.academic_year.clone()),
            date_of_birth: row.date_of_birth.clone(),
            address: row.address.clone(),
            status: None,
        }
    }

    /// Overlays every key present in `src`; null clears optional fields.
    fn apply(&mut self, src: &serde_json::Value) -> Result<(), HandlerErr> {
        let has = |k: &str| src.get(k).is_some();
        if has("name") {
            self.name = opt_str(src, "name")?.unwrap_or_default();
        }
        if has("email") {
            self.email = opt_str(src, "email")?.unwrap_or_default();
        }
        if has("phone") {
            self.phone = opt_str(src, "phone")?;
        }
        if has("department") {
            self.department = opt_str(src, "department")?;
        }
        if has("semester") {
            self.semester = opt_i64(src, "semester")?;
        }
        if has("section") {
            self.section = opt_str(src, "section")?;
        }
        if has("academicYear") {
            self.academic_year = opt_str(src, "academicYear")?;
        }
        if has("dateOfBirth") {
            self.date_of_birth = opt_str(src, "dateOfBirth")?;
        }
        if has("address") {
            self.address = opt_str(src, "address")?;
        }
        if has("status") {
            self.status = opt_str(src, "status")?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<ValidStudent, Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push(ValidationError::Required { field: "name" });
        }
        let email = if self.email.trim().is_empty() {
            errors.push(ValidationError::Required { field: "email" });
            None
        } else {
            model::validate_email(&self.email)
                .map_err(|e| errors.push(e))
                .ok()
        };
        let phone = match self.phone.as_deref() {
            None => None,
            Some(p) => model::validate_phone(p).map_err(|e| errors.push(e)).ok(),
        };
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
        let section = model::validate_section(self.section.as_deref().unwrap_or("A"))
            .map_err(|e| errors.push(e))
            .ok();
        let academic_year = match self.academic_year.as_deref() {
            None => {
                errors.push(ValidationError::Required {
                    field: "academicYear",
                });
                None
            }
            Some(y) => model::validate_academic_year(y)
                .map_err(|e| errors.push(e))
                .ok(),
        };
        let date_of_birth = match self.date_of_birth.as_deref() {
            None => None,
            Some(d) => model::validate_date(d).map_err(|e| errors.push(e)).ok(),
        };
        let status = match self.status.as_deref() {
            None => None,
            Some(s) => StudentStatus::parse(s).map_err(|e| errors.push(e)).ok(),
        };

        match (email, department, semester, section, academic_year) {
            (Some(email), Some(department), Some(semester), Some(section), Some(academic_year))
                if errors.is_empty() =>
            {
                Ok(ValidStudent {
                    name: self.name.trim().to_string(),
                    email,
                    phone,
                    department,
                    semester,
                    section,
                    academic_year,
                    date_of_birth,
                    address: self.address.clone(),
                    status,
                })
            }
            _ => Err(errors),
        }
    }
}

fn fetch_student(conn: &Connection, key: &str) -> Result<StudentRow, HandlerErr> {
    db::find_student(conn, key)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::not_found("student"))
}

fn next_student_no(
    conn: &Connection,
    department: Department,
    academic_year: &str,
) -> Result<String, HandlerErr> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM students WHERE department = ?",
            [department.code()],
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let mut seq = count + 1;
    loop {
        let candidate = model::generate_student_id(department, academic_year, seq);
        let taken = db::find_student(conn, &candidate)
            .map_err(|e| HandlerErr::db("db_query_failed", e))?
            .is_some();
        if !taken {
            return Ok(candidate);
        }
        seq += 1;
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;

    let mut fields = StudentFields::enrollment_defaults();
    fields.apply(&req.params)?;
    let explicit_no = opt_str(&req.params, "studentId")?
        .map(|s| model::validate_student_id(&s))
        .transpose();
    let (valid, explicit_no) = match (fields.validate(), explicit_no) {
        (Ok(valid), Ok(no)) => (valid, no),
        (valid, no) => {
            let mut errors = valid.err().unwrap_or_default();
            errors.extend(no.err());
            return Err(HandlerErr::validation(&errors));
        }
    };

    let student_no = match explicit_no {
        Some(s) => s,
        None => next_student_no(conn, valid.department, &valid.academic_year)?,
    };
    let status = valid
        .status
        .filter(|s| s.is_administrative())
        .unwrap_or(StudentStatus::NotEvaluated);

    let id = Uuid::new_v4().to_string();
    let now = db::now_ts();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    tx.execute(
        "INSERT INTO students(
           id, student_no, name, email, phone, department, semester, section,
           academic_year, date_of_birth, address, cgpa, status, created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?)",
        rusqlite::params![
            &id,
            &student_no,
            &valid.name,
            &valid.email,
            valid.phone.as_deref(),
            valid.department.code(),
            valid.semester,
            &valid.section,
            &valid.academic_year,
            valid.date_of_birth.as_deref(),
            valid.address.as_deref(),
            status.as_str(),
            &now,
            &now,
        ],
    )
    .map_err(|e| {
        if db::is_unique_violation(&e) {
            HandlerErr::conflict(format!("studentId {} already exists", student_no))
                .with_details(json!({ "field": "studentId" }))
        } else {
            HandlerErr::db("db_insert_failed", e).with_details(json!({ "table": "students" }))
        }
    })?;
    db::recompute_student(&tx, &id).map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    let student = fetch_student(conn, &id)?;
    tracing::info!(student = %student.student_id, department = %student.department, "student enrolled");
    Ok(json!({ "student": student }))
}

fn handle_students_get(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let key = required_str(&req.params, "studentId")?;
    let student = fetch_student(conn, &key)?;
    Ok(json!({ "student": student }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let key = required_str(&req.params, "studentId")?;
    let patch = patch_obj(req)?;
    let existing = fetch_student(conn, &key)?;

    let mut fields = StudentFields::from_row(&existing);
    fields.apply(patch)?;
    let valid = fields.validate().map_err(|e| HandlerErr::validation(&e))?;
    let status = valid
        .status
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|| existing.status.clone());

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    tx.execute(
        "UPDATE students SET
           name = ?, email = ?, phone = ?, department = ?, semester = ?, section = ?,
           academic_year = ?, date_of_birth = ?, address = ?, status = ?, updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            &valid.name,
            &valid.email,
            valid.phone.as_deref(),
            valid.department.code(),
            valid.semester,
            &valid.section,
            &valid.academic_year,
            valid.date_of_birth.as_deref(),
            valid.address.as_deref(),
            &status,
            db::now_ts(),
            &existing.id,
        ],
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e).with_details(json!({ "table": "students" })))?;
    db::recompute_student(&tx, &existing.id).map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    let student = fetch_student(conn, &existing.id)?;
    tracing::info!(student = %student.student_id, "student updated");
    Ok(json!({ "student": student }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let key = required_str(&req.params, "studentId")?;
    let existing = fetch_student(conn, &key)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let deleted_marks = tx
        .execute("DELETE FROM marks WHERE student_id = ?", [&existing.id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e).with_details(json!({ "table": "marks" })))?;
    tx.execute("DELETE FROM students WHERE id = ?", [&existing.id])
        .map_err(|e| {
            HandlerErr::db("db_delete_failed", e).with_details(json!({ "table": "students" }))
        })?;
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    tracing::info!(student = %existing.student_id, deleted_marks, "student removed");
    Ok(json!({ "studentId": existing.student_id, "deletedMarks": deleted_marks }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let p = &req.params;

    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();
    let mut errors = Vec::new();

    if let Some(d) = opt_str(p, "department")? {
        match Department::parse(&d) {
            Ok(dept) => {
                clauses.push("department = ?");
                binds.push(Value::Text(dept.code().to_string()));
            }
            Err(e) => errors.push(e),
        }
    }
    if let Some(s) = opt_i64(p, "semester")? {
        match model::validate_semester(s) {
            Ok(s) => {
                clauses.push("semester = ?");
                binds.push(Value::Integer(s));
            }
            Err(e) => errors.push(e),
        }
    }
    if let Some(s) = opt_str(p, "section")? {
        clauses.push("section = ?");
        binds.push(Value::Text(s.to_ascii_uppercase()));
    }
    if let Some(s) = opt_str(p, "status")? {
        match StudentStatus::parse(&s) {
            Ok(st) => {
                clauses.push("status = ?");
                binds.push(Value::Text(st.as_str().to_string()));
            }
            Err(e) => errors.push(e),
        }
    }
    if let Some(y) = opt_str(p, "academicYear")? {
        clauses.push("academic_year = ?");
        binds.push(Value::Text(y));
    }
    if let Some(q) = opt_str(p, "search")? {
        clauses.push("(name LIKE ? OR student_no LIKE ? OR email LIKE ?)");
        let pattern = format!("%{}%", q);
        for _ in 0..3 {
            binds.push(Value::Text(pattern.clone()));
        }
    }
    if !errors.is_empty() {
        return Err(HandlerErr::validation(&errors));
    }

    let cfg = &state.config;
    let limit = opt_i64(p, "limit")?
        .unwrap_or(cfg.default_page_limit)
        .clamp(1, cfg.max_page_limit);
    let page = opt_i64(p, "page")?.unwrap_or(1).max(1);
    let offset = (page - 1)
        .checked_mul(limit)
        .ok_or_else(|| HandlerErr::bad_params(format!("page {} is out of range", page)))?;

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };

    let total: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM students{}", where_sql),
            params_from_iter(binds.iter()),
            |r| r.get(0),
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let sql = format!(
        "SELECT {} FROM students{} ORDER BY student_no LIMIT ? OFFSET ?",
        db::STUDENT_COLUMNS,
        where_sql
    );
    binds.push(Value::Integer(limit));
    binds.push(Value::Integer(offset));
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let students = stmt
        .query_map(params_from_iter(binds.iter()), db::student_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let pages = (total + limit - 1) / limit;
    Ok(json!({
        "students": students,
        "total": total,
        "page": page,
        "limit": limit,
        "pages": pages
    }))
}

fn distinct_column(conn: &Connection, column: &str) -> Result<Vec<String>, HandlerErr> {
    let sql = format!(
        "SELECT DISTINCT {col} FROM students ORDER BY {col}",
        col = column
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map([], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn handle_students_filter_options(state: &mut AppState, _req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let departments = distinct_column(conn, "department")?;
    let academic_years = distinct_column(conn, "academic_year")?;
    let all_departments: Vec<_> = Department::ALL
        .iter()
        .map(|d| json!({ "code": d.code(), "name": d.full_name() }))
        .collect();
    let statuses: Vec<_> = StudentStatus::ALL.iter().map(|s| s.as_str()).collect();
    let semesters: Vec<i64> = (1..=8).collect();

    Ok(json!({
        "departments": departments,
        "allDepartments": all_departments,
        "semesters": semesters,
        "sections": model::SECTIONS,
        "academicYears": academic_years,
        "statuses": statuses
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let outcome = match req.method.as_str() {
        "students.list" => handle_students_list(state, req),
        "students.get" => handle_students_get(state, req),
        "students.create" => handle_students_create(state, req),
        "students.update" => handle_students_update(state, req),
        "students.delete" => handle_students_delete(state, req),
        "students.filterOptions" => handle_students_filter_options(state, req),
        _ => return None,
    };
    Some(respond(&req.id, outcome))
}
