use crate::db::{self, MarkRow, StudentRow};
use crate::grading::{self, Grade, StudentProgress};
use crate::ipc::error::{respond, HandlerErr, HandlerResult};
use crate::ipc::helpers::{db_conn, opt_i64, opt_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::model::{self, Department, StudentStatus};
use anyhow::Context;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Performer {
    name: String,
    student_id: String,
    department: String,
    semester: i64,
    cgpa: f64,
    grade: Grade,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct BreakdownRow {
    semester: i64,
    subject: String,
    code: String,
    credits: i64,
    total_marks: i64,
    grade: String,
    grade_points: i64,
    result: String,
}

impl BreakdownRow {
    fn from_mark(m: &MarkRow) -> Self {
        Self {
            semester: m.subject.semester,
            subject: m.subject.name.clone(),
            code: m.subject.code.clone(),
            credits: m.subject.credits,
            total_marks: m.total_marks,
            grade: m.grade.clone(),
            grade_points: m.grade_points,
            result: m.result.clone(),
        }
    }
}

fn fetch_student(conn: &Connection, key: &str) -> Result<StudentRow, HandlerErr> {
    db::find_student(conn, key)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::not_found("student"))
}

fn parse_department(raw: &str) -> Result<Department, HandlerErr> {
    Department::parse(raw).map_err(|e| HandlerErr::validation(&[e]))
}

fn query_students(
    conn: &Connection,
    department: Option<Department>,
) -> Result<Vec<StudentRow>, HandlerErr> {
    let (sql, binds): (String, Vec<&str>) = match department {
        Some(d) => (
            format!(
                "SELECT {} FROM students WHERE department = ? ORDER BY student_no",
                db::STUDENT_COLUMNS
            ),
            vec![d.code()],
        ),
        None => (
            format!(
                "SELECT {} FROM students ORDER BY student_no",
                db::STUDENT_COLUMNS
            ),
            Vec::new(),
        ),
    };
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map(rusqlite::params_from_iter(binds), db::student_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))
}

/// Internal ids of students with at least one mark on record.
fn evaluated_ids(conn: &Connection) -> Result<HashSet<String>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT DISTINCT student_id FROM marks")
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map([], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<HashSet<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn has_status(s: &StudentRow, status: StudentStatus) -> bool {
    s.status == status.as_str()
}

fn mean_2(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(grading::round_2(values.iter().sum::<f64>() / values.len() as f64))
    }
}

/// Highest CGPA first; ties go to the lower student number.
fn top_performers(
    students: &[StudentRow],
    evaluated: &HashSet<String>,
    n: usize,
) -> Vec<Performer> {
    let mut ranked: Vec<&StudentRow> = students
        .iter()
        .filter(|s| evaluated.contains(&s.id))
        .collect();
    ranked.sort_by(|a, b| {
        b.cgpa
            .total_cmp(&a.cgpa)
            .then_with(|| a.student_id.cmp(&b.student_id))
    });
    ranked
        .into_iter()
        .take(n)
        .map(|s| Performer {
            name: s.name.clone(),
            student_id: s.student_id.clone(),
            department: s.department.clone(),
            semester: s.semester,
            cgpa: s.cgpa,
            grade: grading::cgpa_grade(s.cgpa),
        })
        .collect()
}

fn cgpa_bucket(cgpa: f64) -> &'static str {
    if cgpa >= 9.0 {
        "9-10"
    } else if cgpa >= 8.0 {
        "8-9"
    } else if cgpa >= 7.0 {
        "7-8"
    } else if cgpa >= 6.0 {
        "6-7"
    } else if cgpa >= 5.0 {
        "5-6"
    } else {
        "below5"
    }
}

const CGPA_BUCKETS: [&str; 6] = ["9-10", "8-9", "7-8", "6-7", "5-6", "below5"];

fn student_report(
    student: &StudentRow,
    marks: &[MarkRow],
    progress: &StudentProgress,
) -> serde_json::Value {
    let sgpa = progress
        .semester_performance
        .get(&student.semester)
        .map(|p| p.sgpa);
    let breakdown: Vec<BreakdownRow> = marks.iter().map(BreakdownRow::from_mark).collect();
    json!({
        "student": student,
        "cgpa": progress.cgpa,
        "sgpa": sgpa,
        "status": progress.status,
        "grade": progress.grade,
        "average": progress.average,
        "totalMarks": progress.total_marks,
        "earnedCredits": progress.earned_credits,
        "totalCredits": progress.total_credits,
        "passedSubjects": progress.passed_subjects,
        "failedSubjects": progress.failed_subjects,
        "semesterPerformance": progress.semester_performance,
        "marksBreakdown": breakdown,
        "progressRemark": progress.progress_remark,
    })
}

fn handle_student_academic(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let key = required_str(&req.params, "studentId")?;
    let student = fetch_student(conn, &key)?;
    let (marks, progress) =
        db::student_progress(conn, &student).map_err(|e| HandlerErr::db("db_query_failed", e))?;
    Ok(student_report(&student, &marks, &progress))
}

fn handle_department_performance(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let department = parse_department(&required_str(&req.params, "department")?)?;
    let students = query_students(conn, Some(department))?;
    let evaluated = evaluated_ids(conn)?;

    let cgpas: Vec<f64> = students
        .iter()
        .filter(|s| evaluated.contains(&s.id))
        .map(|s| s.cgpa)
        .collect();
    let mut semester_distribution: BTreeMap<i64, usize> = BTreeMap::new();
    for s in &students {
        *semester_distribution.entry(s.semester).or_default() += 1;
    }
    let count = |status: StudentStatus| students.iter().filter(|s| has_status(s, status)).count();

    Ok(json!({
        "department": department.code(),
        "departmentName": department.full_name(),
        "totalStudents": students.len(),
        "averageCGPA": mean_2(&cgpas),
        "passedStudents": count(StudentStatus::Passed),
        "failedStudents": count(StudentStatus::Failed),
        "activeStudents": count(StudentStatus::Active),
        "semesterDistribution": semester_distribution,
        "topPerformers": top_performers(&students, &evaluated, state.config.top_performers),
    }))
}

#[derive(Debug, Default)]
struct SubjectStats {
    totals: Vec<i64>,
    passed: usize,
    grades: BTreeMap<&'static str, usize>,
}

fn handle_semester_analysis(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let department = parse_department(&required_str(&req.params, "department")?)?;
    let semester = opt_i64(&req.params, "semester")?
        .ok_or_else(|| HandlerErr::bad_params("missing semester"))?;
    let semester = model::validate_semester(semester).map_err(|e| HandlerErr::validation(&[e]))?;

    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM subjects WHERE department = ? AND semester = ? ORDER BY code",
            db::SUBJECT_COLUMNS
        ))
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let subjects = stmt
        .query_map((department.code(), semester), db::subject_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let mut stats: BTreeMap<String, SubjectStats> = BTreeMap::new();
    let mut student_rows = Vec::new();
    let mut sgpas = Vec::new();
    for student in query_students(conn, Some(department))? {
        let marks = db::marks_for_student(conn, &student.id)
            .map_err(|e| HandlerErr::db("db_query_failed", e))?;
        let in_semester: Vec<&MarkRow> = marks
            .iter()
            .filter(|m| m.subject.semester == semester && m.subject.department == department.code())
            .collect();
        if in_semester.is_empty() && student.semester != semester {
            continue;
        }
        for m in &in_semester {
            let entry = stats.entry(m.subject.id.clone()).or_default();
            entry.totals.push(m.total_marks);
            let grade = m.entry().grade;
            if !grade.is_fail() {
                entry.passed += 1;
            }
            *entry.grades.entry(grade.as_str()).or_default() += 1;
        }
        let entries: Vec<_> = in_semester.iter().map(|m| m.entry()).collect();
        let sgpa = if entries.is_empty() {
            None
        } else {
            Some(grading::grade_point_average(&entries))
        };
        if let Some(v) = sgpa {
            sgpas.push(v);
        }
        student_rows.push(json!({
            "studentId": student.student_id,
            "name": student.name,
            "sgpa": sgpa,
            "passedSubjects": entries.iter().filter(|e| !e.grade.is_fail()).count(),
            "totalSubjects": entries.len(),
        }));
    }

    let subject_rows: Vec<serde_json::Value> = subjects
        .iter()
        .map(|subject| {
            let s = stats.remove(&subject.id).unwrap_or_default();
            let entries = s.totals.len();
            let mut distribution = serde_json::Map::new();
            for g in Grade::ALL {
                let n = s.grades.get(g.as_str()).copied().unwrap_or(0);
                distribution.insert(g.as_str().to_string(), json!(n));
            }
            let average = if entries == 0 {
                None
            } else {
                Some(grading::round_2(
                    s.totals.iter().sum::<i64>() as f64 / entries as f64,
                ))
            };
            let pass_rate = if entries == 0 {
                None
            } else {
                Some(grading::round_2(s.passed as f64 * 100.0 / entries as f64))
            };
            json!({
                "subjectId": subject.id,
                "code": subject.code,
                "name": subject.name,
                "credits": subject.credits,
                "entries": entries,
                "average": average,
                "highest": s.totals.iter().max(),
                "lowest": s.totals.iter().min(),
                "passed": s.passed,
                "failed": entries - s.passed,
                "passRate": pass_rate,
                "gradeDistribution": distribution,
            })
        })
        .collect();

    Ok(json!({
        "department": department.code(),
        "semester": semester,
        "totalStudents": student_rows.len(),
        "averageSGPA": mean_2(&sgpas),
        "subjects": subject_rows,
        "students": student_rows,
    }))
}

fn handle_cgpa_analysis(state: &mut AppState, _req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let students = query_students(conn, None)?;
    let evaluated_set = evaluated_ids(conn)?;
    let evaluated: Vec<&StudentRow> = students
        .iter()
        .filter(|s| evaluated_set.contains(&s.id))
        .collect();

    let mut distribution: BTreeMap<&'static str, usize> =
        CGPA_BUCKETS.iter().map(|b| (*b, 0)).collect();
    for s in &evaluated {
        *distribution.entry(cgpa_bucket(s.cgpa)).or_default() += 1;
    }

    let departments: Vec<serde_json::Value> = Department::ALL
        .iter()
        .filter_map(|d| {
            let in_dept: Vec<&StudentRow> = students
                .iter()
                .filter(|s| s.department == d.code())
                .collect();
            if in_dept.is_empty() {
                return None;
            }
            let cgpas: Vec<f64> = in_dept
                .iter()
                .filter(|s| evaluated_set.contains(&s.id))
                .map(|s| s.cgpa)
                .collect();
            Some(json!({
                "department": d.code(),
                "students": in_dept.len(),
                "averageCGPA": mean_2(&cgpas),
            }))
        })
        .collect();

    let cgpas: Vec<f64> = evaluated.iter().map(|s| s.cgpa).collect();
    Ok(json!({
        "totalStudents": students.len(),
        "evaluatedStudents": evaluated.len(),
        "averageCGPA": mean_2(&cgpas),
        "distribution": distribution,
        "departments": departments,
        "topPerformers": top_performers(&students, &evaluated_set, state.config.top_performers),
    }))
}

fn write_student_csv(path: &Path, marks: &[MarkRow]) -> anyhow::Result<usize> {
    let mut w = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.to_string_lossy()))?;
    for m in marks {
        w.serialize(BreakdownRow::from_mark(m))
            .context("failed to write csv row")?;
    }
    w.flush().context("failed to flush csv")?;
    Ok(marks.len())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CgpaCsvRow<'a> {
    student_id: &'a str,
    name: &'a str,
    department: &'a str,
    semester: i64,
    section: &'a str,
    cgpa: f64,
    grade: &'static str,
    status: &'a str,
}

fn write_cgpa_csv(
    path: &Path,
    students: &[StudentRow],
    evaluated: &HashSet<String>,
) -> anyhow::Result<usize> {
    let mut w = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.to_string_lossy()))?;
    for s in students {
        w.serialize(CgpaCsvRow {
            student_id: &s.student_id,
            name: &s.name,
            department: &s.department,
            semester: s.semester,
            section: &s.section,
            cgpa: s.cgpa,
            grade: if evaluated.contains(&s.id) {
                grading::cgpa_grade(s.cgpa).as_str()
            } else {
                "N/A"
            },
            status: &s.status,
        })
        .context("failed to write csv row")?;
    }
    w.flush().context("failed to flush csv")?;
    Ok(students.len())
}

fn handle_export_csv(state: &mut AppState, req: &Request) -> HandlerResult {
    let conn = db_conn(state)?;
    let report = required_str(&req.params, "report")?;
    let out_path = PathBuf::from(required_str(&req.params, "outPath")?);
    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;
    }

    let written = match report.as_str() {
        "student" => {
            let key = opt_str(&req.params, "studentId")?
                .ok_or_else(|| HandlerErr::bad_params("missing studentId"))?;
            let student = fetch_student(conn, &key)?;
            let marks = db::marks_for_student(conn, &student.id)
                .map_err(|e| HandlerErr::db("db_query_failed", e))?;
            write_student_csv(&out_path, &marks)
        }
        "cgpa" => {
            let students = query_students(conn, None)?;
            let evaluated = evaluated_ids(conn)?;
            write_cgpa_csv(&out_path, &students, &evaluated)
        }
        other => {
            return Err(HandlerErr::bad_params(format!(
                "unknown report: {} (expected student or cgpa)",
                other
            )))
        }
    }
    .map_err(|e| HandlerErr::new("io_failed", format!("{e:?}")))?;

    tracing::info!(report = %report, rows = written, path = %out_path.display(), "csv exported");
    Ok(json!({ "rows": written, "path": out_path.to_string_lossy() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let outcome = match req.method.as_str() {
        "reports.studentAcademic" => handle_student_academic(state, req),
        "reports.departmentPerformance" => handle_department_performance(state, req),
        "reports.semesterAnalysis" => handle_semester_analysis(state, req),
        "reports.cgpaAnalysis" => handle_cgpa_analysis(state, req),
        "reports.exportCsv" => handle_export_csv(state, req),
        _ => return None,
    };
    Some(respond(&req.id, outcome))
}
