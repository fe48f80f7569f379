use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: &'static str },
    #[error("unknown department: {0}")]
    Department(String),
    #[error("semester must be between 1 and 8, got {0}")]
    Semester(i64),
    #[error("section must be one of A, B, C, D, got {0}")]
    Section(String),
    #[error("academic year must be in format YYYY-YYYY with consecutive years, got {0}")]
    AcademicYear(String),
    #[error("invalid email format: {0}")]
    Email(String),
    #[error("phone must be 10 digits, got {0}")]
    Phone(String),
    #[error("date must be YYYY-MM-DD, got {0}")]
    Date(String),
    #[error("credits must be a positive integer, got {0}")]
    Credits(i64),
    #[error("subject type must be Theory or Lab, got {0}")]
    SubjectType(String),
    #[error("unknown status: {0}")]
    Status(String),
    #[error("student id must be 1-20 letters or digits, got {0}")]
    StudentId(String),
}

impl ValidationError {
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::Required { field } => field,
            ValidationError::Department(_) => "department",
            ValidationError::Semester(_) => "semester",
            ValidationError::Section(_) => "section",
            ValidationError::AcademicYear(_) => "academicYear",
            ValidationError::Email(_) => "email",
            ValidationError::Phone(_) => "phone",
            ValidationError::Date(_) => "date",
            ValidationError::Credits(_) => "credits",
            ValidationError::SubjectType(_) => "type",
            ValidationError::Status(_) => "status",
            ValidationError::StudentId(_) => "studentId",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Department {
    Cse,
    It,
    Ece,
    Eee,
    Mech,
    Civil,
    Chemical,
    Aero,
}

impl Department {
    pub const ALL: [Department; 8] = [
        Department::Cse,
        Department::It,
        Department::Ece,
        Department::Eee,
        Department::Mech,
        Department::Civil,
        Department::Chemical,
        Department::Aero,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Department::Cse => "CSE",
            Department::It => "IT",
            Department::Ece => "ECE",
            Department::Eee => "EEE",
            Department::Mech => "MECH",
            Department::Civil => "CIVIL",
            Department::Chemical => "CHEMICAL",
            Department::Aero => "AERO",
        }
    }

    pub fn full_name(self) -> &'static str {
        match self {
            Department::Cse => "Computer Science & Engineering",
            Department::It => "Information Technology",
            Department::Ece => "Electronics & Communication Engineering",
            Department::Eee => "Electrical & Electronics Engineering",
            Department::Mech => "Mechanical Engineering",
            Department::Civil => "Civil Engineering",
            Department::Chemical => "Chemical Engineering",
            Department::Aero => "Aeronautical Engineering",
        }
    }

    pub fn parse(s: &str) -> Result<Department, ValidationError> {
        let t = s.trim();
        Department::ALL
            .into_iter()
            .find(|d| d.code().eq_ignore_ascii_case(t))
            .ok_or_else(|| ValidationError::Department(t.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectType {
    Theory,
    Lab,
}

impl SubjectType {
    pub fn as_str(self) -> &'static str {
        match self {
            SubjectType::Theory => "Theory",
            SubjectType::Lab => "Lab",
        }
    }

    pub fn parse(s: &str) -> Result<SubjectType, ValidationError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "theory" => Ok(SubjectType::Theory),
            "lab" => Ok(SubjectType::Lab),
            other => Err(ValidationError::SubjectType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StudentStatus {
    Active,
    Passed,
    Failed,
    Graduated,
    Dropout,
    #[serde(rename = "Not Evaluated")]
    NotEvaluated,
}

impl StudentStatus {
    pub const ALL: [StudentStatus; 6] = [
        StudentStatus::Active,
        StudentStatus::Passed,
        StudentStatus::Failed,
        StudentStatus::Graduated,
        StudentStatus::Dropout,
        StudentStatus::NotEvaluated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StudentStatus::Active => "Active",
            StudentStatus::Passed => "Passed",
            StudentStatus::Failed => "Failed",
            StudentStatus::Graduated => "Graduated",
            StudentStatus::Dropout => "Dropout",
            StudentStatus::NotEvaluated => "Not Evaluated",
        }
    }

    pub fn parse(s: &str) -> Result<StudentStatus, ValidationError> {
        let t = s.trim();
        StudentStatus::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(t))
            .ok_or_else(|| ValidationError::Status(t.to_string()))
    }

    /// Set by staff, never derived from marks.
    pub fn is_administrative(self) -> bool {
        matches!(self, StudentStatus::Graduated | StudentStatus::Dropout)
    }
}

pub const SECTIONS: [&str; 4] = ["A", "B", "C", "D"];

pub fn validate_semester(semester: i64) -> Result<i64, ValidationError> {
    if (1..=8).contains(&semester) {
        Ok(semester)
    } else {
        Err(ValidationError::Semester(semester))
    }
}

pub fn validate_section(section: &str) -> Result<String, ValidationError> {
    let t = section.trim().to_ascii_uppercase();
    if SECTIONS.contains(&t.as_str()) {
        Ok(t)
    } else {
        Err(ValidationError::Section(section.to_string()))
    }
}

pub fn validate_academic_year(year: &str) -> Result<String, ValidationError> {
    let t = year.trim();
    let bad = || ValidationError::AcademicYear(t.to_string());
    let (a, b) = t.split_once('-').ok_or_else(bad)?;
    if a.len() != 4 || b.len() != 4 || !a.bytes().chain(b.bytes()).all(|c| c.is_ascii_digit()) {
        return Err(bad());
    }
    let start: i32 = a.parse().map_err(|_| bad())?;
    let end: i32 = b.parse().map_err(|_| bad())?;
    if end != start + 1 {
        return Err(bad());
    }
    Ok(t.to_string())
}

pub fn default_academic_year(today: NaiveDate) -> String {
    format!("{}-{}", today.year(), today.year() + 1)
}

pub fn validate_email(email: &str) -> Result<String, ValidationError> {
    let t = email.trim();
    let bad = || ValidationError::Email(t.to_string());
    if t.chars().any(char::is_whitespace) {
        return Err(bad());
    }
    let (local, domain) = t.split_once('@').ok_or_else(bad)?;
    if local.is_empty() || domain.contains('@') {
        return Err(bad());
    }
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return Err(bad());
    };
    if host.is_empty() || tld.is_empty() {
        return Err(bad());
    }
    Ok(t.to_string())
}

pub fn validate_phone(phone: &str) -> Result<String, ValidationError> {
    let t = phone.trim();
    if t.len() == 10 && t.bytes().all(|c| c.is_ascii_digit()) {
        Ok(t.to_string())
    } else {
        Err(ValidationError::Phone(t.to_string()))
    }
}

pub fn validate_date(date: &str) -> Result<String, ValidationError> {
    let t = date.trim();
    NaiveDate::parse_from_str(t, "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| ValidationError::Date(t.to_string()))
}

pub fn validate_credits(credits: i64) -> Result<i64, ValidationError> {
    if credits > 0 {
        Ok(credits)
    } else {
        Err(ValidationError::Credits(credits))
    }
}

/// Explicit student numbers share the lookup key space with internal uuids,
/// so only letters and digits are allowed.
pub fn validate_student_id(id: &str) -> Result<String, ValidationError> {
    let t = id.trim().to_ascii_uppercase();
    if (1..=20).contains(&t.len()) && t.bytes().all(|c| c.is_ascii_alphanumeric()) {
        Ok(t)
    } else {
        Err(ValidationError::StudentId(id.to_string()))
    }
}

/// `<DEPT><YY><NNN>`, e.g. `CSE25007` for the 7th CSE enrolment of 2025.
pub fn generate_student_id(department: Department, academic_year: &str, seq: i64) -> String {
    let yy = academic_year.get(2..4).unwrap_or("00");
    format!("{}{}{:03}", department.code(), yy, seq)
}
