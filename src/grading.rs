use serde::Serialize;
use std::collections::BTreeMap;

use crate::model::StudentStatus;

pub const THEORY_MAX: f64 = 100.0;
pub const PRACTICAL_MAX: f64 = 100.0;
pub const INTERNAL_MAX: f64 = 50.0;
pub const ATTENDANCE_MAX: f64 = 10.0;

/// Minimum total for a "Pass" result. Deliberately separate from the grade
/// ladder, whose F cutoff sits at 50.
pub const PASS_MARK: i64 = 40;

/// Raw component scores as submitted. Any field may be absent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Components {
    pub theory: Option<f64>,
    pub practical: Option<f64>,
    pub internal: Option<f64>,
    pub attendance: Option<f64>,
}

/// Components after clamping; every field is finite and inside its range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClampedComponents {
    pub theory: f64,
    pub practical: f64,
    pub internal: f64,
    pub attendance: f64,
}

fn clamp_component(v: Option<f64>, max: f64) -> f64 {
    match v {
        Some(x) if x.is_finite() => x.clamp(0.0, max),
        _ => 0.0,
    }
}

impl Components {
    pub fn clamped(&self) -> ClampedComponents {
        ClampedComponents {
            theory: clamp_component(self.theory, THEORY_MAX),
            practical: clamp_component(self.practical, PRACTICAL_MAX),
            internal: clamp_component(self.internal, INTERNAL_MAX),
            attendance: clamp_component(self.attendance, ATTENDANCE_MAX),
        }
    }
}

/// Lab courses are recognised by a positive practical score, not by the
/// subject's declared type.
pub fn calculate_total_marks(components: &Components) -> i64 {
    let c = components.clamped();
    let sum = if c.practical > 0.0 {
        c.theory + c.practical + c.internal
    } else {
        c.theory + c.internal + c.attendance
    };
    sum.round() as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Grade {
    S,
    A,
    B,
    C,
    D,
    E,
    F,
}

impl Grade {
    pub const ALL: [Grade; 7] = [
        Grade::S,
        Grade::A,
        Grade::B,
        Grade::C,
        Grade::D,
        Grade::E,
        Grade::F,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Grade::S => "S",
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::E => "E",
            Grade::F => "F",
        }
    }

    pub fn parse(s: &str) -> Option<Grade> {
        Grade::ALL.into_iter().find(|g| g.as_str() == s)
    }

    pub fn points(self) -> i64 {
        match self {
            Grade::S => 10,
            Grade::A => 9,
            Grade::B => 8,
            Grade::C => 7,
            Grade::D => 6,
            Grade::E => 5,
            Grade::F => 0,
        }
    }

    pub fn is_fail(self) -> bool {
        self == Grade::F
    }
}

const GRADE_LADDER: [(i64, Grade); 6] = [
    (90, Grade::S),
    (80, Grade::A),
    (70, Grade::B),
    (60, Grade::C),
    (55, Grade::D),
    (50, Grade::E),
];

/// Highest threshold first; first match wins.
pub fn calculate_grade(total: i64) -> Grade {
    GRADE_LADDER
        .iter()
        .find(|(min, _)| total >= *min)
        .map(|(_, g)| *g)
        .unwrap_or(Grade::F)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MarkResult {
    Pass,
    Fail,
}

impl MarkResult {
    pub fn as_str(self) -> &'static str {
        match self {
            MarkResult::Pass => "Pass",
            MarkResult::Fail => "Fail",
        }
    }
}

pub fn result(total: i64) -> MarkResult {
    if total >= PASS_MARK {
        MarkResult::Pass
    } else {
        MarkResult::Fail
    }
}

pub fn credits_earned(grade: Grade, subject_credits: i64) -> i64 {
    if grade.is_fail() {
        0
    } else {
        subject_credits
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradedMark {
    pub total_marks: i64,
    pub grade: Grade,
    pub grade_points: i64,
    pub credits_earned: i64,
    pub result: MarkResult,
}

pub fn grade_mark(components: &Components, subject_credits: i64) -> GradedMark {
    let total_marks = calculate_total_marks(components);
    let grade = calculate_grade(total_marks);
    GradedMark {
        total_marks,
        grade,
        grade_points: grade.points(),
        credits_earned: credits_earned(grade, subject_credits),
        result: result(total_marks),
    }
}

pub fn round_2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// One stored mark as seen by the aggregate: graded values plus the
/// owning subject's credit weight and semester.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkEntry {
    pub semester: i64,
    pub credits: i64,
    pub total_marks: i64,
    pub grade: Grade,
    pub grade_points: i64,
    pub credits_earned: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterPerformance {
    pub sgpa: f64,
    pub total_subjects: usize,
    pub passed_subjects: usize,
    pub earned_credits: i64,
    pub total_credits: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProgress {
    pub total_marks: i64,
    pub average: f64,
    pub cgpa: f64,
    pub grade: String,
    pub total_subjects: usize,
    pub passed_subjects: usize,
    pub failed_subjects: usize,
    pub earned_credits: i64,
    pub total_credits: i64,
    pub semester_performance: BTreeMap<i64, SemesterPerformance>,
    pub status: StudentStatus,
    pub progress_remark: String,
}

/// Credit-weighted grade point average; falls back to the plain mean of
/// grade points when no credits are tracked.
pub fn grade_point_average(entries: &[MarkEntry]) -> f64 {
    if entries.is_empty() {
        return 0.0;
    }
    let credit_sum: i64 = entries.iter().map(|e| e.credits.max(0)).sum();
    let avg = if credit_sum > 0 {
        let weighted: i64 = entries
            .iter()
            .map(|e| e.grade_points * e.credits.max(0))
            .sum();
        weighted as f64 / credit_sum as f64
    } else {
        let points: i64 = entries.iter().map(|e| e.grade_points).sum();
        points as f64 / entries.len() as f64
    };
    round_2(avg)
}

/// Inputs beyond the mark set that the status rule depends on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusContext {
    pub current: StudentStatus,
    pub current_semester: i64,
    /// Subjects offered for the student's department in `current_semester`.
    pub offered_subjects: usize,
}

pub fn derive_status(entries: &[MarkEntry], ctx: &StatusContext) -> StudentStatus {
    if ctx.current.is_administrative() {
        return ctx.current;
    }
    if entries.is_empty() {
        return StudentStatus::NotEvaluated;
    }
    let marked_current = entries
        .iter()
        .filter(|e| e.semester == ctx.current_semester)
        .count();
    let complete = marked_current >= ctx.offered_subjects;
    let any_fail = entries.iter().any(|e| e.grade.is_fail());
    match (complete, any_fail) {
        (true, false) => StudentStatus::Passed,
        (true, true) => StudentStatus::Failed,
        (false, _) => StudentStatus::Active,
    }
}

pub fn progress_remark(cgpa: f64, failed_subjects: usize, evaluated: bool) -> String {
    if !evaluated {
        return "No marks recorded yet".to_string();
    }
    let band = if cgpa >= 9.0 {
        "Outstanding performance, keep it up"
    } else if cgpa >= 8.0 {
        "Excellent performance"
    } else if cgpa >= 7.0 {
        "Very good performance"
    } else if cgpa >= 6.0 {
        "Good performance with room to improve"
    } else if cgpa >= 5.0 {
        "Satisfactory; needs consistent improvement"
    } else {
        "Needs immediate academic attention"
    };
    match failed_subjects {
        0 => band.to_string(),
        1 => format!("{band}. Clear the backlog in 1 subject"),
        n => format!("{band}. Clear the backlogs in {n} subjects"),
    }
}

/// Full recompute of a student's aggregate from every stored mark.
pub fn summarize_student(entries: &[MarkEntry], ctx: &StatusContext) -> StudentProgress {
    let total_marks: i64 = entries.iter().map(|e| e.total_marks).sum();
    let average = if entries.is_empty() {
        0.0
    } else {
        round_2(total_marks as f64 / entries.len() as f64)
    };
    let failed_subjects = entries.iter().filter(|e| e.grade.is_fail()).count();

    let mut by_semester: BTreeMap<i64, Vec<MarkEntry>> = BTreeMap::new();
    for e in entries {
        by_semester.entry(e.semester).or_default().push(*e);
    }
    let semester_performance = by_semester
        .into_iter()
        .map(|(sem, list)| {
            let perf = SemesterPerformance {
                sgpa: grade_point_average(&list),
                total_subjects: list.len(),
                passed_subjects: list.iter().filter(|e| !e.grade.is_fail()).count(),
                earned_credits: list.iter().map(|e| e.credits_earned).sum(),
                total_credits: list.iter().map(|e| e.credits).sum(),
            };
            (sem, perf)
        })
        .collect();

    let cgpa = grade_point_average(entries);
    let grade = if entries.is_empty() {
        "N/A".to_string()
    } else {
        calculate_grade(average.round() as i64).as_str().to_string()
    };

    StudentProgress {
        total_marks,
        average,
        cgpa,
        grade,
        total_subjects: entries.len(),
        passed_subjects: entries.len() - failed_subjects,
        failed_subjects,
        earned_credits: entries.iter().map(|e| e.credits_earned).sum(),
        total_credits: entries.iter().map(|e| e.credits).sum(),
        semester_performance,
        status: derive_status(entries, ctx),
        progress_remark: progress_remark(cgpa, failed_subjects, !entries.is_empty()),
    }
}

/// Letter for a CGPA on the same ladder (CGPA scaled to a 100-point total).
pub fn cgpa_grade(cgpa: f64) -> Grade {
    calculate_grade((cgpa * 10.0).round() as i64)
}
