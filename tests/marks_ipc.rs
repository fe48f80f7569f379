mod test_support;

use serde_json::json;
use test_support::{error_code, Session};

struct Fixture {
    s: Session,
    cs101: String,
    cs102: String,
}

/// CSE semester 1 with a 4-credit theory course and a 3-credit lab.
fn fixture() -> Fixture {
    let mut s = Session::open();
    let cs101 = s.create_subject("CS101", "CSE", 1, 4, "Theory");
    let cs102 = s.create_subject("CS102", "CSE", 1, 3, "Lab");
    Fixture { s, cs101, cs102 }
}

fn marks_count(s: &mut Session, student: &str) -> usize {
    let res = s.ok("marks.forStudent", json!({ "studentId": student }));
    res["marks"].as_array().map(|a| a.len()).unwrap_or(0)
}

#[test]
fn preview_grades_without_storing() {
    let mut s = Session::open();
    let theory = s.ok(
        "marks.preview",
        json!({ "theory": 85, "practical": 0, "internal": 40, "attendance": 8, "credits": 4 }),
    );
    assert_eq!(theory["totalMarks"].as_i64(), Some(133));
    assert_eq!(theory["grade"].as_str(), Some("S"));
    assert_eq!(theory["gradePoints"].as_i64(), Some(10));
    assert_eq!(theory["creditsEarned"].as_i64(), Some(4));
    assert_eq!(theory["result"].as_str(), Some("Pass"));

    let lab = s.ok(
        "marks.preview",
        json!({ "theory": 0, "practical": 70, "internal": 20, "attendance": 5 }),
    );
    assert_eq!(lab["totalMarks"].as_i64(), Some(90));
    assert_eq!(lab["grade"].as_str(), Some("S"));

    let clamped = s.ok(
        "marks.preview",
        json!({ "theory": 250, "internal": "-3", "attendance": 4 }),
    );
    assert_eq!(clamped["components"]["theory"].as_f64(), Some(100.0));
    assert_eq!(clamped["components"]["internal"].as_f64(), Some(0.0));
    assert_eq!(clamped["totalMarks"].as_i64(), Some(104));

    let low = s.ok("marks.preview", json!({ "theory": 30, "internal": 9 }));
    assert_eq!(low["totalMarks"].as_i64(), Some(39));
    assert_eq!(low["result"].as_str(), Some("Fail"));
    assert_eq!(low["grade"].as_str(), Some("F"));

    let error = s.err("marks.preview", json!({ "theory": "lots" }));
    assert_eq!(error_code(&error), "bad_params");
}

#[test]
fn resubmission_overwrites_single_record() {
    let Fixture { mut s, cs101, .. } = fixture();
    let id = s.create_student("Asha Rao", "CSE", 1);

    let first = s.save_mark(&id, &cs101, json!({ "theory": 40, "internal": 10, "attendance": 2 }));
    assert_eq!(first["mark"]["totalMarks"].as_i64(), Some(52));
    assert_eq!(first["mark"]["grade"].as_str(), Some("E"));

    let second = s.save_mark(&id, &cs101, json!({ "theory": 70, "internal": 12, "attendance": 9 }));
    assert_eq!(second["mark"]["totalMarks"].as_i64(), Some(91));
    assert_eq!(second["mark"]["grade"].as_str(), Some("S"));
    assert_eq!(second["mark"]["id"], first["mark"]["id"]);

    assert_eq!(marks_count(&mut s, &id), 1);
}

#[test]
fn status_follows_completeness_and_failures() {
    let Fixture {
        mut s,
        cs101,
        cs102,
    } = fixture();
    let good = s.create_student("Asha Rao", "CSE", 1);
    let weak = s.create_student("Ben Das", "CSE", 1);

    let partial = s.save_mark(&good, &cs101, json!({ "theory": 85, "internal": 40, "attendance": 8 }));
    assert_eq!(partial["progress"]["status"].as_str(), Some("Active"));
    assert_eq!(partial["progress"]["cgpa"].as_f64(), Some(10.0));

    let done = s.save_mark(&good, &cs102, json!({ "practical": 70, "internal": 20 }));
    let progress = &done["progress"];
    assert_eq!(progress["status"].as_str(), Some("Passed"));
    assert_eq!(progress["cgpa"].as_f64(), Some(10.0));
    assert_eq!(progress["earnedCredits"].as_i64(), Some(7));
    assert_eq!(progress["totalSubjects"].as_u64(), Some(2));

    // 45 passes on the pass mark but grades F on the ladder.
    let f = s.save_mark(&weak, &cs101, json!({ "theory": 30, "internal": 10, "attendance": 5 }));
    assert_eq!(f["mark"]["result"].as_str(), Some("Pass"));
    assert_eq!(f["mark"]["grade"].as_str(), Some("F"));
    assert_eq!(f["mark"]["creditsEarned"].as_i64(), Some(0));
    let done = s.save_mark(&weak, &cs102, json!({ "practical": 50, "internal": 15 }));
    let progress = &done["progress"];
    assert_eq!(progress["status"].as_str(), Some("Failed"));
    // (0*4 + 7*3) / 7
    assert_eq!(progress["cgpa"].as_f64(), Some(3.0));
    assert_eq!(progress["failedSubjects"].as_u64(), Some(1));
    assert!(progress["progressRemark"]
        .as_str()
        .expect("remark")
        .contains("backlog"));

    let stored = s.ok("students.get", json!({ "studentId": weak }));
    assert_eq!(stored["student"]["status"].as_str(), Some("Failed"));
    assert_eq!(stored["student"]["cgpa"].as_f64(), Some(3.0));
}

#[test]
fn bulk_save_is_all_or_nothing() {
    let Fixture {
        mut s,
        cs101,
        cs102,
    } = fixture();
    let id = s.create_student("Chen Li", "CSE", 1);

    let error = s.err(
        "marks.bulkUpsert",
        json!({
            "studentId": id,
            "entries": [
                { "subjectId": cs101, "theory": 60, "internal": 15, "attendance": 5 },
                { "subjectId": "no-such-subject", "theory": 60 }
            ]
        }),
    );
    assert_eq!(error_code(&error), "not_found");
    assert_eq!(error["details"]["index"].as_u64(), Some(1));
    assert_eq!(marks_count(&mut s, &id), 0);

    let error = s.err(
        "marks.bulkUpsert",
        json!({
            "studentId": id,
            "entries": [
                { "subjectId": cs101, "theory": 60 },
                { "subjectId": cs102, "practical": 60, "examDate": "31-12-2025" }
            ]
        }),
    );
    assert_eq!(error_code(&error), "validation_failed");
    assert_eq!(marks_count(&mut s, &id), 0);

    let error = s.err("marks.bulkUpsert", json!({ "studentId": id, "entries": [] }));
    assert_eq!(error_code(&error), "bad_params");

    let saved = s.ok(
        "marks.bulkUpsert",
        json!({
            "studentId": id,
            "entries": [
                { "subjectId": cs101, "theory": 60, "internal": 15, "attendance": 5, "examDate": "2025-12-01" },
                { "subjectId": cs102, "practical": 60, "internal": 18 }
            ]
        }),
    );
    assert_eq!(saved["saved"].as_u64(), Some(2));
    assert_eq!(saved["progress"]["status"].as_str(), Some("Passed"));
    assert_eq!(marks_count(&mut s, &id), 2);

    let listed = s.ok("marks.forStudent", json!({ "studentId": id }));
    let cs101_mark = listed["marks"]
        .as_array()
        .expect("marks")
        .iter()
        .find(|m| m["subject"]["code"].as_str() == Some("CS101"))
        .cloned()
        .expect("CS101 mark");
    assert_eq!(cs101_mark["examDate"].as_str(), Some("2025-12-01"));
}

#[test]
fn deleting_a_mark_recomputes_progress() {
    let Fixture {
        mut s,
        cs101,
        cs102,
    } = fixture();
    let id = s.create_student("Dana Roy", "CSE", 1);
    s.save_mark(&id, &cs101, json!({ "theory": 75, "internal": 10 }));
    let saved = s.save_mark(&id, &cs102, json!({ "practical": 20, "internal": 5 }));
    assert_eq!(saved["progress"]["status"].as_str(), Some("Failed"));
    let mark_id = saved["mark"]["id"].as_str().expect("mark id").to_string();

    let after = s.ok("marks.delete", json!({ "markId": mark_id }));
    assert_eq!(after["progress"]["status"].as_str(), Some("Active"));
    assert_eq!(after["progress"]["cgpa"].as_f64(), Some(9.0));

    let error = s.err("marks.delete", json!({ "markId": mark_id }));
    assert_eq!(error_code(&error), "not_found");
}

#[test]
fn subject_changes_recompute_affected_students() {
    let Fixture {
        mut s,
        cs101,
        cs102,
    } = fixture();
    let id = s.create_student("Esha Nair", "CSE", 1);
    s.save_mark(&id, &cs101, json!({ "theory": 30, "internal": 10, "attendance": 5 }));
    let saved = s.save_mark(&id, &cs102, json!({ "practical": 50, "internal": 15 }));
    assert_eq!(saved["progress"]["cgpa"].as_f64(), Some(3.0));

    s.ok(
        "subjects.update",
        json!({ "subjectId": cs101, "patch": { "credits": 2 } }),
    );
    let student = s.ok("students.get", json!({ "studentId": id }));
    // (0*2 + 7*3) / 5
    assert_eq!(student["student"]["cgpa"].as_f64(), Some(4.2));

    // A new offering leaves the semester incomplete.
    let cs103 = s.create_subject("CS103", "CSE", 1, 3, "Theory");
    let student = s.ok("students.get", json!({ "studentId": id }));
    assert_eq!(student["student"]["status"].as_str(), Some("Active"));

    let deleted = s.ok("subjects.delete", json!({ "subjectId": cs103 }));
    assert_eq!(deleted["deletedMarks"].as_u64(), Some(0));
    let student = s.ok("students.get", json!({ "studentId": id }));
    assert_eq!(student["student"]["status"].as_str(), Some("Failed"));

    s.ok("subjects.delete", json!({ "subjectId": cs101 }));
    let student = s.ok("students.get", json!({ "studentId": id }));
    assert_eq!(student["student"]["status"].as_str(), Some("Passed"));
    assert_eq!(student["student"]["cgpa"].as_f64(), Some(7.0));
}

#[test]
fn subject_code_is_unique_per_department_semester() {
    let Fixture { mut s, .. } = fixture();
    let error = s.err(
        "subjects.create",
        json!({ "code": "cs101", "name": "Dup", "department": "CSE", "semester": 1, "credits": 3 }),
    );
    assert_eq!(error_code(&error), "conflict");

    // Same code elsewhere is fine.
    s.create_subject("CS101", "IT", 1, 3, "Theory");

    let error = s.err(
        "subjects.create",
        json!({ "code": "X1", "name": "Bad", "department": "CSE", "semester": 1, "credits": 0, "type": "Seminar" }),
    );
    assert_eq!(error_code(&error), "validation_failed");
    let fields = error["details"]["fields"].as_object().expect("fields");
    assert!(fields.contains_key("credits"));
    assert!(fields.contains_key("type"));

    let listed = s.ok("subjects.list", json!({ "department": "CSE", "semester": 1 }));
    let codes: Vec<&str> = listed["subjects"]
        .as_array()
        .expect("subjects")
        .iter()
        .filter_map(|v| v["code"].as_str())
        .collect();
    assert_eq!(codes, vec!["CS101", "CS102"]);
}
