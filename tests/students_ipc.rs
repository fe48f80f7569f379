mod test_support;

use serde_json::json;
use test_support::{error_code, Session};

#[test]
fn create_generates_ids_and_starts_not_evaluated() {
    let mut s = Session::open();
    let first = s.create_student("Asha Rao", "CSE", 1);
    let second = s.create_student("Ben Das", "CSE", 1);
    let other = s.create_student("Chen Li", "ECE", 2);
    assert_eq!(first, "CSE25001");
    assert_eq!(second, "CSE25002");
    assert_eq!(other, "ECE25001");

    let got = s.ok("students.get", json!({ "studentId": first }));
    let student = &got["student"];
    assert_eq!(student["name"].as_str(), Some("Asha Rao"));
    assert_eq!(student["section"].as_str(), Some("A"));
    assert_eq!(student["status"].as_str(), Some("Not Evaluated"));
    assert_eq!(student["cgpa"].as_f64(), Some(0.0));

    // Internal id resolves too.
    let internal = student["id"].as_str().expect("id").to_string();
    let again = s.ok("students.get", json!({ "studentId": internal }));
    assert_eq!(again["student"]["studentId"].as_str(), Some("CSE25001"));
}

#[test]
fn explicit_student_id_must_be_unique() {
    let mut s = Session::open();
    let params = json!({
        "studentId": "IT25042",
        "name": "Dana Roy",
        "email": "dana@college.edu",
        "department": "IT",
        "semester": 3,
        "academicYear": "2025-2026",
    });
    let created = s.ok("students.create", params.clone());
    assert_eq!(created["student"]["studentId"].as_str(), Some("IT25042"));

    let error = s.err("students.create", params.clone());
    assert_eq!(error_code(&error), "conflict");

    // A student number shaped like an internal id would shadow lookups.
    let internal = created["student"]["id"].as_str().expect("id").to_string();
    let mut clash = params;
    clash["studentId"] = json!(internal);
    let error = s.err("students.create", clash);
    assert_eq!(error_code(&error), "validation_failed");
    assert!(error["details"]["fields"]
        .as_object()
        .expect("fields")
        .contains_key("studentId"));

    let got = s.ok("students.get", json!({ "studentId": internal }));
    assert_eq!(got["student"]["studentId"].as_str(), Some("IT25042"));
}

#[test]
fn validation_reports_every_bad_field() {
    let mut s = Session::open();
    let error = s.err(
        "students.create",
        json!({
            "email": "not-an-email",
            "phone": "12345",
            "department": "BIO",
            "semester": 9,
            "section": "Z",
            "academicYear": "2025-2027",
        }),
    );
    assert_eq!(error_code(&error), "validation_failed");
    let fields = error["details"]["fields"].as_object().expect("fields");
    for key in [
        "name",
        "email",
        "phone",
        "department",
        "semester",
        "section",
        "academicYear",
    ] {
        assert!(fields.contains_key(key), "missing field error for {}", key);
    }

    let error = s.err("students.create", json!({ "name": "X", "email": 5 }));
    assert_eq!(error_code(&error), "bad_params");
}

#[test]
fn list_filters_and_pages() {
    let mut s = Session::open();
    for i in 0..5 {
        s.create_student(&format!("Cse Student {}", i), "CSE", 1);
    }
    for i in 0..3 {
        s.create_student(&format!("Mech Student {}", i), "MECH", 4);
    }

    let all = s.ok("students.list", json!({}));
    assert_eq!(all["total"].as_i64(), Some(8));

    let mech = s.ok("students.list", json!({ "department": "mech" }));
    assert_eq!(mech["total"].as_i64(), Some(3));
    assert!(mech["students"]
        .as_array()
        .expect("students")
        .iter()
        .all(|st| st["department"].as_str() == Some("MECH")));

    let page2 = s.ok("students.list", json!({ "department": "CSE", "limit": 2, "page": 2 }));
    assert_eq!(page2["total"].as_i64(), Some(5));
    assert_eq!(page2["pages"].as_i64(), Some(3));
    let rows = page2["students"].as_array().expect("students");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["studentId"].as_str(), Some("CSE25003"));

    let search = s.ok("students.list", json!({ "search": "MECH25002" }));
    assert_eq!(search["total"].as_i64(), Some(1));

    let by_status = s.ok("students.list", json!({ "status": "Not Evaluated" }));
    assert_eq!(by_status["total"].as_i64(), Some(8));

    let error = s.err("students.list", json!({ "semester": 12 }));
    assert_eq!(error_code(&error), "validation_failed");
}

#[test]
fn out_of_range_page_is_rejected_and_sidecar_keeps_serving() {
    let mut s = Session::open();
    s.create_student("Page Edge", "CSE", 1);

    let error = s.err(
        "students.list",
        json!({ "page": i64::MAX, "limit": 10 }),
    );
    assert_eq!(error_code(&error), "bad_params");

    // 1e19 saturates to i64::MAX.
    let error = s.err("students.list", json!({ "page": 1e19 }));
    assert_eq!(error_code(&error), "bad_params");

    // One row per page still fits, and is simply past the end.
    let far = s.ok("students.list", json!({ "page": i64::MAX, "limit": 1 }));
    assert_eq!(far["total"].as_i64(), Some(1));
    assert_eq!(far["students"].as_array().map(|a| a.len()), Some(0));

    let health = s.ok("health", json!({}));
    assert!(health["version"].is_string());
    let listed = s.ok("students.list", json!({}));
    assert_eq!(listed["total"].as_i64(), Some(1));
}

#[test]
fn update_applies_patch_and_keeps_administrative_status() {
    let mut s = Session::open();
    let id = s.create_student("Esha Nair", "EEE", 2);

    let updated = s.ok(
        "students.update",
        json!({ "studentId": id, "patch": { "section": "c", "phone": "9876543210" } }),
    );
    let student = &updated["student"];
    assert_eq!(student["section"].as_str(), Some("C"));
    assert_eq!(student["phone"].as_str(), Some("9876543210"));
    assert_eq!(student["name"].as_str(), Some("Esha Nair"));

    let dropped = s.ok(
        "students.update",
        json!({ "studentId": id, "patch": { "status": "Dropout" } }),
    );
    assert_eq!(dropped["student"]["status"].as_str(), Some("Dropout"));

    let error = s.err(
        "students.update",
        json!({ "studentId": id, "patch": { "email": "broken" } }),
    );
    assert_eq!(error_code(&error), "validation_failed");

    let error = s.err(
        "students.update",
        json!({ "studentId": "NOPE", "patch": { "name": "x" } }),
    );
    assert_eq!(error_code(&error), "not_found");
}

#[test]
fn delete_removes_student_and_marks() {
    let mut s = Session::open();
    let subject = s.create_subject("CS101", "CSE", 1, 4, "Theory");
    let id = s.create_student("Farah Khan", "CSE", 1);
    s.save_mark(&id, &subject, json!({ "theory": 70, "internal": 30 }));

    let deleted = s.ok("students.delete", json!({ "studentId": id }));
    assert_eq!(deleted["deletedMarks"].as_u64(), Some(1));

    let error = s.err("students.get", json!({ "studentId": id }));
    assert_eq!(error_code(&error), "not_found");
}

#[test]
fn filter_options_list_present_values() {
    let mut s = Session::open();
    s.create_student("Gita Sen", "CIVIL", 5);
    s.create_student("Hari Pal", "AERO", 7);

    let opts = s.ok("students.filterOptions", json!({}));
    assert_eq!(opts["departments"], json!(["AERO", "CIVIL"]));
    assert_eq!(opts["allDepartments"].as_array().map(|a| a.len()), Some(8));
    assert_eq!(opts["semesters"], json!([1, 2, 3, 4, 5, 6, 7, 8]));
    assert_eq!(opts["sections"], json!(["A", "B", "C", "D"]));
    assert_eq!(opts["academicYears"], json!(["2025-2026"]));
    assert_eq!(opts["statuses"].as_array().map(|a| a.len()), Some(6));
}
