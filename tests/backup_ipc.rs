mod test_support;

use serde_json::json;
use std::io::Read;
use test_support::{error_code, temp_workspace, Session};

#[test]
fn export_bundle_then_import_into_new_workspace() {
    let mut s = Session::open();
    let subject = s.create_subject("EE201", "EEE", 3, 4, "Theory");
    let id = s.create_student("Gita Sen", "EEE", 3);
    s.save_mark(&id, &subject, json!({ "theory": 72, "internal": 30, "attendance": 6 }));

    let out = temp_workspace();
    let bundle = out.path().join("progress-backup.zip");
    let export = s.ok(
        "backup.exportWorkspace",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(export["bundleFormat"].as_str(), Some("progressd-workspace-v1"));
    assert_eq!(export["entryCount"].as_u64(), Some(2));
    let sha = export["dbSha256"].as_str().expect("sha").to_string();
    assert_eq!(sha.len(), 64);

    let file = std::fs::File::open(&bundle).expect("open bundle");
    let mut archive = zip::ZipArchive::new(file).expect("zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    assert!(manifest.contains(&sha));

    let restored = temp_workspace();
    let import = s.ok(
        "backup.importWorkspace",
        json!({
            "inPath": bundle.to_string_lossy(),
            "workspacePath": restored.path().to_string_lossy(),
        }),
    );
    assert_eq!(
        import["bundleFormatDetected"].as_str(),
        Some("progressd-workspace-v1")
    );

    // The imported workspace is now current and carries the data.
    let health = s.ok("health", json!({}));
    assert_eq!(
        health["workspacePath"].as_str(),
        Some(restored.path().to_string_lossy().as_ref())
    );
    let marks = s.ok("marks.forStudent", json!({ "studentId": id }));
    assert_eq!(marks["marks"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(marks["progress"]["status"].as_str(), Some("Passed"));
}

#[test]
fn import_over_current_workspace_replaces_data() {
    let mut s = Session::open();
    s.create_student("Hari Pal", "AERO", 1);

    let out = temp_workspace();
    let bundle = out.path().join("snapshot.zip");
    s.ok(
        "backup.exportWorkspace",
        json!({ "outPath": bundle.to_string_lossy() }),
    );

    s.create_student("Late Comer", "AERO", 1);
    let before = s.ok("students.list", json!({}));
    assert_eq!(before["total"].as_i64(), Some(2));

    s.ok(
        "backup.importWorkspace",
        json!({ "inPath": bundle.to_string_lossy() }),
    );
    let after = s.ok("students.list", json!({}));
    assert_eq!(after["total"].as_i64(), Some(1));
}

#[test]
fn import_rejects_missing_and_corrupt_files() {
    let mut s = Session::open();
    let out = temp_workspace();

    let error = s.err(
        "backup.importWorkspace",
        json!({ "inPath": out.path().join("absent.zip").to_string_lossy() }),
    );
    assert_eq!(error_code(&error), "not_found");

    // Zip magic with garbage behind it.
    let bogus = out.path().join("bogus.zip");
    std::fs::write(&bogus, b"PK\x03\x04not really a zip").expect("write bogus");
    let error = s.err(
        "backup.importWorkspace",
        json!({ "inPath": bogus.to_string_lossy() }),
    );
    assert_eq!(error_code(&error), "backup_failed");

    // The workspace is still usable afterwards.
    let listed = s.ok("students.list", json!({}));
    assert_eq!(listed["total"].as_i64(), Some(0));
}

#[test]
fn import_of_non_database_file_keeps_current_data() {
    let mut s = Session::open();
    let id = s.create_student("Ira Bose", "CIVIL", 2);

    let out = temp_workspace();
    let notes = out.path().join("notes.txt");
    std::fs::write(&notes, b"hello this is not a database").expect("write notes");

    let error = s.err(
        "backup.importWorkspace",
        json!({ "inPath": notes.to_string_lossy() }),
    );
    assert_eq!(error_code(&error), "backup_failed");

    let got = s.ok("students.get", json!({ "studentId": id }));
    assert_eq!(got["student"]["name"].as_str(), Some("Ira Bose"));

    // A refused import into another workspace does not switch to it.
    let elsewhere = temp_workspace();
    let error = s.err(
        "backup.importWorkspace",
        json!({
            "inPath": notes.to_string_lossy(),
            "workspacePath": elsewhere.path().to_string_lossy(),
        }),
    );
    assert_eq!(error_code(&error), "backup_failed");
    let health = s.ok("health", json!({}));
    assert_eq!(
        health["workspacePath"].as_str(),
        Some(s.workspace.path().to_string_lossy().as_ref())
    );
}
