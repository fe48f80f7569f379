#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tempfile::TempDir;

pub fn temp_workspace() -> TempDir {
    tempfile::Builder::new()
        .prefix("progressd-test-")
        .tempdir()
        .expect("create temp dir")
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_progressd");
    let mut child = Command::new(exe)
        .env_remove("PROGRESSD_CONFIG")
        .env_remove("PROGRESSD_WORKSPACE")
        .env_remove("PROGRESSD_PAGE_LIMIT")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn progressd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn read_response(reader: &mut BufReader<ChildStdout>) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let value = read_response(reader);
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(serde_json::Value::Null)
}

/// Sends a request expected to fail and returns its `error` object.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().expect("error object")
}

pub fn error_code(error: &serde_json::Value) -> &str {
    error.get("code").and_then(|v| v.as_str()).unwrap_or("")
}

/// One spawned sidecar with an open workspace and a running request counter.
pub struct Session {
    pub child: Child,
    pub stdin: ChildStdin,
    pub reader: BufReader<ChildStdout>,
    pub workspace: TempDir,
    next_id: u64,
}

impl Session {
    pub fn open() -> Self {
        let workspace = temp_workspace();
        let (child, stdin, reader) = spawn_sidecar();
        let mut session = Session {
            child,
            stdin,
            reader,
            workspace,
            next_id: 0,
        };
        let path = session.workspace.path().to_string_lossy().to_string();
        session.ok("workspace.select", json!({ "path": path }));
        session
    }

    fn id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }

    pub fn ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let id = self.id();
        request_ok(&mut self.stdin, &mut self.reader, &id, method, params)
    }

    pub fn err(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let id = self.id();
        request_err(&mut self.stdin, &mut self.reader, &id, method, params)
    }

    pub fn create_subject(
        &mut self,
        code: &str,
        department: &str,
        semester: i64,
        credits: i64,
        kind: &str,
    ) -> String {
        let res = self.ok(
            "subjects.create",
            json!({
                "code": code,
                "name": format!("Subject {}", code),
                "department": department,
                "semester": semester,
                "credits": credits,
                "type": kind,
            }),
        );
        res["subject"]["id"].as_str().expect("subject id").to_string()
    }

    /// Enrols a student for 2025-2026 and returns the generated student id.
    pub fn create_student(&mut self, name: &str, department: &str, semester: i64) -> String {
        let email = format!("{}@college.edu", name.to_ascii_lowercase().replace(' ', "."));
        let res = self.ok(
            "students.create",
            json!({
                "name": name,
                "email": email,
                "department": department,
                "semester": semester,
                "academicYear": "2025-2026",
            }),
        );
        res["student"]["studentId"]
            .as_str()
            .expect("studentId")
            .to_string()
    }

    pub fn save_mark(
        &mut self,
        student_id: &str,
        subject_id: &str,
        components: serde_json::Value,
    ) -> serde_json::Value {
        let mut params = components;
        params["studentId"] = json!(student_id);
        params["subjectId"] = json!(subject_id);
        self.ok("marks.upsert", params)
    }
}
