#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    spawn_sidecar_with_env(&[])
}

pub fn spawn_sidecar_with_env(env: &[(&str, &str)]) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_resultsd");
    let mut cmd = Command::new(exe);
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .env_remove("RESULTSD_WORKSPACE")
        .env_remove("RESULTSD_LOCK_TTL_SECS");
    for (k, v) in env {
        cmd.env(k, v);
    }
    let mut child = cmd.spawn().expect("spawn resultsd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
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

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
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
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// Returns the `error` object of a response that must have failed.
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

pub fn str_field(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing string field {}: {}", key, v))
        .to_string()
}

pub fn db_path(workspace: &Path) -> PathBuf {
    workspace.join("results.sqlite3")
}

/// The Midterm / Class 5 setup: Math out of 100, English out of 50, a
/// default "Standard" grading system and sections A and B.
pub struct Seeded {
    pub exam_id: String,
    pub class_id: String,
    pub section_a: String,
    pub section_b: String,
    pub math: String,
    pub english: String,
    pub grading_system_id: String,
}

pub struct Session {
    pub child: Child,
    pub stdin: ChildStdin,
    pub reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Session {
    pub fn open(workspace: &Path) -> Self {
        Self::open_with_env(workspace, &[])
    }

    pub fn open_with_env(workspace: &Path, env: &[(&str, &str)]) -> Self {
        let (child, stdin, reader) = spawn_sidecar_with_env(env);
        let mut s = Self {
            child,
            stdin,
            reader,
            next_id: 0,
        };
        s.ok(
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        s
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

    pub fn seed_midterm(&mut self) -> Seeded {
        let class_id = str_field(&self.ok("classes.create", json!({ "name": "Class 5" })), "classId");
        let section_a = str_field(
            &self.ok("sections.create", json!({ "classId": class_id, "name": "A" })),
            "sectionId",
        );
        let section_b = str_field(
            &self.ok("sections.create", json!({ "classId": class_id, "name": "B" })),
            "sectionId",
        );
        let exam_id = str_field(
            &self.ok(
                "exams.create",
                json!({ "name": "Midterm", "academicYear": "2024-25" }),
            ),
            "examId",
        );
        let math_subject = str_field(&self.ok("subjects.create", json!({ "name": "Math" })), "subjectId");
        let eng_subject = str_field(
            &self.ok("subjects.create", json!({ "name": "English" })),
            "subjectId",
        );
        let math = str_field(
            &self.ok(
                "offerings.create",
                json!({
                    "examId": exam_id, "classId": class_id, "subjectId": math_subject,
                    "fullMarks": 100, "passMarks": 40, "sortOrder": 0
                }),
            ),
            "offeringId",
        );
        let english = str_field(
            &self.ok(
                "offerings.create",
                json!({
                    "examId": exam_id, "classId": class_id, "subjectId": eng_subject,
                    "fullMarks": 50, "passMarks": 20, "sortOrder": 1
                }),
            ),
            "offeringId",
        );
        let grading_system_id = str_field(
            &self.ok(
                "gradingSystems.create",
                json!({
                    "name": "Standard",
                    "isDefault": true,
                    "bands": [
                        { "gradeName": "A+", "minPercentage": 90, "maxPercentage": 100, "points": 4.0 },
                        { "gradeName": "A", "minPercentage": 80, "maxPercentage": 89.99, "points": 3.5 },
                        { "gradeName": "B", "minPercentage": 70, "maxPercentage": 79.99, "points": 3.0 },
                        { "gradeName": "C", "minPercentage": 0, "maxPercentage": 69.99, "points": 2.0 }
                    ]
                }),
            ),
            "gradingSystemId",
        );
        Seeded {
            exam_id,
            class_id,
            section_a,
            section_b,
            math,
            english,
            grading_system_id,
        }
    }

    pub fn enroll(&mut self, seeded: &Seeded, name: &str, section: &str, roll_no: i64) -> String {
        str_field(
            &self.ok(
                "enrollments.create",
                json!({
                    "classId": seeded.class_id,
                    "academicYear": "2024-25",
                    "lastName": name,
                    "firstName": "Test",
                    "sectionId": section,
                    "rollNo": roll_no
                }),
            ),
            "enrollmentId",
        )
    }

    pub fn mark(&mut self, enrollment_id: &str, offering_id: &str, value: f64) {
        self.ok(
            "marks.upsert",
            json!({
                "enrollmentId": enrollment_id,
                "offeringId": offering_id,
                "marksObtained": value
            }),
        );
    }

    pub fn results(&mut self, params: serde_json::Value) -> Vec<serde_json::Value> {
        self.ok("results.list", params)
            .get("results")
            .and_then(|v| v.as_array())
            .cloned()
            .expect("results array")
    }
}

pub fn find_by_enrollment<'a>(
    results: &'a [serde_json::Value],
    enrollment_id: &str,
) -> &'a serde_json::Value {
    results
        .iter()
        .find(|r| r.get("enrollmentId").and_then(|v| v.as_str()) == Some(enrollment_id))
        .unwrap_or_else(|| panic!("no result for {}", enrollment_id))
}

pub fn f64_field(v: &serde_json::Value, key: &str) -> f64 {
    v.get(key)
        .and_then(|v| v.as_f64())
        .unwrap_or_else(|| panic!("missing number {}: {}", key, v))
}
