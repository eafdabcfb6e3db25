mod test_support;

use serde_json::json;
use std::io::{BufRead, Write};
use test_support::{request, request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn health_unknown_methods_and_bad_json() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());
    assert!(health.get("workspacePath").map(|v| v.is_null()).unwrap_or(false));

    let error = request_err(&mut stdin, &mut reader, "2", "nope.method", json!({}));
    assert_eq!(
        error.get("code").and_then(|v| v.as_str()),
        Some("not_implemented")
    );

    writeln!(stdin, "{{not json").expect("write");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("json");
    assert_eq!(value["ok"], json!(false));
    assert_eq!(value["error"]["code"], json!("bad_json"));

    // Still serving after a bad line.
    let again = request(&mut stdin, &mut reader, "3", "health", json!({}));
    assert_eq!(again["ok"], json!(true));
}

#[test]
fn writes_need_a_workspace_and_reads_are_empty_without_one() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let error = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "results.process",
        json!({ "examId": "x", "classId": "y" }),
    );
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("no_workspace"));

    let listed = request_ok(&mut stdin, &mut reader, "2", "results.list", json!({}));
    assert_eq!(listed["results"], json!([]));

    let workspace = temp_dir("resultsd-router-smoke");
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert!(workspace.join("results.sqlite3").exists());

    let error = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "results.process",
        json!({ "examId": "  ", "classId": "y" }),
    );
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("bad_params"));
}

#[test]
fn startup_workspace_comes_from_the_environment() {
    let workspace = temp_dir("resultsd-router-env");
    let ws = workspace.to_string_lossy().to_string();
    let (_child, mut stdin, mut reader) =
        test_support::spawn_sidecar_with_env(&[("RESULTSD_WORKSPACE", ws.as_str())]);

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(
        health.get("workspacePath").and_then(|v| v.as_str()),
        Some(ws.as_str())
    );
    let classes = request_ok(&mut stdin, &mut reader, "2", "classes.list", json!({}));
    assert_eq!(classes["classes"], json!([]));
}
