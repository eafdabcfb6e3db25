use crate::engine::EngineError;
use serde::Serialize;
use serde_json::json;

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({ "id": id, "ok": true, "result": result })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let body = ErrorBody {
        code,
        message: message.into(),
        details,
    };
    json!({ "id": id, "ok": false, "error": body })
}

/// Engine failures keep their stable code; retryable kinds say so in `details`.
pub fn engine_err(id: &str, e: &EngineError) -> serde_json::Value {
    err(id, e.code(), e.to_string(), e.details())
}
