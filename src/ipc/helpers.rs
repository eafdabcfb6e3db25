use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// A non-blank string param, trimmed.
pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    match optional_str(req, key)? {
        Some(v) => Ok(v),
        None => Err(err(&req.id, "bad_params", format!("missing {}", key), None)),
    }
}

/// Absent, null and blank all read as `None`; any other non-string is rejected.
pub fn optional_str(req: &Request, key: &str) -> Result<Option<String>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let Some(s) = v.as_str() else {
                return Err(err(
                    &req.id,
                    "bad_params",
                    format!("{} must be a string", key),
                    None,
                ));
            };
            let t = s.trim();
            if t.is_empty() {
                Ok(None)
            } else {
                Ok(Some(t.to_string()))
            }
        }
    }
}

pub fn required_f64(req: &Request, key: &str) -> Result<f64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_f64())
        .filter(|v| v.is_finite())
        .ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("missing or non-numeric {}", key),
                None,
            )
        })
}

pub fn optional_i64(req: &Request, key: &str) -> Result<Option<i64>, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be an integer", key),
                None,
            )
        }),
    }
}

pub fn optional_bool(req: &Request, key: &str, default: bool) -> Result<bool, serde_json::Value> {
    match req.params.get(key) {
        None => Ok(default),
        Some(v) if v.is_null() => Ok(default),
        Some(v) => v.as_bool().ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be a boolean", key),
                None,
            )
        }),
    }
}
