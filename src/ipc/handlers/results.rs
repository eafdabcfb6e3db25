use crate::engine::{self, EngineOptions, ProcessRequest, SqliteStore};
use crate::ipc::error::{engine_err, ok};
use crate::ipc::helpers::{db_conn, optional_bool, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::model::{ResultFilter, Scope};
use serde_json::json;

fn parse_scope(req: &Request) -> Result<Scope, serde_json::Value> {
    let examination_id = required_str(req, "examId")?;
    let class_id = required_str(req, "classId")?;
    let section_id = optional_str(req, "sectionId")?;
    Ok(Scope {
        examination_id,
        class_id,
        section_id,
    })
}

fn engine_options(state: &AppState) -> EngineOptions {
    EngineOptions {
        lock_ttl_secs: state.config.lock_ttl_secs,
    }
}

fn handle_results_process(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let scope = match parse_scope(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let grading_system_id = match optional_str(req, "gradingSystemId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let store = SqliteStore::new(conn);
    let request = ProcessRequest {
        scope,
        grading_system_id,
    };
    match engine::process_results(&store, &request, engine_options(state)) {
        Ok(outcome) => ok(&req.id, json!(outcome)),
        Err(e) => {
            tracing::warn!(code = e.code(), retryable = e.is_retryable(), "results.process failed: {e}");
            engine_err(&req.id, &e)
        }
    }
}

fn handle_results_rank(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let scope = match parse_scope(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let store = SqliteStore::new(conn);
    match engine::rank_results(&store, &scope, engine_options(state)) {
        Ok(outcome) => ok(&req.id, json!(outcome)),
        Err(e) => engine_err(&req.id, &e),
    }
}

fn handle_results_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "results": [] }));
    };

    let mut filter = ResultFilter::default();
    for (key, slot) in [
        ("examId", &mut filter.examination_id),
        ("classId", &mut filter.class_id),
        ("sectionId", &mut filter.section_id),
        ("enrollmentId", &mut filter.enrollment_id),
    ] {
        match optional_str(req, key) {
            Ok(v) => *slot = v,
            Err(e) => return e,
        }
    }
    let include_subjects = match optional_bool(req, "includeSubjects", false) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let store = SqliteStore::new(conn);
    match engine::list_results(&store, &filter, include_subjects) {
        Ok(results) => ok(&req.id, json!({ "results": results })),
        Err(e) => engine_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "results.process" => Some(handle_results_process(state, req)),
        "results.rank" => Some(handle_results_rank(state, req)),
        "results.list" => Some(handle_results_list(state, req)),
        _ => None,
    }
}
