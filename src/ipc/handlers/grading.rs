use crate::engine::SqliteStore;
use crate::grading::{validate_bands, GradeBand};
use crate::ipc::error::{engine_err, err, ok};
use crate::ipc::helpers::{db_conn, optional_bool, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn parse_bands(req: &Request) -> Result<Vec<GradeBand>, serde_json::Value> {
    let Some(raw) = req.params.get("bands") else {
        return Err(err(&req.id, "bad_params", "missing bands", None));
    };
    serde_json::from_value::<Vec<GradeBand>>(raw.clone()).map_err(|e| {
        err(
            &req.id,
            "bad_params",
            format!("bands must be a list of {{gradeName, minPercentage, maxPercentage, points}}: {}", e),
            None,
        )
    })
}

fn handle_grading_systems_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let is_default = match optional_bool(req, "isDefault", false) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut bands = match parse_bands(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    for b in bands.iter_mut() {
        b.grade_name = b.grade_name.trim().to_string();
    }

    let problems = validate_bands(&bands);
    if !problems.is_empty() {
        return err(
            &req.id,
            "bad_params",
            format!("grade bands are invalid: {}", problems[0].message),
            Some(json!({ "problems": problems })),
        );
    }

    let system_id = Uuid::new_v4().to_string();
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if is_default {
        if let Err(e) = tx.execute("UPDATE grading_systems SET is_default = 0", []) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Err(e) = tx.execute(
        "INSERT INTO grading_systems(id, name, is_default) VALUES(?, ?, ?)",
        (&system_id, &name, i64::from(is_default)),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "grading_systems" })),
        );
    }
    let mut band_ids = Vec::with_capacity(bands.len());
    for b in &bands {
        let grade_id = Uuid::new_v4().to_string();
        if let Err(e) = tx.execute(
            "INSERT INTO grades(id, grading_system_id, grade_name, min_percentage, max_percentage, points)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                &grade_id,
                &system_id,
                &b.grade_name,
                b.min_percentage,
                b.max_percentage,
                b.points,
            ),
        ) {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "grades", "gradeName": b.grade_name })),
            );
        }
        band_ids.push(grade_id);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    tracing::info!(grading_system = %system_id, name = %name, bands = bands.len(), is_default, "grading system created");
    ok(
        &req.id,
        json!({
            "gradingSystemId": system_id,
            "name": name,
            "isDefault": is_default,
            "gradeIds": band_ids
        }),
    )
}

fn handle_grading_systems_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "gradingSystems": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT id, name, is_default FROM grading_systems ORDER BY is_default DESC, name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let headers = match stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)? != 0,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let store = SqliteStore::new(conn);
    let mut systems = Vec::with_capacity(headers.len());
    for (id, name, is_default) in headers {
        let bands = match store.load_bands(&id) {
            Ok(v) => v,
            Err(e) => return engine_err(&req.id, &e),
        };
        systems.push(json!({
            "id": id,
            "name": name,
            "isDefault": is_default,
            "bands": bands
        }));
    }
    ok(&req.id, json!({ "gradingSystems": systems }))
}

fn handle_grading_systems_set_default(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let system_id = match required_str(req, "gradingSystemId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let found: Option<String> = match conn
        .query_row(
            "SELECT name FROM grading_systems WHERE id = ?",
            [&system_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(name) = found else {
        return err(
            &req.id,
            "not_found",
            "grading system not found",
            Some(json!({ "gradingSystemId": system_id })),
        );
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "UPDATE grading_systems SET is_default = CASE WHEN id = ? THEN 1 ELSE 0 END",
        [&system_id],
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    tracing::info!(grading_system = %system_id, "default grading system changed");
    ok(
        &req.id,
        json!({ "gradingSystemId": system_id, "name": name, "isDefault": true }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "gradingSystems.create" => Some(handle_grading_systems_create(state, req)),
        "gradingSystems.list" => Some(handle_grading_systems_list(state, req)),
        "gradingSystems.setDefault" => Some(handle_grading_systems_set_default(state, req)),
        _ => None,
    }
}
