//! Reference data the engine reads: classes, sections, examinations,
//! subjects, the exam schedule and enrollments. Inserts only.

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_bool, optional_i64, optional_str, required_f64, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn require_exists(
    conn: &Connection,
    req: &Request,
    table: &str,
    entity: &str,
    id: &str,
) -> Result<(), serde_json::Value> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    let found = conn
        .query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    match found {
        Some(_) => Ok(()),
        None => Err(err(
            &req.id,
            "not_found",
            format!("{} not found", entity),
            Some(json!({ "table": table, "id": id })),
        )),
    }
}

fn insert_failed(req: &Request, table: &str, e: rusqlite::Error) -> serde_json::Value {
    err(
        &req.id,
        "db_insert_failed",
        e.to_string(),
        Some(json!({ "table": table })),
    )
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, name) VALUES(?, ?)",
        (&class_id, &name),
    ) {
        return insert_failed(req, "classes", e);
    }
    ok(&req.id, json!({ "classId": class_id, "name": name }))
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           (SELECT COUNT(*) FROM sections s WHERE s.class_id = c.id) AS section_count,
           (SELECT COUNT(*) FROM enrollments e WHERE e.class_id = c.id) AS enrollment_count
         FROM classes c
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let section_count: i64 = row.get(2)?;
            let enrollment_count: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "sectionCount": section_count,
                "enrollmentCount": enrollment_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_sections_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let (class_id, name) = match (required_str(req, "classId"), required_str(req, "name")) {
        (Ok(c), Ok(n)) => (c, n),
        (Err(e), _) | (_, Err(e)) => return e,
    };
    if let Err(e) = require_exists(conn, req, "classes", "class", &class_id) {
        return e;
    }

    let section_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO sections(id, class_id, name) VALUES(?, ?, ?)",
        (&section_id, &class_id, &name),
    ) {
        return insert_failed(req, "sections", e);
    }
    ok(&req.id, json!({ "sectionId": section_id, "name": name }))
}

fn handle_exams_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let (name, academic_year) = match (required_str(req, "name"), required_str(req, "academicYear"))
    {
        (Ok(n), Ok(y)) => (n, y),
        (Err(e), _) | (_, Err(e)) => return e,
    };

    let exam_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO examinations(id, name, academic_year) VALUES(?, ?, ?)",
        (&exam_id, &name, &academic_year),
    ) {
        return insert_failed(req, "examinations", e);
    }
    ok(
        &req.id,
        json!({ "examId": exam_id, "name": name, "academicYear": academic_year }),
    )
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let code = match optional_str(req, "code") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let subject_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, name, code) VALUES(?, ?, ?)",
        (&subject_id, &name, &code),
    ) {
        return insert_failed(req, "subjects", e);
    }
    ok(&req.id, json!({ "subjectId": subject_id, "name": name }))
}

fn handle_offerings_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let mut ids = Vec::with_capacity(3);
    for key in ["examId", "classId", "subjectId"] {
        match required_str(req, key) {
            Ok(v) => ids.push(v),
            Err(e) => return e,
        }
    }
    let (exam_id, class_id, subject_id) = (&ids[0], &ids[1], &ids[2]);
    let full_marks = match required_f64(req, "fullMarks") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let pass_marks = match req.params.get("passMarks") {
        None => 0.0,
        Some(_) => match required_f64(req, "passMarks") {
            Ok(v) => v,
            Err(e) => return e,
        },
    };
    let sort_order = match optional_i64(req, "sortOrder") {
        Ok(v) => v.unwrap_or(0),
        Err(e) => return e,
    };

    if full_marks <= 0.0 {
        return err(
            &req.id,
            "bad_params",
            "fullMarks must be > 0",
            Some(json!({ "fullMarks": full_marks })),
        );
    }
    if pass_marks < 0.0 || pass_marks > full_marks {
        return err(
            &req.id,
            "bad_params",
            "passMarks must lie within 0..=fullMarks",
            Some(json!({ "passMarks": pass_marks, "fullMarks": full_marks })),
        );
    }
    for (table, entity, id) in [
        ("examinations", "examination", exam_id),
        ("classes", "class", class_id),
        ("subjects", "subject", subject_id),
    ] {
        if let Err(e) = require_exists(conn, req, table, entity, id) {
            return e;
        }
    }

    let offering_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subject_offerings(
            id, examination_id, class_id, subject_id, full_marks, pass_marks, sort_order
         )
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &offering_id,
            exam_id,
            class_id,
            subject_id,
            full_marks,
            pass_marks,
            sort_order,
        ),
    ) {
        return insert_failed(req, "subject_offerings", e);
    }
    ok(&req.id, json!({ "offeringId": offering_id }))
}

fn handle_enrollments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let mut vals = Vec::with_capacity(4);
    for key in ["classId", "academicYear", "lastName", "firstName"] {
        match required_str(req, key) {
            Ok(v) => vals.push(v),
            Err(e) => return e,
        }
    }
    let (class_id, academic_year, last_name, first_name) = (&vals[0], &vals[1], &vals[2], &vals[3]);
    let section_id = match optional_str(req, "sectionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let roll_no = match optional_i64(req, "rollNo") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let active = match optional_bool(req, "active", true) {
        Ok(v) => v,
        Err(e) => return e,
    };

    if let Err(e) = require_exists(conn, req, "classes", "class", class_id) {
        return e;
    }
    if let Some(sid) = &section_id {
        let section_class: Option<String> = match conn
            .query_row("SELECT class_id FROM sections WHERE id = ?", [sid], |r| {
                r.get(0)
            })
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        match section_class {
            None => {
                return err(
                    &req.id,
                    "not_found",
                    "section not found",
                    Some(json!({ "sectionId": sid })),
                )
            }
            Some(c) if c != *class_id => {
                return err(
                    &req.id,
                    "bad_params",
                    "section does not belong to class",
                    Some(json!({ "sectionId": sid, "classId": class_id })),
                )
            }
            Some(_) => {}
        }
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO students(id, last_name, first_name) VALUES(?, ?, ?)",
        (&student_id, last_name, first_name),
    ) {
        return insert_failed(req, "students", e);
    }
    let enrollment_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO enrollments(id, student_id, class_id, section_id, academic_year, roll_no, active)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &enrollment_id,
            &student_id,
            class_id,
            &section_id,
            academic_year,
            roll_no,
            active as i64,
        ),
    ) {
        return insert_failed(req, "enrollments", e);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "enrollmentId": enrollment_id, "studentId": student_id }),
    )
}

fn handle_enrollments_set_active(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let enrollment_id = match required_str(req, "enrollmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(active) = req.params.get("active").and_then(|v| v.as_bool()) else {
        return err(&req.id, "bad_params", "missing active", None);
    };

    match conn.execute(
        "UPDATE enrollments SET active = ? WHERE id = ?",
        (active as i64, &enrollment_id),
    ) {
        Ok(0) => err(
            &req.id,
            "not_found",
            "enrollment not found",
            Some(json!({ "enrollmentId": enrollment_id })),
        ),
        Ok(_) => ok(&req.id, json!({ "enrollmentId": enrollment_id, "active": active })),
        Err(e) => err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "enrollments" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.list" => Some(handle_classes_list(state, req)),
        "sections.create" => Some(handle_sections_create(state, req)),
        "exams.create" => Some(handle_exams_create(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "offerings.create" => Some(handle_offerings_create(state, req)),
        "enrollments.create" => Some(handle_enrollments_create(state, req)),
        "enrollments.setActive" => Some(handle_enrollments_set_active(state, req)),
        _ => None,
    }
}
