use crate::engine;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_f64, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

struct OfferingScope {
    class_id: String,
    academic_year: String,
    full_marks: f64,
}

fn handle_marks_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let (enrollment_id, offering_id) =
        match (required_str(req, "enrollmentId"), required_str(req, "offeringId")) {
            (Ok(e), Ok(o)) => (e, o),
            (Err(e), _) | (_, Err(e)) => return e,
        };
    let marks_obtained = match required_f64(req, "marksObtained") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let offering = match conn
        .query_row(
            "SELECT so.class_id, x.academic_year, so.full_marks
             FROM subject_offerings so
             JOIN examinations x ON x.id = so.examination_id
             WHERE so.id = ?",
            [&offering_id],
            |r| {
                Ok(OfferingScope {
                    class_id: r.get(0)?,
                    academic_year: r.get(1)?,
                    full_marks: r.get(2)?,
                })
            },
        )
        .optional()
    {
        Ok(Some(v)) => v,
        Ok(None) => {
            return err(
                &req.id,
                "not_found",
                "subject offering not found",
                Some(json!({ "offeringId": offering_id })),
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let enrollment: Option<(String, String)> = match conn
        .query_row(
            "SELECT class_id, academic_year FROM enrollments WHERE id = ?",
            [&enrollment_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((class_id, academic_year)) = enrollment else {
        return err(
            &req.id,
            "not_found",
            "enrollment not found",
            Some(json!({ "enrollmentId": enrollment_id })),
        );
    };
    if class_id != offering.class_id || academic_year != offering.academic_year {
        return err(
            &req.id,
            "bad_params",
            "enrollment does not sit this offering",
            Some(json!({
                "enrollmentId": enrollment_id,
                "offeringId": offering_id,
                "enrollmentClassId": class_id,
                "offeringClassId": offering.class_id
            })),
        );
    }

    if marks_obtained < 0.0 || marks_obtained > offering.full_marks {
        return err(
            &req.id,
            "bad_params",
            "marksObtained must lie within 0..=fullMarks",
            Some(json!({ "marksObtained": marks_obtained, "fullMarks": offering.full_marks })),
        );
    }

    let now = engine::now_rfc3339();
    let mark_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO marks(id, enrollment_id, offering_id, marks_obtained, updated_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(enrollment_id, offering_id) DO UPDATE SET
           marks_obtained = excluded.marks_obtained,
           updated_at = excluded.updated_at",
        (&mark_id, &enrollment_id, &offering_id, marks_obtained, &now),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "marks" })),
        );
    }

    ok(
        &req.id,
        json!({
            "enrollmentId": enrollment_id,
            "offeringId": offering_id,
            "marksObtained": marks_obtained
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.upsert" => Some(handle_marks_upsert(state, req)),
        _ => None,
    }
}
