mod test_support;

use rusqlite::Connection;
use serde_json::json;
use test_support::{db_path, f64_field, find_by_enrollment, str_field, temp_dir, Session};

fn count(workspace: &std::path::Path, table: &str) -> i64 {
    let conn = Connection::open(db_path(workspace)).expect("open db");
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
        .expect("count")
}

#[test]
fn rerun_updates_in_place_without_duplicates() {
    let workspace = temp_dir("resultsd-rerun");
    let mut s = Session::open(&workspace);
    let seeded = s.seed_midterm();
    let s1 = s.enroll(&seeded, "One", &seeded.section_a, 1);
    let s2 = s.enroll(&seeded, "Two", &seeded.section_a, 2);
    s.mark(&s1, &seeded.math, 95.0);
    s.mark(&s1, &seeded.english, 40.0);
    s.mark(&s2, &seeded.math, 70.0);
    s.mark(&s2, &seeded.english, 45.0);

    let params = json!({ "examId": seeded.exam_id, "classId": seeded.class_id });
    s.ok("results.process", params.clone());
    let first = s.results(json!({ "examId": seeded.exam_id }));
    let first_id = str_field(find_by_enrollment(&first, &s2), "id");

    s.ok("results.process", params.clone());
    assert_eq!(count(&workspace, "results"), 2);
    assert_eq!(count(&workspace, "result_subjects"), 4);

    // A corrected mark flips the order on the next run.
    s.mark(&s2, &seeded.math, 100.0);
    s.ok("results.process", params);
    assert_eq!(count(&workspace, "results"), 2);

    let after = s.results(json!({ "examId": seeded.exam_id }));
    let r2 = find_by_enrollment(&after, &s2);
    assert_eq!(str_field(r2, "id"), first_id);
    assert!((f64_field(r2, "percentage") - 96.67).abs() < 1e-9);
    assert_eq!(str_field(r2, "finalGrade"), "A+");
    assert_eq!(r2.get("rank").and_then(|v| v.as_i64()), Some(1));
    let r1 = find_by_enrollment(&after, &s1);
    assert_eq!(r1.get("rank").and_then(|v| v.as_i64()), Some(2));
}

#[test]
fn out_of_range_marks_are_rejected_at_entry() {
    let workspace = temp_dir("resultsd-rerun-marks");
    let mut s = Session::open(&workspace);
    let seeded = s.seed_midterm();
    let s1 = s.enroll(&seeded, "One", &seeded.section_a, 1);

    let error = s.err(
        "marks.upsert",
        json!({ "enrollmentId": s1, "offeringId": seeded.english, "marksObtained": 51 }),
    );
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("bad_params"));
    let error = s.err(
        "marks.upsert",
        json!({ "enrollmentId": s1, "offeringId": seeded.english, "marksObtained": -1 }),
    );
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("bad_params"));
    let error = s.err(
        "marks.upsert",
        json!({ "enrollmentId": "ghost", "offeringId": seeded.english, "marksObtained": 10 }),
    );
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("not_found"));

    s.mark(&s1, &seeded.english, 50.0);
    s.mark(&s1, &seeded.english, 20.0);
    assert_eq!(count(&workspace, "marks"), 1);
}
