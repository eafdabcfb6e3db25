mod test_support;

use serde_json::json;
use test_support::{find_by_enrollment, temp_dir, Session};

fn rank_of(results: &[serde_json::Value], enrollment_id: &str) -> Option<i64> {
    find_by_enrollment(results, enrollment_id)
        .get("rank")
        .and_then(|v| v.as_i64())
}

#[test]
fn ties_get_distinct_ranks_broken_by_roll_number() {
    let workspace = temp_dir("resultsd-ranking-ties");
    let mut s = Session::open(&workspace);
    let seeded = s.seed_midterm();

    // Enrolled out of roll order so insertion order can't decide the tie.
    let late = s.enroll(&seeded, "Late", &seeded.section_a, 7);
    let early = s.enroll(&seeded, "Early", &seeded.section_a, 3);
    let top = s.enroll(&seeded, "Top", &seeded.section_a, 9);
    for e in [&late, &early] {
        s.mark(e, &seeded.math, 80.0);
        s.mark(e, &seeded.english, 40.0);
    }
    s.mark(&top, &seeded.math, 99.0);
    s.mark(&top, &seeded.english, 49.0);

    s.ok(
        "results.process",
        json!({ "examId": seeded.exam_id, "classId": seeded.class_id }),
    );
    let results = s.results(json!({ "examId": seeded.exam_id }));
    assert_eq!(rank_of(&results, &top), Some(1));
    assert_eq!(rank_of(&results, &early), Some(2));
    assert_eq!(rank_of(&results, &late), Some(3));

    let mut ranks: Vec<i64> = results
        .iter()
        .filter_map(|r| r.get("rank").and_then(|v| v.as_i64()))
        .collect();
    ranks.sort_unstable();
    assert_eq!(ranks, vec![1, 2, 3]);
}

#[test]
fn section_run_ranks_only_that_section() {
    let workspace = temp_dir("resultsd-ranking-section");
    let mut s = Session::open(&workspace);
    let seeded = s.seed_midterm();

    let a1 = s.enroll(&seeded, "A1", &seeded.section_a, 1);
    let a2 = s.enroll(&seeded, "A2", &seeded.section_a, 2);
    let b1 = s.enroll(&seeded, "B1", &seeded.section_b, 1);
    s.mark(&a1, &seeded.math, 60.0);
    s.mark(&a1, &seeded.english, 30.0);
    s.mark(&a2, &seeded.math, 90.0);
    s.mark(&a2, &seeded.english, 45.0);
    s.mark(&b1, &seeded.math, 100.0);
    s.mark(&b1, &seeded.english, 50.0);

    let out = s.ok(
        "results.process",
        json!({
            "examId": seeded.exam_id,
            "classId": seeded.class_id,
            "sectionId": seeded.section_a
        }),
    );
    assert_eq!(out.get("processedCount").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(out.get("sectionName").and_then(|v| v.as_str()), Some("A"));

    let b_results = s.results(json!({ "sectionId": seeded.section_b }));
    assert!(b_results.is_empty());

    let out_b = s.ok(
        "results.process",
        json!({
            "examId": seeded.exam_id,
            "classId": seeded.class_id,
            "sectionId": seeded.section_b
        }),
    );
    assert_eq!(out_b.get("processedCount").and_then(|v| v.as_u64()), Some(1));

    let results = s.results(json!({ "examId": seeded.exam_id }));
    assert_eq!(rank_of(&results, &a2), Some(1));
    assert_eq!(rank_of(&results, &a1), Some(2));
    assert_eq!(rank_of(&results, &b1), Some(1));

    // A whole-class re-rank orders across sections.
    let ranked = s.ok(
        "results.rank",
        json!({ "examId": seeded.exam_id, "classId": seeded.class_id }),
    );
    assert_eq!(ranked.get("rankedCount").and_then(|v| v.as_u64()), Some(3));
    let results = s.results(json!({ "examId": seeded.exam_id }));
    assert_eq!(rank_of(&results, &b1), Some(1));
    assert_eq!(rank_of(&results, &a2), Some(2));
    assert_eq!(rank_of(&results, &a1), Some(3));
}

#[test]
fn deactivated_student_no_longer_holds_a_rank() {
    let workspace = temp_dir("resultsd-ranking-inactive");
    let mut s = Session::open(&workspace);
    let seeded = s.seed_midterm();

    let first = s.enroll(&seeded, "First", &seeded.section_a, 1);
    let second = s.enroll(&seeded, "Second", &seeded.section_a, 2);
    s.mark(&first, &seeded.math, 95.0);
    s.mark(&first, &seeded.english, 45.0);
    s.mark(&second, &seeded.math, 60.0);
    s.mark(&second, &seeded.english, 30.0);

    let params = json!({ "examId": seeded.exam_id, "classId": seeded.class_id });
    s.ok("results.process", params.clone());
    s.ok(
        "enrollments.setActive",
        json!({ "enrollmentId": first, "active": false }),
    );
    s.ok("results.process", params);

    let results = s.results(json!({ "examId": seeded.exam_id, "classId": seeded.class_id }));
    assert_eq!(results.len(), 2);
    assert_eq!(rank_of(&results, &second), Some(1));
    assert_eq!(rank_of(&results, &first), None);
    assert!(find_by_enrollment(&results, &first)
        .get("rankedAt")
        .map(|v| v.is_null())
        .unwrap_or(false));
}
