mod test_support;

use serde_json::json;
use test_support::{f64_field, find_by_enrollment, str_field, temp_dir, Session};

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn midterm_process_grades_ranks_and_summarizes() {
    let workspace = temp_dir("resultsd-process-example");
    let mut s = Session::open(&workspace);
    let seeded = s.seed_midterm();

    let s1 = s.enroll(&seeded, "One", &seeded.section_a, 1);
    let s2 = s.enroll(&seeded, "Two", &seeded.section_a, 2);
    s.mark(&s1, &seeded.math, 95.0);
    s.mark(&s1, &seeded.english, 40.0);
    s.mark(&s2, &seeded.math, 70.0);
    s.mark(&s2, &seeded.english, 45.0);

    let out = s.ok(
        "results.process",
        json!({ "examId": seeded.exam_id, "classId": seeded.class_id }),
    );
    assert_eq!(out.get("processedCount").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(out.get("rankedCount").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(str_field(&out, "examName"), "Midterm");
    assert_eq!(str_field(&out, "className"), "Class 5");
    assert_eq!(str_field(&out, "academicYear"), "2024-25");
    assert_eq!(str_field(&out, "gradingSystemName"), "Standard");
    assert!(out.get("sectionName").map(|v| v.is_null()).unwrap_or(false));
    assert!(approx(f64_field(&out, "highestPercentage"), 90.0));
    assert!(approx(f64_field(&out, "lowestPercentage"), 76.67));

    let results = s.results(json!({
        "examId": seeded.exam_id,
        "classId": seeded.class_id,
        "includeSubjects": true
    }));
    assert_eq!(results.len(), 2);

    let r1 = find_by_enrollment(&results, &s1);
    assert!(approx(f64_field(r1, "totalMarks"), 135.0));
    assert!(approx(f64_field(r1, "totalFullMarks"), 150.0));
    assert!(approx(f64_field(r1, "percentage"), 90.0));
    assert!(approx(f64_field(r1, "gpa"), 3.75));
    assert_eq!(str_field(r1, "finalGrade"), "A+");
    assert_eq!(r1.get("rank").and_then(|v| v.as_i64()), Some(1));

    let subjects = r1
        .get("subjects")
        .and_then(|v| v.as_array())
        .expect("subjects");
    let names: Vec<&str> = subjects
        .iter()
        .filter_map(|l| l.get("subjectName").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(names, vec!["Math", "English"]);
    assert_eq!(str_field(&subjects[0], "gradeName"), "A+");
    assert_eq!(str_field(&subjects[1], "gradeName"), "A");
    assert!(approx(f64_field(&subjects[1], "percentage"), 80.0));

    let r2 = find_by_enrollment(&results, &s2);
    assert!(approx(f64_field(r2, "totalMarks"), 115.0));
    assert!(approx(f64_field(r2, "percentage"), 76.67));
    assert!(approx(f64_field(r2, "gpa"), 3.5));
    assert_eq!(str_field(r2, "finalGrade"), "B");
    assert_eq!(r2.get("rank").and_then(|v| v.as_i64()), Some(2));

    // Listed in rank order.
    assert_eq!(str_field(&results[0], "enrollmentId"), s1);
}

#[test]
fn list_without_subjects_omits_subject_lines() {
    let workspace = temp_dir("resultsd-process-list");
    let mut s = Session::open(&workspace);
    let seeded = s.seed_midterm();
    let s1 = s.enroll(&seeded, "One", &seeded.section_a, 1);
    s.mark(&s1, &seeded.math, 50.0);
    s.mark(&s1, &seeded.english, 25.0);

    s.ok(
        "results.process",
        json!({ "examId": seeded.exam_id, "classId": seeded.class_id }),
    );
    let results = s.results(json!({ "enrollmentId": s1 }));
    assert_eq!(results.len(), 1);
    assert!(results[0].get("subjects").is_none());
    assert_eq!(str_field(&results[0], "finalGrade"), "C");

    let none = s.results(json!({ "examId": "no-such-exam" }));
    assert!(none.is_empty());
}
