use crate::engine::EngineError;
use crate::grading::GradingSystem;
use crate::model::{Enrollment, RankCandidate, StudentAggregate, SubjectLine, SubjectOffering};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Nudge applied before rounding so a decimal half written as a binary float
/// slightly below it (1.005 is stored as 1.00499...) still rounds up.
const ROUND_NUDGE: f64 = 1e-7;

/// Half-up rounding to two decimals, the resolution percentages and GPA are
/// stored and displayed at. Grades are resolved before rounding.
pub fn round_off_2_decimal(x: f64) -> f64 {
    let scaled = 100.0 * x;
    (scaled + ROUND_NUDGE.copysign(scaled)).round() / 100.0
}

/// Per-subject grades, totals, overall grade and equal-weight GPA for one
/// enrollment. `marks` is keyed by (enrollment id, offering id) and must
/// already have passed the completeness check.
pub fn aggregate_student(
    enrollment: &Enrollment,
    offerings: &[SubjectOffering],
    marks: &HashMap<(String, String), f64>,
    system: &GradingSystem,
) -> Result<StudentAggregate, EngineError> {
    let mut total_marks = 0.0_f64;
    let mut total_full_marks = 0.0_f64;
    let mut points: Vec<f64> = Vec::with_capacity(offerings.len());
    let mut subjects: Vec<SubjectLine> = Vec::with_capacity(offerings.len());

    for o in offerings {
        let Some(&obtained) = marks.get(&(enrollment.id.clone(), o.id.clone())) else {
            // Unreachable once the completeness check passed; report it the same way.
            return Err(EngineError::MarksIncomplete {
                missing: vec![crate::engine::MarkGap {
                    enrollment_id: enrollment.id.clone(),
                    display_name: enrollment.display_name.clone(),
                    roll_no: enrollment.roll_no,
                    offering_id: o.id.clone(),
                    subject_name: o.subject_name.clone(),
                }],
                duplicate: Vec::new(),
            });
        };
        if o.full_marks <= 0.0 {
            return Err(EngineError::ZeroFullMarks {
                enrollment_id: Some(enrollment.id.clone()),
                offering_id: Some(o.id.clone()),
            });
        }

        let raw_percentage = 100.0 * obtained / o.full_marks;
        let subject_percentage = round_off_2_decimal(raw_percentage);
        let band = system
            .resolve(raw_percentage)
            .ok_or_else(|| EngineError::GradeBandMissing {
                percentage: subject_percentage,
                grading_system_id: system.id.clone(),
                grading_system_name: system.name.clone(),
                enrollment_id: enrollment.id.clone(),
                subject: Some(o.subject_name.clone()),
            })?;

        total_marks += obtained;
        total_full_marks += o.full_marks;
        points.push(band.points);
        subjects.push(SubjectLine {
            offering_id: o.id.clone(),
            subject_name: o.subject_name.clone(),
            marks_obtained: obtained,
            full_marks: o.full_marks,
            percentage: subject_percentage,
            grade_id: band.id.clone(),
            grade_name: band.grade_name.clone(),
            points: band.points,
            passed: obtained >= o.pass_marks,
        });
    }

    if total_full_marks <= 0.0 {
        return Err(EngineError::ZeroFullMarks {
            enrollment_id: Some(enrollment.id.clone()),
            offering_id: None,
        });
    }

    let raw_percentage = 100.0 * total_marks / total_full_marks;
    let percentage = round_off_2_decimal(raw_percentage);
    // Every subject counts once, whatever its full marks.
    let gpa = round_off_2_decimal(points.iter().sum::<f64>() / points.len() as f64);

    let final_band = system
        .resolve(raw_percentage)
        .ok_or_else(|| EngineError::GradeBandMissing {
            percentage,
            grading_system_id: system.id.clone(),
            grading_system_name: system.name.clone(),
            enrollment_id: enrollment.id.clone(),
            subject: None,
        })?;

    Ok(StudentAggregate {
        enrollment_id: enrollment.id.clone(),
        grading_system_id: system.id.clone(),
        final_grade_id: final_band.id.clone(),
        final_grade_name: final_band.grade_name.clone(),
        total_marks,
        total_full_marks,
        percentage,
        gpa,
        subjects,
    })
}

/// Percentage desc, total marks desc, then roll number (absent last) and
/// enrollment id so equal scores always land in the same order.
pub fn rank_cmp(a: &RankCandidate, b: &RankCandidate) -> Ordering {
    b.percentage
        .total_cmp(&a.percentage)
        .then_with(|| b.total_marks.total_cmp(&a.total_marks))
        .then_with(|| match (a.roll_no, b.roll_no) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.enrollment_id.cmp(&b.enrollment_id))
}

/// Sorts the candidates and returns (result id, rank) with ranks 1..=N.
/// Ties still get distinct consecutive ranks.
pub fn assign_ranks(mut candidates: Vec<RankCandidate>) -> Vec<(String, i64)> {
    candidates.sort_by(rank_cmp);
    candidates
        .into_iter()
        .enumerate()
        .map(|(i, c)| (c.result_id, i as i64 + 1))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeSummary {
    pub processed_count: usize,
    pub average_percentage: f64,
    #[serde(rename = "averageGPA")]
    pub average_gpa: f64,
    pub highest_percentage: f64,
    pub lowest_percentage: f64,
}

pub fn summarize(rows: &[RankCandidate]) -> ScopeSummary {
    if rows.is_empty() {
        return ScopeSummary {
            processed_count: 0,
            average_percentage: 0.0,
            average_gpa: 0.0,
            highest_percentage: 0.0,
            lowest_percentage: 0.0,
        };
    }
    let n = rows.len() as f64;
    let sum_pct: f64 = rows.iter().map(|r| r.percentage).sum();
    let sum_gpa: f64 = rows.iter().map(|r| r.gpa).sum();
    let highest = rows
        .iter()
        .map(|r| r.percentage)
        .fold(f64::NEG_INFINITY, f64::max);
    let lowest = rows.iter().map(|r| r.percentage).fold(f64::INFINITY, f64::min);
    ScopeSummary {
        processed_count: rows.len(),
        average_percentage: round_off_2_decimal(sum_pct / n),
        average_gpa: round_off_2_decimal(sum_gpa / n),
        highest_percentage: highest,
        lowest_percentage: lowest,
    }
}
