use super::{EngineError, MarkGap};
use crate::model::{Enrollment, Mark, SubjectOffering};
use std::collections::HashMap;

/// Checks that every (enrollment, offering) pair has exactly one mark and
/// returns the marks keyed by pair. Every gap is reported at once.
pub fn check_completeness(
    enrollments: &[Enrollment],
    offerings: &[SubjectOffering],
    marks: &[Mark],
) -> Result<HashMap<(String, String), f64>, EngineError> {
    if offerings.is_empty() {
        return Err(EngineError::NoSchedule);
    }
    if enrollments.is_empty() {
        return Err(EngineError::NoStudents);
    }

    let mut by_pair: HashMap<(String, String), (f64, usize)> = HashMap::new();
    for m in marks {
        let entry = by_pair
            .entry((m.enrollment_id.clone(), m.offering_id.clone()))
            .or_insert((m.marks_obtained, 0));
        entry.1 += 1;
    }

    let mut missing: Vec<MarkGap> = Vec::new();
    let mut duplicate: Vec<MarkGap> = Vec::new();
    let mut complete: HashMap<(String, String), f64> =
        HashMap::with_capacity(enrollments.len() * offerings.len());

    for e in enrollments {
        for o in offerings {
            let key = (e.id.clone(), o.id.clone());
            let gap = || MarkGap {
                enrollment_id: e.id.clone(),
                display_name: e.display_name.clone(),
                roll_no: e.roll_no,
                offering_id: o.id.clone(),
                subject_name: o.subject_name.clone(),
            };
            match by_pair.get(&key) {
                None => missing.push(gap()),
                Some((_, n)) if *n > 1 => duplicate.push(gap()),
                Some((value, _)) => {
                    complete.insert(key, *value);
                }
            }
        }
    }

    if !missing.is_empty() || !duplicate.is_empty() {
        return Err(EngineError::MarksIncomplete { missing, duplicate });
    }
    Ok(complete)
}
