use serde::Serialize;
use serde_json::json;

/// One (student, subject) pair that does not have exactly one mark.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkGap {
    pub enrollment_id: String,
    pub display_name: String,
    pub roll_no: Option<i64>,
    pub offering_id: String,
    pub subject_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0}")]
    BadParams(String),

    #[error("{what} not found")]
    NotFound { what: &'static str, id: String },

    #[error("no schedule configured: no subjects are offered for this examination and class")]
    NoSchedule,

    #[error("no students found for this class, academic year and section")]
    NoStudents,

    #[error(
        "marks are incomplete: {} missing, {} duplicated",
        missing.len(),
        duplicate.len()
    )]
    MarksIncomplete {
        missing: Vec<MarkGap>,
        duplicate: Vec<MarkGap>,
    },

    #[error("no grading system available")]
    NoGradingSystem { requested: Option<String> },

    #[error("percentage {percentage} is not covered by any band of grading system {grading_system_name}")]
    GradeBandMissing {
        percentage: f64,
        grading_system_id: String,
        grading_system_name: String,
        enrollment_id: String,
        subject: Option<String>,
    },

    #[error("full marks must be greater than zero")]
    ZeroFullMarks {
        enrollment_id: Option<String>,
        offering_id: Option<String>,
    },

    #[error("scope {scope_key} is already being processed")]
    ScopeBusy {
        scope_key: String,
        holder: String,
        acquired_at: String,
    },

    #[error("storage conflict: {0}")]
    StorageConflict(String),

    #[error("ranking failed after results were committed: {0}")]
    RankingFailed(Box<EngineError>),

    #[error("summary failed after results were committed: {0}")]
    SummaryFailed(Box<EngineError>),

    #[error("{0}")]
    Query(String),

    #[error("{0}")]
    Write(String),

    #[error("{0}")]
    Tx(String),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::BadParams(_) => "bad_params",
            EngineError::NotFound { .. } => "not_found",
            EngineError::NoSchedule => "no_schedule",
            EngineError::NoStudents => "no_students",
            EngineError::MarksIncomplete { .. } => "marks_incomplete",
            EngineError::NoGradingSystem { .. } => "no_grading_system",
            EngineError::GradeBandMissing { .. } => "grade_band_missing",
            EngineError::ZeroFullMarks { .. } => "zero_full_marks",
            EngineError::ScopeBusy { .. } => "scope_busy",
            EngineError::StorageConflict(_) => "storage_conflict",
            EngineError::RankingFailed(_) => "ranking_failed",
            EngineError::SummaryFailed(_) => "summary_failed",
            EngineError::Query(_) => "db_query_failed",
            EngineError::Write(_) => "db_write_failed",
            EngineError::Tx(_) => "db_tx_failed",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::ScopeBusy { .. }
                | EngineError::StorageConflict(_)
                | EngineError::RankingFailed(_)
        )
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        let mut d = match self {
            EngineError::NotFound { what, id } => json!({ "entity": what, "id": id }),
            EngineError::MarksIncomplete { missing, duplicate } => json!({
                "missingCount": missing.len(),
                "missing": missing,
                "duplicateCount": duplicate.len(),
                "duplicate": duplicate,
            }),
            EngineError::NoGradingSystem { requested } => json!({ "gradingSystemId": requested }),
            EngineError::GradeBandMissing {
                percentage,
                grading_system_id,
                grading_system_name,
                enrollment_id,
                subject,
            } => json!({
                "percentage": percentage,
                "gradingSystemId": grading_system_id,
                "gradingSystemName": grading_system_name,
                "enrollmentId": enrollment_id,
                "subject": subject,
            }),
            EngineError::ZeroFullMarks {
                enrollment_id,
                offering_id,
            } => json!({ "enrollmentId": enrollment_id, "offeringId": offering_id }),
            EngineError::ScopeBusy {
                scope_key,
                holder,
                acquired_at,
            } => json!({ "scope": scope_key, "holder": holder, "acquiredAt": acquired_at }),
            EngineError::RankingFailed(inner) | EngineError::SummaryFailed(inner) => json!({
                "resultsCommitted": true,
                "cause": { "code": inner.code(), "message": inner.to_string() },
            }),
            _ => json!({}),
        };
        if self.is_retryable() {
            d["retryable"] = json!(true);
        }
        match d.as_object() {
            Some(o) if o.is_empty() => None,
            _ => Some(d),
        }
    }
}
