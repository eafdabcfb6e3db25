//! Result aggregation and ranking.
//!
//! A process call runs, under a per-(examination, class) lock:
//! completeness gate, aggregation (one atomic unit), ranking (a second atomic
//! unit), then a read-only summary. Aggregation never commits a partial batch;
//! a ranking failure leaves the committed aggregates in place and can be
//! retried on its own with [`rank_results`].

mod completeness;
mod error;
mod lock;
pub mod sqlite;
pub mod store;


pub use completeness::check_completeness;
pub use error::{EngineError, MarkGap};
pub use sqlite::SqliteStore;
pub use store::ResultStore;

use crate::calc;
use crate::model::{ClassInfo, Examination, ResultFilter, ResultRecord, Scope, SectionInfo};
use lock::ScopeLock;
use serde::Serialize;
use tracing::{debug, info, info_span, warn};

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub lock_ttl_secs: i64,
}

#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub scope: Scope,
    pub grading_system_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutcome {
    pub processed_count: usize,
    pub exam_name: String,
    pub class_name: String,
    pub section_name: Option<String>,
    pub academic_year: String,
    pub grading_system_name: String,
    pub average_percentage: f64,
    #[serde(rename = "averageGPA")]
    pub average_gpa: f64,
    pub highest_percentage: f64,
    pub lowest_percentage: f64,
    pub ranked_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankOutcome {
    pub ranked_count: usize,
}

struct ResolvedScope {
    exam: Examination,
    class: ClassInfo,
    section: Option<SectionInfo>,
}

fn resolve_scope<S: ResultStore>(store: &S, scope: &Scope) -> Result<ResolvedScope, EngineError> {
    if scope.examination_id.trim().is_empty() {
        return Err(EngineError::BadParams("examId must not be empty".into()));
    }
    if scope.class_id.trim().is_empty() {
        return Err(EngineError::BadParams("classId must not be empty".into()));
    }
    let exam = store
        .examination(&scope.examination_id)?
        .ok_or_else(|| EngineError::NotFound {
            what: "examination",
            id: scope.examination_id.clone(),
        })?;
    let class = store
        .class(&scope.class_id)?
        .ok_or_else(|| EngineError::NotFound {
            what: "class",
            id: scope.class_id.clone(),
        })?;
    let section = match scope.section_id.as_deref() {
        Some(sid) => Some(store.section(&class.id, sid)?.ok_or_else(|| {
            EngineError::NotFound {
                what: "section",
                id: sid.to_string(),
            }
        })?),
        None => None,
    };
    Ok(ResolvedScope {
        exam,
        class,
        section,
    })
}

/// UTC timestamp at second resolution, as stored in `processed_at`,
/// `ranked_at` and mark `updated_at`.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Ranks every Result in scope as one atomic unit.
fn rank_in_scope<S: ResultStore>(
    store: &S,
    scope: &Scope,
    academic_year: &str,
) -> Result<usize, EngineError> {
    store.atomically(|s| {
        let cleared = s.clear_inactive_ranks(scope, academic_year)?;
        if cleared > 0 {
            debug!(cleared, "cleared ranks of inactive enrollments");
        }
        let candidates = s.scoped_results(scope, academic_year)?;
        let ranks = calc::assign_ranks(candidates);
        let ranked_at = now_rfc3339();
        for (result_id, rank) in &ranks {
            s.set_rank(result_id, *rank, &ranked_at)?;
        }
        Ok(ranks.len())
    })
}

pub fn process_results<S: ResultStore>(
    store: &S,
    req: &ProcessRequest,
    opts: EngineOptions,
) -> Result<ProcessOutcome, EngineError> {
    let scope = &req.scope;
    let ResolvedScope {
        exam,
        class,
        section,
    } = resolve_scope(store, scope)?;

    let span = info_span!(
        "process_results",
        exam = %exam.id,
        class = %class.id,
        section = ?scope.section_id
    );
    let _enter = span.enter();

    let _lock = ScopeLock::acquire(store, scope.lock_key(), opts.lock_ttl_secs)?;

    let offerings = store.offerings(&exam.id, &class.id)?;
    let enrollments =
        store.enrollments(&class.id, &exam.academic_year, scope.section_id.as_deref())?;
    let marks = store.marks(&exam.id, &class.id)?;
    let complete = check_completeness(&enrollments, &offerings, &marks).inspect_err(|e| {
        warn!(code = e.code(), "completeness check failed: {e}");
    })?;

    let system = store
        .grading_system(req.grading_system_id.as_deref())?
        .ok_or_else(|| EngineError::NoGradingSystem {
            requested: req.grading_system_id.clone(),
        })?;

    info!(
        students = enrollments.len(),
        subjects = offerings.len(),
        grading_system = %system.name,
        "aggregating results"
    );

    let processed_at = now_rfc3339();
    let processed = store
        .atomically(|s| {
            for e in &enrollments {
                let agg = calc::aggregate_student(e, &offerings, &complete, &system)?;
                debug!(
                    enrollment = %e.id,
                    total = agg.total_marks,
                    percentage = agg.percentage,
                    gpa = agg.gpa,
                    grade = %agg.final_grade_name,
                    "aggregated"
                );
                s.upsert_result(&exam.id, &agg, &processed_at)?;
            }
            Ok(enrollments.len())
        })
        .inspect_err(|e| warn!(code = e.code(), "aggregation rolled back: {e}"))?;
    info!(processed, "aggregation committed");

    let ranked_count = rank_in_scope(store, scope, &exam.academic_year).map_err(|e| {
        warn!(code = e.code(), "ranking failed after aggregation: {e}");
        EngineError::RankingFailed(Box::new(e))
    })?;
    info!(ranked = ranked_count, "ranking committed");

    let rows = store
        .scoped_results(scope, &exam.academic_year)
        .map_err(|e| EngineError::SummaryFailed(Box::new(e)))?;
    let summary = calc::summarize(&rows);

    Ok(ProcessOutcome {
        processed_count: processed,
        exam_name: exam.name,
        class_name: class.name,
        section_name: section.map(|s| s.name),
        academic_year: exam.academic_year,
        grading_system_name: system.name,
        average_percentage: summary.average_percentage,
        average_gpa: summary.average_gpa,
        highest_percentage: summary.highest_percentage,
        lowest_percentage: summary.lowest_percentage,
        ranked_count,
    })
}

/// Re-runs only the ranking phase for a scope.
pub fn rank_results<S: ResultStore>(
    store: &S,
    scope: &Scope,
    opts: EngineOptions,
) -> Result<RankOutcome, EngineError> {
    let resolved = resolve_scope(store, scope)?;
    let _lock = ScopeLock::acquire(store, scope.lock_key(), opts.lock_ttl_secs)?;
    let ranked_count = rank_in_scope(store, scope, &resolved.exam.academic_year)?;
    info!(
        exam = %resolved.exam.id,
        class = %resolved.class.id,
        ranked = ranked_count,
        "ranking committed"
    );
    Ok(RankOutcome { ranked_count })
}

pub fn list_results<S: ResultStore>(
    store: &S,
    filter: &ResultFilter,
    include_subjects: bool,
) -> Result<Vec<ResultRecord>, EngineError> {
    store.list_results(filter, include_subjects)
}
