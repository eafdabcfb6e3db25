use super::EngineError;
use crate::grading::GradingSystem;
use crate::model::{
    ClassInfo, Enrollment, Examination, Mark, RankCandidate, ResultFilter, ResultRecord, Scope,
    SectionInfo, StudentAggregate, SubjectOffering,
};

pub type StoreResult<T> = Result<T, EngineError>;

/// Everything the engine needs from storage. The engine never touches SQL;
/// a store only has to answer these lookups and apply these writes.
pub trait ResultStore {
    fn examination(&self, id: &str) -> StoreResult<Option<Examination>>;
    fn class(&self, id: &str) -> StoreResult<Option<ClassInfo>>;
    fn section(&self, class_id: &str, section_id: &str) -> StoreResult<Option<SectionInfo>>;

    /// `Some(id)` looks the system up by id, `None` returns the default one.
    fn grading_system(&self, id: Option<&str>) -> StoreResult<Option<GradingSystem>>;

    fn offerings(&self, examination_id: &str, class_id: &str) -> StoreResult<Vec<SubjectOffering>>;

    /// Active enrollments for the class and academic year, narrowed to the
    /// section when one is given.
    fn enrollments(
        &self,
        class_id: &str,
        academic_year: &str,
        section_id: Option<&str>,
    ) -> StoreResult<Vec<Enrollment>>;

    /// Every mark recorded against the examination's offerings for the class.
    fn marks(&self, examination_id: &str, class_id: &str) -> StoreResult<Vec<Mark>>;

    /// Inserts or overwrites the Result for (enrollment, examination), replaces
    /// its subject lines and clears its rank.
    fn upsert_result(
        &self,
        examination_id: &str,
        aggregate: &StudentAggregate,
        processed_at: &str,
    ) -> StoreResult<()>;

    /// Results of active enrollments inside the scope.
    fn scoped_results(&self, scope: &Scope, academic_year: &str) -> StoreResult<Vec<RankCandidate>>;

    fn set_rank(&self, result_id: &str, rank: i64, ranked_at: &str) -> StoreResult<()>;

    /// Clears rank and `ranked_at` on Results inside the scope whose
    /// enrollment is no longer active, so their old rank cannot collide
    /// with the ranks handed out to the active ones.
    fn clear_inactive_ranks(&self, scope: &Scope, academic_year: &str) -> StoreResult<usize>;

    fn list_results(&self, filter: &ResultFilter, include_subjects: bool)
        -> StoreResult<Vec<ResultRecord>>;

    /// Returns `Ok(None)` when the lock was taken, or the current
    /// (holder, acquired_at) when someone else holds a live lock.
    fn try_lock_scope(
        &self,
        scope_key: &str,
        holder: &str,
        ttl_secs: i64,
    ) -> StoreResult<Option<(String, String)>>;

    fn unlock_scope(&self, scope_key: &str, holder: &str) -> StoreResult<()>;

    /// Runs `f` as one all-or-nothing unit: its writes are committed only if
    /// it returns `Ok`.
    fn atomically<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Self) -> StoreResult<T>;
}
