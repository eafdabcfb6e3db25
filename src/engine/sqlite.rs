use super::store::{ResultStore, StoreResult};
use super::{now_rfc3339, EngineError};
use crate::grading::{GradeBand, GradingSystem};
use crate::model::{
    ClassInfo, Enrollment, Examination, Mark, RankCandidate, ResultFilter, ResultRecord, Scope,
    SectionInfo, StudentAggregate, SubjectLine, SubjectOffering,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};
use rusqlite::{Transaction, TransactionBehavior};
use uuid::Uuid;

pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

fn is_contention(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}

fn query_err(e: rusqlite::Error) -> EngineError {
    if is_contention(&e) {
        EngineError::StorageConflict(e.to_string())
    } else {
        EngineError::Query(e.to_string())
    }
}

fn write_err(e: rusqlite::Error) -> EngineError {
    if is_contention(&e) || e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) {
        EngineError::StorageConflict(e.to_string())
    } else {
        EngineError::Write(e.to_string())
    }
}

fn tx_err(e: rusqlite::Error) -> EngineError {
    if is_contention(&e) {
        EngineError::StorageConflict(e.to_string())
    } else {
        EngineError::Tx(e.to_string())
    }
}

impl SqliteStore<'_> {
    /// Bands of one grading system, highest minimum first.
    pub fn load_bands(&self, grading_system_id: &str) -> StoreResult<Vec<GradeBand>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, grade_name, min_percentage, max_percentage, points
                 FROM grades
                 WHERE grading_system_id = ?
                 ORDER BY min_percentage DESC",
            )
            .map_err(query_err)?;
        let rows = stmt.query_map([grading_system_id], |r| {
            Ok(GradeBand {
                id: r.get(0)?,
                grade_name: r.get(1)?,
                min_percentage: r.get(2)?,
                max_percentage: r.get(3)?,
                points: r.get(4)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
        Ok(rows)
    }

    fn load_subject_lines(&self, result_id: &str) -> StoreResult<Vec<SubjectLine>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT rs.offering_id, s.name, rs.marks_obtained, rs.full_marks, rs.percentage,
                        rs.grade_id, g.grade_name, rs.points, rs.passed
                 FROM result_subjects rs
                 JOIN subject_offerings so ON so.id = rs.offering_id
                 JOIN subjects s ON s.id = so.subject_id
                 JOIN grades g ON g.id = rs.grade_id
                 WHERE rs.result_id = ?
                 ORDER BY so.sort_order, s.name",
            )
            .map_err(query_err)?;
        let rows = stmt.query_map([result_id], |r| {
            Ok(SubjectLine {
                offering_id: r.get(0)?,
                subject_name: r.get(1)?,
                marks_obtained: r.get(2)?,
                full_marks: r.get(3)?,
                percentage: r.get(4)?,
                grade_id: r.get(5)?,
                grade_name: r.get(6)?,
                points: r.get(7)?,
                passed: r.get::<_, i64>(8)? != 0,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
        Ok(rows)
    }
}

impl ResultStore for SqliteStore<'_> {
    fn examination(&self, id: &str) -> StoreResult<Option<Examination>> {
        self.conn
            .query_row(
                "SELECT id, name, academic_year FROM examinations WHERE id = ?",
                [id],
                |r| {
                    Ok(Examination {
                        id: r.get(0)?,
                        name: r.get(1)?,
                        academic_year: r.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(query_err)
    }

    fn class(&self, id: &str) -> StoreResult<Option<ClassInfo>> {
        self.conn
            .query_row("SELECT id, name FROM classes WHERE id = ?", [id], |r| {
                Ok(ClassInfo {
                    id: r.get(0)?,
                    name: r.get(1)?,
                })
            })
            .optional()
            .map_err(query_err)
    }

    fn section(&self, class_id: &str, section_id: &str) -> StoreResult<Option<SectionInfo>> {
        self.conn
            .query_row(
                "SELECT id, class_id, name FROM sections WHERE id = ? AND class_id = ?",
                (section_id, class_id),
                |r| {
                    Ok(SectionInfo {
                        id: r.get(0)?,
                        class_id: r.get(1)?,
                        name: r.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(query_err)
    }

    fn grading_system(&self, id: Option<&str>) -> StoreResult<Option<GradingSystem>> {
        let row: Option<(String, String, i64)> = match id {
            Some(id) => self
                .conn
                .query_row(
                    "SELECT id, name, is_default FROM grading_systems WHERE id = ?",
                    [id],
                    |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
                )
                .optional()
                .map_err(query_err)?,
            None => self
                .conn
                .query_row(
                    "SELECT id, name, is_default
                     FROM grading_systems
                     WHERE is_default = 1
                     ORDER BY name, id
                     LIMIT 1",
                    [],
                    |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
                )
                .optional()
                .map_err(query_err)?,
        };
        let Some((gs_id, name, is_default)) = row else {
            return Ok(None);
        };
        let bands = self.load_bands(&gs_id)?;
        Ok(Some(GradingSystem::new(gs_id, name, is_default != 0, bands)))
    }

    fn offerings(&self, examination_id: &str, class_id: &str) -> StoreResult<Vec<SubjectOffering>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT so.id, so.subject_id, s.name, so.full_marks, so.pass_marks
                 FROM subject_offerings so
                 JOIN subjects s ON s.id = so.subject_id
                 WHERE so.examination_id = ? AND so.class_id = ?
                 ORDER BY so.sort_order, s.name",
            )
            .map_err(query_err)?;
        let rows = stmt.query_map((examination_id, class_id), |r| {
            Ok(SubjectOffering {
                id: r.get(0)?,
                subject_id: r.get(1)?,
                subject_name: r.get(2)?,
                full_marks: r.get(3)?,
                pass_marks: r.get(4)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
        Ok(rows)
    }

    fn enrollments(
        &self,
        class_id: &str,
        academic_year: &str,
        section_id: Option<&str>,
    ) -> StoreResult<Vec<Enrollment>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT e.id, e.student_id, st.last_name, st.first_name, e.roll_no, e.section_id
                 FROM enrollments e
                 JOIN students st ON st.id = e.student_id
                 WHERE e.class_id = ?1
                   AND e.academic_year = ?2
                   AND e.active = 1
                   AND (?3 IS NULL OR e.section_id = ?3)
                 ORDER BY e.roll_no IS NULL, e.roll_no, st.last_name, st.first_name, e.id",
            )
            .map_err(query_err)?;
        let rows = stmt.query_map(params![class_id, academic_year, section_id], |r| {
            let last: String = r.get(2)?;
            let first: String = r.get(3)?;
            Ok(Enrollment {
                id: r.get(0)?,
                student_id: r.get(1)?,
                display_name: format!("{}, {}", last, first),
                roll_no: r.get(4)?,
                section_id: r.get(5)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
        Ok(rows)
    }

    fn marks(&self, examination_id: &str, class_id: &str) -> StoreResult<Vec<Mark>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT m.enrollment_id, m.offering_id, m.marks_obtained
                 FROM marks m
                 JOIN subject_offerings so ON so.id = m.offering_id
                 WHERE so.examination_id = ? AND so.class_id = ?",
            )
            .map_err(query_err)?;
        let rows = stmt.query_map((examination_id, class_id), |r| {
            Ok(Mark {
                enrollment_id: r.get(0)?,
                offering_id: r.get(1)?,
                marks_obtained: r.get(2)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
        Ok(rows)
    }

    fn upsert_result(
        &self,
        examination_id: &str,
        aggregate: &StudentAggregate,
        processed_at: &str,
    ) -> StoreResult<()> {
        let new_id = Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO results(
                    id, enrollment_id, examination_id, grading_system_id, final_grade_id,
                    total_marks, total_full_marks, percentage, gpa, rank, processed_at, ranked_at
                 )
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, ?10, NULL)
                 ON CONFLICT(enrollment_id, examination_id) DO UPDATE SET
                   grading_system_id = excluded.grading_system_id,
                   final_grade_id = excluded.final_grade_id,
                   total_marks = excluded.total_marks,
                   total_full_marks = excluded.total_full_marks,
                   percentage = excluded.percentage,
                   gpa = excluded.gpa,
                   rank = NULL,
                   processed_at = excluded.processed_at,
                   ranked_at = NULL",
                params![
                    new_id,
                    aggregate.enrollment_id,
                    examination_id,
                    aggregate.grading_system_id,
                    aggregate.final_grade_id,
                    aggregate.total_marks,
                    aggregate.total_full_marks,
                    aggregate.percentage,
                    aggregate.gpa,
                    processed_at,
                ],
            )
            .map_err(write_err)?;

        let result_id: String = self
            .conn
            .query_row(
                "SELECT id FROM results WHERE enrollment_id = ? AND examination_id = ?",
                (&aggregate.enrollment_id, examination_id),
                |r| r.get(0),
            )
            .map_err(query_err)?;

        self.conn
            .execute("DELETE FROM result_subjects WHERE result_id = ?", [&result_id])
            .map_err(write_err)?;
        let mut insert = self
            .conn
            .prepare(
                "INSERT INTO result_subjects(
                    result_id, offering_id, marks_obtained, full_marks, percentage,
                    grade_id, points, passed
                 )
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .map_err(write_err)?;
        for line in &aggregate.subjects {
            let passed = i64::from(line.passed);
            insert
                .execute(params![
                    result_id,
                    line.offering_id,
                    line.marks_obtained,
                    line.full_marks,
                    line.percentage,
                    line.grade_id,
                    line.points,
                    passed,
                ])
                .map_err(write_err)?;
        }
        Ok(())
    }

    fn scoped_results(&self, scope: &Scope, academic_year: &str) -> StoreResult<Vec<RankCandidate>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT r.id, r.enrollment_id, e.roll_no, r.percentage, r.total_marks, r.gpa
                 FROM results r
                 JOIN enrollments e ON e.id = r.enrollment_id
                 WHERE r.examination_id = ?1
                   AND e.class_id = ?2
                   AND e.academic_year = ?3
                   AND e.active = 1
                   AND (?4 IS NULL OR e.section_id = ?4)",
            )
            .map_err(query_err)?;
        let rows = stmt.query_map(
            params![
                scope.examination_id,
                scope.class_id,
                academic_year,
                scope.section_id
            ],
            |r| {
                Ok(RankCandidate {
                    result_id: r.get(0)?,
                    enrollment_id: r.get(1)?,
                    roll_no: r.get(2)?,
                    percentage: r.get(3)?,
                    total_marks: r.get(4)?,
                    gpa: r.get(5)?,
                })
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_err)?;
        Ok(rows)
    }

    fn set_rank(&self, result_id: &str, rank: i64, ranked_at: &str) -> StoreResult<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE results SET rank = ?, ranked_at = ? WHERE id = ?",
                params![rank, ranked_at, result_id],
            )
            .map_err(write_err)?;
        if changed == 0 {
            return Err(EngineError::StorageConflict(format!(
                "result {result_id} disappeared while ranking"
            )));
        }
        Ok(())
    }

    fn clear_inactive_ranks(&self, scope: &Scope, academic_year: &str) -> StoreResult<usize> {
        self.conn
            .execute(
                "UPDATE results
                 SET rank = NULL, ranked_at = NULL
                 WHERE examination_id = ?1
                   AND rank IS NOT NULL
                   AND enrollment_id IN (
                     SELECT e.id FROM enrollments e
                     WHERE e.class_id = ?2
                       AND e.academic_year = ?3
                       AND e.active = 0
                       AND (?4 IS NULL OR e.section_id = ?4)
                   )",
                params![
                    scope.examination_id,
                    scope.class_id,
                    academic_year,
                    scope.section_id
                ],
            )
            .map_err(write_err)
    }

    fn list_results(
        &self,
        filter: &ResultFilter,
        include_subjects: bool,
    ) -> StoreResult<Vec<ResultRecord>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut binds: Vec<Value> = Vec::new();
        if let Some(v) = &filter.examination_id {
            clauses.push("r.examination_id = ?");
            binds.push(Value::Text(v.clone()));
        }
        if let Some(v) = &filter.class_id {
            clauses.push("e.class_id = ?");
            binds.push(Value::Text(v.clone()));
        }
        if let Some(v) = &filter.section_id {
            clauses.push("e.section_id = ?");
            binds.push(Value::Text(v.clone()));
        }
        if let Some(v) = &filter.enrollment_id {
            clauses.push("r.enrollment_id = ?");
            binds.push(Value::Text(v.clone()));
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let sql = format!(
            "SELECT r.id, r.enrollment_id, e.student_id, st.last_name, st.first_name, e.roll_no,
                    r.examination_id, x.name, x.academic_year, e.class_id, c.name,
                    e.section_id, sec.name, r.grading_system_id, gs.name, g.grade_name, g.points,
                    r.total_marks, r.total_full_marks, r.percentage, r.gpa, r.rank,
                    r.processed_at, r.ranked_at
             FROM results r
             JOIN enrollments e ON e.id = r.enrollment_id
             JOIN students st ON st.id = e.student_id
             JOIN examinations x ON x.id = r.examination_id
             JOIN classes c ON c.id = e.class_id
             LEFT JOIN sections sec ON sec.id = e.section_id
             JOIN grading_systems gs ON gs.id = r.grading_system_id
             JOIN grades g ON g.id = r.final_grade_id
             {}
             ORDER BY r.rank IS NULL, r.rank, r.examination_id, r.percentage DESC,
                      r.total_marks DESC, r.enrollment_id",
            where_sql
        );

        let mut stmt = self.conn.prepare(&sql).map_err(query_err)?;
        let mut rows = stmt
            .query_map(params_from_iter(binds), |r| {
                let last: String = r.get(3)?;
                let first: String = r.get(4)?;
                Ok(ResultRecord {
                    id: r.get(0)?,
                    enrollment_id: r.get(1)?,
                    student_id: r.get(2)?,
                    display_name: format!("{}, {}", last, first),
                    roll_no: r.get(5)?,
                    examination_id: r.get(6)?,
                    exam_name: r.get(7)?,
                    academic_year: r.get(8)?,
                    class_id: r.get(9)?,
                    class_name: r.get(10)?,
                    section_id: r.get(11)?,
                    section_name: r.get(12)?,
                    grading_system_id: r.get(13)?,
                    grading_system_name: r.get(14)?,
                    final_grade: r.get(15)?,
                    final_grade_points: r.get(16)?,
                    total_marks: r.get(17)?,
                    total_full_marks: r.get(18)?,
                    percentage: r.get(19)?,
                    gpa: r.get(20)?,
                    rank: r.get(21)?,
                    processed_at: r.get(22)?,
                    ranked_at: r.get(23)?,
                    subjects: None,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(query_err)?;

        if include_subjects {
            for row in &mut rows {
                row.subjects = Some(self.load_subject_lines(&row.id)?);
            }
        }
        Ok(rows)
    }

    fn try_lock_scope(
        &self,
        scope_key: &str,
        holder: &str,
        ttl_secs: i64,
    ) -> StoreResult<Option<(String, String)>> {
        let now = chrono::Utc::now();
        let reclaimed = self
            .conn
            .execute(
                "DELETE FROM processing_locks WHERE scope_key = ? AND acquired_at_epoch <= ?",
                params![scope_key, now.timestamp() - ttl_secs],
            )
            .map_err(write_err)?;
        if reclaimed > 0 {
            tracing::warn!(scope = scope_key, "reclaimed abandoned processing lock");
        }

        let inserted = self
            .conn
            .execute(
                "INSERT INTO processing_locks(scope_key, holder, acquired_at_epoch, acquired_at)
                 VALUES(?, ?, ?, ?)
                 ON CONFLICT(scope_key) DO NOTHING",
                params![
                    scope_key,
                    holder,
                    now.timestamp(),
                    now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
                ],
            )
            .map_err(write_err)?;
        if inserted == 1 {
            return Ok(None);
        }

        let current: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT holder, acquired_at FROM processing_locks WHERE scope_key = ?",
                [scope_key],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()
            .map_err(query_err)?;
        // Released between our insert and this read; report it as busy and let
        // the caller retry rather than looping here.
        Ok(Some(current.unwrap_or_else(|| {
            ("unknown".to_string(), now_rfc3339())
        })))
    }

    fn unlock_scope(&self, scope_key: &str, holder: &str) -> StoreResult<()> {
        self.conn
            .execute(
                "DELETE FROM processing_locks WHERE scope_key = ? AND holder = ?",
                (scope_key, holder),
            )
            .map_err(write_err)?;
        Ok(())
    }

    fn atomically<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Self) -> StoreResult<T>,
    {
        // IMMEDIATE takes the write lock up front so busy_timeout applies
        // before any read, not halfway through the unit.
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(tx_err)?;
        // Dropping `tx` on the error path rolls back every write made by `f`.
        let out = f(self)?;
        tx.commit().map_err(tx_err)?;
        Ok(out)
    }
}
