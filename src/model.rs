use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Examination {
    pub id: String,
    pub name: String,
    pub academic_year: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionInfo {
    pub id: String,
    pub class_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectOffering {
    pub id: String,
    pub subject_id: String,
    pub subject_name: String,
    pub full_marks: f64,
    pub pass_marks: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: String,
    pub student_id: String,
    pub display_name: String,
    pub roll_no: Option<i64>,
    pub section_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mark {
    pub enrollment_id: String,
    pub offering_id: String,
    pub marks_obtained: f64,
}

/// The (examination, class, optional section) a process or rank call targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub examination_id: String,
    pub class_id: String,
    pub section_id: Option<String>,
}

impl Scope {
    /// Locks are taken per (examination, class) so a section run and a
    /// whole-class run of the same exam never interleave.
    pub fn lock_key(&self) -> String {
        format!("{}/{}", self.examination_id, self.class_id)
    }
}

/// Computed per-subject line, persisted alongside its Result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectLine {
    pub offering_id: String,
    pub subject_name: String,
    pub marks_obtained: f64,
    pub full_marks: f64,
    pub percentage: f64,
    pub grade_id: String,
    pub grade_name: String,
    pub points: f64,
    pub passed: bool,
}

/// Aggregate for one enrollment before it is written.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentAggregate {
    pub enrollment_id: String,
    pub grading_system_id: String,
    pub final_grade_id: String,
    pub final_grade_name: String,
    pub total_marks: f64,
    pub total_full_marks: f64,
    pub percentage: f64,
    pub gpa: f64,
    pub subjects: Vec<SubjectLine>,
}

/// What the ranking phase reads back for each Result in scope.
#[derive(Debug, Clone, PartialEq)]
pub struct RankCandidate {
    pub result_id: String,
    pub enrollment_id: String,
    pub roll_no: Option<i64>,
    pub percentage: f64,
    pub total_marks: f64,
    pub gpa: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ResultFilter {
    pub examination_id: Option<String>,
    pub class_id: Option<String>,
    pub section_id: Option<String>,
    pub enrollment_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub id: String,
    pub enrollment_id: String,
    pub student_id: String,
    pub display_name: String,
    pub roll_no: Option<i64>,
    pub examination_id: String,
    pub exam_name: String,
    pub academic_year: String,
    pub class_id: String,
    pub class_name: String,
    pub section_id: Option<String>,
    pub section_name: Option<String>,
    pub grading_system_id: String,
    pub grading_system_name: String,
    pub final_grade: String,
    pub final_grade_points: f64,
    pub total_marks: f64,
    pub total_full_marks: f64,
    pub percentage: f64,
    pub gpa: f64,
    pub rank: Option<i64>,
    pub processed_at: String,
    pub ranked_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subjects: Option<Vec<SubjectLine>>,
}
