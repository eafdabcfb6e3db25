use serde::{Deserialize, Serialize};

/// Bands are written at two-decimal resolution, so `80.00-89.99` followed by
/// `90.00-100.00` is contiguous.
pub const BAND_STEP: f64 = 0.01;
const EPS: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBand {
    #[serde(default)]
    pub id: String,
    pub grade_name: String,
    pub min_percentage: f64,
    pub max_percentage: f64,
    pub points: f64,
}

impl GradeBand {
    /// Inclusive on both ends. A raw percentage that lands in the 0.01 step
    /// after `max_percentage` (89.995 for a band ending at 89.99) still belongs
    /// here, since the next band starts at the following step.
    pub fn contains(&self, percentage: f64) -> bool {
        percentage >= self.min_percentage - EPS
            && (percentage <= self.max_percentage + EPS
                || percentage < self.max_percentage + BAND_STEP - EPS)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingSystem {
    pub id: String,
    pub name: String,
    pub is_default: bool,
    /// Sorted by `min_percentage` descending.
    pub bands: Vec<GradeBand>,
}

impl GradingSystem {
    pub fn new(id: String, name: String, is_default: bool, mut bands: Vec<GradeBand>) -> Self {
        bands.sort_by(|a, b| b.min_percentage.total_cmp(&a.min_percentage));
        Self {
            id,
            name,
            is_default,
            bands,
        }
    }

    /// The band containing the unrounded `percentage`: the highest
    /// `min_percentage` at or below it, provided the value does not run past
    /// that band's maximum. On a shared edge the band with the higher minimum
    /// wins.
    pub fn resolve(&self, percentage: f64) -> Option<&GradeBand> {
        if !percentage.is_finite() {
            return None;
        }
        self.bands.iter().find(|b| b.contains(percentage))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BandProblem {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grade_name: Option<String>,
}

impl BandProblem {
    fn new(message: impl Into<String>, grade_name: Option<&str>) -> Self {
        Self {
            message: message.into(),
            grade_name: grade_name.map(|s| s.to_string()),
        }
    }
}

/// Checks that the bands are well formed and tile 0..=100 without gaps or
/// overlaps (a shared edge is allowed). Returns every problem found.
pub fn validate_bands(bands: &[GradeBand]) -> Vec<BandProblem> {
    let mut problems = Vec::new();
    if bands.is_empty() {
        problems.push(BandProblem::new("at least one grade band is required", None));
        return problems;
    }

    let mut seen_names: Vec<String> = Vec::new();
    for b in bands {
        let name = b.grade_name.trim();
        if name.is_empty() {
            problems.push(BandProblem::new("gradeName must not be empty", None));
        } else if seen_names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
            problems.push(BandProblem::new("duplicate gradeName", Some(name)));
        } else {
            seen_names.push(name.to_string());
        }

        if !b.min_percentage.is_finite() || !b.max_percentage.is_finite() {
            problems.push(BandProblem::new("band bounds must be finite", Some(name)));
            continue;
        }
        if b.min_percentage < 0.0 || b.max_percentage > 100.0 {
            problems.push(BandProblem::new("band bounds must lie within 0..=100", Some(name)));
        }
        if b.min_percentage > b.max_percentage {
            problems.push(BandProblem::new(
                "minPercentage must be <= maxPercentage",
                Some(name),
            ));
        }
        if !b.points.is_finite() || b.points < 0.0 {
            problems.push(BandProblem::new("points must be a non-negative number", Some(name)));
        }
    }
    if !problems.is_empty() {
        return problems;
    }

    let mut sorted: Vec<&GradeBand> = bands.iter().collect();
    sorted.sort_by(|a, b| a.min_percentage.total_cmp(&b.min_percentage));

    if sorted[0].min_percentage > EPS {
        problems.push(BandProblem::new(
            format!("bands must start at 0, lowest starts at {}", sorted[0].min_percentage),
            Some(&sorted[0].grade_name),
        ));
    }
    let last = sorted[sorted.len() - 1];
    if last.max_percentage < 100.0 - EPS {
        problems.push(BandProblem::new(
            format!("bands must end at 100, highest ends at {}", last.max_percentage),
            Some(&last.grade_name),
        ));
    }
    for pair in sorted.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        let step = hi.min_percentage - lo.max_percentage;
        if step < -EPS {
            problems.push(BandProblem::new(
                format!("overlaps with band {}", lo.grade_name),
                Some(&hi.grade_name),
            ));
        } else if step > BAND_STEP + EPS {
            problems.push(BandProblem::new(
                format!(
                    "gap between {} and {} leaves percentages without a grade",
                    lo.max_percentage, hi.min_percentage
                ),
                Some(&hi.grade_name),
            ));
        }
    }

    problems
}
