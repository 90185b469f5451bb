//! T-score standardization and grade classification.
//!
//! Abilities are converted to `T = 50 + 10 Z` with `Z = (θ - μ) / σ`,
//! clipped to `[0, 100]`. Grades are looked up in an ordered threshold
//! table; the table is data, so alternate presentations of the same T-score
//! are just different [`GradeScheme`] values.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::utils::{EPSILON, logit};

pub const T_MEAN: f64 = 50.0;
pub const T_SD: f64 = 10.0;
pub const T_MIN: f64 = 0.0;
pub const T_MAX: f64 = 100.0;

/// Standardize one ability against the group mean and standard deviation.
///
/// A degenerate group (`std_theta` zero or not finite) maps everyone to 50.
#[inline]
pub fn t_score(theta: f64, mean_theta: f64, std_theta: f64) -> f64 {
    if !std_theta.is_finite() || std_theta < EPSILON {
        return T_MEAN;
    }
    let z = (theta - mean_theta) / std_theta;
    (T_MEAN + T_SD * z).clamp(T_MIN, T_MAX)
}

pub fn t_scores(theta: &[f64], mean_theta: f64, std_theta: f64) -> Vec<f64> {
    theta
        .iter()
        .map(|&t| t_score(t, mean_theta, std_theta))
        .collect()
}

/// Ability from a single answer sheet without a cohort: the logit of the
/// proportion correct, clamped to `[-bound, bound]`. A perfect or empty
/// score sits on the boundary; a sheet with no questions scores 0.
pub fn provisional_ability(correct: usize, total: usize, bound: f64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    if correct >= total {
        return bound;
    }
    if correct == 0 {
        return -bound;
    }
    logit(correct as f64 / total as f64).clamp(-bound, bound)
}

/// One row of a grade table: T-scores at or above `min_t` earn `label`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeBand {
    pub min_t: f64,
    pub label: String,
}

impl GradeBand {
    fn new(min_t: f64, label: &str) -> Self {
        Self {
            min_t,
            label: label.to_string(),
        }
    }
}

/// Ordered, non-overlapping grade table. Bands are checked from the highest
/// threshold down; anything below the last band gets `floor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GradeSchemeSpec", into = "GradeSchemeSpec")]
pub struct GradeScheme {
    bands: Vec<GradeBand>,
    floor: String,
}

impl GradeScheme {
    /// Build a scheme from bands in strictly descending threshold order.
    pub fn new(bands: Vec<GradeBand>, floor: impl Into<String>) -> Result<Self, ConfigError> {
        if bands.is_empty() {
            return Err(ConfigError::Invalid {
                field: "grading.bands",
                reason: "at least one band is required".to_string(),
            });
        }
        for (k, band) in bands.iter().enumerate() {
            if !band.min_t.is_finite() {
                return Err(ConfigError::Invalid {
                    field: "grading.bands",
                    reason: format!("threshold for `{}` is not finite", band.label),
                });
            }
            if k > 0 && band.min_t >= bands[k - 1].min_t {
                return Err(ConfigError::Invalid {
                    field: "grading.bands",
                    reason: format!(
                        "thresholds must be strictly descending ({} follows {})",
                        band.min_t,
                        bands[k - 1].min_t
                    ),
                });
            }
        }
        Ok(Self {
            bands,
            floor: floor.into(),
        })
    }

    /// Six-tier letter scale: A+ at 70 down to C at 46, NC below.
    pub fn letter() -> Self {
        Self {
            bands: vec![
                GradeBand::new(70.0, "A+"),
                GradeBand::new(65.0, "A"),
                GradeBand::new(60.0, "B+"),
                GradeBand::new(55.0, "B"),
                GradeBand::new(50.0, "C+"),
                GradeBand::new(46.0, "C"),
            ],
            floor: "NC".to_string(),
        }
    }

    /// Five-tier descriptive scale at 70/60/50/40.
    pub fn descriptive() -> Self {
        Self {
            bands: vec![
                GradeBand::new(70.0, "A'lo"),
                GradeBand::new(60.0, "Yaxshi"),
                GradeBand::new(50.0, "Qoniqarli"),
                GradeBand::new(40.0, "Qoniqarsiz"),
            ],
            floor: "Juda past".to_string(),
        }
    }

    pub fn preset(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "letter" => Some(Self::letter()),
            "descriptive" => Some(Self::descriptive()),
            _ => None,
        }
    }

    pub fn classify(&self, t_score: f64) -> &str {
        self.bands
            .iter()
            .find(|band| t_score >= band.min_t)
            .map_or(self.floor.as_str(), |band| band.label.as_str())
    }
}

impl Default for GradeScheme {
    fn default() -> Self {
        Self::letter()
    }
}

/// Serialized form of a scheme: a preset name or an explicit table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum GradeSchemeSpec {
    Preset(String),
    Table { bands: Vec<GradeBand>, floor: String },
}

impl TryFrom<GradeSchemeSpec> for GradeScheme {
    type Error = ConfigError;

    fn try_from(spec: GradeSchemeSpec) -> Result<Self, Self::Error> {
        match spec {
            GradeSchemeSpec::Preset(name) => {
                Self::preset(&name).ok_or_else(|| ConfigError::Invalid {
                    field: "grading",
                    reason: format!(
                        "unknown preset `{name}`; valid presets are 'letter' and 'descriptive'"
                    ),
                })
            }
            GradeSchemeSpec::Table { bands, floor } => Self::new(bands, floor),
        }
    }
}

impl From<GradeScheme> for GradeSchemeSpec {
    fn from(scheme: GradeScheme) -> Self {
        GradeSchemeSpec::Table {
            bands: scheme.bands,
            floor: scheme.floor,
        }
    }
}
