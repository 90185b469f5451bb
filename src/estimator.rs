//! Estimator strategies and the fallback chain.
//!
//! Every estimator turns a [`ResponseMatrix`] into a [`RaschFit`]. The
//! [`FallbackEstimator`] tries an optional primary strategy (normally the
//! external eRm backend) and, on any typed failure, runs the internal JMLE
//! fallback. Which strategy ran is recorded on the fit for tests and logs.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{BackendError, EstimationError, RaschError};
use crate::matrix::{Extreme, ResponseMatrix};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimationMethod {
    /// Internal joint maximum likelihood.
    Jmle,
    /// Conditional maximum likelihood through R's eRm package.
    Erm,
}

impl fmt::Display for EstimationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EstimationMethod::Jmle => f.write_str("JMLE"),
            EstimationMethod::Erm => f.write_str("eRm"),
        }
    }
}

/// Person and item parameters from one fit.
#[derive(Debug, Clone, PartialEq)]
pub struct RaschFit {
    /// Abilities, one per student, re-centered.
    pub theta: Vec<f64>,
    /// Difficulties, one per item.
    pub beta: Vec<f64>,
    /// Standard errors of `theta`; infinite for pinned students.
    pub se_theta: Vec<f64>,
    /// Standard errors of `beta`; infinite for pinned items.
    pub se_beta: Vec<f64>,
    /// Transform from model abilities to the reported `theta`.
    pub scale: AbilityScale,
    pub iterations: usize,
    pub converged: bool,
    pub method: EstimationMethod,
}

impl RaschFit {
    /// Abilities on the scale of `beta`, i.e. with the re-centering undone
    /// for the students that were not pinned.
    pub fn model_abilities(&self, pinned: &[Option<Extreme>]) -> Vec<f64> {
        self.theta
            .iter()
            .zip(pinned)
            .map(|(&t, p)| if p.is_some() { t } else { self.scale.to_model(t) })
            .collect()
    }

    /// Reject fits containing NaN or infinite parameters.
    pub fn ensure_finite(&self) -> Result<(), EstimationError> {
        ensure_finite(&self.theta, "theta")?;
        ensure_finite(&self.beta, "beta")
    }
}

pub fn ensure_finite(values: &[f64], what: &'static str) -> Result<(), EstimationError> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(EstimationError::NonFinite { what, index }),
        None => Ok(()),
    }
}

/// A strategy that fits the Rasch model to a full response matrix.
pub trait RaschEstimator: Send + Sync {
    fn name(&self) -> &'static str;

    fn fit(&self, responses: &ResponseMatrix) -> Result<RaschFit, EstimationError>;
}

/// Boundary value for a student with a zero or perfect raw score.
#[inline]
pub fn boundary_ability(extreme: Extreme, bound: f64) -> f64 {
    match extreme {
        Extreme::Full => bound,
        Extreme::Zero => -bound,
    }
}

/// Boundary value for an item nobody or everybody answered correctly.
#[inline]
pub fn boundary_difficulty(extreme: Extreme, bound: f64) -> f64 {
    match extreme {
        Extreme::Full => -bound,
        Extreme::Zero => bound,
    }
}

/// Largest reported |θ| of an estimable student, as a fraction of the bound.
pub const INTERIOR_FRACTION: f64 = 0.98;

/// Linear map from model abilities to reported abilities for estimable
/// students: `reported = (model - shift) * scale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AbilityScale {
    pub shift: f64,
    pub scale: f64,
}

impl AbilityScale {
    pub const IDENTITY: Self = Self {
        shift: 0.0,
        scale: 1.0,
    };

    #[inline]
    pub fn to_reported(&self, model: f64) -> f64 {
        (model - self.shift) * self.scale
    }

    #[inline]
    pub fn to_model(&self, reported: f64) -> f64 {
        reported / self.scale + self.shift
    }

    /// Standard errors follow the abilities onto the reported scale.
    pub fn rescale_errors(&self, se: &mut [f64]) {
        if self.scale != 1.0 {
            se.iter_mut().for_each(|s| *s *= self.scale);
        }
    }
}

impl Default for AbilityScale {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Fix the origin of the ability scale.
///
/// Estimable abilities are centered on their mean. If any of them then lies
/// beyond `INTERIOR_FRACTION * bound`, all of them are scaled down by the
/// same factor so that none reaches the boundary reserved for zero and
/// perfect scores. The estimable mean stays 0 and their order is kept.
/// Pinned students get their boundary value. If every student is pinned
/// nothing moves.
pub fn recenter_abilities(
    theta: &mut [f64],
    pinned: &[Option<Extreme>],
    bound: f64,
) -> AbilityScale {
    let (sum, count) = theta
        .iter()
        .zip(pinned)
        .filter(|(_, p)| p.is_none())
        .fold((0.0, 0usize), |(s, c), (&t, _)| (s + t, c + 1));
    if count == 0 {
        return AbilityScale::IDENTITY;
    }
    let shift = sum / count as f64;

    let peak = theta
        .iter()
        .zip(pinned)
        .filter(|(_, p)| p.is_none())
        .map(|(&t, _)| (t - shift).abs())
        .fold(0.0, f64::max);
    let limit = INTERIOR_FRACTION * bound;
    let scale = if peak > limit { limit / peak } else { 1.0 };
    if scale < 1.0 {
        log::debug!("compressing estimable abilities by {scale:.4} to stay inside ±{bound}");
    }

    let transform = AbilityScale { shift, scale };
    for (t, p) in theta.iter_mut().zip(pinned) {
        *t = match p {
            Some(extreme) => boundary_ability(*extreme, bound),
            None => transform.to_reported(*t),
        };
    }
    transform
}

/// Tries `primary` first and falls back on any failure.
pub struct FallbackEstimator {
    primary: Option<Box<dyn RaschEstimator>>,
    fallback: Box<dyn RaschEstimator>,
}

impl FallbackEstimator {
    pub fn new(primary: Option<Box<dyn RaschEstimator>>, fallback: Box<dyn RaschEstimator>) -> Self {
        Self { primary, fallback }
    }

    /// A chain with no primary strategy.
    pub fn fallback_only(fallback: Box<dyn RaschEstimator>) -> Self {
        Self::new(None, fallback)
    }

    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    pub fn fit(&self, responses: &ResponseMatrix) -> Result<RaschFit, RaschError> {
        let primary_err = match &self.primary {
            Some(primary) => match primary.fit(responses).and_then(|fit| {
                fit.ensure_finite()?;
                Ok(fit)
            }) {
                Ok(fit) => {
                    log::info!(
                        "{} fitted {} students x {} items",
                        primary.name(),
                        responses.n_students(),
                        responses.n_items()
                    );
                    return Ok(fit);
                }
                Err(err) => {
                    log::warn!(
                        "{} estimation failed, falling back to {}: {err}",
                        primary.name(),
                        self.fallback.name()
                    );
                    err
                }
            },
            None => BackendError::Unavailable("no external backend configured".to_string()).into(),
        };

        match self.fallback.fit(responses).and_then(|fit| {
            fit.ensure_finite()?;
            Ok(fit)
        }) {
            Ok(fit) => {
                log::info!(
                    "{} fitted {} students x {} items",
                    self.fallback.name(),
                    responses.n_students(),
                    responses.n_items()
                );
                Ok(fit)
            }
            Err(fallback_err) => {
                log::error!("all estimators failed: {primary_err}; {fallback_err}");
                Err(RaschError::EstimationFailed {
                    primary: primary_err,
                    fallback: fallback_err,
                })
            }
        }
    }
}

impl fmt::Debug for FallbackEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackEstimator")
            .field("primary", &self.primary.as_ref().map(|p| p.name()))
            .field("fallback", &self.fallback.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::mean;
    use approx::assert_abs_diff_eq;

    struct Fixed(EstimationMethod);

    impl RaschEstimator for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn fit(&self, responses: &ResponseMatrix) -> Result<RaschFit, EstimationError> {
            Ok(RaschFit {
                theta: vec![0.0; responses.n_students()],
                beta: vec![0.0; responses.n_items()],
                se_theta: vec![1.0; responses.n_students()],
                se_beta: vec![1.0; responses.n_items()],
                scale: AbilityScale::IDENTITY,
                iterations: 1,
                converged: true,
                method: self.0,
            })
        }
    }

    struct Broken;

    impl RaschEstimator for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn fit(&self, _: &ResponseMatrix) -> Result<RaschFit, EstimationError> {
            Err(BackendError::Unavailable("not installed".into()).into())
        }
    }

    struct NanTheta;

    impl RaschEstimator for NanTheta {
        fn name(&self) -> &'static str {
            "nan"
        }

        fn fit(&self, responses: &ResponseMatrix) -> Result<RaschFit, EstimationError> {
            let mut fit = Fixed(EstimationMethod::Erm).fit(responses)?;
            fit.theta[0] = f64::NAN;
            Ok(fit)
        }
    }

    fn matrix() -> ResponseMatrix {
        ResponseMatrix::from_binary_rows(&[vec![1, 0], vec![0, 1]]).unwrap()
    }

    #[test]
    fn primary_result_is_used_when_it_succeeds() {
        let chain = FallbackEstimator::new(
            Some(Box::new(Fixed(EstimationMethod::Erm))),
            Box::new(Fixed(EstimationMethod::Jmle)),
        );
        assert_eq!(chain.fit(&matrix()).unwrap().method, EstimationMethod::Erm);
    }

    #[test]
    fn failing_primary_falls_back() {
        let chain = FallbackEstimator::new(
            Some(Box::new(Broken)),
            Box::new(Fixed(EstimationMethod::Jmle)),
        );
        assert_eq!(chain.fit(&matrix()).unwrap().method, EstimationMethod::Jmle);
    }

    #[test]
    fn non_finite_primary_output_falls_back() {
        let chain = FallbackEstimator::new(
            Some(Box::new(NanTheta)),
            Box::new(Fixed(EstimationMethod::Jmle)),
        );
        assert_eq!(chain.fit(&matrix()).unwrap().method, EstimationMethod::Jmle);
    }

    #[test]
    fn both_failing_is_estimation_failed() {
        let chain = FallbackEstimator::new(Some(Box::new(Broken)), Box::new(Broken));
        assert!(matches!(
            chain.fit(&matrix()),
            Err(RaschError::EstimationFailed { .. })
        ));

        let chain = FallbackEstimator::fallback_only(Box::new(Broken));
        assert!(!chain.has_primary());
        assert!(matches!(
            chain.fit(&matrix()),
            Err(RaschError::EstimationFailed { .. })
        ));
    }

    #[test]
    fn recenter_leaves_pinned_students_on_the_boundary() {
        let mut theta = vec![3.0, 1.2, 0.4, -3.0];
        let pinned = vec![Some(Extreme::Full), None, None, Some(Extreme::Zero)];
        let scale = recenter_abilities(&mut theta, &pinned, 3.0);
        assert_abs_diff_eq!(scale.shift, 0.8, epsilon = 1e-12);
        assert_eq!(scale.scale, 1.0);
        assert_eq!(theta[0], 3.0);
        assert_eq!(theta[3], -3.0);
        assert_abs_diff_eq!(theta[1], 0.4, epsilon = 1e-12);
        assert_abs_diff_eq!(theta[2], -0.4, epsilon = 1e-12);
        assert_abs_diff_eq!(mean(&theta), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn recenter_with_everyone_pinned_is_a_no_op() {
        let mut theta = vec![3.0, 3.0];
        let pinned = [Some(Extreme::Full), Some(Extreme::Full)];
        assert_eq!(
            recenter_abilities(&mut theta, &pinned, 3.0),
            AbilityScale::IDENTITY
        );
        assert_eq!(theta, vec![3.0, 3.0]);
    }

    #[test]
    fn lopsided_estimable_group_is_compressed_inside_the_bound() {
        // One strong student against five weak ones: centering alone would
        // put the strong one at 4.375.
        let mut theta = vec![3.0, -2.25, -2.25, -2.25, -2.25, -2.25];
        let pinned = [None; 6];
        let scale = recenter_abilities(&mut theta, &pinned, 3.0);

        assert!(scale.scale < 1.0);
        assert_abs_diff_eq!(mean(&theta), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(theta[0], INTERIOR_FRACTION * 3.0, epsilon = 1e-12);
        assert!(theta[1..].iter().all(|&t| t == theta[1] && t < 0.0));
        assert_abs_diff_eq!(scale.to_model(theta[0]), 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(scale.to_model(theta[3]), -2.25, epsilon = 1e-12);
    }

    #[test]
    fn compression_keeps_estimable_students_off_the_pinned_values() {
        let mut theta = vec![3.0, 3.0, 2.9, -2.9, -2.0, -3.0];
        let pinned = [Some(Extreme::Full), None, None, None, None, Some(Extreme::Zero)];
        recenter_abilities(&mut theta, &pinned, 3.0);

        assert_eq!(theta[0], 3.0);
        assert_eq!(theta[5], -3.0);
        assert!(theta[1..5].iter().all(|t| t.abs() < 3.0));
        assert!(theta[1] > theta[2] && theta[2] > theta[4] && theta[4] > theta[3]);
        assert_abs_diff_eq!(mean(&theta[1..5]), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn model_abilities_undo_the_shift_for_free_students() {
        let fit = RaschFit {
            theta: vec![3.0, 0.5, -0.5],
            beta: vec![0.0],
            se_theta: vec![f64::INFINITY, 1.0, 1.0],
            se_beta: vec![1.0],
            scale: AbilityScale {
                shift: 0.25,
                scale: 0.5,
            },
            iterations: 3,
            converged: true,
            method: EstimationMethod::Jmle,
        };
        let pinned = [Some(Extreme::Full), None, None];
        assert_eq!(fit.model_abilities(&pinned), vec![3.0, 1.25, -0.75]);
    }

    #[test]
    fn errors_are_rescaled_with_the_abilities() {
        let mut se = vec![f64::INFINITY, 0.8, 0.4];
        AbilityScale {
            shift: 1.0,
            scale: 0.5,
        }
        .rescale_errors(&mut se);
        assert!(se[0].is_infinite());
        assert_eq!(&se[1..], &[0.4, 0.2]);
    }

    #[test]
    fn boundary_values_mirror_each_other() {
        assert_eq!(boundary_ability(Extreme::Full, 3.0), 3.0);
        assert_eq!(boundary_ability(Extreme::Zero, 3.0), -3.0);
        assert_eq!(boundary_difficulty(Extreme::Full, 3.0), -3.0);
        assert_eq!(boundary_difficulty(Extreme::Zero, 3.0), 3.0);
    }
}
