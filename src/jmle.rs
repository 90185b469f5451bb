//! Joint maximum likelihood estimation of Rasch abilities and difficulties.
//!
//! Each sweep performs one diagonal Newton-Raphson step per student, then
//! recomputes the model probabilities and performs one step per item. An L2
//! penalty `λ` keeps separable response patterns from diverging and damps
//! oscillation near the optimum:
//!
//! ```text
//! θ_i += (Σ_j (x_ij - P_ij) - λ θ_i) / (Σ_j P_ij (1 - P_ij) + λ)
//! β_j += (-Σ_i (x_ij - P_ij) - λ β_j) / (Σ_i P_ij (1 - P_ij) + λ)
//! ```
//!
//! The likelihood only depends on `θ_i - β_j`, so it is flat along a common
//! shift of every free parameter and only the penalty pins that direction
//! down. Each sweep therefore ends with one Newton step along the shift
//! direction; without it that mode contracts by just `w / (w + λ)` per sweep.
//!
//! Students with a zero or perfect raw score, and items nobody or everybody
//! answered, have no finite maximum likelihood estimate. They are pinned to
//! the clamp boundary and never updated.

use ndarray::Array2;
use rayon::prelude::*;

use crate::config::EstimationConfig;
use crate::error::EstimationError;
use crate::estimator::{
    EstimationMethod, RaschEstimator, RaschFit, boundary_ability, boundary_difficulty,
    ensure_finite, recenter_abilities,
};
use crate::matrix::{Extreme, ResponseMatrix};
use crate::utils::{EPSILON, log_sigmoid, logit, rasch_probability, standard_error};

#[derive(Debug, Clone, Default)]
pub struct JmleEstimator {
    config: EstimationConfig,
}

impl JmleEstimator {
    pub fn new(config: EstimationConfig) -> Self {
        Self { config }
    }

    fn estimate(&self, responses: &ResponseMatrix) -> Result<RaschFit, EstimationError> {
        let cfg = &self.config;
        let bound = cfg.ability_bound;
        let limit = cfg.logit_clamp;
        let lambda = cfg.lambda;

        let x = responses.to_f64();
        let n_persons = responses.n_students();
        let n_items = responses.n_items();
        let person_extreme = responses.extreme_students();
        let item_extreme = responses.extreme_items();

        let mut theta =
            initial_abilities(&responses.row_scores(), n_items, &person_extreme, bound);
        let mut beta =
            initial_difficulties(&responses.item_scores(), n_persons, &item_extreme, bound);

        let mut converged = false;
        let mut iterations = 0;
        let mut max_change = f64::INFINITY;

        for iter in 0..cfg.max_iter {
            iterations = iter + 1;

            let new_theta: Vec<f64> = (0..n_persons)
                .into_par_iter()
                .map(|i| {
                    if person_extreme[i].is_some() {
                        return theta[i];
                    }
                    let mut gradient = -lambda * theta[i];
                    let mut hessian = lambda;
                    for j in 0..n_items {
                        let p = rasch_probability(theta[i], beta[j], limit);
                        gradient += x[[i, j]] - p;
                        hessian += p * (1.0 - p);
                    }
                    newton_step(theta[i], gradient, hessian, bound)
                })
                .collect();
            let theta_change = largest_change(&theta, &new_theta);
            theta = new_theta;

            let new_beta: Vec<f64> = (0..n_items)
                .into_par_iter()
                .map(|j| {
                    if item_extreme[j].is_some() {
                        return beta[j];
                    }
                    let mut gradient = -lambda * beta[j];
                    let mut hessian = lambda;
                    for i in 0..n_persons {
                        let p = rasch_probability(theta[i], beta[j], limit);
                        gradient -= x[[i, j]] - p;
                        hessian += p * (1.0 - p);
                    }
                    newton_step(beta[j], gradient, hessian, bound)
                })
                .collect();
            let beta_change = largest_change(&beta, &new_beta);
            beta = new_beta;

            let shift = shift_step(
                &x,
                &theta,
                &beta,
                &person_extreme,
                &item_extreme,
                lambda,
                limit,
            );
            if shift != 0.0 {
                shift_free(&mut theta, &person_extreme, shift, bound);
                shift_free(&mut beta, &item_extreme, shift, bound);
            }

            ensure_finite(&theta, "theta")?;
            ensure_finite(&beta, "beta")?;

            max_change = theta_change.max(beta_change).max(shift.abs());
            if max_change < cfg.tolerance {
                converged = true;
                break;
            }
        }

        if converged {
            log::debug!(
                "JMLE converged after {iterations} iterations (log-likelihood {:.4})",
                log_likelihood(&x, &theta, &beta, limit)
            );
        } else {
            log::warn!(
                "JMLE stopped at the iteration cap ({}) with largest update {max_change:.3e}",
                cfg.max_iter
            );
        }

        let (mut se_theta, se_beta) =
            standard_errors(&theta, &beta, &person_extreme, &item_extreme, limit);
        let scale = recenter_abilities(&mut theta, &person_extreme, bound);
        scale.rescale_errors(&mut se_theta);

        Ok(RaschFit {
            theta,
            beta,
            se_theta,
            se_beta,
            scale,
            iterations,
            converged,
            method: EstimationMethod::Jmle,
        })
    }
}

impl RaschEstimator for JmleEstimator {
    fn name(&self) -> &'static str {
        "JMLE"
    }

    fn fit(&self, responses: &ResponseMatrix) -> Result<RaschFit, EstimationError> {
        self.estimate(responses)
    }
}

/// Empirical-logit starting abilities with a continuity correction.
pub fn initial_abilities(
    scores: &[usize],
    n_items: usize,
    extremes: &[Option<Extreme>],
    bound: f64,
) -> Vec<f64> {
    scores
        .iter()
        .zip(extremes)
        .map(|(&score, extreme)| match extreme {
            Some(e) => boundary_ability(*e, bound),
            None => {
                let p = (score as f64 + 0.5) / (n_items as f64 + 1.0);
                logit(p).clamp(-bound, bound)
            }
        })
        .collect()
}

/// Starting difficulties: the mirrored empirical logit of item facility.
pub fn initial_difficulties(
    scores: &[usize],
    n_persons: usize,
    extremes: &[Option<Extreme>],
    bound: f64,
) -> Vec<f64> {
    scores
        .iter()
        .zip(extremes)
        .map(|(&score, extreme)| match extreme {
            Some(e) => boundary_difficulty(*e, bound),
            None => {
                let p = (score as f64 + 0.5) / (n_persons as f64 + 1.0);
                (-logit(p)).clamp(-bound, bound)
            }
        })
        .collect()
}

#[inline]
fn newton_step(current: f64, gradient: f64, hessian: f64, bound: f64) -> f64 {
    if hessian.abs() < EPSILON {
        return current;
    }
    (current + gradient / hessian).clamp(-bound, bound)
}

/// Newton step for `c` in `θ_free + c`, `β_free + c`.
///
/// Pairs where both parameters are free are invariant under the shift, so
/// only pinned-student/free-item and free-student/pinned-item cells enter
/// the likelihood terms.
fn shift_step(
    x: &Array2<f64>,
    theta: &[f64],
    beta: &[f64],
    person_extreme: &[Option<Extreme>],
    item_extreme: &[Option<Extreme>],
    lambda: f64,
    limit: f64,
) -> f64 {
    let per_person: Vec<(f64, f64)> = (0..theta.len())
        .into_par_iter()
        .map(|i| {
            let person_free = person_extreme[i].is_none();
            let mut gradient = 0.0;
            let mut hessian = 0.0;
            for (j, &b) in beta.iter().enumerate() {
                let item_free = item_extreme[j].is_none();
                if person_free == item_free {
                    continue;
                }
                let p = rasch_probability(theta[i], b, limit);
                let residual = x[[i, j]] - p;
                if person_free {
                    gradient += residual;
                } else {
                    gradient -= residual;
                }
                hessian += p * (1.0 - p);
            }
            (gradient, hessian)
        })
        .collect();

    let mut gradient: f64 = per_person.iter().map(|(g, _)| g).sum();
    let mut hessian: f64 = per_person.iter().map(|(_, h)| h).sum();

    let free_theta = theta.iter().zip(person_extreme).filter(|(_, e)| e.is_none());
    let free_beta = beta.iter().zip(item_extreme).filter(|(_, e)| e.is_none());
    let mut n_free = 0usize;
    for (&v, _) in free_theta.chain(free_beta) {
        gradient -= lambda * v;
        n_free += 1;
    }
    hessian += lambda * n_free as f64;

    if n_free == 0 || hessian.abs() < EPSILON {
        return 0.0;
    }
    gradient / hessian
}

fn shift_free(values: &mut [f64], extremes: &[Option<Extreme>], shift: f64, bound: f64) {
    for (v, extreme) in values.iter_mut().zip(extremes) {
        if extreme.is_none() {
            *v = (*v + shift).clamp(-bound, bound);
        }
    }
}

fn largest_change(old: &[f64], new: &[f64]) -> f64 {
    old.iter()
        .zip(new)
        .map(|(a, b)| (a - b).abs())
        .fold(0.0, f64::max)
}

fn standard_errors(
    theta: &[f64],
    beta: &[f64],
    person_extreme: &[Option<Extreme>],
    item_extreme: &[Option<Extreme>],
    limit: f64,
) -> (Vec<f64>, Vec<f64>) {
    let se_theta = theta
        .par_iter()
        .zip(person_extreme.par_iter())
        .map(|(&t, extreme)| {
            if extreme.is_some() {
                return f64::INFINITY;
            }
            let info: f64 = beta
                .iter()
                .map(|&b| {
                    let p = rasch_probability(t, b, limit);
                    p * (1.0 - p)
                })
                .sum();
            standard_error(info)
        })
        .collect();

    let se_beta = beta
        .par_iter()
        .zip(item_extreme.par_iter())
        .map(|(&b, extreme)| {
            if extreme.is_some() {
                return f64::INFINITY;
            }
            let info: f64 = theta
                .iter()
                .map(|&t| {
                    let p = rasch_probability(t, b, limit);
                    p * (1.0 - p)
                })
                .sum();
            standard_error(info)
        })
        .collect();

    (se_theta, se_beta)
}

/// Joint log-likelihood of the responses under `(θ, β)`.
pub fn log_likelihood(x: &Array2<f64>, theta: &[f64], beta: &[f64], limit: f64) -> f64 {
    let mut ll = 0.0;
    for ((i, j), &r) in x.indexed_iter() {
        let z = (theta[i] - beta[j]).clamp(-limit, limit);
        ll += r * log_sigmoid(z) + (1.0 - r) * log_sigmoid(-z);
    }
    ll
}
