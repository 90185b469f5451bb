//! Infit and outfit mean-square statistics.
//!
//! For every cell the squared residual `(x - P)²` and the model variance
//! `P (1 - P)` are accumulated. Infit is the information-weighted ratio
//! `Σ (x - P)² / Σ P (1 - P)`; outfit is the plain mean of the standardized
//! squared residuals. Both have expectation 1 when the data fit the model.
//!
//! Abilities passed here must be on the same scale as the difficulties, see
//! [`crate::estimator::RaschFit::model_abilities`].

use rayon::prelude::*;
use serde::Serialize;

use crate::matrix::ResponseMatrix;
use crate::utils::{EPSILON, rasch_probability};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FitStatistics {
    pub infit: f64,
    pub outfit: f64,
}

#[derive(Default)]
struct Accumulator {
    infit_num: f64,
    infit_denom: f64,
    outfit_sum: f64,
    count: usize,
}

impl Accumulator {
    #[inline]
    fn add(&mut self, response: u8, p: f64) {
        let variance = p * (1.0 - p);
        let residual = f64::from(response) - p;
        self.infit_num += residual * residual;
        self.infit_denom += variance;
        if variance > EPSILON {
            self.outfit_sum += residual * residual / variance;
        }
        self.count += 1;
    }

    fn finish(self) -> FitStatistics {
        let infit = if self.infit_denom > EPSILON {
            self.infit_num / self.infit_denom
        } else {
            0.0
        };
        let outfit = if self.count > 0 {
            self.outfit_sum / self.count as f64
        } else {
            0.0
        };
        FitStatistics { infit, outfit }
    }
}

/// Fit statistics per item (column).
pub fn item_fit(
    responses: &ResponseMatrix,
    theta: &[f64],
    beta: &[f64],
    limit: f64,
) -> Vec<FitStatistics> {
    (0..responses.n_items())
        .into_par_iter()
        .map(|j| {
            let mut acc = Accumulator::default();
            for (i, &x) in responses.column(j).iter().enumerate() {
                acc.add(x, rasch_probability(theta[i], beta[j], limit));
            }
            acc.finish()
        })
        .collect()
}

/// Fit statistics per student (row).
pub fn person_fit(
    responses: &ResponseMatrix,
    theta: &[f64],
    beta: &[f64],
    limit: f64,
) -> Vec<FitStatistics> {
    (0..responses.n_students())
        .into_par_iter()
        .map(|i| {
            let mut acc = Accumulator::default();
            for (j, &x) in responses.row(i).iter().enumerate() {
                acc.add(x, rasch_probability(theta[i], beta[j], limit));
            }
            acc.finish()
        })
        .collect()
}
