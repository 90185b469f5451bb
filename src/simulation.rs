//! Seeded simulation of Rasch responses.

use ndarray::Array2;
use rand::prelude::*;
use rand_distr::Normal;
use rand_pcg::Pcg64;
use rayon::prelude::*;

use crate::error::MatrixError;
use crate::matrix::ResponseMatrix;
use crate::utils::{LOGIT_CLAMP, rasch_probability};

/// Draw `n` abilities from `N(mean, sd²)`.
///
/// A non-positive or non-finite `sd` puts every ability at `mean`.
pub fn draw_abilities(n: usize, mean: f64, sd: f64, seed: u64) -> Vec<f64> {
    let mut rng = Pcg64::seed_from_u64(seed);
    match Normal::new(mean, sd) {
        Ok(dist) if sd > 0.0 => (0..n).map(|_| rng.sample(dist)).collect(),
        _ => vec![mean; n],
    }
}

/// Simulate a response matrix for the given abilities and difficulties.
///
/// Each student draws from its own generator seeded with `seed + i`, so the
/// output does not depend on how rayon schedules the rows.
pub fn simulate_responses(
    theta: &[f64],
    beta: &[f64],
    seed: u64,
) -> Result<ResponseMatrix, MatrixError> {
    let n_persons = theta.len();
    let n_items = beta.len();

    let rows: Vec<Vec<i32>> = (0..n_persons)
        .into_par_iter()
        .map(|i| {
            let mut rng = Pcg64::seed_from_u64(seed.wrapping_add(i as u64));
            beta.iter()
                .map(|&b| {
                    let p = rasch_probability(theta[i], b, LOGIT_CLAMP);
                    let u: f64 = rng.random();
                    if u < p { 1 } else { 0 }
                })
                .collect()
        })
        .collect();

    let mut result = Array2::<i32>::zeros((n_persons, n_items));
    for (i, row) in rows.iter().enumerate() {
        for (j, &val) in row.iter().enumerate() {
            result[[i, j]] = val;
        }
    }

    ResponseMatrix::from_array(result.view())
}
