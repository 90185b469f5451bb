//! Shared numeric primitives for the Rasch engine.

pub const EPSILON: f64 = 1e-10;

/// Conventional clamp for abilities and difficulties on the logit scale.
pub const ABILITY_BOUND: f64 = 3.0;

/// Sigmoid inputs are clamped to this magnitude before evaluation.
pub const LOGIT_CLAMP: f64 = 15.0;

#[inline]
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let exp_x = x.exp();
        exp_x / (1.0 + exp_x)
    }
}

/// Rasch success probability `P(X = 1 | θ, β)` with the linear predictor
/// clamped to `[-limit, limit]`.
#[inline]
pub fn rasch_probability(theta: f64, beta: f64, limit: f64) -> f64 {
    sigmoid((theta - beta).clamp(-limit, limit))
}

#[inline]
pub fn log_sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        -(-x).exp().ln_1p()
    } else {
        x - x.exp().ln_1p()
    }
}

/// `ln(p / (1 - p))`, with `p` kept away from 0 and 1.
#[inline]
pub fn logit(p: f64) -> f64 {
    let p = p.clamp(EPSILON, 1.0 - EPSILON);
    (p / (1.0 - p)).ln()
}

#[inline]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (divides by `n`).
#[inline]
pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mu = mean(values);
    let var = values.iter().map(|&v| (v - mu) * (v - mu)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Inverse square root of an information sum; infinite when the
/// information is numerically zero.
#[inline]
pub fn standard_error(information: f64) -> f64 {
    if information > EPSILON {
        1.0 / information.sqrt()
    } else {
        f64::INFINITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn sigmoid_is_symmetric_and_stable() {
        assert_abs_diff_eq!(sigmoid(0.0), 0.5, epsilon = 1e-15);
        assert_abs_diff_eq!(sigmoid(2.0) + sigmoid(-2.0), 1.0, epsilon = 1e-15);
        assert!(sigmoid(-800.0).is_finite());
        assert!(sigmoid(800.0) <= 1.0);
    }

    #[test]
    fn logit_inverts_sigmoid() {
        for &x in &[-4.0, -1.5, 0.0, 0.3, 2.7] {
            assert_abs_diff_eq!(logit(sigmoid(x)), x, epsilon = 1e-9);
        }
    }

    #[test]
    fn logit_is_finite_at_the_edges() {
        assert!(logit(0.0).is_finite());
        assert!(logit(1.0).is_finite());
    }

    #[test]
    fn rasch_probability_clamps_extreme_predictors() {
        let p_hi = rasch_probability(1e6, 0.0, LOGIT_CLAMP);
        assert_abs_diff_eq!(p_hi, sigmoid(LOGIT_CLAMP), epsilon = 1e-15);
        let p_lo = rasch_probability(-1e6, 0.0, LOGIT_CLAMP);
        assert!(p_lo > 0.0);
    }

    #[test]
    fn log_sigmoid_matches_naive_in_safe_range() {
        for &x in &[-5.0, -0.5, 0.0, 1.0, 6.0] {
            assert_abs_diff_eq!(log_sigmoid(x), sigmoid(x).ln(), epsilon = 1e-12);
        }
    }

    #[test]
    fn population_std_divides_by_n() {
        let v = [1.0, 3.0];
        assert_abs_diff_eq!(mean(&v), 2.0);
        assert_abs_diff_eq!(population_std(&v), 1.0);
        assert_eq!(population_std(&[]), 0.0);
    }

    #[test]
    fn standard_error_is_infinite_without_information() {
        assert!(standard_error(0.0).is_infinite());
        assert_abs_diff_eq!(standard_error(4.0), 0.5);
    }
}
