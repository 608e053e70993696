//! Normalization of log-domain weights and low variance resampling.

use common::math::log_sum_exp;

/// Result of normalizing a set of log weights.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedWeights {
    pub weights: Vec<f64>,

    /// Every input was zero (or not a number), the weights were replaced by a uniform
    /// distribution.
    pub degenerate: bool,
}

/// Turns log weights into probabilities summing to one using log-sum-exp. `NaN` inputs count as
/// zero weight. If nothing has positive weight the result falls back to uniform weights.
pub fn normalize_log_weights(log_weights: &[f64]) -> NormalizedWeights {
    let n = log_weights.len();

    let cleaned: Vec<f64> = log_weights
        .iter()
        .map(|&l| if l.is_nan() { f64::NEG_INFINITY } else { l })
        .collect();

    let total = log_sum_exp(&cleaned);

    if !total.is_finite() {
        return NormalizedWeights {
            weights: vec![1.0 / n as f64; n],
            degenerate: n > 0,
        };
    }

    NormalizedWeights {
        weights: cleaned.iter().map(|&l| (l - total).exp()).collect(),
        degenerate: false,
    }
}

/// Computes the number of effective particles, a measure of how many particles actually carry the
/// distribution: `N` for uniform weights, 1 when a single particle has all the weight.
pub fn effective_sample_size(weights: &[f64]) -> f64 {
    let sum_sq: f64 = weights.iter().map(|w| w * w).sum();
    if sum_sq > 0.0 {
        1.0 / sum_sq
    } else {
        0.0
    }
}

/// Systematic (low variance) resampling. Selects `weights.len()` indices, where the `m`:th pick
/// is the particle whose cumulative weight interval contains `(offset + m) / N`. `offset` is a
/// single uniform draw from `[0, 1)`. Weights must be normalized. Equal weights select every
/// particle exactly once.
pub fn systematic_indices(weights: &[f64], offset: f64) -> Vec<usize> {
    let n = weights.len();
    if n == 0 {
        return Vec::new();
    }

    // the summed 1/N steps drift from the picks, which would duplicate and drop particles
    if weights.iter().all(|&w| w == weights[0]) {
        return (0..n).collect();
    }

    // Pin the cumulative distribution to exactly 1 from the last particle with weight onward,
    // so round-off can neither run past the end nor land on a trailing zero weight particle.
    let mut cumulative: Vec<f64> = weights
        .iter()
        .scan(0.0, |acc, &w| {
            *acc += w;
            Some(*acc)
        })
        .collect();
    if let Some(last) = weights.iter().rposition(|&w| w > 0.0) {
        cumulative[last..].iter_mut().for_each(|c| *c = 1.0);
    }

    let step = 1.0 / n as f64;
    let offset = offset.clamp(0.0, 1.0 - f64::EPSILON);

    let mut indices = Vec::with_capacity(n);
    let mut i = 0;
    for m in 0..n {
        let u = (offset + m as f64) * step;

        while u >= cumulative[i] && i < n - 1 {
            i += 1;
        }

        indices.push(i);
    }
    indices
}
