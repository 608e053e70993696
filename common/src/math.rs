use std::f64::consts::PI;

/// Computes the shortest distance between two angles in radians and returns the result in the
/// range [-PI,PI)
///
/// Source: https://stackoverflow.com/a/28037434
pub fn angle_diff(alpha: f64, beta: f64) -> f64 {
    let diff = (beta - alpha + PI) % (PI * 2.0) - PI;
    if diff < -PI {
        diff + 2.0 * PI
    } else {
        diff
    }
}

/// Wraps an angle in radians into the range (-PI, PI].
pub fn normalize_angle(angle: f64) -> f64 {
    let a = angle.sin().atan2(angle.cos());
    // atan2 returns -PI for the negative branch cut, fold it onto PI
    if a <= -PI {
        PI
    } else {
        a
    }
}

/// Computes `ln(sum(exp(x_i)))` without overflowing or underflowing the intermediate
/// exponentials. Returns `-inf` for an empty slice or when every value is `-inf`.
///
/// Same trick as adding two log probabilities, see https://en.wikipedia.org/wiki/Log_probability
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    if !max.is_finite() {
        return max;
    }

    let sum: f64 = values.iter().map(|&v| (v - max).exp()).sum();
    max + sum.ln()
}
