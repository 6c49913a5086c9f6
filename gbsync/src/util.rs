//! Sequence arithmetic and smoothing helpers shared by the estimators.

/// Half of the u64 sequence space. Sequences further apart than this are
/// treated as having wrapped.
const SEQUENCE_HALF_RANGE: u64 = u64::MAX / 2 + 1;

/// Returns `true` if `s1` is newer than `s2`, accounting for wraparound.
pub fn sequence_greater_than(s1: u64, s2: u64) -> bool {
    ((s1 > s2) && (s1 - s2 < SEQUENCE_HALF_RANGE)) || ((s1 < s2) && (s2 - s1 > SEQUENCE_HALF_RANGE))
}

/// Signed distance from `s2` to `s1`, accounting for wraparound.
pub fn sequence_diff(s1: u64, s2: u64) -> i64 {
    s1.wrapping_sub(s2) as i64
}

/// Per-frame blend factor for exponential convergence at `rate` per second.
///
/// Returns 0 for a non-positive rate or step and approaches 1 as `rate * dt` grows.
pub fn smoothing_alpha(rate: f64, dt_secs: f64) -> f64 {
    if rate.is_nan() || dt_secs.is_nan() || rate <= 0.0 || dt_secs <= 0.0 {
        return 0.0;
    }
    (1.0 - (-rate * dt_secs).exp()).clamp(0.0, 1.0)
}

/// One EWMA step: moves `current` toward `sample` by `factor`.
pub fn ewma(current: f64, sample: f64, factor: f64) -> f64 {
    current + (sample - current) * factor
}
