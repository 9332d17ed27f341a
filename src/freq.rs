use std::f64::consts::TAU;

/// Cycles per sample, reduced to `[0, 1)`.
pub fn normalize_freq(freq_hz: f64, sample_rate_hz: f64) -> f64 {
    debug_assert!(sample_rate_hz > 0.0);
    let r = (freq_hz / sample_rate_hz).rem_euclid(1.0);
    // rem_euclid rounds tiny negative ratios up to exactly 1.0.
    if r >= 1.0 {
        0.0
    } else {
        r
    }
}

/// Reduces a phase into `[0, 2π)`.
pub fn wrap_phase(alpha: f64) -> f64 {
    if (0.0..TAU).contains(&alpha) {
        return alpha;
    }
    let w = alpha - TAU * (alpha / TAU).floor();
    if (0.0..TAU).contains(&w) {
        w
    } else {
        0.0
    }
}

/// Wrapped phase of sample `n` for a normalized frequency.
pub fn phase_at(norm_freq: f64, n: u64) -> f64 {
    wrap_phase(TAU * norm_freq * (n as f64))
}
