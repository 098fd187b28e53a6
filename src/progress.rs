//! Progress percentage math.

/// Percent of the trim window covered at `sample_time_us`.
///
/// Integer floor division over the window `[start_us, start_us +
/// duration_us)`, clamped to `0..=100`. Progress is computed per
/// forwarded sample, so with several tracks processed in sequence the
/// reported value restarts from the window position of each track's
/// first kept sample.
pub fn progress_percent(sample_time_us: i64, start_us: i64, duration_us: i64) -> u8 {
    if duration_us <= 0 {
        return 100;
    }
    let elapsed = sample_time_us - start_us;
    (elapsed.saturating_mul(100) / duration_us).clamp(0, 100) as u8
}
