use std::time::Duration;

/// Default ceiling applied to the backed-off polling period
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Outcome of computing the effective polling period of a group after failures
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Backoff {
    /// wait this long after the last poll
    Delay(Duration),
    /// the multiplier no longer fits; the failure count must be reset and the base period used
    Overflow,
}

/// Compute `period * 2^consecutive_failures`, clamped to `ceiling`
///
/// Returns [`Backoff::Overflow`] when either the multiplier or the product cannot be
/// represented. For all counts that do not overflow, the delay is non-decreasing in
/// `consecutive_failures` and never exceeds `max(period, ceiling)`.
pub fn poll_backoff(period: Duration, consecutive_failures: u32, ceiling: Duration) -> Backoff {
    if consecutive_failures == 0 {
        return Backoff::Delay(period);
    }

    let delay = 2u32
        .checked_pow(consecutive_failures)
        .and_then(|multiplier| period.checked_mul(multiplier));

    match delay {
        None => Backoff::Overflow,
        // a period configured above the ceiling is never shortened
        Some(delay) => Backoff::Delay(std::cmp::min(delay, std::cmp::max(ceiling, period))),
    }
}
