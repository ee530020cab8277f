use rand::Rng;
use std::time::Duration;

/// Uniform delay in `[0, max)` before the next `PING`.
pub fn next_ping_delay(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
}
