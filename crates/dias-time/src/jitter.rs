//! Bounded random delays

use std::time::Duration;

use rand::Rng;

/// Uniform random delay in `[0, max)`
pub fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
}
