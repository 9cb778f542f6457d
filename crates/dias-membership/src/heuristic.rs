//! Adaptive membership gossip interval

use std::time::Duration;

/// Backs off while membership is stable, snaps back when it is not
#[derive(Clone, Debug)]
pub struct GossipHeuristic {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl GossipHeuristic {
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        GossipHeuristic { min, max, current: min }
    }

    /// Pause before the next tick. `urgent` means the last tick had news to
    /// spread.
    pub fn next_interval(&mut self, urgent: bool) -> Duration {
        let interval = self.current;
        self.current = if urgent {
            self.min
        } else {
            (self.current * 2).min(self.max)
        };
        if urgent {
            self.min
        } else {
            interval
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backs_off_and_resets() {
        let mut h = GossipHeuristic::new(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(h.next_interval(false), Duration::from_millis(100));
        assert_eq!(h.next_interval(false), Duration::from_millis(200));
        assert_eq!(h.next_interval(false), Duration::from_millis(400));
        assert_eq!(h.next_interval(false), Duration::from_millis(500));
        assert_eq!(h.next_interval(false), Duration::from_millis(500));

        assert_eq!(h.next_interval(true), Duration::from_millis(100));
        assert_eq!(h.current(), Duration::from_millis(100));
        assert_eq!(h.next_interval(false), Duration::from_millis(100));
        assert_eq!(h.current(), Duration::from_millis(200));
    }

    #[test]
    fn test_max_below_min_is_clamped() {
        let mut h = GossipHeuristic::new(Duration::from_millis(300), Duration::from_millis(100));
        assert_eq!(h.next_interval(false), Duration::from_millis(300));
        assert_eq!(h.next_interval(false), Duration::from_millis(300));
    }
}
