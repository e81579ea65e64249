use std::time::Duration;

/// Capped exponential backoff for top-level reconnect loops.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    factor: f64,
    cap: Duration,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), 1.6, Duration::from_secs(30))
    }
}

impl Backoff {
    pub fn new(initial: Duration, factor: f64, cap: Duration) -> Self {
        let initial = initial.min(cap);
        Self { initial, factor, cap, current: initial }
    }

    /// Returns the delay to wait now and grows the next one.
    pub fn next_delay(&mut self) -> Duration {
        let wait = self.current;
        self.current = self.current.mul_f64(self.factor).min(self.cap);
        wait
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
