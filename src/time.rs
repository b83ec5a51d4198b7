use std::time::{Duration, Instant};

/// Frame timing for the driver loop.
pub struct Time {
    delta: Duration,
    delta_seconds: f64,
    elapsed: Duration,
    last_update: Instant,
}

impl Time {
    pub fn new() -> Time {
        Time {
            delta: Duration::from_secs(0),
            delta_seconds: 0.0,
            elapsed: Duration::from_secs(0),
            last_update: Instant::now(),
        }
    }

    pub fn delta(&self) -> Duration {
        self.delta
    }

    pub fn delta_seconds(&self) -> f32 {
        self.delta_seconds as f32
    }

    /// Time since the first update, used as the animation time.
    pub fn elapsed_seconds(&self) -> f32 {
        self.elapsed.as_secs_f32()
    }

    pub fn update(&mut self) {
        let now = Instant::now();
        self.advance(now - self.last_update);
        self.last_update = now;
    }

    fn advance(&mut self, delta: Duration) {
        self.delta = delta;
        self.delta_seconds = delta.as_secs_f64();
        self.elapsed += delta;
    }
}

impl Default for Time {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn elapsed_time_accumulates_deltas() {
        let mut time = Time::new();
        time.advance(Duration::from_millis(16));
        time.advance(Duration::from_millis(34));
        assert_eq!(time.delta(), Duration::from_millis(34));
        assert_relative_eq!(time.delta_seconds(), 0.034, epsilon = 1e-6);
        assert_relative_eq!(time.elapsed_seconds(), 0.05, epsilon = 1e-6);
    }
}
