use std::time::Duration;

/// Frame clock advanced by the caller's tick. Every time-gated operation
/// reads this one clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct Time {
    elapsed: Duration,
}

impl Time {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&mut self, dt: Duration) {
        self.elapsed += dt;
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}
