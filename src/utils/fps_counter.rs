use std::time::{Duration, Instant};

/// Rolling 1-second frame-rate estimator for the host loop's diagnostics.
pub struct FpsCounter {
    last_update: Instant,
    frame_count: u32,
    accumulated: Duration,
    pub current_fps: f32,
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl FpsCounter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_update: Instant::now(),
            frame_count: 0,
            accumulated: Duration::ZERO,
            current_fps: 0.0,
        }
    }

    /// Call once per presented frame. Returns the refreshed estimate once
    /// per second of accumulated wall-clock time.
    pub fn update(&mut self) -> Option<f32> {
        self.frame_count += 1;
        let now = Instant::now();
        self.accumulated += now - self.last_update;
        self.last_update = now;

        if self.accumulated.as_secs_f32() >= 1.0 {
            self.current_fps = self.frame_count as f32 / self.accumulated.as_secs_f32();
            self.accumulated = Duration::ZERO;
            self.frame_count = 0;
            return Some(self.current_fps);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero() {
        let c = FpsCounter::new();
        assert_eq!(c.current_fps, 0.0);
    }

    #[test]
    fn does_not_report_before_one_second() {
        let mut c = FpsCounter::new();
        assert_eq!(c.update(), None);
    }
}
