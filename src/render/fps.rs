use std::time::{Duration, Instant};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Counts frame ticks and reports a rate roughly once per second.
#[derive(Debug, Default)]
pub struct FpsCounter {
    last_report: Option<Instant>,
    frames: u32,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one frame at `now`. Returns the frame count once a full
    /// interval has passed since the previous report.
    pub fn tick(&mut self, now: Instant) -> Option<u32> {
        let Some(last) = self.last_report else {
            self.last_report = Some(now);
            return None;
        };

        self.frames += 1;
        if now.duration_since(last) >= REPORT_INTERVAL {
            let frames = std::mem::take(&mut self.frames);
            self.last_report = Some(now);
            Some(frames)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_tick_starts_the_clock() {
        let mut fps = FpsCounter::new();
        assert_eq!(fps.tick(Instant::now()), None);
        assert_eq!(fps.frames, 0);
    }

    #[test]
    fn test_reports_after_one_second() {
        let start = Instant::now();
        let mut fps = FpsCounter::new();
        fps.tick(start);

        let frame = Duration::from_micros(16_667);
        let mut reported = None;
        for i in 1..=60 {
            reported = fps.tick(start + frame * i);
        }
        assert_eq!(reported, Some(60));

        // Counter restarts after a report.
        assert_eq!(fps.tick(start + frame * 61), None);
        assert_eq!(fps.frames, 1);
    }

    #[test]
    fn test_no_report_within_interval() {
        let start = Instant::now();
        let mut fps = FpsCounter::new();
        fps.tick(start);
        for i in 1..30 {
            assert_eq!(fps.tick(start + Duration::from_millis(10 * i)), None);
        }
    }
}
