use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Seconds since the previous frame and since the loop began.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TimingInfo {
    pub delta_time: f64,
    pub total_time: f64,
}

enum ClockMode {
    Realtime { frame_budget: Option<Duration> },
    Fixed { step: f64 },
}

/// Frame clock owned by the render side. Realtime mode paces to a target rate, fixed mode
/// advances by a constant step without sleeping (used by the harness and tests).
pub struct FrameClock {
    mode: ClockMode,
    start: Instant,
    last: Instant,
    timing: TimingInfo,
    started: bool,
}

impl FrameClock {
    pub fn realtime(target_fps: u32) -> Self {
        let frame_budget = (target_fps > 0).then(|| Duration::from_secs_f64(1.0 / target_fps as f64));
        Self::with_mode(ClockMode::Realtime { frame_budget })
    }

    pub fn fixed(step_seconds: f64) -> Self {
        Self::with_mode(ClockMode::Fixed { step: step_seconds.max(0.0) })
    }

    fn with_mode(mode: ClockMode) -> Self {
        let now = Instant::now();
        Self { mode, start: now, last: now, timing: TimingInfo::default(), started: false }
    }

    /// Advance to the next frame. The first call reports zero delta.
    pub fn tick(&mut self) -> TimingInfo {
        match self.mode {
            ClockMode::Fixed { step } => {
                if self.started {
                    self.timing.delta_time = step;
                    self.timing.total_time += step;
                }
            }
            ClockMode::Realtime { frame_budget } => {
                if let Some(budget) = frame_budget {
                    let elapsed = self.last.elapsed();
                    if self.started && elapsed < budget {
                        thread::sleep(budget - elapsed);
                    }
                }
                let now = Instant::now();
                if self.started {
                    self.timing.delta_time = (now - self.last).as_secs_f64();
                    self.timing.total_time = now.duration_since(self.start).as_secs_f64();
                } else {
                    self.start = now;
                }
                self.last = now;
            }
        }
        self.started = true;
        self.timing
    }

    pub fn timing(&self) -> TimingInfo {
        self.timing
    }
}
