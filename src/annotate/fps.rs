use std::time::Instant;

/// Frames per window before the rate is recomputed.
pub const DEFAULT_FPS_WINDOW: u32 = 10;

/// Windowed frame-rate tracker.
///
/// The rate is recomputed once every `window` frames as
/// `frames / elapsed_seconds`. Until the first window closes there is no value.
#[derive(Clone, Debug)]
pub struct FpsTracker {
    window: u32,
    window_frame_count: u32,
    window_start: Instant,
    last_fps: Option<f64>,
}

impl FpsTracker {
    pub fn new(window: u32, now: Instant) -> Self {
        Self {
            window: window.max(1),
            window_frame_count: 0,
            window_start: now,
            last_fps: None,
        }
    }

    /// Count one frame. Returns the new rate when this frame closed a window.
    ///
    /// A window with zero elapsed time stays open rather than dividing by zero.
    pub fn tick(&mut self, now: Instant) -> Option<f64> {
        self.window_frame_count += 1;
        if self.window_frame_count < self.window {
            return None;
        }
        let elapsed = now.saturating_duration_since(self.window_start).as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        let fps = self.window_frame_count as f64 / elapsed;
        self.last_fps = Some(fps);
        self.window_frame_count = 0;
        self.window_start = now;
        Some(fps)
    }

    /// Most recently computed rate.
    pub fn last_fps(&self) -> Option<f64> {
        self.last_fps
    }

    /// Restart the window for a new session and forget the old rate.
    pub fn reset(&mut self, now: Instant) {
        self.window_frame_count = 0;
        self.window_start = now;
        self.last_fps = None;
    }
}
