//! Frame annotation.
//!
//! Turns one frame plus its raw detections into an annotated frame and the
//! per-frame `FrameCounts` the alarm debouncer consumes:
//! - drops boxes narrower or shorter than the minimum size
//! - draws each surviving box with a class colour and a confidence label
//! - renders the count block and the last computed FPS
//!
//! The only state kept across frames is the FPS window.

mod draw;
mod fps;
mod glyphs;

use std::time::Instant;

use crate::alarm::AlarmMode;
use crate::detect::{Detection, WearClass};
use crate::frame::Frame;

pub use draw::{draw_box, draw_text, text_width, GREEN, RED, WHITE, YELLOW};
pub use fps::{FpsTracker, DEFAULT_FPS_WINDOW};

/// Boxes with width or height below this many pixels are treated as noise.
pub const DEFAULT_MIN_BOX_SIZE: i32 = 50;

const BOX_THICKNESS: u32 = 2;
const LABEL_SCALE: u32 = 2;
const LABEL_OFFSET_Y: i32 = 10;
const OVERLAY_X: i32 = 20;
const OVERLAY_START_Y: i32 = 30;
const OVERLAY_LINE_SPACING: i32 = 30;
const OVERLAY_SCALE: u32 = 2;
const FPS_GAP_Y: i32 = 10;
const BANNER_TEXT: &str = "*** ALARM ON ***";
const BANNER_X: i32 = 150;
const BANNER_Y: i32 = 450;
const BANNER_SCALE: u32 = 4;

/// Per-frame head counts after size filtering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameCounts {
    pub compliant: u32,
    pub non_compliant: u32,
}

impl FrameCounts {
    pub fn new(compliant: u32, non_compliant: u32) -> Self {
        Self {
            compliant,
            non_compliant,
        }
    }

    /// Always `compliant + non_compliant`.
    pub fn total(&self) -> u32 {
        self.compliant + self.non_compliant
    }

    fn record(&mut self, class: WearClass) {
        match class {
            WearClass::Compliant => self.compliant += 1,
            WearClass::NonCompliant => self.non_compliant += 1,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct AnnotatorSettings {
    pub min_box_size: i32,
    pub fps_window: u32,
}

impl Default for AnnotatorSettings {
    fn default() -> Self {
        Self {
            min_box_size: DEFAULT_MIN_BOX_SIZE,
            fps_window: DEFAULT_FPS_WINDOW,
        }
    }
}

/// True when a detection is large enough to count.
pub fn passes_size_filter(detection: &Detection, min_box_size: i32) -> bool {
    detection.bounding_box.pixel_width() >= min_box_size
        && detection.bounding_box.pixel_height() >= min_box_size
}

/// Detections that survive the minimum-size filter, in input order.
pub fn filter_detections(detections: &[Detection], min_box_size: i32) -> Vec<&Detection> {
    detections
        .iter()
        .filter(|det| passes_size_filter(det, min_box_size))
        .collect()
}

/// Blink phase for the alarm banner: visible on even half-second ticks.
pub fn blink_visible(wall_secs: f64) -> bool {
    (wall_secs * 2.0).floor() as i64 % 2 == 0
}

pub fn class_color(class: WearClass) -> [u8; 3] {
    match class {
        WearClass::Compliant => GREEN,
        WearClass::NonCompliant => RED,
    }
}

/// Label drawn above a detection box.
pub fn detection_label(detection: &Detection) -> String {
    format!("{} {:.2}", detection.class.label(), detection.confidence)
}

/// Stateful frame annotator (owns the FPS window).
#[derive(Clone, Debug)]
pub struct Annotator {
    settings: AnnotatorSettings,
    fps: FpsTracker,
}

impl Annotator {
    pub fn new(settings: AnnotatorSettings) -> Self {
        Self {
            settings,
            fps: FpsTracker::new(settings.fps_window, Instant::now()),
        }
    }

    pub fn settings(&self) -> AnnotatorSettings {
        self.settings
    }

    /// Annotate `frame` in place using the current time for the FPS window.
    pub fn annotate(&mut self, frame: &mut Frame, detections: &[Detection]) -> FrameCounts {
        self.annotate_at(frame, detections, Instant::now())
    }

    /// Annotate `frame` in place as if it arrived at `now`.
    pub fn annotate_at(
        &mut self,
        frame: &mut Frame,
        detections: &[Detection],
        now: Instant,
    ) -> FrameCounts {
        let mut counts = FrameCounts::default();

        for det in filter_detections(detections, self.settings.min_box_size) {
            counts.record(det.class);
            let color = class_color(det.class);
            draw_box(frame, &det.bounding_box, color, BOX_THICKNESS);
            draw_text(
                frame,
                &detection_label(det),
                det.bounding_box.x_min as i32,
                det.bounding_box.y_min as i32 - LABEL_OFFSET_Y,
                LABEL_SCALE,
                color,
            );
        }

        log::debug!(
            "Total Persons: {}, With Helmet: {}, Without Helmet: {}",
            counts.total(),
            counts.compliant,
            counts.non_compliant
        );

        let lines = [
            (format!("Total Persons: {}", counts.total()), YELLOW),
            (format!("With Helmet: {}", counts.compliant), GREEN),
            (format!("No Helmet: {}", counts.non_compliant), RED),
        ];
        let last_y = draw_overlay_lines(frame, &lines);

        if let Some(fps) = self.fps.tick(now) {
            log::debug!("fps window closed: {:.2}", fps);
        }
        if let Some(fps) = self.fps.last_fps() {
            draw_text(
                frame,
                &format!("FPS: {:.2}", fps),
                OVERLAY_X,
                last_y + FPS_GAP_Y,
                OVERLAY_SCALE,
                WHITE,
            );
        }

        counts
    }

    /// Draw the blinking alarm banner. Returns true when it was drawn.
    pub fn render_alarm_banner(&self, frame: &mut Frame, mode: AlarmMode, wall_secs: f64) -> bool {
        if mode != AlarmMode::On || !blink_visible(wall_secs) {
            return false;
        }
        draw_text(frame, BANNER_TEXT, BANNER_X, BANNER_Y, BANNER_SCALE, RED);
        true
    }

    /// Last computed FPS, if a window has closed this session.
    pub fn last_fps(&self) -> Option<f64> {
        self.fps.last_fps()
    }

    /// Start a fresh FPS window for a new session.
    pub fn reset_session(&mut self, now: Instant) {
        self.fps.reset(now);
    }
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new(AnnotatorSettings::default())
    }
}

/// Stack text lines top-to-bottom from the overlay origin. Returns the baseline after the last line.
fn draw_overlay_lines(frame: &mut Frame, lines: &[(String, [u8; 3])]) -> i32 {
    let mut y = OVERLAY_START_Y;
    for (line, color) in lines {
        draw_text(frame, line, OVERLAY_X, y, OVERLAY_SCALE, *color);
        y += OVERLAY_LINE_SPACING;
    }
    y
}
