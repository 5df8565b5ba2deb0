//! Helmet compliance monitor
//!
//! This crate watches a webcam, a video file or a still image for workers with
//! and without safety helmets, annotates each frame, and drives an audible
//! alarm that is debounced over consecutive frames.
//!
//! # Architecture
//!
//! Each frame flows through one synchronous pipeline:
//!
//! 1. **Detect**: a `Detector` returns raw head detections with class and confidence.
//! 2. **Annotate**: undersized boxes are dropped, the rest are drawn and counted.
//! 3. **Debounce**: the per-frame counts feed an `AlarmPolicy`; the
//!    `AlarmDebouncer` switches looped alarm playback on and off.
//! 4. **Render**: the count block, FPS and blinking alarm banner are drawn and
//!    the frame goes to a `FrameSink`.
//!
//! Every session ends with the alarm forced off, and process exit releases the
//! audio device.
//!
//! # Module Structure
//!
//! - `frame`: RGB frame buffer
//! - `detect`: detections and detector backends (scripted, tract)
//! - `annotate`: size filter, drawing, counts, FPS
//! - `alarm`: policies, debouncer, audio outputs
//! - `ingest`: frame sources (webcam, video file, still image)
//! - `session`: per-session driver, sinks and controls
//! - `config`: JSON + environment configuration

pub mod alarm;
pub mod annotate;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod session;

pub use alarm::{
    AlarmDebouncer, AlarmMode, AlarmPolicy, AlarmTransition, AudioDevice, CountdownPolicy,
    MemoryAudio, PolicyKind, SymmetricStreakPolicy,
};
pub use annotate::{Annotator, AnnotatorSettings, FrameCounts};
pub use config::{DetectorKind, MonitorConfig};
pub use detect::{BoundingBox, Detection, Detector, ScriptedDetector, WearClass};
pub use frame::Frame;
pub use ingest::{open_source, FrameSource, SourceSettings, SourceSpec};
pub use session::{
    ConsoleEvent, ConsoleInput, Control, ControlInput, DirectorySink, EndReason, FrameSink,
    Monitor, MonitorSettings, NullSink, SessionOutcome,
};
