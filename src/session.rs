//! Session driver.
//!
//! A session pulls frames from one `FrameSource` until the stream ends, the
//! user quits, or an interrupt arrives. Per frame it runs detection, annotates
//! the frame, feeds the counts to the alarm debouncer, draws the banner and
//! hands the result to a `FrameSink`.
//!
//! Every exit path, including source and detector failures, resets the alarm
//! before returning.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};

use crate::alarm::{AlarmDebouncer, AlarmTransition, AudioDevice};
use crate::annotate::{Annotator, FrameCounts};
use crate::config::MonitorConfig;
use crate::detect::Detector;
use crate::frame::Frame;
use crate::ingest::{FrameSource, ImageSource};

/// User or signal request received while a session runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Control {
    /// Exit key: end this session and go back to the menu.
    Quit,
    /// Ctrl-C: end the session and the process.
    Interrupt,
}

/// Non-blocking source of `Control` requests, polled once per frame.
pub trait ControlInput {
    fn poll(&mut self) -> Option<Control>;
}

impl ControlInput for Receiver<Control> {
    fn poll(&mut self) -> Option<Control> {
        match self.try_recv() {
            Ok(control) => Some(control),
            Err(TryRecvError::Empty) => None,
            // Nobody can ask us to stop any more.
            Err(TryRecvError::Disconnected) => None,
        }
    }
}

/// Controls that never fire.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoControls;

impl ControlInput for NoControls {
    fn poll(&mut self) -> Option<Control> {
        None
    }
}

/// ESC (27) or `z`/`Z` typed as a line on stdin.
pub fn is_exit_key(line: &str) -> bool {
    let trimmed = line.trim_matches(|c| c == '\r' || c == '\n' || c == ' ');
    matches!(trimmed, "\x1b" | "z" | "Z")
}

/// Event from the console thread or the Ctrl-C handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsoleEvent {
    Line(String),
    Interrupt,
    /// Stdin reached end of file.
    Closed,
}

/// Line-oriented console shared by menu prompts and running sessions.
///
/// While a session runs, exit keys and interrupts become `Control`s; any
/// other line is kept for the next `read_line`. Once stdin has closed and
/// the buffered lines are used up, `read_line` returns `None` instead of
/// blocking.
pub struct ConsoleInput {
    rx: Receiver<ConsoleEvent>,
    pending: VecDeque<String>,
    closed: bool,
    interrupted: bool,
}

impl ConsoleInput {
    pub fn new(rx: Receiver<ConsoleEvent>) -> Self {
        Self {
            rx,
            pending: VecDeque::new(),
            closed: false,
            interrupted: false,
        }
    }

    /// Next trimmed line. `None` once interrupted or when no more input can arrive.
    pub fn read_line(&mut self) -> Option<String> {
        if self.interrupted {
            return None;
        }
        if let Some(line) = self.pending.pop_front() {
            return Some(line.trim().to_string());
        }
        if self.closed {
            return None;
        }
        match self.rx.recv() {
            Ok(ConsoleEvent::Line(line)) => Some(line.trim().to_string()),
            Ok(ConsoleEvent::Interrupt) => {
                self.interrupted = true;
                None
            }
            Ok(ConsoleEvent::Closed) | Err(_) => {
                self.closed = true;
                None
            }
        }
    }

    pub fn interrupted(&self) -> bool {
        self.interrupted
    }
}

impl ControlInput for ConsoleInput {
    fn poll(&mut self) -> Option<Control> {
        if self.interrupted {
            return Some(Control::Interrupt);
        }
        loop {
            match self.rx.try_recv() {
                Ok(ConsoleEvent::Line(line)) if is_exit_key(&line) => return Some(Control::Quit),
                Ok(ConsoleEvent::Line(line)) => self.pending.push_back(line),
                Ok(ConsoleEvent::Interrupt) => {
                    self.interrupted = true;
                    return Some(Control::Interrupt);
                }
                Ok(ConsoleEvent::Closed) | Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    return None;
                }
                Err(TryRecvError::Empty) => return None,
            }
        }
    }
}

/// Destination for annotated frames.
pub trait FrameSink {
    fn show(&mut self, frame: &Frame) -> Result<()>;
}

/// Discards frames.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn show(&mut self, _frame: &Frame) -> Result<()> {
        Ok(())
    }
}

/// Writes every Nth annotated frame to a directory as `frame_000123.jpg`.
#[derive(Debug)]
pub struct DirectorySink {
    dir: PathBuf,
    every: u64,
    shown: u64,
    saved: u64,
}

impl DirectorySink {
    pub fn new<P: AsRef<Path>>(dir: P, every: u64) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create sink directory {}", dir.display()))?;
        Ok(Self {
            dir,
            every: every.max(1),
            shown: 0,
            saved: 0,
        })
    }

    pub fn saved(&self) -> u64 {
        self.saved
    }
}

impl FrameSink for DirectorySink {
    fn show(&mut self, frame: &Frame) -> Result<()> {
        let index = self.shown;
        self.shown += 1;
        if index % self.every != 0 {
            return Ok(());
        }
        let path = self.dir.join(format!("frame_{:06}.jpg", index));
        frame.save(&path)?;
        self.saved += 1;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    EndOfStream,
    UserQuit,
    Interrupted,
}

/// Summary of a finished session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionOutcome {
    pub frames: u64,
    pub reason: EndReason,
    pub last_counts: FrameCounts,
    /// True when the alarm switched on at least once during the session.
    pub alarm_was_on: bool,
}

/// Per-run detector parameters and stream frame size.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MonitorSettings {
    pub frame_width: u32,
    pub frame_height: u32,
    pub image_size: u32,
    pub confidence: f32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            frame_width: crate::frame::DEFAULT_FRAME_WIDTH,
            frame_height: crate::frame::DEFAULT_FRAME_HEIGHT,
            image_size: 640,
            confidence: 0.7,
        }
    }
}

/// Result of processing a single frame.
#[derive(Debug)]
pub struct ProcessedFrame {
    pub frame: Frame,
    pub counts: FrameCounts,
    pub transition: Option<AlarmTransition>,
    pub banner_drawn: bool,
}

/// Detector, annotator and alarm wired together.
pub struct Monitor {
    detector: Box<dyn Detector>,
    annotator: Annotator,
    alarm: AlarmDebouncer,
    settings: MonitorSettings,
}

impl Monitor {
    pub fn new(
        detector: Box<dyn Detector>,
        annotator: Annotator,
        alarm: AlarmDebouncer,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            detector,
            annotator,
            alarm,
            settings,
        }
    }

    /// Build the detector and alarm described by `cfg` on `audio`.
    pub fn from_config(cfg: &MonitorConfig, audio: Box<dyn AudioDevice>) -> Result<Self> {
        let detector = cfg.build_detector()?;
        let alarm = cfg.build_alarm(audio)?;
        Ok(Self::new(
            detector,
            Annotator::new(cfg.annotate),
            alarm,
            MonitorSettings {
                frame_width: cfg.frame_width,
                frame_height: cfg.frame_height,
                image_size: cfg.detector.image_size,
                confidence: cfg.detector.confidence,
            },
        ))
    }

    pub fn alarm(&self) -> &AlarmDebouncer {
        &self.alarm
    }

    pub fn alarm_mut(&mut self) -> &mut AlarmDebouncer {
        &mut self.alarm
    }

    pub fn annotator(&self) -> &Annotator {
        &self.annotator
    }

    pub fn settings(&self) -> MonitorSettings {
        self.settings
    }

    /// Detect, annotate, debounce and draw the banner for one frame.
    ///
    /// Stream frames are resized to the configured frame size first; still
    /// images keep their native size.
    pub fn process_frame(
        &mut self,
        frame: Frame,
        resize: bool,
        now: Instant,
        wall_secs: f64,
    ) -> Result<ProcessedFrame> {
        let mut frame = if resize {
            frame.resized(self.settings.frame_width, self.settings.frame_height)
        } else {
            frame
        };
        let detections = self
            .detector
            .predict(&frame, self.settings.image_size, self.settings.confidence)
            .with_context(|| format!("{} detector failed", self.detector.name()))?;
        let counts = self.annotator.annotate_at(&mut frame, &detections, now);
        let transition = self.alarm.update(&counts);
        let banner_drawn = self
            .annotator
            .render_alarm_banner(&mut frame, self.alarm.mode(), wall_secs);
        Ok(ProcessedFrame {
            frame,
            counts,
            transition,
            banner_drawn,
        })
    }

    /// Run one session to completion. The alarm is always off afterwards.
    pub fn run_session(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
        controls: &mut dyn ControlInput,
    ) -> Result<SessionOutcome> {
        log::info!(
            "session start: {} (policy={})",
            source.describe(),
            self.alarm.policy_name()
        );
        self.annotator.reset_session(Instant::now());
        self.detector.start_session();
        let mut outcome = SessionOutcome {
            frames: 0,
            reason: EndReason::EndOfStream,
            last_counts: FrameCounts::default(),
            alarm_was_on: false,
        };

        let result = self.drive(source, sink, controls, &mut outcome);

        source.close();
        self.alarm.reset_session();

        match result {
            Ok(reason) => {
                outcome.reason = reason;
                log::info!(
                    "session end: {} after {} frames ({:?})",
                    source.describe(),
                    outcome.frames,
                    reason
                );
                Ok(outcome)
            }
            Err(err) => {
                log::error!(
                    "session aborted: {} after {} frames: {:#}",
                    source.describe(),
                    outcome.frames,
                    err
                );
                Err(err)
            }
        }
    }

    fn drive(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
        controls: &mut dyn ControlInput,
        outcome: &mut SessionOutcome,
    ) -> Result<EndReason> {
        let resize = !source.is_still();
        loop {
            match controls.poll() {
                Some(Control::Quit) => return Ok(EndReason::UserQuit),
                Some(Control::Interrupt) => return Ok(EndReason::Interrupted),
                None => {}
            }

            let Some(frame) = source.next_frame()? else {
                return Ok(EndReason::EndOfStream);
            };

            let processed = self.process_frame(frame, resize, Instant::now(), wall_clock_secs())?;
            outcome.frames += 1;
            outcome.last_counts = processed.counts;
            outcome.alarm_was_on |= self.alarm.is_on();

            sink.show(&processed.frame)?;
        }
    }

    /// Annotate a single image, show it, and write it to `output`.
    pub fn run_image(
        &mut self,
        path: &Path,
        output: &Path,
        sink: &mut dyn FrameSink,
    ) -> Result<FrameCounts> {
        let mut source = ImageSource::open(path)?;
        self.annotator.reset_session(Instant::now());
        self.detector.start_session();
        let result = self.annotate_image(&mut source, output, sink);
        source.close();
        self.alarm.reset_session();
        result
    }

    fn annotate_image(
        &mut self,
        source: &mut ImageSource,
        output: &Path,
        sink: &mut dyn FrameSink,
    ) -> Result<FrameCounts> {
        let frame = source
            .next_frame()?
            .with_context(|| format!("{} produced no frame", source.describe()))?;
        let processed = self.process_frame(frame, false, Instant::now(), wall_clock_secs())?;
        sink.show(&processed.frame)?;
        processed.frame.save(output)?;
        log::info!(
            "annotated image written to {} (total={}, helmet={}, no helmet={})",
            output.display(),
            processed.counts.total(),
            processed.counts.compliant,
            processed.counts.non_compliant
        );
        Ok(processed.counts)
    }

    /// Stop the alarm and release the audio device.
    pub fn shutdown(&mut self) {
        self.alarm.shutdown();
    }
}

/// Seconds since the Unix epoch, used for the banner blink phase.
pub fn wall_clock_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::alarm::{build_policy, AlarmMode, MemoryAudio, PolicyKind};
    use crate::annotate::AnnotatorSettings;
    use crate::detect::{BoundingBox, Detection, ScriptedDetector, WearClass};

    fn no_helmet() -> Detection {
        Detection::new(
            BoundingBox::new(100.0, 100.0, 200.0, 220.0),
            WearClass::NonCompliant,
            0.9,
        )
    }

    fn monitor(script: Vec<Vec<Detection>>, kind: PolicyKind) -> (Monitor, MemoryAudio) {
        let audio = MemoryAudio::new();
        let alarm = AlarmDebouncer::new(
            build_policy(kind, 10, 15, 10),
            Box::new(audio.clone()),
            Path::new("alarm.wav"),
        )
        .unwrap();
        let monitor = Monitor::new(
            Box::new(ScriptedDetector::new(script)),
            Annotator::new(AnnotatorSettings::default()),
            alarm,
            MonitorSettings::default(),
        );
        (monitor, audio)
    }

    /// Stream of blank frames of a fixed size.
    struct BlankSource {
        remaining: u64,
        captured: u64,
        closed: bool,
    }

    impl BlankSource {
        fn new(frames: u64) -> Self {
            Self {
                remaining: frames,
                captured: 0,
                closed: false,
            }
        }
    }

    impl FrameSource for BlankSource {
        fn describe(&self) -> String {
            "blank".to_string()
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            if self.remaining == 0 || self.closed {
                return Ok(None);
            }
            self.remaining -= 1;
            self.captured += 1;
            Ok(Some(Frame::blank(320, 240)))
        }

        fn frames_captured(&self) -> u64 {
            self.captured
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    struct FailingSource;

    impl FrameSource for FailingSource {
        fn describe(&self) -> String {
            "failing".to_string()
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            anyhow::bail!("camera unplugged")
        }

        fn frames_captured(&self) -> u64 {
            0
        }

        fn close(&mut self) {}
    }

    #[derive(Default)]
    struct CollectSink {
        sizes: Vec<(u32, u32)>,
    }

    impl FrameSink for CollectSink {
        fn show(&mut self, frame: &Frame) -> Result<()> {
            self.sizes.push((frame.width(), frame.height()));
            Ok(())
        }
    }

    #[test]
    fn exit_keys() {
        assert!(is_exit_key("z\n"));
        assert!(is_exit_key("Z"));
        assert!(is_exit_key("\x1b\r\n"));
        assert!(!is_exit_key("zz"));
        assert!(!is_exit_key("y"));
    }

    #[test]
    fn console_keeps_lines_typed_during_a_session() -> Result<()> {
        let (tx, rx) = mpsc::channel();
        let mut console = ConsoleInput::new(rx);
        for line in ["n", "4"] {
            tx.send(ConsoleEvent::Line(line.to_string()))?;
        }
        tx.send(ConsoleEvent::Closed)?;

        let (mut monitor, _audio) = monitor(Vec::new(), PolicyKind::Symmetric);
        let outcome = monitor.run_session(&mut BlankSource::new(3), &mut NullSink, &mut console)?;
        assert_eq!(outcome.reason, EndReason::EndOfStream);

        assert_eq!(console.read_line().as_deref(), Some("n"));
        assert_eq!(console.read_line().as_deref(), Some("4"));
        // The sender is still alive, so this would block without the closed flag.
        assert_eq!(console.read_line(), None);
        drop(tx);
        Ok(())
    }

    #[test]
    fn console_exit_key_and_interrupt() -> Result<()> {
        let (tx, rx) = mpsc::channel();
        let mut console = ConsoleInput::new(rx);
        tx.send(ConsoleEvent::Line("z".to_string()))?;
        assert_eq!(console.poll(), Some(Control::Quit));
        assert_eq!(console.poll(), None);

        tx.send(ConsoleEvent::Interrupt)?;
        assert_eq!(console.read_line(), None);
        assert!(console.interrupted());
        assert_eq!(console.poll(), Some(Control::Interrupt));
        Ok(())
    }

    #[test]
    fn stream_frames_are_resized_and_alarm_reset_at_end() -> Result<()> {
        let (mut monitor, audio) = monitor(vec![vec![no_helmet()]], PolicyKind::Symmetric);
        let mut source = BlankSource::new(12);
        let mut sink = CollectSink::default();

        let outcome = monitor.run_session(&mut source, &mut sink, &mut NoControls)?;

        assert_eq!(outcome.frames, 12);
        assert_eq!(outcome.reason, EndReason::EndOfStream);
        assert_eq!(outcome.last_counts, FrameCounts::new(0, 1));
        assert!(outcome.alarm_was_on);
        assert!(sink.sizes.iter().all(|&size| size == (640, 480)));
        assert_eq!(monitor.alarm().mode(), AlarmMode::Off);
        assert!(source.closed);
        let log = audio.snapshot();
        assert_eq!((log.plays, log.stops), (1, 1));
        Ok(())
    }

    #[test]
    fn every_session_starts_at_the_top_of_the_script() -> Result<()> {
        let (mut monitor, _audio) =
            monitor(vec![vec![no_helmet()], vec![], vec![]], PolicyKind::Symmetric);

        let first = monitor.run_session(&mut BlankSource::new(2), &mut NullSink, &mut NoControls)?;
        assert_eq!(first.last_counts, FrameCounts::default());

        let second = monitor.run_session(&mut BlankSource::new(1), &mut NullSink, &mut NoControls)?;
        assert_eq!(second.last_counts, FrameCounts::new(0, 1));
        Ok(())
    }

    #[test]
    fn quit_before_first_frame() -> Result<()> {
        let (mut monitor, _audio) = monitor(Vec::new(), PolicyKind::Symmetric);
        let (tx, mut rx) = mpsc::channel();
        tx.send(Control::Quit)?;

        let outcome = monitor.run_session(&mut BlankSource::new(5), &mut NullSink, &mut rx)?;
        assert_eq!(outcome.reason, EndReason::UserQuit);
        assert_eq!(outcome.frames, 0);
        Ok(())
    }

    #[test]
    fn source_failure_still_resets_alarm() {
        let (mut monitor, audio) = monitor(Vec::new(), PolicyKind::Symmetric);
        monitor.alarm_mut().turn_on();

        let err = monitor
            .run_session(&mut FailingSource, &mut NullSink, &mut NoControls)
            .unwrap_err();
        assert!(err.to_string().contains("camera unplugged"));
        assert!(!monitor.alarm().is_on());
        assert_eq!(audio.snapshot().stops, 1);
    }

    #[test]
    fn banner_follows_blink_phase() -> Result<()> {
        let (mut monitor, _audio) = monitor(vec![vec![no_helmet()]], PolicyKind::Symmetric);
        monitor.alarm_mut().turn_on();
        let now = Instant::now();

        let visible = monitor.process_frame(Frame::blank(640, 480), false, now, 10.2)?;
        assert!(visible.banner_drawn);
        let hidden = monitor.process_frame(Frame::blank(640, 480), false, now, 10.7)?;
        assert!(!hidden.banner_drawn);
        Ok(())
    }

    #[test]
    fn directory_sink_keeps_every_nth_frame() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut sink = DirectorySink::new(dir.path().join("frames"), 2)?;
        for _ in 0..5 {
            sink.show(&Frame::blank(16, 16))?;
        }
        assert_eq!(sink.saved(), 3);
        assert!(dir.path().join("frames/frame_000000.jpg").exists());
        assert!(dir.path().join("frames/frame_000004.jpg").exists());
        assert!(!dir.path().join("frames/frame_000001.jpg").exists());
        Ok(())
    }

    #[test]
    fn image_mode_writes_output_at_native_size() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("site.png");
        image::RgbImage::new(800, 600).save(&input)?;
        let output = dir.path().join("output_image_detected.jpg");

        let (mut monitor, _audio) = monitor(vec![vec![no_helmet()]], PolicyKind::Symmetric);
        let counts = monitor.run_image(&input, &output, &mut NullSink)?;

        assert_eq!(counts, FrameCounts::new(0, 1));
        let written = image::open(&output)?;
        assert_eq!((written.width(), written.height()), (800, 600));
        assert!(!monitor.alarm().is_on());
        Ok(())
    }
}
