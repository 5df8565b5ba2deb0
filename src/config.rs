use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::alarm::{
    build_policy, AlarmDebouncer, AudioDevice, BellAudio, PolicyKind,
    DEFAULT_COUNTDOWN_OFF_FRAMES, DEFAULT_COUNTDOWN_ON_FRAMES, DEFAULT_STREAK_THRESHOLD,
};
use crate::annotate::{AnnotatorSettings, DEFAULT_FPS_WINDOW, DEFAULT_MIN_BOX_SIZE};
use crate::detect::{Detector, ScriptedDetector};
use crate::frame::{DEFAULT_FRAME_HEIGHT, DEFAULT_FRAME_WIDTH};
use crate::ingest::SourceSettings;

const DEFAULT_MODEL_PATH: &str = "models/helmet_yolov8n.onnx";
const DEFAULT_CONFIDENCE: f32 = 0.7;
const DEFAULT_IMAGE_SIZE: u32 = 640;
const DEFAULT_SOUND_PATH: &str = "assets/security-alarm.wav";
const DEFAULT_WEBCAM_DEVICE: &str = "/dev/video0";
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_OUTPUT_IMAGE: &str = "output_image_detected.jpg";

#[derive(Debug, Deserialize, Default)]
struct MonitorConfigFile {
    detector: Option<DetectorConfigFile>,
    frame: Option<FrameConfigFile>,
    annotate: Option<AnnotateConfigFile>,
    alarm: Option<AlarmConfigFile>,
    sources: Option<SourcesConfigFile>,
    output_image: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<DetectorKind>,
    model_path: Option<PathBuf>,
    script_path: Option<PathBuf>,
    confidence: Option<f32>,
    image_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct FrameConfigFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct AnnotateConfigFile {
    min_box_size: Option<i32>,
    fps_window: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct AlarmConfigFile {
    policy: Option<PolicyKind>,
    threshold: Option<u32>,
    on_frames: Option<u32>,
    off_frames: Option<u32>,
    sound_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct SourcesConfigFile {
    webcam_device: Option<String>,
    target_fps: Option<u32>,
}

/// Which detector implementation to build.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    /// Replays a JSON detection script.
    #[default]
    Scripted,
    /// YOLOv8 ONNX model (feature: backend-tract).
    Tract,
}

impl FromStr for DetectorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scripted" => Ok(DetectorKind::Scripted),
            "tract" => Ok(DetectorKind::Tract),
            other => Err(anyhow!(
                "unknown detector '{}' (expected scripted or tract)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub detector: DetectorSettings,
    pub frame_width: u32,
    pub frame_height: u32,
    pub annotate: AnnotatorSettings,
    pub alarm: AlarmSettings,
    pub webcam_device: String,
    pub target_fps: u32,
    pub output_image: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: DetectorKind,
    pub model_path: PathBuf,
    pub script_path: Option<PathBuf>,
    pub confidence: f32,
    pub image_size: u32,
}

#[derive(Debug, Clone)]
pub struct AlarmSettings {
    pub policy: PolicyKind,
    pub threshold: u32,
    pub on_frames: u32,
    pub off_frames: u32,
    pub sound_path: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from_file(MonitorConfigFile::default())
    }
}

impl MonitorConfig {
    /// Defaults, then `$HELMET_CONFIG`, then `HELMET_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("HELMET_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Self {
        let detector = file.detector.unwrap_or_default();
        let frame = file.frame.unwrap_or_default();
        let annotate = file.annotate.unwrap_or_default();
        let alarm = file.alarm.unwrap_or_default();
        let sources = file.sources.unwrap_or_default();

        Self {
            detector: DetectorSettings {
                backend: detector.backend.unwrap_or_default(),
                model_path: detector
                    .model_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
                script_path: detector.script_path,
                confidence: detector.confidence.unwrap_or(DEFAULT_CONFIDENCE),
                image_size: detector.image_size.unwrap_or(DEFAULT_IMAGE_SIZE),
            },
            frame_width: frame.width.unwrap_or(DEFAULT_FRAME_WIDTH),
            frame_height: frame.height.unwrap_or(DEFAULT_FRAME_HEIGHT),
            annotate: AnnotatorSettings {
                min_box_size: annotate.min_box_size.unwrap_or(DEFAULT_MIN_BOX_SIZE),
                fps_window: annotate.fps_window.unwrap_or(DEFAULT_FPS_WINDOW),
            },
            alarm: AlarmSettings {
                policy: alarm.policy.unwrap_or_default(),
                threshold: alarm.threshold.unwrap_or(DEFAULT_STREAK_THRESHOLD),
                on_frames: alarm.on_frames.unwrap_or(DEFAULT_COUNTDOWN_ON_FRAMES),
                off_frames: alarm.off_frames.unwrap_or(DEFAULT_COUNTDOWN_OFF_FRAMES),
                sound_path: alarm
                    .sound_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SOUND_PATH)),
            },
            webcam_device: sources
                .webcam_device
                .unwrap_or_else(|| DEFAULT_WEBCAM_DEVICE.to_string()),
            target_fps: sources.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
            output_image: file
                .output_image
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_IMAGE)),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("HELMET_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = PathBuf::from(path);
            }
        }
        if let Ok(path) = std::env::var("HELMET_DETECTION_SCRIPT") {
            if !path.trim().is_empty() {
                self.detector.script_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(backend) = std::env::var("HELMET_DETECTOR") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend.parse()?;
            }
        }
        if let Ok(confidence) = std::env::var("HELMET_CONFIDENCE") {
            self.detector.confidence = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("HELMET_CONFIDENCE must be a number between 0 and 1"))?;
        }
        if let Ok(path) = std::env::var("HELMET_ALARM_SOUND") {
            if !path.trim().is_empty() {
                self.alarm.sound_path = PathBuf::from(path);
            }
        }
        if let Ok(policy) = std::env::var("HELMET_ALARM_POLICY") {
            if !policy.trim().is_empty() {
                self.alarm.policy = policy.parse()?;
            }
        }
        if let Ok(device) = std::env::var("HELMET_WEBCAM_DEVICE") {
            if !device.trim().is_empty() {
                self.webcam_device = device;
            }
        }
        if let Ok(path) = std::env::var("HELMET_OUTPUT_IMAGE") {
            if !path.trim().is_empty() {
                self.output_image = PathBuf::from(path);
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let confidence = self.detector.confidence;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(anyhow!(
                "detector confidence must be within [0, 1], got {}",
                confidence
            ));
        }
        if self.detector.image_size == 0 {
            return Err(anyhow!("detector image_size must be greater than zero"));
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(anyhow!("frame width and height must be greater than zero"));
        }
        if self.annotate.fps_window == 0 {
            return Err(anyhow!("fps_window must be greater than zero"));
        }
        if self.alarm.threshold == 0 || self.alarm.on_frames == 0 || self.alarm.off_frames == 0 {
            return Err(anyhow!("alarm thresholds must be greater than zero"));
        }
        Ok(())
    }

    pub fn source_settings(&self) -> SourceSettings {
        SourceSettings {
            width: self.frame_width,
            height: self.frame_height,
            target_fps: self.target_fps,
        }
    }

    /// Build the configured detector and warm it up.
    pub fn build_detector(&self) -> Result<Box<dyn Detector>> {
        let mut detector: Box<dyn Detector> = match self.detector.backend {
            DetectorKind::Scripted => match &self.detector.script_path {
                Some(path) => Box::new(ScriptedDetector::from_path(path)?),
                None => {
                    log::warn!("detector: no detection script configured; every frame is empty");
                    Box::new(ScriptedDetector::new(Vec::new()))
                }
            },
            DetectorKind::Tract => self.build_tract()?,
        };
        detector.warm_up()?;
        log::info!("detector: {} ready", detector.name());
        Ok(detector)
    }

    #[cfg(feature = "backend-tract")]
    fn build_tract(&self) -> Result<Box<dyn Detector>> {
        Ok(Box::new(crate::detect::TractBackend::new(
            &self.detector.model_path,
            self.detector.image_size,
        )?))
    }

    #[cfg(not(feature = "backend-tract"))]
    fn build_tract(&self) -> Result<Box<dyn Detector>> {
        Err(anyhow!(
            "cannot load {}: the tract detector requires the backend-tract feature",
            self.detector.model_path.display()
        ))
    }

    /// Build the alarm debouncer on the given audio device.
    pub fn build_alarm(&self, audio: Box<dyn AudioDevice>) -> Result<AlarmDebouncer> {
        let policy = build_policy(
            self.alarm.policy,
            self.alarm.threshold,
            self.alarm.on_frames,
            self.alarm.off_frames,
        );
        AlarmDebouncer::new(policy, audio, &self.alarm.sound_path)
    }
}

/// Default audio output: the sound card when available, else the terminal bell.
pub fn default_audio_device() -> Box<dyn AudioDevice> {
    #[cfg(feature = "audio-cpal")]
    {
        match crate::alarm::CpalAudio::new() {
            Ok(audio) => return Box::new(audio),
            Err(err) => log::warn!("audio: falling back to terminal bell: {:#}", err),
        }
    }
    Box::new(BellAudio::new(true))
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
