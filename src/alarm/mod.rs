//! Debounced alarm.
//!
//! `AlarmDebouncer` owns the alarm mode, the injected `AlarmPolicy` and the
//! single audio channel. It is the only place the alarm is switched:
//! - `update` feeds one frame of counts through the policy
//! - `turn_on` / `turn_off` are idempotent
//! - `reset_session` forces the alarm off between sources
//! - `shutdown` (or drop) stops playback and releases the audio device

mod audio;
#[cfg(feature = "audio-cpal")]
mod cpal_audio;
mod policy;

use std::path::Path;

use anyhow::Result;

use crate::annotate::FrameCounts;

pub use audio::{AlarmChannel, AudioDevice, AudioLog, BellAudio, MemoryAudio, SoundHandle};
#[cfg(feature = "audio-cpal")]
pub use cpal_audio::CpalAudio;
pub use policy::{
    AlarmDecision, AlarmPolicy, CountdownPolicy, PolicyKind, SymmetricStreakPolicy,
    DEFAULT_COUNTDOWN_OFF_FRAMES, DEFAULT_COUNTDOWN_ON_FRAMES, DEFAULT_STREAK_THRESHOLD,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AlarmMode {
    #[default]
    Off,
    On,
}

/// A change of alarm mode caused by a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlarmTransition {
    Started,
    Stopped,
}

pub struct AlarmDebouncer {
    policy: Box<dyn AlarmPolicy>,
    audio: Box<dyn AudioDevice>,
    sound: SoundHandle,
    channel: Option<Box<dyn AlarmChannel>>,
    mode: AlarmMode,
    released: bool,
}

impl AlarmDebouncer {
    /// Load `sound_asset` on `audio` and start with the alarm off.
    pub fn new(
        policy: Box<dyn AlarmPolicy>,
        mut audio: Box<dyn AudioDevice>,
        sound_asset: &Path,
    ) -> Result<Self> {
        let sound = audio.load(sound_asset)?;
        log::info!(
            "alarm: policy={}, audio={}, sound={}",
            policy.name(),
            audio.name(),
            sound_asset.display()
        );
        Ok(Self {
            policy,
            audio,
            sound,
            channel: None,
            mode: AlarmMode::Off,
            released: false,
        })
    }

    pub fn mode(&self) -> AlarmMode {
        self.mode
    }

    pub fn is_on(&self) -> bool {
        self.mode == AlarmMode::On
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Feed one frame of counts and apply the policy's decision.
    pub fn update(&mut self, counts: &FrameCounts) -> Option<AlarmTransition> {
        match self.policy.observe(counts) {
            AlarmDecision::Raise => self.turn_on(),
            AlarmDecision::Clear => self.turn_off(),
            AlarmDecision::Hold => None,
        }
    }

    /// Start looped playback. No-op while already on.
    ///
    /// A playback failure is logged and the alarm still counts as on, so the
    /// on-screen banner keeps showing.
    pub fn turn_on(&mut self) -> Option<AlarmTransition> {
        if self.mode == AlarmMode::On {
            return None;
        }
        match self.audio.play_looped(&self.sound) {
            Ok(channel) => self.channel = Some(channel),
            Err(err) => log::error!("alarm: failed to start playback: {:#}", err),
        }
        self.mode = AlarmMode::On;
        log::warn!("[ALARM] No helmet detected! Alarm ON!");
        Some(AlarmTransition::Started)
    }

    /// Stop playback. No-op while already off.
    ///
    /// When the policy requires live playback and the channel has already gone
    /// silent, the stop command is skipped but the mode still switches to OFF.
    /// Leaving the mode ON there would keep the alarm from ever sounding again.
    pub fn turn_off(&mut self) -> Option<AlarmTransition> {
        if self.mode == AlarmMode::Off {
            return None;
        }
        if let Some(mut channel) = self.channel.take() {
            if self.policy.stop_requires_playback() && !channel.is_playing() {
                log::debug!("alarm: channel already silent, skipping stop");
            } else {
                channel.stop();
            }
        }
        self.mode = AlarmMode::Off;
        log::info!("[ALARM] Helmet detected. Alarm OFF!");
        Some(AlarmTransition::Stopped)
    }

    /// Zero the policy counters and force the alarm off for a new source.
    pub fn reset_session(&mut self) -> Option<AlarmTransition> {
        self.policy.reset();
        if let Some(mut channel) = self.channel.take() {
            channel.stop();
        }
        if self.mode == AlarmMode::On {
            self.mode = AlarmMode::Off;
            log::info!("alarm: session reset, alarm forced OFF");
            Some(AlarmTransition::Stopped)
        } else {
            None
        }
    }

    /// Force the alarm off and release the audio device. Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.reset_session();
        if !self.released {
            self.audio.shutdown();
            self.released = true;
        }
    }
}

impl Drop for AlarmDebouncer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Build the configured policy.
pub fn build_policy(
    kind: PolicyKind,
    threshold: u32,
    on_frames: u32,
    off_frames: u32,
) -> Box<dyn AlarmPolicy> {
    match kind {
        PolicyKind::Symmetric => Box::new(SymmetricStreakPolicy::new(threshold)),
        PolicyKind::Countdown => Box::new(CountdownPolicy::new(on_frames, off_frames)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NC: FrameCounts = FrameCounts {
        compliant: 0,
        non_compliant: 2,
    };
    const OK: FrameCounts = FrameCounts {
        compliant: 3,
        non_compliant: 0,
    };

    fn debouncer(kind: PolicyKind) -> (AlarmDebouncer, MemoryAudio) {
        let audio = MemoryAudio::new();
        let policy = build_policy(
            kind,
            DEFAULT_STREAK_THRESHOLD,
            DEFAULT_COUNTDOWN_ON_FRAMES,
            DEFAULT_COUNTDOWN_OFF_FRAMES,
        );
        let debouncer =
            AlarmDebouncer::new(policy, Box::new(audio.clone()), Path::new("alarm.wav")).unwrap();
        (debouncer, audio)
    }

    #[test]
    fn turn_on_and_off_are_idempotent() {
        let (mut alarm, audio) = debouncer(PolicyKind::Symmetric);

        assert_eq!(alarm.turn_on(), Some(AlarmTransition::Started));
        assert_eq!(alarm.turn_on(), None);
        assert_eq!(audio.snapshot().plays, 1);

        assert_eq!(alarm.turn_off(), Some(AlarmTransition::Stopped));
        assert_eq!(alarm.turn_off(), None);
        assert_eq!(audio.snapshot().stops, 1);
    }

    #[test]
    fn symmetric_debouncer_needs_ten_frames() {
        let (mut alarm, audio) = debouncer(PolicyKind::Symmetric);
        for _ in 0..9 {
            assert_eq!(alarm.update(&NC), None);
        }
        assert_eq!(alarm.update(&NC), Some(AlarmTransition::Started));
        assert_eq!(alarm.update(&NC), None);
        assert_eq!(audio.snapshot().plays, 1);

        // Compliant streak starts at zero and only grows once NC frames stop.
        for _ in 0..9 {
            alarm.update(&OK);
        }
        assert!(alarm.is_on());
        assert_eq!(alarm.update(&OK), Some(AlarmTransition::Stopped));
    }

    #[test]
    fn countdown_debouncer_raises_on_fifteenth_frame() {
        let (mut alarm, _audio) = debouncer(PolicyKind::Countdown);
        for _ in 0..14 {
            alarm.update(&NC);
        }
        assert_eq!(alarm.mode(), AlarmMode::Off);
        assert_eq!(alarm.update(&NC), Some(AlarmTransition::Started));
    }

    #[test]
    fn symmetric_guard_skips_stop_on_silent_channel() {
        let (mut alarm, audio) = debouncer(PolicyKind::Symmetric);
        alarm.turn_on();
        audio.finish_playback();
        assert_eq!(alarm.turn_off(), Some(AlarmTransition::Stopped));
        assert_eq!(audio.snapshot().stops, 0);
        assert_eq!(alarm.mode(), AlarmMode::Off);
    }

    #[test]
    fn countdown_always_issues_stop() {
        let (mut alarm, audio) = debouncer(PolicyKind::Countdown);
        alarm.turn_on();
        audio.finish_playback();
        alarm.turn_off();
        assert_eq!(audio.snapshot().stops, 1);
    }

    #[test]
    fn reset_session_forces_off_and_clears_streaks() {
        let (mut alarm, audio) = debouncer(PolicyKind::Symmetric);
        for _ in 0..10 {
            alarm.update(&NC);
        }
        assert!(alarm.is_on());

        assert_eq!(alarm.reset_session(), Some(AlarmTransition::Stopped));
        assert_eq!(alarm.mode(), AlarmMode::Off);
        assert_eq!(audio.snapshot().stops, 1);

        // Counters restarted from zero: nine frames are not enough again.
        for _ in 0..9 {
            assert_eq!(alarm.update(&NC), None);
        }
        assert!(!alarm.is_on());
    }

    #[test]
    fn reset_session_stops_even_silent_channel() {
        let (mut alarm, audio) = debouncer(PolicyKind::Symmetric);
        alarm.turn_on();
        audio.finish_playback();
        alarm.reset_session();
        assert_eq!(audio.snapshot().stops, 1);
    }

    #[test]
    fn shutdown_releases_audio_once() {
        let (mut alarm, audio) = debouncer(PolicyKind::Symmetric);
        alarm.turn_on();
        alarm.shutdown();
        alarm.shutdown();
        drop(alarm);
        let log = audio.snapshot();
        assert_eq!(log.shutdowns, 1);
        assert_eq!(log.stops, 1);
        assert!(!log.playing);
    }

    #[test]
    fn empty_frames_move_toward_compliance() {
        let (mut alarm, _audio) = debouncer(PolicyKind::Symmetric);
        alarm.turn_on();
        let empty = FrameCounts::default();
        for _ in 0..9 {
            assert_eq!(alarm.update(&empty), None);
        }
        assert_eq!(alarm.update(&empty), Some(AlarmTransition::Stopped));
    }
}
