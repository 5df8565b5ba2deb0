use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::annotate::FrameCounts;

/// Default evidence threshold for the symmetric policy, both directions.
pub const DEFAULT_STREAK_THRESHOLD: u32 = 10;
/// Consecutive non-compliant frames the countdown policy needs before raising.
pub const DEFAULT_COUNTDOWN_ON_FRAMES: u32 = 15;
/// Compliant frames the countdown policy counts down before clearing.
pub const DEFAULT_COUNTDOWN_OFF_FRAMES: u32 = 10;

/// What the policy wants done with the alarm after a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlarmDecision {
    Raise,
    Clear,
    Hold,
}

/// Debounce strategy: turns per-frame counts into alarm decisions.
///
/// Implementations never decide on a single frame; each needs a sustained run
/// of evidence before returning `Raise` or `Clear`.
pub trait AlarmPolicy {
    fn name(&self) -> &'static str;

    /// Feed one frame of counts.
    fn observe(&mut self, counts: &FrameCounts) -> AlarmDecision;

    /// Zero all counters.
    fn reset(&mut self);

    /// When true, clearing skips the stop command if the channel already reports silence.
    fn stop_requires_playback(&self) -> bool {
        false
    }
}

impl<P: AlarmPolicy + ?Sized> AlarmPolicy for Box<P> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn observe(&mut self, counts: &FrameCounts) -> AlarmDecision {
        (**self).observe(counts)
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn stop_requires_playback(&self) -> bool {
        (**self).stop_requires_playback()
    }
}

/// Symmetric saturating streaks.
///
/// A frame with any non-compliant head adds one to the non-compliant streak
/// and takes one from the compliant streak (floor 0); any other frame, empty
/// ones included, does the opposite. Either streak reaching the threshold
/// decides, non-compliance first.
#[derive(Clone, Debug)]
pub struct SymmetricStreakPolicy {
    threshold: u32,
    non_compliant_streak: u32,
    compliant_streak: u32,
}

impl SymmetricStreakPolicy {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            non_compliant_streak: 0,
            compliant_streak: 0,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn non_compliant_streak(&self) -> u32 {
        self.non_compliant_streak
    }

    pub fn compliant_streak(&self) -> u32 {
        self.compliant_streak
    }
}

impl Default for SymmetricStreakPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_STREAK_THRESHOLD)
    }
}

impl AlarmPolicy for SymmetricStreakPolicy {
    fn name(&self) -> &'static str {
        "symmetric"
    }

    fn observe(&mut self, counts: &FrameCounts) -> AlarmDecision {
        if counts.non_compliant > 0 {
            self.non_compliant_streak = self.non_compliant_streak.saturating_add(1);
            self.compliant_streak = self.compliant_streak.saturating_sub(1);
        } else {
            self.compliant_streak = self.compliant_streak.saturating_add(1);
            self.non_compliant_streak = self.non_compliant_streak.saturating_sub(1);
        }

        if self.non_compliant_streak >= self.threshold {
            AlarmDecision::Raise
        } else if self.compliant_streak >= self.threshold {
            AlarmDecision::Clear
        } else {
            AlarmDecision::Hold
        }
    }

    fn reset(&mut self) {
        self.non_compliant_streak = 0;
        self.compliant_streak = 0;
    }

    fn stop_requires_playback(&self) -> bool {
        true
    }
}

/// Asymmetric streak with a compliance countdown.
///
/// Raises after `on_frames` consecutive frames with a non-compliant head.
/// Clears only after `off_frames` frames that contain helmets and no bare
/// heads; a frame with no heads at all, or a mixed frame below the raise
/// threshold, rewinds the countdown without clearing.
#[derive(Clone, Debug)]
pub struct CountdownPolicy {
    on_frames: u32,
    off_frames: u32,
    no_compliant_streak: u32,
    compliant_countdown: i64,
}

impl CountdownPolicy {
    pub fn new(on_frames: u32, off_frames: u32) -> Self {
        Self {
            on_frames: on_frames.max(1),
            off_frames: off_frames.max(1),
            no_compliant_streak: 0,
            compliant_countdown: off_frames.max(1) as i64,
        }
    }

    pub fn no_compliant_streak(&self) -> u32 {
        self.no_compliant_streak
    }

    pub fn compliant_countdown(&self) -> i64 {
        self.compliant_countdown
    }
}

impl Default for CountdownPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_COUNTDOWN_ON_FRAMES, DEFAULT_COUNTDOWN_OFF_FRAMES)
    }
}

impl AlarmPolicy for CountdownPolicy {
    fn name(&self) -> &'static str {
        "countdown"
    }

    fn observe(&mut self, counts: &FrameCounts) -> AlarmDecision {
        if counts.non_compliant > 0 {
            self.no_compliant_streak = self.no_compliant_streak.saturating_add(1);
        } else {
            self.no_compliant_streak = 0;
        }

        if self.no_compliant_streak >= self.on_frames {
            AlarmDecision::Raise
        } else if counts.non_compliant == 0 && counts.compliant > 0 {
            self.compliant_countdown -= 1;
            if self.compliant_countdown <= 0 {
                self.compliant_countdown = self.off_frames as i64;
                AlarmDecision::Clear
            } else {
                AlarmDecision::Hold
            }
        } else {
            self.compliant_countdown = self.off_frames as i64;
            AlarmDecision::Hold
        }
    }

    fn reset(&mut self) {
        self.no_compliant_streak = 0;
        self.compliant_countdown = self.off_frames as i64;
    }
}

/// Policy selector used by configuration and the CLI.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    Symmetric,
    Countdown,
}

impl PolicyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyKind::Symmetric => "symmetric",
            PolicyKind::Countdown => "countdown",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "symmetric" | "b" => Ok(PolicyKind::Symmetric),
            "countdown" | "a" => Ok(PolicyKind::Countdown),
            other => Err(anyhow!(
                "unknown alarm policy '{}' (expected symmetric or countdown)",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NC: FrameCounts = FrameCounts {
        compliant: 0,
        non_compliant: 1,
    };
    const OK: FrameCounts = FrameCounts {
        compliant: 1,
        non_compliant: 0,
    };
    const EMPTY: FrameCounts = FrameCounts {
        compliant: 0,
        non_compliant: 0,
    };

    #[test]
    fn symmetric_raises_on_tenth_non_compliant_frame() {
        let mut policy = SymmetricStreakPolicy::default();
        for _ in 0..9 {
            assert_eq!(policy.observe(&NC), AlarmDecision::Hold);
        }
        assert_eq!(policy.observe(&NC), AlarmDecision::Raise);
    }

    #[test]
    fn symmetric_clears_on_tenth_compliant_frame() {
        let mut policy = SymmetricStreakPolicy::default();
        for _ in 0..9 {
            assert_eq!(policy.observe(&OK), AlarmDecision::Hold);
        }
        assert_eq!(policy.observe(&OK), AlarmDecision::Clear);
    }

    #[test]
    fn symmetric_interrupted_streak_never_reaches_threshold() {
        let mut policy = SymmetricStreakPolicy::default();
        let mut path = Vec::new();
        for counts in std::iter::repeat(NC)
            .take(5)
            .chain(std::iter::repeat(OK).take(3))
            .chain(std::iter::repeat(NC).take(5))
        {
            assert_ne!(policy.observe(&counts), AlarmDecision::Raise);
            path.push(policy.non_compliant_streak());
        }
        assert_eq!(path, vec![1, 2, 3, 4, 5, 4, 3, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn symmetric_streaks_floor_at_zero() {
        let mut policy = SymmetricStreakPolicy::default();
        policy.observe(&NC);
        policy.observe(&OK);
        policy.observe(&OK);
        assert_eq!(policy.non_compliant_streak(), 0);
        assert_eq!(policy.compliant_streak(), 2);
    }

    #[test]
    fn symmetric_empty_frame_counts_as_compliant() {
        let mut policy = SymmetricStreakPolicy::default();
        policy.observe(&NC);
        policy.observe(&EMPTY);
        assert_eq!(policy.non_compliant_streak(), 0);
        assert_eq!(policy.compliant_streak(), 1);
    }

    #[test]
    fn countdown_raises_on_fifteenth_frame() {
        let mut policy = CountdownPolicy::default();
        for _ in 0..14 {
            assert_ne!(policy.observe(&NC), AlarmDecision::Raise);
        }
        assert_eq!(policy.observe(&NC), AlarmDecision::Raise);
    }

    #[test]
    fn countdown_clears_after_ten_helmet_frames_and_rearms() {
        let mut policy = CountdownPolicy::default();
        for _ in 0..9 {
            assert_eq!(policy.observe(&OK), AlarmDecision::Hold);
        }
        assert_eq!(policy.observe(&OK), AlarmDecision::Clear);
        assert_eq!(policy.compliant_countdown(), 10);
    }

    #[test]
    fn countdown_empty_frame_rewinds_countdown() {
        let mut policy = CountdownPolicy::default();
        for _ in 0..5 {
            policy.observe(&OK);
        }
        assert_eq!(policy.compliant_countdown(), 5);
        assert_eq!(policy.observe(&EMPTY), AlarmDecision::Hold);
        assert_eq!(policy.compliant_countdown(), 10);
    }

    #[test]
    fn countdown_mixed_frame_rewinds_without_clearing() {
        let mut policy = CountdownPolicy::default();
        for _ in 0..5 {
            policy.observe(&OK);
        }
        assert_eq!(policy.compliant_countdown(), 5);
        assert_eq!(policy.observe(&FrameCounts::new(2, 1)), AlarmDecision::Hold);
        assert_eq!(policy.compliant_countdown(), 10);
        assert_eq!(policy.no_compliant_streak(), 1);
    }

    #[test]
    fn countdown_streak_resets_on_clean_frame() {
        let mut policy = CountdownPolicy::default();
        for _ in 0..10 {
            policy.observe(&NC);
        }
        policy.observe(&EMPTY);
        assert_eq!(policy.no_compliant_streak(), 0);
    }

    #[test]
    fn policy_kind_parses() {
        assert_eq!("Symmetric".parse::<PolicyKind>().unwrap(), PolicyKind::Symmetric);
        assert_eq!("countdown".parse::<PolicyKind>().unwrap(), PolicyKind::Countdown);
        assert!("sometimes".parse::<PolicyKind>().is_err());
    }
}
