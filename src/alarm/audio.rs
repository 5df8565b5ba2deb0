use std::cell::RefCell;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::Result;

/// Handle to a sound loaded by an `AudioDevice`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SoundHandle {
    pub id: usize,
    pub path: PathBuf,
}

/// A playing (or finished) alarm channel. Dropping a channel does not have to stop it.
pub trait AlarmChannel {
    fn stop(&mut self);
    fn is_playing(&self) -> bool;
}

/// Audio output used by the alarm debouncer.
pub trait AudioDevice {
    fn name(&self) -> &'static str;

    /// Load a sound asset for later playback.
    fn load(&mut self, asset: &Path) -> Result<SoundHandle>;

    /// Start looping `sound` until the returned channel is stopped.
    fn play_looped(&mut self, sound: &SoundHandle) -> Result<Box<dyn AlarmChannel>>;

    /// Release the device. Called once before process exit.
    fn shutdown(&mut self) {}
}

// ----------------------------------------------------------------------------
// Terminal bell output
// ----------------------------------------------------------------------------

/// Fallback output with no audio backend: logs transitions and rings the terminal bell.
#[derive(Debug, Default)]
pub struct BellAudio {
    loaded: Vec<PathBuf>,
    ring_bell: bool,
}

impl BellAudio {
    pub fn new(ring_bell: bool) -> Self {
        Self {
            loaded: Vec::new(),
            ring_bell,
        }
    }
}

struct BellChannel {
    playing: bool,
}

impl AlarmChannel for BellChannel {
    fn stop(&mut self) {
        self.playing = false;
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}

impl AudioDevice for BellAudio {
    fn name(&self) -> &'static str {
        "bell"
    }

    fn load(&mut self, asset: &Path) -> Result<SoundHandle> {
        if !asset.exists() {
            log::warn!(
                "BellAudio: alarm sound {} not found; using terminal bell",
                asset.display()
            );
        }
        self.loaded.push(asset.to_path_buf());
        Ok(SoundHandle {
            id: self.loaded.len() - 1,
            path: asset.to_path_buf(),
        })
    }

    fn play_looped(&mut self, sound: &SoundHandle) -> Result<Box<dyn AlarmChannel>> {
        log::debug!("BellAudio: looping {}", sound.path.display());
        if self.ring_bell {
            let mut stderr = std::io::stderr();
            let _ = stderr.write_all(b"\x07");
            let _ = stderr.flush();
        }
        Ok(Box::new(BellChannel { playing: true }))
    }
}

// ----------------------------------------------------------------------------
// In-memory output (tests, dry runs)
// ----------------------------------------------------------------------------

/// Counters shared between a `MemoryAudio` device and its channels.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AudioLog {
    pub loads: usize,
    pub plays: usize,
    pub stops: usize,
    pub shutdowns: usize,
    pub playing: bool,
}

/// Records every command instead of producing sound.
#[derive(Clone, Debug, Default)]
pub struct MemoryAudio {
    log: Rc<RefCell<AudioLog>>,
}

impl MemoryAudio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded commands.
    pub fn snapshot(&self) -> AudioLog {
        self.log.borrow().clone()
    }

    /// Simulate the sound ending on its own (device no longer playing).
    pub fn finish_playback(&self) {
        self.log.borrow_mut().playing = false;
    }
}

struct MemoryChannel {
    log: Rc<RefCell<AudioLog>>,
}

impl AlarmChannel for MemoryChannel {
    fn stop(&mut self) {
        let mut log = self.log.borrow_mut();
        log.stops += 1;
        log.playing = false;
    }

    fn is_playing(&self) -> bool {
        self.log.borrow().playing
    }
}

impl AudioDevice for MemoryAudio {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn load(&mut self, asset: &Path) -> Result<SoundHandle> {
        let mut log = self.log.borrow_mut();
        log.loads += 1;
        Ok(SoundHandle {
            id: log.loads - 1,
            path: asset.to_path_buf(),
        })
    }

    fn play_looped(&mut self, _sound: &SoundHandle) -> Result<Box<dyn AlarmChannel>> {
        {
            let mut log = self.log.borrow_mut();
            log.plays += 1;
            log.playing = true;
        }
        Ok(Box::new(MemoryChannel {
            log: Rc::clone(&self.log),
        }))
    }

    fn shutdown(&mut self) {
        self.log.borrow_mut().shutdowns += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_audio_tracks_channel_state() -> Result<()> {
        let mut audio = MemoryAudio::new();
        let sound = audio.load(Path::new("alarm.wav"))?;
        let mut channel = audio.play_looped(&sound)?;
        assert!(channel.is_playing());

        channel.stop();
        assert!(!channel.is_playing());
        let log = audio.snapshot();
        assert_eq!((log.loads, log.plays, log.stops), (1, 1, 1));
        Ok(())
    }

    #[test]
    fn bell_audio_loads_missing_assets() -> Result<()> {
        let mut audio = BellAudio::new(false);
        let sound = audio.load(Path::new("/nonexistent/alarm.mp3"))?;
        let mut channel = audio.play_looped(&sound)?;
        assert!(channel.is_playing());
        channel.stop();
        assert!(!channel.is_playing());
        Ok(())
    }
}
