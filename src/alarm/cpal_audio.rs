#![cfg(feature = "audio-cpal")]

//! Speaker output through cpal, looping WAV assets decoded with hound.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};

use super::audio::{AlarmChannel, AudioDevice, SoundHandle};

/// Default output device of the default host.
pub struct CpalAudio {
    device: cpal::Device,
    config: StreamConfig,
    sounds: Vec<Arc<Vec<f32>>>,
}

impl CpalAudio {
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("no audio output device available"))?;
        let supported = device
            .default_output_config()
            .context("query default output config")?;
        if supported.sample_format() != SampleFormat::F32 {
            return Err(anyhow!(
                "output device prefers {:?}; only f32 output is supported",
                supported.sample_format()
            ));
        }
        let config: StreamConfig = supported.into();
        log::info!(
            "CpalAudio: using {} ({} Hz, {} channels)",
            device.name().unwrap_or_else(|_| "unknown device".to_string()),
            config.sample_rate.0,
            config.channels
        );
        Ok(Self {
            device,
            config,
            sounds: Vec::new(),
        })
    }
}

struct CpalChannel {
    stream: Option<cpal::Stream>,
    playing: Arc<AtomicBool>,
}

impl AlarmChannel for CpalChannel {
    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(err) = stream.pause() {
                log::warn!("CpalAudio: failed to pause stream: {}", err);
            }
        }
        self.playing.store(false, Ordering::SeqCst);
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

impl AudioDevice for CpalAudio {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn load(&mut self, asset: &Path) -> Result<SoundHandle> {
        let (samples, rate) = decode_wav_mono(asset)?;
        if samples.is_empty() {
            return Err(anyhow!("alarm sound {} has no samples", asset.display()));
        }
        let device_rate = self.config.sample_rate.0;
        if rate != device_rate {
            log::debug!(
                "CpalAudio: resampling {} from {} Hz to {} Hz",
                asset.display(),
                rate,
                device_rate
            );
        }
        let samples = resample_linear(&samples, rate, device_rate);
        self.sounds.push(Arc::new(samples));
        Ok(SoundHandle {
            id: self.sounds.len() - 1,
            path: asset.to_path_buf(),
        })
    }

    fn play_looped(&mut self, sound: &SoundHandle) -> Result<Box<dyn AlarmChannel>> {
        let samples = self
            .sounds
            .get(sound.id)
            .cloned()
            .ok_or_else(|| anyhow!("sound {} was not loaded", sound.path.display()))?;
        let channels = self.config.channels.max(1) as usize;
        let playing = Arc::new(AtomicBool::new(true));
        let playing_err = Arc::clone(&playing);
        let mut position = 0usize;

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels) {
                        let sample = samples[position % samples.len()];
                        position = position.wrapping_add(1);
                        for out in frame.iter_mut() {
                            *out = sample;
                        }
                    }
                },
                move |err| {
                    log::error!("CpalAudio: output stream error: {}", err);
                    playing_err.store(false, Ordering::SeqCst);
                },
                None,
            )
            .context("build output stream")?;
        stream.play().context("start output stream")?;

        Ok(Box::new(CpalChannel {
            stream: Some(stream),
            playing,
        }))
    }

    fn shutdown(&mut self) {
        self.sounds.clear();
        log::info!("CpalAudio: released output device");
    }
}

/// Mono samples and their sample rate.
fn decode_wav_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("failed to open alarm sound {}", path.display()))?;
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .context("decode float WAV samples")?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .context("decode integer WAV samples")?
        }
    };
    let channels = spec.channels.max(1) as usize;
    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

/// Linear interpolation from `from_rate` to `to_rate`.
fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 || samples.is_empty() {
        return samples.to_vec();
    }
    let len = ((samples.len() as u64 * to_rate as u64) / from_rate as u64).max(1) as usize;
    let step = from_rate as f64 / to_rate as f64;
    let last = samples.len() - 1;
    (0..len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = (pos.floor() as usize).min(last);
            let frac = (pos - idx as f64) as f32;
            let next = samples[(idx + 1).min(last)];
            samples[idx] + (next - samples[idx]) * frac
        })
        .collect()
}
