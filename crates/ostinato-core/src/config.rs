//! Engine configuration.

use crate::buffer::SoundFormat;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const MIN_BPM: f64 = 1.0;
pub const MAX_BPM: f64 = 999.0;
/// Shortest step: a 64th of a beat.
pub const MIN_DELAY_FACTOR: f64 = 1.0 / 64.0;
pub const MAX_DELAY_FACTOR: f64 = 16.0;

/// Configuration shared by the graph and the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub samplerate: u32,
    /// Frames per period (one tic).
    pub buffer_size: usize,
    /// Sample format of newly created signals.
    pub format: SoundFormat,
    pub soundcard_channels: usize,
    /// Lock stripes of the soundcard buffer.
    pub sub_blocks: usize,
    pub bpm: f64,
    /// Step length as a fraction of a beat (0.25 = sixteenth notes).
    pub delay_factor: f64,
    /// One worker thread per armed root audio.
    pub super_threaded: bool,
    /// Polling passes per second.
    pub polling_jiffie: u32,
    pub max_tasks_per_drain: usize,
    /// Sub-block try-lock budget; a quarter period when unset.
    pub sub_block_lock_timeout_us: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            samplerate: 44100,
            buffer_size: 512,
            format: SoundFormat::S16,
            soundcard_channels: 2,
            sub_blocks: 4,
            bpm: 120.0,
            delay_factor: 0.25,
            super_threaded: false,
            polling_jiffie: 1000,
            max_tasks_per_drain: 256,
            sub_block_lock_timeout_us: None,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if !(8000..=384_000).contains(&self.samplerate) {
            return Err(Error::InvalidConfig(format!(
                "samplerate {} out of range (8000-384000 Hz)",
                self.samplerate
            )));
        }
        if self.buffer_size == 0 || self.buffer_size > 65536 {
            return Err(Error::InvalidConfig(format!(
                "buffer_size {} out of range (1-65536 frames)",
                self.buffer_size
            )));
        }
        if self.soundcard_channels == 0 {
            return Err(Error::InvalidConfig(
                "soundcard_channels must be at least 1".into(),
            ));
        }
        if self.sub_blocks == 0 || self.sub_blocks > self.buffer_size {
            return Err(Error::InvalidConfig(format!(
                "sub_blocks {} must be between 1 and buffer_size",
                self.sub_blocks
            )));
        }
        if !(MIN_BPM..=MAX_BPM).contains(&self.bpm) {
            return Err(Error::InvalidConfig(format!(
                "bpm {} out of range (1-999)",
                self.bpm
            )));
        }
        if !(MIN_DELAY_FACTOR..=MAX_DELAY_FACTOR).contains(&self.delay_factor) {
            return Err(Error::InvalidConfig(format!(
                "delay_factor {} out of range (1/64-16)",
                self.delay_factor
            )));
        }
        if self.polling_jiffie == 0 {
            return Err(Error::InvalidConfig("polling_jiffie must be non-zero".into()));
        }
        if self.max_tasks_per_drain == 0 {
            return Err(Error::InvalidConfig(
                "max_tasks_per_drain must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Wall-clock length of one period.
    pub fn period(&self) -> Duration {
        Duration::from_nanos(
            self.buffer_size as u64 * 1_000_000_000 / u64::from(self.samplerate.max(1)),
        )
    }

    pub fn sub_block_lock_timeout(&self) -> Duration {
        match self.sub_block_lock_timeout_us {
            Some(us) => Duration::from_micros(us),
            None => self.period() / 4,
        }
    }

    /// Frames between two sequencer steps at the given tempo.
    pub fn frames_per_step(&self, bpm: f64, delay_factor: f64) -> f64 {
        60.0 * self.samplerate as f64 / bpm * delay_factor
    }
}
