//! Builder for configuring and constructing an `OstinatoEngine`.

use crate::{OstinatoEngine, Result};
use ostinato_core::{
    AudioGraph, EffectRegistry, EffectUnit, EngineConfig, MemorySoundcard, SoundFormat, Soundcard,
};
use ostinato_thread::{AudioLoop, PollingThread};
use std::sync::Arc;
use std::time::Duration;

/// Without an explicit soundcard the engine renders into a [`MemorySoundcard`]
/// built from the configuration.
///
/// # Example
///
/// ```ignore
/// use ostinato::prelude::*;
///
/// let engine = OstinatoEngine::builder()
///     .samplerate(48000)
///     .buffer_size(256)
///     .bpm(96.0)
///     .capture()
///     .build()?;
/// ```
pub struct OstinatoEngineBuilder {
    config: EngineConfig,
    effects: EffectRegistry,
    soundcard: Option<Arc<dyn Soundcard>>,
    capture: bool,
    polling: bool,
}

impl Default for OstinatoEngineBuilder {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            effects: EffectRegistry::default(),
            soundcard: None,
            capture: false,
            polling: false,
        }
    }
}

impl OstinatoEngineBuilder {
    /// Replace the whole configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Default: 44100
    pub fn samplerate(mut self, samplerate: u32) -> Self {
        self.config.samplerate = samplerate;
        self
    }

    /// Frames per period. Default: 512
    pub fn buffer_size(mut self, frames: usize) -> Self {
        self.config.buffer_size = frames;
        self
    }

    /// Default: S16
    pub fn format(mut self, format: SoundFormat) -> Self {
        self.config.format = format;
        self
    }

    /// Default: 2
    pub fn soundcard_channels(mut self, channels: usize) -> Self {
        self.config.soundcard_channels = channels;
        self
    }

    /// Lock stripes of the soundcard buffer. Default: 4
    pub fn sub_blocks(mut self, count: usize) -> Self {
        self.config.sub_blocks = count;
        self
    }

    pub fn bpm(mut self, bpm: f64) -> Self {
        self.config.bpm = bpm;
        self
    }

    /// Tact, the fraction of a beat per sequencer step. Default: 0.25
    pub fn delay_factor(mut self, factor: f64) -> Self {
        self.config.delay_factor = factor;
        self
    }

    /// Run each armed root audio on its own worker thread.
    pub fn super_threaded(mut self, enabled: bool) -> Self {
        self.config.super_threaded = enabled;
        self
    }

    /// Start a polling thread at `hz` passes per second.
    pub fn polling(mut self, hz: u32) -> Self {
        self.config.polling_jiffie = hz;
        self.polling = true;
        self
    }

    pub fn max_tasks_per_drain(mut self, max: usize) -> Self {
        self.config.max_tasks_per_drain = max;
        self
    }

    pub fn sub_block_lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.sub_block_lock_timeout_us = Some(timeout.as_micros() as u64);
        self
    }

    /// Register an effect unit under `name`.
    pub fn effect(self, name: impl Into<String>, unit: Arc<dyn EffectUnit>) -> Self {
        self.effects.register(name, unit);
        self
    }

    pub fn effects(mut self, registry: EffectRegistry) -> Self {
        self.effects = registry;
        self
    }

    /// Render into this soundcard instead of an in-memory one.
    pub fn soundcard(mut self, soundcard: Arc<dyn Soundcard>) -> Self {
        self.soundcard = Some(soundcard);
        self
    }

    /// Keep every committed period of the in-memory soundcard.
    pub fn capture(mut self) -> Self {
        self.capture = true;
        self
    }

    pub fn build(self) -> Result<OstinatoEngine> {
        self.config.validate()?;

        let (soundcard, memory) = match self.soundcard {
            Some(soundcard) => (soundcard, None),
            None => {
                let mut card = MemorySoundcard::from_config(&self.config);
                if self.capture {
                    card = card.with_capture();
                }
                let card = Arc::new(card);
                (Arc::clone(&card) as Arc<dyn Soundcard>, Some(card))
            }
        };

        let polling = self
            .polling
            .then(|| PollingThread::new(self.config.polling_jiffie));
        let graph = AudioGraph::new(self.config, self.effects)?;
        let audio_loop = AudioLoop::new(graph, soundcard);
        if let Some(polling) = &polling {
            audio_loop.set_polling(polling.control());
        }

        tracing::debug!(
            soundcard = if memory.is_some() { "memory" } else { "external" },
            "engine built"
        );
        Ok(OstinatoEngine::from_parts(audio_loop, memory, polling))
    }
}
