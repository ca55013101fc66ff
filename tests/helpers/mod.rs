//! Test helpers and fixtures for ostinato integration tests
//!
//! Engines here render into the in-memory soundcard and are ticked by hand,
//! so every test is deterministic and needs no audio hardware.

#![allow(dead_code)]

pub mod tolerances;

use ostinato::core::Buffer;
use ostinato::prelude::*;

/// Lowest samplerate the config accepts; keeps step arithmetic exact.
pub const TEST_SAMPLERATE: u32 = 8000;

/// Frames per period.
pub const TEST_BUFFER_SIZE: usize = 250;

/// Install a tracing subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Float, mono, capturing engine.
pub fn test_engine() -> OstinatoEngine {
    test_engine_builder().build().expect("Failed to create test engine")
}

pub fn test_engine_builder() -> OstinatoEngineBuilder {
    init_tracing();
    OstinatoEngine::builder()
        .samplerate(TEST_SAMPLERATE)
        .buffer_size(TEST_BUFFER_SIZE)
        .format(SoundFormat::Float)
        .soundcard_channels(1)
        .sub_blocks(2)
        .capture()
}

/// `frames` samples rising linearly from 0 to just under `peak`.
pub fn ramp_signal(frames: usize, peak: f64) -> Stream {
    let samples: Vec<f64> = (0..frames)
        .map(|i| peak * i as f64 / frames.max(1) as f64)
        .collect();
    Stream::from_normalized(SoundFormat::Float, TEST_BUFFER_SIZE, &samples)
}

/// `frames` samples of `value`.
pub fn constant_signal(frames: usize, value: f64) -> Stream {
    Stream::from_normalized(SoundFormat::Float, TEST_BUFFER_SIZE, &vec![value; frames])
}

/// First input channel of `audio`.
pub fn first_input(engine: &OstinatoEngine, audio: AudioId) -> ChannelId {
    engine.with_graph(|g| g.audio(audio).expect("audio exists").inputs()[0])
}

pub fn first_output(engine: &OstinatoEngine, audio: AudioId) -> ChannelId {
    engine.with_graph(|g| g.audio(audio).expect("audio exists").outputs()[0])
}

/// Sample 0 of each captured period.
pub fn first_samples(periods: &[Buffer]) -> Vec<f64> {
    periods
        .iter()
        .map(|p| p.sample(0).unwrap_or_default())
        .collect()
}

/// Drain every event delivered so far.
pub fn drain_events(engine: &OstinatoEngine) -> Vec<GraphEvent> {
    engine.events().try_iter().collect()
}
