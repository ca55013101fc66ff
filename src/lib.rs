//! # Ostinato - Pattern Sequencer Audio Engine
//!
//! Audio graph with recall templates, staged per-period execution and a
//! scheduler that applies graph mutations strictly between periods.
//!
//! ## Architecture
//!
//! Ostinato is an umbrella crate that coordinates:
//! - **ostinato-core** - Audio/Channel/Recycling/AudioSignal graph, recalls, duplication, stages
//! - **ostinato-thread** - Audio loop, task queue, polling thread, super-threaded workers
//!
//! ## Quick Start
//!
//! ```
//! use ostinato::prelude::*;
//!
//! let engine = OstinatoEngine::builder()
//!     .buffer_size(64)
//!     .format(SoundFormat::Float)
//!     .build()?;
//!
//! let synth = engine.add_audio(AudioSpec::new("synth"))?;
//! let input = engine.with_graph(|g| g.audio(synth).map(|a| a.inputs()[0]))?;
//! engine.load_template(
//!     input,
//!     Stream::from_normalized(SoundFormat::Float, 64, &[0.5; 128]),
//!     128,
//! )?;
//! engine.attach(RecallOwner::Channel(input), RecallSpec::volume(0.8))?;
//! engine.attach(RecallOwner::Channel(input), RecallSpec::playback())?;
//!
//! engine.start_playback(synth, SoundScope::Playback)?;
//! engine.run_for(4)?;
//! # Ok::<(), ostinato::Error>(())
//! ```

/// Re-export of ostinato-core for direct access
pub use ostinato_core as core;

/// Re-export of ostinato-thread for direct access
pub use ostinato_thread as thread;

// Core types
pub use ostinato_core::{
    AudioFlags, AudioGraph, AudioId, AudioSignalId, AudioSpec, Buffer, ChannelId, ChannelKind,
    EffectRegistry, EffectUnit, EngineConfig, GraphEvent, MemorySoundcard, Pattern, RecallFlags,
    RecallHandle, RecallId, RecallList, RecallOwner, RecallSpec, RecyclingId, SoundFormat,
    SoundScope, Soundcard, Stream, TicStats, Waveform,
};

// Scheduler
pub use ostinato_thread::{
    ControlScope, Interest, PollEvent, PollingThread, Task, TaskLauncher, TaskOutcome,
    TaskTicket, TicObserver, TicSnapshot,
};

mod builder;
mod engine;
mod error;

pub use builder::OstinatoEngineBuilder;
pub use engine::OstinatoEngine;
pub use error::{Error, Result};

/// Convenience re-exports for common usage
pub mod prelude {
    pub use crate::{
        AudioFlags, AudioId, AudioSpec, ChannelId, ChannelKind, ControlScope, Error,
        GraphEvent, OstinatoEngine, OstinatoEngineBuilder, Pattern, RecallHandle, RecallId,
        RecallOwner, RecallSpec, Result, SoundFormat, SoundScope, Stream, Task, TaskOutcome,
        Waveform,
    };
}
