//! Audio graph core for a pattern sequencer.
//!
//! # Primary API
//!
//! - [`AudioGraph`]: arena of audios, channels, recyclings and signals
//! - [`RecallSpec`] / [`AudioGraph::attach_recall`]: attach behaviour templates
//! - [`AudioGraph::start_playback`]: arm a playback tree
//! - [`AudioGraph::process_tic`]: run one period through the staged recalls
//! - [`Soundcard`] / [`MemorySoundcard`]: the output boundary
//! - [`EffectUnit`] / [`EffectRegistry`]: hosted effects
//!
//! # Example
//!
//! ```
//! use ostinato_core::prelude::*;
//!
//! let mut graph = AudioGraph::new(EngineConfig::default(), EffectRegistry::default())?;
//! let drums = graph.add_audio(AudioSpec::new("drums"))?;
//! let input = graph.audio(drums)?.inputs()[0];
//! graph.attach_recall(RecallOwner::Channel(input), RecallSpec::volume(0.8))?;
//! graph.attach_recall(RecallOwner::Channel(input), RecallSpec::playback())?;
//!
//! let card = MemorySoundcard::from_config(graph.config());
//! graph.start_playback(drums, SoundScope::Playback)?;
//! let mut io = StageIo::new(&card, graph.config().sub_block_lock_timeout());
//! graph.process_tic(&mut io);
//! # Ok::<(), ostinato_core::Error>(())
//! ```

mod flags;

pub mod audio;
pub mod audio_signal;
pub mod buffer;
pub mod channel;
pub mod config;
pub mod effect;
pub mod error;
pub mod handle;
pub mod recall;
pub mod recycling;
pub mod soundcard;

mod graph;

pub use audio::{Ability, Audio, AudioFlags, AudioSpec};
pub use audio_signal::{AudioSignal, StreamState};
pub use buffer::{copy_buffer_to_buffer, Buffer, CopyMode, Sample, SoundFormat, Stream, I24};
pub use channel::{Channel, ChannelKind};
pub use config::EngineConfig;
pub use effect::{
    EffectDescriptor, EffectInstance, EffectPortDescriptor, EffectPortKind, EffectRegistry,
    EffectUnit, GainUnit, PortConnection,
};
pub use error::{Error, Result};
pub use graph::{AudioGraph, GraphEvent, Playback, RecallContext};
pub use handle::{AudioId, AudioSignalId, ChannelId, RecallHandle, RecallId, RecyclingId};
pub use recall::{
    DelayRecall, EffectOp, EffectRecall, HostEffectRecall, Level, MixerRecall, Pattern,
    PatternRecall, PeakRecall, PlaybackRecall, Port, PortCell, PortMap, PortRange, PortScale, Recall,
    RecallFlags, RecallKind, RecallList, RecallOwner, RecallRole, RecallSpec, RecallState,
    SoundScope, Stage, StageIo, StepFire, TicStats, VolumeRecall, Waveform,
};
pub use recycling::{Recycling, RecyclingRange};
pub use soundcard::{MemorySoundcard, Soundcard, SoundcardPresets, SubBlockGuard};

pub mod prelude {
    //! Common imports.
    pub use crate::{
        AudioGraph, AudioId, AudioSpec, ChannelId, ChannelKind, EffectRegistry, EngineConfig,
        Error, GraphEvent, MemorySoundcard, Pattern, RecallHandle, RecallId, RecallOwner,
        RecallSpec, Result, SoundFormat, SoundScope, Soundcard, StageIo, Stream,
    };
}
