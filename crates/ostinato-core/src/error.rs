//! Error types for ostinato-core.

use crate::buffer::SoundFormat;
use crate::handle::{AudioId, ChannelId, RecallHandle, RecallId, RecyclingId};
use thiserror::Error;

/// Error type for graph, recall and buffer operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid graph operation: {0}")]
    InvalidGraph(String),

    /// Duplication found no parent instance for the template in this context.
    #[error("No parent recall instance for template {template} in context {recall_id}")]
    MissingParentContext {
        template: RecallHandle,
        recall_id: RecallId,
    },

    #[error("Cannot copy {from:?} samples into a {to:?} buffer")]
    UnsupportedFormatConversion { from: SoundFormat, to: SoundFormat },

    /// The link would make two live recycling ranges overlap.
    #[error("Recycling range conflict between {output} and {input}")]
    RecyclingRangeConflict { output: ChannelId, input: ChannelId },

    #[error("Soundcard sub-block {index} could not be locked within the period budget")]
    SubBlockLockTimeout { index: usize },

    #[error("Linking {output} to {input} would create a loop")]
    LoopInLink { output: ChannelId, input: ChannelId },

    #[error("Channel {0} has the wrong kind for this operation")]
    ChannelKindMismatch(ChannelId),

    #[error("Unknown audio {0}")]
    UnknownAudio(AudioId),

    #[error("Unknown channel {0}")]
    UnknownChannel(ChannelId),

    #[error("Unknown recycling {0}")]
    UnknownRecycling(RecyclingId),

    #[error("Unknown recall {0}")]
    UnknownRecall(RecallHandle),

    #[error("Unknown recall context {0}")]
    UnknownContext(RecallId),

    #[error("Recall {0} is not a template")]
    NotATemplate(RecallHandle),

    #[error("Unknown port '{port}' on recall {recall}")]
    UnknownPort { recall: RecallHandle, port: String },

    #[error("Value {value} out of range for port '{port}' ({min}..={max})")]
    PortOutOfRange {
        port: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Unknown effect unit: {0}")]
    UnknownEffect(String),

    #[error("Effect unit error: {0}")]
    EffectUnit(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
