use crate::handle::{AudioId, AudioSignalId, ChannelId, RecallHandle, RecallId, RecyclingId};
use crate::recall::SoundScope;
use crate::recycling::RecyclingRange;
use serde::{Deserialize, Serialize};

/// Notifications produced by graph mutation and by tics.
///
/// Dependents are migrated before an event is queued; observers only react.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GraphEvent {
    /// The recyclings a channel reads changed.
    RecyclingChanged {
        channel: ChannelId,
        old: Option<RecyclingRange>,
        new: Option<RecyclingRange>,
    },
    Linked {
        output: ChannelId,
        input: ChannelId,
    },
    Unlinked {
        output: ChannelId,
        input: ChannelId,
    },
    /// Pad or audio channel counts changed.
    Resized {
        audio: AudioId,
        audio_channels: usize,
        output_pads: usize,
        input_pads: usize,
    },
    ControlChanged {
        recall: RecallHandle,
        port: String,
        value: f64,
    },
    RecallDone {
        recall: RecallHandle,
        recall_id: Option<RecallId>,
    },
    SignalExhausted {
        signal: AudioSignalId,
        recycling: RecyclingId,
    },
    ContextCreated {
        recall_id: RecallId,
        audio: AudioId,
        parent: Option<RecallId>,
    },
    PlaybackStarted {
        root: RecallId,
        audio: AudioId,
        scope: SoundScope,
    },
    PlaybackFinished {
        root: RecallId,
        audio: AudioId,
    },
}
