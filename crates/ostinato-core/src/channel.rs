//! Channels: routing nodes of the audio graph.

use crate::handle::{AudioId, ChannelId, RecallHandle, RecyclingId};
use crate::recycling::RecyclingRange;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    Output,
    Input,
}

impl ChannelKind {
    pub fn opposite(self) -> Self {
        match self {
            Self::Output => Self::Input,
            Self::Input => Self::Output,
        }
    }
}

/// One line of an [`Audio`](crate::Audio)'s output or input grid.
///
/// Siblings are resolved through the owning audio: see
/// [`AudioGraph::next_channel`](crate::AudioGraph::next_channel).
#[derive(Debug, Clone)]
pub struct Channel {
    pub(crate) id: ChannelId,
    pub(crate) audio: AudioId,
    pub(crate) kind: ChannelKind,
    pub(crate) pad: usize,
    pub(crate) audio_channel: usize,
    pub(crate) link: Option<ChannelId>,
    /// Recycling allocated by this channel.
    pub(crate) own_recycling: Option<RecyclingId>,
    /// Recyclings this channel reads, possibly borrowed through a link.
    pub(crate) range: Option<RecyclingRange>,
    /// Templates duplicated for root contexts.
    pub(crate) play: Vec<RecallHandle>,
    /// Templates duplicated for nested contexts.
    pub(crate) recall: Vec<RecallHandle>,
}

impl Channel {
    pub(crate) fn new(
        id: ChannelId,
        audio: AudioId,
        kind: ChannelKind,
        pad: usize,
        audio_channel: usize,
    ) -> Self {
        Self {
            id,
            audio,
            kind,
            pad,
            audio_channel,
            link: None,
            own_recycling: None,
            range: None,
            play: Vec::new(),
            recall: Vec::new(),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn audio(&self) -> AudioId {
        self.audio
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn pad(&self) -> usize {
        self.pad
    }

    pub fn audio_channel(&self) -> usize {
        self.audio_channel
    }

    /// Position in the audio's grid: `pad * audio_channels + audio_channel`.
    pub fn line(&self, audio_channels: usize) -> usize {
        self.pad * audio_channels + self.audio_channel
    }

    /// Linked channel of the opposite kind on another audio.
    pub fn link(&self) -> Option<ChannelId> {
        self.link
    }

    pub fn own_recycling(&self) -> Option<RecyclingId> {
        self.own_recycling
    }

    pub fn recycling_range(&self) -> Option<RecyclingRange> {
        self.range
    }

    pub fn first_recycling(&self) -> Option<RecyclingId> {
        self.range.map(|r| r.first)
    }

    pub fn last_recycling(&self) -> Option<RecyclingId> {
        self.range.map(|r| r.last)
    }

    pub fn play_templates(&self) -> &[RecallHandle] {
        &self.play
    }

    pub fn recall_templates(&self) -> &[RecallHandle] {
        &self.recall
    }
}
