//! Audios: grids of output and input channels.

use crate::flags::define_flags;
use crate::handle::{AudioId, ChannelId, RecallHandle};
use serde::{Deserialize, Serialize};

define_flags! {
    /// Structural behaviour of an audio.
    AudioFlags: u8 {
        /// Each output channel allocates its own recycling.
        const OUTPUT_HAS_RECYCLING = 1;
        /// Each input channel allocates its own recycling while unlinked.
        const INPUT_HAS_RECYCLING = 1 << 1;
    }
}

define_flags! {
    /// What an audio can be driven by.
    Ability: u8 {
        const SEQUENCER = 1;
        const NOTATION = 1 << 1;
        const WAVE = 1 << 2;
    }
}

/// Shape of a new audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSpec {
    pub name: String,
    pub audio_channels: usize,
    pub output_pads: usize,
    pub input_pads: usize,
    pub flags: AudioFlags,
    pub ability: Ability,
}

impl AudioSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            audio_channels: 1,
            output_pads: 1,
            input_pads: 1,
            flags: AudioFlags::INPUT_HAS_RECYCLING,
            ability: Ability::empty(),
        }
    }

    pub fn audio_channels(mut self, count: usize) -> Self {
        self.audio_channels = count;
        self
    }

    pub fn output_pads(mut self, count: usize) -> Self {
        self.output_pads = count;
        self
    }

    pub fn input_pads(mut self, count: usize) -> Self {
        self.input_pads = count;
        self
    }

    pub fn flags(mut self, flags: AudioFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn ability(mut self, ability: Ability) -> Self {
        self.ability = ability;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Audio {
    pub(crate) id: AudioId,
    pub(crate) name: String,
    pub(crate) flags: AudioFlags,
    pub(crate) ability: Ability,
    pub(crate) audio_channels: usize,
    pub(crate) output_pads: usize,
    pub(crate) input_pads: usize,
    /// Ordered by line.
    pub(crate) output: Vec<ChannelId>,
    /// Ordered by line.
    pub(crate) input: Vec<ChannelId>,
    pub(crate) play: Vec<RecallHandle>,
    pub(crate) recall: Vec<RecallHandle>,
}

impl Audio {
    pub(crate) fn new(id: AudioId, spec: &AudioSpec) -> Self {
        Self {
            id,
            name: spec.name.clone(),
            flags: spec.flags,
            ability: spec.ability,
            audio_channels: spec.audio_channels,
            output_pads: spec.output_pads,
            input_pads: spec.input_pads,
            output: Vec::new(),
            input: Vec::new(),
            play: Vec::new(),
            recall: Vec::new(),
        }
    }

    pub fn id(&self) -> AudioId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> AudioFlags {
        self.flags
    }

    pub fn ability(&self) -> Ability {
        self.ability
    }

    pub fn audio_channels(&self) -> usize {
        self.audio_channels
    }

    pub fn output_pads(&self) -> usize {
        self.output_pads
    }

    pub fn input_pads(&self) -> usize {
        self.input_pads
    }

    pub fn outputs(&self) -> &[ChannelId] {
        &self.output
    }

    pub fn inputs(&self) -> &[ChannelId] {
        &self.input
    }

    /// Channel at `pad`/`audio_channel` of one grid.
    pub fn channel_at(
        &self,
        kind: crate::ChannelKind,
        pad: usize,
        audio_channel: usize,
    ) -> Option<ChannelId> {
        if audio_channel >= self.audio_channels {
            return None;
        }
        let grid = match kind {
            crate::ChannelKind::Output => &self.output,
            crate::ChannelKind::Input => &self.input,
        };
        grid.get(pad * self.audio_channels + audio_channel).copied()
    }

    pub fn play_templates(&self) -> &[RecallHandle] {
        &self.play
    }

    pub fn recall_templates(&self) -> &[RecallHandle] {
        &self.recall
    }

    /// Whether both grids have the size the counts promise.
    pub fn is_consistent(&self) -> bool {
        self.output.len() == self.audio_channels * self.output_pads
            && self.input.len() == self.audio_channels * self.input_pads
    }
}
