//! The audio graph arena.
//!
//! Every node (audio, channel, recycling, signal, recall, context) lives in
//! one [`AudioGraph`] and is addressed by a handle. Back-references are
//! handles too, so there are no ownership cycles. Mutation goes through
//! `&mut AudioGraph`; the scheduler owns the graph and applies control tasks
//! between tics, so a running tic never sees a half-applied change.

mod context;
mod event;
mod link;
mod resize;

pub use context::{Playback, RecallContext};
pub use event::GraphEvent;

use crate::audio::{Audio, AudioSpec};
use crate::audio_signal::AudioSignal;
use crate::buffer::Stream;
use crate::channel::{Channel, ChannelKind};
use crate::config::EngineConfig;
use crate::effect::EffectRegistry;
use crate::handle::{
    AudioId, AudioSignalId, ChannelId, HandleAllocator, RecallHandle, RecallId, RecyclingId,
};
use crate::recall::Recall;
use crate::recycling::{Recycling, RecyclingRange};
use crate::{Error, Result};
use hashbrown::HashMap;
use smallvec::SmallVec;

pub struct AudioGraph {
    pub(crate) config: EngineConfig,
    pub(crate) alloc: HandleAllocator,
    pub(crate) audios: HashMap<AudioId, Audio>,
    pub(crate) channels: HashMap<ChannelId, Channel>,
    pub(crate) recyclings: HashMap<RecyclingId, Recycling>,
    pub(crate) signals: HashMap<AudioSignalId, AudioSignal>,
    pub(crate) recalls: HashMap<RecallHandle, Recall>,
    pub(crate) contexts: HashMap<RecallId, RecallContext>,
    /// Top-level instance per (template, context).
    pub(crate) instance_index: HashMap<(RecallHandle, RecallId), RecallHandle>,
    pub(crate) playbacks: Vec<Playback>,
    pub(crate) effects: EffectRegistry,
    pub(crate) events: Vec<GraphEvent>,
    pub(crate) tic: u64,
}

impl AudioGraph {
    pub fn new(config: EngineConfig, effects: EffectRegistry) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            alloc: HandleAllocator::default(),
            audios: HashMap::new(),
            channels: HashMap::new(),
            recyclings: HashMap::new(),
            signals: HashMap::new(),
            recalls: HashMap::new(),
            contexts: HashMap::new(),
            instance_index: HashMap::new(),
            playbacks: Vec::new(),
            effects,
            events: Vec::new(),
            tic: 0,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn effects(&self) -> &EffectRegistry {
        &self.effects
    }

    /// Tics completed so far.
    pub fn tic(&self) -> u64 {
        self.tic
    }

    pub fn audio(&self, id: AudioId) -> Result<&Audio> {
        self.audios.get(&id).ok_or(Error::UnknownAudio(id))
    }

    pub fn channel(&self, id: ChannelId) -> Result<&Channel> {
        self.channels.get(&id).ok_or(Error::UnknownChannel(id))
    }

    pub fn recycling(&self, id: RecyclingId) -> Result<&Recycling> {
        self.recyclings.get(&id).ok_or(Error::UnknownRecycling(id))
    }

    pub fn signal(&self, id: AudioSignalId) -> Option<&AudioSignal> {
        self.signals.get(&id)
    }

    pub fn recall(&self, handle: RecallHandle) -> Result<&Recall> {
        self.recalls.get(&handle).ok_or(Error::UnknownRecall(handle))
    }

    pub fn context(&self, id: RecallId) -> Result<&RecallContext> {
        self.contexts.get(&id).ok_or(Error::UnknownContext(id))
    }

    pub fn audios(&self) -> impl Iterator<Item = &Audio> {
        self.audios.values()
    }

    pub fn recalls(&self) -> impl Iterator<Item = &Recall> {
        self.recalls.values()
    }

    pub fn signals(&self) -> impl Iterator<Item = &AudioSignal> {
        self.signals.values()
    }

    pub fn playbacks(&self) -> &[Playback] {
        &self.playbacks
    }

    /// Events since the last drain, oldest first.
    pub fn drain_events(&mut self) -> Vec<GraphEvent> {
        std::mem::take(&mut self.events)
    }

    pub(crate) fn emit(&mut self, event: GraphEvent) {
        tracing::trace!(?event, "graph event");
        self.events.push(event);
    }

    /// Create an audio with its channel grids and recyclings.
    pub fn add_audio(&mut self, spec: AudioSpec) -> Result<AudioId> {
        if spec.audio_channels == 0 {
            return Err(Error::InvalidGraph(format!(
                "audio '{}' needs at least one audio channel",
                spec.name
            )));
        }
        let before = self.range_snapshot();
        let id = self.alloc.audio();
        let mut audio = Audio::new(id, &spec);
        audio.output = self.new_grid(id, ChannelKind::Output, spec.output_pads, spec.audio_channels);
        audio.input = self.new_grid(id, ChannelKind::Input, spec.input_pads, spec.audio_channels);
        let lines: Vec<ChannelId> = audio.output.iter().chain(&audio.input).copied().collect();
        self.audios.insert(id, audio);
        for channel in lines {
            self.sync_ownership(channel);
        }
        self.refresh_recyclings(before);
        tracing::debug!(audio = %id, name = %spec.name, "audio added");
        Ok(id)
    }

    fn new_grid(
        &mut self,
        audio: AudioId,
        kind: ChannelKind,
        pads: usize,
        audio_channels: usize,
    ) -> Vec<ChannelId> {
        let mut grid = Vec::with_capacity(pads * audio_channels);
        for pad in 0..pads {
            for audio_channel in 0..audio_channels {
                grid.push(self.new_channel(audio, kind, pad, audio_channel));
            }
        }
        grid
    }

    pub(crate) fn new_channel(
        &mut self,
        audio: AudioId,
        kind: ChannelKind,
        pad: usize,
        audio_channel: usize,
    ) -> ChannelId {
        let id = self.alloc.channel();
        self.channels
            .insert(id, Channel::new(id, audio, kind, pad, audio_channel));
        id
    }

    /// Next line of the same grid.
    pub fn next_channel(&self, channel: ChannelId) -> Option<ChannelId> {
        self.sibling(channel, 1)
    }

    /// Previous line of the same grid.
    pub fn prev_channel(&self, channel: ChannelId) -> Option<ChannelId> {
        self.sibling(channel, -1)
    }

    fn sibling(&self, channel: ChannelId, offset: isize) -> Option<ChannelId> {
        let channel = self.channels.get(&channel)?;
        let audio = self.audios.get(&channel.audio)?;
        let grid = match channel.kind {
            ChannelKind::Output => &audio.output,
            ChannelKind::Input => &audio.input,
        };
        let line = channel.line(audio.audio_channels).checked_add_signed(offset)?;
        grid.get(line).copied()
    }

    /// Recyclings a channel reads, first to last.
    pub fn channel_recyclings(&self, channel: ChannelId) -> SmallVec<[RecyclingId; 8]> {
        let range = self.channels.get(&channel).and_then(Channel::recycling_range);
        range_members(&self.recyclings, range)
    }

    /// Replace the template signal of a channel's own recycling.
    pub fn load_template(
        &mut self,
        channel: ChannelId,
        mut stream: Stream,
        frame_count: u64,
    ) -> Result<AudioSignalId> {
        let recycling = self
            .channel(channel)?
            .own_recycling
            .ok_or_else(|| {
                Error::InvalidGraph(format!("{channel} owns no recycling to load into"))
            })?;
        // voices are mono per channel
        if stream.stride() != 1 {
            return Err(Error::InvalidGraph(format!(
                "template for {channel} is interleaved with stride {}; load one stream per channel",
                stream.stride()
            )));
        }
        if stream.buffer_size() != self.config.buffer_size {
            stream.realloc_buffer_size(self.config.buffer_size, frame_count as usize)?;
        }
        if let Some(old) = self
            .recyclings
            .get(&recycling)
            .and_then(Recycling::template)
        {
            self.remove_signal(old);
        }
        let id = self.alloc.signal();
        let signal = AudioSignal::template(id, recycling, stream, frame_count, self.config.samplerate);
        self.insert_signal(signal);
        tracing::debug!(%channel, signal = %id, frame_count, "template loaded");
        Ok(id)
    }

    /// Arm a loop region on a signal, in frames.
    pub fn set_loop(&mut self, signal: AudioSignalId, start: u64, end: u64) -> Result<()> {
        let signal = self
            .signals
            .get_mut(&signal)
            .ok_or_else(|| Error::InvalidGraph(format!("unknown signal {signal}")))?;
        signal.set_loop(start, end);
        Ok(())
    }

    pub(crate) fn insert_signal(&mut self, signal: AudioSignal) {
        if let Some(recycling) = self.recyclings.get_mut(&signal.recycling) {
            recycling.insert_ordered(&signal, &self.signals);
        }
        self.signals.insert(signal.id, signal);
    }

    pub(crate) fn remove_signal(&mut self, id: AudioSignalId) -> Option<AudioSignal> {
        let signal = self.signals.remove(&id)?;
        if let Some(recycling) = self.recyclings.get_mut(&signal.recycling) {
            recycling.remove_signal(id);
        }
        Some(signal)
    }

    /// Check the structural invariants; used by tests and debug assertions.
    pub fn check_invariants(&self) -> Result<()> {
        for audio in self.audios.values() {
            if !audio.is_consistent() {
                return Err(Error::InvalidGraph(format!(
                    "{} has {}/{} channels for {} audio channels",
                    audio.id,
                    audio.output.len(),
                    audio.input.len(),
                    audio.audio_channels
                )));
            }
        }
        for channel in self.channels.values() {
            if let Some(link) = channel.link {
                let other = self.channel(link)?;
                if other.link != Some(channel.id) || other.kind == channel.kind {
                    return Err(Error::InvalidGraph(format!(
                        "{} and {} are linked one way only",
                        channel.id, link
                    )));
                }
            }
            for recycling in self.channel_recyclings(channel.id) {
                self.recycling(recycling)?;
            }
        }
        for ((template, recall_id), instance) in &self.instance_index {
            let recall = self.recall(*instance)?;
            if recall.template != Some(*template) || recall.recall_id != Some(*recall_id) {
                return Err(Error::InvalidGraph(format!(
                    "index entry for {template} in {recall_id} points at {instance}"
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for AudioGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioGraph")
            .field("tic", &self.tic)
            .field("audios", &self.audios.len())
            .field("channels", &self.channels.len())
            .field("recyclings", &self.recyclings.len())
            .field("signals", &self.signals.len())
            .field("recalls", &self.recalls.len())
            .field("contexts", &self.contexts.len())
            .field("playbacks", &self.playbacks.len())
            .finish()
    }
}

/// Walk a recycling chain from `first` to `last`.
pub(crate) fn range_members(
    recyclings: &HashMap<RecyclingId, Recycling>,
    range: Option<RecyclingRange>,
) -> SmallVec<[RecyclingId; 8]> {
    let mut members = SmallVec::new();
    let Some(range) = range else {
        return members;
    };
    let mut current = Some(range.first);
    while let Some(id) = current {
        let Some(recycling) = recyclings.get(&id) else {
            break;
        };
        members.push(id);
        if id == range.last || members.len() > recyclings.len() {
            break;
        }
        current = recycling.next;
    }
    members
}

/// Whether `signal` belongs to `context` or one of its descendants.
pub(crate) fn covers(
    contexts: &HashMap<RecallId, RecallContext>,
    context: RecallId,
    signal: Option<RecallId>,
) -> bool {
    let mut current = signal;
    let mut depth = 0;
    while let Some(id) = current {
        if id == context {
            return true;
        }
        depth += 1;
        if depth > contexts.len() {
            return false;
        }
        current = contexts.get(&id).and_then(|c| c.parent);
    }
    false
}

#[cfg(test)]
mod tests;
