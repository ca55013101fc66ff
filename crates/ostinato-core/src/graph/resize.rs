//! Pad and audio channel resizing.
//!
//! A resize runs under `&mut AudioGraph` from start to finish, so a tic sees
//! either the old grid or the new one. Removed channels are unlinked, their
//! instances hard-killed and their templates dropped; recyclings that lose
//! their owner are freed by the range refresh.

use super::{AudioGraph, GraphEvent};
use crate::channel::ChannelKind;
use crate::handle::{AudioId, ChannelId};
use crate::recall::RecallOwner;
use crate::{Error, Result};

impl AudioGraph {
    pub fn set_pads(&mut self, audio: AudioId, kind: ChannelKind, count: usize) -> Result<()> {
        let node = self.audio(audio)?;
        let current = match kind {
            ChannelKind::Output => node.output_pads,
            ChannelKind::Input => node.input_pads,
        };
        if count == current {
            return Ok(());
        }
        let audio_channels = node.audio_channels;
        let before = self.range_snapshot();

        let mut grid = self.take_grid(audio, kind)?;
        let mut added = Vec::new();
        if count < current {
            for channel in grid.split_off(count * audio_channels) {
                self.destroy_channel(channel);
            }
        } else {
            for pad in current..count {
                for audio_channel in 0..audio_channels {
                    let channel = self.new_channel(audio, kind, pad, audio_channel);
                    grid.push(channel);
                    added.push(channel);
                }
            }
        }
        if let Some(node) = self.audios.get_mut(&audio) {
            match kind {
                ChannelKind::Output => {
                    node.output = grid;
                    node.output_pads = count;
                }
                ChannelKind::Input => {
                    node.input = grid;
                    node.input_pads = count;
                }
            }
        }
        for channel in added {
            self.sync_ownership(channel);
        }
        self.refresh_recyclings(before);
        self.emit_resized(audio);
        tracing::debug!(%audio, ?kind, from = current, to = count, "pads resized");
        Ok(())
    }

    pub fn set_audio_channels(&mut self, audio: AudioId, count: usize) -> Result<()> {
        if count == 0 {
            return Err(Error::InvalidGraph(format!(
                "{audio} needs at least one audio channel"
            )));
        }
        let current = self.audio(audio)?.audio_channels;
        if count == current {
            return Ok(());
        }
        let before = self.range_snapshot();

        let mut added = Vec::new();
        for kind in [ChannelKind::Output, ChannelKind::Input] {
            let pads = match kind {
                ChannelKind::Output => self.audio(audio)?.output_pads,
                ChannelKind::Input => self.audio(audio)?.input_pads,
            };
            let old = self.take_grid(audio, kind)?;
            let mut grid = Vec::with_capacity(pads * count);
            for pad in 0..pads {
                for audio_channel in 0..count {
                    let existing = (audio_channel < current)
                        .then(|| old.get(pad * current + audio_channel).copied())
                        .flatten();
                    match existing {
                        Some(channel) => grid.push(channel),
                        None => {
                            let channel = self.new_channel(audio, kind, pad, audio_channel);
                            grid.push(channel);
                            added.push(channel);
                        }
                    }
                }
            }
            for channel in old.into_iter().filter(|c| !grid.contains(c)) {
                self.destroy_channel(channel);
            }
            if let Some(node) = self.audios.get_mut(&audio) {
                match kind {
                    ChannelKind::Output => node.output = grid,
                    ChannelKind::Input => node.input = grid,
                }
            }
        }
        if let Some(node) = self.audios.get_mut(&audio) {
            node.audio_channels = count;
        }
        for channel in added {
            self.sync_ownership(channel);
        }
        self.refresh_recyclings(before);
        self.emit_resized(audio);
        tracing::debug!(%audio, from = current, to = count, "audio channels resized");
        Ok(())
    }

    fn take_grid(&mut self, audio: AudioId, kind: ChannelKind) -> Result<Vec<ChannelId>> {
        let node = self.audios.get_mut(&audio).ok_or(Error::UnknownAudio(audio))?;
        Ok(match kind {
            ChannelKind::Output => std::mem::take(&mut node.output),
            ChannelKind::Input => std::mem::take(&mut node.input),
        })
    }

    fn destroy_channel(&mut self, channel: ChannelId) {
        if let Some(link) = self.channels.get(&channel).and_then(|c| c.link) {
            self.clear_link(channel, link);
        }
        self.kill_owned_by_channel(channel);
        self.recalls
            .retain(|_, r| !(r.is_template() && r.owner == RecallOwner::Channel(channel)));
        self.channels.remove(&channel);
        tracing::trace!(%channel, "channel destroyed");
    }

    fn emit_resized(&mut self, audio: AudioId) {
        if let Some(node) = self.audios.get(&audio) {
            let event = GraphEvent::Resized {
                audio,
                audio_channels: node.audio_channels,
                output_pads: node.output_pads,
                input_pads: node.input_pads,
            };
            self.emit(event);
        }
    }
}
