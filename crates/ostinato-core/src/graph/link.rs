//! Channel links and recycling ranges.
//!
//! An input owns a recycling while its audio has `INPUT_HAS_RECYCLING` and it
//! is unlinked; a linked input reads the upstream output's range. An output
//! owns a recycling with `OUTPUT_HAS_RECYCLING`, otherwise it spans the ranges
//! of every input on the same audio channel, chained first to last.
//!
//! After any topology change the ranges are recomputed, the chain relinked
//! and each changed channel migrates its recall instances before a
//! [`GraphEvent::RecyclingChanged`] is queued.

use super::{AudioGraph, GraphEvent};
use crate::audio::AudioFlags;
use crate::channel::ChannelKind;
use crate::handle::{AudioId, ChannelId, RecyclingId};
use crate::recycling::{Recycling, RecyclingRange};
use crate::{Error, Result};
use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;

/// Ranges and their members before a mutation.
pub(crate) type RangeSnapshot =
    HashMap<ChannelId, (Option<RecyclingRange>, SmallVec<[RecyclingId; 8]>)>;

impl AudioGraph {
    /// Connect an output to an input of another audio.
    pub fn link_channel(&mut self, output: ChannelId, input: ChannelId) -> Result<()> {
        let out = self.channel(output)?;
        let inp = self.channel(input)?;
        if out.kind != ChannelKind::Output {
            return Err(Error::ChannelKindMismatch(output));
        }
        if inp.kind != ChannelKind::Input {
            return Err(Error::ChannelKindMismatch(input));
        }
        if out.link == Some(input) {
            return Ok(());
        }
        if out.link.is_some() || inp.link.is_some() {
            return Err(Error::RecyclingRangeConflict { output, input });
        }
        if self.feeds(inp.audio, out.audio) {
            return Err(Error::LoopInLink { output, input });
        }

        let before = self.range_snapshot();
        if let Some(c) = self.channels.get_mut(&output) {
            c.link = Some(input);
        }
        if let Some(c) = self.channels.get_mut(&input) {
            c.link = Some(output);
        }
        self.sync_ownership(input);
        self.refresh_recyclings(before);
        self.emit(GraphEvent::Linked { output, input });
        tracing::debug!(%output, %input, "channels linked");
        Ok(())
    }

    /// Drop the link of `channel`, if any.
    pub fn unlink_channel(&mut self, channel: ChannelId) -> Result<()> {
        let Some(other) = self.channel(channel)?.link else {
            return Ok(());
        };
        let before = self.range_snapshot();
        self.clear_link(channel, other);
        self.refresh_recyclings(before);
        Ok(())
    }

    /// Whether `upstream` feeds `audio`, directly or through links. An audio
    /// feeds itself.
    pub fn feeds(&self, upstream: AudioId, audio: AudioId) -> bool {
        let mut stack = vec![audio];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == upstream {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            let Some(node) = self.audios.get(&current) else {
                continue;
            };
            stack.extend(
                node.input
                    .iter()
                    .filter_map(|i| self.channels.get(i)?.link)
                    .filter_map(|o| self.channels.get(&o).map(|c| c.audio)),
            );
        }
        false
    }

    pub(crate) fn clear_link(&mut self, a: ChannelId, b: ChannelId) {
        for id in [a, b] {
            if let Some(c) = self.channels.get_mut(&id) {
                c.link = None;
            }
        }
        let (output, input) = match self.channels.get(&a).map(|c| c.kind) {
            Some(ChannelKind::Output) => (a, b),
            _ => (b, a),
        };
        self.sync_ownership(input);
        self.emit(GraphEvent::Unlinked { output, input });
        tracing::debug!(%output, %input, "channels unlinked");
    }

    /// Allocate or release the channel's own recycling per the audio flags.
    /// Released recyclings are freed by the next refresh.
    pub(crate) fn sync_ownership(&mut self, channel: ChannelId) {
        let Some(ch) = self.channels.get(&channel) else {
            return;
        };
        let Some(audio) = self.audios.get(&ch.audio) else {
            return;
        };
        let should_own = match ch.kind {
            ChannelKind::Output => audio.flags.contains(AudioFlags::OUTPUT_HAS_RECYCLING),
            ChannelKind::Input => {
                audio.flags.contains(AudioFlags::INPUT_HAS_RECYCLING) && ch.link.is_none()
            }
        };
        let owned = ch.own_recycling;
        match (should_own, owned) {
            (true, None) => {
                let id = self.alloc.recycling();
                self.recyclings.insert(id, Recycling::new(id, channel));
                if let Some(ch) = self.channels.get_mut(&channel) {
                    ch.own_recycling = Some(id);
                }
            }
            (false, Some(_)) => {
                if let Some(ch) = self.channels.get_mut(&channel) {
                    ch.own_recycling = None;
                }
            }
            _ => {}
        }
    }

    pub(crate) fn range_snapshot(&self) -> RangeSnapshot {
        self.channels
            .values()
            .map(|c| (c.id, (c.range, self.channel_recyclings(c.id))))
            .collect()
    }

    /// Recompute every range, relink the chain, migrate dependents of changed
    /// channels and free recyclings nobody owns any more.
    pub(crate) fn refresh_recyclings(&mut self, before: RangeSnapshot) {
        let mut ids: Vec<ChannelId> = self.channels.keys().copied().collect();
        ids.sort();
        let mut ranges = HashMap::new();
        for id in &ids {
            self.compute_range(*id, &mut ranges, 0);
        }
        self.relink_chain(&ranges);
        for id in &ids {
            if let Some(channel) = self.channels.get_mut(id) {
                channel.range = ranges.get(id).copied().flatten();
            }
        }

        for id in ids {
            let new = self.channels.get(&id).and_then(|c| c.range);
            let new_members = self.channel_recyclings(id);
            let (old, old_members) = before.get(&id).cloned().unwrap_or_default();
            if old == new && old_members == new_members {
                continue;
            }
            let removed: SmallVec<[RecyclingId; 8]> = old_members
                .iter()
                .copied()
                .filter(|r| !new_members.contains(r))
                .collect();
            let added: SmallVec<[RecyclingId; 8]> = new_members
                .iter()
                .copied()
                .filter(|r| !old_members.contains(r))
                .collect();
            self.migrate_channel(id, &removed, &added);
            self.emit(GraphEvent::RecyclingChanged {
                channel: id,
                old,
                new,
            });
        }

        let orphaned: Vec<RecyclingId> = self
            .recyclings
            .iter()
            .filter(|(id, r)| {
                self.channels
                    .get(&r.channel)
                    .and_then(|c| c.own_recycling)
                    != Some(**id)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in orphaned {
            self.free_recycling(id);
        }
    }

    fn compute_range(
        &self,
        channel: ChannelId,
        memo: &mut HashMap<ChannelId, Option<RecyclingRange>>,
        depth: usize,
    ) -> Option<RecyclingRange> {
        if let Some(range) = memo.get(&channel) {
            return *range;
        }
        if depth > self.channels.len() {
            return None;
        }
        let ch = self.channels.get(&channel)?;
        let range = match (ch.own_recycling, ch.kind) {
            (Some(own), _) => Some(RecyclingRange::single(own)),
            (None, ChannelKind::Input) => ch
                .link
                .and_then(|output| self.compute_range(output, memo, depth + 1)),
            (None, ChannelKind::Output) => {
                let spans: SmallVec<[RecyclingRange; 8]> = self
                    .fan_in(channel)
                    .into_iter()
                    .filter_map(|input| self.compute_range(input, memo, depth + 1))
                    .collect();
                match (spans.first(), spans.last()) {
                    (Some(first), Some(last)) => Some(RecyclingRange {
                        first: first.first,
                        last: last.last,
                    }),
                    _ => None,
                }
            }
        };
        memo.insert(channel, range);
        range
    }

    /// Inputs on the same audio channel as `output`, in pad order.
    fn fan_in(&self, output: ChannelId) -> SmallVec<[ChannelId; 8]> {
        let Some(ch) = self.channels.get(&output) else {
            return SmallVec::new();
        };
        let Some(audio) = self.audios.get(&ch.audio) else {
            return SmallVec::new();
        };
        (0..audio.input_pads)
            .filter_map(|pad| audio.channel_at(ChannelKind::Input, pad, ch.audio_channel))
            .collect()
    }

    fn relink_chain(&mut self, ranges: &HashMap<ChannelId, Option<RecyclingRange>>) {
        for recycling in self.recyclings.values_mut() {
            recycling.next = None;
            recycling.prev = None;
        }
        let mut links: Vec<(RecyclingId, RecyclingId)> = Vec::new();
        for channel in self.channels.values() {
            if channel.kind != ChannelKind::Output || channel.own_recycling.is_some() {
                continue;
            }
            let spans: SmallVec<[RecyclingRange; 8]> = self
                .fan_in(channel.id)
                .into_iter()
                .filter_map(|input| ranges.get(&input).copied().flatten())
                .collect();
            links.extend(spans.windows(2).map(|pair| (pair[0].last, pair[1].first)));
        }
        for (from, to) in links {
            if let Some(r) = self.recyclings.get_mut(&from) {
                r.next = Some(to);
            }
            if let Some(r) = self.recyclings.get_mut(&to) {
                r.prev = Some(from);
            }
        }
    }

    /// Drop a recycling together with its signals and anything running on them.
    pub(crate) fn free_recycling(&mut self, id: RecyclingId) {
        let Some(recycling) = self.recyclings.get(&id) else {
            return;
        };
        let signals = recycling.signals.clone();
        for signal in signals {
            self.kill_owned_by_signal(signal);
            self.remove_signal(signal);
            for context in self.contexts.values_mut() {
                context.feeds.retain(|f| *f != signal);
            }
        }
        self.kill_owned_by_recycling(id);
        self.recyclings.remove(&id);
        tracing::trace!(recycling = %id, "recycling freed");
    }
}
