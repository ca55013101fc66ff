//! Recyclings: time-ordered signal pools inside a channel.

use crate::audio_signal::AudioSignal;
use crate::handle::{AudioSignalId, ChannelId, RecallId, RecyclingId};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

/// Inclusive `first..=last` span of a recycling chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecyclingRange {
    pub first: RecyclingId,
    pub last: RecyclingId,
}

impl RecyclingRange {
    pub fn single(recycling: RecyclingId) -> Self {
        Self {
            first: recycling,
            last: recycling,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Recycling {
    pub(crate) id: RecyclingId,
    /// Channel that owns (allocated) this recycling.
    pub(crate) channel: ChannelId,
    pub(crate) signals: Vec<AudioSignalId>,
    pub(crate) template: Option<AudioSignalId>,
    pub(crate) next: Option<RecyclingId>,
    pub(crate) prev: Option<RecyclingId>,
}

impl Recycling {
    pub(crate) fn new(id: RecyclingId, channel: ChannelId) -> Self {
        Self {
            id,
            channel,
            signals: Vec::new(),
            template: None,
            next: None,
            prev: None,
        }
    }

    pub fn id(&self) -> RecyclingId {
        self.id
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Signals in start order, the template included.
    pub fn signals(&self) -> &[AudioSignalId] {
        &self.signals
    }

    /// The template signal, if one was loaded.
    pub fn template(&self) -> Option<AudioSignalId> {
        self.template
    }

    pub fn next(&self) -> Option<RecyclingId> {
        self.next
    }

    pub fn prev(&self) -> Option<RecyclingId> {
        self.prev
    }

    /// Insert keeping the set ordered by start tic then attack.
    pub(crate) fn insert_ordered(
        &mut self,
        signal: &AudioSignal,
        signals: &HashMap<AudioSignalId, AudioSignal>,
    ) {
        let key = (signal.start_tic, signal.attack());
        let position = self
            .signals
            .iter()
            .position(|id| {
                signals
                    .get(id)
                    .is_some_and(|other| (other.start_tic, other.attack()) > key)
            })
            .unwrap_or(self.signals.len());
        self.signals.insert(position, signal.id);
        if signal.is_template() {
            self.template = Some(signal.id);
        }
    }

    pub(crate) fn remove_signal(&mut self, signal: AudioSignalId) -> bool {
        if self.template == Some(signal) {
            self.template = None;
        }
        let before = self.signals.len();
        self.signals.retain(|id| *id != signal);
        before != self.signals.len()
    }

    /// Signals belonging to `recall_id`.
    pub fn find_by_recall_id<'a>(
        &'a self,
        recall_id: RecallId,
        signals: &'a HashMap<AudioSignalId, AudioSignal>,
    ) -> impl Iterator<Item = AudioSignalId> + 'a {
        self.signals.iter().copied().filter(move |id| {
            signals
                .get(id)
                .is_some_and(|s| s.recall_id() == Some(recall_id))
        })
    }
}
