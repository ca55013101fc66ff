use super::run::{RunCtx, Stage};
use super::RecallOwner;
use crate::buffer::{copy_buffer_to_buffer, CopyMode};
use crate::handle::{AudioSignalId, ChannelId};
use crate::Result;

/// Mixes the signals of its context into an accumulator signal in the
/// destination channel's own recycling.
///
/// The accumulator ("feed") is created when the channel-level instance is
/// duplicated; its recycling-level children share it.
#[derive(Debug, Clone)]
pub struct MixerRecall {
    destination: ChannelId,
    feed: Option<AudioSignalId>,
}

impl MixerRecall {
    pub fn new(destination: ChannelId) -> Self {
        Self {
            destination,
            feed: None,
        }
    }

    pub fn destination(&self) -> ChannelId {
        self.destination
    }

    pub fn feed(&self) -> Option<AudioSignalId> {
        self.feed
    }

    pub(crate) fn set_feed(&mut self, feed: AudioSignalId) {
        self.feed = Some(feed);
    }

    pub(crate) fn duplicate(&self) -> Self {
        self.clone()
    }

    pub(crate) fn run(&mut self, ctx: &mut RunCtx<'_, '_>) -> Result<()> {
        let (Stage::Inter, RecallOwner::Recycling(recycling)) = (ctx.stage, ctx.owner) else {
            return Ok(());
        };
        let Some(feed_id) = self.feed else {
            return Ok(());
        };
        let sources = ctx.view.covered_signals(recycling, ctx.recall_id);
        let Some(mut feed) = ctx.view.signals.remove(&feed_id) else {
            return Ok(());
        };

        let mut result = Ok(());
        for source in sources.iter().filter(|id| **id != feed_id) {
            let (Some(dest), Some(src)) = (
                feed.current_chunk_mut(),
                ctx.view.signals.get(source).and_then(|s| s.current_chunk()),
            ) else {
                continue;
            };
            let count = src.len().min(dest.len());
            result = CopyMode::resolve(dest.format(), src.format())
                .and_then(|mode| copy_buffer_to_buffer(dest, 0, 1, src, 0, 1, count, mode));
            if result.is_err() {
                break;
            }
        }
        ctx.view.signals.insert(feed_id, feed);
        result
    }
}
