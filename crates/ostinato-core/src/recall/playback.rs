use super::run::{RunCtx, Stage};
use super::RecallOwner;
use crate::buffer::CopyMode;
use crate::{Error, Result};

/// Soundcard sink.
///
/// Each signal-level instance mixes its signal's current chunk into the
/// soundcard at the channel's `audio_channel`. A sub-block whose lock is not
/// free within the budget is skipped for this period and counted; the write
/// is not retried later in the period.
#[derive(Debug, Clone, Default)]
pub struct PlaybackRecall {
    missed: u64,
}

impl PlaybackRecall {
    /// Sub-block writes this instance skipped.
    pub fn missed_sub_blocks(&self) -> u64 {
        self.missed
    }

    pub(crate) fn run(&mut self, ctx: &mut RunCtx<'_, '_>) -> Result<()> {
        let (Stage::Inter, RecallOwner::AudioSignal(signal)) = (ctx.stage, ctx.owner) else {
            return Ok(());
        };
        let Some(card) = ctx.io.soundcard else {
            return Ok(());
        };
        let Some(audio_channel) = ctx
            .channel
            .and_then(|c| ctx.view.channels.get(&c))
            .map(|c| c.audio_channel())
        else {
            return Ok(());
        };
        let Some(chunk) = ctx.view.signals.get(&signal).and_then(|s| s.current_chunk()) else {
            return Ok(());
        };

        let mode = CopyMode::resolve(card.presets().format, chunk.format())?;
        for index in 0..card.sub_block_count() {
            match card.try_lock_sub_block(index, ctx.io.lock_timeout) {
                Ok(mut block) => block.mix_channel(audio_channel, chunk, mode)?,
                Err(Error::SubBlockLockTimeout { index }) => {
                    self.missed += 1;
                    ctx.io.stats.missed_sub_blocks += 1;
                    tracing::warn!(recall = %ctx.handle, index, "sub-block busy, write skipped");
                }
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }
}
