use super::run::{RunCtx, Stage};
use super::{PortCell, RecallOwner};
use crate::Result;
use std::sync::Arc;

/// Scales every covered signal by the channel's `volume` port.
#[derive(Debug, Clone, Default)]
pub struct VolumeRecall {
    volume: Option<Arc<PortCell>>,
}

impl VolumeRecall {
    pub(crate) const PORTS: &'static [&'static str] = &["volume"];

    pub(crate) fn bind(&mut self, cells: &[Option<Arc<PortCell>>]) {
        self.volume = cells.first().cloned().flatten();
    }

    /// Current gain, unity until bound.
    pub fn gain(&self) -> f64 {
        self.volume.as_ref().map_or(1.0, |c| c.get())
    }

    pub(crate) fn run(&mut self, ctx: &mut RunCtx<'_, '_>) -> Result<()> {
        let (Stage::Inter, RecallOwner::AudioSignal(signal)) = (ctx.stage, ctx.owner) else {
            return Ok(());
        };
        let gain = self.gain();
        if gain == 1.0 {
            return Ok(());
        }
        if let Some(chunk) = ctx
            .view
            .signals
            .get_mut(&signal)
            .and_then(|s| s.current_chunk_mut())
        {
            let len = chunk.len();
            chunk.apply_gain(0, 1, len, |_| gain);
        }
        Ok(())
    }
}
