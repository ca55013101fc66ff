use super::run::{RunCtx, Stage};
use super::{PortCell, RecallOwner};
use crate::Result;
use std::sync::Arc;

/// Peak meter. Reads each covered signal after processing and publishes the
/// channel's largest absolute sample of the tic on its `peak` port.
#[derive(Debug, Clone, Default)]
pub struct PeakRecall {
    peak: Option<Arc<PortCell>>,
}

impl PeakRecall {
    pub(crate) const PORTS: &'static [&'static str] = &["peak"];

    pub(crate) fn bind(&mut self, cells: &[Option<Arc<PortCell>>]) {
        self.peak = cells.first().cloned().flatten();
    }

    /// Last published peak, 0 until bound.
    pub fn peak(&self) -> f64 {
        self.peak.as_ref().map_or(0.0, |c| c.get())
    }

    pub(crate) fn run(&mut self, ctx: &mut RunCtx<'_, '_>) -> Result<()> {
        let Some(cell) = &self.peak else {
            return Ok(());
        };
        match (ctx.stage, ctx.owner) {
            // the channel instance runs before its signal children
            (Stage::Pre, RecallOwner::Channel(_)) => cell.set(0.0),
            (Stage::Post, RecallOwner::AudioSignal(signal)) => {
                let Some(chunk) = ctx.view.signals.get(&signal).and_then(|s| s.current_chunk())
                else {
                    return Ok(());
                };
                let peak = (0..chunk.len())
                    .filter_map(|i| chunk.sample(i))
                    .fold(0.0f64, |acc, s| acc.max(s.abs()));
                if peak > cell.get() {
                    cell.set(peak);
                }
            }
            _ => {}
        }
        Ok(())
    }
}
