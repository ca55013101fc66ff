use super::run::{RunCtx, Stage};
use super::{PortCell, RecallOwner};
use crate::Result;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::sync::Arc;

/// A sequencer step that starts inside the current period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepFire {
    /// Steps since the counter started.
    pub step: u64,
    /// Frame offset into the period.
    pub attack: usize,
}

/// Tempo counter. Each `run_pre` reports the steps that start in this period.
#[derive(Debug, Clone, Default)]
pub struct DelayRecall {
    bpm: Option<Arc<PortCell>>,
    tact: Option<Arc<PortCell>>,
    frame: u64,
    next_step_at: f64,
    step: u64,
    beat_position: f64,
    fired: SmallVec<[StepFire; 4]>,
}

impl DelayRecall {
    pub(crate) const PORTS: &'static [&'static str] = &["bpm", "tact"];

    pub(crate) fn bind(&mut self, cells: &[Option<Arc<PortCell>>]) {
        self.bpm = cells.first().cloned().flatten();
        self.tact = cells.get(1).cloned().flatten();
    }

    /// Steps fired during the last period.
    pub fn fired(&self) -> &[StepFire] {
        &self.fired
    }

    /// Steps fired since start.
    pub fn steps(&self) -> u64 {
        self.step
    }

    /// Whole beats elapsed.
    pub fn beats(&self) -> u64 {
        self.beat_position.floor() as u64
    }

    /// Frames counted since start.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub(crate) fn count(&mut self, frames: usize, frames_per_step: f64, frames_per_beat: f64) {
        self.fired.clear();
        let end = self.frame + frames as u64;
        let frames_per_step = frames_per_step.max(1.0);
        while self.next_step_at < end as f64 {
            let at = (self.next_step_at.floor() as u64).max(self.frame);
            self.fired.push(StepFire {
                step: self.step,
                attack: (at - self.frame) as usize,
            });
            self.step += 1;
            self.next_step_at += frames_per_step;
        }
        self.frame = end;
        self.beat_position += frames as f64 / frames_per_beat.max(1.0);
    }

    pub(crate) fn run(&mut self, ctx: &mut RunCtx<'_, '_>) -> Result<()> {
        if ctx.stage != Stage::Pre || !matches!(ctx.owner, RecallOwner::Audio(_)) {
            return Ok(());
        }
        let config = ctx.view.config;
        let bpm = self.bpm.as_ref().map_or(config.bpm, |c| c.get());
        let tact = self.tact.as_ref().map_or(config.delay_factor, |c| c.get());
        self.count(
            config.buffer_size,
            config.frames_per_step(bpm, tact),
            config.frames_per_step(bpm, 1.0),
        );
        Ok(())
    }
}
