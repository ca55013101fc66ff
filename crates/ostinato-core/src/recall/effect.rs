use super::run::{RunCtx, Stage};
use super::{PortCell, RecallOwner};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Waveform {
    Sine,
    Square,
    Saw,
}

impl Waveform {
    /// Value at `phase` in `[0, 1)`.
    pub fn at(self, phase: f64) -> f64 {
        match self {
            Self::Sine => (TAU * phase).sin(),
            Self::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Self::Saw => 2.0 * phase - 1.0,
        }
    }
}

/// In-process effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectOp {
    /// Amplitude modulation in `run_inter`, ports `freq` and `depth`.
    Lfo,
    /// Synthesis added in `run_pre`, ports `freq` and `amplitude`.
    Generator(Waveform),
}

#[derive(Debug, Clone)]
pub struct EffectRecall {
    op: EffectOp,
    phase: f64,
    freq: Option<Arc<PortCell>>,
    level: Option<Arc<PortCell>>,
}

impl EffectRecall {
    pub fn new(op: EffectOp) -> Self {
        Self {
            op,
            phase: 0.0,
            freq: None,
            level: None,
        }
    }

    pub fn op(&self) -> EffectOp {
        self.op
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    pub(crate) fn duplicate(&self) -> Self {
        Self::new(self.op)
    }

    pub(crate) fn wanted_ports(&self) -> &'static [&'static str] {
        match self.op {
            EffectOp::Lfo => &["freq", "depth"],
            EffectOp::Generator(_) => &["freq", "amplitude"],
        }
    }

    pub(crate) fn bind(&mut self, cells: &[Option<Arc<PortCell>>]) {
        self.freq = cells.first().cloned().flatten();
        self.level = cells.get(1).cloned().flatten();
    }

    pub(crate) fn run(&mut self, ctx: &mut RunCtx<'_, '_>) -> Result<()> {
        let RecallOwner::AudioSignal(signal) = ctx.owner else {
            return Ok(());
        };
        match (self.op, ctx.stage) {
            (EffectOp::Lfo, Stage::Inter) | (EffectOp::Generator(_), Stage::Pre) => {}
            _ => return Ok(()),
        }
        let samplerate = f64::from(ctx.view.config.samplerate);
        let step = self.freq.as_ref().map_or(0.0, |c| c.get()) / samplerate;
        let level = self.level.as_ref().map_or(0.0, |c| c.get());
        let Some(chunk) = ctx
            .view
            .signals
            .get_mut(&signal)
            .and_then(|s| s.current_chunk_mut())
        else {
            return Ok(());
        };

        let len = chunk.len();
        let phase = self.phase;
        match self.op {
            EffectOp::Lfo => chunk.apply_gain(0, 1, len, |frame| {
                let p = (phase + frame as f64 * step).fract();
                1.0 - level * 0.5 * (1.0 - (TAU * p).cos())
            }),
            EffectOp::Generator(waveform) => chunk.add_normalized(0, 1, len, |frame| {
                waveform.at((phase + frame as f64 * step).fract()) * level
            }),
        }
        self.phase = (phase + len as f64 * step).fract();
        Ok(())
    }
}
