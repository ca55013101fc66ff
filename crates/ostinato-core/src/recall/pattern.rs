use super::run::{RunCtx, Stage, StageAction};
use super::{PortCell, RecallOwner};
use crate::channel::ChannelKind;
use crate::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// On/off grid of `pads × steps`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    steps: usize,
    rows: Vec<Vec<bool>>,
}

impl Pattern {
    pub fn new(pads: usize, steps: usize) -> Result<Self> {
        if steps == 0 {
            return Err(Error::InvalidPattern("a pattern needs at least one step".into()));
        }
        Ok(Self {
            steps,
            rows: vec![vec![false; steps]; pads],
        })
    }

    /// One row per pad: `x` is on, `.` is off.
    ///
    /// ```
    /// use ostinato_core::Pattern;
    ///
    /// let pattern = Pattern::from_rows(&["x...x...", "..x...x."]).unwrap();
    /// assert!(pattern.is_set(1, 2));
    /// ```
    pub fn from_rows(rows: &[&str]) -> Result<Self> {
        let steps = rows.first().map_or(0, |r| r.chars().count());
        let mut pattern = Self::new(rows.len(), steps)?;
        for (pad, row) in rows.iter().enumerate() {
            if row.chars().count() != steps {
                return Err(Error::InvalidPattern(format!(
                    "row {pad} has {} steps, expected {steps}",
                    row.chars().count()
                )));
            }
            for (step, c) in row.chars().enumerate() {
                pattern.rows[pad][step] = match c {
                    'x' | 'X' | '1' => true,
                    '.' | '-' | '0' => false,
                    other => {
                        return Err(Error::InvalidPattern(format!(
                            "unexpected '{other}' in row {pad}"
                        )))
                    }
                };
            }
        }
        Ok(pattern)
    }

    pub fn pads(&self) -> usize {
        self.rows.len()
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn is_set(&self, pad: usize, step: usize) -> bool {
        self.rows
            .get(pad)
            .and_then(|row| row.get(step))
            .copied()
            .unwrap_or(false)
    }

    pub fn set(&mut self, pad: usize, step: usize, on: bool) -> Result<()> {
        let steps = self.steps;
        let cell = self
            .rows
            .get_mut(pad)
            .and_then(|row| row.get_mut(step))
            .ok_or_else(|| {
                Error::InvalidPattern(format!("no bit at pad {pad}, step {step} (steps {steps})"))
            })?;
        *cell = on;
        Ok(())
    }

    pub fn toggle(&mut self, pad: usize, step: usize) -> Result<()> {
        let on = self.is_set(pad, step);
        self.set(pad, step, !on)
    }

    /// Pads with the bit set at `step`.
    pub fn active_pads(&self, step: usize) -> impl Iterator<Item = usize> + '_ {
        self.rows
            .iter()
            .enumerate()
            .filter(move |(_, row)| row.get(step).copied().unwrap_or(false))
            .map(|(pad, _)| pad)
    }
}

/// Starts notes on the input pads whose bits are set at each fired step.
///
/// The pattern is shared between the template and its instances, so edits
/// reach running sequences at the next step.
#[derive(Debug, Clone)]
pub struct PatternRecall {
    pattern: Arc<RwLock<Pattern>>,
    looping: Option<Arc<PortCell>>,
    notes: u64,
}

impl PatternRecall {
    pub(crate) const PORTS: &'static [&'static str] = &["loop"];

    pub fn new(pattern: Pattern) -> Self {
        Self {
            pattern: Arc::new(RwLock::new(pattern)),
            looping: None,
            notes: 0,
        }
    }

    pub fn pattern(&self) -> Arc<RwLock<Pattern>> {
        Arc::clone(&self.pattern)
    }

    pub fn notes_started(&self) -> u64 {
        self.notes
    }

    pub(crate) fn duplicate(&self) -> Self {
        Self {
            pattern: Arc::clone(&self.pattern),
            looping: None,
            notes: 0,
        }
    }

    pub(crate) fn bind(&mut self, cells: &[Option<Arc<PortCell>>]) {
        self.looping = cells.first().cloned().flatten();
    }

    pub(crate) fn run(&mut self, ctx: &mut RunCtx<'_, '_>) -> Result<()> {
        let (Stage::Pre, RecallOwner::Audio(audio)) = (ctx.stage, ctx.owner) else {
            return Ok(());
        };
        let Some(audio) = ctx.view.audios.get(&audio) else {
            return Ok(());
        };
        let looping = self.looping.as_ref().is_some_and(|c| c.get() >= 0.5);
        let pattern = self.pattern.read();
        let steps = pattern.steps() as u64;
        for fire in ctx.steps {
            if !looping && fire.step >= steps {
                ctx.actions.push(StageAction::Done(ctx.handle));
                break;
            }
            let step = (fire.step % steps) as usize;
            for pad in pattern.active_pads(step) {
                for audio_channel in 0..audio.audio_channels() {
                    if let Some(channel) = audio.channel_at(ChannelKind::Input, pad, audio_channel) {
                        ctx.actions.push(StageAction::StartNote {
                            recall_id: ctx.recall_id,
                            channel,
                            attack: fire.attack,
                        });
                        self.notes += 1;
                    }
                }
            }
        }
        Ok(())
    }
}
