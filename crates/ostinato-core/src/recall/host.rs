use super::run::{RunCtx, Stage};
use super::RecallOwner;
use crate::effect::{EffectInstance, EffectPortKind, EffectUnit, PortConnection};
use crate::{Error, Result};
use std::sync::Arc;

/// Adapter over an [`EffectUnit`].
///
/// `run_init_pre` instantiates the unit, connects control ports to this
/// instance's port cells and activates it. `run_inter` converts each covered
/// signal chunk to `f32`, runs the unit and converts back. Dropping the
/// instance deactivates the unit.
pub struct HostEffectRecall {
    effect: String,
    unit: Option<Arc<dyn EffectUnit>>,
    instance: Option<Box<dyn EffectInstance>>,
    input: Vec<f32>,
    output: Vec<f32>,
}

impl HostEffectRecall {
    pub(crate) fn unresolved(effect: String) -> Self {
        Self {
            effect,
            unit: None,
            instance: None,
            input: Vec::new(),
            output: Vec::new(),
        }
    }

    pub(crate) fn resolve(&mut self, unit: Arc<dyn EffectUnit>) {
        self.unit = Some(unit);
    }

    pub fn effect(&self) -> &str {
        &self.effect
    }

    pub fn unit(&self) -> Option<&Arc<dyn EffectUnit>> {
        self.unit.as_ref()
    }

    /// Whether a unit instance is live.
    pub fn is_active(&self) -> bool {
        self.instance.is_some()
    }

    pub(crate) fn duplicate(&self) -> Self {
        Self {
            effect: self.effect.clone(),
            unit: self.unit.clone(),
            instance: None,
            input: Vec::new(),
            output: Vec::new(),
        }
    }

    pub(crate) fn run(&mut self, ctx: &mut RunCtx<'_, '_>) -> Result<()> {
        let RecallOwner::Channel(channel) = ctx.owner else {
            return Ok(());
        };
        match ctx.stage {
            Stage::InitPre => self.instantiate(ctx),
            Stage::Inter => {
                let Some(instance) = self.instance.as_mut() else {
                    return Ok(());
                };
                for recycling in ctx.view.channel_recyclings(channel) {
                    for signal in ctx.view.covered_signals(recycling, ctx.recall_id) {
                        let Some(chunk) = ctx
                            .view
                            .signals
                            .get_mut(&signal)
                            .and_then(|s| s.current_chunk_mut())
                        else {
                            continue;
                        };
                        self.input.resize(chunk.len(), 0.0);
                        self.output.resize(chunk.len(), 0.0);
                        chunk.read_f32(0, 1, &mut self.input)?;
                        instance.run(&self.input, &mut self.output);
                        chunk.write_f32(0, 1, &self.output)?;
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn instantiate(&mut self, ctx: &mut RunCtx<'_, '_>) -> Result<()> {
        let unit = self
            .unit
            .as_ref()
            .ok_or_else(|| Error::UnknownEffect(self.effect.clone()))?;
        let mut instance = unit.instantiate(ctx.view.config.samplerate)?;
        for port in &unit.descriptor().ports {
            let connection = match &port.kind {
                EffectPortKind::AudioInput => PortConnection::AudioInput,
                EffectPortKind::AudioOutput => PortConnection::AudioOutput,
                EffectPortKind::Control(_) => {
                    let cell = ctx.ports.get(&port.name).ok_or_else(|| Error::UnknownPort {
                        recall: ctx.handle,
                        port: port.name.clone(),
                    })?;
                    PortConnection::Control(Arc::clone(cell.cell()))
                }
            };
            instance.connect_port(port.index, connection)?;
        }
        instance.activate();
        let frames = ctx.view.config.buffer_size;
        self.input = vec![0.0; frames];
        self.output = vec![0.0; frames];
        self.instance = Some(instance);
        tracing::debug!(recall = %ctx.handle, effect = %self.effect, "effect unit activated");
        Ok(())
    }
}

impl Drop for HostEffectRecall {
    fn drop(&mut self) {
        if let Some(mut instance) = self.instance.take() {
            instance.deactivate();
        }
    }
}

impl std::fmt::Debug for HostEffectRecall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostEffectRecall")
            .field("effect", &self.effect)
            .field("resolved", &self.unit.is_some())
            .field("active", &self.instance.is_some())
            .finish()
    }
}
