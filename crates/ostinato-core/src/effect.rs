//! Effect processing units hosted by [`RecallKind::HostEffect`](crate::RecallKind).
//!
//! This is the boundary to plugin formats. A unit describes its ports and
//! instantiates per-voice handles; the host recall connects control ports to
//! its port cells, activates the handle in `run_init_pre` and feeds it `f32`
//! frames converted from the signal's own format.

use crate::recall::{PortCell, PortRange};
use crate::{Error, Result};
use hashbrown::HashMap;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum EffectPortKind {
    AudioInput,
    AudioOutput,
    Control(PortRange),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffectPortDescriptor {
    pub index: usize,
    pub name: String,
    pub kind: EffectPortKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffectDescriptor {
    pub name: String,
    pub ports: Vec<EffectPortDescriptor>,
}

impl EffectDescriptor {
    pub fn controls(&self) -> impl Iterator<Item = (&EffectPortDescriptor, &PortRange)> {
        self.ports.iter().filter_map(|p| match &p.kind {
            EffectPortKind::Control(range) => Some((p, range)),
            _ => None,
        })
    }
}

/// What a port index gets connected to.
#[derive(Debug, Clone)]
pub enum PortConnection {
    AudioInput,
    AudioOutput,
    Control(Arc<PortCell>),
}

/// A live handle created by [`EffectUnit::instantiate`].
pub trait EffectInstance: Send {
    fn connect_port(&mut self, index: usize, connection: PortConnection) -> Result<()>;

    fn activate(&mut self);

    fn deactivate(&mut self);

    /// Process `input.len()` frames. `output` has the same length.
    fn run(&mut self, input: &[f32], output: &mut [f32]);
}

/// A loadable effect.
pub trait EffectUnit: Send + Sync {
    fn descriptor(&self) -> &EffectDescriptor;

    fn instantiate(&self, samplerate: u32) -> Result<Box<dyn EffectInstance>>;
}

/// Effect units available to a graph, by name.
///
/// Constructed once by the engine and handed to the graph; cloning shares
/// the same table.
#[derive(Clone)]
pub struct EffectRegistry {
    units: Arc<RwLock<HashMap<String, Arc<dyn EffectUnit>>>>,
}

impl EffectRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            units: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn register(&self, name: impl Into<String>, unit: Arc<dyn EffectUnit>) {
        self.units.write().insert(name.into(), unit);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn EffectUnit>> {
        self.units
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownEffect(name.to_string()))
    }

    pub fn list_types(&self) -> Vec<String> {
        self.units.read().keys().cloned().collect()
    }

    pub fn has_type(&self, name: &str) -> bool {
        self.units.read().contains_key(name)
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.units.write().remove(name).is_some()
    }
}

impl Default for EffectRegistry {
    fn default() -> Self {
        let registry = Self::new();
        registry.register("gain", Arc::new(GainUnit::new()));
        registry
    }
}

impl std::fmt::Debug for EffectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectRegistry")
            .field("units", &self.list_types())
            .finish()
    }
}

/// Built-in unit: input times the `gain` control.
pub struct GainUnit {
    descriptor: EffectDescriptor,
}

impl GainUnit {
    pub fn new() -> Self {
        Self {
            descriptor: EffectDescriptor {
                name: "gain".into(),
                ports: vec![
                    EffectPortDescriptor {
                        index: 0,
                        name: "in".into(),
                        kind: EffectPortKind::AudioInput,
                    },
                    EffectPortDescriptor {
                        index: 1,
                        name: "out".into(),
                        kind: EffectPortKind::AudioOutput,
                    },
                    EffectPortDescriptor {
                        index: 2,
                        name: "gain".into(),
                        kind: EffectPortKind::Control(PortRange::linear(0.0, 4.0, 1.0)),
                    },
                ],
            },
        }
    }
}

impl Default for GainUnit {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectUnit for GainUnit {
    fn descriptor(&self) -> &EffectDescriptor {
        &self.descriptor
    }

    fn instantiate(&self, _samplerate: u32) -> Result<Box<dyn EffectInstance>> {
        Ok(Box::new(GainInstance {
            gain: None,
            active: false,
        }))
    }
}

struct GainInstance {
    gain: Option<Arc<PortCell>>,
    active: bool,
}

impl EffectInstance for GainInstance {
    fn connect_port(&mut self, index: usize, connection: PortConnection) -> Result<()> {
        match (index, connection) {
            (0, PortConnection::AudioInput) | (1, PortConnection::AudioOutput) => Ok(()),
            (2, PortConnection::Control(cell)) => {
                self.gain = Some(cell);
                Ok(())
            }
            (index, _) => Err(Error::EffectUnit(format!(
                "gain: port {index} cannot take this connection"
            ))),
        }
    }

    fn activate(&mut self) {
        self.active = true;
    }

    fn deactivate(&mut self) {
        self.active = false;
    }

    fn run(&mut self, input: &[f32], output: &mut [f32]) {
        let gain = match (&self.gain, self.active) {
            (Some(cell), true) => cell.get() as f32,
            (None, true) => 1.0,
            (_, false) => 0.0,
        };
        for (out, x) in output.iter_mut().zip(input) {
            *out = x * gain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = EffectRegistry::default();
        assert!(registry.has_type("gain"));
        assert!(matches!(registry.get("reverb"), Err(Error::UnknownEffect(_))));
    }

    #[test]
    fn test_clone_shares_table() {
        let registry = EffectRegistry::new();
        let clone = registry.clone();
        clone.register("gain", Arc::new(GainUnit::new()));
        assert!(registry.has_type("gain"));
        assert!(registry.unregister("gain"));
        assert!(!clone.has_type("gain"));
    }

    #[test]
    fn test_gain_unit_runs_with_control() {
        let unit = GainUnit::new();
        let mut instance = unit.instantiate(48000).unwrap();
        let cell = Arc::new(PortCell::new(0.5));
        instance.connect_port(0, PortConnection::AudioInput).unwrap();
        instance.connect_port(1, PortConnection::AudioOutput).unwrap();
        instance
            .connect_port(2, PortConnection::Control(Arc::clone(&cell)))
            .unwrap();
        assert!(instance.connect_port(5, PortConnection::AudioInput).is_err());
        instance.activate();

        let mut out = [0.0f32; 3];
        instance.run(&[1.0, -1.0, 0.5], &mut out);
        assert_eq!(out, [0.5, -0.5, 0.25]);

        cell.set(2.0);
        instance.run(&[1.0, -1.0, 0.5], &mut out);
        assert_eq!(out, [2.0, -2.0, 1.0]);
    }
}
