//! Ports: named control cells of a recall.
//!
//! A port's value lives in a lock-free [`PortCell`]. Duplicating a recall
//! gives the instance a fresh cell holding a copy of the value, unless the
//! port is declared shared, in which case template and instances read the
//! same cell.
//!
//! ```
//! use ostinato_core::{PortRange, PortScale};
//!
//! let cutoff = PortRange::new(20.0, 20000.0, 1000.0, PortScale::Logarithmic);
//! let hz = cutoff.denormalize(0.5); // ~632 Hz
//! assert!((cutoff.normalize(hz) - 0.5).abs() < 1e-9);
//! ```

use crate::{Error, Result};
use atomic_float::AtomicF64;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Cache-line aligned atomic control value.
#[derive(Debug)]
#[repr(align(64))]
pub struct PortCell {
    value: AtomicF64,
}

impl PortCell {
    pub fn new(value: f64) -> Self {
        Self {
            value: AtomicF64::new(value),
        }
    }

    #[inline]
    pub fn get(&self) -> f64 {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, value: f64) {
        self.value.store(value, Ordering::Release);
    }

    #[inline]
    pub fn swap(&self, value: f64) -> f64 {
        self.value.swap(value, Ordering::AcqRel)
    }
}

impl Default for PortCell {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// How a port value maps to the normalized 0-1 range.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum PortScale {
    #[default]
    Linear,
    /// `real = min * (max/min)^normalized`, requires `min > 0`.
    Logarithmic,
    /// Below the midpoint is `min`, otherwise `max`.
    Toggle,
    /// Quantized to whole numbers.
    Integer,
}

/// Valid values of a port.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortRange {
    pub min: f64,
    pub max: f64,
    pub default: f64,
    pub scale: PortScale,
}

impl PortRange {
    pub fn new(min: f64, max: f64, default: f64, scale: PortScale) -> Self {
        debug_assert!(max > min, "max must be greater than min");
        Self {
            min,
            max,
            default: default.clamp(min, max),
            scale,
        }
    }

    pub fn linear(min: f64, max: f64, default: f64) -> Self {
        Self::new(min, max, default, PortScale::Linear)
    }

    pub fn logarithmic(min: f64, max: f64, default: f64) -> Self {
        debug_assert!(min > 0.0, "logarithmic scale requires min > 0");
        Self::new(min, max, default, PortScale::Logarithmic)
    }

    pub fn toggle(default_on: bool) -> Self {
        Self::new(0.0, 1.0, if default_on { 1.0 } else { 0.0 }, PortScale::Toggle)
    }

    pub fn integer(min: i64, max: i64, default: i64) -> Self {
        Self::new(min as f64, max as f64, default as f64, PortScale::Integer)
    }

    pub fn normalize(&self, value: f64) -> f64 {
        let value = value.clamp(self.min, self.max);
        let span = self.max - self.min;
        if span <= 0.0 {
            return 0.0;
        }
        match self.scale {
            PortScale::Linear => (value - self.min) / span,
            PortScale::Logarithmic if self.min > 0.0 => {
                (value.ln() - self.min.ln()) / (self.max.ln() - self.min.ln())
            }
            PortScale::Logarithmic => (value - self.min) / span,
            PortScale::Toggle => {
                if value >= (self.min + self.max) / 2.0 {
                    1.0
                } else {
                    0.0
                }
            }
            PortScale::Integer => (value.round() - self.min) / span,
        }
    }

    pub fn denormalize(&self, normalized: f64) -> f64 {
        let normalized = normalized.clamp(0.0, 1.0);
        let span = self.max - self.min;
        match self.scale {
            PortScale::Linear => self.min + normalized * span,
            PortScale::Logarithmic if self.min > 0.0 => {
                (self.min.ln() + normalized * (self.max.ln() - self.min.ln())).exp()
            }
            PortScale::Logarithmic => self.min + normalized * span,
            PortScale::Toggle => {
                if normalized >= 0.5 {
                    self.max
                } else {
                    self.min
                }
            }
            PortScale::Integer => (self.min + normalized * span).round(),
        }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::linear(0.0, 1.0, 0.5)
    }
}

/// A named control of a recall.
#[derive(Debug, Clone)]
pub struct Port {
    name: String,
    range: PortRange,
    cell: Arc<PortCell>,
    shared: bool,
}

impl Port {
    /// Port initialised to its range default.
    pub fn new(name: impl Into<String>, range: PortRange) -> Self {
        Self {
            name: name.into(),
            cell: Arc::new(PortCell::new(range.default)),
            range,
            shared: false,
        }
    }

    /// Declare the cell shared between a template and its instances.
    pub fn shared(mut self) -> Self {
        self.shared = true;
        self
    }

    pub fn with_value(self, value: f64) -> Self {
        self.cell.set(self.range.clamp(value));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn range(&self) -> &PortRange {
        &self.range
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    #[inline]
    pub fn value(&self) -> f64 {
        self.cell.get()
    }

    pub fn cell(&self) -> &Arc<PortCell> {
        &self.cell
    }

    /// Whether two ports read the same cell.
    pub fn shares_cell_with(&self, other: &Port) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// Copy for a duplicated instance.
    pub(crate) fn duplicate(&self) -> Port {
        let cell = if self.shared {
            Arc::clone(&self.cell)
        } else {
            Arc::new(PortCell::new(self.value()))
        };
        Port {
            name: self.name.clone(),
            range: self.range,
            cell,
            shared: self.shared,
        }
    }

    /// Range-checked write. Out of range values are rejected, not clamped.
    /// Range check without writing.
    pub(crate) fn check(&self, value: f64) -> Result<()> {
        if !value.is_finite() || !self.range.contains(value) {
            return Err(Error::PortOutOfRange {
                port: self.name.clone(),
                value,
                min: self.range.min,
                max: self.range.max,
            });
        }
        Ok(())
    }

    pub(crate) fn safe_write(&self, value: f64) -> Result<()> {
        self.check(value)?;
        let value = match self.range.scale {
            PortScale::Integer => value.round(),
            PortScale::Toggle => self.range.denormalize(self.range.normalize(value)),
            _ => value,
        };
        self.cell.set(value);
        Ok(())
    }
}

/// Ports of one recall, looked up by name.
#[derive(Debug, Clone, Default)]
pub struct PortMap {
    ports: SmallVec<[Port; 4]>,
}

impl PortMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, port: Port) {
        self.ports.retain(|p| p.name() != port.name());
        self.ports.push(port);
    }

    pub fn get(&self, name: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter()
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub(crate) fn duplicate(&self) -> PortMap {
        PortMap {
            ports: self.ports.iter().map(Port::duplicate).collect(),
        }
    }
}

impl FromIterator<Port> for PortMap {
    fn from_iter<I: IntoIterator<Item = Port>>(iter: I) -> Self {
        let mut map = PortMap::new();
        for port in iter {
            map.push(port);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_linear_roundtrip() {
        let range = PortRange::linear(-10.0, 10.0, 0.0);
        for value in [-10.0, -5.0, 0.0, 5.0, 10.0] {
            assert_relative_eq!(range.denormalize(range.normalize(value)), value);
        }
    }

    #[test]
    fn test_logarithmic_midpoint_is_geometric_mean() {
        let range = PortRange::logarithmic(20.0, 20000.0, 1000.0);
        assert_relative_eq!(range.denormalize(0.5), (20.0f64 * 20000.0).sqrt(), epsilon = 1e-6);
    }

    #[test]
    fn test_integer_and_toggle() {
        let steps = PortRange::integer(0, 16, 4);
        assert_eq!(steps.denormalize(0.51), 8.0);
        let toggle = PortRange::toggle(false);
        assert_eq!(toggle.denormalize(0.7), 1.0);
        assert_eq!(toggle.default, 0.0);
    }

    #[test]
    fn test_duplicate_copies_value_not_identity() {
        let port = Port::new("volume", PortRange::linear(0.0, 2.0, 1.0)).with_value(0.2);
        let copy = port.duplicate();
        assert_relative_eq!(copy.value(), 0.2);
        assert!(!copy.shares_cell_with(&port));
        copy.safe_write(0.7).unwrap();
        assert_relative_eq!(port.value(), 0.2);
    }

    #[test]
    fn test_duplicate_shared_keeps_identity() {
        let port = Port::new("volume", PortRange::linear(0.0, 2.0, 1.0)).shared();
        let copy = port.duplicate();
        assert!(copy.shares_cell_with(&port));
        port.safe_write(1.5).unwrap();
        assert_relative_eq!(copy.value(), 1.5);
    }

    #[test]
    fn test_safe_write_rejects_out_of_range() {
        let port = Port::new("bpm", PortRange::linear(1.0, 999.0, 120.0));
        assert!(matches!(
            port.safe_write(2000.0),
            Err(Error::PortOutOfRange { .. })
        ));
        assert!(port.safe_write(f64::NAN).is_err());
        assert_relative_eq!(port.value(), 120.0);
    }

    #[test]
    fn test_port_map_replaces_by_name() {
        let mut map = PortMap::new();
        map.push(Port::new("a", PortRange::default()));
        map.push(Port::new("a", PortRange::linear(0.0, 4.0, 2.0)));
        assert_eq!(map.len(), 1);
        assert_relative_eq!(map.get("a").unwrap().value(), 2.0);
    }
}
