use super::run::RunCtx;
use super::{
    DelayRecall, EffectRecall, HostEffectRecall, Level, MixerRecall, PatternRecall,
    PeakRecall, PlaybackRecall, PortCell, RecallFlags, VolumeRecall,
};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The closed set of recall behaviours.
#[derive(Debug)]
pub enum RecallKind {
    Effect(EffectRecall),
    HostEffect(HostEffectRecall),
    Playback(PlaybackRecall),
    Mixer(MixerRecall),
    Volume(VolumeRecall),
    Peak(PeakRecall),
    PatternSequencer(PatternRecall),
    DelayCounter(DelayRecall),
}

/// Tag of a [`RecallKind`], for matching without borrowing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecallRole {
    Effect,
    HostEffect,
    Playback,
    Mixer,
    Volume,
    Peak,
    PatternSequencer,
    DelayCounter,
}

impl RecallKind {
    pub fn role(&self) -> RecallRole {
        match self {
            Self::Effect(_) => RecallRole::Effect,
            Self::HostEffect(_) => RecallRole::HostEffect,
            Self::Playback(_) => RecallRole::Playback,
            Self::Mixer(_) => RecallRole::Mixer,
            Self::Volume(_) => RecallRole::Volume,
            Self::Peak(_) => RecallRole::Peak,
            Self::PatternSequencer(_) => RecallRole::PatternSequencer,
            Self::DelayCounter(_) => RecallRole::DelayCounter,
        }
    }

    /// Level a template of this kind is attached at.
    pub fn home_level(&self) -> Level {
        match self {
            Self::PatternSequencer(_) | Self::DelayCounter(_) => Level::Audio,
            _ => Level::Channel,
        }
    }

    /// Deepest level instances duplicate down to.
    pub fn leaf_level(&self) -> Level {
        match self {
            Self::Effect(_) | Self::Playback(_) | Self::Volume(_) | Self::Peak(_) => {
                Level::AudioSignal
            }
            Self::Mixer(_) => Level::Recycling,
            Self::HostEffect(_) => Level::Channel,
            Self::PatternSequencer(_) | Self::DelayCounter(_) => Level::Audio,
        }
    }

    pub(crate) fn default_flags(&self) -> RecallFlags {
        match self {
            Self::DelayCounter(_) => {
                RecallFlags::SEQUENCER | RecallFlags::NOTATION | RecallFlags::PERSISTENT
            }
            Self::PatternSequencer(_) => RecallFlags::SEQUENCER,
            Self::Playback(_) => RecallFlags::SCOPES | RecallFlags::PROPAGATE_DONE,
            _ => RecallFlags::SCOPES,
        }
    }

    /// Fresh run-time state for a new instance or child.
    pub(crate) fn duplicate(&self) -> RecallKind {
        match self {
            Self::Effect(e) => Self::Effect(e.duplicate()),
            Self::HostEffect(h) => Self::HostEffect(h.duplicate()),
            Self::Playback(_) => Self::Playback(PlaybackRecall::default()),
            Self::Mixer(m) => Self::Mixer(m.duplicate()),
            Self::Volume(_) => Self::Volume(VolumeRecall::default()),
            Self::Peak(_) => Self::Peak(PeakRecall::default()),
            Self::PatternSequencer(p) => Self::PatternSequencer(p.duplicate()),
            Self::DelayCounter(_) => Self::DelayCounter(DelayRecall::default()),
        }
    }

    /// Port names resolved up the parent chain before the first run.
    pub(crate) fn wanted_ports(&self) -> &'static [&'static str] {
        match self {
            Self::Effect(e) => e.wanted_ports(),
            Self::Volume(_) => VolumeRecall::PORTS,
            Self::Peak(_) => PeakRecall::PORTS,
            Self::PatternSequencer(_) => PatternRecall::PORTS,
            Self::DelayCounter(_) => DelayRecall::PORTS,
            Self::HostEffect(_) | Self::Playback(_) | Self::Mixer(_) => &[],
        }
    }

    /// Cells for [`wanted_ports`](Self::wanted_ports), in the same order.
    pub(crate) fn bind(&mut self, cells: &[Option<Arc<PortCell>>]) {
        match self {
            Self::Effect(e) => e.bind(cells),
            Self::Volume(v) => v.bind(cells),
            Self::Peak(p) => p.bind(cells),
            Self::PatternSequencer(p) => p.bind(cells),
            Self::DelayCounter(d) => d.bind(cells),
            Self::HostEffect(_) | Self::Playback(_) | Self::Mixer(_) => {}
        }
    }

    pub(crate) fn run(&mut self, ctx: &mut RunCtx<'_, '_>) -> Result<()> {
        match self {
            Self::Effect(e) => e.run(ctx),
            Self::HostEffect(h) => h.run(ctx),
            Self::Playback(p) => p.run(ctx),
            Self::Mixer(m) => m.run(ctx),
            Self::Volume(v) => v.run(ctx),
            Self::Peak(p) => p.run(ctx),
            Self::PatternSequencer(p) => p.run(ctx),
            Self::DelayCounter(d) => d.run(ctx),
        }
    }

    pub fn as_delay(&self) -> Option<&DelayRecall> {
        match self {
            Self::DelayCounter(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_pattern(&self) -> Option<&PatternRecall> {
        match self {
            Self::PatternSequencer(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_peak(&self) -> Option<&PeakRecall> {
        match self {
            Self::Peak(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_mixer(&self) -> Option<&MixerRecall> {
        match self {
            Self::Mixer(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_playback(&self) -> Option<&PlaybackRecall> {
        match self {
            Self::Playback(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_host_effect(&self) -> Option<&HostEffectRecall> {
        match self {
            Self::HostEffect(h) => Some(h),
            _ => None,
        }
    }
}
