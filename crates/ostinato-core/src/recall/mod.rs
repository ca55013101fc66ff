//! Recalls: attachable units of audio behaviour.
//!
//! A recall attached to an audio or channel is a *template*. When a playback
//! context reaches its node the template is duplicated into a run-time
//! instance for that context, and the instance grows children down to the
//! level its role works at (recycling, audio signal). Instances are driven
//! through the stages in [`Stage`] once per tic.

mod delay;
mod duplicate;
mod effect;
mod host;
mod kind;
mod mixer;
mod pattern;
mod peak;
mod playback;
mod port;
mod run;
mod volume;

pub use delay::{DelayRecall, StepFire};
pub use effect::{EffectOp, EffectRecall, Waveform};
pub use host::HostEffectRecall;
pub use kind::{RecallKind, RecallRole};
pub use mixer::MixerRecall;
pub use pattern::{Pattern, PatternRecall};
pub use peak::PeakRecall;
pub use playback::PlaybackRecall;
pub use port::{Port, PortCell, PortMap, PortRange, PortScale};
pub use run::{Stage, StageIo, TicStats};
pub use volume::VolumeRecall;

pub(crate) use run::StageAction;

use crate::config::{MAX_BPM, MAX_DELAY_FACTOR, MIN_BPM, MIN_DELAY_FACTOR};
use crate::flags::define_flags;
use crate::handle::{AudioId, AudioSignalId, ChannelId, RecallHandle, RecallId, RecyclingId};
use serde::{Deserialize, Serialize};

define_flags! {
    RecallFlags: u16 {
        const TEMPLATE = 1;
        /// Serves plain playback contexts.
        const PLAYBACK = 1 << 1;
        /// Serves sequencer contexts.
        const SEQUENCER = 1 << 2;
        /// Serves notation contexts.
        const NOTATION = 1 << 3;
        /// `done` is ignored until the instance is cancelled.
        const PERSISTENT = 1 << 4;
        /// Goes done once its last child is removed.
        const PROPAGATE_DONE = 1 << 5;
        /// Set until the first `run_pre`.
        const INITIAL_RUN = 1 << 6;
        const RUN_INITIALIZED = 1 << 7;
    }
}

impl RecallFlags {
    pub const SCOPES: Self = Self::PLAYBACK
        .union(Self::SEQUENCER)
        .union(Self::NOTATION);

    /// Flags a child takes over from its parent.
    pub const INHERITED: Self = Self::SCOPES
        .union(Self::PERSISTENT)
        .union(Self::PROPAGATE_DONE);
}

/// What a playback context is driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SoundScope {
    Playback,
    Sequencer,
    Notation,
}

impl SoundScope {
    pub fn flag(self) -> RecallFlags {
        match self {
            Self::Playback => RecallFlags::PLAYBACK,
            Self::Sequencer => RecallFlags::SEQUENCER,
            Self::Notation => RecallFlags::NOTATION,
        }
    }
}

/// Granularity of the node a recall is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Level {
    Audio,
    Channel,
    Recycling,
    AudioSignal,
}

impl Level {
    pub fn below(self) -> Option<Level> {
        match self {
            Self::Audio => Some(Self::Channel),
            Self::Channel => Some(Self::Recycling),
            Self::Recycling => Some(Self::AudioSignal),
            Self::AudioSignal => None,
        }
    }
}

/// Graph node a recall lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecallOwner {
    Audio(AudioId),
    Channel(ChannelId),
    Recycling(RecyclingId),
    AudioSignal(AudioSignalId),
}

impl RecallOwner {
    pub fn level(self) -> Level {
        match self {
            Self::Audio(_) => Level::Audio,
            Self::Channel(_) => Level::Channel,
            Self::Recycling(_) => Level::Recycling,
            Self::AudioSignal(_) => Level::AudioSignal,
        }
    }
}

/// Lifecycle of one recall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecallState {
    /// Never executed, only duplicated.
    Template,
    Active,
    /// Still visible for one scheduler pass.
    Done,
    Removed,
}

/// Which template list of a node a recall goes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RecallList {
    /// Duplicated for root contexts.
    #[default]
    Play,
    /// Duplicated for contexts nested under a downstream audio.
    Recall,
}

pub struct Recall {
    pub(crate) handle: RecallHandle,
    pub(crate) name: String,
    pub(crate) version: String,
    pub(crate) build_id: String,
    pub(crate) flags: RecallFlags,
    pub(crate) state: RecallState,
    pub(crate) recall_id: Option<RecallId>,
    /// Template this instance descends from.
    pub(crate) template: Option<RecallHandle>,
    pub(crate) parent: Option<RecallHandle>,
    /// Template whose instance must exist before this one is duplicated.
    pub(crate) parent_template: Option<RecallHandle>,
    /// Resolved instance of `parent_template` in this context.
    pub(crate) dependency: Option<RecallHandle>,
    pub(crate) owner: RecallOwner,
    pub(crate) children: Vec<RecallHandle>,
    pub(crate) ports: PortMap,
    pub(crate) kind: RecallKind,
    pub(crate) cancel_requested: bool,
}

impl Recall {
    pub fn handle(&self) -> RecallHandle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn build_id(&self) -> &str {
        &self.build_id
    }

    pub fn flags(&self) -> RecallFlags {
        self.flags
    }

    pub fn state(&self) -> RecallState {
        self.state
    }

    pub fn is_template(&self) -> bool {
        self.flags.contains(RecallFlags::TEMPLATE)
    }

    /// Owning playback context, `None` for templates.
    pub fn recall_id(&self) -> Option<RecallId> {
        self.recall_id
    }

    pub fn template(&self) -> Option<RecallHandle> {
        self.template
    }

    pub fn parent(&self) -> Option<RecallHandle> {
        self.parent
    }

    pub fn owner(&self) -> RecallOwner {
        self.owner
    }

    pub fn parent_template(&self) -> Option<RecallHandle> {
        self.parent_template
    }

    pub fn dependency(&self) -> Option<RecallHandle> {
        self.dependency
    }

    pub fn level(&self) -> Level {
        self.owner.level()
    }

    /// Level of children this recall duplicates into, if any.
    pub fn child_level(&self) -> Option<Level> {
        let leaf = self.kind.leaf_level();
        self.level().below().filter(|below| *below <= leaf)
    }

    pub fn children(&self) -> &[RecallHandle] {
        &self.children
    }

    pub fn ports(&self) -> &PortMap {
        &self.ports
    }

    pub fn port(&self, name: &str) -> Option<&Port> {
        self.ports.get(name)
    }

    pub fn kind(&self) -> &RecallKind {
        &self.kind
    }

    pub fn role(&self) -> RecallRole {
        self.kind.role()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested
    }
}

impl std::fmt::Debug for Recall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recall")
            .field("handle", &self.handle)
            .field("name", &self.name)
            .field("role", &self.kind.role())
            .field("state", &self.state)
            .field("flags", &self.flags)
            .field("recall_id", &self.recall_id)
            .field("owner", &self.owner)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .finish()
    }
}

/// Everything needed to attach a template.
pub struct RecallSpec {
    pub(crate) name: String,
    pub(crate) version: String,
    pub(crate) build_id: String,
    pub(crate) kind: RecallKind,
    pub(crate) ports: PortMap,
    pub(crate) flags: RecallFlags,
    pub(crate) list: RecallList,
    pub(crate) parent_template: Option<RecallHandle>,
    /// Effect unit to resolve from the registry on attach.
    pub(crate) effect: Option<String>,
}

impl RecallSpec {
    pub fn new(name: impl Into<String>, kind: RecallKind) -> Self {
        let flags = kind.default_flags();
        Self {
            name: name.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            build_id: String::new(),
            kind,
            ports: PortMap::new(),
            flags,
            list: RecallList::Play,
            parent_template: None,
            effect: None,
        }
    }

    /// Channel volume with a shared `volume` port.
    pub fn volume(volume: f64) -> Self {
        let mut spec = Self::new("volume", RecallKind::Volume(VolumeRecall::default()));
        spec.ports.push(
            Port::new("volume", PortRange::linear(0.0, 2.0, 1.0))
                .shared()
                .with_value(volume),
        );
        spec
    }

    /// Peak meter; the instance's `peak` port holds the loudest sample of the
    /// last tic, measured after every other stage has run.
    pub fn peak() -> Self {
        let mut spec = Self::new("peak", RecallKind::Peak(PeakRecall::default()));
        spec.ports.push(Port::new("peak", PortRange::linear(0.0, 16.0, 0.0)));
        spec
    }

    /// Soundcard sink.
    pub fn playback() -> Self {
        Self::new("play", RecallKind::Playback(PlaybackRecall::default()))
    }

    /// Mix this channel's signals into `destination`'s own recycling.
    pub fn mixer(destination: ChannelId) -> Self {
        Self::new("copy", RecallKind::Mixer(MixerRecall::new(destination)))
    }

    /// Amplitude LFO.
    pub fn lfo(freq: f64, depth: f64) -> Self {
        let mut spec = Self::new("lfo", RecallKind::Effect(EffectRecall::new(EffectOp::Lfo)));
        spec.ports.push(Port::new("freq", PortRange::linear(0.0, 100.0, 6.0)).with_value(freq));
        spec.ports.push(Port::new("depth", PortRange::linear(0.0, 1.0, 0.5)).with_value(depth));
        spec
    }

    /// Oscillator mixed into every voice.
    pub fn generator(waveform: Waveform, freq: f64, amplitude: f64) -> Self {
        let mut spec = Self::new(
            "oscillator",
            RecallKind::Effect(EffectRecall::new(EffectOp::Generator(waveform))),
        );
        spec.ports.push(
            Port::new("freq", PortRange::logarithmic(1.0, 20000.0, 440.0)).with_value(freq),
        );
        spec.ports.push(
            Port::new("amplitude", PortRange::linear(0.0, 1.0, 0.5)).with_value(amplitude),
        );
        spec
    }

    /// Hosted effect unit looked up by name when attached.
    pub fn host_effect(effect: impl Into<String>) -> Self {
        let effect = effect.into();
        let mut spec = Self::new(
            effect.clone(),
            RecallKind::HostEffect(HostEffectRecall::unresolved(effect.clone())),
        );
        spec.effect = Some(effect);
        spec
    }

    /// Tempo counter with shared `bpm` and `tact` ports.
    pub fn delay_counter(bpm: f64, tact: f64) -> Self {
        let mut spec = Self::new("delay", RecallKind::DelayCounter(DelayRecall::default()));
        spec.ports.push(
            Port::new("bpm", PortRange::linear(MIN_BPM, MAX_BPM, 120.0))
                .shared()
                .with_value(bpm),
        );
        spec.ports.push(
            Port::new("tact", PortRange::linear(MIN_DELAY_FACTOR, MAX_DELAY_FACTOR, 0.25))
                .shared()
                .with_value(tact),
        );
        spec
    }

    /// Step sequencer driven by `delay`.
    pub fn pattern(pattern: Pattern, delay: RecallHandle) -> Self {
        let mut spec = Self::new(
            "pattern",
            RecallKind::PatternSequencer(PatternRecall::new(pattern)),
        );
        spec.ports.push(Port::new("loop", PortRange::toggle(false)).shared());
        spec.parent_template = Some(delay);
        spec
    }

    /// Put the template in the nested-context list.
    pub fn recall(mut self) -> Self {
        self.list = RecallList::Recall;
        self
    }

    /// Put the template in the root-context list.
    pub fn play(mut self) -> Self {
        self.list = RecallList::Play;
        self
    }

    /// Replace the scopes this template serves.
    pub fn scopes(mut self, scopes: RecallFlags) -> Self {
        self.flags.remove(RecallFlags::SCOPES);
        self.flags.insert(scopes.intersection(RecallFlags::SCOPES));
        self
    }

    pub fn persistent(mut self) -> Self {
        self.flags.insert(RecallFlags::PERSISTENT);
        self
    }

    pub fn port(mut self, port: Port) -> Self {
        self.ports.push(port);
        self
    }

    pub fn depends_on(mut self, template: RecallHandle) -> Self {
        self.parent_template = Some(template);
        self
    }

    pub fn build_id(mut self, build_id: impl Into<String>) -> Self {
        self.build_id = build_id.into();
        self
    }
}
