//! Staged execution of recall instances.
//!
//! Each tic, every context of an armed playback tree is walked once per
//! stage, parents before children. Instances that have not run yet go through
//! the three init stages first. Roles never touch the graph topology while
//! running; they queue [`StageAction`]s which are applied after the role
//! returns.

use super::{Recall, RecallFlags, RecallOwner, RecallState, StepFire};
use crate::audio::Audio;
use crate::audio_signal::AudioSignal;
use crate::channel::Channel;
use crate::config::EngineConfig;
use crate::graph::{covers, range_members, AudioGraph, RecallContext};
use crate::handle::{AudioId, AudioSignalId, ChannelId, RecallHandle, RecallId, RecyclingId};
use crate::recall::PortMap;
use crate::recycling::Recycling;
use crate::soundcard::Soundcard;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// One-time setup, e.g. instantiating a hosted effect.
    InitPre,
    InitInter,
    InitPost,
    /// Generate or pull audio.
    Pre,
    /// Process and copy to sinks.
    Inter,
    /// Bookkeeping.
    Post,
}

impl Stage {
    pub const INIT: [Stage; 3] = [Stage::InitPre, Stage::InitInter, Stage::InitPost];
    pub const MAIN: [Stage; 3] = [Stage::Pre, Stage::Inter, Stage::Post];

    pub fn is_init(self) -> bool {
        matches!(self, Self::InitPre | Self::InitInter | Self::InitPost)
    }
}

/// Counters for one tic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicStats {
    pub instances_run: u64,
    pub notes_started: u64,
    /// Sub-block writes skipped because the lock was busy.
    pub missed_sub_blocks: u64,
    pub runtime_errors: u64,
}

impl TicStats {
    pub fn merge(&mut self, other: &TicStats) {
        self.instances_run += other.instances_run;
        self.notes_started += other.notes_started;
        self.missed_sub_blocks += other.missed_sub_blocks;
        self.runtime_errors += other.runtime_errors;
    }
}

/// Output side of a tic: the soundcard and the stats being collected.
pub struct StageIo<'a> {
    pub(crate) soundcard: Option<&'a dyn Soundcard>,
    pub(crate) lock_timeout: Duration,
    pub stats: TicStats,
}

impl<'a> StageIo<'a> {
    pub fn new(soundcard: &'a dyn Soundcard, lock_timeout: Duration) -> Self {
        Self {
            soundcard: Some(soundcard),
            lock_timeout,
            stats: TicStats::default(),
        }
    }

    /// No sink; playback recalls become no-ops.
    pub fn offline() -> Self {
        Self {
            soundcard: None,
            lock_timeout: Duration::ZERO,
            stats: TicStats::default(),
        }
    }
}

/// Requests a role makes while running.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum StageAction {
    Done(RecallHandle),
    StartNote {
        recall_id: RecallId,
        channel: ChannelId,
        attack: usize,
    },
}

/// Graph state a running role may see. Only signals are mutable.
pub(crate) struct GraphView<'a> {
    pub audios: &'a HashMap<AudioId, Audio>,
    pub channels: &'a HashMap<ChannelId, Channel>,
    pub recyclings: &'a HashMap<RecyclingId, Recycling>,
    pub signals: &'a mut HashMap<AudioSignalId, AudioSignal>,
    pub contexts: &'a HashMap<RecallId, RecallContext>,
    pub config: &'a EngineConfig,
    pub tic: u64,
}

impl GraphView<'_> {
    pub fn channel_recyclings(&self, channel: ChannelId) -> SmallVec<[RecyclingId; 8]> {
        let range = self.channels.get(&channel).and_then(Channel::recycling_range);
        range_members(self.recyclings, range)
    }

    /// Playing signals of `recycling` that belong to `context` or below.
    pub fn covered_signals(
        &self,
        recycling: RecyclingId,
        context: RecallId,
    ) -> SmallVec<[AudioSignalId; 8]> {
        let Some(recycling) = self.recyclings.get(&recycling) else {
            return SmallVec::new();
        };
        recycling
            .signals()
            .iter()
            .copied()
            .filter(|id| {
                self.signals.get(id).is_some_and(|s| {
                    !s.is_template()
                        && s.current().is_some()
                        && covers(self.contexts, context, s.recall_id())
                })
            })
            .collect()
    }
}

pub(crate) struct RunCtx<'a, 'io> {
    pub stage: Stage,
    pub handle: RecallHandle,
    pub owner: RecallOwner,
    pub recall_id: RecallId,
    /// Nearest channel up the parent chain.
    pub channel: Option<ChannelId>,
    pub ports: &'a PortMap,
    pub cancelling: bool,
    pub view: GraphView<'a>,
    pub io: &'a mut StageIo<'io>,
    pub actions: &'a mut SmallVec<[StageAction; 4]>,
    /// Steps the dependency's delay counter fired this tic.
    pub steps: &'a [StepFire],
}

impl AudioGraph {
    /// Purge what finished during the previous tic.
    pub fn begin_tic(&mut self) {
        self.purge();
    }

    /// Roots of armed playback trees, oldest first.
    pub fn playback_roots(&self) -> Vec<RecallId> {
        self.playbacks.iter().map(|p| p.root).collect()
    }

    /// Run every stage for one playback tree, upstream contexts first.
    pub fn run_playback(&mut self, root: RecallId, io: &mut StageIo<'_>) -> crate::Result<()> {
        if !self.contexts.contains_key(&root) {
            return Err(crate::Error::UnknownContext(root));
        }
        for context in self.tree_order(root) {
            self.run_context(context, io);
        }
        Ok(())
    }

    /// Advance cursors and retire idle playbacks.
    pub fn end_tic(&mut self) {
        self.advance_signals();
        self.finish_idle_playbacks();
        self.tic += 1;
    }

    /// One full tic on the calling thread.
    pub fn process_tic(&mut self, io: &mut StageIo<'_>) {
        self.begin_tic();
        for root in self.playback_roots() {
            if let Err(error) = self.run_playback(root, io) {
                tracing::warn!(%root, %error, "playback tree skipped");
            }
        }
        self.end_tic();
    }

    fn run_context(&mut self, context: RecallId, io: &mut StageIo<'_>) {
        let pending: Vec<RecallHandle> = self
            .walk(context)
            .into_iter()
            .filter(|h| self.needs_init(*h))
            .collect();
        for stage in Stage::INIT {
            for handle in &pending {
                self.run_instance(*handle, stage, io);
            }
        }
        for stage in Stage::MAIN {
            for handle in self.walk(context) {
                self.run_instance(handle, stage, io);
            }
        }
    }

    /// Instances of a context, parents first.
    pub(crate) fn walk(&self, context: RecallId) -> Vec<RecallHandle> {
        let mut order = Vec::new();
        let Some(ctx) = self.contexts.get(&context) else {
            return order;
        };
        let mut stack: Vec<RecallHandle> = ctx.instances.iter().rev().copied().collect();
        while let Some(handle) = stack.pop() {
            if let Some(recall) = self.recalls.get(&handle) {
                order.push(handle);
                stack.extend(recall.children.iter().rev().copied());
            }
        }
        order
    }

    fn needs_init(&self, handle: RecallHandle) -> bool {
        self.recalls.get(&handle).is_some_and(|r| {
            r.state == RecallState::Active && !r.flags.contains(RecallFlags::RUN_INITIALIZED)
        })
    }

    fn run_instance(&mut self, handle: RecallHandle, stage: Stage, io: &mut StageIo<'_>) {
        let Some(recall) = self.recalls.get(&handle) else {
            return;
        };
        if recall.state != RecallState::Active {
            return;
        }
        let cancelling = recall.cancel_requested;
        if cancelling && stage != Stage::Inter {
            return;
        }
        if !stage.is_init() && !recall.flags.contains(RecallFlags::RUN_INITIALIZED) {
            // created during this tic
            for init in Stage::INIT {
                self.run_instance(handle, init, io);
            }
            if !self.recalls.get(&handle).is_some_and(|r| r.state == RecallState::Active) {
                return;
            }
        }
        let Some(recall) = self.recalls.get(&handle) else {
            return;
        };
        let Some(recall_id) = recall.recall_id else {
            return;
        };

        let channel = self.owning_channel(handle);
        let steps: SmallVec<[StepFire; 4]> = recall
            .dependency
            .and_then(|d| self.recalls.get(&d))
            .and_then(|d| d.kind.as_delay())
            .map(|d| d.fired().iter().copied().collect())
            .unwrap_or_default();
        let cells = (stage == Stage::InitPre).then(|| {
            recall
                .kind
                .wanted_ports()
                .iter()
                .map(|name| self.resolve_port(handle, name))
                .collect::<SmallVec<[_; 4]>>()
        });

        let mut actions: SmallVec<[StageAction; 4]> = SmallVec::new();
        let result = {
            let AudioGraph {
                recalls,
                audios,
                channels,
                recyclings,
                signals,
                contexts,
                config,
                tic,
                ..
            } = self;
            let Some(recall) = recalls.get_mut(&handle) else {
                return;
            };
            let Recall {
                kind, ports, owner, ..
            } = recall;
            if let Some(cells) = &cells {
                kind.bind(cells);
            }
            let mut ctx = RunCtx {
                stage,
                handle,
                owner: *owner,
                recall_id,
                channel,
                ports,
                cancelling,
                view: GraphView {
                    audios,
                    channels,
                    recyclings,
                    signals,
                    contexts,
                    config,
                    tic: *tic,
                },
                io: &mut *io,
                actions: &mut actions,
                steps: &steps,
            };
            kind.run(&mut ctx)
        };
        io.stats.instances_run += 1;

        if let Err(error) = result {
            tracing::error!(recall = %handle, ?stage, %error, "recall failed, marking done");
            io.stats.runtime_errors += 1;
            self.force_done(handle);
        }
        if let Some(recall) = self.recalls.get_mut(&handle) {
            match stage {
                Stage::InitPost => recall.flags.insert(RecallFlags::RUN_INITIALIZED),
                Stage::Pre => recall.flags.remove(RecallFlags::INITIAL_RUN),
                _ => {}
            }
        }
        self.apply_actions(actions, io);
        if cancelling {
            self.force_done(handle);
        }
    }

    fn apply_actions(&mut self, actions: SmallVec<[StageAction; 4]>, io: &mut StageIo<'_>) {
        for action in actions {
            match action {
                StageAction::Done(handle) => {
                    self.recall_done(handle);
                }
                StageAction::StartNote {
                    recall_id,
                    channel,
                    attack,
                } => match self.start_note(recall_id, channel, attack) {
                    Ok(voices) => io.stats.notes_started += voices.len() as u64,
                    Err(error) => {
                        tracing::warn!(%channel, attack, %error, "note not started");
                    }
                },
            }
        }
    }

    fn owning_channel(&self, handle: RecallHandle) -> Option<ChannelId> {
        let mut current = self.recalls.get(&handle);
        while let Some(recall) = current {
            if let RecallOwner::Channel(channel) = recall.owner {
                return Some(channel);
            }
            current = recall.parent.and_then(|p| self.recalls.get(&p));
        }
        None
    }
}
