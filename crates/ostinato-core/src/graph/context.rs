//! Playback contexts and instance lifetime.
//!
//! Starting a playback creates a root [`RecallContext`] on an audio and one
//! nested context per distinct upstream audio reached through input links.
//! Each context duplicates the templates of its audio: root contexts from the
//! `play` lists, nested ones from the `recall` lists.

use super::{AudioGraph, GraphEvent};
use crate::audio_signal::{AudioSignal, StreamState};
use crate::channel::ChannelKind;
use crate::handle::{AudioId, AudioSignalId, ChannelId, RecallHandle, RecallId};
use crate::recall::{RecallFlags, RecallOwner, RecallRole, RecallState, SoundScope};
use crate::recycling::Recycling;
use crate::{Error, Result};
use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::VecDeque;

/// One node of a playback tree (a RecallID).
#[derive(Debug, Clone)]
pub struct RecallContext {
    pub(crate) id: RecallId,
    pub(crate) audio: AudioId,
    pub(crate) scope: SoundScope,
    pub(crate) parent: Option<RecallId>,
    pub(crate) children: Vec<RecallId>,
    /// Top-level instances in run order.
    pub(crate) instances: Vec<RecallHandle>,
    /// Accumulator signals created for mixers of this context.
    pub(crate) feeds: Vec<AudioSignalId>,
}

impl RecallContext {
    pub fn id(&self) -> RecallId {
        self.id
    }

    pub fn audio(&self) -> AudioId {
        self.audio
    }

    pub fn scope(&self) -> SoundScope {
        self.scope
    }

    pub fn parent(&self) -> Option<RecallId> {
        self.parent
    }

    pub fn children(&self) -> &[RecallId] {
        &self.children
    }

    pub fn instances(&self) -> &[RecallHandle] {
        &self.instances
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// An armed playback tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playback {
    pub root: RecallId,
    pub audio: AudioId,
    pub scope: SoundScope,
    pub started_at: u64,
    /// Cancelled, waiting for its instances to flush.
    pub stopping: bool,
}

impl AudioGraph {
    /// Arm a playback tree rooted at `audio`.
    ///
    /// In [`SoundScope::Playback`] a voice is started at attack 0 from every
    /// loaded template the audio's inputs read.
    pub fn start_playback(&mut self, audio: AudioId, scope: SoundScope) -> Result<RecallId> {
        self.audio(audio)?;
        let root = self.new_context(audio, scope, None);
        let mut seen = HashSet::new();
        seen.insert(audio);
        let mut queue = VecDeque::from([root]);
        let mut order = vec![root];
        while let Some(context) = queue.pop_front() {
            let Some(context_audio) = self.contexts.get(&context).map(|c| c.audio) else {
                continue;
            };
            for upstream in self.upstream_audios(context_audio) {
                if seen.insert(upstream) {
                    let child = self.new_context(upstream, scope, Some(context));
                    queue.push_back(child);
                    order.push(child);
                }
            }
        }

        for context in order {
            if let Err(error) = self.duplicate_context(context) {
                self.discard_tree(root);
                return Err(error);
            }
        }
        self.playbacks.push(Playback {
            root,
            audio,
            scope,
            started_at: self.tic,
            stopping: false,
        });
        self.emit(GraphEvent::PlaybackStarted { root, audio, scope });
        tracing::debug!(%audio, %root, ?scope, "playback started");

        if scope == SoundScope::Playback {
            let inputs = self.audio(audio)?.input.clone();
            for input in inputs {
                self.start_note(root, input, 0)?;
            }
        }
        Ok(root)
    }

    /// Cancel a playback tree; it is removed once its instances have flushed.
    pub fn stop_playback(&mut self, root: RecallId) -> Result<()> {
        self.cancel_context(root)?;
        if let Some(playback) = self.playbacks.iter_mut().find(|p| p.root == root) {
            playback.stopping = true;
        }
        Ok(())
    }

    fn new_context(&mut self, audio: AudioId, scope: SoundScope, parent: Option<RecallId>) -> RecallId {
        let id = self.alloc.recall_id();
        self.contexts.insert(
            id,
            RecallContext {
                id,
                audio,
                scope,
                parent,
                children: Vec::new(),
                instances: Vec::new(),
                feeds: Vec::new(),
            },
        );
        if let Some(parent) = parent.and_then(|p| self.contexts.get_mut(&p)) {
            parent.children.push(id);
        }
        self.emit(GraphEvent::ContextCreated {
            recall_id: id,
            audio,
            parent,
        });
        id
    }

    /// Audios feeding `audio` directly, in input order.
    fn upstream_audios(&self, audio: AudioId) -> SmallVec<[AudioId; 4]> {
        let mut upstream = SmallVec::new();
        let Some(node) = self.audios.get(&audio) else {
            return upstream;
        };
        for input in &node.input {
            let Some(output) = self.channels.get(input).and_then(|c| c.link) else {
                continue;
            };
            if let Some(source) = self.channels.get(&output).map(|c| c.audio) {
                if !upstream.contains(&source) {
                    upstream.push(source);
                }
            }
        }
        upstream
    }

    /// Duplicate every template of the context's audio that serves its scope.
    pub(crate) fn duplicate_context(&mut self, context: RecallId) -> Result<()> {
        let ctx = self.context(context)?;
        let (audio, scope, nested) = (ctx.audio, ctx.scope, ctx.parent.is_some());
        for template in self.context_templates(audio, nested) {
            let serves = self
                .recalls
                .get(&template)
                .is_some_and(|t| t.flags.contains(scope.flag()));
            if !serves {
                continue;
            }
            match self.find_or_duplicate(template, context) {
                Ok(_) => {}
                Err(error @ Error::MissingParentContext { .. }) => {
                    tracing::warn!(%template, %context, %error, "template not duplicated");
                }
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }

    /// Audio-level templates, then inputs, then outputs.
    pub(crate) fn context_templates(&self, audio: AudioId, nested: bool) -> Vec<RecallHandle> {
        fn pick<'a>(nested: bool, play: &'a [RecallHandle], recall: &'a [RecallHandle]) -> &'a [RecallHandle] {
            if nested {
                recall
            } else {
                play
            }
        }
        let Some(node) = self.audios.get(&audio) else {
            return Vec::new();
        };
        let mut templates = pick(nested, &node.play, &node.recall).to_vec();
        for channel in node.input.iter().chain(&node.output) {
            if let Some(c) = self.channels.get(channel) {
                templates.extend_from_slice(pick(nested, &c.play, &c.recall));
            }
        }
        templates
    }

    /// Start a voice on every recycling `channel` reads that has a template.
    pub fn start_note(
        &mut self,
        recall_id: RecallId,
        channel: ChannelId,
        attack: usize,
    ) -> Result<SmallVec<[AudioSignalId; 4]>> {
        self.context(recall_id)?;
        self.channel(channel)?;
        if attack >= self.config.buffer_size {
            return Err(Error::InvalidGraph(format!(
                "attack {attack} is not inside a period of {} frames",
                self.config.buffer_size
            )));
        }
        let mut voices = SmallVec::new();
        for recycling in self.channel_recyclings(channel) {
            let Some(template) = self.recyclings.get(&recycling).and_then(Recycling::template) else {
                continue;
            };
            let Some(owner_audio) = self
                .recyclings
                .get(&recycling)
                .and_then(|r| self.channels.get(&r.channel))
                .map(|c| c.audio)
            else {
                continue;
            };
            if !self.signals.get(&template).is_some_and(|t| t.frame_count() > 0) {
                continue;
            }
            let note_context = self.context_for_audio(recall_id, owner_audio);
            let id = self.alloc.signal();
            let Some(template) = self.signals.get(&template) else {
                continue;
            };
            let voice = AudioSignal::voice(id, template, note_context, attack, self.tic)?;
            self.insert_signal(voice);
            self.on_signal_added(id);
            voices.push(id);
        }
        tracing::trace!(%channel, attack, voices = voices.len(), "note started");
        Ok(voices)
    }

    /// Context of `audio` in the tree `context` belongs to, or `context`.
    fn context_for_audio(&self, context: RecallId, audio: AudioId) -> RecallId {
        let mut root = context;
        while let Some(parent) = self.contexts.get(&root).and_then(|c| c.parent) {
            root = parent;
        }
        self.tree_contexts(root)
            .into_iter()
            .find(|c| self.contexts.get(c).is_some_and(|c| c.audio == audio))
            .unwrap_or(context)
    }

    /// Contexts of a tree, parents first.
    pub fn tree_contexts(&self, root: RecallId) -> Vec<RecallId> {
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if let Some(context) = self.contexts.get(&id) {
                order.push(id);
                stack.extend(context.children.iter().rev().copied());
            }
        }
        order
    }

    /// Contexts of a tree, upstream (children) first.
    pub(crate) fn tree_order(&self, root: RecallId) -> Vec<RecallId> {
        let mut order = self.tree_contexts(root);
        order.reverse();
        order
    }

    /// Request shutdown of every instance in a context and below it. Each
    /// gets one more `run_inter`, then goes done.
    pub fn cancel_context(&mut self, recall_id: RecallId) -> Result<()> {
        self.context(recall_id)?;
        let handles: Vec<RecallHandle> = self
            .tree_contexts(recall_id)
            .into_iter()
            .flat_map(|c| self.walk(c))
            .collect();
        for handle in &handles {
            self.mark_cancelled(*handle);
        }
        tracing::debug!(%recall_id, instances = handles.len(), "context cancelled");
        Ok(())
    }

    /// Cancel one instance and its children.
    pub fn cancel_recall(&mut self, handle: RecallHandle) -> Result<()> {
        let recall = self.recall(handle)?;
        if recall.is_template() {
            return Err(Error::InvalidGraph(format!("{handle} is a template")));
        }
        let mut stack = vec![handle];
        while let Some(current) = stack.pop() {
            if let Some(recall) = self.recalls.get(&current) {
                stack.extend(recall.children.iter().copied());
            }
            self.mark_cancelled(current);
        }
        Ok(())
    }

    fn mark_cancelled(&mut self, handle: RecallHandle) {
        if let Some(recall) = self.recalls.get_mut(&handle) {
            recall.cancel_requested = true;
            recall.flags.remove(RecallFlags::PERSISTENT);
        }
    }

    /// Signal that an instance finished. Ignored for templates and for
    /// persistent instances that were not cancelled.
    pub fn recall_done(&mut self, handle: RecallHandle) -> bool {
        let Some(recall) = self.recalls.get(&handle) else {
            return false;
        };
        if recall.is_template()
            || (recall.flags.contains(RecallFlags::PERSISTENT) && !recall.cancel_requested)
        {
            return false;
        }
        self.force_done(handle)
    }

    pub(crate) fn force_done(&mut self, handle: RecallHandle) -> bool {
        let Some(recall) = self.recalls.get_mut(&handle) else {
            return false;
        };
        if recall.state != RecallState::Active {
            return false;
        }
        recall.state = RecallState::Done;
        let recall_id = recall.recall_id;
        self.emit(GraphEvent::RecallDone {
            recall: handle,
            recall_id,
        });
        true
    }

    /// A parent with `PROPAGATE_DONE` goes done with its last child.
    pub(crate) fn propagate_done(&mut self, parent: RecallHandle) {
        let ready = self.recalls.get(&parent).is_some_and(|r| {
            r.state == RecallState::Active
                && r.flags.contains(RecallFlags::PROPAGATE_DONE)
                && r.children.is_empty()
        });
        if ready {
            self.force_done(parent);
        }
    }

    /// Remove instances that were done for a full pass, exhausted voices and
    /// playbacks left without instances.
    pub(crate) fn purge(&mut self) {
        let mut done: Vec<RecallHandle> = self
            .recalls
            .values()
            .filter(|r| r.state == RecallState::Done)
            .map(|r| r.handle)
            .collect();
        done.sort();
        for handle in done {
            let Some(parent) = self.recalls.get(&handle).map(|r| r.parent) else {
                continue;
            };
            self.kill_instance(handle);
            if let Some(parent) = parent {
                self.propagate_done(parent);
            }
        }

        let mut exhausted: Vec<AudioSignalId> = self
            .signals
            .values()
            .filter(|s| s.is_exhausted() && !s.is_template())
            .map(|s| s.id)
            .collect();
        exhausted.sort();
        for signal in exhausted {
            self.kill_owned_by_signal(signal);
            self.remove_signal(signal);
        }

        let finished: Vec<Playback> = self
            .playbacks
            .iter()
            .filter(|p| {
                self.tree_contexts(p.root)
                    .iter()
                    .all(|c| self.contexts.get(c).is_none_or(|c| c.instances.is_empty()))
            })
            .copied()
            .collect();
        for playback in finished {
            self.discard_tree(playback.root);
            self.emit(GraphEvent::PlaybackFinished {
                root: playback.root,
                audio: playback.audio,
            });
            tracing::debug!(root = %playback.root, audio = %playback.audio, "playback finished");
        }
    }

    /// Move every playing cursor one chunk; exhausted voices take their
    /// signal-level instances with them.
    pub(crate) fn advance_signals(&mut self) {
        let mut ids: Vec<AudioSignalId> = self
            .signals
            .values()
            .filter(|s| !s.is_template() && !s.is_exhausted())
            .map(|s| s.id)
            .collect();
        ids.sort();
        for id in ids {
            let Some(signal) = self.signals.get_mut(&id) else {
                continue;
            };
            if signal.advance() != StreamState::Exhausted {
                continue;
            }
            let recycling = signal.recycling;
            self.emit(GraphEvent::SignalExhausted {
                signal: id,
                recycling,
            });
            let owned: Vec<RecallHandle> = self
                .recalls
                .values()
                .filter(|r| r.owner == RecallOwner::AudioSignal(id))
                .map(|r| r.handle)
                .collect();
            for handle in owned {
                self.force_done(handle);
            }
        }
    }

    /// Cancel playbacks with nothing left to play: no sounding voice and no
    /// running sequencer.
    pub(crate) fn finish_idle_playbacks(&mut self) {
        let idle: Vec<RecallId> = self
            .playbacks
            .iter()
            .filter(|p| !p.stopping)
            .filter(|p| {
                let tree = self.tree_contexts(p.root);
                let sounding = self.signals.values().any(|s| {
                    !s.is_template()
                        && !s.is_feed()
                        && !s.is_exhausted()
                        && s.recall_id.is_some_and(|r| tree.contains(&r))
                });
                let sequencing = tree.iter().flat_map(|c| self.walk(*c)).any(|h| {
                    self.recalls.get(&h).is_some_and(|r| {
                        r.role() == RecallRole::PatternSequencer && r.state == RecallState::Active
                    })
                });
                !sounding && !sequencing
            })
            .map(|p| p.root)
            .collect();
        for root in idle {
            tracing::debug!(%root, "playback idle, stopping");
            if let Err(error) = self.stop_playback(root) {
                tracing::warn!(%root, %error, "idle playback could not be stopped");
            }
        }
    }

    /// Drop a whole tree: instances, voices, feeds and contexts.
    pub(crate) fn discard_tree(&mut self, root: RecallId) {
        let tree = self.tree_contexts(root);
        for context in &tree {
            let instances = self
                .contexts
                .get(context)
                .map(|c| c.instances.clone())
                .unwrap_or_default();
            for handle in instances {
                self.kill_instance(handle);
            }
        }
        let mut signals: Vec<AudioSignalId> = self
            .signals
            .values()
            .filter(|s| s.recall_id.is_some_and(|r| tree.contains(&r)))
            .map(|s| s.id)
            .collect();
        signals.sort();
        for signal in signals {
            self.kill_owned_by_signal(signal);
            self.remove_signal(signal);
        }
        for context in &tree {
            self.contexts.remove(context);
        }
        self.playbacks.retain(|p| p.root != root);
    }

    /// Inputs of `audio` on pad `pad`.
    pub fn input_pad(&self, audio: AudioId, pad: usize) -> Result<SmallVec<[ChannelId; 4]>> {
        let node = self.audio(audio)?;
        Ok((0..node.audio_channels)
            .filter_map(|c| node.channel_at(ChannelKind::Input, pad, c))
            .collect())
    }
}
