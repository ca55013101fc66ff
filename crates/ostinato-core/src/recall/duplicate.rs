//! Attaching templates and duplicating them into playback contexts.
//!
//! A top-level instance exists at most once per (template, context) pair.
//! Below it, children are created per channel, recycling and audio signal
//! down to the role's leaf level, and are kept in step with the graph: new
//! voices get signal-level children, range changes move recycling-level
//! children.

use super::{Port, PortCell, PortMap, Recall, RecallFlags, RecallList, RecallOwner, RecallSpec};
use super::{Level, RecallKind, RecallRole, RecallState, SoundScope};
use crate::audio_signal::AudioSignal;
use crate::config::EngineConfig;
use crate::graph::{covers, AudioGraph, GraphEvent};
use crate::handle::{AudioId, AudioSignalId, ChannelId, RecallHandle, RecallId, RecyclingId};
use crate::{Error, Result};
use std::sync::Arc;

impl AudioGraph {
    /// Attach a template to an audio or channel and duplicate it into every
    /// live context it serves.
    pub fn attach_recall(&mut self, owner: RecallOwner, mut spec: RecallSpec) -> Result<RecallHandle> {
        let home = spec.kind.home_level();
        if owner.level() != home {
            return Err(Error::InvalidGraph(format!(
                "recall '{}' attaches at {home:?} level, not {:?}",
                spec.name,
                owner.level()
            )));
        }
        let audio = self.owner_audio(owner)?;
        if let Some(parent) = spec.parent_template {
            if !self.recall(parent)?.is_template() {
                return Err(Error::NotATemplate(parent));
            }
        }
        if let Some(effect) = &spec.effect {
            let unit = self.effects.get(effect)?;
            for (port, range) in unit.descriptor().controls() {
                if spec.ports.get(&port.name).is_none() {
                    spec.ports.push(Port::new(port.name.clone(), *range));
                }
            }
            if let RecallKind::HostEffect(host) = &mut spec.kind {
                host.resolve(unit);
            }
        }

        let handle = self.alloc.recall();
        let list = spec.list;
        self.recalls.insert(
            handle,
            Recall {
                handle,
                name: spec.name,
                version: spec.version,
                build_id: spec.build_id,
                flags: spec.flags.union(RecallFlags::TEMPLATE),
                state: RecallState::Template,
                recall_id: None,
                template: None,
                parent: None,
                parent_template: spec.parent_template,
                dependency: None,
                owner,
                children: Vec::new(),
                ports: spec.ports,
                kind: spec.kind,
                cancel_requested: false,
            },
        );
        match owner {
            RecallOwner::Audio(id) => {
                if let Some(node) = self.audios.get_mut(&id) {
                    match list {
                        RecallList::Play => node.play.push(handle),
                        RecallList::Recall => node.recall.push(handle),
                    }
                }
            }
            RecallOwner::Channel(id) => {
                if let Some(channel) = self.channels.get_mut(&id) {
                    match list {
                        RecallList::Play => channel.play.push(handle),
                        RecallList::Recall => channel.recall.push(handle),
                    }
                }
            }
            RecallOwner::Recycling(_) | RecallOwner::AudioSignal(_) => {}
        }
        tracing::debug!(recall = %handle, ?owner, ?list, "template attached");

        let mut live: Vec<RecallId> = self
            .contexts
            .values()
            .filter(|c| c.audio == audio && c.parent.is_some() == (list == RecallList::Recall))
            .map(|c| c.id)
            .collect();
        live.sort();
        for context in live {
            if let Err(error) = self.duplicate_into(handle, context) {
                tracing::warn!(recall = %handle, %context, %error, "template not duplicated");
            }
        }
        Ok(handle)
    }

    /// Remove a template together with every instance made from it.
    pub fn detach_recall(&mut self, template: RecallHandle) -> Result<()> {
        let recall = self.recall(template)?;
        if !recall.is_template() {
            return Err(Error::NotATemplate(template));
        }
        let owner = recall.owner;
        let mut instances: Vec<RecallHandle> = self
            .instance_index
            .iter()
            .filter(|((t, _), _)| *t == template)
            .map(|(_, instance)| *instance)
            .collect();
        instances.sort();
        for instance in instances {
            self.kill_instance(instance);
        }
        match owner {
            RecallOwner::Audio(id) => {
                if let Some(node) = self.audios.get_mut(&id) {
                    node.play.retain(|h| *h != template);
                    node.recall.retain(|h| *h != template);
                }
            }
            RecallOwner::Channel(id) => {
                if let Some(channel) = self.channels.get_mut(&id) {
                    channel.play.retain(|h| *h != template);
                    channel.recall.retain(|h| *h != template);
                }
            }
            RecallOwner::Recycling(_) | RecallOwner::AudioSignal(_) => {}
        }
        self.recalls.remove(&template);
        tracing::debug!(recall = %template, "template detached");
        Ok(())
    }

    fn owner_audio(&self, owner: RecallOwner) -> Result<AudioId> {
        match owner {
            RecallOwner::Audio(id) => self.audio(id).map(|a| a.id),
            RecallOwner::Channel(id) => self.channel(id).map(|c| c.audio),
            RecallOwner::Recycling(_) | RecallOwner::AudioSignal(_) => Err(Error::InvalidGraph(
                "templates attach to audios or channels".into(),
            )),
        }
    }

    /// Duplicate when the template serves the context's scope.
    fn duplicate_into(&mut self, template: RecallHandle, context: RecallId) -> Result<()> {
        let scope = self.context(context)?.scope;
        if self.recall(template)?.flags.contains(scope.flag()) {
            self.find_or_duplicate(template, context)?;
        }
        Ok(())
    }

    /// The instance of `template` in `recall_id`, created if missing.
    pub fn find_or_duplicate(&mut self, template: RecallHandle, recall_id: RecallId) -> Result<RecallHandle> {
        if let Some(existing) = self.instance_index.get(&(template, recall_id)) {
            return Ok(*existing);
        }
        let tmpl = self.recall(template)?;
        if !tmpl.is_template() {
            return Err(Error::NotATemplate(template));
        }
        let ctx = self.context(recall_id)?;
        let scope = ctx.scope;
        let parent_context = ctx.parent;
        let owner = tmpl.owner;
        let parent_template = tmpl.parent_template;

        let dependency = match parent_template {
            Some(parent) => Some(self.resolve_dependency(template, parent, recall_id, parent_context)?),
            None => None,
        };

        let tmpl = self.recall(template)?;
        let mut flags = tmpl
            .flags
            .difference(RecallFlags::TEMPLATE)
            .union(RecallFlags::INITIAL_RUN);
        if scope != SoundScope::Playback {
            // voices come and go with the sequencer; sinks stay armed
            flags.remove(RecallFlags::PROPAGATE_DONE);
        }
        let mut kind = tmpl.kind.duplicate();
        let ports = tmpl.ports.duplicate();
        let (name, version, build_id) = (tmpl.name.clone(), tmpl.version.clone(), tmpl.build_id.clone());

        if let RecallKind::Mixer(mixer) = &mut kind {
            let feed = self.ensure_feed(mixer.destination(), recall_id)?;
            mixer.set_feed(feed);
        }

        let handle = self.alloc.recall();
        self.recalls.insert(
            handle,
            Recall {
                handle,
                name,
                version,
                build_id,
                flags,
                state: RecallState::Active,
                recall_id: Some(recall_id),
                template: Some(template),
                parent: dependency,
                parent_template,
                dependency,
                owner,
                children: Vec::new(),
                ports,
                kind,
                cancel_requested: false,
            },
        );
        self.instance_index.insert((template, recall_id), handle);
        match dependency.and_then(|d| self.recalls.get_mut(&d)) {
            Some(parent) => parent.children.push(handle),
            None => {
                if let Some(ctx) = self.contexts.get_mut(&recall_id) {
                    ctx.instances.push(handle);
                }
            }
        }
        tracing::trace!(recall = %handle, %template, %recall_id, "template duplicated");
        self.spawn_children(handle);
        Ok(handle)
    }

    /// Instance of `parent` this context's instance of `template` runs under:
    /// the same context first, then the enclosing one.
    fn resolve_dependency(
        &mut self,
        template: RecallHandle,
        parent: RecallHandle,
        recall_id: RecallId,
        parent_context: Option<RecallId>,
    ) -> Result<RecallHandle> {
        if let Some(found) = self.instance_index.get(&(parent, recall_id)) {
            return Ok(*found);
        }
        let parent_audio = self.owner_audio(self.recall(parent)?.owner)?;
        let context_audio = self.context(recall_id)?.audio;
        let scope = self.context(recall_id)?.scope;
        if parent_audio == context_audio && self.recall(parent)?.flags.contains(scope.flag()) {
            return self.find_or_duplicate(parent, recall_id);
        }
        parent_context
            .and_then(|p| self.instance_index.get(&(parent, p)).copied())
            .ok_or(Error::MissingParentContext {
                template,
                recall_id,
            })
    }

    /// Accumulator in `destination`'s own recycling for one context.
    fn ensure_feed(&mut self, destination: ChannelId, recall_id: RecallId) -> Result<AudioSignalId> {
        let recycling = self.channel(destination)?.own_recycling.ok_or_else(|| {
            Error::InvalidGraph(format!("mixer destination {destination} owns no recycling"))
        })?;
        let existing = self.context(recall_id)?.feeds.iter().copied().find(|f| {
            self.signals
                .get(f)
                .is_some_and(|s| s.recycling == recycling)
        });
        if let Some(feed) = existing {
            return Ok(feed);
        }
        let id = self.alloc.signal();
        let config = &self.config;
        let feed = AudioSignal::feed(
            id,
            recycling,
            recall_id,
            config.format,
            config.buffer_size,
            config.samplerate,
            self.tic,
        );
        self.insert_signal(feed);
        if let Some(ctx) = self.contexts.get_mut(&recall_id) {
            ctx.feeds.push(id);
        }
        self.on_signal_added(id);
        tracing::trace!(signal = %id, %destination, %recall_id, "mixer feed created");
        Ok(id)
    }

    /// Grow children down to the role's leaf level.
    fn spawn_children(&mut self, handle: RecallHandle) {
        let Some(recall) = self.recalls.get(&handle) else {
            return;
        };
        let Some(level) = recall.child_level() else {
            return;
        };
        let recall_id = recall.recall_id;
        let owners: Vec<RecallOwner> = match (recall.owner, level) {
            (RecallOwner::Audio(audio), Level::Channel) => self
                .audios
                .get(&audio)
                .map(|a| a.input.iter().chain(&a.output).map(|c| RecallOwner::Channel(*c)).collect())
                .unwrap_or_default(),
            (RecallOwner::Channel(channel), Level::Recycling) => self
                .channel_recyclings(channel)
                .into_iter()
                .map(RecallOwner::Recycling)
                .collect(),
            (RecallOwner::Recycling(recycling), Level::AudioSignal) => self
                .recyclings
                .get(&recycling)
                .map(|r| {
                    r.signals
                        .iter()
                        .filter(|s| self.signal_matches(**s, recall_id))
                        .map(|s| RecallOwner::AudioSignal(*s))
                        .collect()
                })
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        for owner in owners {
            if let Some(child) = self.create_child(handle, owner) {
                self.spawn_children(child);
            }
        }
    }

    fn signal_matches(&self, signal: AudioSignalId, recall_id: Option<RecallId>) -> bool {
        let Some(recall_id) = recall_id else {
            return false;
        };
        self.signals
            .get(&signal)
            .is_some_and(|s| !s.is_template() && covers(&self.contexts, recall_id, s.recall_id))
    }

    /// Children start with no ports of their own and resolve them upward.
    fn create_child(&mut self, parent: RecallHandle, owner: RecallOwner) -> Option<RecallHandle> {
        let handle = self.alloc.recall();
        let source = self.recalls.get(&parent)?;
        let child = Recall {
            handle,
            name: source.name.clone(),
            version: source.version.clone(),
            build_id: source.build_id.clone(),
            flags: source
                .flags
                .intersection(RecallFlags::INHERITED)
                .union(RecallFlags::INITIAL_RUN),
            state: RecallState::Active,
            recall_id: source.recall_id,
            template: source.template,
            parent: Some(parent),
            parent_template: source.parent_template,
            dependency: source.dependency,
            owner,
            children: Vec::new(),
            ports: PortMap::new(),
            kind: source.kind.duplicate(),
            cancel_requested: source.cancel_requested,
        };
        self.recalls.insert(handle, child);
        if let Some(source) = self.recalls.get_mut(&parent) {
            source.children.push(handle);
        }
        Some(handle)
    }

    /// Give a freshly inserted signal its signal-level instances.
    pub(crate) fn on_signal_added(&mut self, signal: AudioSignalId) {
        let Some(recycling) = self.signals.get(&signal).map(|s| s.recycling) else {
            return;
        };
        let mut parents: Vec<RecallHandle> = self
            .recalls
            .values()
            .filter(|r| {
                r.owner == RecallOwner::Recycling(recycling)
                    && r.state == RecallState::Active
                    && r.child_level() == Some(Level::AudioSignal)
            })
            .map(|r| r.handle)
            .collect();
        parents.sort();
        for parent in parents {
            let recall_id = self.recalls.get(&parent).and_then(|r| r.recall_id);
            if !self.signal_matches(signal, recall_id) {
                continue;
            }
            if let Some(child) = self.create_child(parent, RecallOwner::AudioSignal(signal)) {
                self.spawn_children(child);
            }
        }
    }

    /// Move recycling-level children of a channel's instances to its new range.
    pub(crate) fn migrate_channel(
        &mut self,
        channel: ChannelId,
        removed: &[RecyclingId],
        added: &[RecyclingId],
    ) {
        let mut instances: Vec<RecallHandle> = self
            .recalls
            .values()
            .filter(|r| {
                !r.is_template()
                    && r.owner == RecallOwner::Channel(channel)
                    && r.state != RecallState::Removed
                    && r.child_level() == Some(Level::Recycling)
            })
            .map(|r| r.handle)
            .collect();
        if instances.is_empty() {
            return;
        }
        instances.sort();
        let members = self.channel_recyclings(channel);
        for instance in instances {
            let stale: Vec<RecallHandle> = self
                .recalls
                .get(&instance)
                .map(|r| r.children.clone())
                .unwrap_or_default()
                .into_iter()
                .filter(|c| {
                    self.recalls.get(c).is_some_and(|c| {
                        matches!(c.owner, RecallOwner::Recycling(r) if removed.contains(&r))
                    })
                })
                .collect();
            for child in stale {
                self.kill_instance(child);
            }
            for recycling in added {
                if let Some(child) = self.create_child(instance, RecallOwner::Recycling(*recycling)) {
                    self.spawn_children(child);
                }
            }
            let position = |owner: RecallOwner| match owner {
                RecallOwner::Recycling(r) => members.iter().position(|m| *m == r),
                _ => None,
            };
            let mut order: Vec<(Option<usize>, RecallHandle)> = self
                .recalls
                .get(&instance)
                .map(|r| r.children.clone())
                .unwrap_or_default()
                .into_iter()
                .map(|c| (self.recalls.get(&c).and_then(|c| position(c.owner)), c))
                .collect();
            if let Some(recall) = self.recalls.get_mut(&instance) {
                order.sort_by_key(|(position, _)| *position);
                recall.children = order.into_iter().map(|(_, c)| c).collect();
            }
            tracing::trace!(recall = %instance, %channel, removed = removed.len(), added = added.len(), "instance migrated");
        }
    }

    /// Remove an instance and everything below it at once.
    pub(crate) fn kill_instance(&mut self, handle: RecallHandle) {
        let Some(mut recall) = self.recalls.remove(&handle) else {
            return;
        };
        recall.state = RecallState::Removed;
        for child in std::mem::take(&mut recall.children) {
            self.kill_instance(child);
        }
        if let Some(parent) = recall.parent.and_then(|p| self.recalls.get_mut(&p)) {
            parent.children.retain(|c| *c != handle);
        }
        if let (Some(template), Some(recall_id)) = (recall.template, recall.recall_id) {
            if self.instance_index.get(&(template, recall_id)) == Some(&handle) {
                self.instance_index.remove(&(template, recall_id));
            }
            if let Some(ctx) = self.contexts.get_mut(&recall_id) {
                ctx.instances.retain(|h| *h != handle);
            }
        }
        tracing::trace!(recall = %handle, "instance removed");
    }

    fn kill_owned_by(&mut self, owner: RecallOwner) {
        let mut owned: Vec<(RecallHandle, Option<RecallHandle>)> = self
            .recalls
            .values()
            .filter(|r| r.owner == owner && !r.is_template())
            .map(|r| (r.handle, r.parent))
            .collect();
        owned.sort();
        for (handle, parent) in owned {
            self.kill_instance(handle);
            if let Some(parent) = parent {
                self.propagate_done(parent);
            }
        }
    }

    pub(crate) fn kill_owned_by_signal(&mut self, signal: AudioSignalId) {
        self.kill_owned_by(RecallOwner::AudioSignal(signal));
    }

    pub(crate) fn kill_owned_by_recycling(&mut self, recycling: RecyclingId) {
        self.kill_owned_by(RecallOwner::Recycling(recycling));
    }

    pub(crate) fn kill_owned_by_channel(&mut self, channel: ChannelId) {
        self.kill_owned_by(RecallOwner::Channel(channel));
    }

    /// Nearest port named `name` up the parent chain.
    pub(crate) fn resolve_port(&self, handle: RecallHandle, name: &str) -> Option<Arc<PortCell>> {
        let mut current = self.recalls.get(&handle);
        while let Some(recall) = current {
            if let Some(port) = recall.ports.get(name) {
                return Some(Arc::clone(port.cell()));
            }
            current = recall.parent.and_then(|p| self.recalls.get(&p));
        }
        None
    }

    /// Range-checked control write. Shared ports reach every instance.
    pub fn safe_write_port(&mut self, handle: RecallHandle, port: &str, value: f64) -> Result<()> {
        let recall = self.recall(handle)?;
        let target = recall.ports.get(port).ok_or_else(|| Error::UnknownPort {
            recall: handle,
            port: port.to_string(),
        })?;
        target.safe_write(value)?;
        let value = target.value();
        self.emit(GraphEvent::ControlChanged {
            recall: handle,
            port: port.to_string(),
            value,
        });
        Ok(())
    }

    /// Tempo of every delay counter, or of those on one audio.
    pub fn set_bpm(&mut self, audio: Option<AudioId>, bpm: f64) -> Result<()> {
        let mut config = self.config.clone();
        config.bpm = bpm;
        self.retime(audio, "bpm", bpm, config)
    }

    /// Step length as a fraction of a beat.
    pub fn set_tact(&mut self, audio: Option<AudioId>, tact: f64) -> Result<()> {
        let mut config = self.config.clone();
        config.delay_factor = tact;
        self.retime(audio, "tact", tact, config)
    }

    /// Validates the config and every target port before anything is written.
    fn retime(
        &mut self,
        audio: Option<AudioId>,
        port: &str,
        value: f64,
        config: EngineConfig,
    ) -> Result<()> {
        config.validate()?;
        let mut targets: Vec<RecallHandle> = self
            .recalls
            .values()
            .filter(|r| r.role() == RecallRole::DelayCounter && r.ports.get(port).is_some())
            .filter(|r| match (audio, r.owner) {
                (None, _) => true,
                (Some(a), RecallOwner::Audio(owner)) => a == owner,
                (Some(_), _) => false,
            })
            .map(|r| r.handle)
            .collect();
        targets.sort();
        for handle in &targets {
            if let Some(target) = self.recall(*handle)?.ports.get(port) {
                target.check(value)?;
            }
        }
        for handle in targets {
            self.safe_write_port(handle, port, value)?;
        }
        if audio.is_none() {
            self.config = config;
        }
        Ok(())
    }
}
