//! OstinatoEngine that ties the graph, scheduler and soundcard together.

use crate::Result;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use ostinato_core::{
    AudioGraph, AudioId, AudioSpec, Buffer, ChannelId, EngineConfig, GraphEvent, MemorySoundcard,
    RecallHandle, RecallId, RecallOwner, RecallSpec, SoundScope, Soundcard, Stream,
};
use ostinato_thread::{
    AudioLoop, ControlScope, PollingThread, Task, TaskLauncher, TaskOutcome, TaskTicket,
    TicObserver, TicSnapshot,
};
use std::sync::Arc;

/// Forwards every tic's graph events to a channel.
struct EventForwarder {
    tx: Sender<GraphEvent>,
}

impl TicObserver for EventForwarder {
    fn on_tic(&self, _snapshot: &TicSnapshot, events: &[GraphEvent]) {
        for event in events {
            // receivers may be gone; events are advisory
            let _ = self.tx.send(event.clone());
        }
    }
}

/// Main engine.
///
/// Every graph mutation goes through the task queue and lands between two
/// tics. While the loop thread is stopped, [`OstinatoEngine::apply`] drains
/// the queue on the calling thread instead, so offline rendering needs no
/// thread at all.
///
/// # Example
///
/// ```ignore
/// use ostinato::prelude::*;
///
/// let engine = OstinatoEngine::builder().buffer_size(256).build()?;
/// let drums = engine.add_audio(AudioSpec::new("drums").input_pads(4))?;
/// let input = engine.with_graph(|g| g.audio(drums).map(|a| a.inputs()[0]))?;
/// engine.attach(RecallOwner::Channel(input), RecallSpec::playback())?;
/// engine.start_playback(drums, SoundScope::Playback)?;
/// engine.run_for(16)?;
/// ```
pub struct OstinatoEngine {
    audio_loop: AudioLoop,
    launcher: TaskLauncher,
    memory: Option<Arc<MemorySoundcard>>,
    polling: Option<PollingThread>,
    events: Receiver<GraphEvent>,
}

impl OstinatoEngine {
    pub fn builder() -> crate::OstinatoEngineBuilder {
        crate::OstinatoEngineBuilder::default()
    }

    pub(crate) fn from_parts(
        audio_loop: AudioLoop,
        memory: Option<Arc<MemorySoundcard>>,
        polling: Option<PollingThread>,
    ) -> Self {
        let (tx, events) = unbounded();
        audio_loop.add_observer(Arc::new(EventForwarder { tx }));
        let launcher = audio_loop.launcher();
        Self {
            audio_loop,
            launcher,
            memory,
            polling,
            events,
        }
    }

    pub fn config(&self) -> EngineConfig {
        self.with_graph(|g| g.config().clone())
    }

    /// Cloneable submission handle for other threads.
    pub fn launcher(&self) -> TaskLauncher {
        self.launcher.clone()
    }

    /// Queue a task; it is applied at the start of the next tic.
    pub fn submit(&self, task: Task) -> Result<TaskTicket> {
        Ok(self.launcher.submit(task)?)
    }

    /// Queue a task and wait for its result. Drains immediately while the
    /// loop thread is stopped.
    pub fn apply(&self, task: Task) -> Result<TaskOutcome> {
        let ticket = self.launcher.submit(task)?;
        if !self.audio_loop.is_running() {
            self.audio_loop.drain_tasks()?;
        }
        Ok(ticket.wait()?)
    }

    pub fn add_audio(&self, spec: AudioSpec) -> Result<AudioId> {
        let (tx, rx) = bounded(1);
        self.apply(Task::custom(move |graph| {
            let _ = tx.send(graph.add_audio(spec)?);
            Ok(TaskOutcome::Done)
        }))?;
        rx.try_recv()
            .map_err(|_| ostinato_thread::Error::QueueClosed.into())
    }

    /// Replace the template signal of a channel's own recycling.
    pub fn load_template(&self, channel: ChannelId, stream: Stream, frame_count: u64) -> Result<()> {
        self.apply(Task::custom(move |graph| {
            graph.load_template(channel, stream, frame_count)?;
            Ok(TaskOutcome::Done)
        }))?;
        Ok(())
    }

    pub fn link(&self, output: ChannelId, input: ChannelId) -> Result<()> {
        self.apply(Task::LinkChannel { output, input })?;
        Ok(())
    }

    pub fn attach(&self, owner: RecallOwner, spec: RecallSpec) -> Result<RecallHandle> {
        match self.apply(Task::AttachRecall { owner, spec })? {
            TaskOutcome::Recall(handle) => Ok(handle),
            other => Err(unexpected(other)),
        }
    }

    pub fn start_playback(&self, audio: AudioId, scope: SoundScope) -> Result<RecallId> {
        match self.apply(Task::StartPlayback { audio, scope })? {
            TaskOutcome::Playback(root) => Ok(root),
            other => Err(unexpected(other)),
        }
    }

    pub fn stop_playback(&self, root: RecallId) -> Result<()> {
        self.apply(Task::StopPlayback(root))?;
        Ok(())
    }

    pub fn set_port(&self, recall: RecallHandle, port: impl Into<String>, value: f64) -> Result<()> {
        self.apply(Task::SetPort {
            recall,
            port: port.into(),
            value,
        })?;
        Ok(())
    }

    pub fn set_bpm(&self, scope: ControlScope, bpm: f64) -> Result<()> {
        self.apply(Task::SetBpm { scope, value: bpm })?;
        Ok(())
    }

    /// Run one tic on the calling thread.
    pub fn tic(&self) -> Result<Arc<TicSnapshot>> {
        Ok(self.audio_loop.tic()?)
    }

    pub fn run_for(&self, tics: u64) -> Result<Arc<TicSnapshot>> {
        Ok(self.audio_loop.run_for(tics)?)
    }

    /// Start the real-time loop, and the polling thread if configured.
    pub fn start(&mut self) -> Result<()> {
        self.audio_loop.start()?;
        if let Some(polling) = self.polling.as_mut() {
            polling.start()?;
        }
        tracing::debug!("engine started");
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        if let Some(polling) = self.polling.as_mut() {
            polling.stop();
        }
        self.audio_loop.stop()?;
        tracing::debug!("engine stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.audio_loop.is_running()
    }

    /// Graph events, delivered after the tic that produced them.
    pub fn events(&self) -> Receiver<GraphEvent> {
        self.events.clone()
    }

    pub fn snapshot(&self) -> Arc<TicSnapshot> {
        self.audio_loop.snapshot()
    }

    /// Read-only access to the graph. Blocks while a tic is running.
    pub fn with_graph<R>(&self, f: impl FnOnce(&AudioGraph) -> R) -> R {
        self.audio_loop.with_graph(f)
    }

    pub fn add_observer(&self, observer: Arc<dyn TicObserver>) {
        self.audio_loop.add_observer(observer);
    }

    pub fn soundcard(&self) -> Arc<dyn Soundcard> {
        self.audio_loop.soundcard()
    }

    /// The last committed period.
    pub fn output(&self) -> Buffer {
        self.audio_loop.soundcard().get_buffer()
    }

    /// Periods kept since the last call; empty unless built with `capture()`.
    pub fn take_capture(&self) -> Vec<Buffer> {
        self.memory
            .as_ref()
            .map(|m| m.take_capture())
            .unwrap_or_default()
    }

    pub fn polling(&self) -> Option<&PollingThread> {
        self.polling.as_ref()
    }
}

fn unexpected(outcome: TaskOutcome) -> crate::Error {
    ostinato_core::Error::InvalidGraph(format!("unexpected task outcome {outcome:?}")).into()
}
