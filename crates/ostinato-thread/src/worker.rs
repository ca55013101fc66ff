//! Super-threaded mode: one worker thread per armed root audio.
//!
//! Workers run whole playback trees. They take the graph lock for the length
//! of a tree, so trees still execute one at a time; what moves off the loop
//! thread is the stage work itself. The loop waits for every reply before it
//! commits the period.

use crate::{Error, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use hashbrown::HashMap;
use ostinato_core::{AudioGraph, AudioId, RecallId, Soundcard, StageIo, TicStats};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thread_priority::ThreadPriority;

enum WorkerCommand {
    Run {
        root: RecallId,
        reply: Sender<WorkerReply>,
    },
    Shutdown,
}

/// Result of one tree run.
#[derive(Debug)]
pub struct WorkerReply {
    pub audio: AudioId,
    pub root: RecallId,
    pub stats: TicStats,
    pub result: ostinato_core::Result<()>,
}

pub struct AudioWorker {
    audio: AudioId,
    command_tx: Sender<WorkerCommand>,
    shutdown: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl AudioWorker {
    pub fn spawn(
        audio: AudioId,
        graph: Arc<Mutex<AudioGraph>>,
        soundcard: Arc<dyn Soundcard>,
        lock_timeout: Duration,
    ) -> Result<Self> {
        let (tx, rx) = bounded(4);
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let name = format!("ostinato-worker-{}", audio.raw());

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let _ = thread_priority::set_current_thread_priority(ThreadPriority::Max);
                worker_loop(audio, rx, graph, soundcard, lock_timeout, flag);
            })
            .map_err(|source| Error::ThreadSpawn { name, source })?;
        tracing::debug!(%audio, "audio worker started");

        Ok(Self {
            audio,
            command_tx: tx,
            shutdown,
            thread_handle: Some(handle),
        })
    }

    pub fn audio(&self) -> AudioId {
        self.audio
    }

    pub fn dispatch(&self, root: RecallId, reply: Sender<WorkerReply>) -> Result<()> {
        self.command_tx
            .send(WorkerCommand::Run { root, reply })
            .map_err(|_| Error::QueueClosed)
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.command_tx.send(WorkerCommand::Shutdown);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::debug!(audio = %self.audio, "audio worker stopped");
        }
    }
}

impl Drop for AudioWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(
    audio: AudioId,
    rx: Receiver<WorkerCommand>,
    graph: Arc<Mutex<AudioGraph>>,
    soundcard: Arc<dyn Soundcard>,
    lock_timeout: Duration,
    shutdown: Arc<AtomicBool>,
) {
    while let Ok(command) = rx.recv() {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match command {
            WorkerCommand::Run { root, reply } => {
                let mut io = StageIo::new(soundcard.as_ref(), lock_timeout);
                let result = graph.lock().run_playback(root, &mut io);
                let _ = reply.send(WorkerReply {
                    audio,
                    root,
                    stats: io.stats,
                    result,
                });
            }
            WorkerCommand::Shutdown => break,
        }
    }
}

/// Workers keyed by root audio, grown and shrunk with the armed playbacks.
pub struct WorkerPool {
    graph: Arc<Mutex<AudioGraph>>,
    soundcard: Arc<dyn Soundcard>,
    lock_timeout: Duration,
    workers: HashMap<AudioId, AudioWorker>,
}

impl WorkerPool {
    pub fn new(
        graph: Arc<Mutex<AudioGraph>>,
        soundcard: Arc<dyn Soundcard>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            graph,
            soundcard,
            lock_timeout,
            workers: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Run every `(root, audio)` tree on its worker and wait for all of them.
    /// The graph lock must not be held by the caller.
    pub fn run(&mut self, roots: &[(RecallId, AudioId)]) -> Result<TicStats> {
        self.workers
            .retain(|audio, _| roots.iter().any(|(_, a)| a == audio));

        let (reply_tx, reply_rx) = unbounded();
        for (root, audio) in roots {
            if !self.workers.contains_key(audio) {
                let worker = AudioWorker::spawn(
                    *audio,
                    Arc::clone(&self.graph),
                    Arc::clone(&self.soundcard),
                    self.lock_timeout,
                )?;
                self.workers.insert(*audio, worker);
            }
            if let Some(worker) = self.workers.get(audio) {
                worker.dispatch(*root, reply_tx.clone())?;
            }
        }
        drop(reply_tx);

        let mut stats = TicStats::default();
        let mut received = 0;
        while received < roots.len() {
            let reply = reply_rx.recv().map_err(|_| Error::QueueClosed)?;
            received += 1;
            stats.merge(&reply.stats);
            if let Err(error) = reply.result {
                tracing::warn!(root = %reply.root, audio = %reply.audio, %error, "playback tree skipped");
            }
        }
        Ok(stats)
    }

    pub fn shutdown(&mut self) {
        self.workers.clear();
    }
}
