//! The periodic driver.
//!
//! One tic: drain tasks, purge what finished last tic, run every armed
//! playback tree, advance signal cursors, commit the soundcard period,
//! publish a [`TicSnapshot`] and notify observers. Tasks are only applied at
//! the start of a tic, so no tree ever sees a half-applied mutation.
//!
//! The graph lock is released while the trees run so super-threaded workers
//! can take it. Everything else that touches the graph goes through the tic
//! fence, which is held from the drain to the period commit.

use crate::polling_thread::PollingControl;
use crate::task_thread::{DrainReport, TaskLauncher, TaskThread};
use crate::worker::WorkerPool;
use crate::{Error, Result};
use arc_swap::ArcSwap;
use ostinato_core::{AudioGraph, AudioId, GraphEvent, RecallId, Soundcard, StageIo, TicStats};
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thread_priority::ThreadPriority;

/// State after a completed tic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TicSnapshot {
    /// Tics completed so far.
    pub tic: u64,
    pub stats: TicStats,
    pub tasks: DrainReport,
    /// Armed playback trees after the tic.
    pub playbacks: usize,
    pub elapsed: Duration,
    /// The tic took longer than one period.
    pub late: bool,
}

/// Called on the loop thread after every tic. Keep it short.
pub trait TicObserver: Send + Sync {
    fn on_tic(&self, snapshot: &TicSnapshot, events: &[GraphEvent]);
}

struct LoopCore {
    /// Held for a whole tic; outside readers and drains wait on it.
    fence: Mutex<()>,
    graph: Arc<Mutex<AudioGraph>>,
    tasks: Mutex<TaskThread>,
    soundcard: Arc<dyn Soundcard>,
    workers: Mutex<Option<WorkerPool>>,
    snapshot: ArcSwap<TicSnapshot>,
    observers: RwLock<Vec<Arc<dyn TicObserver>>>,
    polling: RwLock<Option<PollingControl>>,
}

impl LoopCore {
    fn tic(&self) -> Result<Arc<TicSnapshot>> {
        let started = Instant::now();
        let fence = self.fence.lock();
        let (tasks, roots, lock_timeout, period) = {
            let mut graph = self.graph.lock();
            let max = graph.config().max_tasks_per_drain;
            let tasks = self.tasks.lock().drain(&mut graph, max);
            graph.begin_tic();
            let roots: SmallVec<[(RecallId, AudioId); 8]> =
                graph.playbacks().iter().map(|p| (p.root, p.audio)).collect();
            let config = graph.config();
            (
                tasks,
                roots,
                config.sub_block_lock_timeout(),
                config.period(),
            )
        };

        self.soundcard.begin_period();
        let stats = self.run_trees(&roots, lock_timeout)?;

        let (events, tic, playbacks) = {
            let mut graph = self.graph.lock();
            graph.end_tic();
            (graph.drain_events(), graph.tic(), graph.playbacks().len())
        };
        self.soundcard.commit_period();
        drop(fence);

        let elapsed = started.elapsed();
        let snapshot = Arc::new(TicSnapshot {
            tic,
            stats,
            tasks,
            playbacks,
            elapsed,
            late: elapsed > period,
        });
        self.snapshot.store(Arc::clone(&snapshot));
        tracing::trace!(tic, playbacks, events = events.len(), ?elapsed, "tic");

        for observer in self.observers.read().iter() {
            observer.on_tic(&snapshot, &events);
        }
        Ok(snapshot)
    }

    fn run_trees(
        &self,
        roots: &[(RecallId, AudioId)],
        lock_timeout: Duration,
    ) -> Result<TicStats> {
        let mut workers = self.workers.lock();
        if let Some(pool) = workers.as_mut() {
            return pool.run(roots);
        }
        drop(workers);

        let mut io = StageIo::new(self.soundcard.as_ref(), lock_timeout);
        let mut graph = self.graph.lock();
        for (root, _) in roots {
            if let Err(error) = graph.run_playback(*root, &mut io) {
                tracing::warn!(%root, %error, "playback tree skipped");
            }
        }
        Ok(io.stats)
    }

    fn report_late(&self, snapshot: &TicSnapshot, period: Duration) {
        tracing::warn!(
            tic = snapshot.tic,
            elapsed = ?snapshot.elapsed,
            ?period,
            "tic ran late"
        );
        if let Some(polling) = self.polling.read().as_ref() {
            polling.omit(1);
        }
    }
}

/// Drives tics either manually or from a real-time thread.
pub struct AudioLoop {
    core: Arc<LoopCore>,
    launcher: TaskLauncher,
    shutdown: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl AudioLoop {
    pub fn new(graph: AudioGraph, soundcard: Arc<dyn Soundcard>) -> Self {
        let config = graph.config().clone();
        let tasks = TaskThread::new(config.max_tasks_per_drain);
        let launcher = tasks.launcher();
        let graph = Arc::new(Mutex::new(graph));
        let workers = config.super_threaded.then(|| {
            WorkerPool::new(
                Arc::clone(&graph),
                Arc::clone(&soundcard),
                config.sub_block_lock_timeout(),
            )
        });

        Self {
            core: Arc::new(LoopCore {
                fence: Mutex::new(()),
                graph,
                tasks: Mutex::new(tasks),
                soundcard,
                workers: Mutex::new(workers),
                snapshot: ArcSwap::from_pointee(TicSnapshot::default()),
                observers: RwLock::new(Vec::new()),
                polling: RwLock::new(None),
            }),
            launcher,
            shutdown: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }

    pub fn launcher(&self) -> TaskLauncher {
        self.launcher.clone()
    }

    /// Read the graph between tics. Blocks while a tic is in flight.
    pub fn with_graph<R>(&self, f: impl FnOnce(&AudioGraph) -> R) -> R {
        let _fence = self.core.fence.lock();
        let graph = self.core.graph.lock();
        f(&graph)
    }

    pub fn soundcard(&self) -> Arc<dyn Soundcard> {
        Arc::clone(&self.core.soundcard)
    }

    /// The last published snapshot.
    pub fn snapshot(&self) -> Arc<TicSnapshot> {
        self.core.snapshot.load_full()
    }

    pub fn add_observer(&self, observer: Arc<dyn TicObserver>) {
        self.core.observers.write().push(observer);
    }

    /// Passes of this polling thread are omitted whenever a tic runs late.
    pub fn set_polling(&self, control: PollingControl) {
        *self.core.polling.write() = Some(control);
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle.is_some()
    }

    /// Apply queued tasks without running a tic. Only while stopped; the
    /// loop thread drains at the start of each of its tics.
    pub fn drain_tasks(&self) -> Result<DrainReport> {
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }
        let _fence = self.core.fence.lock();
        let mut graph = self.core.graph.lock();
        let max = graph.config().max_tasks_per_drain;
        Ok(self.core.tasks.lock().drain(&mut graph, max))
    }

    /// Run one tic on the calling thread.
    pub fn tic(&self) -> Result<Arc<TicSnapshot>> {
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }
        self.core.tic()
    }

    pub fn run_for(&self, tics: u64) -> Result<Arc<TicSnapshot>> {
        let mut last = self.snapshot();
        for _ in 0..tics {
            last = self.tic()?;
        }
        Ok(last)
    }

    /// Spawn the loop thread, paced at one period per tic.
    pub fn start(&mut self) -> Result<()> {
        if self.thread_handle.is_some() {
            return Err(Error::AlreadyRunning);
        }
        self.shutdown.store(false, Ordering::SeqCst);

        let core = Arc::clone(&self.core);
        let shutdown = Arc::clone(&self.shutdown);
        let period = self.with_graph(|g| g.config().period());
        let name = "ostinato-audio-loop".to_string();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                if let Err(e) = thread_priority::set_current_thread_priority(ThreadPriority::Max)
                {
                    tracing::warn!(?e, "could not raise audio loop priority");
                }
                audio_loop(core, shutdown, period);
            })
            .map_err(|source| Error::ThreadSpawn { name, source })?;

        self.thread_handle = Some(handle);
        tracing::debug!(?period, "audio loop started");
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.thread_handle.take() else {
            return Err(Error::NotRunning);
        };
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = handle.join();
        tracing::debug!("audio loop stopped");
        Ok(())
    }
}

impl Drop for AudioLoop {
    fn drop(&mut self) {
        let _ = self.stop();
        if let Some(pool) = self.core.workers.lock().as_mut() {
            pool.shutdown();
        }
    }
}

fn audio_loop(core: Arc<LoopCore>, shutdown: Arc<AtomicBool>, period: Duration) {
    let mut next = Instant::now();
    while !shutdown.load(Ordering::SeqCst) {
        match core.tic() {
            Ok(snapshot) if snapshot.late => core.report_late(&snapshot, period),
            Ok(_) => {}
            Err(error) => {
                tracing::error!(%error, "tic failed, stopping audio loop");
                break;
            }
        }

        pace(&mut next, period);
    }
}

/// Sleep until the next deadline, `period` after the previous one. A thread
/// that fell behind restarts its schedule from now instead of bursting.
pub(crate) fn pace(next: &mut Instant, period: Duration) {
    *next += period;
    let now = Instant::now();
    if *next > now {
        thread::sleep(*next - now);
    } else {
        *next = now;
    }
}
