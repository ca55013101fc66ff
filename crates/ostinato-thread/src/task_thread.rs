//! FIFO of graph mutations, drained between tics.
//!
//! Callers hold a cloneable [`TaskLauncher`] and get a [`TaskTicket`] per
//! submission. The audio loop owns the [`TaskThread`] and calls
//! [`TaskThread::drain`] while it holds the graph and no tree is running,
//! which keeps task application linearizable with the tic sequence.

use crate::task::{Task, TaskOutcome};
use crate::{Error, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use ostinato_core::AudioGraph;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Task re-applied at every drain until removed.
pub type CyclicTask = Box<dyn FnMut(&mut AudioGraph) -> Result<()> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CyclicId(u64);

struct Envelope {
    task: Task,
    reply: Sender<Result<TaskOutcome>>,
}

/// Receives the result of one task, exactly once.
#[derive(Debug)]
pub struct TaskTicket {
    name: &'static str,
    rx: Receiver<Result<TaskOutcome>>,
}

impl TaskTicket {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Block until the task was applied.
    pub fn wait(self) -> Result<TaskOutcome> {
        self.rx.recv().map_err(|_| Error::QueueClosed)?
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<TaskOutcome>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(Error::QueueClosed)),
        }
    }

    /// The result, if the task has been applied.
    pub fn try_result(&self) -> Option<Result<TaskOutcome>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(Error::QueueClosed)),
        }
    }
}

#[derive(Default)]
struct CyclicSet {
    next_id: AtomicU64,
    tasks: Mutex<Vec<(CyclicId, CyclicTask)>>,
}

/// Submission side of the queue.
#[derive(Clone)]
pub struct TaskLauncher {
    tx: Sender<Envelope>,
    cyclic: Arc<CyclicSet>,
}

impl TaskLauncher {
    /// Queue a task. Blocks while the queue is full.
    pub fn submit(&self, task: Task) -> Result<TaskTicket> {
        let (reply, rx) = bounded(1);
        let name = task.name();
        self.tx
            .send(Envelope { task, reply })
            .map_err(|_| Error::QueueClosed)?;
        tracing::trace!(task = name, "task queued");
        Ok(TaskTicket { name, rx })
    }

    pub fn add_cyclic<F>(&self, f: F) -> CyclicId
    where
        F: FnMut(&mut AudioGraph) -> Result<()> + Send + 'static,
    {
        let id = CyclicId(self.cyclic.next_id.fetch_add(1, Ordering::Relaxed));
        self.cyclic.tasks.lock().push((id, Box::new(f)));
        id
    }

    /// Returns false if `id` was not registered.
    pub fn remove_cyclic(&self, id: CyclicId) -> bool {
        let mut tasks = self.cyclic.tasks.lock();
        let before = tasks.len();
        tasks.retain(|(cid, _)| *cid != id);
        tasks.len() != before
    }

    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

/// What one drain did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub applied: usize,
    pub rejected: usize,
    pub cyclic: usize,
}

pub struct TaskThread {
    tx: Sender<Envelope>,
    rx: Receiver<Envelope>,
    cyclic: Arc<CyclicSet>,
}

impl TaskThread {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            tx,
            rx,
            cyclic: Arc::new(CyclicSet::default()),
        }
    }

    pub fn launcher(&self) -> TaskLauncher {
        TaskLauncher {
            tx: self.tx.clone(),
            cyclic: Arc::clone(&self.cyclic),
        }
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Apply up to `max` queued tasks in submission order, then every cyclic
    /// task. Each submitter is answered exactly once.
    pub fn drain(&mut self, graph: &mut AudioGraph, max: usize) -> DrainReport {
        let mut report = DrainReport::default();
        for _ in 0..max {
            let Ok(Envelope { task, reply }) = self.rx.try_recv() else {
                break;
            };
            let name = task.name();
            let result = task.apply(graph);
            match &result {
                Ok(outcome) => {
                    report.applied += 1;
                    tracing::debug!(task = name, ?outcome, "task applied");
                }
                Err(error) => {
                    report.rejected += 1;
                    tracing::warn!(task = name, %error, "task rejected");
                }
            }
            // submitter may have dropped its ticket
            let _ = reply.send(result);
        }

        let mut cyclic = self.cyclic.tasks.lock();
        for (id, task) in cyclic.iter_mut() {
            report.cyclic += 1;
            if let Err(error) = task(graph) {
                tracing::warn!(?id, %error, "cyclic task failed");
            }
        }
        report
    }
}

impl Default for TaskThread {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ControlScope;
    use ostinato_core::{AudioSpec, ChannelKind, EffectRegistry, EngineConfig};

    fn graph() -> AudioGraph {
        let config = EngineConfig {
            buffer_size: 64,
            ..Default::default()
        };
        AudioGraph::new(config, EffectRegistry::default()).unwrap()
    }

    #[test]
    fn test_tasks_apply_in_order() {
        let mut g = graph();
        let audio = g.add_audio(AudioSpec::new("synth")).unwrap();
        let mut thread = TaskThread::new(8);
        let launcher = thread.launcher();

        let grow = launcher
            .submit(Task::SetPads {
                audio,
                kind: ChannelKind::Input,
                count: 4,
            })
            .unwrap();
        let shrink = launcher
            .submit(Task::SetPads {
                audio,
                kind: ChannelKind::Input,
                count: 2,
            })
            .unwrap();
        assert!(grow.try_result().is_none());
        assert_eq!(launcher.pending(), 2);

        let report = thread.drain(&mut g, 16);
        assert_eq!(report.applied, 2);
        assert_eq!(grow.wait().unwrap(), TaskOutcome::Done);
        assert_eq!(shrink.wait().unwrap(), TaskOutcome::Done);
        assert_eq!(g.audio(audio).unwrap().input_pads(), 2);
    }

    #[test]
    fn test_drain_respects_max() {
        let mut g = graph();
        let mut thread = TaskThread::new(8);
        let launcher = thread.launcher();
        let tickets: Vec<_> = (0..3)
            .map(|i| {
                launcher
                    .submit(Task::SetBpm {
                        scope: ControlScope::Global,
                        value: 100.0 + i as f64,
                    })
                    .unwrap()
            })
            .collect();

        assert_eq!(thread.drain(&mut g, 2).applied, 2);
        assert!(tickets[2].try_result().is_none());
        assert_eq!(thread.drain(&mut g, 2).applied, 1);
        assert!(tickets[2].try_result().is_some());
        assert!((g.config().bpm - 102.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejected_task_reports_error() {
        let mut g = graph();
        let mut thread = TaskThread::new(4);
        let ticket = thread
            .launcher()
            .submit(Task::SetBpm {
                scope: ControlScope::Global,
                value: 0.0,
            })
            .unwrap();
        let report = thread.drain(&mut g, 4);
        assert_eq!(report.rejected, 1);
        assert!(matches!(
            ticket.wait_timeout(Duration::from_millis(10)),
            Some(Err(Error::Core(ostinato_core::Error::InvalidConfig(_))))
        ));
        assert!((g.config().bpm - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_closed_queue() {
        let thread = TaskThread::new(1);
        let launcher = thread.launcher();
        drop(thread);
        // the launcher keeps a sender, the receiver is gone
        assert!(matches!(
            launcher.submit(Task::custom(|_| Ok(TaskOutcome::Done))),
            Err(Error::QueueClosed)
        ));
    }

    #[test]
    fn test_cyclic_tasks_run_every_drain() {
        let mut g = graph();
        let mut thread = TaskThread::new(4);
        let launcher = thread.launcher();
        let count = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&count);
        let id = launcher.add_cyclic(move |_| {
            seen.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });

        thread.drain(&mut g, 4);
        thread.drain(&mut g, 4);
        assert_eq!(count.load(Ordering::Relaxed), 2);

        assert!(launcher.remove_cyclic(id));
        assert!(!launcher.remove_cyclic(id));
        assert_eq!(thread.drain(&mut g, 4).cyclic, 0);
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }
}
