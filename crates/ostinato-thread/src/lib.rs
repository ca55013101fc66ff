//! Scheduling for the ostinato audio graph.
//!
//! # Features
//!
//! - **Audio loop**: drives tics manually or from a real-time thread
//! - **Task queue**: graph mutations applied between tics, one ticket per task
//! - **Polling thread**: edge-triggered readiness callbacks on a fixed jiffie
//! - **Super-threaded mode**: one worker per armed root audio
//!
//! # Example
//!
//! ```ignore
//! use ostinato_thread::{AudioLoop, Task};
//!
//! let audio_loop = AudioLoop::new(graph, soundcard);
//! let ticket = audio_loop.launcher().submit(Task::StartPlayback {
//!     audio,
//!     scope: SoundScope::Playback,
//! })?;
//! audio_loop.tic()?;
//! let root = ticket.wait()?;
//! ```

// Error types
pub mod error;
pub use error::{Error, Result};

pub mod audio_loop;
pub mod polling_thread;
pub mod task;
pub mod task_thread;
pub mod worker;

pub use audio_loop::{AudioLoop, TicObserver, TicSnapshot};
pub use polling_thread::{
    Interest, PollCallback, PollEvent, PollId, PollingControl, PollingThread, RawFd,
};
pub use task::{ControlScope, CustomTask, Task, TaskOutcome};
pub use task_thread::{CyclicId, CyclicTask, DrainReport, TaskLauncher, TaskThread, TaskTicket};
pub use worker::{AudioWorker, WorkerPool, WorkerReply};
