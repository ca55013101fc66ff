//! Fixed-rate readiness polling for control sources.
//!
//! Registered file descriptors are polled once per jiffie with a zero timeout,
//! so a pass never blocks. A callback fires only when its descriptor goes from
//! not ready to ready. The audio loop calls [`PollingControl::omit`] when it
//! runs late and the next passes are skipped.

use crate::audio_loop::pace;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thread_priority::ThreadPriority;

pub type RawFd = i32;

/// Conditions a source is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const READABLE: Self = Self {
        readable: true,
        writable: false,
    };
    pub const WRITABLE: Self = Self {
        readable: false,
        writable: true,
    };
}

/// Readiness passed to a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollEvent {
    pub fd: RawFd,
    pub readable: bool,
    pub writable: bool,
    /// Error or hang-up on the descriptor.
    pub hangup: bool,
}

pub type PollCallback = Box<dyn FnMut(PollEvent) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PollId(u64);

struct Source {
    id: PollId,
    fd: RawFd,
    interest: Interest,
    callback: PollCallback,
    was_ready: bool,
}

#[derive(Default)]
struct PollShared {
    sources: Mutex<Vec<Source>>,
    next_id: AtomicU64,
    omit: AtomicU32,
    passes: AtomicU64,
    omitted: AtomicU64,
}

/// Cloneable handle used by other threads to skip passes.
#[derive(Clone)]
pub struct PollingControl {
    shared: Arc<PollShared>,
}

impl PollingControl {
    /// Skip the next `count` passes.
    pub fn omit(&self, count: u32) {
        self.shared.omit.fetch_add(count, Ordering::AcqRel);
    }
}

pub struct PollingThread {
    shared: Arc<PollShared>,
    jiffie: u32,
    shutdown: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl PollingThread {
    /// `jiffie` is the polling rate in Hz.
    pub fn new(jiffie: u32) -> Self {
        Self {
            shared: Arc::new(PollShared::default()),
            jiffie: jiffie.max(1),
            shutdown: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }

    pub fn control(&self) -> PollingControl {
        PollingControl {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Watch `fd`. The descriptor stays owned by the caller.
    pub fn register<F>(&self, fd: RawFd, interest: Interest, callback: F) -> PollId
    where
        F: FnMut(PollEvent) + Send + 'static,
    {
        let id = PollId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        self.shared.sources.lock().push(Source {
            id,
            fd,
            interest,
            callback: Box::new(callback),
            was_ready: false,
        });
        tracing::debug!(fd, ?id, "poll source registered");
        id
    }

    pub fn unregister(&self, id: PollId) -> bool {
        let mut sources = self.shared.sources.lock();
        let before = sources.len();
        sources.retain(|s| s.id != id);
        sources.len() != before
    }

    pub fn omit(&self, count: u32) {
        self.control().omit(count);
    }

    /// Passes that polled.
    pub fn passes(&self) -> u64 {
        self.shared.passes.load(Ordering::Relaxed)
    }

    /// Passes skipped by `omit`.
    pub fn omitted(&self) -> u64 {
        self.shared.omitted.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle.is_some()
    }

    /// One pass on the calling thread. Returns how many callbacks fired.
    pub fn poll_once(&self) -> Result<usize> {
        poll_pass(&self.shared)
    }

    pub fn start(&mut self) -> Result<()> {
        if self.thread_handle.is_some() {
            return Err(Error::AlreadyRunning);
        }
        self.shutdown.store(false, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = Duration::from_secs(1) / self.jiffie;
        let name = "ostinato-polling".to_string();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let _ = thread_priority::set_current_thread_priority(ThreadPriority::Max);
                polling_loop(shared, shutdown, interval);
            })
            .map_err(|source| Error::ThreadSpawn { name, source })?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PollingThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn polling_loop(shared: Arc<PollShared>, shutdown: Arc<AtomicBool>, interval: Duration) {
    let mut next = Instant::now();
    while !shutdown.load(Ordering::SeqCst) {
        if let Err(error) = poll_pass(&shared) {
            tracing::error!(%error, "poll pass failed");
        }
        pace(&mut next, interval);
    }
}

fn poll_pass(shared: &PollShared) -> Result<usize> {
    let pending = shared.omit.load(Ordering::Acquire);
    if pending > 0
        && shared
            .omit
            .compare_exchange(pending, pending - 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    {
        shared.omitted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(remaining = pending - 1, "poll pass omitted");
        return Ok(0);
    }

    let mut sources = shared.sources.lock();
    let readiness = poll_fds(&sources)?;
    shared.passes.fetch_add(1, Ordering::Relaxed);

    let mut fired = 0;
    for (source, event) in sources.iter_mut().zip(readiness) {
        let ready = (source.interest.readable && event.readable)
            || (source.interest.writable && event.writable)
            || event.hangup;
        if ready && !source.was_ready {
            (source.callback)(event);
            fired += 1;
        }
        source.was_ready = ready;
    }
    Ok(fired)
}

#[cfg(unix)]
fn poll_fds(sources: &[Source]) -> Result<Vec<PollEvent>> {
    let mut fds: Vec<libc::pollfd> = sources
        .iter()
        .map(|s| {
            let mut events = 0;
            if s.interest.readable {
                events |= libc::POLLIN;
            }
            if s.interest.writable {
                events |= libc::POLLOUT;
            }
            libc::pollfd {
                fd: s.fd,
                events,
                revents: 0,
            }
        })
        .collect();
    if fds.is_empty() {
        return Ok(Vec::new());
    }

    // SAFETY: `fds` is a valid, initialized slice for the duration of the call.
    let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, 0) };
    if rc < 0 {
        let error = std::io::Error::last_os_error();
        if error.kind() == std::io::ErrorKind::Interrupted {
            return Ok(sources.iter().map(|s| idle(s.fd)).collect());
        }
        return Err(Error::Poll(error));
    }

    Ok(fds
        .iter()
        .map(|p| PollEvent {
            fd: p.fd,
            readable: p.revents & libc::POLLIN != 0,
            writable: p.revents & libc::POLLOUT != 0,
            hangup: p.revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0,
        })
        .collect())
}

#[cfg(not(unix))]
fn poll_fds(sources: &[Source]) -> Result<Vec<PollEvent>> {
    if sources.is_empty() {
        return Ok(Vec::new());
    }
    Err(Error::Poll(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "descriptor polling needs a unix platform",
    )))
}

#[cfg(unix)]
fn idle(fd: RawFd) -> PollEvent {
    PollEvent {
        fd,
        readable: false,
        writable: false,
        hangup: false,
    }
}
