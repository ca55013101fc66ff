//! Centralized error type for the ostinato umbrella crate.
//!
//! Wraps the subsystem errors so `?` propagates naturally across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] ostinato_core::Error),

    #[error("Scheduler: {0}")]
    Thread(#[from] ostinato_thread::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The graph error behind this one, if any.
    pub fn core(&self) -> Option<&ostinato_core::Error> {
        match self {
            Self::Core(e) | Self::Thread(ostinato_thread::Error::Core(e)) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
