//! Error types for ostinato-thread.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] ostinato_core::Error),

    /// The task queue or a worker channel was closed.
    #[error("Task queue closed")]
    QueueClosed,

    #[error("Failed to spawn thread '{name}': {source}")]
    ThreadSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Poll failed: {0}")]
    Poll(#[from] std::io::Error),

    #[error("Not running")]
    NotRunning,

    #[error("Already running")]
    AlreadyRunning,
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
