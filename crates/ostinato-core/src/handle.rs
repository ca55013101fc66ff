//! Stable handles into the [`AudioGraph`](crate::AudioGraph) arena.
//!
//! Back-references between nodes (channel to audio, recycling to channel,
//! recall to context) are stored as these handles and resolved by lookup.
//! Handles are allocated monotonically by the owning graph and never reused.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl $name {
            /// Raw index value.
            #[inline]
            pub fn raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

define_handle!(
    /// Handle of an [`Audio`](crate::Audio).
    AudioId,
    "audio"
);
define_handle!(
    /// Handle of a [`Channel`](crate::Channel).
    ChannelId,
    "channel"
);
define_handle!(
    /// Handle of a [`Recycling`](crate::Recycling).
    RecyclingId,
    "recycling"
);
define_handle!(
    /// Handle of an [`AudioSignal`](crate::AudioSignal).
    AudioSignalId,
    "signal"
);
define_handle!(
    /// Handle of a [`Recall`](crate::Recall), template or instance.
    RecallHandle,
    "recall"
);
define_handle!(
    /// Identifies one playback invocation; the duplication key for recalls.
    RecallId,
    "recall-id"
);

/// Monotonic allocator shared by every handle kind of one graph.
#[derive(Debug, Default)]
pub(crate) struct HandleAllocator {
    next: u64,
}

impl HandleAllocator {
    #[inline]
    pub(crate) fn next_raw(&mut self) -> u64 {
        self.next += 1;
        self.next
    }

    pub(crate) fn audio(&mut self) -> AudioId {
        AudioId(self.next_raw())
    }

    pub(crate) fn channel(&mut self) -> ChannelId {
        ChannelId(self.next_raw())
    }

    pub(crate) fn recycling(&mut self) -> RecyclingId {
        RecyclingId(self.next_raw())
    }

    pub(crate) fn signal(&mut self) -> AudioSignalId {
        AudioSignalId(self.next_raw())
    }

    pub(crate) fn recall(&mut self) -> RecallHandle {
        RecallHandle(self.next_raw())
    }

    pub(crate) fn recall_id(&mut self) -> RecallId {
        RecallId(self.next_raw())
    }
}
