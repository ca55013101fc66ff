//! Integration tests for the ostinato engine
//!
//! Test categories:
//! - Graph: linking, resizing and recycling migration through the task queue
//! - Recall: duplication, ports, sequencer and mixer scenarios
//! - Scheduler: tic ordering, stream exhaustion, task atomicity, the loop thread
//!
//! Run with:
//! ```bash
//! cargo test -p ostinato --test integration_tests
//! ```

mod helpers;
mod integration;
