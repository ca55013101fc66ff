//! Integration test modules for ostinato

pub mod graph;
pub mod recall;
pub mod scheduler;
