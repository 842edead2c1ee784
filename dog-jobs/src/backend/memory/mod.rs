//! In-process queue backend for development and tests.

mod consumer;
pub mod storage;

pub use storage::{MemoryBackend, DEFAULT_POLL_INTERVAL};
