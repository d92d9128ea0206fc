//! # rstchart-storage
//!
//! Checkpoint storage for rstchart.
//!
//! This crate provides:
//! - The `CheckpointStore` contract used by the runtime
//! - A file-backed store with an on-disk index and checksums
//! - An in-memory store for tests and embedded use
//! - The checkpoint policy shared with the runtime configuration

pub mod error;
pub mod file;
pub mod memory;
pub mod store;

pub use error::StorageError;
pub use file::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;
pub use store::{CheckpointMeta, CheckpointPolicy, CheckpointStore};
