//! Key-value store implementations.
//!
//! - `memory`: process-local store (tests, ephemeral runs)
//! - `file`: single JSON document on disk, rewritten atomically on each change

pub mod file;
pub mod memory;

pub use file::FileKvStore;
pub use memory::MemoryKvStore;
