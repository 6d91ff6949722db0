//! Backing store implementations
//!
//! - `memory`: records and preferences held in process memory
//! - `file`: one bincode file per record, with an in-memory index; preferences
//!   in a single bincode file

pub mod file;
pub mod memory;

pub use file::{FilePreferenceStore, FileStore};
pub use memory::{MemoryPreferenceStore, MemoryStore};
