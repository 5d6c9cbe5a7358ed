//! Long-term memory: per-thread append-only JSONL logs, a curated digest
//! with a marker-delimited auto section, an optional FTS retrieval index,
//! and the capture/bootstrap service layered on top.

pub mod error;
pub mod index;
pub mod service;
pub mod store;
pub mod types;

pub use error::{MemoryError, Result};
pub use service::MemoryService;
pub use store::MemoryStore;
pub use types::{CurationState, MemoryEvent, RetrievalRequest};
