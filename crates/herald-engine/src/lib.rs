//! The orchestration engine: per-topic work queue, thread store, agent
//! runner pipeline, background task manager, and runtime settings.

pub mod error;
pub mod queue;
pub mod rcache;
pub mod runner;
pub mod settings;
pub mod tasks;
pub mod threads;

pub use error::{EngineError, Result};
pub use queue::WorkQueue;
pub use runner::{AgentRunner, Attachment, ChatRun, RunOutcome, RunnerConfig};
pub use settings::{Settings, SettingsStore};
pub use tasks::{TaskEntry, TaskManager, TaskStatus, TypingNotifier};
pub use threads::{ResolvedThread, ThreadStore};
