//! Telegram transport: long-polling ingress, allow-list filtering, slash
//! commands, media download, and reply/typing egress for the engine.

pub mod adapter;
pub mod allow;
pub mod attach;
pub mod commands;
pub mod error;
pub mod handler;
pub mod send;
pub mod typing;

use std::sync::Arc;

use herald_core::config::Tuning;
use herald_core::paths::StateDir;
use herald_engine::{AgentRunner, TaskManager, WorkQueue};
use herald_scheduler::CronScheduler;

pub use adapter::TelegramAdapter;
pub use error::TelegramError;

/// Everything the handler tree needs, shared via `Arc` across updates.
pub struct App {
    pub runner: Arc<AgentRunner>,
    pub tasks: Arc<TaskManager>,
    pub scheduler: Arc<CronScheduler>,
    /// Per-topic ingress lanes.
    pub queue: WorkQueue,
    /// Allowed Telegram user ids. Empty permits everyone.
    pub allow_users: Vec<String>,
    pub state: StateDir,
    pub tuning: Tuning,
}
