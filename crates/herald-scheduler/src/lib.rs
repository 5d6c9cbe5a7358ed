//! Cron-driven agent invocations: five-field expressions with timezones,
//! a daily-budget gate, silent tokens, and per-job live output rings.

pub mod engine;
pub mod error;
pub mod schedule;
pub mod store;
pub mod types;

pub use engine::{CronDelivery, CronScheduler};
pub use error::{Result, SchedulerError};
pub use store::CronStore;
pub use types::{CronJob, JobPhase};
