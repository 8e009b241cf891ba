//! PostgreSQL backup runner
//!
//! Drives WAL-G base backups and retention cleanup under per-operation
//! advisory locks, with best-effort failure notification.

pub mod config;
pub mod executor;
pub mod lock;
pub mod models;
pub mod notify;
pub mod retention;
pub mod run_log;
pub mod runner;
pub mod tool;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use runner::{Mode, RunOutcome, Runner};
pub use utils::{Result, RunnerError};
