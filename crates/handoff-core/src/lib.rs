//! handoff-core - Core library for Handoff
//!
//! Session lifecycle coordination shared by handoff-server and embedders:
//!
//! - **session**: The coordinator (registry, create, clear, handoff, restore, cleanup)
//! - **db**: SQLite persistence and schema migrations
//! - **store**: Async durable store seam over the database
//! - **kv**: Key/value store contract and in-process implementation
//! - **cache**: Cache-aside layer
//! - **lock**: Advisory distributed lock
//! - **limiter**: Sliding-window rate limiter
//! - **backend**: Execution backend seam and the tmux backend
//! - **auth**: Handoff authorization
//! - **metrics**: Metrics sinks
//! - **config**: Coordinator configuration

pub mod auth;
pub mod backend;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod kv;
pub mod limiter;
pub mod lock;
pub mod metrics;
pub mod session;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::CoordinatorConfig;
pub use db::Database;
pub use error::{Error, Result, SessionError, SessionResult};
pub use session::{SessionEvent, SessionManager};
pub use store::{DurableStore, SqliteStore};
pub use types::{CreateOptions, SessionRecord, SessionStatus};
