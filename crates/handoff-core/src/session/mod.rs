//! Session lifecycle coordination.
//!
//! [`SessionManager`] reconciles three sources of truth:
//! - the in-process [`SessionRegistry`] (one entry per owner)
//! - the cache, an accelerator that may be stale or unreachable
//! - the durable store, authoritative for quota and for restore
//!
//! Creation is single-flight per owner; create, clear and handoff for an owner
//! are serialized by that owner's guard.

mod events;
mod maintenance;
mod manager;
mod registry;

pub use events::{DestroyReason, SessionEvent};
pub use manager::SessionManager;
pub use registry::{ManagedSession, OwnerGuards, SessionRegistry, SessionStats};
