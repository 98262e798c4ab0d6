//! Stateful managers owned by the router task
//!
//! Each manager encapsulates one concern and is driven exclusively from the
//! router task, so none of them lock.

pub mod auth;
pub mod registry;

pub use auth::AuthManager;
pub use registry::{AppRegistry, ReconcileOutcome, RegistryStats};
