//! Declarative user management for Looker
//!
//! - [`looker`] - REST API client (auth, HTTP, user endpoints)
//! - [`reconcile`] - create/read/update/delete lifecycle for managed users
//! - [`app`] - host logic that plans and runs reconciliations
//! - [`config`], [`manifest`], [`state`] - settings, desired users, persisted records

pub mod app;
pub mod config;
pub mod looker;
pub mod manifest;
pub mod reconcile;
pub mod state;

/// Version injected at compile time via LOOKERCTL_VERSION env var (set by CI/CD),
/// or the crate version for local builds.
pub const VERSION: &str = match option_env!("LOOKERCTL_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};
