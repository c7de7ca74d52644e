//! Declarative reconciliation of Looker users
//!
//! A [`Reconcile`] implementation keeps one remote entity consistent with one
//! declared record through four operations. The host (here the CLI) decides
//! which operation to run and persists the records it gets back.
//!
//! # Lifecycle
//!
//! - `create` assigns the external id
//! - `read` refreshes every field and never changes the id
//! - `update` preserves the id and stamps `last_reconciled_at`
//! - `delete` clears the id once the remote user is gone
//!
//! Every remote call races the caller's [`CancellationToken`] and is issued
//! only after the previous one has completed.

mod error;
mod model;
mod user;

#[cfg(test)]
pub(crate) mod fake;

pub use error::ReconcileError;
pub use model::{ManagedUser, ValidationError, MAX_FIELD_LEN};
pub use user::UserReconciler;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;

/// CRUD contract a host runtime drives for one kind of managed entity
#[async_trait]
pub trait Reconcile: Send + Sync {
    type Record: Send + Sync;

    /// Create the remote entity and return the refreshed record with its id set
    async fn create(
        &self,
        desired: &Self::Record,
        cancel: &CancellationToken,
    ) -> Result<Self::Record, ReconcileError>;

    /// Mirror the remote entity into a fresh record
    async fn read(
        &self,
        external_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Self::Record, ReconcileError>;

    /// Move the remote entity from `prior` to `desired`
    async fn update(
        &self,
        prior: &Self::Record,
        desired: &Self::Record,
        cancel: &CancellationToken,
    ) -> Result<Self::Record, ReconcileError>;

    /// Remove the remote entity and clear the record's id
    async fn delete(
        &self,
        record: &mut Self::Record,
        cancel: &CancellationToken,
    ) -> Result<(), ReconcileError>;
}

/// What `delete` does when the user is already gone remotely
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingUserPolicy {
    /// Surface `NotFound`
    #[default]
    Fail,
    /// Treat the user as deleted
    Ignore,
}

/// Behavior switches for [`UserReconciler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerOptions {
    /// Delete a freshly created user when a later create step fails
    pub rollback_on_create_failure: bool,
    /// Replace the remote role set on update when the declared set changed
    pub sync_roles_on_update: bool,
    pub missing_user_policy: MissingUserPolicy,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            rollback_on_create_failure: true,
            sync_roles_on_update: true,
            missing_user_policy: MissingUserPolicy::Fail,
        }
    }
}

/// Convert declared role ids to the sorted, deduplicated integers the API expects
///
/// `"01"` and `"1"` name the same role. Entries are checked in sorted string
/// order and the first malformed one is reported.
pub fn parse_role_ids(role_ids: &BTreeSet<String>) -> Result<Vec<i64>, ReconcileError> {
    let ids = role_ids
        .iter()
        .map(|raw| {
            raw.parse::<i64>()
                .map_err(|_| ReconcileError::InvalidRoleId(raw.clone()))
        })
        .collect::<Result<BTreeSet<i64>, _>>()?;
    Ok(ids.into_iter().collect())
}
