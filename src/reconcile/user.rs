//! User reconciler
//!
//! Drives a Looker user, its email credential and its role set toward a
//! declared [`ManagedUser`].

use super::{
    parse_role_ids, ManagedUser, MissingUserPolicy, Reconcile, ReconcileError, ReconcilerOptions,
};
use crate::looker::{ApiError, UsersApi};
use async_trait::async_trait;
use chrono::Utc;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Reconciles [`ManagedUser`] records against a [`UsersApi`]
pub struct UserReconciler<A> {
    api: A,
    options: ReconcilerOptions,
}

impl<A: UsersApi> UserReconciler<A> {
    pub fn new(api: A, options: ReconcilerOptions) -> Self {
        Self { api, options }
    }

    /// Run one remote call, aborting as soon as `cancel` fires
    async fn step<T, F>(
        &self,
        cancel: &CancellationToken,
        step: &'static str,
        call: F,
    ) -> Result<T, ReconcileError>
    where
        F: Future<Output = Result<T, ApiError>> + Send,
    {
        tracing::debug!(step, "calling Looker API");
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::warn!(step, "reconciliation cancelled");
                Err(ReconcileError::Cancelled { step })
            }
            result = call => result.map_err(ReconcileError::from),
        }
    }

    /// Email credential and roles, applied right after the bare user exists
    async fn attach(
        &self,
        user_id: &str,
        desired: &ManagedUser,
        role_ids: &[i64],
        cancel: &CancellationToken,
    ) -> Result<ManagedUser, ReconcileError> {
        if let Some(email) = &desired.email {
            self.step(
                cancel,
                "create_email_credential",
                self.api.create_email_credential(user_id, email, false),
            )
            .await?;
        }

        if !role_ids.is_empty() {
            let roles = self
                .step(cancel, "set_user_roles", self.api.set_user_roles(user_id, role_ids))
                .await?;
            tracing::debug!(user_id, roles = roles.len(), "roles assigned");
        }

        self.read(user_id, cancel).await
    }

    /// Remove a user whose create sequence failed part-way
    ///
    /// Runs outside the caller's cancellation so a cancelled create still cleans up.
    async fn compensate_create(
        &self,
        user_id: &str,
        had_email: bool,
        err: ReconcileError,
    ) -> ReconcileError {
        if !self.options.rollback_on_create_failure {
            tracing::warn!(user_id, error = %err, "create failed, leaving partial user in place");
            return ReconcileError::PartiallyCreated {
                id: user_id.to_string(),
                source: Box::new(err),
            };
        }

        tracing::warn!(user_id, error = %err, "create failed, rolling back user");

        if had_email {
            if let Err(cleanup) = self.api.delete_email_credential(user_id).await {
                if !cleanup.is_not_found() {
                    tracing::debug!(user_id, error = %cleanup, "credential cleanup failed");
                }
            }
        }

        match self.api.delete_user(user_id).await {
            Ok(()) => {
                tracing::info!(user_id, "rolled back partially created user");
                err
            }
            Err(rollback) if rollback.is_not_found() => {
                tracing::info!(user_id, "partially created user already gone");
                err
            }
            Err(rollback) => {
                tracing::error!(user_id, error = %rollback, "rollback failed, user left behind");
                ReconcileError::PartiallyCreated {
                    id: user_id.to_string(),
                    source: Box::new(err),
                }
            }
        }
    }

    async fn sync_email(
        &self,
        user_id: &str,
        prior: Option<&str>,
        desired: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), ReconcileError> {
        if prior == desired {
            return Ok(());
        }

        match desired {
            None => {
                match self
                    .step(
                        cancel,
                        "delete_email_credential",
                        self.api.delete_email_credential(user_id),
                    )
                    .await
                {
                    Err(ReconcileError::Api(ApiError::NotFound)) => {
                        tracing::debug!(user_id, "email credential already absent");
                    }
                    other => other?,
                }
            }
            Some(email) => {
                let existing = self
                    .step(
                        cancel,
                        "get_email_credential",
                        self.api.get_email_credential(user_id),
                    )
                    .await?;

                if existing.is_some() {
                    self.step(
                        cancel,
                        "update_email_credential",
                        self.api.update_email_credential(user_id, email),
                    )
                    .await?;
                } else {
                    self.step(
                        cancel,
                        "create_email_credential",
                        self.api.create_email_credential(user_id, email, false),
                    )
                    .await?;
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl<A: UsersApi> Reconcile for UserReconciler<A> {
    type Record = ManagedUser;

    async fn create(
        &self,
        desired: &ManagedUser,
        cancel: &CancellationToken,
    ) -> Result<ManagedUser, ReconcileError> {
        let span = tracing::info_span!("create_user", op_id = %Uuid::new_v4());
        async move {
            let desired = desired.normalized();
            desired.validate()?;
            let role_ids = parse_role_ids(&desired.role_ids)?;

            tracing::info!("Creating Looker user");

            let user = self
                .step(
                    cancel,
                    "create_user",
                    self.api
                        .create_user(&desired.first_name, desired.last_name.as_deref()),
                )
                .await?;
            let user_id = user.id.ok_or(ApiError::MissingField("id"))?;

            match self.attach(&user_id, &desired, &role_ids, cancel).await {
                Ok(created) => {
                    tracing::info!(
                        user_id = %user_id,
                        email = created.email.is_some(),
                        roles = created.role_ids.len(),
                        "Created Looker user"
                    );
                    Ok(created)
                }
                Err(err) => Err(self
                    .compensate_create(&user_id, desired.email.is_some(), err)
                    .await),
            }
        }
        .instrument(span)
        .await
    }

    async fn read(
        &self,
        external_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ManagedUser, ReconcileError> {
        let user = self
            .step(cancel, "get_user", self.api.get_user(external_id))
            .await
            .map_err(|e| e.for_user(external_id))?;

        let credential = self
            .step(
                cancel,
                "get_email_credential",
                self.api.get_email_credential(external_id),
            )
            .await?;

        Ok(ManagedUser::from_remote(
            external_id,
            &user,
            credential.as_ref(),
        ))
    }

    async fn update(
        &self,
        prior: &ManagedUser,
        desired: &ManagedUser,
        cancel: &CancellationToken,
    ) -> Result<ManagedUser, ReconcileError> {
        let user_id = prior
            .external_id
            .as_deref()
            .ok_or(ReconcileError::MissingId)?;
        let span = tracing::info_span!("update_user", op_id = %Uuid::new_v4(), user_id);

        async move {
            let prior = prior.normalized();
            let desired = desired.normalized();
            desired.validate()?;
            let role_ids = parse_role_ids(&desired.role_ids)?;

            tracing::info!("Updating Looker user");

            // The API takes the full object, so start from the current one
            let mut remote = self
                .step(cancel, "get_user", self.api.get_user(user_id))
                .await
                .map_err(|e| e.for_user(user_id))?;
            remote.first_name = Some(desired.first_name.clone());
            remote.last_name = Some(desired.last_name.clone().unwrap_or_default());

            self.step(cancel, "update_user", self.api.update_user(user_id, &remote))
                .await
                .map_err(|e| e.for_user(user_id))?;

            self.sync_email(
                user_id,
                prior.email.as_deref(),
                desired.email.as_deref(),
                cancel,
            )
            .await?;

            if self.options.sync_roles_on_update && !prior.same_roles(&desired) {
                self.step(
                    cancel,
                    "set_user_roles",
                    self.api.set_user_roles(user_id, &role_ids),
                )
                .await?;
            }

            let reconciled_at = Utc::now();
            let mut updated = self.read(user_id, cancel).await?;
            updated.last_reconciled_at = Some(reconciled_at);

            tracing::info!("Updated Looker user");
            Ok(updated)
        }
        .instrument(span)
        .await
    }

    async fn delete(
        &self,
        record: &mut ManagedUser,
        cancel: &CancellationToken,
    ) -> Result<(), ReconcileError> {
        let user_id = record
            .external_id
            .clone()
            .ok_or(ReconcileError::MissingId)?;
        let span = tracing::info_span!("delete_user", op_id = %Uuid::new_v4(), user_id = %user_id);

        async move {
            tracing::info!("Deleting Looker user");

            let credential = self
                .step(
                    cancel,
                    "get_email_credential",
                    self.api.get_email_credential(&user_id),
                )
                .await?;

            if credential.is_some() {
                match self
                    .step(
                        cancel,
                        "delete_email_credential",
                        self.api.delete_email_credential(&user_id),
                    )
                    .await
                {
                    Err(ReconcileError::Api(ApiError::NotFound)) => {
                        tracing::debug!("email credential vanished before delete");
                    }
                    other => other?,
                }
            }

            match self
                .step(cancel, "delete_user", self.api.delete_user(&user_id))
                .await
            {
                Ok(()) => {}
                Err(ReconcileError::Api(ApiError::NotFound)) => match self.options.missing_user_policy {
                    MissingUserPolicy::Fail => {
                        return Err(ReconcileError::NotFound { id: user_id.clone() })
                    }
                    MissingUserPolicy::Ignore => {
                        tracing::warn!("user already deleted remotely");
                    }
                },
                Err(err) => return Err(err),
            }

            record.external_id = None;
            tracing::info!("Deleted Looker user");
            Ok(())
        }
        .instrument(span)
        .await
    }
}
