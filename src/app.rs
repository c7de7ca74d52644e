//! Application
//!
//! Host side of reconciliation: decides which operation each managed user
//! needs, runs it through a [`Reconcile`] implementation and persists the
//! resulting records after every step.

use crate::reconcile::{ManagedUser, Reconcile, ReconcileError};
use crate::state::State;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// What `apply` will do (or did) for one user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Update,
    Delete,
    Unchanged,
}

impl Action {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Unchanged => "keep",
        }
    }
}

/// Outcome of one `apply` run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: Vec<String>,
}

impl ApplySummary {
    fn record(&mut self, name: &str, action: Action) {
        let bucket = match action {
            Action::Create => &mut self.created,
            Action::Update => &mut self.updated,
            Action::Delete => &mut self.deleted,
            Action::Unchanged => &mut self.unchanged,
        };
        bucket.push(name.to_string());
    }
}

impl fmt::Display for ApplySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} deleted, {} unchanged",
            self.created.len(),
            self.updated.len(),
            self.deleted.len(),
            self.unchanged.len()
        )
    }
}

/// Decide the operation for every declared and every stored user
///
/// Declared users come first in name order, then stored users no longer declared.
pub fn plan(state: &State, desired: &BTreeMap<String, ManagedUser>) -> Vec<(String, Action)> {
    let mut actions: Vec<(String, Action)> = desired
        .iter()
        .map(|(name, want)| {
            let action = match state.get(name) {
                Some(have) if have.external_id.is_some() => {
                    if have.same_declaration(want) {
                        Action::Unchanged
                    } else {
                        Action::Update
                    }
                }
                _ => Action::Create,
            };
            (name.clone(), action)
        })
        .collect();

    actions.extend(
        state
            .users
            .keys()
            .filter(|name| !desired.contains_key(*name))
            .map(|name| (name.clone(), Action::Delete)),
    );

    actions
}

/// Main application state
pub struct App<R> {
    reconciler: R,
    state: State,
    state_path: PathBuf,
    cancel: CancellationToken,
}

impl<R> App<R>
where
    R: Reconcile<Record = ManagedUser>,
{
    pub fn new(reconciler: R, state: State, state_path: PathBuf, cancel: CancellationToken) -> Self {
        Self {
            reconciler,
            state,
            state_path,
            cancel,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    fn save(&self) -> Result<()> {
        self.state.save(&self.state_path)
    }

    pub fn plan(&self, desired: &BTreeMap<String, ManagedUser>) -> Vec<(String, Action)> {
        plan(&self.state, desired)
    }

    /// Converge remote users to `desired`, stopping at the first failure
    pub async fn apply(&mut self, desired: &BTreeMap<String, ManagedUser>) -> Result<ApplySummary> {
        let mut summary = ApplySummary::default();

        for (name, action) in self.plan(desired) {
            match action {
                Action::Create => self.create(&name, &desired[&name]).await?,
                Action::Update => self.update(&name, &desired[&name]).await?,
                Action::Delete => self.delete(&name).await?,
                Action::Unchanged => tracing::debug!(user = %name, "no changes"),
            }
            summary.record(&name, action);
        }

        tracing::info!("Apply complete: {}", summary);
        Ok(summary)
    }

    async fn create(&mut self, name: &str, desired: &ManagedUser) -> Result<()> {
        match self.reconciler.create(desired, &self.cancel).await {
            Ok(created) => {
                self.state.upsert(name, created);
                self.save()
            }
            Err(ReconcileError::PartiallyCreated { id, source }) => {
                // Track the orphan with nothing attached so the next apply
                // updates it instead of creating a duplicate
                let orphan = ManagedUser {
                    external_id: Some(id.clone()),
                    first_name: desired.first_name.clone(),
                    last_name: desired.last_name.clone(),
                    ..ManagedUser::default()
                };
                self.state.upsert(name, orphan);
                self.save()?;
                Err(ReconcileError::PartiallyCreated { id, source })
                    .with_context(|| format!("Failed to create user `{name}`"))
            }
            Err(err) => Err(err).with_context(|| format!("Failed to create user `{name}`")),
        }
    }

    async fn update(&mut self, name: &str, desired: &ManagedUser) -> Result<()> {
        let prior = self
            .state
            .get(name)
            .cloned()
            .with_context(|| format!("User `{name}` is not in state"))?;

        let updated = self
            .reconciler
            .update(&prior, desired, &self.cancel)
            .await
            .with_context(|| format!("Failed to update user `{name}`"))?;

        self.state.upsert(name, updated);
        self.save()
    }

    async fn delete(&mut self, name: &str) -> Result<()> {
        let Some(mut record) = self.state.get(name).cloned() else {
            anyhow::bail!("User `{name}` is not in state");
        };

        if record.external_id.is_some() {
            self.reconciler
                .delete(&mut record, &self.cancel)
                .await
                .with_context(|| format!("Failed to delete user `{name}`"))?;
        }

        self.state.remove(name);
        self.save()
    }

    /// Re-read every stored user; users gone remotely are dropped from state
    pub async fn refresh(&mut self) -> Result<Vec<String>> {
        let mut dropped = Vec::new();
        let names: Vec<String> = self.state.users.keys().cloned().collect();

        for name in names {
            let Some(stored) = self.state.get(&name).cloned() else {
                continue;
            };
            let Some(id) = stored.external_id.as_deref() else {
                self.state.remove(&name);
                dropped.push(name);
                continue;
            };

            match self.reconciler.read(id, &self.cancel).await {
                Ok(mut fresh) => {
                    fresh.last_reconciled_at = stored.last_reconciled_at;
                    self.state.upsert(&name, fresh);
                }
                Err(err) if err.is_not_found() => {
                    tracing::warn!(user = %name, id, "user no longer exists in Looker, dropping from state");
                    self.state.remove(&name);
                    dropped.push(name);
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("Failed to read user `{name}`"))
                }
            }
        }

        self.save()?;
        Ok(dropped)
    }

    /// Adopt an existing Looker user under `name`
    pub async fn import(&mut self, name: &str, external_id: &str) -> Result<ManagedUser> {
        if self.state.get(name).is_some() {
            anyhow::bail!("User `{name}` is already managed");
        }
        if let Some(existing) = self.state.name_for_id(external_id) {
            anyhow::bail!("Looker user {external_id} is already managed as `{existing}`");
        }

        let record = self
            .reconciler
            .read(external_id, &self.cancel)
            .await
            .with_context(|| format!("Failed to import Looker user {external_id}"))?;

        self.state.upsert(name, record.clone());
        self.save()?;
        tracing::info!(user = %name, id = external_id, "Imported Looker user");
        Ok(record)
    }

    /// Delete one managed user, or all of them
    pub async fn destroy(&mut self, name: Option<&str>) -> Result<Vec<String>> {
        let names: Vec<String> = match name {
            Some(name) => {
                if self.state.get(name).is_none() {
                    anyhow::bail!("User `{name}` is not in state");
                }
                vec![name.to_string()]
            }
            None => self.state.users.keys().cloned().collect(),
        };

        for name in &names {
            self.delete(name).await?;
        }

        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::fake::FakeLooker;
    use crate::reconcile::{ReconcilerOptions, UserReconciler};
    use std::sync::Arc;

    struct Harness {
        api: Arc<FakeLooker>,
        app: App<UserReconciler<Arc<FakeLooker>>>,
        _dir: tempfile::TempDir,
        path: PathBuf,
    }

    fn harness(options: ReconcilerOptions) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let api = Arc::new(FakeLooker::default());
        let app = App::new(
            UserReconciler::new(Arc::clone(&api), options),
            State::default(),
            path.clone(),
            CancellationToken::new(),
        );
        Harness {
            api,
            app,
            _dir: dir,
            path,
        }
    }

    fn desired(users: &[(&str, ManagedUser)]) -> BTreeMap<String, ManagedUser> {
        users
            .iter()
            .map(|(name, user)| (name.to_string(), user.clone()))
            .collect()
    }

    fn ada() -> ManagedUser {
        ManagedUser::new("Ada")
            .with_last_name("Lovelace")
            .with_email("ada@example.com")
            .with_roles(["1", "2"])
    }

    #[tokio::test]
    async fn test_apply_creates_then_is_unchanged() {
        let mut h = harness(ReconcilerOptions::default());
        let want = desired(&[("ada", ada())]);

        let first = h.app.apply(&want).await.unwrap();
        assert_eq!(first.created, vec!["ada"]);

        let second = h.app.apply(&want).await.unwrap();
        assert_eq!(second.unchanged, vec!["ada"]);
        assert!(second.created.is_empty());

        let saved = State::load(&h.path).unwrap();
        assert!(saved.get("ada").unwrap().external_id.is_some());
    }

    #[tokio::test]
    async fn test_apply_updates_and_deletes() {
        let mut h = harness(ReconcilerOptions::default());
        let grace = ManagedUser::new("Grace");
        h.app
            .apply(&desired(&[("ada", ada()), ("grace", grace)]))
            .await
            .unwrap();

        let changed = ada().with_email("");
        let summary = h.app.apply(&desired(&[("ada", changed)])).await.unwrap();

        assert_eq!(summary.updated, vec!["ada"]);
        assert_eq!(summary.deleted, vec!["grace"]);
        assert_eq!(h.app.state().get("ada").unwrap().email, None);
        assert!(h.app.state().get("grace").is_none());
        assert_eq!(h.api.user_count(), 1);
    }

    #[tokio::test]
    async fn test_apply_stops_at_first_error() {
        let mut h = harness(ReconcilerOptions::default());
        h.api.fail_on("create_email_credential");

        let want = desired(&[("ada", ada()), ("zed", ManagedUser::new("Zed"))]);
        let err = h.app.apply(&want).await.unwrap_err();

        assert!(format!("{err:#}").contains("ada"));
        assert!(h.app.state().users.is_empty());
        assert_eq!(h.api.user_count(), 0);
    }

    #[tokio::test]
    async fn test_partial_create_is_recovered_on_next_apply() {
        let mut h = harness(ReconcilerOptions {
            rollback_on_create_failure: false,
            ..ReconcilerOptions::default()
        });
        h.api.fail_on("set_user_roles");
        let want = desired(&[("ada", ada())]);

        assert!(h.app.apply(&want).await.is_err());
        let orphan = h.app.state().get("ada").cloned().unwrap();
        assert!(orphan.external_id.is_some());

        // Roles still fail, but the orphan is updated rather than duplicated
        assert!(h.app.apply(&want).await.is_err());
        assert_eq!(h.api.user_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_drops_users_deleted_out_of_band() {
        let mut h = harness(ReconcilerOptions::default());
        h.app
            .apply(&desired(&[("ada", ada()), ("grace", ManagedUser::new("Grace"))]))
            .await
            .unwrap();

        let grace_id = h.app.state().get("grace").unwrap().external_id.clone().unwrap();
        h.api.remove_user(&grace_id);

        let dropped = h.app.refresh().await.unwrap();
        assert_eq!(dropped, vec!["grace"]);
        assert!(h.app.state().get("ada").is_some());
    }

    #[tokio::test]
    async fn test_import_adopts_existing_user() {
        let mut h = harness(ReconcilerOptions::default());
        h.app.apply(&desired(&[("ada", ada())])).await.unwrap();
        let id = h.app.state().get("ada").unwrap().external_id.clone().unwrap();

        let err = h.app.import("again", &id).await.unwrap_err();
        assert!(err.to_string().contains("already managed"));

        h.app.destroy(Some("ada")).await.unwrap();
        assert!(h.app.import("ghost", &id).await.is_err());
    }

    #[tokio::test]
    async fn test_destroy_all() {
        let mut h = harness(ReconcilerOptions::default());
        h.app
            .apply(&desired(&[("ada", ada()), ("grace", ManagedUser::new("Grace"))]))
            .await
            .unwrap();

        let destroyed = h.app.destroy(None).await.unwrap();
        assert_eq!(destroyed, vec!["ada", "grace"]);
        assert_eq!(h.api.user_count(), 0);
        assert!(State::load(&h.path).unwrap().users.is_empty());
    }

    #[test]
    fn test_plan_without_state_creates_everything() {
        let want = desired(&[("ada", ada()), ("grace", ManagedUser::new("Grace"))]);
        let actions = plan(&State::default(), &want);
        assert_eq!(
            actions,
            vec![
                ("ada".to_string(), Action::Create),
                ("grace".to_string(), Action::Create)
            ]
        );
    }

    #[test]
    fn test_plan_record_without_id_is_recreated() {
        let mut state = State::default();
        state.upsert("ada", ada());
        let actions = plan(&state, &desired(&[("ada", ada())]));
        assert_eq!(actions, vec![("ada".to_string(), Action::Create)]);
    }

    #[test]
    fn test_summary_display() {
        let mut summary = ApplySummary::default();
        summary.record("ada", Action::Create);
        summary.record("grace", Action::Unchanged);
        assert_eq!(summary.to_string(), "1 created, 0 updated, 0 deleted, 1 unchanged");
    }
}
