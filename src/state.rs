//! Local state file
//!
//! Persists the reconciled record for every managed user, keyed by the name
//! used in the manifest.

use crate::reconcile::ManagedUser;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const STATE_VERSION: u32 = 1;
pub const DEFAULT_STATE_FILE: &str = "lookerctl.state.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub version: u32,
    #[serde(default)]
    pub users: BTreeMap<String, ManagedUser>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            users: BTreeMap::new(),
        }
    }
}

impl State {
    /// Load state from disk; a missing file is an empty state
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No state file at {}, starting empty", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file {}", path.display()))?;
        let state: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file {}", path.display()))?;

        if state.version != STATE_VERSION {
            anyhow::bail!(
                "Unsupported state version {} in {} (expected {})",
                state.version,
                path.display(),
                STATE_VERSION
            );
        }

        Ok(state)
    }

    /// Write state atomically: temp file in the same directory, then rename
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        let tmp = temp_path(path);
        std::fs::write(&tmp, content)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace state file {}", path.display()))?;

        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ManagedUser> {
        self.users.get(name)
    }

    pub fn upsert(&mut self, name: &str, record: ManagedUser) {
        self.users.insert(name.to_string(), record);
    }

    pub fn remove(&mut self, name: &str) -> Option<ManagedUser> {
        self.users.remove(name)
    }

    /// Name already bound to a remote id, if any
    pub fn name_for_id(&self, external_id: &str) -> Option<&str> {
        self.users
            .iter()
            .find(|(_, u)| u.external_id.as_deref() == Some(external_id))
            .map(|(name, _)| name.as_str())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| DEFAULT_STATE_FILE.into());
    name.push(".tmp");
    path.with_file_name(name)
}
