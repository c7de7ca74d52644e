//! Desired-state manifest
//!
//! ```yaml
//! users:
//!   ada:
//!     first_name: Ada
//!     last_name: Lovelace
//!     email: ada@example.com
//!     roles: ["1", "2"]
//! ```

use crate::reconcile::{parse_role_ids, ManagedUser};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserEntry {
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Role ids; YAML integers are accepted as well as strings
    #[serde(default)]
    pub roles: Vec<serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub users: BTreeMap<String, UserEntry>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid manifest {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let manifest: Self = serde_yaml::from_str(content)?;
        Ok(manifest)
    }

    /// Convert every entry to a desired record, validating fields and role ids
    pub fn desired_users(&self) -> Result<BTreeMap<String, ManagedUser>> {
        self.users
            .iter()
            .map(|(name, entry)| {
                let user = entry
                    .to_managed()
                    .with_context(|| format!("User `{name}`"))?;
                Ok((name.clone(), user))
            })
            .collect()
    }
}

impl UserEntry {
    fn to_managed(&self) -> Result<ManagedUser> {
        let role_ids = self
            .roles
            .iter()
            .map(role_to_string)
            .collect::<Result<BTreeSet<_>>>()?;

        let mut user = ManagedUser {
            external_id: None,
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email: self.email.clone(),
            role_ids,
            last_reconciled_at: None,
        }
        .normalized();

        user.validate()?;
        // "01" and "1" name the same role; store the form the API reports back
        user.role_ids = parse_role_ids(&user.role_ids)?
            .into_iter()
            .map(|id| id.to_string())
            .collect();
        Ok(user)
    }
}

fn role_to_string(value: &serde_yaml::Value) -> Result<String> {
    match value {
        serde_yaml::Value::String(s) => Ok(s.clone()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        other => anyhow::bail!("role ids must be strings or integers, got {other:?}"),
    }
}
