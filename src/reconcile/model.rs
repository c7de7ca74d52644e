//! The reconciled user record and its field rules

use super::parse_role_ids;
use crate::looker::{CredentialEmail, User};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Upper bound for every string field, in characters
pub const MAX_FIELD_LEN: usize = 255;

/// Field-level constraint violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("first_name is required")]
    MissingFirstName,

    #[error("{field} must not be empty when set")]
    Empty { field: &'static str },

    #[error("{field} is {len} characters long, the limit is {MAX_FIELD_LEN}")]
    TooLong { field: &'static str, len: usize },
}

/// A declared Looker user and the state mirrored back from the API
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedUser {
    /// Assigned by Looker on create; `None` while the user does not exist remotely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub role_ids: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled_at: Option<DateTime<Utc>>,
}

impl ManagedUser {
    pub fn new(first_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            ..Self::default()
        }
    }

    pub fn with_last_name(mut self, last_name: impl Into<String>) -> Self {
        self.last_name = Some(last_name.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.role_ids = roles.into_iter().map(Into::into).collect();
        self
    }

    /// An empty email means "no credential"
    pub fn normalized(&self) -> Self {
        let mut user = self.clone();
        if user.email.as_deref() == Some("") {
            user.email = None;
        }
        user
    }

    /// Check field constraints
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.first_name.is_empty() {
            return Err(ValidationError::MissingFirstName);
        }
        check_len("first_name", &self.first_name)?;

        if let Some(last_name) = &self.last_name {
            if last_name.is_empty() {
                return Err(ValidationError::Empty { field: "last_name" });
            }
            check_len("last_name", last_name)?;
        }

        if let Some(email) = &self.email {
            check_len("email", email)?;
        }

        Ok(())
    }

    /// `last_reconciled_at` in RFC 850 form, e.g. `Monday, 02-Jan-06 15:04:05 UTC`
    pub fn last_updated(&self) -> Option<String> {
        self.last_reconciled_at
            .map(|t| t.format("%A, %d-%b-%y %H:%M:%S UTC").to_string())
    }

    /// True when the declared fields match, ignoring id and timestamp
    pub fn same_declaration(&self, other: &Self) -> bool {
        let (a, b) = (self.normalized(), other.normalized());
        a.first_name == b.first_name
            && a.last_name == b.last_name
            && a.email == b.email
            && a.same_roles(&b)
    }

    /// Compare role sets as integers, falling back to the raw strings when
    /// either side holds a malformed id
    pub fn same_roles(&self, other: &Self) -> bool {
        match (parse_role_ids(&self.role_ids), parse_role_ids(&other.role_ids)) {
            (Ok(a), Ok(b)) => a == b,
            _ => self.role_ids == other.role_ids,
        }
    }

    /// Build the local view of a remote user
    pub(crate) fn from_remote(
        external_id: &str,
        user: &User,
        credential: Option<&CredentialEmail>,
    ) -> Self {
        Self {
            external_id: Some(external_id.to_string()),
            first_name: user.first_name.clone().unwrap_or_default(),
            last_name: user.last_name.clone().filter(|s| !s.is_empty()),
            email: credential
                .and_then(|c| c.email.clone())
                .filter(|s| !s.is_empty()),
            role_ids: user
                .role_ids
                .iter()
                .flatten()
                .map(|id| id.to_string())
                .collect(),
            last_reconciled_at: None,
        }
    }
}

fn check_len(field: &'static str, value: &str) -> Result<(), ValidationError> {
    let len = value.chars().count();
    if len > MAX_FIELD_LEN {
        return Err(ValidationError::TooLong { field, len });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_user() {
        let user = ManagedUser::new("Ada")
            .with_last_name("Lovelace")
            .with_email("ada@example.com");
        assert_eq!(user.validate(), Ok(()));
    }

    #[test]
    fn test_first_name_required() {
        assert_eq!(
            ManagedUser::new("").validate(),
            Err(ValidationError::MissingFirstName)
        );
    }

    #[test]
    fn test_empty_last_name_rejected() {
        let user = ManagedUser::new("Ada").with_last_name("");
        assert_eq!(
            user.validate(),
            Err(ValidationError::Empty { field: "last_name" })
        );
    }

    #[test]
    fn test_length_counts_characters() {
        let user = ManagedUser::new("é".repeat(255));
        assert_eq!(user.validate(), Ok(()));

        let user = ManagedUser::new("é".repeat(256));
        assert_eq!(
            user.validate(),
            Err(ValidationError::TooLong {
                field: "first_name",
                len: 256
            })
        );
    }

    #[test]
    fn test_empty_email_is_allowed_and_normalized() {
        let user = ManagedUser::new("Ada").with_email("");
        assert_eq!(user.validate(), Ok(()));
        assert_eq!(user.normalized().email, None);
    }

    #[test]
    fn test_roles_collapse_duplicates() {
        let user = ManagedUser::new("Ada").with_roles(["2", "1", "2"]);
        assert_eq!(user.role_ids.len(), 2);
    }

    #[test]
    fn test_same_declaration_ignores_id_and_timestamp() {
        let declared = ManagedUser::new("Ada").with_roles(["1"]);
        let mut stored = declared.clone();
        stored.external_id = Some("9".to_string());
        stored.last_reconciled_at = Some(Utc::now());
        assert!(declared.same_declaration(&stored));

        let changed = declared.clone().with_email("ada@example.com");
        assert!(!changed.same_declaration(&stored));
    }

    #[test]
    fn test_same_roles_compares_integer_values() {
        let declared = ManagedUser::new("Ada").with_roles(["01", "1", "2"]);
        let stored = ManagedUser::new("Ada").with_roles(["1", "2"]);
        assert!(declared.same_roles(&stored));
        assert!(declared.same_declaration(&stored));

        let malformed = ManagedUser::new("Ada").with_roles(["admin"]);
        assert!(!malformed.same_roles(&stored));
    }

    #[test]
    fn test_last_updated_rfc850() {
        use chrono::TimeZone;

        let mut user = ManagedUser::new("Ada");
        assert_eq!(user.last_updated(), None);

        user.last_reconciled_at = Some(Utc.with_ymd_and_hms(2006, 1, 2, 15, 4, 5).unwrap());
        assert_eq!(
            user.last_updated().as_deref(),
            Some("Monday, 02-Jan-06 15:04:05 UTC")
        );
    }

    #[test]
    fn test_from_remote() {
        let user = User {
            id: Some("ignored".to_string()),
            first_name: Some("Ada".to_string()),
            last_name: Some(String::new()),
            role_ids: Some(vec![2, 1]),
            ..User::default()
        };
        let credential = CredentialEmail {
            email: Some("ada@example.com".to_string()),
            is_disabled: false,
        };

        let managed = ManagedUser::from_remote("7", &user, Some(&credential));
        assert_eq!(managed.external_id.as_deref(), Some("7"));
        assert_eq!(managed.last_name, None);
        assert_eq!(managed.email.as_deref(), Some("ada@example.com"));
        assert_eq!(
            managed.role_ids.into_iter().collect::<Vec<_>>(),
            vec!["1".to_string(), "2".to_string()]
        );
    }
}
