//! Looker Users
//!
//! Typed access to the user, email credential and role endpoints.

use super::client::LookerClient;
use super::error::ApiError;
use async_trait::async_trait;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// Looker ids are integers in API 3.x and numeric strings in API 4.0
#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Int(i64),
    Str(String),
}

fn de_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<IdRepr>::deserialize(deserializer)?.map(|id| match id {
        IdRepr::Int(i) => i.to_string(),
        IdRepr::Str(s) => s,
    }))
}

fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    de_opt_id(deserializer)?.ok_or_else(|| de::Error::custom("id is null"))
}

fn de_role_ids<'de, D>(deserializer: D) -> Result<Option<Vec<i64>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<Vec<IdRepr>>::deserialize(deserializer)? else {
        return Ok(None);
    };

    raw.into_iter()
        .map(|id| match id {
            IdRepr::Int(i) => Ok(i),
            IdRepr::Str(s) => s
                .parse::<i64>()
                .map_err(|_| de::Error::custom(format!("non-numeric role id `{s}`"))),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

/// A Looker user record
///
/// Fields the client does not model are kept in `extra` so that a fetched
/// user can be sent back unchanged as a full-object update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default, deserialize_with = "de_opt_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    /// Read-only on the user resource; roles are written through `set_user_roles`
    #[serde(default, deserialize_with = "de_role_ids", skip_serializing)]
    pub role_ids: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_disabled: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Email/password credential linked to a user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialEmail {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_disabled: bool,
}

/// A role as returned by the roles endpoint
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Role {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// The remote CRUD surface the reconciler drives
#[async_trait]
pub trait UsersApi: Send + Sync {
    async fn create_user(&self, first_name: &str, last_name: Option<&str>) -> Result<User, ApiError>;

    /// Fails with [`ApiError::NotFound`] when the user does not exist
    async fn get_user(&self, user_id: &str) -> Result<User, ApiError>;

    /// Full-object update
    async fn update_user(&self, user_id: &str, user: &User) -> Result<User, ApiError>;

    async fn delete_user(&self, user_id: &str) -> Result<(), ApiError>;

    async fn create_email_credential(
        &self,
        user_id: &str,
        email: &str,
        disabled: bool,
    ) -> Result<CredentialEmail, ApiError>;

    /// `Ok(None)` when the user has no email credential
    async fn get_email_credential(&self, user_id: &str) -> Result<Option<CredentialEmail>, ApiError>;

    async fn update_email_credential(
        &self,
        user_id: &str,
        email: &str,
    ) -> Result<CredentialEmail, ApiError>;

    async fn delete_email_credential(&self, user_id: &str) -> Result<(), ApiError>;

    /// Replace the user's full role set
    async fn set_user_roles(&self, user_id: &str, role_ids: &[i64]) -> Result<Vec<Role>, ApiError>;
}

#[async_trait]
impl<T: UsersApi + ?Sized> UsersApi for Arc<T> {
    async fn create_user(&self, first_name: &str, last_name: Option<&str>) -> Result<User, ApiError> {
        (**self).create_user(first_name, last_name).await
    }

    async fn get_user(&self, user_id: &str) -> Result<User, ApiError> {
        (**self).get_user(user_id).await
    }

    async fn update_user(&self, user_id: &str, user: &User) -> Result<User, ApiError> {
        (**self).update_user(user_id, user).await
    }

    async fn delete_user(&self, user_id: &str) -> Result<(), ApiError> {
        (**self).delete_user(user_id).await
    }

    async fn create_email_credential(
        &self,
        user_id: &str,
        email: &str,
        disabled: bool,
    ) -> Result<CredentialEmail, ApiError> {
        (**self).create_email_credential(user_id, email, disabled).await
    }

    async fn get_email_credential(&self, user_id: &str) -> Result<Option<CredentialEmail>, ApiError> {
        (**self).get_email_credential(user_id).await
    }

    async fn update_email_credential(
        &self,
        user_id: &str,
        email: &str,
    ) -> Result<CredentialEmail, ApiError> {
        (**self).update_email_credential(user_id, email).await
    }

    async fn delete_email_credential(&self, user_id: &str) -> Result<(), ApiError> {
        (**self).delete_email_credential(user_id).await
    }

    async fn set_user_roles(&self, user_id: &str, role_ids: &[i64]) -> Result<Vec<Role>, ApiError> {
        (**self).set_user_roles(user_id, role_ids).await
    }
}

#[async_trait]
impl UsersApi for LookerClient {
    async fn create_user(&self, first_name: &str, last_name: Option<&str>) -> Result<User, ApiError> {
        let body = json!({
            "first_name": first_name,
            "last_name": last_name.unwrap_or_default(),
        });
        let response = self.post(&self.users_url(), Some(&body)).await?;
        Ok(serde_json::from_value(response)?)
    }

    async fn get_user(&self, user_id: &str) -> Result<User, ApiError> {
        let response = self.get(&self.user_url(user_id)).await?;
        Ok(serde_json::from_value(response)?)
    }

    async fn update_user(&self, user_id: &str, user: &User) -> Result<User, ApiError> {
        let body = serde_json::to_value(user)?;
        let response = self.patch(&self.user_url(user_id), &body).await?;
        Ok(serde_json::from_value(response)?)
    }

    async fn delete_user(&self, user_id: &str) -> Result<(), ApiError> {
        self.delete(&self.user_url(user_id)).await?;
        Ok(())
    }

    async fn create_email_credential(
        &self,
        user_id: &str,
        email: &str,
        disabled: bool,
    ) -> Result<CredentialEmail, ApiError> {
        let body = json!({ "email": email, "is_disabled": disabled });
        let response = self.post(&self.user_email_url(user_id), Some(&body)).await?;
        Ok(serde_json::from_value(response)?)
    }

    async fn get_email_credential(&self, user_id: &str) -> Result<Option<CredentialEmail>, ApiError> {
        match self.get(&self.user_email_url(user_id)).await {
            Ok(Value::Null) => Ok(None),
            Ok(response) => Ok(Some(serde_json::from_value(response)?)),
            Err(ApiError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn update_email_credential(
        &self,
        user_id: &str,
        email: &str,
    ) -> Result<CredentialEmail, ApiError> {
        let body = json!({ "email": email });
        let response = self.patch(&self.user_email_url(user_id), &body).await?;
        Ok(serde_json::from_value(response)?)
    }

    async fn delete_email_credential(&self, user_id: &str) -> Result<(), ApiError> {
        self.delete(&self.user_email_url(user_id)).await?;
        Ok(())
    }

    async fn set_user_roles(&self, user_id: &str, role_ids: &[i64]) -> Result<Vec<Role>, ApiError> {
        let body = json!(role_ids);
        let response = self.put(&self.user_roles_url(user_id), &body).await?;
        if response.is_null() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_value(response)?)
    }
}
