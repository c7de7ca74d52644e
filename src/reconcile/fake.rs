//! In-memory Looker stand-in for reconciler tests

use crate::looker::{ApiError, CredentialEmail, Role, User, UsersApi};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
struct State {
    next_id: u64,
    users: BTreeMap<String, User>,
    emails: BTreeMap<String, CredentialEmail>,
    calls: Vec<&'static str>,
    failing: HashSet<&'static str>,
    not_found: HashSet<&'static str>,
}

#[derive(Default)]
pub struct FakeLooker {
    state: Mutex<State>,
}

impl FakeLooker {
    /// Make every later call to `method` fail with a 500
    pub fn fail_on(&self, method: &'static str) {
        self.state.lock().unwrap().failing.insert(method);
    }

    /// Make every later call to `method` answer 404
    pub fn not_found_on(&self, method: &'static str) {
        self.state.lock().unwrap().not_found.insert(method);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn set_roles_calls(&self) -> usize {
        self.calls().iter().filter(|c| **c == "set_user_roles").count()
    }

    pub fn user(&self, id: &str) -> Option<User> {
        self.state.lock().unwrap().users.get(id).cloned()
    }

    pub fn user_count(&self) -> usize {
        self.state.lock().unwrap().users.len()
    }

    pub fn email_of(&self, id: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .emails
            .get(id)
            .and_then(|c| c.email.clone())
    }

    /// Simulate an out-of-band user deletion
    pub fn remove_user(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        state.users.remove(id);
        state.emails.remove(id);
    }

    /// Simulate an out-of-band credential deletion
    pub fn remove_email(&self, id: &str) {
        self.state.lock().unwrap().emails.remove(id);
    }

    fn enter(&self, method: &'static str) -> Result<std::sync::MutexGuard<'_, State>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(method);
        if state.failing.contains(method) {
            return Err(ApiError::Status {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: Some(format!("{method} failed")),
            });
        }
        if state.not_found.contains(method) {
            return Err(ApiError::NotFound);
        }
        Ok(state)
    }
}

#[async_trait]
impl UsersApi for FakeLooker {
    async fn create_user(&self, first_name: &str, last_name: Option<&str>) -> Result<User, ApiError> {
        let mut state = self.enter("create_user")?;
        state.next_id += 1;
        let id = state.next_id.to_string();
        let user = User {
            id: Some(id.clone()),
            first_name: Some(first_name.to_string()),
            last_name: Some(last_name.unwrap_or_default().to_string()),
            role_ids: Some(Vec::new()),
            is_disabled: Some(false),
            ..User::default()
        };
        state.users.insert(id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, user_id: &str) -> Result<User, ApiError> {
        let state = self.enter("get_user")?;
        state.users.get(user_id).cloned().ok_or(ApiError::NotFound)
    }

    async fn update_user(&self, user_id: &str, user: &User) -> Result<User, ApiError> {
        let mut state = self.enter("update_user")?;
        let stored = state.users.get_mut(user_id).ok_or(ApiError::NotFound)?;
        stored.first_name = user.first_name.clone();
        stored.last_name = user.last_name.clone();
        Ok(stored.clone())
    }

    async fn delete_user(&self, user_id: &str) -> Result<(), ApiError> {
        let mut state = self.enter("delete_user")?;
        state.emails.remove(user_id);
        state.users.remove(user_id).map(|_| ()).ok_or(ApiError::NotFound)
    }

    async fn create_email_credential(
        &self,
        user_id: &str,
        email: &str,
        disabled: bool,
    ) -> Result<CredentialEmail, ApiError> {
        let mut state = self.enter("create_email_credential")?;
        if !state.users.contains_key(user_id) {
            return Err(ApiError::NotFound);
        }
        let credential = CredentialEmail {
            email: Some(email.to_string()),
            is_disabled: disabled,
        };
        state.emails.insert(user_id.to_string(), credential.clone());
        Ok(credential)
    }

    async fn get_email_credential(&self, user_id: &str) -> Result<Option<CredentialEmail>, ApiError> {
        let state = self.enter("get_email_credential")?;
        Ok(state.emails.get(user_id).cloned())
    }

    async fn update_email_credential(
        &self,
        user_id: &str,
        email: &str,
    ) -> Result<CredentialEmail, ApiError> {
        let mut state = self.enter("update_email_credential")?;
        let credential = state.emails.get_mut(user_id).ok_or(ApiError::NotFound)?;
        credential.email = Some(email.to_string());
        Ok(credential.clone())
    }

    async fn delete_email_credential(&self, user_id: &str) -> Result<(), ApiError> {
        let mut state = self.enter("delete_email_credential")?;
        state.emails.remove(user_id).map(|_| ()).ok_or(ApiError::NotFound)
    }

    async fn set_user_roles(&self, user_id: &str, role_ids: &[i64]) -> Result<Vec<Role>, ApiError> {
        let mut state = self.enter("set_user_roles")?;
        let user = state.users.get_mut(user_id).ok_or(ApiError::NotFound)?;
        user.role_ids = Some(role_ids.to_vec());
        Ok(role_ids
            .iter()
            .map(|id| Role {
                id: id.to_string(),
                name: None,
            })
            .collect())
    }
}
