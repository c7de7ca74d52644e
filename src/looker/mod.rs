//! Looker API interaction module
//!
//! This module provides the remote side of user reconciliation: authentication,
//! an HTTP client, and typed user/credential/role endpoints.
//!
//! # Module Structure
//!
//! - [`auth`] - API client-credential login with token caching
//! - [`client`] - Main Looker client for making API requests
//! - [`error`] - Error type shared by all API calls
//! - [`http`] - HTTP utilities for REST API calls
//! - [`users`] - User, email credential and role endpoints behind the [`users::UsersApi`] trait
//!
//! # Example
//!
//! ```ignore
//! use lookerctl::looker::{client::LookerClient, users::UsersApi};
//!
//! async fn example(client: &LookerClient) -> Result<(), lookerctl::looker::ApiError> {
//!     let user = client.get_user("42").await?;
//!     println!("{:?}", user.first_name);
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod error;
pub mod http;
pub mod users;

pub use client::LookerClient;
pub use error::ApiError;
pub use users::{CredentialEmail, Role, User, UsersApi};
