//! Session provider contract: identity, sign-in flows and change events.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::model::{Session, User};
use crate::services::auth::AuthError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// Broadcast on every auth-state change. `session` is the state after the
/// change; `None` means signed out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthChange {
    pub event: AuthEvent,
    pub session: Option<Session>,
}

/// Where the browser must go to continue an OAuth sign-in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectResponse {
    pub provider: String,
    pub url: String,
}

/// Authentication backend. Mutating calls return the provider's payload
/// untouched on success and [`AuthError::Provider`] on rejection.
#[async_trait::async_trait]
pub trait SessionProvider: Send + Sync {
    async fn current_session(&self) -> Result<Option<Session>, AuthError>;

    async fn current_user(&self) -> Result<Option<User>, AuthError>;

    /// Receiver for auth changes made after this call.
    fn subscribe(&self) -> broadcast::Receiver<AuthChange>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Value, AuthError>;

    async fn sign_up(&self, email: &str, password: &str, profile_data: Option<&Value>) -> Result<Value, AuthError>;

    async fn sign_in_with_redirect(&self, provider: &str, redirect_url: &str) -> Result<RedirectResponse, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;
}
