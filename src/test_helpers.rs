//! Shared fixtures for unit tests.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::model::{Session, User};
use crate::providers::memory::MemorySessionProvider;
use crate::providers::{AuthChange, RedirectResponse, SessionProvider};
use crate::services::auth::AuthError;

/// A provider whose every call fails as if the service were unreachable.
pub struct BrokenSessionProvider;

fn unavailable() -> AuthError {
    AuthError::Request("provider unavailable".into())
}

#[async_trait::async_trait]
impl SessionProvider for BrokenSessionProvider {
    async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        Err(unavailable())
    }

    async fn current_user(&self) -> Result<Option<User>, AuthError> {
        Err(unavailable())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        broadcast::channel(1).1
    }

    async fn sign_in_with_password(&self, _email: &str, _password: &str) -> Result<Value, AuthError> {
        Err(unavailable())
    }

    async fn sign_up(&self, _email: &str, _password: &str, _profile_data: Option<&Value>) -> Result<Value, AuthError> {
        Err(unavailable())
    }

    async fn sign_in_with_redirect(&self, _provider: &str, _redirect_url: &str) -> Result<RedirectResponse, AuthError> {
        Err(unavailable())
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        Err(unavailable())
    }
}

/// Memory provider with one account already signed in.
pub fn signed_in_provider() -> (Arc<MemorySessionProvider>, User) {
    let provider = Arc::new(MemorySessionProvider::new());
    let user = provider.register("u1@example.com", "pw");
    provider.start_session(user.clone());
    (provider, user)
}

/// A stored `challenges` row as the backend would return it.
pub fn challenge_row(user_id: Uuid, title: &str, stake_amount: f64, status: &str, created_at: &str) -> Value {
    json!({
        "id": Uuid::new_v4(),
        "user_id": user_id,
        "title": title,
        "stake_amount": stake_amount,
        "stake_type": "money",
        "deadline": "2024-01-01",
        "status": status,
        "created_at": created_at,
        "completed_at": null,
        "metadata": {}
    })
}
