//! Auth service: current user, sign-in flows, and change tracking.
//!
//! DESIGN
//! ======
//! `AuthState` is the single auth module for both password and redirect
//! (OAuth) sign-in; which flows are callable is decided by
//! [`AuthCapabilities`] from configuration. The current user lives in a
//! [`StateCell`] that is written on initialization and then by a listener
//! task fed from the provider's change stream. The caller owns that task
//! through the returned [`AuthSubscription`].
//!
//! TRADE-OFFS
//! ==========
//! `sign_out` does not clear the cached user itself; the change stream does
//! it asynchronously. Until that event lands, `is_authenticated()` still
//! reports the old session.

#[cfg(test)]
#[path = "auth_test.rs"]
mod auth_test;

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ErrorCode;
use crate::model::User;
use crate::providers::{AuthChange, RedirectResponse, SessionProvider};
use crate::router::Route;
use crate::state::{LoadingGuard, StateCell};

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The provider refused the operation; `payload` is its error body.
    #[error("auth provider rejected request: {message}")]
    Provider { status: Option<u16>, message: String, payload: Value },

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("{0} sign-in is not enabled")]
    Unsupported(&'static str),

    #[error("auth request failed: {0}")]
    Request(String),
}

impl ErrorCode for AuthError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Provider { .. } => "E_AUTH_PROVIDER",
            Self::NotAuthenticated => "E_NOT_AUTHENTICATED",
            Self::Unsupported(_) => "E_AUTH_UNSUPPORTED",
            Self::Request(_) => "E_AUTH_REQUEST",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Request(_) | Self::Provider { status: Some(429 | 500..=599), .. })
    }
}

// =============================================================================
// OPTIONS
// =============================================================================

/// Which sign-in flows are enabled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuthCapabilities {
    pub password: bool,
    pub redirect: bool,
}

impl AuthCapabilities {
    #[must_use]
    pub fn password_only() -> Self {
        Self { password: true, redirect: false }
    }

    #[must_use]
    pub fn redirect_only() -> Self {
        Self { password: false, redirect: true }
    }
}

impl Default for AuthCapabilities {
    fn default() -> Self {
        Self { password: true, redirect: true }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthOptions {
    pub capabilities: AuthCapabilities,
    /// OAuth provider used when the caller does not name one.
    pub redirect_provider: String,
    /// Public origin of the web app; redirect sign-in lands on its dashboard.
    pub site_url: String,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            capabilities: AuthCapabilities::default(),
            redirect_provider: "google".into(),
            site_url: "http://localhost:5173".into(),
        }
    }
}

impl AuthOptions {
    #[must_use]
    pub fn redirect_url(&self) -> String {
        format!("{}{}", self.site_url.trim_end_matches('/'), Route::Dashboard.path())
    }
}

/// Email/password pair, plus optional profile fields for sign-up.
#[derive(Clone, Debug, PartialEq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    pub profile_data: Option<Value>,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self { email: email.into(), password: password.into(), profile_data: None }
    }

    #[must_use]
    pub fn with_profile_data(mut self, data: Value) -> Self {
        self.profile_data = Some(data);
        self
    }
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// Owns the listener that mirrors provider auth changes into `AuthState`.
/// Dropping it stops the listener.
pub struct AuthSubscription {
    task: JoinHandle<()>,
}

impl AuthSubscription {
    pub fn cancel(self) {
        self.task.abort();
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for AuthSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// =============================================================================
// AUTH STATE
// =============================================================================

#[derive(Clone)]
pub struct AuthState {
    session: Arc<dyn SessionProvider>,
    options: Arc<AuthOptions>,
    user: StateCell<Option<User>>,
    loading: StateCell<bool>,
}

impl AuthState {
    #[must_use]
    pub fn new(session: Arc<dyn SessionProvider>, options: AuthOptions) -> Self {
        Self { session, options: Arc::new(options), user: StateCell::new(None), loading: StateCell::new(true) }
    }

    /// Load the current session and start following auth changes.
    ///
    /// `loading` is cleared once the lookup settles, whether or not it
    /// succeeded.
    ///
    /// # Errors
    ///
    /// Returns the provider's error if the session lookup fails; no
    /// listener is left running in that case.
    pub async fn initialize(&self) -> Result<AuthSubscription, AuthError> {
        let _loading = LoadingGuard::engage(&self.loading);
        // Subscribe before the lookup so a change racing it is not lost.
        let changes = self.session.subscribe();

        let session = self
            .session
            .current_session()
            .await
            .inspect_err(|e| warn!(error = %e, "session lookup failed"))?;

        let user = session.map(|s| s.user);
        match &user {
            Some(u) => info!(user_id = %u.id, "session restored"),
            None => debug!("no active session"),
        }
        self.user.set(user);

        Ok(self.follow(changes))
    }

    fn follow(&self, mut changes: broadcast::Receiver<AuthChange>) -> AuthSubscription {
        let user = self.user.clone();
        let task = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        debug!(event = ?change.event, "auth state changed");
                        user.set(change.session.map(|s| s.user));
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "auth change stream lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        AuthSubscription { task }
    }

    fn require(enabled: bool, flow: &'static str) -> Result<(), AuthError> {
        if enabled { Ok(()) } else { Err(AuthError::Unsupported(flow)) }
    }

    /// # Errors
    ///
    /// `Unsupported` when password auth is disabled, otherwise the
    /// provider's rejection.
    pub async fn sign_in(&self, credentials: &Credentials) -> Result<Value, AuthError> {
        Self::require(self.options.capabilities.password, "password")?;
        let payload = self
            .session
            .sign_in_with_password(&credentials.email, &credentials.password)
            .await
            .inspect_err(|e| warn!(error = %e, "password sign-in rejected"))?;
        info!("password sign-in succeeded");
        Ok(payload)
    }

    /// # Errors
    ///
    /// `Unsupported` when password auth is disabled, otherwise the
    /// provider's rejection.
    pub async fn sign_up(&self, credentials: &Credentials) -> Result<Value, AuthError> {
        Self::require(self.options.capabilities.password, "password")?;
        let payload = self
            .session
            .sign_up(&credentials.email, &credentials.password, credentials.profile_data.as_ref())
            .await
            .inspect_err(|e| warn!(error = %e, "sign-up rejected"))?;
        info!("sign-up succeeded");
        Ok(payload)
    }

    /// Start an OAuth sign-in, landing on the dashboard afterwards.
    /// `provider` falls back to the configured default.
    ///
    /// # Errors
    ///
    /// `Unsupported` when redirect auth is disabled, otherwise the
    /// provider's rejection.
    pub async fn sign_in_with_redirect(&self, provider: Option<&str>) -> Result<RedirectResponse, AuthError> {
        Self::require(self.options.capabilities.redirect, "redirect")?;
        let provider = provider.unwrap_or(&self.options.redirect_provider);
        self.session
            .sign_in_with_redirect(provider, &self.options.redirect_url())
            .await
            .inspect_err(|e| warn!(error = %e, %provider, "redirect sign-in rejected"))
    }

    /// # Errors
    ///
    /// Returns the provider's rejection.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.session
            .sign_out()
            .await
            .inspect_err(|e| warn!(error = %e, "sign-out rejected"))
    }

    #[must_use]
    pub fn user(&self) -> Option<User> {
        self.user.get()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.with(Option::is_some)
    }

    #[must_use]
    pub fn loading(&self) -> bool {
        self.loading.get()
    }

    #[must_use]
    pub fn watch_user(&self) -> watch::Receiver<Option<User>> {
        self.user.watch()
    }

    #[must_use]
    pub fn options(&self) -> &AuthOptions {
        &self.options
    }

    pub fn reset(&self) {
        self.user.set(None);
        self.loading.set(true);
    }
}
