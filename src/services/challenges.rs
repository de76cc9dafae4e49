//! Challenge service: cached challenge list, creation, and outcomes.
//!
//! DESIGN
//! ======
//! The registry caches the caller-visible challenge list (newest first) and
//! replaces it wholesale after every write. Creating a challenge and
//! resolving one each write a companion ledger row to `transactions`:
//! `stake` on creation, `refund` on completion, `loss` on failure.
//!
//! ERROR HANDLING
//! ==============
//! The challenge write and its ledger write are sequential, not atomic. If
//! the ledger insert fails the challenge write stays in place and the error
//! is returned as-is; the cache is not refreshed on that path.
//!
//! The outcome ledger entry takes its amount from the cached list. A
//! challenge that is missing from the cache (never fetched, or fetched
//! before it existed) is updated in the store but gets no ledger entry.

#[cfg(test)]
#[path = "challenges_test.rs"]
mod challenges_test;

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::model::{
    Challenge, ChallengeInsert, ChallengeStatus, NewChallenge, StatusPatch, TerminalStatus, Transaction,
    TransactionKind, TransactionStatus, User,
};
use crate::providers::store::{insert_row, select_rows, update_rows};
use crate::providers::{Direction, Filter, Query, RecordStore, SessionProvider, StoreError, Table};
use crate::services::auth::AuthError;
use crate::state::{LoadingGuard, StateCell};

#[derive(Debug, thiserror::Error)]
pub enum ChallengeError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for ChallengeError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Auth(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Auth(e) => e.retryable(),
            Self::Store(e) => e.retryable(),
        }
    }
}

#[derive(Clone)]
pub struct ChallengeRegistry {
    session: Arc<dyn SessionProvider>,
    store: Arc<dyn RecordStore>,
    challenges: StateCell<Vec<Challenge>>,
    loading: StateCell<bool>,
}

impl ChallengeRegistry {
    #[must_use]
    pub fn new(session: Arc<dyn SessionProvider>, store: Arc<dyn RecordStore>) -> Self {
        Self { session, store, challenges: StateCell::default(), loading: StateCell::new(false) }
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Reload every challenge, newest first, replacing the cached list.
    ///
    /// # Errors
    ///
    /// Returns the store's error; the cached list is left untouched.
    pub async fn fetch_all(&self) -> Result<(), StoreError> {
        let _loading = LoadingGuard::engage(&self.loading);
        let query = Query::new().order_by("created_at", Direction::Descending);
        let rows: Vec<Challenge> = select_rows(self.store.as_ref(), Table::Challenges, &query)
            .await
            .inspect_err(|e| warn!(error = %e, "challenge fetch failed"))?;
        debug!(count = rows.len(), "challenges fetched");
        self.challenges.set(rows);
        Ok(())
    }

    #[must_use]
    pub fn challenges(&self) -> Vec<Challenge> {
        self.challenges.get()
    }

    #[must_use]
    pub fn active(&self) -> Vec<Challenge> {
        self.with_status(ChallengeStatus::Active)
    }

    #[must_use]
    pub fn completed(&self) -> Vec<Challenge> {
        self.with_status(ChallengeStatus::Completed)
    }

    #[must_use]
    pub fn failed(&self) -> Vec<Challenge> {
        self.with_status(ChallengeStatus::Failed)
    }

    /// Cached challenges in `status`, in cache order.
    #[must_use]
    pub fn with_status(&self, status: ChallengeStatus) -> Vec<Challenge> {
        self.challenges
            .with(|list| list.iter().filter(|c| c.status == status).cloned().collect())
    }

    #[must_use]
    pub fn loading(&self) -> bool {
        self.loading.get()
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Vec<Challenge>> {
        self.challenges.watch()
    }

    pub fn reset(&self) {
        self.challenges.set(Vec::new());
        self.loading.set(false);
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Create a challenge for the signed-in user, record its stake, and
    /// refresh the cache. Returns the row as stored.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` (with no writes) when nobody is signed in;
    /// otherwise the first failing store call.
    pub async fn create(&self, input: &NewChallenge) -> Result<Challenge, ChallengeError> {
        let user = self.current_user().await?;

        let row = ChallengeInsert { input, user_id: user.id };
        let created: Challenge = insert_row(self.store.as_ref(), Table::Challenges, &row)
            .await
            .inspect_err(|e| warn!(error = %e, user_id = %user.id, "challenge insert failed"))?;
        info!(challenge_id = %created.id, user_id = %user.id, stake = created.stake_amount, "challenge created");

        self.record_transaction(created.id, input.stake_amount, TransactionKind::Stake)
            .await?;
        self.fetch_all().await?;
        Ok(created)
    }

    /// Resolve a challenge, record the matching ledger entry when the
    /// challenge is cached, and refresh the cache.
    ///
    /// # Errors
    ///
    /// The first failing store call, or `NotAuthenticated` if the ledger
    /// entry is due and nobody is signed in.
    pub async fn transition_status(&self, challenge_id: Uuid, status: TerminalStatus) -> Result<(), ChallengeError> {
        let patch = StatusPatch { status: status.into(), completed_at: OffsetDateTime::now_utc() };
        update_rows(self.store.as_ref(), Table::Challenges, &[Filter::eq("id", challenge_id)], &patch)
            .await
            .inspect_err(|e| warn!(error = %e, %challenge_id, "challenge status update failed"))?;
        info!(%challenge_id, status = patch.status.as_str(), "challenge resolved");

        let stake = self.challenges.with(|list| {
            list.iter()
                .find(|c| c.id == challenge_id)
                .map(|c| c.stake_amount)
        });
        match stake {
            Some(amount) => self.record_transaction(challenge_id, amount, status.ledger_kind()).await?,
            None => debug!(%challenge_id, "challenge not cached, no ledger entry recorded"),
        }

        self.fetch_all().await?;
        Ok(())
    }

    async fn current_user(&self) -> Result<User, AuthError> {
        self.session
            .current_user()
            .await?
            .ok_or(AuthError::NotAuthenticated)
    }

    async fn record_transaction(&self, challenge_id: Uuid, amount: f64, kind: TransactionKind) -> Result<(), ChallengeError> {
        let user = self.current_user().await?;
        let tx = Transaction { challenge_id, user_id: user.id, amount, kind, status: TransactionStatus::Completed };
        let _stored: serde_json::Value = insert_row(self.store.as_ref(), Table::Transactions, &tx)
            .await
            .inspect_err(|e| warn!(error = %e, %challenge_id, kind = ?kind, "ledger insert failed"))?;
        debug!(%challenge_id, kind = ?kind, amount, "ledger entry recorded");
        Ok(())
    }
}
