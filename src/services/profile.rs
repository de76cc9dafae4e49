//! Profile service: read-only view of the signed-in user's counters.
//!
//! The `user_profiles` row is maintained store-side from the ledger; this
//! module only ever reads it.

#[cfg(test)]
#[path = "profile_test.rs"]
mod profile_test;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::model::UserProfile;
use crate::providers::store::select_rows;
use crate::providers::{Query, RecordStore, SessionProvider, StoreError, Table};
use crate::state::{LoadingGuard, StateCell};

#[derive(Clone)]
pub struct ProfileReader {
    session: Arc<dyn SessionProvider>,
    store: Arc<dyn RecordStore>,
    profile: StateCell<Option<UserProfile>>,
    loading: StateCell<bool>,
}

impl ProfileReader {
    #[must_use]
    pub fn new(session: Arc<dyn SessionProvider>, store: Arc<dyn RecordStore>) -> Self {
        Self { session, store, profile: StateCell::new(None), loading: StateCell::new(false) }
    }

    /// Reload the signed-in user's profile. Does nothing when nobody is
    /// signed in; a missing row leaves the profile empty.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the read fails.
    pub async fn refresh(&self) -> Result<(), StoreError> {
        let _loading = LoadingGuard::engage(&self.loading);

        let user = match self.session.current_user().await {
            Ok(Some(user)) => user,
            Ok(None) => return Ok(()),
            Err(e) => {
                debug!(error = %e, "user lookup failed, skipping profile refresh");
                return Ok(());
            }
        };

        let query = Query::new().eq("id", user.id).limit(1);
        let rows: Vec<UserProfile> = select_rows(self.store.as_ref(), Table::UserProfiles, &query)
            .await
            .inspect_err(|e| warn!(error = %e, user_id = %user.id, "profile fetch failed"))?;

        let profile = rows.into_iter().next();
        debug!(user_id = %user.id, found = profile.is_some(), "profile refreshed");
        self.profile.set(profile);
        Ok(())
    }

    #[must_use]
    pub fn profile(&self) -> Option<UserProfile> {
        self.profile.get()
    }

    #[must_use]
    pub fn loading(&self) -> bool {
        self.loading.get()
    }

    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Option<UserProfile>> {
        self.profile.watch()
    }

    pub fn reset(&self) {
        self.profile.set(None);
        self.loading.set(false);
    }
}
