//! Shared application state.
//!
//! DESIGN
//! ======
//! Each service owns its cached values as [`StateCell`]s: cloneable
//! handles over a `tokio::sync::watch` channel, so every consumer reads the
//! same snapshot and can await changes. Writes are last-write-wins with no
//! version check. [`LoadingGuard`] raises a loading flag for the duration of
//! an operation and lowers it on every exit path, including `?` returns.
//!
//! `AppState` bundles the services behind one handle so the binary (or a UI
//! shell) can inject it wherever the cells are needed.

#[cfg(test)]
#[path = "state_test.rs"]
mod state_test;

use std::sync::Arc;

use tokio::sync::watch;

use crate::providers::{RecordStore, SessionProvider};
use crate::router::NavigationGuard;
use crate::services::auth::{AuthOptions, AuthState};
use crate::services::challenges::ChallengeRegistry;
use crate::services::profile::ProfileReader;

// =============================================================================
// STATE CELL
// =============================================================================

/// Reactive, cloneable container for one value.
#[derive(Debug)]
pub struct StateCell<T> {
    tx: Arc<watch::Sender<T>>,
}

impl<T> Clone for StateCell<T> {
    fn clone(&self) -> Self {
        Self { tx: Arc::clone(&self.tx) }
    }
}

impl<T> StateCell<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Replace the value and notify watchers.
    pub fn set(&self, value: T) {
        self.tx.send_replace(value);
    }

    /// Read through a borrow without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.tx.borrow())
    }

    /// Receiver that observes every subsequent `set`.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

impl<T: Clone> StateCell<T> {
    #[must_use]
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }
}

impl<T: Default> Default for StateCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

// =============================================================================
// LOADING GUARD
// =============================================================================

/// Holds a loading flag high until dropped.
#[must_use = "the flag drops back to false as soon as the guard is dropped"]
pub struct LoadingGuard {
    flag: StateCell<bool>,
}

impl LoadingGuard {
    pub fn engage(flag: &StateCell<bool>) -> Self {
        flag.set(true);
        Self { flag: flag.clone() }
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// All client-side state containers, wired to one pair of collaborators.
/// Clone is cheap: every field is a handle.
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthState,
    pub challenges: ChallengeRegistry,
    pub profile: ProfileReader,
    pub guard: NavigationGuard,
}

impl AppState {
    #[must_use]
    pub fn new(session: Arc<dyn SessionProvider>, store: Arc<dyn RecordStore>, options: AuthOptions) -> Self {
        let auth = AuthState::new(Arc::clone(&session), options);
        let challenges = ChallengeRegistry::new(Arc::clone(&session), Arc::clone(&store));
        let profile = ProfileReader::new(session, store);
        let guard = NavigationGuard::new(auth.clone());
        Self { auth, challenges, profile, guard }
    }

    /// Return every cell to its initial value.
    pub fn reset(&self) {
        self.auth.reset();
        self.challenges.reset();
        self.profile.reset();
    }
}
