//! Route table and navigation guard.
//!
//! SYSTEM CONTEXT
//! ==============
//! Every navigation is checked against the target route's requirements
//! before it happens: signed-out users are sent to the auth page, signed-in
//! users are kept off guest-only pages. The decision reads the auth cell
//! synchronously and never waits on the provider.

#[cfg(test)]
#[path = "router_test.rs"]
mod router_test;

use tracing::debug;

use crate::services::auth::AuthState;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RouteMeta {
    pub requires_auth: bool,
    pub requires_guest: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Route {
    Landing,
    Auth,
    Dashboard,
}

impl Route {
    pub const ALL: [Route; 3] = [Route::Landing, Route::Auth, Route::Dashboard];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Landing => "landing",
            Self::Auth => "auth",
            Self::Dashboard => "dashboard",
        }
    }

    #[must_use]
    pub fn path(self) -> &'static str {
        match self {
            Self::Landing => "/",
            Self::Auth => "/auth",
            Self::Dashboard => "/dashboard",
        }
    }

    #[must_use]
    pub fn meta(self) -> RouteMeta {
        match self {
            Self::Landing | Self::Auth => RouteMeta { requires_auth: false, requires_guest: true },
            Self::Dashboard => RouteMeta { requires_auth: true, requires_guest: false },
        }
    }

    /// Resolve a URL path, ignoring any query string, fragment or trailing
    /// slash.
    #[must_use]
    pub fn from_path(path: &str) -> Option<Route> {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let trimmed = path.trim_end_matches('/');
        let normalized = if trimmed.is_empty() { "/" } else { trimmed };
        Self::ALL.into_iter().find(|r| r.path() == normalized)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Navigation {
    Allow,
    Redirect(&'static str),
}

/// Decide a navigation from the target's requirements and auth status.
#[must_use]
pub fn decide(meta: RouteMeta, authenticated: bool) -> Navigation {
    if meta.requires_auth && !authenticated {
        Navigation::Redirect(Route::Auth.path())
    } else if meta.requires_guest && authenticated {
        Navigation::Redirect(Route::Dashboard.path())
    } else {
        Navigation::Allow
    }
}

#[derive(Clone)]
pub struct NavigationGuard {
    auth: AuthState,
}

impl NavigationGuard {
    #[must_use]
    pub fn new(auth: AuthState) -> Self {
        Self { auth }
    }

    #[must_use]
    pub fn auth(&self) -> &AuthState {
        &self.auth
    }

    #[must_use]
    pub fn before_each(&self, to: Route) -> Navigation {
        let decision = decide(to.meta(), self.auth.is_authenticated());
        debug!(route = to.name(), ?decision, "navigation checked");
        decision
    }

    /// Guard a raw path. Paths outside the route table carry no
    /// requirements and are allowed.
    #[must_use]
    pub fn before_path(&self, path: &str) -> Navigation {
        Route::from_path(path).map_or(Navigation::Allow, |route| self.before_each(route))
    }
}
