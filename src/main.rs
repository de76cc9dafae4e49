use std::sync::Arc;

use stakeboard::config::{AppConfig, StoreMode};
use stakeboard::db;
use stakeboard::providers::memory::{MemorySessionProvider, MemoryStore};
use stakeboard::providers::postgres::PgStore;
use stakeboard::providers::rest::RestBackend;
use stakeboard::providers::{RecordStore, SessionProvider};
use stakeboard::router::Route;
use stakeboard::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = AppConfig::from_env().expect("invalid configuration");

    let (session, store): (Arc<dyn SessionProvider>, Arc<dyn RecordStore>) = match config.store_mode {
        StoreMode::Rest => {
            let backend = config.backend.as_ref().expect("BACKEND_URL required");
            let rest = Arc::new(RestBackend::new(backend).expect("http client init failed"));
            let session: Arc<dyn SessionProvider> = rest.clone();
            (session, rest)
        }
        StoreMode::Postgres => {
            let backend = config.backend.as_ref().expect("BACKEND_URL required");
            let database = config.database.as_ref().expect("DATABASE_URL required");
            let rest = Arc::new(RestBackend::new(backend).expect("http client init failed"));
            let pool = db::init_pool(&database.url, database.max_connections)
                .await
                .expect("database init failed");
            (rest, Arc::new(PgStore::new(pool)))
        }
        StoreMode::Memory => (Arc::new(MemorySessionProvider::new()), Arc::new(MemoryStore::new())),
    };

    let state = AppState::new(session, store, config.auth.clone());
    let _subscription = state.auth.initialize().await.expect("auth init failed");
    let options = state.auth.options();
    tracing::info!(
        password = options.capabilities.password,
        redirect = options.capabilities.redirect,
        provider = %options.redirect_provider,
        "auth flows enabled"
    );

    if let Some(credentials) = &config.sign_in {
        let result = match config.store_mode {
            StoreMode::Memory => state.auth.sign_up(credentials).await,
            StoreMode::Rest | StoreMode::Postgres => state.auth.sign_in(credentials).await,
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "startup sign-in failed");
        }
    }

    if let Err(e) = state.profile.refresh().await {
        tracing::warn!(error = %e, "profile refresh failed");
    }
    if let Err(e) = state.challenges.fetch_all().await {
        tracing::warn!(error = %e, "challenge fetch failed");
    }

    tracing::info!(
        mode = ?config.store_mode,
        user = ?state.auth.user().map(|u| u.id),
        total = state.challenges.challenges().len(),
        active = state.challenges.active().len(),
        completed = state.challenges.completed().len(),
        failed = state.challenges.failed().len(),
        "stakeboard ready"
    );
    if let Some(profile) = state.profile.profile() {
        tracing::info!(
            staked = profile.total_staked,
            completed = profile.total_completed,
            failed = profile.total_failed,
            "profile loaded"
        );
    }
    for route in Route::ALL {
        tracing::info!(route = route.path(), decision = ?state.guard.before_each(route), "navigation");
    }
}
