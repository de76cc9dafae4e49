//! Client-side state services.
//!
//! ARCHITECTURE
//! ============
//! Each service owns its cached state and talks to the backend only through
//! the provider traits, so the same code runs against the hosted service,
//! a direct database connection, or the in-memory backends in tests.

pub mod auth;
pub mod challenges;
pub mod profile;
