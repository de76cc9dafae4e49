//! External collaborators and their concrete backends.
//!
//! ARCHITECTURE
//! ============
//! Services depend only on the [`SessionProvider`] and [`RecordStore`]
//! traits. `rest` talks to the hosted service over HTTP, `postgres` goes
//! straight to the database, and `memory` keeps everything in process.

pub mod memory;
pub mod postgres;
pub mod rest;
pub mod session;
pub mod store;

pub use session::{AuthChange, AuthEvent, RedirectResponse, SessionProvider};
pub use store::{Direction, Filter, Query, RecordStore, StoreError, Table};
