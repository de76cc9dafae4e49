//! Client-side data layer for stake-backed challenges: auth state, the
//! challenge registry with its paired ledger writes, profile counters, and
//! the navigation guard.

pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod providers;
pub mod router;
pub mod services;
pub mod state;

#[cfg(test)]
mod test_helpers;
