//! Row types for the persisted schema and the identities issued by the
//! session provider.
//!
//! DESIGN
//! ======
//! These types mirror the `challenges`, `transactions` and `user_profiles`
//! tables so serde round-trips through either store backend stay lossless.
//! Columns with store-side defaults (`status`, `stake_type`, `id`,
//! `created_at`) are omitted from insert payloads rather than filled here.

#[cfg(test)]
#[path = "model_test.rs"]
mod model_test;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// IDENTITY
// =============================================================================

/// User identity as issued by the session provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

/// An authenticated session: bearer token plus the user it belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub user: User,
}

// =============================================================================
// CHALLENGES
// =============================================================================

/// Lifecycle state of a challenge. `Active` moves to exactly one of the
/// other three; only `Completed` and `Failed` are reachable from this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Active,
    Completed,
    Failed,
    Withdrawn,
}

impl ChallengeStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Withdrawn => "withdrawn",
        }
    }
}

/// Outcome a caller may resolve an active challenge to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminalStatus {
    Completed,
    Failed,
}

impl TerminalStatus {
    /// Ledger entry recorded alongside this outcome: the stake comes back
    /// on completion and is forfeited on failure.
    #[must_use]
    pub fn ledger_kind(self) -> TransactionKind {
        match self {
            Self::Completed => TransactionKind::Refund,
            Self::Failed => TransactionKind::Loss,
        }
    }
}

impl From<TerminalStatus> for ChallengeStatus {
    fn from(status: TerminalStatus) -> Self {
        match status {
            TerminalStatus::Completed => Self::Completed,
            TerminalStatus::Failed => Self::Failed,
        }
    }
}

/// A stake-backed goal. Mirrors the `challenges` table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub stake_amount: f64,
    pub stake_type: String,
    /// ISO-8601 date or timestamp, kept verbatim as stored.
    pub deadline: String,
    pub status: ChallengeStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Caller input for a new challenge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewChallenge {
    pub title: String,
    pub stake_amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stake_type: Option<String>,
    pub deadline: String,
}

impl NewChallenge {
    #[must_use]
    pub fn new(title: impl Into<String>, stake_amount: f64, deadline: impl Into<String>) -> Self {
        Self { title: title.into(), stake_amount, stake_type: None, deadline: deadline.into() }
    }

    #[must_use]
    pub fn with_stake_type(mut self, stake_type: impl Into<String>) -> Self {
        self.stake_type = Some(stake_type.into());
        self
    }
}

/// Insert payload for `challenges`: the caller's input stamped with the owner.
#[derive(Debug, Serialize)]
pub(crate) struct ChallengeInsert<'a> {
    #[serde(flatten)]
    pub input: &'a NewChallenge,
    pub user_id: Uuid,
}

/// Update payload for a terminal transition.
#[derive(Debug, Serialize)]
pub(crate) struct StatusPatch {
    pub status: ChallengeStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
}

// =============================================================================
// TRANSACTIONS
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Stake,
    Refund,
    Loss,
    Withdrawal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

/// A ledger entry tied to a challenge. Mirrors the `transactions` table
/// minus store-assigned columns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub challenge_id: Uuid,
    pub user_id: Uuid,
    pub amount: f64,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub status: TransactionStatus,
}

// =============================================================================
// PROFILES
// =============================================================================

/// Per-user aggregate counters. Maintained by the store, read-only here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    #[serde(default)]
    pub display_name: Option<String>,
    pub total_staked: f64,
    pub total_completed: i64,
    pub total_failed: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}
