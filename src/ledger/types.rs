//! Ledger record types and shared helpers.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{ChoreError, Result};

/// Current schema version stamped into `schema_meta`.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// The sole persisted date representation (`YYYY-MM-DD`).
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub type UserId = i64;
pub type ChoreId = i64;

/// Household role of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Parent,
    Child,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parent => "parent",
            Self::Child => "child",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "parent" => Some(Self::Parent),
            "child" => Some(Self::Child),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A household member with a running point balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// Opaque to the ledger; verified by the request layer.
    #[serde(skip_serializing)]
    pub credential_hash: String,
    pub email: String,
    pub role: Role,
    pub points: i64,
}

/// Input for [`LedgerStore::create_user`](super::LedgerStore::create_user).
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub credential_hash: String,
    pub email: String,
    pub role: Role,
}

/// A recurring chore definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chore {
    pub id: ChoreId,
    pub name: String,
    pub points: i64,
    pub default_user_id: Option<UserId>,
}

/// Input for [`LedgerStore::create_chore`](super::LedgerStore::create_chore).
#[derive(Debug, Clone)]
pub struct NewChore {
    pub name: String,
    pub points: i64,
    pub default_user_id: Option<UserId>,
}

/// The materialized occurrence of a chore on one calendar date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyChore {
    pub id: i64,
    /// Current owner. `None` when the chore has no default owner and nobody claimed it.
    pub user_id: Option<UserId>,
    pub chore_id: ChoreId,
    pub date: NaiveDate,
    pub completed: bool,
    /// Acting user of the last false→true transition.
    pub completed_by: Option<UserId>,
}

/// Per-request view of one chore on one date, from one user's perspective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoreView {
    pub chore_id: ChoreId,
    pub name: String,
    pub points: i64,
    pub date: NaiveDate,
    pub instance_exists: bool,
    pub completed: bool,
    pub owner_id: Option<UserId>,
    pub is_assigned: bool,
    pub is_claimable: bool,
}

/// Why a balance changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointReason {
    Credit,
    Debit,
    Reset,
}

impl PointReason {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Credit => "credit",
            Self::Debit => "debit",
            Self::Reset => "reset",
        }
    }

    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "credit" => Some(Self::Credit),
            "debit" => Some(Self::Debit),
            "reset" => Some(Self::Reset),
            _ => None,
        }
    }
}

/// One row of the points journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointEvent {
    pub id: i64,
    pub user_id: UserId,
    pub chore_id: Option<ChoreId>,
    pub date: Option<NaiveDate>,
    pub delta: i64,
    pub reason: PointReason,
    pub at: i64,
}

/// Parse an ISO calendar date (`YYYY-MM-DD`).
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
        .map_err(|e| ChoreError::Validation(format!("malformed date '{s}': {e}")))
}

/// Format a date the way it is persisted.
pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// The date `n` days before `date`.
pub fn days_before(date: NaiveDate, n: u64) -> Result<NaiveDate> {
    date.checked_sub_days(Days::new(n))
        .ok_or_else(|| ChoreError::Validation(format!("date out of range: {date} - {n} days")))
}

/// Returns current UTC seconds since epoch.
pub(crate) fn now_epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
