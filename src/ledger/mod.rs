//! Persistent chore ledger.
//!
//! Sub-modules:
//! - `types`: Record types, ids, roles, and date helpers.
//! - `schema`: SQLite DDL definitions.
//! - `store`: `LedgerStore`, provisioning, weekly reset, journal and run ledger.
//!
//! The rollover, assignment and aggregation engines extend `LedgerStore`
//! from their own top-level modules.

pub(crate) mod schema;
pub mod store;
pub mod types;

pub use store::LedgerStore;
pub use types::{
    Chore, ChoreId, ChoreView, CURRENT_SCHEMA_VERSION, DATE_FORMAT, DailyChore, NewChore, NewUser,
    PointEvent, PointReason, Role, User, UserId, days_before, format_date, parse_date,
};
