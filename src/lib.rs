//! Chorekeeper: a household chore ledger.
//!
//! Tracks recurring chores, materializes one instance per chore per day,
//! lets family members claim and complete instances for points, and sends
//! daily and weekly summaries before zeroing balances each week.
//!
//! # Architecture
//!
//! - **Ledger store**: SQLite persistence for users, chores, daily instances,
//!   the points journal and the scheduler run ledger
//! - **Rollover**: idempotent per-day materialization of instances
//! - **Assignment**: claim and completion toggles, atomic with balance updates
//! - **Aggregation**: day and week point windows and the per-user chore view
//! - **Scheduler**: wall-clock timelines for rollover, summaries and reset
//! - **Notify**: pluggable delivery of composed summaries

pub mod aggregation;
pub mod assignment;
pub mod clock;
pub mod config;
pub mod error;
pub mod ledger;
pub mod notify;
pub mod rollover;
pub mod scheduler;
pub mod seed;
pub mod service;
pub mod summary;

pub use aggregation::{CompletedChore, DailyTotal, WeeklyTotal, WindowOrder};
pub use assignment::{ClaimOutcome, CompletionOutcome};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::ChoreConfig;
pub use error::{ChoreError, Result};
pub use ledger::LedgerStore;
pub use notify::{Notifier, RecordingNotifier};
pub use scheduler::{Scheduler, SchedulerHandle, Trigger};
pub use service::ChoreService;
pub use summary::SummaryMessage;
