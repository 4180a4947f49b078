//! Assignment state machine: claim, complete and uncomplete.
//!
//! Each daily instance moves `Unassigned/DefaultOwner → Claimed(X) →
//! Completed`, with reclaim and uncomplete allowed until the date rolls
//! over. A completion toggle is the only legitimate trigger for a balance
//! change, and the delta always lands on the *acting* user, who may differ
//! from the instance's recorded owner.

use chrono::NaiveDate;
use rusqlite::{TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ChoreError, Result};
use crate::ledger::store::{
    insert_point_event, require_chore, require_user, select_instance, settled_by_reset,
};
use crate::ledger::types::now_epoch_secs;
use crate::ledger::{ChoreId, LedgerStore, PointReason, UserId, format_date};

/// Result of a successful claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimOutcome {
    /// Ownership moved to the requesting user (instance created if absent).
    Claimed,
    /// The requesting user already owned the instance.
    AlreadyOwner,
}

/// Result of a completion toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "points")]
pub enum CompletionOutcome {
    /// false → true; the acting user gained this many points.
    Credited(i64),
    /// true → false; the acting user lost this many points.
    Debited(i64),
    /// The flag already had the requested value. Nothing changed.
    Unchanged,
}

impl LedgerStore {
    /// Make `user` the owner of `chore` on `date`.
    ///
    /// Creates the instance if the date has not been rolled over yet. Fails
    /// with [`ChoreError::Conflict`] when another user already completed it;
    /// state is unchanged in that case. Never touches balances.
    pub fn claim(&self, user: UserId, chore: ChoreId, date: NaiveDate) -> Result<ClaimOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        require_user(&tx, user)?;
        let chore = require_chore(&tx, chore)?;

        match select_instance(&tx, chore.id, date)? {
            Some(inst) if inst.user_id == Some(user) => {
                debug!(user, chore = chore.id, %date, "claim by current owner is a no-op");
                return Ok(ClaimOutcome::AlreadyOwner);
            }
            Some(inst) if inst.completed => {
                return Err(ChoreError::Conflict(format!(
                    "'{}' on {date} is already completed",
                    chore.name
                )));
            }
            _ => {}
        }

        let changed = tx.execute(
            "INSERT INTO daily_chores (user_id, chore_id, date, completed) \
             VALUES (?1, ?2, ?3, 0) \
             ON CONFLICT (chore_id, date) DO UPDATE SET user_id = excluded.user_id \
             WHERE daily_chores.completed = 0",
            params![user, chore.id, format_date(date)],
        )?;
        if changed == 0 {
            return Err(ChoreError::Conflict(format!(
                "'{}' on {date} was completed before the claim landed",
                chore.name
            )));
        }
        tx.commit()?;

        info!(user, chore = chore.id, %date, "chore claimed");
        Ok(ClaimOutcome::Claimed)
    }

    /// Set the completion flag of `chore` on `date`, crediting or debiting
    /// the acting `user`.
    ///
    /// The stored flag is read first, so repeating a call is a no-op. The
    /// flag flip, the balance change and the journal row commit together or
    /// not at all. Debits are clamped so a balance never drops below zero.
    /// A completion whose credit was already zeroed by a points reset cannot
    /// be undone ([`ChoreError::Validation`]).
    pub fn set_completion(
        &self,
        user: UserId,
        chore: ChoreId,
        date: NaiveDate,
        completed: bool,
    ) -> Result<CompletionOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let acting = require_user(&tx, user)?;
        let chore = require_chore(&tx, chore)?;
        let inst = select_instance(&tx, chore.id, date)?.ok_or_else(|| {
            ChoreError::NotFound(format!("no instance of '{}' on {date}", chore.name))
        })?;

        if inst.completed == completed {
            debug!(user, chore = chore.id, %date, completed, "completion unchanged");
            return Ok(CompletionOutcome::Unchanged);
        }

        if !completed && settled_by_reset(&tx, chore.id, date)? {
            return Err(ChoreError::Validation(format!(
                "'{}' on {date} was settled by a points reset and cannot be undone",
                chore.name
            )));
        }

        let (delta, reason, outcome) = if completed {
            (chore.points, PointReason::Credit, CompletionOutcome::Credited(chore.points))
        } else {
            let applied = chore.points.min(acting.points.max(0));
            (-applied, PointReason::Debit, CompletionOutcome::Debited(applied))
        };

        tx.execute(
            "UPDATE daily_chores SET completed = ?1, completed_by = ?2 WHERE id = ?3",
            params![completed, completed.then_some(user), inst.id],
        )?;
        tx.execute(
            "UPDATE users SET points = points + ?1 WHERE id = ?2",
            params![delta, user],
        )?;
        insert_point_event(
            &tx,
            user,
            Some(chore.id),
            Some(date),
            delta,
            reason,
            now_epoch_secs(),
        )?;
        tx.commit()?;

        info!(user, chore = chore.id, %date, completed, delta, "completion recorded");
        Ok(outcome)
    }
}
