//! Rollover engine: materializes a date's chore instances from chore defaults.

use chrono::NaiveDate;
use rusqlite::params;
use tracing::{debug, info};

use crate::error::Result;
use crate::ledger::{LedgerStore, format_date};

impl LedgerStore {
    /// Ensure every chore has an instance on `date`.
    ///
    /// Missing instances are created owned by the chore's default owner with
    /// `completed = false`. Existing instances are left untouched, so this is
    /// safe to call any number of times for the same date.
    pub fn ensure_today(&self, date: NaiveDate) -> Result<()> {
        let conn = self.lock()?;
        let day = format_date(date);
        let created = conn.execute(
            "INSERT OR IGNORE INTO daily_chores (user_id, chore_id, date, completed) \
             SELECT c.default_user_id, c.id, ?1, 0 FROM chores c \
             WHERE NOT EXISTS ( \
                 SELECT 1 FROM daily_chores dc WHERE dc.chore_id = c.id AND dc.date = ?1)",
            params![day],
        )?;

        if created > 0 {
            info!(date = %day, created, "rolled over chore instances");
        } else {
            debug!(date = %day, "rollover found every instance present");
        }
        Ok(())
    }
}
