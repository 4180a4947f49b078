//! Request-facing facade over the ledger.
//!
//! Takes ISO date strings the way a request layer receives them, and
//! materializes today's instances before touching today's data. Reads accept
//! any date; claims and completions only today's, since past days are closed.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;

use crate::aggregation::{DailyTotal, WeeklyTotal, WindowOrder};
use crate::assignment::ClaimOutcome;
use crate::clock::Clock;
use crate::error::{ChoreError, Result};
use crate::ledger::{ChoreId, ChoreView, LedgerStore, UserId, parse_date};

#[derive(Clone)]
pub struct ChoreService {
    store: Arc<LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl ChoreService {
    pub fn new(store: Arc<LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &Arc<LedgerStore> {
        &self.store
    }

    /// Materialize instances for `date`.
    pub fn ensure_today(&self, date: &str) -> Result<()> {
        self.store.ensure_today(parse_date(date)?)
    }

    /// Every chore as seen by `user` on `date`.
    pub fn chore_view(&self, user: UserId, date: &str) -> Result<Vec<ChoreView>> {
        let date = self.resolve(date)?;
        self.store.chores_for_user_on_date(user, date)
    }

    pub fn claim(&self, user: UserId, chore: ChoreId, date: &str) -> Result<ClaimOutcome> {
        let date = self.resolve_writable(date)?;
        self.store.claim(user, chore, date)
    }

    /// Toggle completion and return the chore as `user` now sees it.
    pub fn set_completion(
        &self,
        user: UserId,
        chore: ChoreId,
        date: &str,
        completed: bool,
    ) -> Result<ChoreView> {
        let date = self.resolve_writable(date)?;
        let outcome = self.store.set_completion(user, chore, date, completed)?;
        debug!(user, chore, %date, ?outcome, "completion applied");

        self.store
            .chores_for_user_on_date(user, date)?
            .into_iter()
            .find(|v| v.chore_id == chore)
            .ok_or_else(|| ChoreError::NotFound(format!("chore {chore}")))
    }

    /// Points for the last `days` dates including today, most recent first.
    pub fn daily_points(&self, user: UserId, days: u32) -> Result<Vec<DailyTotal>> {
        self.daily_points_ordered(user, days, WindowOrder::MostRecentFirst)
    }

    pub fn daily_points_ordered(
        &self,
        user: UserId,
        days: u32,
        order: WindowOrder,
    ) -> Result<Vec<DailyTotal>> {
        let today = self.today()?;
        self.store.daily_points(user, today, days, order)
    }

    /// Points for the last `weeks` 7-day windows, `"Week 1"` first.
    pub fn weekly_points(&self, user: UserId, weeks: u32) -> Result<Vec<WeeklyTotal>> {
        self.weekly_points_ordered(user, weeks, WindowOrder::MostRecentFirst)
    }

    pub fn weekly_points_ordered(
        &self,
        user: UserId,
        weeks: u32,
        order: WindowOrder,
    ) -> Result<Vec<WeeklyTotal>> {
        let today = self.today()?;
        self.store.weekly_points(user, today, weeks, order)
    }

    fn today(&self) -> Result<NaiveDate> {
        let today = self.clock.today();
        self.store.ensure_today(today)?;
        Ok(today)
    }

    fn resolve_writable(&self, date: &str) -> Result<NaiveDate> {
        let date = parse_date(date)?;
        let today = self.clock.today();
        if date != today {
            return Err(ChoreError::Validation(format!(
                "chores for {date} can no longer be changed (today is {today})"
            )));
        }
        self.store.ensure_today(date)?;
        Ok(date)
    }

    fn resolve(&self, date: &str) -> Result<NaiveDate> {
        let date = parse_date(date)?;
        if date == self.clock.today() {
            self.store.ensure_today(date)?;
        }
        Ok(date)
    }
}
