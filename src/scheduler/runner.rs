//! Background trigger runner.
//!
//! Each trigger family runs on its own timeline task. A timeline sleeps until
//! the next absolute boundary, fires, then re-anchors on the boundary it just
//! served. A summary is composed first and only then claims its key in the
//! `scheduler_runs` ledger, so a storage failure leaves the boundary open for
//! a retry while a claimed boundary is never sent twice.

use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::{ScheduleConfig, SummaryConfig};
use crate::error::Result;
use crate::ledger::{LedgerStore, days_before};
use crate::notify::{DispatchReport, Notifier, dispatch_all};
use crate::scheduler::tasks::{Schedule, Trigger, parse_time_of_day, schedule_for};
use crate::summary::{SummaryMessage, compose_daily, compose_weekly};

/// What one fire did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Messages accepted by the notifier.
    pub sent: usize,
    /// Messages the notifier rejected.
    pub failed: usize,
    /// Messages without a recipient address.
    pub skipped: usize,
    /// The boundary had already been served; nothing was sent.
    pub already_ran: bool,
    /// The weekly reset zeroed balances during this fire.
    pub reset_applied: bool,
}

impl CycleReport {
    fn already_ran() -> Self {
        Self {
            already_ran: true,
            ..Self::default()
        }
    }

    fn from_dispatch(report: DispatchReport) -> Self {
        Self {
            sent: report.sent,
            failed: report.failed,
            skipped: report.skipped,
            ..Self::default()
        }
    }

    fn merge(&mut self, other: Self) {
        self.sent += other.sent;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.reset_applied |= other.reset_applied;
    }
}

/// Drives rollover, daily summary and weekly summary plus reset.
pub struct Scheduler {
    store: Arc<LedgerStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    schedule: ScheduleConfig,
    summary: SummaryConfig,
}

/// Join handles for the spawned timelines.
pub struct SchedulerHandle {
    handles: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Wait for every timeline to stop.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("scheduler timeline ended abnormally: {e}");
            }
        }
    }
}

impl Scheduler {
    pub fn new(
        store: Arc<LedgerStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        schedule: ScheduleConfig,
        summary: SummaryConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            schedule,
            summary,
        }
    }

    /// Materialize today's instances, then spawn one timeline per trigger
    /// family. Every timeline stops once `cancel` fires.
    pub fn run(self, cancel: CancellationToken) -> Result<SchedulerHandle> {
        let timelines = [
            (Trigger::Rollover, schedule_for(Trigger::Rollover, &self.schedule)?),
            (
                Trigger::DailySummary,
                schedule_for(Trigger::DailySummary, &self.schedule)?,
            ),
            (
                Trigger::WeeklySummary,
                schedule_for(Trigger::WeeklySummary, &self.schedule)?,
            ),
        ];

        let today = self.clock.today();
        if let Err(e) = self.run_rollover(today) {
            error!(%today, "startup rollover failed: {e}");
        }

        let this = Arc::new(self);
        let handles = timelines
            .into_iter()
            .map(|(trigger, schedule)| {
                let this = Arc::clone(&this);
                let cancel = cancel.clone();
                tokio::spawn(async move { this.timeline(trigger, schedule, cancel).await })
            })
            .collect();

        info!(notifier = this.notifier.id(), "scheduler started");
        Ok(SchedulerHandle { handles })
    }

    async fn timeline(&self, trigger: Trigger, schedule: Schedule, cancel: CancellationToken) {
        debug!(%trigger, %schedule, "timeline started");
        let mut anchor = self.clock.now();
        loop {
            let next = schedule.next_after(anchor);
            let wait = (next - self.clock.now()).to_std().unwrap_or_default();
            debug!(%trigger, %next, "sleeping until next boundary");

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(%trigger, "timeline stopped");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            match self.fire(trigger, next.date()).await {
                Ok(report) => info!(%trigger, date = %next.date(), ?report, "trigger fired"),
                Err(e) => error!(%trigger, date = %next.date(), "trigger failed: {e}"),
            }
            anchor = next.max(self.clock.now());
        }
    }

    /// Fire `trigger` for the boundary falling on `date`.
    ///
    /// A daily summary that shares its exact boundary with the weekly cycle
    /// is left to that cycle, which sends it before resetting.
    pub async fn fire(&self, trigger: Trigger, date: NaiveDate) -> Result<CycleReport> {
        match trigger {
            Trigger::Rollover => self.run_rollover(date),
            Trigger::DailySummary if self.weekly_cycle_covers_daily(date)? => {
                debug!(%date, "daily summary deferred to the weekly cycle");
                Ok(CycleReport::default())
            }
            Trigger::DailySummary => self.run_daily_summary(date).await,
            Trigger::WeeklySummary | Trigger::WeeklyReset => self.run_weekly_cycle(date).await,
        }
    }

    /// Materialize instances for `date`.
    pub fn run_rollover(&self, date: NaiveDate) -> Result<CycleReport> {
        self.store.ensure_today(date)?;
        Ok(CycleReport::default())
    }

    /// Compose and dispatch the daily recap for `date`, unless already sent.
    pub async fn run_daily_summary(&self, date: NaiveDate) -> Result<CycleReport> {
        self.run_keyed(Trigger::DailySummary, date).await
    }

    /// Compose and dispatch the 7-day recap ending on `date`, unless already
    /// sent. Balances are left alone.
    pub async fn run_weekly_summary(&self, date: NaiveDate) -> Result<CycleReport> {
        let report = self.run_keyed(Trigger::WeeklySummary, date).await?;
        if report.failed > 0 {
            warn!(failed = report.failed, "some weekly summaries were not delivered");
        }
        Ok(report)
    }

    /// Compose and dispatch a summary outside the schedule. The run ledger is
    /// neither consulted nor written, so the scheduled send still happens.
    pub async fn send_summary_now(&self, trigger: Trigger, date: NaiveDate) -> Result<CycleReport> {
        let messages = self.compose(trigger, date)?;
        let report = dispatch_all(self.notifier.as_ref(), &messages).await;
        Ok(CycleReport::from_dispatch(report))
    }

    async fn run_keyed(&self, trigger: Trigger, date: NaiveDate) -> Result<CycleReport> {
        let key = trigger.run_key(date);
        if self.store.has_run(&key)? {
            debug!(%key, "summary already sent");
            return Ok(CycleReport::already_ran());
        }

        let messages = self.compose(trigger, date)?;
        if !self.store.record_run_once(&key)? {
            debug!(%key, "summary claimed concurrently");
            return Ok(CycleReport::already_ran());
        }
        let report = dispatch_all(self.notifier.as_ref(), &messages).await;
        Ok(CycleReport::from_dispatch(report))
    }

    fn compose(&self, trigger: Trigger, date: NaiveDate) -> Result<Vec<SummaryMessage>> {
        let users = self.store.users()?;
        match trigger {
            Trigger::WeeklySummary | Trigger::WeeklyReset => {
                let start = days_before(date, 6)?;
                let completions = self.store.completed_between(start, date)?;
                Ok(compose_weekly(&users, &completions, start, date, &self.summary))
            }
            Trigger::DailySummary | Trigger::Rollover => {
                let completions = self.store.completed_between(date, date)?;
                Ok(compose_daily(&users, &completions, date, &self.summary))
            }
        }
    }

    /// The weekly cycle for the boundary on `date`: the 7-day recap, then the
    /// points reset.
    ///
    /// When the daily summary is due at or before the weekly boundary it is
    /// flushed first, so it still reports pre-reset balances.
    pub async fn run_weekly_cycle(&self, date: NaiveDate) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        if self.daily_precedes_weekly()? {
            report.merge(self.run_daily_summary(date).await?);
        }

        let weekly = self.run_weekly_summary(date).await?;
        report.already_ran = weekly.already_ran;
        report.merge(weekly);

        let reset_key = Trigger::WeeklyReset.run_key(date);
        report.reset_applied = self.store.reset_all_points(Some(&reset_key))?;
        if report.reset_applied {
            info!(%date, "weekly points reset applied");
        }
        Ok(report)
    }

    fn weekly_cycle_covers_daily(&self, date: NaiveDate) -> Result<bool> {
        let daily = parse_time_of_day(&self.schedule.daily_summary_at)?;
        let weekly = parse_time_of_day(&self.schedule.weekly_summary_at)?;
        Ok(daily == weekly && date.weekday() == self.schedule.weekly_summary_day.to_chrono())
    }

    fn daily_precedes_weekly(&self) -> Result<bool> {
        let daily = parse_time_of_day(&self.schedule.daily_summary_at)?;
        let weekly = parse_time_of_day(&self.schedule.weekly_summary_at)?;
        Ok(daily <= weekly)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use std::time::Duration;

    use super::*;
    use crate::clock::FixedClock;
    use crate::ledger::{NewChore, NewUser, Role, parse_date};
    use crate::notify::RecordingNotifier;

    struct Harness {
        store: Arc<LedgerStore>,
        notifier: Arc<RecordingNotifier>,
        scheduler: Scheduler,
        max: i64,
        walk: i64,
    }

    fn harness(now: &str, notifier: RecordingNotifier) -> Harness {
        let store = Arc::new(LedgerStore::open_in_memory().unwrap());
        store
            .create_user(&NewUser {
                username: "Bolte".to_owned(),
                credential_hash: String::new(),
                email: "bolte@example.org".to_owned(),
                role: Role::Parent,
            })
            .unwrap();
        let max = store
            .create_user(&NewUser {
                username: "Max".to_owned(),
                credential_hash: String::new(),
                email: "max@example.org".to_owned(),
                role: Role::Child,
            })
            .unwrap()
            .id;
        let walk = store
            .create_chore(&NewChore {
                name: "walk dog morning".to_owned(),
                points: 5,
                default_user_id: Some(max),
            })
            .unwrap()
            .id;

        let clock = Arc::new(FixedClock::new(
            chrono::NaiveDateTime::parse_from_str(now, "%Y-%m-%d %H:%M").unwrap(),
        ));
        let notifier = Arc::new(notifier);
        let scheduler = Scheduler::new(
            Arc::clone(&store),
            notifier.clone(),
            clock,
            ScheduleConfig::default(),
            SummaryConfig::default(),
        );
        Harness {
            store,
            notifier,
            scheduler,
            max,
            walk,
        }
    }

    #[tokio::test]
    async fn daily_summary_is_sent_once_per_date() {
        let h = harness("2024-01-03 23:59", RecordingNotifier::new());
        let date = parse_date("2024-01-03").unwrap();
        h.scheduler.run_rollover(date).unwrap();
        h.store.set_completion(h.max, h.walk, date, true).unwrap();

        let first = h.scheduler.run_daily_summary(date).await.unwrap();
        assert_eq!(first.sent, 2);
        assert!(!first.already_ran);

        let second = h.scheduler.run_daily_summary(date).await.unwrap();
        assert!(second.already_ran);
        assert_eq!(h.notifier.sent().len(), 2);

        let max_msg = h
            .notifier
            .sent()
            .into_iter()
            .find(|m| m.to == "max@example.org")
            .unwrap();
        assert!(max_msg.body.contains("walk dog morning (5 points)"));
    }

    #[tokio::test]
    async fn weekly_cycle_sends_then_resets() {
        let h = harness("2024-01-07 23:59", RecordingNotifier::new());
        let sunday = parse_date("2024-01-07").unwrap();
        let tuesday = parse_date("2024-01-02").unwrap();
        h.store.ensure_today(tuesday).unwrap();
        h.store.set_completion(h.max, h.walk, tuesday, true).unwrap();

        let report = h.scheduler.run_weekly_cycle(sunday).await.unwrap();
        assert!(report.reset_applied);
        // Daily recap (2 users) flushed first, then the weekly recap (2 users).
        assert_eq!(report.sent, 4);

        let weekly = h
            .notifier
            .sent()
            .into_iter()
            .find(|m| m.to == "max@example.org" && m.subject.starts_with("Weekly"))
            .unwrap();
        assert!(weekly.body.contains("2024-01-02:"));
        assert!(weekly.body.contains("Total allowance earned this week: $0.50"));
        assert_eq!(h.store.user(h.max).unwrap().points, 0);

        // Completion flags survive the reset.
        assert!(h.store.instance(h.walk, tuesday).unwrap().unwrap().completed);
    }

    #[tokio::test]
    async fn weekly_cycle_is_idempotent() {
        let h = harness("2024-01-07 23:59", RecordingNotifier::new());
        let sunday = parse_date("2024-01-07").unwrap();
        h.scheduler.run_weekly_cycle(sunday).await.unwrap();
        let again = h.scheduler.run_weekly_cycle(sunday).await.unwrap();
        assert!(again.already_ran);
        assert!(!again.reset_applied);
        assert_eq!(again.sent, 0);
    }

    #[tokio::test]
    async fn delivery_failure_does_not_block_reset() {
        let h = harness(
            "2024-01-07 23:59",
            RecordingNotifier::failing_for(["max@example.org"]),
        );
        let sunday = parse_date("2024-01-07").unwrap();
        let report = h.scheduler.run_weekly_cycle(sunday).await.unwrap();
        assert_eq!(report.failed, 2);
        assert!(report.reset_applied);
    }

    #[tokio::test]
    async fn run_materializes_today_and_stops_on_cancel() {
        let h = harness("2024-01-03 12:00", RecordingNotifier::new());
        let cancel = CancellationToken::new();
        let handle = h.scheduler.run(cancel.clone()).unwrap();

        let today = parse_date("2024-01-03").unwrap();
        assert!(h.store.instance(h.walk, today).unwrap().is_some());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .expect("timelines stop after cancel");
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn coinciding_daily_boundary_is_left_to_weekly_cycle() {
        let h = harness("2024-01-07 23:59", RecordingNotifier::new());
        let sunday = parse_date("2024-01-07").unwrap();
        let monday = parse_date("2024-01-08").unwrap();

        let deferred = h.scheduler.fire(Trigger::DailySummary, sunday).await.unwrap();
        assert_eq!(deferred, CycleReport::default());
        assert!(h.notifier.sent().is_empty());

        let normal = h.scheduler.fire(Trigger::DailySummary, monday).await.unwrap();
        assert_eq!(normal.sent, 2);
    }

    fn rename_table(store: &LedgerStore, from: &str, to: &str) {
        store
            .lock()
            .unwrap()
            .execute_batch(&format!("ALTER TABLE {from} RENAME TO {to}"))
            .unwrap();
    }

    #[tokio::test]
    async fn storage_failure_leaves_summary_retryable() {
        let h = harness("2024-01-03 23:59", RecordingNotifier::new());
        let date = parse_date("2024-01-03").unwrap();

        rename_table(&h.store, "daily_chores", "daily_chores_offline");
        assert!(h.scheduler.run_daily_summary(date).await.is_err());
        assert!(!h.store.has_run(&Trigger::DailySummary.run_key(date)).unwrap());
        rename_table(&h.store, "daily_chores_offline", "daily_chores");

        let retry = h.scheduler.run_daily_summary(date).await.unwrap();
        assert!(!retry.already_ran);
        assert_eq!(retry.sent, 2);
    }

    #[tokio::test]
    async fn manual_send_leaves_scheduled_send_intact() {
        let h = harness("2024-01-03 12:00", RecordingNotifier::new());
        let date = parse_date("2024-01-03").unwrap();

        let manual = h
            .scheduler
            .send_summary_now(Trigger::DailySummary, date)
            .await
            .unwrap();
        assert_eq!(manual.sent, 2);
        assert!(!h.store.has_run(&Trigger::DailySummary.run_key(date)).unwrap());

        let scheduled = h.scheduler.run_daily_summary(date).await.unwrap();
        assert_eq!(scheduled.sent, 2);
        assert_eq!(h.notifier.sent().len(), 4);
    }

    /// Follows tokio's clock, which tests pause and auto-advance.
    struct TokioClock {
        base: chrono::NaiveDateTime,
        start: tokio::time::Instant,
    }

    impl Clock for TokioClock {
        fn now(&self) -> chrono::NaiveDateTime {
            let elapsed = chrono::TimeDelta::from_std(self.start.elapsed()).unwrap();
            self.base + elapsed
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timelines_fire_once_per_boundary() {
        let h = harness("2024-01-01 12:00", RecordingNotifier::new());
        let clock = Arc::new(TokioClock {
            base: chrono::NaiveDateTime::parse_from_str("2024-01-01 12:00", "%Y-%m-%d %H:%M")
                .unwrap(),
            start: tokio::time::Instant::now(),
        });
        let scheduler = Scheduler::new(
            Arc::clone(&h.store),
            h.notifier.clone(),
            clock,
            ScheduleConfig::default(),
            SummaryConfig::default(),
        );
        let cancel = CancellationToken::new();
        let handle = scheduler.run(cancel.clone()).unwrap();

        // Through 2024-01-03 13:00: daily boundaries on the 1st and 2nd at
        // 23:59, rollovers at midnight on the 2nd and 3rd.
        tokio::time::sleep(Duration::from_secs(2 * 86_400 + 3_600)).await;

        for day in ["2024-01-01", "2024-01-02"] {
            let key = Trigger::DailySummary.run_key(parse_date(day).unwrap());
            assert!(h.store.has_run(&key).unwrap(), "{key} missing");
        }
        let third = Trigger::DailySummary.run_key(parse_date("2024-01-03").unwrap());
        assert!(!h.store.has_run(&third).unwrap());
        assert!(h
            .store
            .instance(h.walk, parse_date("2024-01-03").unwrap())
            .unwrap()
            .is_some());
        assert_eq!(h.notifier.sent().len(), 4);

        cancel.cancel();
        handle.join().await;
    }
}
