//! Aggregation engine: point totals over day and week windows, and the
//! per-request chore view.
//!
//! A completed instance is attributed to `COALESCE(completed_by, user_id)`,
//! i.e. the acting user who was credited, falling back to the owner for
//! rows written before attribution was tracked. Windows with no data
//! always produce `0`.

use std::collections::HashMap;

use chrono::NaiveDate;
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ledger::store::{date_column, require_user};
use crate::ledger::{ChoreId, ChoreView, LedgerStore, UserId, days_before, format_date};

/// Orientation of a returned window series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowOrder {
    /// Today (or the current week) first.
    #[default]
    MostRecentFirst,
    /// Chart-series orientation: oldest window first.
    OldestFirst,
}

/// Points earned on one calendar date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyTotal {
    pub date: NaiveDate,
    pub points: i64,
}

/// Points earned over one 7-day window ending on `end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyTotal {
    /// Ordinal label, `"Week 1"` being the most recent.
    pub label: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub points: i64,
}

/// A completed instance with the user it is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedChore {
    pub user_id: UserId,
    pub chore_id: ChoreId,
    pub chore_name: String,
    pub points: i64,
    pub date: NaiveDate,
}

impl LedgerStore {
    /// Points attributed to `user` on each of the `days` dates ending at `today`.
    pub fn daily_points(
        &self,
        user: UserId,
        today: NaiveDate,
        days: u32,
        order: WindowOrder,
    ) -> Result<Vec<DailyTotal>> {
        if days == 0 {
            return Ok(Vec::new());
        }
        let start = days_before(today, u64::from(days) - 1)?;
        let by_date = self.points_by_date(user, start, today)?;

        let mut totals = Vec::with_capacity(days as usize);
        for i in 0..u64::from(days) {
            let date = days_before(today, i)?;
            let points = by_date.get(&date).copied().unwrap_or(0);
            totals.push(DailyTotal { date, points });
        }
        if order == WindowOrder::OldestFirst {
            totals.reverse();
        }
        Ok(totals)
    }

    /// Points attributed to `user` over `weeks` contiguous 7-day windows, the
    /// first ending at `today`.
    pub fn weekly_points(
        &self,
        user: UserId,
        today: NaiveDate,
        weeks: u32,
        order: WindowOrder,
    ) -> Result<Vec<WeeklyTotal>> {
        if weeks == 0 {
            return Ok(Vec::new());
        }
        let earliest = days_before(today, u64::from(weeks) * 7 - 1)?;
        let by_date = self.points_by_date(user, earliest, today)?;

        let mut totals = Vec::with_capacity(weeks as usize);
        for i in 0..u64::from(weeks) {
            let end = days_before(today, i * 7)?;
            let start = days_before(end, 6)?;
            let points = by_date
                .iter()
                .filter(|(date, _)| **date >= start && **date <= end)
                .map(|(_, p)| *p)
                .sum();
            totals.push(WeeklyTotal {
                label: format!("Week {}", i + 1),
                start,
                end,
                points,
            });
        }
        if order == WindowOrder::OldestFirst {
            totals.reverse();
        }
        Ok(totals)
    }

    /// Total points attributed to `user` between `start` and `end` inclusive.
    pub fn points_between(&self, user: UserId, start: NaiveDate, end: NaiveDate) -> Result<i64> {
        Ok(self.points_by_date(user, start, end)?.values().sum())
    }

    /// Every chore as seen by `user` on `date`.
    ///
    /// Chores without an instance are reported with `instance_exists = false`
    /// and no owner. An entry is claimable whenever it is not completed.
    pub fn chores_for_user_on_date(&self, user: UserId, date: NaiveDate) -> Result<Vec<ChoreView>> {
        let conn = self.lock()?;
        require_user(&conn, user)?;

        let mut stmt = conn.prepare(
            "SELECT c.id, c.name, c.points, dc.id, COALESCE(dc.completed, 0), dc.user_id \
             FROM chores c \
             LEFT JOIN daily_chores dc ON dc.chore_id = c.id AND dc.date = ?1 \
             ORDER BY c.id",
        )?;
        let rows = stmt.query_map(params![format_date(date)], |row| {
            let instance_id: Option<i64> = row.get(3)?;
            let completed: bool = row.get(4)?;
            let owner_id: Option<UserId> = row.get(5)?;
            Ok(ChoreView {
                chore_id: row.get(0)?,
                name: row.get(1)?,
                points: row.get(2)?,
                date,
                instance_exists: instance_id.is_some(),
                completed,
                owner_id,
                is_assigned: owner_id == Some(user),
                is_claimable: !completed,
            })
        })?;

        let mut views = Vec::new();
        for r in rows {
            views.push(r?);
        }
        Ok(views)
    }

    /// Every completed instance dated between `start` and `end` inclusive,
    /// ordered by date then chore name.
    pub fn completed_between(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<CompletedChore>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT COALESCE(dc.completed_by, dc.user_id), c.id, c.name, c.points, dc.date \
             FROM daily_chores dc JOIN chores c ON c.id = dc.chore_id \
             WHERE dc.completed = 1 AND dc.date BETWEEN ?1 AND ?2 \
               AND COALESCE(dc.completed_by, dc.user_id) IS NOT NULL \
             ORDER BY dc.date, c.name",
        )?;
        let rows = stmt.query_map(params![format_date(start), format_date(end)], |row| {
            Ok(CompletedChore {
                user_id: row.get(0)?,
                chore_id: row.get(1)?,
                chore_name: row.get(2)?,
                points: row.get(3)?,
                date: date_column(row, 4)?,
            })
        })?;

        let mut completed = Vec::new();
        for r in rows {
            completed.push(r?);
        }
        Ok(completed)
    }

    fn points_by_date(
        &self,
        user: UserId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<HashMap<NaiveDate, i64>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT dc.date, SUM(c.points) \
             FROM daily_chores dc JOIN chores c ON c.id = dc.chore_id \
             WHERE dc.completed = 1 \
               AND COALESCE(dc.completed_by, dc.user_id) = ?1 \
               AND dc.date BETWEEN ?2 AND ?3 \
             GROUP BY dc.date",
        )?;
        let rows = stmt.query_map(params![user, format_date(start), format_date(end)], |row| {
            Ok((date_column(row, 0)?, row.get::<_, i64>(1)?))
        })?;

        let mut by_date = HashMap::new();
        for r in rows {
            let (date, points) = r?;
            by_date.insert(date, points);
        }
        Ok(by_date)
    }
}
