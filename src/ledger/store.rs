//! SQLite-backed ledger store.
//!
//! Owns durability, uniqueness constraints and the connection mutex. The
//! rollover, assignment and aggregation engines add their operations to
//! [`LedgerStore`] from their own modules.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracing::{debug, info};

use super::schema::{apply_schema, drop_schema, read_schema_version};
use super::types::{
    Chore, ChoreId, DailyChore, NewChore, NewUser, PointEvent, PointReason, Role, User, UserId,
    format_date, now_epoch_secs,
};
use crate::error::{ChoreError, Result};

pub(crate) const USER_COLUMNS: &str = "id, username, credential_hash, email, role, points";
pub(crate) const CHORE_COLUMNS: &str = "id, name, points, default_user_id";
pub(crate) const DAILY_COLUMNS: &str = "id, user_id, chore_id, date, completed, completed_by";

/// SQLite-backed chore ledger.
///
/// Thread-safe via an internal `Mutex<Connection>`. Every read-modify-write
/// sequence runs under the mutex inside an immediate transaction, so writers
/// in other processes sharing the file are serialized as well.
pub struct LedgerStore {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl LedgerStore {
    /// Open (or create) the ledger database at `path`.
    ///
    /// Creates the parent directory and applies the schema if needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        apply_schema(&conn)?;
        info!("ledger store opened at {}", path.display());
        Ok(Self {
            path: Some(path.to_path_buf()),
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory ledger.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            path: None,
            conn: Mutex::new(conn),
        })
    }

    /// Database file path, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read the current schema version from the database.
    pub fn schema_version(&self) -> Result<Option<u32>> {
        let conn = self.lock()?;
        Ok(read_schema_version(&conn)?)
    }

    /// Drop and recreate every table. Destroys all ledger data.
    pub fn reset_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        drop_schema(&conn)?;
        apply_schema(&conn)?;
        info!("ledger schema reset");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Provisioning
    // -----------------------------------------------------------------------

    /// Insert a new user with a zero balance.
    pub fn create_user(&self, new: &NewUser) -> Result<User> {
        let username = new.username.trim();
        let email = new.email.trim();
        if username.is_empty() {
            return Err(ChoreError::Validation("username must not be empty".to_owned()));
        }
        if email.is_empty() {
            return Err(ChoreError::Validation(format!(
                "email must not be empty for user '{username}'"
            )));
        }

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO users (username, credential_hash, email, role, points) \
             VALUES (?1, ?2, ?3, ?4, 0)",
            params![username, new.credential_hash, email, new.role.as_str()],
        )?;
        let id = conn.last_insert_rowid();
        debug!(user_id = id, %username, "user created");

        Ok(User {
            id,
            username: username.to_owned(),
            credential_hash: new.credential_hash.clone(),
            email: email.to_owned(),
            role: new.role,
            points: 0,
        })
    }

    /// Insert a new chore definition.
    pub fn create_chore(&self, new: &NewChore) -> Result<Chore> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(ChoreError::Validation("chore name must not be empty".to_owned()));
        }
        if new.points <= 0 {
            return Err(ChoreError::Validation(format!(
                "chore '{name}' must be worth a positive number of points, got {}",
                new.points
            )));
        }

        let conn = self.lock()?;
        if let Some(owner) = new.default_user_id {
            require_user(&conn, owner)?;
        }
        conn.execute(
            "INSERT INTO chores (name, points, default_user_id) VALUES (?1, ?2, ?3)",
            params![name, new.points, new.default_user_id],
        )?;
        let id = conn.last_insert_rowid();
        debug!(chore_id = id, %name, "chore created");

        Ok(Chore {
            id,
            name: name.to_owned(),
            points: new.points,
            default_user_id: new.default_user_id,
        })
    }

    /// Fetch a user by id.
    pub fn user(&self, id: UserId) -> Result<User> {
        let conn = self.lock()?;
        require_user(&conn, id)
    }

    /// Fetch a user by username, `None` when absent.
    pub fn user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.lock()?;
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                params![username],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// All users ordered by id.
    pub fn users(&self) -> Result<Vec<User>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))?;
        let rows = stmt.query_map([], row_to_user)?;
        let mut users = Vec::new();
        for r in rows {
            users.push(r?);
        }
        Ok(users)
    }

    /// Fetch a chore by id.
    pub fn chore(&self, id: ChoreId) -> Result<Chore> {
        let conn = self.lock()?;
        require_chore(&conn, id)
    }

    /// Fetch a chore by its unique name, `None` when absent.
    pub fn chore_by_name(&self, name: &str) -> Result<Option<Chore>> {
        let conn = self.lock()?;
        let chore = conn
            .query_row(
                &format!("SELECT {CHORE_COLUMNS} FROM chores WHERE name = ?1"),
                params![name],
                row_to_chore,
            )
            .optional()?;
        Ok(chore)
    }

    /// All chores ordered by id.
    pub fn chores(&self) -> Result<Vec<Chore>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT {CHORE_COLUMNS} FROM chores ORDER BY id"))?;
        let rows = stmt.query_map([], row_to_chore)?;
        let mut chores = Vec::new();
        for r in rows {
            chores.push(r?);
        }
        Ok(chores)
    }

    /// The instance of `chore` on `date`, if materialized.
    pub fn instance(&self, chore: ChoreId, date: NaiveDate) -> Result<Option<DailyChore>> {
        let conn = self.lock()?;
        Ok(select_instance(&conn, chore, date)?)
    }

    /// Every instance materialized for `date`, ordered by chore id.
    pub fn instances_on(&self, date: NaiveDate) -> Result<Vec<DailyChore>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DAILY_COLUMNS} FROM daily_chores WHERE date = ?1 ORDER BY chore_id"
        ))?;
        let rows = stmt.query_map(params![format_date(date)], row_to_daily)?;
        let mut instances = Vec::new();
        for r in rows {
            instances.push(r?);
        }
        Ok(instances)
    }

    // -----------------------------------------------------------------------
    // Weekly reset and points journal
    // -----------------------------------------------------------------------

    /// Set every user's balance to zero.
    ///
    /// With a `run_key`, the reset is recorded in `scheduler_runs` inside the
    /// same transaction and skipped (returning `false`) if the key was already
    /// recorded. Instances and completion flags are never touched.
    pub fn reset_all_points(&self, run_key: Option<&str>) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = now_epoch_secs();

        if let Some(key) = run_key {
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO scheduler_runs (run_key, recorded_at) VALUES (?1, ?2)",
                params![key, now],
            )?;
            if inserted == 0 {
                debug!("points reset '{key}' already applied, skipping");
                return Ok(false);
            }
        }

        let balances: Vec<(UserId, i64)> = {
            let mut stmt = tx.prepare("SELECT id, points FROM users ORDER BY id")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            out
        };

        for (user_id, points) in &balances {
            insert_point_event(&tx, *user_id, None, None, -points, PointReason::Reset, now)?;
        }
        tx.execute("UPDATE users SET points = 0", [])?;
        tx.commit()?;

        info!(users = balances.len(), "point balances reset");
        Ok(true)
    }

    /// Journal rows for `user`, oldest first.
    pub fn point_events(&self, user: UserId) -> Result<Vec<PointEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, chore_id, date, delta, reason, at \
             FROM point_events WHERE user_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![user], row_to_point_event)?;
        let mut events = Vec::new();
        for r in rows {
            events.push(r?);
        }
        Ok(events)
    }

    /// Balance implied by the journal: the sum of deltas since the user's
    /// most recent reset. Equals `User::points` whenever the ledger is sound.
    pub fn balance_from_journal(&self, user: UserId) -> Result<i64> {
        let conn = self.lock()?;
        let balance = conn.query_row(
            "SELECT COALESCE(SUM(delta), 0) FROM point_events \
             WHERE user_id = ?1 AND id > COALESCE( \
                 (SELECT MAX(id) FROM point_events WHERE user_id = ?1 AND reason = 'reset'), 0)",
            params![user],
            |row| row.get(0),
        )?;
        Ok(balance)
    }

    // -----------------------------------------------------------------------
    // Scheduler run ledger
    // -----------------------------------------------------------------------

    /// Record a run key once. Returns `true` when newly inserted.
    pub fn record_run_once(&self, run_key: &str) -> Result<bool> {
        let trimmed = run_key.trim();
        if trimmed.is_empty() {
            return Err(ChoreError::Scheduler("run key must not be empty".to_owned()));
        }
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO scheduler_runs (run_key, recorded_at) VALUES (?1, ?2)",
            params![trimmed, now_epoch_secs()],
        )?;
        Ok(inserted > 0)
    }

    /// Whether `run_key` has already been recorded.
    pub fn has_run(&self, run_key: &str) -> Result<bool> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM scheduler_runs WHERE run_key = ?1",
                params![run_key.trim()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    /// Acquire the connection mutex.
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ChoreError::Lock(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Shared query helpers (usable inside a transaction)
// ---------------------------------------------------------------------------

pub(crate) fn require_user(conn: &Connection, id: UserId) -> Result<User> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        params![id],
        row_to_user,
    )
    .optional()?
    .ok_or_else(|| ChoreError::NotFound(format!("user {id}")))
}

pub(crate) fn require_chore(conn: &Connection, id: ChoreId) -> Result<Chore> {
    conn.query_row(
        &format!("SELECT {CHORE_COLUMNS} FROM chores WHERE id = ?1"),
        params![id],
        row_to_chore,
    )
    .optional()?
    .ok_or_else(|| ChoreError::NotFound(format!("chore {id}")))
}

pub(crate) fn select_instance(
    conn: &Connection,
    chore: ChoreId,
    date: NaiveDate,
) -> rusqlite::Result<Option<DailyChore>> {
    conn.query_row(
        &format!("SELECT {DAILY_COLUMNS} FROM daily_chores WHERE chore_id = ?1 AND date = ?2"),
        params![chore, format_date(date)],
        row_to_daily,
    )
    .optional()
}

pub(crate) fn insert_point_event(
    conn: &Connection,
    user: UserId,
    chore: Option<ChoreId>,
    date: Option<NaiveDate>,
    delta: i64,
    reason: PointReason,
    at: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO point_events (user_id, chore_id, date, delta, reason, at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![user, chore, date.map(format_date), delta, reason.as_str(), at],
    )?;
    Ok(())
}

/// Whether a points reset ran after the latest credit for `chore` on `date`.
/// Such a completion has already been paid out and zeroed.
pub(crate) fn settled_by_reset(
    conn: &Connection,
    chore: ChoreId,
    date: NaiveDate,
) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM point_events r WHERE r.reason = 'reset' AND r.id > ( \
             SELECT MAX(c.id) FROM point_events c \
             WHERE c.reason = 'credit' AND c.chore_id = ?1 AND c.date = ?2))",
        params![chore, format_date(date)],
        |row| row.get(0),
    )
}

// ---------------------------------------------------------------------------
// Row conversion helpers
// ---------------------------------------------------------------------------

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, msg)),
    )
}

pub(crate) fn date_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    super::types::parse_date(&raw).map_err(|e| conversion_error(idx, e.to_string()))
}

pub(crate) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let role_str: String = row.get(4)?;
    let role = Role::parse(&role_str)
        .ok_or_else(|| conversion_error(4, format!("unknown role '{role_str}'")))?;
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        credential_hash: row.get(2)?,
        email: row.get(3)?,
        role,
        points: row.get(5)?,
    })
}

pub(crate) fn row_to_chore(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chore> {
    Ok(Chore {
        id: row.get(0)?,
        name: row.get(1)?,
        points: row.get(2)?,
        default_user_id: row.get(3)?,
    })
}

pub(crate) fn row_to_daily(row: &rusqlite::Row<'_>) -> rusqlite::Result<DailyChore> {
    Ok(DailyChore {
        id: row.get(0)?,
        user_id: row.get(1)?,
        chore_id: row.get(2)?,
        date: date_column(row, 3)?,
        completed: row.get(4)?,
        completed_by: row.get(5)?,
    })
}

fn row_to_point_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<PointEvent> {
    let date: Option<String> = row.get(3)?;
    let date = date
        .map(|d| super::types::parse_date(&d).map_err(|e| conversion_error(3, e.to_string())))
        .transpose()?;
    let reason_str: String = row.get(5)?;
    let reason = PointReason::parse(&reason_str)
        .ok_or_else(|| conversion_error(5, format!("unknown point reason '{reason_str}'")))?;
    Ok(PointEvent {
        id: row.get(0)?,
        user_id: row.get(1)?,
        chore_id: row.get(2)?,
        date,
        delta: row.get(4)?,
        reason,
        at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::ledger::types::CURRENT_SCHEMA_VERSION;

    fn child(name: &str) -> NewUser {
        NewUser {
            username: name.to_owned(),
            credential_hash: String::new(),
            email: format!("{}@example.org", name.to_lowercase()),
            role: Role::Child,
        }
    }

    #[test]
    fn open_on_disk_creates_schema() {
        let dir = tempfile::TempDir::new().expect("create temp dir");
        let path = dir.path().join("nested").join("ledger.db");
        let store = LedgerStore::open(&path).expect("open");
        assert_eq!(store.path(), Some(path.as_path()));
        assert_eq!(store.schema_version().unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::TempDir::new().expect("create temp dir");
        let path = dir.path().join("ledger.db");
        {
            let store = LedgerStore::open(&path).unwrap();
            store.create_user(&child("Max")).unwrap();
        }
        let store = LedgerStore::open(&path).unwrap();
        assert!(store.user_by_username("Max").unwrap().is_some());
    }

    #[test]
    fn duplicate_username_is_conflict() {
        let store = LedgerStore::open_in_memory().unwrap();
        store.create_user(&child("Max")).unwrap();
        let err = store.create_user(&child("Max")).unwrap_err();
        assert!(matches!(err, ChoreError::Conflict(_)));
    }

    #[test]
    fn create_chore_validates_points_and_owner() {
        let store = LedgerStore::open_in_memory().unwrap();
        let zero = store.create_chore(&NewChore {
            name: "Nap".to_owned(),
            points: 0,
            default_user_id: None,
        });
        assert!(matches!(zero, Err(ChoreError::Validation(_))));

        let orphan = store.create_chore(&NewChore {
            name: "Dishes".to_owned(),
            points: 5,
            default_user_id: Some(42),
        });
        assert!(matches!(orphan, Err(ChoreError::NotFound(_))));

        let max = store.create_user(&child("Max")).unwrap();
        let dishes = store
            .create_chore(&NewChore {
                name: "Dishes".to_owned(),
                points: 5,
                default_user_id: Some(max.id),
            })
            .unwrap();
        assert_eq!(store.chore(dishes.id).unwrap(), dishes);
        assert_eq!(store.chore_by_name("Dishes").unwrap(), Some(dishes));
    }

    #[test]
    fn missing_user_is_not_found() {
        let store = LedgerStore::open_in_memory().unwrap();
        assert!(matches!(store.user(7), Err(ChoreError::NotFound(_))));
    }

    #[test]
    fn run_keys_are_recorded_once() {
        let store = LedgerStore::open_in_memory().unwrap();
        assert!(!store.has_run("daily_summary:2024-01-01").unwrap());
        assert!(store.record_run_once("daily_summary:2024-01-01").unwrap());
        assert!(!store.record_run_once("daily_summary:2024-01-01").unwrap());
        assert!(store.has_run("daily_summary:2024-01-01").unwrap());
        assert!(matches!(
            store.record_run_once("  "),
            Err(ChoreError::Scheduler(_))
        ));
    }

    #[test]
    fn keyed_reset_applies_once() {
        let store = LedgerStore::open_in_memory().unwrap();
        let max = store.create_user(&child("Max")).unwrap();
        {
            let conn = store.lock().unwrap();
            conn.execute("UPDATE users SET points = 12 WHERE id = ?1", params![max.id])
                .unwrap();
        }

        assert!(store.reset_all_points(Some("weekly_reset:2024-01-07")).unwrap());
        assert_eq!(store.user(max.id).unwrap().points, 0);

        {
            let conn = store.lock().unwrap();
            conn.execute("UPDATE users SET points = 3 WHERE id = ?1", params![max.id])
                .unwrap();
        }
        assert!(!store.reset_all_points(Some("weekly_reset:2024-01-07")).unwrap());
        assert_eq!(store.user(max.id).unwrap().points, 3);
    }

    #[test]
    fn reset_schema_clears_data() {
        let store = LedgerStore::open_in_memory().unwrap();
        store.create_user(&child("Max")).unwrap();
        store.reset_schema().unwrap();
        assert!(store.users().unwrap().is_empty());
    }

    #[test]
    fn concurrent_user_creation_preserves_rows() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let store =
            std::sync::Arc::new(LedgerStore::open(&dir.path().join("ledger.db")).expect("open"));

        let mut handles = Vec::new();
        for i in 0..10 {
            let s = std::sync::Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                s.create_user(&child(&format!("Kid{i}"))).expect("concurrent insert");
            }));
        }
        for h in handles {
            h.join().expect("thread join");
        }

        assert_eq!(store.users().unwrap().len(), 10);
    }
}
