//! SQLite store backend.
//!
//! Schema is migrated on open. Decimals, dates and month keys are stored as
//! TEXT and re-parsed on read; a value that fails to parse surfaces as
//! [`StoreError::Corrupt`] rather than panicking.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::NaiveDate;
use econ_core::{
    AssetKind, EntryId, InvestmentPosition, MonthKey, PositionId, PositionStatus, RankingEntry,
    Role, UserAccount, UserId,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;

use crate::{AccountStore, PositionStore, RankingStore, StoreError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    avatar TEXT NOT NULL,
    role TEXT NOT NULL,
    coins_balance TEXT NOT NULL,
    xp_points INTEGER NOT NULL,
    level INTEGER NOT NULL,
    streak INTEGER NOT NULL,
    streak_month TEXT,
    daily_quiz_completed INTEGER NOT NULL,
    daily_investment_made INTEGER NOT NULL,
    daily_quiz_count INTEGER NOT NULL,
    last_streak_increase_date TEXT,
    last_activity_check TEXT,
    tax_paid TEXT,
    tax_due TEXT,
    last_tax_date TEXT,
    last_bonus_month TEXT
);
CREATE TABLE IF NOT EXISTS positions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    amount_invested TEXT NOT NULL,
    current_value TEXT NOT NULL,
    purchase_date TEXT NOT NULL,
    last_update_date TEXT NOT NULL,
    status TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_positions_user ON positions(user_id, status);
CREATE TABLE IF NOT EXISTS ranking_entries (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    display_name TEXT NOT NULL,
    avatar TEXT NOT NULL,
    streak INTEGER NOT NULL,
    level INTEGER NOT NULL,
    coins_balance TEXT NOT NULL,
    last_updated TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ranking_user ON ranking_entries(user_id);
CREATE TABLE IF NOT EXISTS counters (
    name TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
INSERT OR IGNORE INTO counters (name, value) VALUES ('position', 0), ('entry', 0);
";

/// Durable SQLite-backed store implementing all three store traits.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (and migrate) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    /// Open a private in-memory database. Used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get::<_, String>(0))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".to_string()))
    }
}

fn next_id(conn: &Connection, counter: &str, prefix: &str) -> Result<String, StoreError> {
    conn.execute(
        "UPDATE counters SET value = value + 1 WHERE name = ?1",
        params![counter],
    )?;
    let value: i64 = conn.query_row(
        "SELECT value FROM counters WHERE name = ?1",
        params![counter],
        |row| row.get(0),
    )?;
    Ok(format!("{prefix}-{value}"))
}

// --- TEXT codecs -----------------------------------------------------------

fn dec_from_sql(raw: &str) -> Result<Decimal, StoreError> {
    raw.parse()
        .map_err(|_| StoreError::Corrupt(format!("bad decimal: {raw}")))
}

fn date_to_sql(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn date_from_sql(raw: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| StoreError::Corrupt(format!("bad date: {raw}")))
}

fn month_from_sql(raw: &str) -> Result<MonthKey, StoreError> {
    raw.parse()
        .map_err(|_| StoreError::Corrupt(format!("bad month key: {raw}")))
}

fn role_to_sql(role: Role) -> &'static str {
    match role {
        Role::Student => "student",
        Role::Teacher => "teacher",
    }
}

fn role_from_sql(raw: &str) -> Result<Role, StoreError> {
    match raw {
        "student" => Ok(Role::Student),
        "teacher" => Ok(Role::Teacher),
        other => Err(StoreError::Corrupt(format!("bad role: {other}"))),
    }
}

fn kind_to_sql(kind: AssetKind) -> &'static str {
    match kind {
        AssetKind::FixedIncome => "fixed_income",
        AssetKind::Reit => "reit",
        AssetKind::Equity => "equity",
        AssetKind::Crypto => "crypto",
    }
}

fn kind_from_sql(raw: &str) -> Result<AssetKind, StoreError> {
    match raw {
        "fixed_income" => Ok(AssetKind::FixedIncome),
        "reit" => Ok(AssetKind::Reit),
        "equity" => Ok(AssetKind::Equity),
        "crypto" => Ok(AssetKind::Crypto),
        other => Err(StoreError::Corrupt(format!("bad asset kind: {other}"))),
    }
}

fn status_to_sql(status: PositionStatus) -> &'static str {
    match status {
        PositionStatus::Active => "active",
        PositionStatus::Sold => "sold",
    }
}

fn status_from_sql(raw: &str) -> Result<PositionStatus, StoreError> {
    match raw {
        "active" => Ok(PositionStatus::Active),
        "sold" => Ok(PositionStatus::Sold),
        other => Err(StoreError::Corrupt(format!("bad position status: {other}"))),
    }
}

// --- row mapping -----------------------------------------------------------

struct RawAccount {
    id: String,
    display_name: String,
    avatar: String,
    role: String,
    coins_balance: String,
    xp_points: i64,
    level: i64,
    streak: i64,
    streak_month: Option<String>,
    daily_quiz_completed: bool,
    daily_investment_made: bool,
    daily_quiz_count: i64,
    last_streak_increase_date: Option<String>,
    last_activity_check: Option<String>,
    tax_paid: Option<String>,
    tax_due: Option<String>,
    last_tax_date: Option<String>,
    last_bonus_month: Option<String>,
}

const ACCOUNT_COLUMNS: &str = "id, display_name, avatar, role, coins_balance, xp_points, level, \
     streak, streak_month, daily_quiz_completed, daily_investment_made, daily_quiz_count, \
     last_streak_increase_date, last_activity_check, tax_paid, tax_due, last_tax_date, \
     last_bonus_month";

fn read_raw_account(row: &Row<'_>) -> rusqlite::Result<RawAccount> {
    Ok(RawAccount {
        id: row.get(0)?,
        display_name: row.get(1)?,
        avatar: row.get(2)?,
        role: row.get(3)?,
        coins_balance: row.get(4)?,
        xp_points: row.get(5)?,
        level: row.get(6)?,
        streak: row.get(7)?,
        streak_month: row.get(8)?,
        daily_quiz_completed: row.get(9)?,
        daily_investment_made: row.get(10)?,
        daily_quiz_count: row.get(11)?,
        last_streak_increase_date: row.get(12)?,
        last_activity_check: row.get(13)?,
        tax_paid: row.get(14)?,
        tax_due: row.get(15)?,
        last_tax_date: row.get(16)?,
        last_bonus_month: row.get(17)?,
    })
}

fn raw_to_account(raw: RawAccount) -> Result<UserAccount, StoreError> {
    Ok(UserAccount {
        id: UserId(raw.id),
        display_name: raw.display_name,
        avatar: raw.avatar,
        role: role_from_sql(&raw.role)?,
        coins_balance: dec_from_sql(&raw.coins_balance)?,
        xp_points: raw.xp_points as u32,
        level: raw.level as u32,
        streak: raw.streak as u32,
        streak_month: raw.streak_month.as_deref().map(month_from_sql).transpose()?,
        daily_quiz_completed: raw.daily_quiz_completed,
        daily_investment_made: raw.daily_investment_made,
        daily_quiz_count: raw.daily_quiz_count as u8,
        last_streak_increase_date: raw
            .last_streak_increase_date
            .as_deref()
            .map(date_from_sql)
            .transpose()?,
        last_activity_check: raw
            .last_activity_check
            .as_deref()
            .map(date_from_sql)
            .transpose()?,
        tax_paid: raw.tax_paid.as_deref().map(dec_from_sql).transpose()?,
        tax_due: raw.tax_due.as_deref().map(dec_from_sql).transpose()?,
        last_tax_date: raw.last_tax_date.as_deref().map(date_from_sql).transpose()?,
        last_bonus_month: raw
            .last_bonus_month
            .as_deref()
            .map(month_from_sql)
            .transpose()?,
    })
}

fn account_params(account: &UserAccount) -> [Box<dyn rusqlite::ToSql>; 18] {
    [
        Box::new(account.id.0.clone()),
        Box::new(account.display_name.clone()),
        Box::new(account.avatar.clone()),
        Box::new(role_to_sql(account.role).to_string()),
        Box::new(account.coins_balance.to_string()),
        Box::new(account.xp_points as i64),
        Box::new(account.level as i64),
        Box::new(account.streak as i64),
        Box::new(account.streak_month.map(|m| m.to_string())),
        Box::new(account.daily_quiz_completed),
        Box::new(account.daily_investment_made),
        Box::new(account.daily_quiz_count as i64),
        Box::new(account.last_streak_increase_date.map(date_to_sql)),
        Box::new(account.last_activity_check.map(date_to_sql)),
        Box::new(account.tax_paid.map(|d| d.to_string())),
        Box::new(account.tax_due.map(|d| d.to_string())),
        Box::new(account.last_tax_date.map(date_to_sql)),
        Box::new(account.last_bonus_month.map(|m| m.to_string())),
    ]
}

fn read_position(row: &Row<'_>) -> rusqlite::Result<(String, String, String, String, String, String, String, String)>
{
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn raw_to_position(
    raw: (String, String, String, String, String, String, String, String),
) -> Result<InvestmentPosition, StoreError> {
    Ok(InvestmentPosition {
        id: PositionId(raw.0),
        user_id: UserId(raw.1),
        kind: kind_from_sql(&raw.2)?,
        amount_invested: dec_from_sql(&raw.3)?,
        current_value: dec_from_sql(&raw.4)?,
        purchase_date: date_from_sql(&raw.5)?,
        last_update_date: date_from_sql(&raw.6)?,
        status: status_from_sql(&raw.7)?,
    })
}

fn read_entry(row: &Row<'_>) -> rusqlite::Result<(String, String, String, String, i64, i64, String, String)>
{
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn raw_to_entry(
    raw: (String, String, String, String, i64, i64, String, String),
) -> Result<RankingEntry, StoreError> {
    Ok(RankingEntry {
        id: EntryId(raw.0),
        user_id: UserId(raw.1),
        display_name: raw.2,
        avatar: raw.3,
        streak: raw.4 as u32,
        level: raw.5 as u32,
        coins_balance: dec_from_sql(&raw.6)?,
        last_updated: date_from_sql(&raw.7)?,
    })
}

// --- trait impls -----------------------------------------------------------

impl AccountStore for SqliteStore {
    fn get(&self, id: &UserId) -> Result<UserAccount, StoreError> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
                params![id.0],
                read_raw_account,
            )
            .optional()?
            .ok_or(StoreError::NotFound {
                kind: "account",
                id: id.0.clone(),
            })?;
        raw_to_account(raw)
    }

    fn insert(&self, account: &UserAccount) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let values = account_params(account);
        let refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|b| b.as_ref()).collect();
        conn.execute(
            &format!(
                "INSERT INTO accounts ({ACCOUNT_COLUMNS}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
            ),
            refs.as_slice(),
        )?;
        Ok(())
    }

    fn update(&self, account: &UserAccount) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let values = account_params(account);
        let refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|b| b.as_ref()).collect();
        let affected = conn.execute(
            "UPDATE accounts SET display_name = ?2, avatar = ?3, role = ?4, coins_balance = ?5, \
             xp_points = ?6, level = ?7, streak = ?8, streak_month = ?9, \
             daily_quiz_completed = ?10, daily_investment_made = ?11, daily_quiz_count = ?12, \
             last_streak_increase_date = ?13, last_activity_check = ?14, tax_paid = ?15, \
             tax_due = ?16, last_tax_date = ?17, last_bonus_month = ?18 WHERE id = ?1",
            refs.as_slice(),
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound {
                kind: "account",
                id: account.id.0.clone(),
            });
        }
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<UserAccount>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts"))?;
        let rows = stmt.query_map([], read_raw_account)?;
        let mut accounts = Vec::new();
        for raw in rows {
            accounts.push(raw_to_account(raw?)?);
        }
        Ok(accounts)
    }
}

impl PositionStore for SqliteStore {
    fn list_by_user(
        &self,
        user: &UserId,
        status: Option<PositionStatus>,
    ) -> Result<Vec<InvestmentPosition>, StoreError> {
        let conn = self.lock()?;
        let base = "SELECT id, user_id, kind, amount_invested, current_value, purchase_date, \
                    last_update_date, status FROM positions WHERE user_id = ?1";
        let mut positions = Vec::new();
        match status {
            Some(s) => {
                let mut stmt = conn.prepare(&format!("{base} AND status = ?2"))?;
                let rows = stmt.query_map(params![user.0, status_to_sql(s)], read_position)?;
                for raw in rows {
                    positions.push(raw_to_position(raw?)?);
                }
            }
            None => {
                let mut stmt = conn.prepare(base)?;
                let rows = stmt.query_map(params![user.0], read_position)?;
                for raw in rows {
                    positions.push(raw_to_position(raw?)?);
                }
            }
        }
        Ok(positions)
    }

    fn create(&self, mut position: InvestmentPosition) -> Result<InvestmentPosition, StoreError> {
        let conn = self.lock()?;
        position.id = PositionId(next_id(&conn, "position", "pos")?);
        conn.execute(
            "INSERT INTO positions (id, user_id, kind, amount_invested, current_value, \
             purchase_date, last_update_date, status) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                position.id.0,
                position.user_id.0,
                kind_to_sql(position.kind),
                position.amount_invested.to_string(),
                position.current_value.to_string(),
                date_to_sql(position.purchase_date),
                date_to_sql(position.last_update_date),
                status_to_sql(position.status),
            ],
        )?;
        Ok(position)
    }

    fn update(&self, position: &InvestmentPosition) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let affected = conn.execute(
            "UPDATE positions SET user_id = ?2, kind = ?3, amount_invested = ?4, \
             current_value = ?5, purchase_date = ?6, last_update_date = ?7, status = ?8 \
             WHERE id = ?1",
            params![
                position.id.0,
                position.user_id.0,
                kind_to_sql(position.kind),
                position.amount_invested.to_string(),
                position.current_value.to_string(),
                date_to_sql(position.purchase_date),
                date_to_sql(position.last_update_date),
                status_to_sql(position.status),
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound {
                kind: "position",
                id: position.id.0.clone(),
            });
        }
        Ok(())
    }
}

impl RankingStore for SqliteStore {
    fn list_all(&self) -> Result<Vec<RankingEntry>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, display_name, avatar, streak, level, coins_balance, \
             last_updated FROM ranking_entries ORDER BY streak DESC, user_id ASC",
        )?;
        let rows = stmt.query_map([], read_entry)?;
        let mut entries = Vec::new();
        for raw in rows {
            entries.push(raw_to_entry(raw?)?);
        }
        Ok(entries)
    }

    fn filter_by_user(&self, user: &UserId) -> Result<Vec<RankingEntry>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, display_name, avatar, streak, level, coins_balance, \
             last_updated FROM ranking_entries WHERE user_id = ?1",
        )?;
        let rows = stmt.query_map(params![user.0], read_entry)?;
        let mut entries = Vec::new();
        for raw in rows {
            entries.push(raw_to_entry(raw?)?);
        }
        Ok(entries)
    }

    fn create(&self, mut entry: RankingEntry) -> Result<RankingEntry, StoreError> {
        let conn = self.lock()?;
        entry.id = EntryId(next_id(&conn, "entry", "entry")?);
        conn.execute(
            "INSERT INTO ranking_entries (id, user_id, display_name, avatar, streak, level, \
             coins_balance, last_updated) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.id.0,
                entry.user_id.0,
                entry.display_name,
                entry.avatar,
                entry.streak as i64,
                entry.level as i64,
                entry.coins_balance.to_string(),
                date_to_sql(entry.last_updated),
            ],
        )?;
        Ok(entry)
    }

    fn update(&self, entry: &RankingEntry) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let affected = conn.execute(
            "UPDATE ranking_entries SET user_id = ?2, display_name = ?3, avatar = ?4, \
             streak = ?5, level = ?6, coins_balance = ?7, last_updated = ?8 WHERE id = ?1",
            params![
                entry.id.0,
                entry.user_id.0,
                entry.display_name,
                entry.avatar,
                entry.streak as i64,
                entry.level as i64,
                entry.coins_balance.to_string(),
                date_to_sql(entry.last_updated),
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound {
                kind: "ranking entry",
                id: entry.id.0.clone(),
            });
        }
        Ok(())
    }

    fn delete(&self, id: &EntryId) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let affected = conn.execute("DELETE FROM ranking_entries WHERE id = ?1", params![id.0])?;
        if affected == 0 {
            return Err(StoreError::NotFound {
                kind: "ranking entry",
                id: id.0.clone(),
            });
        }
        Ok(())
    }
}
