#![deny(warnings)]

//! Persistence layer: store contracts and backends for the settlement engine.
//!
//! The engine only sees the three store traits below: plain CRUD with no
//! transactional guarantees and no batch atomicity, which is exactly the
//! model the settlement coordinator is designed to survive. Two backends are
//! provided: [`MemoryStore`] for tests and demos, and [`SqliteStore`] for
//! durable local state.

use std::time::Duration;

use econ_core::{EntryId, InvestmentPosition, PositionStatus, RankingEntry, UserAccount, UserId};
use thiserror::Error;
use tracing::warn;

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Errors surfaced by the store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Record kind, e.g. "account".
        kind: &'static str,
        /// Identifier that missed.
        id: String,
    },
    /// The backend is temporarily unreachable; reads may be retried.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A stored value could not be decoded into its domain type.
    #[error("corrupt record: {0}")]
    Corrupt(String),
    /// SQLite backend failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    /// Whether a caller-level retry with backoff may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// User account store (`get`, `insert`, `update`, `list_all`).
pub trait AccountStore {
    /// Fetch one account.
    fn get(&self, id: &UserId) -> Result<UserAccount, StoreError>;
    /// Insert a new account. Fails if the id already exists.
    fn insert(&self, account: &UserAccount) -> Result<(), StoreError>;
    /// Overwrite an existing account record.
    fn update(&self, account: &UserAccount) -> Result<(), StoreError>;
    /// All accounts, in unspecified order.
    fn list_all(&self) -> Result<Vec<UserAccount>, StoreError>;
}

/// Investment position store.
pub trait PositionStore {
    /// Positions owned by `user`, optionally filtered by status.
    fn list_by_user(
        &self,
        user: &UserId,
        status: Option<PositionStatus>,
    ) -> Result<Vec<InvestmentPosition>, StoreError>;
    /// Insert a new position. The store assigns the id and returns the
    /// stored record.
    fn create(&self, position: InvestmentPosition) -> Result<InvestmentPosition, StoreError>;
    /// Overwrite an existing position record.
    fn update(&self, position: &InvestmentPosition) -> Result<(), StoreError>;
}

/// Ranking entry store.
pub trait RankingStore {
    /// All entries ordered by streak descending (ties by user id ascending).
    fn list_all(&self) -> Result<Vec<RankingEntry>, StoreError>;
    /// Entries belonging to `user`. More than one is a recoverable anomaly.
    fn filter_by_user(&self, user: &UserId) -> Result<Vec<RankingEntry>, StoreError>;
    /// Insert a new entry. The store assigns the id and returns the stored
    /// record.
    fn create(&self, entry: RankingEntry) -> Result<RankingEntry, StoreError>;
    /// Overwrite an existing entry record.
    fn update(&self, entry: &RankingEntry) -> Result<(), StoreError>;
    /// Delete an entry. Deleting an already-gone entry is an error the
    /// caller is expected to tolerate.
    fn delete(&self, id: &EntryId) -> Result<(), StoreError>;
}

/// Retry a read with a fixed delay, for dashboard-style loads.
///
/// Only [`StoreError::Unavailable`] is retried; everything else is returned
/// immediately. Writes are never routed through this helper; a failed write
/// leaves its guard field unset and heals on the next trigger.
pub fn with_read_retry<T>(
    attempts: u32,
    delay: Duration,
    mut op: impl FnMut() -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    let mut remaining = attempts.max(1);
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && remaining > 1 => {
                remaining -= 1;
                warn!(error = %err, remaining, "read failed, retrying");
                std::thread::sleep(delay);
            }
            Err(err) => return Err(err),
        }
    }
}
