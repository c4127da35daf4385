//! In-memory store backend for tests and demo seeding.
//!
//! A single [`MemoryStore`] implements all three store traits behind one
//! mutex, mimicking a shared remote backend that several uncoordinated
//! sessions hit concurrently. Update failures can be injected per account to
//! exercise the settlement loop's log-and-continue path.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use econ_core::{
    EntryId, InvestmentPosition, PositionId, PositionStatus, RankingEntry, UserAccount, UserId,
};

use crate::{AccountStore, PositionStore, RankingStore, StoreError};

#[derive(Debug, Default)]
struct Inner {
    accounts: BTreeMap<UserId, UserAccount>,
    positions: BTreeMap<PositionId, InvestmentPosition>,
    entries: BTreeMap<EntryId, RankingEntry>,
    next_position: u64,
    next_entry: u64,
    failing_account_updates: BTreeSet<UserId>,
}

/// Shared in-memory backend implementing all three store traits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `AccountStore::update` for `user` fail with
    /// [`StoreError::Unavailable`]. Test hook for partial-write scenarios.
    pub fn inject_account_update_failure(&self, user: &UserId) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failing_account_updates.insert(user.clone());
        }
    }

    /// Remove a previously injected update failure.
    pub fn clear_account_update_failure(&self, user: &UserId) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failing_account_updates.remove(user);
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl AccountStore for MemoryStore {
    fn get(&self, id: &UserId) -> Result<UserAccount, StoreError> {
        let inner = self.lock()?;
        inner.accounts.get(id).cloned().ok_or(StoreError::NotFound {
            kind: "account",
            id: id.0.clone(),
        })
    }

    fn insert(&self, account: &UserAccount) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.accounts.contains_key(&account.id) {
            return Err(StoreError::Corrupt(format!(
                "duplicate account id: {}",
                account.id.0
            )));
        }
        inner.accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    fn update(&self, account: &UserAccount) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.failing_account_updates.contains(&account.id) {
            return Err(StoreError::Unavailable(format!(
                "injected update failure for {}",
                account.id.0
            )));
        }
        if !inner.accounts.contains_key(&account.id) {
            return Err(StoreError::NotFound {
                kind: "account",
                id: account.id.0.clone(),
            });
        }
        inner.accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<UserAccount>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.accounts.values().cloned().collect())
    }
}

impl PositionStore for MemoryStore {
    fn list_by_user(
        &self,
        user: &UserId,
        status: Option<PositionStatus>,
    ) -> Result<Vec<InvestmentPosition>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .positions
            .values()
            .filter(|p| &p.user_id == user)
            .filter(|p| status.map_or(true, |s| p.status == s))
            .cloned()
            .collect())
    }

    fn create(&self, mut position: InvestmentPosition) -> Result<InvestmentPosition, StoreError> {
        let mut inner = self.lock()?;
        inner.next_position += 1;
        position.id = PositionId(format!("pos-{}", inner.next_position));
        inner.positions.insert(position.id.clone(), position.clone());
        Ok(position)
    }

    fn update(&self, position: &InvestmentPosition) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if !inner.positions.contains_key(&position.id) {
            return Err(StoreError::NotFound {
                kind: "position",
                id: position.id.0.clone(),
            });
        }
        inner.positions.insert(position.id.clone(), position.clone());
        Ok(())
    }
}

impl RankingStore for MemoryStore {
    fn list_all(&self) -> Result<Vec<RankingEntry>, StoreError> {
        let inner = self.lock()?;
        let mut entries: Vec<RankingEntry> = inner.entries.values().cloned().collect();
        entries.sort_by(|a, b| b.streak.cmp(&a.streak).then_with(|| a.user_id.cmp(&b.user_id)));
        Ok(entries)
    }

    fn filter_by_user(&self, user: &UserId) -> Result<Vec<RankingEntry>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .entries
            .values()
            .filter(|e| &e.user_id == user)
            .cloned()
            .collect())
    }

    fn create(&self, mut entry: RankingEntry) -> Result<RankingEntry, StoreError> {
        let mut inner = self.lock()?;
        inner.next_entry += 1;
        entry.id = EntryId(format!("entry-{}", inner.next_entry));
        inner.entries.insert(entry.id.clone(), entry.clone());
        Ok(entry)
    }

    fn update(&self, entry: &RankingEntry) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if !inner.entries.contains_key(&entry.id) {
            return Err(StoreError::NotFound {
                kind: "ranking entry",
                id: entry.id.0.clone(),
            });
        }
        inner.entries.insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    fn delete(&self, id: &EntryId) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.entries.remove(id).is_none() {
            return Err(StoreError::NotFound {
                kind: "ranking entry",
                id: id.0.clone(),
            });
        }
        Ok(())
    }
}
