//! Leaderboard aggregation.
//!
//! Positions are tie-aware and dense: every entry sharing the highest streak
//! occupies position 1, the next distinct streak value position 2, and so
//! on. Zero-streak entries never rank. The per-user refresh deletes every
//! pre-existing row before inserting exactly one fresh row, which is what
//! repairs duplicate rows over time.

use chrono::NaiveDate;
use econ_core::{EntryId, RankingEntry, UserAccount, UserId};
use persistence::RankingStore;
use tracing::debug;

use crate::{round_coins, EngineError};

/// A leaderboard row with its tie-aware position (1-based).
#[derive(Clone, Debug, PartialEq)]
pub struct RankedEntry {
    /// Dense position: ties share it, the next distinct streak gets the
    /// next integer.
    pub position: usize,
    /// The underlying entry.
    pub entry: RankingEntry,
}

/// Assign tie-aware positions to a set of entries.
///
/// Entries with `streak <= 0` are dropped. `[50, 50, 30]` yields positions
/// `[1, 1, 2]`; `[50, 40, 40, 40]` yields `[1, 2, 2, 2]`.
pub fn assign_positions(mut entries: Vec<RankingEntry>) -> Vec<RankedEntry> {
    entries.retain(|e| e.streak > 0);
    entries.sort_by(|a, b| b.streak.cmp(&a.streak).then_with(|| a.user_id.cmp(&b.user_id)));

    let mut ranked = Vec::with_capacity(entries.len());
    let mut position = 0usize;
    let mut previous_streak: Option<u32> = None;
    for entry in entries {
        if previous_streak != Some(entry.streak) {
            position += 1;
            previous_streak = Some(entry.streak);
        }
        ranked.push(RankedEntry { position, entry });
    }
    ranked
}

/// Read and rank the full leaderboard.
pub fn leaderboard(store: &dyn RankingStore) -> Result<Vec<RankedEntry>, EngineError> {
    Ok(assign_positions(store.list_all()?))
}

/// The position of one user on a ranked board.
pub fn position_of(ranked: &[RankedEntry], user: &UserId) -> Option<usize> {
    ranked
        .iter()
        .find(|r| &r.entry.user_id == user)
        .map(|r| r.position)
}

/// Replace a user's ranking entry with a fresh projection of the account.
///
/// All pre-existing entries for the user are deleted first; a delete that
/// misses (entry already gone) is logged and ignored, and the insert still
/// proceeds. This is the self-healing path for duplicate rows.
pub fn refresh_entry(
    store: &dyn RankingStore,
    account: &UserAccount,
    today: NaiveDate,
) -> Result<RankingEntry, EngineError> {
    let existing = store.filter_by_user(&account.id)?;
    if existing.len() > 1 {
        debug!(user = %account.id.0, count = existing.len(), "collapsing duplicate ranking rows");
    }
    for entry in existing {
        if let Err(err) = store.delete(&entry.id) {
            debug!(entry = %entry.id.0, error = %err, "stale ranking entry already gone");
        }
    }
    let entry = store.create(RankingEntry {
        id: EntryId(String::new()),
        user_id: account.id.clone(),
        display_name: account.display_name.clone(),
        avatar: account.avatar.clone(),
        streak: account.streak,
        level: account.level,
        coins_balance: round_coins(account.coins_balance),
        last_updated: today,
    })?;
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::MemoryStore;
    use proptest::prelude::*;
    use rust_decimal::Decimal;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn entry(user: &str, streak: u32) -> RankingEntry {
        RankingEntry {
            id: EntryId(String::new()),
            user_id: UserId(user.to_string()),
            display_name: user.to_string(),
            avatar: String::new(),
            streak,
            level: 1,
            coins_balance: Decimal::ZERO,
            last_updated: d(2024, 6, 1),
        }
    }

    #[test]
    fn ties_share_position_one() {
        let ranked = assign_positions(vec![entry("a", 50), entry("b", 50), entry("c", 30)]);
        let positions: Vec<usize> = ranked.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![1, 1, 2]);
    }

    #[test]
    fn lower_tie_group_shares_second_position() {
        let ranked = assign_positions(vec![
            entry("a", 50),
            entry("b", 40),
            entry("c", 40),
            entry("d", 40),
        ]);
        let positions: Vec<usize> = ranked.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![1, 2, 2, 2]);
    }

    #[test]
    fn zero_streaks_never_rank() {
        let ranked = assign_positions(vec![entry("a", 0), entry("b", 5), entry("c", 0)]);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].entry.user_id.0, "b");
        assert_eq!(ranked[0].position, 1);
    }

    #[test]
    fn position_lookup_finds_user() {
        let ranked = assign_positions(vec![entry("a", 10), entry("b", 10), entry("c", 5)]);
        assert_eq!(position_of(&ranked, &UserId("c".to_string())), Some(3));
        assert_eq!(position_of(&ranked, &UserId("a".to_string())), Some(1));
        assert_eq!(position_of(&ranked, &UserId("zz".to_string())), None);
    }

    #[test]
    fn refresh_collapses_duplicates_to_one_row() {
        let store = MemoryStore::new();
        let mut account = UserAccount::new_student("u1", "Alice");
        account.streak = 6;
        // Two duplicate rows, a recoverable anomaly.
        store.create(entry("u1", 3)).unwrap();
        store.create(entry("u1", 4)).unwrap();
        let fresh = refresh_entry(&store, &account, d(2024, 6, 10)).unwrap();
        let rows = store.filter_by_user(&account.id).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, fresh.id);
        assert_eq!(rows[0].streak, 6);
    }

    #[test]
    fn refresh_inserts_when_no_prior_row_exists() {
        let store = MemoryStore::new();
        let account = UserAccount::new_student("u1", "Alice");
        refresh_entry(&store, &account, d(2024, 6, 10)).unwrap();
        assert_eq!(store.filter_by_user(&account.id).unwrap().len(), 1);
    }

    proptest! {
        // Positions are dense over distinct streak values and never skip.
        #[test]
        fn positions_are_dense(streaks in proptest::collection::vec(1u32..60, 1..25)) {
            let entries: Vec<RankingEntry> = streaks
                .iter()
                .enumerate()
                .map(|(i, s)| entry(&format!("u{i}"), *s))
                .collect();
            let ranked = assign_positions(entries);
            let mut distinct: Vec<u32> = streaks.clone();
            distinct.sort_unstable();
            distinct.dedup();
            let max_position = ranked.iter().map(|r| r.position).max().unwrap();
            prop_assert_eq!(max_position, distinct.len());
            for pair in ranked.windows(2) {
                // Sorted descending by streak; position grows by at most 1.
                prop_assert!(pair[1].position == pair[0].position
                    || pair[1].position == pair[0].position + 1);
            }
        }
    }
}
