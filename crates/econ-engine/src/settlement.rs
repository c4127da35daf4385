//! Monthly salary and prize distribution.
//!
//! Runs on the critical path of every session start on the 1st, with no lock
//! between sessions. Coordination is optimistic: the election is a plain
//! list-then-check, and correctness rests entirely on the `last_bonus_month`
//! guard being re-fetched and re-checked immediately before every per-user
//! credit. A session that loses the race, or a user the global pass missed,
//! is repaired by the self-settlement fallback on its own next login.
//!
//! Prize tiers use competition ranking: a tie group of size k consumes k
//! tier slots, so two users tied for first push the next distinct streak to
//! third place. Every tied member receives the full tier prize.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use econ_core::{period, MonthKey, RankingEntry, Role, UserAccount, UserId};
use persistence::{AccountStore, RankingStore};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::{round_coins, EconomyConfig, EngineError, Notification};

/// One user's settlement credit.
#[derive(Clone, Debug, PartialEq)]
pub struct Payout {
    /// Competition-ranked prize position 1..=3, `None` for plain salary.
    pub position: Option<usize>,
    /// Total credited.
    pub total: Decimal,
}

/// What one distribution run did, for logging and for the session layer.
#[derive(Clone, Debug, Default)]
pub struct DistributionReport {
    /// Credits applied this run, keyed by user.
    pub payouts: BTreeMap<UserId, Payout>,
    /// Users whose guard was already set when re-checked.
    pub skipped: Vec<UserId>,
    /// Users whose credit failed to persist; repaired on their next login.
    pub failed: Vec<UserId>,
    /// True when the election found the month already settled and the run
    /// did nothing.
    pub already_settled: bool,
}

/// Competition-style prize positions for a pre-reset ranking snapshot.
///
/// Entries with `streak <= 0` never place. `[10, 10, 5]` yields positions
/// `{1, 1, 3}`: the tie at first consumes two slots.
fn prize_positions(entries: &[RankingEntry]) -> BTreeMap<UserId, usize> {
    let mut sorted: Vec<&RankingEntry> = entries.iter().filter(|e| e.streak > 0).collect();
    sorted.sort_by(|a, b| b.streak.cmp(&a.streak).then_with(|| a.user_id.cmp(&b.user_id)));

    let mut positions = BTreeMap::new();
    let mut current = 0usize;
    let mut previous_streak: Option<u32> = None;
    for (index, entry) in sorted.iter().enumerate() {
        if previous_streak != Some(entry.streak) {
            current = index + 1;
            previous_streak = Some(entry.streak);
        }
        positions.insert(entry.user_id.clone(), current);
    }
    positions
}

/// Perform the full monthly distribution for `today`'s month.
///
/// Safe to invoke from a racing session or from a scheduled job: the
/// election skips the whole pass once any account carries the current month,
/// and every per-user write re-checks a freshly fetched guard. Per-user
/// failures are logged and skipped, never fatal.
pub fn run_monthly_distribution(
    accounts: &dyn AccountStore,
    rankings: &dyn RankingStore,
    cfg: &EconomyConfig,
    today: NaiveDate,
) -> Result<DistributionReport, EngineError> {
    let month = period::month_key(today);
    let mut report = DistributionReport::default();

    let all = accounts.list_all()?;
    if all
        .iter()
        .any(|a| a.role == Role::Student && a.last_bonus_month == Some(month))
    {
        report.already_settled = true;
        return Ok(report);
    }

    // Pre-reset snapshot: prize positions are fixed before any streak is
    // zeroed.
    let snapshot = rankings.list_all()?;
    let student_entries: Vec<RankingEntry> = {
        let students: Vec<&UserId> = all
            .iter()
            .filter(|a| a.role == Role::Student)
            .map(|a| &a.id)
            .collect();
        snapshot
            .into_iter()
            .filter(|e| students.contains(&&e.user_id))
            .collect()
    };
    let positions = prize_positions(&student_entries);

    for account in all.iter().filter(|a| a.role == Role::Student) {
        // The guard must come from a fresh read, not the election snapshot.
        let mut fresh = match accounts.get(&account.id) {
            Ok(fresh) => fresh,
            Err(err) => {
                warn!(user = %account.id.0, error = %err, "settlement read failed, skipping user");
                report.failed.push(account.id.clone());
                continue;
            }
        };
        if fresh.last_bonus_month == Some(month) {
            report.skipped.push(fresh.id);
            continue;
        }

        let position = positions.get(&fresh.id).copied().filter(|p| *p <= 3);
        let total = position
            .and_then(|p| cfg.tier_total(p))
            .unwrap_or(cfg.base_salary);
        fresh.coins_balance = round_coins(fresh.coins_balance + total);
        fresh.last_bonus_month = Some(month);
        fresh.reset_streak_block(month);
        match accounts.update(&fresh) {
            Ok(()) => {
                report.payouts.insert(fresh.id, Payout { position, total });
            }
            Err(err) => {
                warn!(user = %fresh.id.0, error = %err, "settlement credit failed, skipping user");
                report.failed.push(fresh.id);
            }
        }
    }

    // Bring the board in line with the reset accounts.
    match rankings.list_all() {
        Ok(entries) => {
            for mut entry in entries {
                if entry.streak == 0 {
                    continue;
                }
                entry.streak = 0;
                entry.last_updated = today;
                if let Err(err) = rankings.update(&entry) {
                    warn!(entry = %entry.id.0, error = %err, "ranking reset failed");
                }
            }
        }
        Err(err) => warn!(error = %err, "ranking reset skipped"),
    }

    info!(
        month = %month,
        paid = report.payouts.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "monthly distribution complete"
    );
    Ok(report)
}

/// Credit the acting user the base salary directly if its guard is still
/// stale. The repair path for users the global pass missed.
fn settle_self(
    accounts: &dyn AccountStore,
    cfg: &EconomyConfig,
    user: &UserId,
    month: MonthKey,
) -> Result<Option<Notification>, EngineError> {
    let mut account = accounts.get(user)?;
    if account.last_bonus_month == Some(month) {
        return Ok(None);
    }
    account.coins_balance = round_coins(account.coins_balance + cfg.base_salary);
    account.last_bonus_month = Some(month);
    account.reset_streak_block(month);
    accounts.update(&account)?;
    Ok(Some(Notification::SalaryPaid {
        amount: cfg.base_salary,
    }))
}

/// Session-start settlement for one acting user.
///
/// Triggers only on the 1st of the month while the acting student's own
/// guard is stale. Any error in the global pass degrades to the
/// self-settlement fallback; the acting user's own salary is the only thing
/// this function insists on. A session that lost the race still reports the
/// placement its prize was paid for, computed from the ranking snapshot
/// taken before the distribution ran.
pub fn settle_on_login(
    accounts: &dyn AccountStore,
    rankings: &dyn RankingStore,
    cfg: &EconomyConfig,
    account: &UserAccount,
    today: NaiveDate,
) -> Result<Vec<Notification>, EngineError> {
    let month = period::month_key(today);
    if !period::is_first_of_month(today)
        || account.role != Role::Student
        || account.last_bonus_month == Some(month)
    {
        return Ok(Vec::new());
    }

    // Snapshot before the distribution; a racing session may zero the board
    // at any moment.
    let snapshot = match rankings.list_all() {
        Ok(entries) => entries,
        Err(err) => {
            warn!(user = %account.id.0, error = %err, "ranking snapshot failed");
            Vec::new()
        }
    };

    match run_monthly_distribution(accounts, rankings, cfg, today) {
        Ok(report) => {
            if let Some(payout) = report.payouts.get(&account.id) {
                let note = match payout.position {
                    Some(position) => Notification::PrizeAwarded {
                        position,
                        total: payout.total,
                    },
                    None => Notification::SalaryPaid {
                        amount: payout.total,
                    },
                };
                return Ok(vec![note]);
            }
        }
        Err(err) => {
            warn!(user = %account.id.0, error = %err, "global distribution failed, falling back");
        }
    }
    if let Some(note) = settle_self(accounts, cfg, &account.id, month)? {
        return Ok(vec![note]);
    }
    // Guard already set by a racing session: the credit happened there, so
    // only the placement message is owed here.
    let placement = prize_positions(&snapshot)
        .get(&account.id)
        .copied()
        .filter(|p| *p <= 3)
        .and_then(|p| cfg.tier_total(p).map(|total| (p, total)));
    let note = match placement {
        Some((position, total)) => Notification::PrizeAwarded { position, total },
        None => Notification::SalaryPaid {
            amount: cfg.base_salary,
        },
    };
    Ok(vec![note])
}

#[cfg(test)]
mod tests {
    use super::*;
    use econ_core::EntryId;
    use persistence::MemoryStore;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn cfg() -> EconomyConfig {
        EconomyConfig::default()
    }

    fn mk(y: i32, m: u32) -> MonthKey {
        MonthKey { year: y, month: m }
    }

    fn seed_student(store: &MemoryStore, id: &str, streak: u32) -> UserId {
        let mut acct = UserAccount::new_student(id, id);
        acct.streak = streak;
        acct.streak_month = Some(mk(2024, 5));
        store.insert(&acct).unwrap();
        if streak > 0 {
            RankingStore::create(
                store,
                RankingEntry {
                    id: EntryId(String::new()),
                    user_id: UserId(id.to_string()),
                    display_name: id.to_string(),
                    avatar: String::new(),
                    streak,
                    level: 1,
                    coins_balance: Decimal::ZERO,
                    last_updated: d(2024, 5, 31),
                },
            )
            .unwrap();
        }
        UserId(id.to_string())
    }

    fn balance(store: &MemoryStore, id: &UserId) -> Decimal {
        store.get(id).unwrap().coins_balance
    }

    #[test]
    fn tied_first_place_pushes_next_streak_to_third() {
        let store = MemoryStore::new();
        let a = seed_student(&store, "a", 10);
        let b = seed_student(&store, "b", 10);
        let c = seed_student(&store, "c", 5);
        let rest = seed_student(&store, "d", 0);
        let report =
            run_monthly_distribution(&store, &store, &cfg(), d(2024, 6, 1)).unwrap();
        assert!(!report.already_settled);
        assert_eq!(balance(&store, &a), Decimal::new(700, 0));
        assert_eq!(balance(&store, &b), Decimal::new(700, 0));
        assert_eq!(balance(&store, &c), Decimal::new(300, 0));
        assert_eq!(balance(&store, &rest), Decimal::new(200, 0));
        assert_eq!(report.payouts[&c].position, Some(3));
        assert_eq!(report.payouts[&rest].position, None);
    }

    #[test]
    fn distribution_resets_streaks_everywhere() {
        let store = MemoryStore::new();
        let a = seed_student(&store, "a", 7);
        run_monthly_distribution(&store, &store, &cfg(), d(2024, 6, 1)).unwrap();
        let acct = store.get(&a).unwrap();
        assert_eq!(acct.streak, 0);
        assert_eq!(acct.streak_month, Some(mk(2024, 6)));
        assert_eq!(acct.last_bonus_month, Some(mk(2024, 6)));
        assert_eq!(acct.last_streak_increase_date, None);
        let entries = RankingStore::list_all(&store).unwrap();
        assert!(entries.iter().all(|e| e.streak == 0));
    }

    #[test]
    fn second_distribution_in_same_month_is_a_noop() {
        let store = MemoryStore::new();
        let a = seed_student(&store, "a", 10);
        run_monthly_distribution(&store, &store, &cfg(), d(2024, 6, 1)).unwrap();
        let report =
            run_monthly_distribution(&store, &store, &cfg(), d(2024, 6, 1)).unwrap();
        assert!(report.already_settled);
        assert!(report.payouts.is_empty());
        assert_eq!(balance(&store, &a), Decimal::new(700, 0));
    }

    #[test]
    fn teacher_accounts_are_ignored() {
        let store = MemoryStore::new();
        let student = seed_student(&store, "s", 3);
        let mut teacher = UserAccount::new_student("t", "Teach");
        teacher.role = Role::Teacher;
        store.insert(&teacher).unwrap();
        let report =
            run_monthly_distribution(&store, &store, &cfg(), d(2024, 6, 1)).unwrap();
        assert_eq!(report.payouts.len(), 1);
        assert!(report.payouts.contains_key(&student));
        assert_eq!(balance(&store, &UserId("t".to_string())), Decimal::ZERO);
        assert_eq!(store.get(&UserId("t".to_string())).unwrap().last_bonus_month, None);
    }

    #[test]
    fn login_settlement_awards_prize_notification() {
        let store = MemoryStore::new();
        let a = seed_student(&store, "a", 10);
        seed_student(&store, "b", 5);
        let acct = store.get(&a).unwrap();
        let notes = settle_on_login(&store, &store, &cfg(), &acct, d(2024, 6, 1)).unwrap();
        assert_eq!(
            notes,
            vec![Notification::PrizeAwarded {
                position: 1,
                total: Decimal::new(700, 0)
            }]
        );
    }

    #[test]
    fn login_settlement_off_the_first_is_a_noop() {
        let store = MemoryStore::new();
        let a = seed_student(&store, "a", 10);
        let acct = store.get(&a).unwrap();
        let notes = settle_on_login(&store, &store, &cfg(), &acct, d(2024, 6, 2)).unwrap();
        assert!(notes.is_empty());
        assert_eq!(balance(&store, &a), Decimal::ZERO);
    }

    #[test]
    fn login_after_race_loss_does_not_double_credit() {
        let store = MemoryStore::new();
        let a = seed_student(&store, "a", 10);
        let b = seed_student(&store, "b", 5);
        // Session for `a` wins the race and resets the board.
        let acct_a = store.get(&a).unwrap();
        settle_on_login(&store, &store, &cfg(), &acct_a, d(2024, 6, 1)).unwrap();
        // A later session for `b` holds a stale in-memory account; its guard
        // was already set by the global pass, so only a message is owed. The
        // board is already zeroed, so the message degrades to plain salary.
        let mut stale_b = store.get(&b).unwrap();
        stale_b.last_bonus_month = None;
        let notes = settle_on_login(&store, &store, &cfg(), &stale_b, d(2024, 6, 1)).unwrap();
        assert_eq!(
            notes,
            vec![Notification::SalaryPaid {
                amount: Decimal::new(200, 0)
            }]
        );
        assert_eq!(balance(&store, &b), Decimal::new(500, 0));
    }

    #[test]
    fn race_losing_session_reports_its_placement() {
        let store = MemoryStore::new();
        let a = seed_student(&store, "a", 10);
        let b = seed_student(&store, "b", 5);
        // A racing session has credited every account but has not yet
        // reached the ranking reset.
        for (id, prize) in [(&a, 700), (&b, 500)] {
            let mut acct = store.get(id).unwrap();
            acct.coins_balance = Decimal::new(prize, 0);
            acct.last_bonus_month = Some(mk(2024, 6));
            AccountStore::update(&store, &acct).unwrap();
        }
        // `b` logs in mid-race with a stale guard.
        let mut stale_b = store.get(&b).unwrap();
        stale_b.last_bonus_month = None;
        let notes = settle_on_login(&store, &store, &cfg(), &stale_b, d(2024, 6, 1)).unwrap();
        assert_eq!(
            notes,
            vec![Notification::PrizeAwarded {
                position: 2,
                total: Decimal::new(500, 0)
            }]
        );
        // Message only; the credit already happened elsewhere.
        assert_eq!(balance(&store, &b), Decimal::new(500, 0));
    }

    #[test]
    fn failed_credit_is_repaired_on_next_login() {
        let store = MemoryStore::new();
        seed_student(&store, "a", 10);
        let b = seed_student(&store, "b", 0);
        store.inject_account_update_failure(&b);
        let report =
            run_monthly_distribution(&store, &store, &cfg(), d(2024, 6, 1)).unwrap();
        assert_eq!(report.failed, vec![b.clone()]);
        assert_eq!(balance(&store, &b), Decimal::ZERO);
        assert_eq!(store.get(&b).unwrap().last_bonus_month, None);
        // The store recovers; the user's own login repairs the miss.
        store.clear_account_update_failure(&b);
        let acct = store.get(&b).unwrap();
        let notes = settle_on_login(&store, &store, &cfg(), &acct, d(2024, 6, 1)).unwrap();
        assert_eq!(
            notes,
            vec![Notification::SalaryPaid {
                amount: Decimal::new(200, 0)
            }]
        );
        assert_eq!(balance(&store, &b), Decimal::new(200, 0));
        assert_eq!(store.get(&b).unwrap().last_bonus_month, Some(mk(2024, 6)));
    }

    #[test]
    fn prize_positions_follow_competition_ranking() {
        let entries: Vec<RankingEntry> = [("a", 10u32), ("b", 10), ("c", 5), ("d", 0)]
            .iter()
            .map(|(id, streak)| RankingEntry {
                id: EntryId(String::new()),
                user_id: UserId(id.to_string()),
                display_name: id.to_string(),
                avatar: String::new(),
                streak: *streak,
                level: 1,
                coins_balance: Decimal::ZERO,
                last_updated: d(2024, 5, 31),
            })
            .collect();
        let positions = prize_positions(&entries);
        assert_eq!(positions.get(&UserId("a".to_string())), Some(&1));
        assert_eq!(positions.get(&UserId("b".to_string())), Some(&1));
        assert_eq!(positions.get(&UserId("c".to_string())), Some(&3));
        assert_eq!(positions.get(&UserId("d".to_string())), None);
    }
}
