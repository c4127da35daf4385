//! Session-start orchestration.
//!
//! Runs the stages in the order a page load runs them: monthly settlement
//! (which may touch every account), then the acting user's streak rollovers
//! and tax cycle, then the ranking entry refresh from the re-read account.
//! No stage failure aborts the session; the worst outcome is a skipped
//! settlement or a stale leaderboard row, both repaired on the next trigger.

use chrono::NaiveDate;
use econ_core::{RankingEntry, Role, UserAccount, UserId};
use persistence::{AccountStore, RankingStore};
use tracing::warn;

use crate::{ranking, settlement, streak, tax, EconomyConfig, EngineError, Notification};

/// What a session start produced for the acting user.
#[derive(Clone, Debug)]
pub struct SessionOutcome {
    /// The account after all stages ran.
    pub account: UserAccount,
    /// Messages to surface, in stage order.
    pub notifications: Vec<Notification>,
    /// The refreshed leaderboard row, `None` if the refresh failed or the
    /// user is not a student.
    pub ranking_entry: Option<RankingEntry>,
}

/// Run the session-start sequence for one user.
///
/// The initial account read is the only hard dependency; callers loading a
/// dashboard wrap this in [`persistence::with_read_retry`].
pub fn run_session_start(
    accounts: &dyn AccountStore,
    rankings: &dyn RankingStore,
    cfg: &EconomyConfig,
    user: &UserId,
    today: NaiveDate,
) -> Result<SessionOutcome, EngineError> {
    let initial = accounts.get(user)?;
    let mut notifications = Vec::new();

    match settlement::settle_on_login(accounts, rankings, cfg, &initial, today) {
        Ok(mut notes) => notifications.append(&mut notes),
        Err(err) => {
            warn!(user = %user.0, error = %err, "settlement failed, continuing session");
        }
    }

    // Settlement may have rewritten the account; work from a fresh read.
    let mut account = accounts.get(user)?;
    if account.role != Role::Student {
        return Ok(SessionOutcome {
            account,
            notifications,
            ranking_entry: None,
        });
    }

    // Persist failures below are absorbed: the guard fields stay stale and
    // the same transition re-runs on the next session.
    if streak::roll_periods(&mut account, today) {
        if let Err(err) = accounts.update(&account) {
            warn!(user = %user.0, error = %err, "streak rollover persist failed");
        }
    }

    let before_tax = account.clone();
    let tax_note = tax::run_cycle(&mut account, cfg, today);
    if account != before_tax {
        if let Err(err) = accounts.update(&account) {
            warn!(user = %user.0, error = %err, "tax cycle persist failed");
        }
    }
    if let Some(note) = tax_note {
        notifications.push(note);
    }

    let ranking_entry = match ranking::refresh_entry(rankings, &account, today) {
        Ok(entry) => Some(entry),
        Err(err) => {
            warn!(user = %user.0, error = %err, "ranking refresh failed");
            None
        }
    };

    Ok(SessionOutcome {
        account,
        notifications,
        ranking_entry,
    })
}
