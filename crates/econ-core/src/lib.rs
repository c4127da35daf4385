#![deny(warnings)]

//! Core domain models and invariants for the Coin Campus settlement engine.
//!
//! This crate defines the serializable records shared by the engine and the
//! persistence backends, together with validation helpers that guarantee the
//! basic invariants (non-negative position values, tax never over-paid).

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod period;

pub use period::MonthKey;

/// Unique identifier of a user account.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

/// Unique identifier of an investment position.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PositionId(pub String);

/// Unique identifier of a ranking entry row.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(pub String);

/// Platform role of an account. Only students take part in settlement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A student account, eligible for salary, prizes, tax and ranking.
    Student,
    /// A teacher account, ignored by the settlement engine.
    Teacher,
}

/// Simulated asset classes available to students.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    /// Deterministic +1%/day.
    FixedIncome,
    /// Pays a daily dividend on the cost basis, mild daily decay.
    Reit,
    /// Uniform daily swing in [-5%, +5%].
    Equity,
    /// Uniform daily swing in [-7%, +7%].
    Crypto,
}

impl AssetKind {
    /// Human-readable name used in notifications.
    pub fn display_name(self) -> &'static str {
        match self {
            AssetKind::FixedIncome => "Fixed Income",
            AssetKind::Reit => "Real Estate Fund",
            AssetKind::Equity => "Stock Market",
            AssetKind::Crypto => "Crypto",
        }
    }
}

/// Lifecycle state of an investment position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    /// Position is held and revalued daily.
    Active,
    /// Position has been fully liquidated.
    Sold,
}

/// XP required per level.
pub const XP_PER_LEVEL: u32 = 500;

/// Derived level for an XP total: `floor(xp / 500) + 1`.
pub fn level_for_xp(xp: u32) -> u32 {
    xp / XP_PER_LEVEL + 1
}

/// A user account as persisted by the platform's account store.
///
/// The `last_bonus_month` field is the sole idempotency guard for monthly
/// settlement; the date/month fields in the streak and tax blocks guard the
/// daily and monthly state machines.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserAccount {
    /// Account identity.
    pub id: UserId,
    /// Display name shown on the leaderboard.
    pub display_name: String,
    /// Avatar URL or empty.
    pub avatar: String,
    /// Platform role.
    pub role: Role,
    /// Spendable coins. May go negative (forced tax collection).
    pub coins_balance: Decimal,
    /// Lifetime experience points.
    pub xp_points: u32,
    /// Derived level, kept denormalized alongside `xp_points`.
    pub level: u32,
    /// Current monthly streak counter. Increases at most once per day.
    pub streak: u32,
    /// Month the streak counter belongs to.
    pub streak_month: Option<MonthKey>,
    /// Daily flag: a quiz was completed today.
    pub daily_quiz_completed: bool,
    /// Daily flag: a qualifying investment was made today.
    pub daily_investment_made: bool,
    /// Quizzes taken today, bounded by the daily quiz limit.
    pub daily_quiz_count: u8,
    /// Last day the streak was incremented. The at-most-once-per-day guard.
    pub last_streak_increase_date: Option<NaiveDate>,
    /// Last day the daily flags were rolled over.
    pub last_activity_check: Option<NaiveDate>,
    /// Tax paid so far this cycle. `None` until the tax cycle initializes.
    pub tax_paid: Option<Decimal>,
    /// Tax billed for this cycle. `None` until the tax cycle initializes.
    pub tax_due: Option<Decimal>,
    /// Day the last bill was issued.
    pub last_tax_date: Option<NaiveDate>,
    /// Month of the last settlement payout applied to this account.
    pub last_bonus_month: Option<MonthKey>,
}

impl UserAccount {
    /// A fresh student account with zeroed gamification state.
    pub fn new_student(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: UserId(id.into()),
            display_name: display_name.into(),
            avatar: String::new(),
            role: Role::Student,
            coins_balance: Decimal::ZERO,
            xp_points: 0,
            level: 1,
            streak: 0,
            streak_month: None,
            daily_quiz_completed: false,
            daily_investment_made: false,
            daily_quiz_count: 0,
            last_streak_increase_date: None,
            last_activity_check: None,
            tax_paid: None,
            tax_due: None,
            last_tax_date: None,
            last_bonus_month: None,
        }
    }

    /// Reset the whole streak block for a new month.
    ///
    /// Used by the month rollover and by settlement after paying out prizes.
    pub fn reset_streak_block(&mut self, month: MonthKey) {
        self.streak = 0;
        self.streak_month = Some(month);
        self.daily_quiz_completed = false;
        self.daily_investment_made = false;
        self.daily_quiz_count = 0;
        self.last_streak_increase_date = None;
    }

    /// Credit XP and recompute the denormalized level.
    pub fn award_xp(&mut self, xp: u32) {
        self.xp_points = self.xp_points.saturating_add(xp);
        self.level = level_for_xp(self.xp_points);
    }
}

/// A simulated investment position owned by one user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InvestmentPosition {
    /// Row identity, assigned by the position store on create.
    pub id: PositionId,
    /// Owning user.
    pub user_id: UserId,
    /// Asset class, fixed at purchase.
    pub kind: AssetKind,
    /// Cost basis. Grows on top-up, shrinks proportionally on partial sale.
    pub amount_invested: Decimal,
    /// Mark-to-model value, never negative.
    pub current_value: Decimal,
    /// Day the position was opened.
    pub purchase_date: NaiveDate,
    /// Last day the valuation engine touched this position.
    pub last_update_date: NaiveDate,
    /// Lifecycle state.
    pub status: PositionStatus,
}

/// Denormalized leaderboard row, one per user.
///
/// Entries are destroyed and recreated on every refresh rather than patched;
/// duplicates are a recoverable anomaly collapsed by the refresh.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    /// Row identity, assigned by the ranking store on create.
    pub id: EntryId,
    /// User this row projects.
    pub user_id: UserId,
    /// Display name snapshot.
    pub display_name: String,
    /// Avatar snapshot.
    pub avatar: String,
    /// Streak snapshot, the ranking sort key.
    pub streak: u32,
    /// Level snapshot.
    pub level: u32,
    /// Balance snapshot.
    pub coins_balance: Decimal,
    /// Day of the last refresh.
    pub last_updated: NaiveDate,
}

/// Validation errors for domain invariants.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Display name must not be blank.
    #[error("display name must not be empty")]
    EmptyName,
    /// Monetary amounts on positions must be non-negative.
    #[error("negative monetary value is invalid")]
    NegativeMoney,
    /// A position cannot be updated before it was purchased.
    #[error("last update date precedes purchase date")]
    UpdateBeforePurchase,
    /// `tax_paid` must never exceed `tax_due` within a cycle.
    #[error("tax paid exceeds tax due")]
    TaxOverpaid,
    /// Month keys must parse as `YYYY-MM`.
    #[error("invalid month key: {0}")]
    InvalidMonthKey(String),
    /// Denormalized level must match the XP-derived level.
    #[error("level {level} does not match xp {xp}")]
    LevelMismatch {
        /// Stored level.
        level: u32,
        /// Stored XP.
        xp: u32,
    },
}

/// Validate a user account.
pub fn validate_account(account: &UserAccount) -> Result<(), ValidationError> {
    if account.display_name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if let (Some(paid), Some(due)) = (account.tax_paid, account.tax_due) {
        if paid > due {
            return Err(ValidationError::TaxOverpaid);
        }
    }
    if account.level != level_for_xp(account.xp_points) {
        return Err(ValidationError::LevelMismatch {
            level: account.level,
            xp: account.xp_points,
        });
    }
    Ok(())
}

/// Validate an investment position.
pub fn validate_position(position: &InvestmentPosition) -> Result<(), ValidationError> {
    if position.amount_invested < Decimal::ZERO || position.current_value < Decimal::ZERO {
        return Err(ValidationError::NegativeMoney);
    }
    if position.last_update_date < position.purchase_date {
        return Err(ValidationError::UpdateBeforePurchase);
    }
    Ok(())
}
