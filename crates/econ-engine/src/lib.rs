#![deny(warnings)]

//! Periodic economic settlement engine for Coin Campus.
//!
//! Five state machines over the shared stores, all keyed by calendar
//! boundaries and all safe to re-run:
//! - [`valuation`]: daily mark-to-model revaluation of investment positions
//! - [`streak`]: daily gamification flags and the monthly streak counter
//! - [`tax`]: the monthly income-tax billing cycle
//! - [`ranking`]: the deduplicated, tie-aware leaderboard projection
//! - [`settlement`]: the once-per-month salary and prize distribution
//!
//! [`session`] wires them together in the order a session start runs them.
//! Nothing here reads a wall clock or holds a lock across sessions; all
//! cross-session coordination happens through guard fields on the persisted
//! records, re-checked immediately before every write.

use std::fmt;

use econ_core::{AssetKind, ValidationError};
use persistence::StoreError;
use rust_decimal::Decimal;
use thiserror::Error;

pub mod config;
pub mod ranking;
pub mod session;
pub mod settlement;
pub mod streak;
pub mod tax;
pub mod valuation;

pub use config::EconomyConfig;

/// Errors produced by the settlement engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A store operation failed and could not be absorbed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A domain invariant was violated.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// User-supplied amount was rejected; no state was mutated.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    /// The user cannot afford the requested operation.
    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance {
        /// Current balance.
        have: Decimal,
        /// Requested amount.
        need: Decimal,
    },
    /// The daily quiz limit has been reached.
    #[error("daily quiz limit of {0} reached")]
    QuizLimitReached(u8),
}

/// Human-readable message surfaced to the acting user after a stage runs.
///
/// Purely informational; no retained state.
#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    /// A position paid a dividend into the cash balance.
    DividendPaid {
        /// Asset class that paid.
        asset: AssetKind,
        /// Amount credited.
        amount: Decimal,
    },
    /// The monthly base salary was credited.
    SalaryPaid {
        /// Amount credited.
        amount: Decimal,
    },
    /// A ranking prize (salary included) was credited.
    PrizeAwarded {
        /// Tie-aware leaderboard position, 1..=3.
        position: usize,
        /// Total credited, base salary plus tier bonus.
        total: Decimal,
    },
    /// The remainder of the monthly tax was force-collected.
    TaxCharged {
        /// Amount collected. Balance may have gone negative.
        amount: Decimal,
    },
    /// The streak counter went up.
    StreakIncreased {
        /// New streak value.
        streak: u32,
    },
    /// A (partial) sale settled.
    SaleSettled {
        /// Gross sale value.
        gross: Decimal,
        /// Tax withheld on the profit, zero for a loss.
        profit_tax: Decimal,
        /// Net amount credited.
        net: Decimal,
    },
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::DividendPaid { asset, amount } => {
                write!(f, "You earned {amount} coins from your {} asset!", asset.display_name())
            }
            Notification::SalaryPaid { amount } => {
                write!(f, "Monthly salary: +{amount} coins credited!")
            }
            Notification::PrizeAwarded { position, total } => {
                write!(f, "Monthly ranking: place {position}! +{total} coins credited!")
            }
            Notification::TaxCharged { amount } => {
                write!(f, "Income tax collected: {amount} coins (balance may go negative)")
            }
            Notification::StreakIncreased { streak } => {
                write!(f, "Streak increased! Your streak is now {streak} days!")
            }
            Notification::SaleSettled { gross, profit_tax, net } => {
                write!(
                    f,
                    "Sale settled: {gross} coins gross, {profit_tax} profit tax, {net} credited"
                )
            }
        }
    }
}

/// Round a coin amount to 2 decimal places, half away from zero.
///
/// Applied after every daily valuation step and every balance mutation.
pub(crate) fn round_coins(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
}
