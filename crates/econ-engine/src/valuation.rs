//! Daily mark-to-model revaluation of investment positions.
//!
//! Each elapsed calendar day is applied as one step, rounding to 2 decimal
//! places after every step, so a position missed for a week compounds exactly
//! as it would have day by day. Random draws for the volatile asset classes
//! are pinned per (engine seed, position id, calendar day): revaluing the
//! same range twice produces identical values, and a crash halfway through a
//! multi-day catch-up cannot change the outcome of the rerun.

use chrono::{Datelike, Duration, NaiveDate};
use econ_core::{
    period, AssetKind, InvestmentPosition, PositionId, PositionStatus, UserId,
};
use persistence::{AccountStore, PositionStore};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::{round_coins, streak, EconomyConfig, EngineError, Notification};

// SplitMix64 finalizer, used to mix the seed components.
fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Deterministic RNG seed for one position on one calendar day.
fn day_seed(seed: u64, position: &PositionId, day: NaiveDate) -> u64 {
    let mut h = mix(seed);
    for byte in position.0.as_bytes() {
        h = mix(h ^ u64::from(*byte));
    }
    mix(h ^ day.num_days_from_ce() as u64)
}

/// Uniform daily swing factor in `1 + [-swing, swing]` for one pinned day.
fn swing_factor(seed: u64, position: &PositionId, day: NaiveDate, swing: f64) -> Decimal {
    let mut rng = ChaCha8Rng::seed_from_u64(day_seed(seed, position, day));
    let draw: f64 = rng.gen_range(-swing..=swing);
    Decimal::ONE + Decimal::from_f64_retain(draw).unwrap_or(Decimal::ZERO)
}

/// Apply every elapsed day to one position in place. Returns the dividends
/// accrued over the range (already rounded per day, not yet credited).
///
/// Less than one elapsed day, or a sold position, is a no-op.
pub fn revalue_position(
    position: &mut InvestmentPosition,
    cfg: &EconomyConfig,
    today: NaiveDate,
) -> Decimal {
    let elapsed = period::days_between(position.last_update_date, today);
    if elapsed < 1 || position.status != PositionStatus::Active {
        return Decimal::ZERO;
    }

    let mut value = position.current_value;
    let mut dividends = Decimal::ZERO;
    for offset in 1..=elapsed {
        let day = match position
            .last_update_date
            .checked_add_signed(Duration::days(offset))
        {
            Some(day) => day,
            None => break,
        };
        match position.kind {
            AssetKind::FixedIncome => {
                value = round_coins(value * (Decimal::ONE + cfg.fixed_income_daily_rate));
            }
            AssetKind::Reit => {
                dividends += round_coins(position.amount_invested * cfg.reit_dividend_rate);
                value = round_coins(value * (Decimal::ONE - cfg.reit_daily_decay));
            }
            AssetKind::Equity => {
                let factor = swing_factor(cfg.rng_seed, &position.id, day, cfg.equity_daily_swing);
                value = round_coins(value * factor).max(Decimal::ZERO);
            }
            AssetKind::Crypto => {
                let factor = swing_factor(cfg.rng_seed, &position.id, day, cfg.crypto_daily_swing);
                value = round_coins(value * factor).max(Decimal::ZERO);
            }
        }
    }
    position.current_value = value;
    position.last_update_date = today;
    dividends
}

/// Revalue every active position of one user and credit accrued dividends to
/// the cash balance in a single account update.
///
/// The balance credit is written before any position date advances: a failed
/// credit leaves every `last_update_date` untouched, so the whole range
/// replays on the next call and no dividend is ever dropped. A position
/// write that fails after the credit is logged and revalued again later.
pub fn revalue_all(
    accounts: &dyn AccountStore,
    positions: &dyn PositionStore,
    cfg: &EconomyConfig,
    user: &UserId,
    today: NaiveDate,
) -> Result<Vec<Notification>, EngineError> {
    let held = positions.list_by_user(user, Some(PositionStatus::Active))?;
    let mut updates = Vec::new();
    let mut notes = Vec::new();
    let mut total_dividends = Decimal::ZERO;
    for mut position in held {
        let before = position.last_update_date;
        let dividend = revalue_position(&mut position, cfg, today);
        if position.last_update_date == before {
            continue;
        }
        if dividend > Decimal::ZERO {
            total_dividends += dividend;
            notes.push(Notification::DividendPaid {
                asset: position.kind,
                amount: dividend,
            });
        }
        updates.push(position);
    }

    if total_dividends > Decimal::ZERO {
        let mut account = accounts.get(user)?;
        account.coins_balance = round_coins(account.coins_balance + total_dividends);
        accounts.update(&account)?;
        debug!(user = %user.0, dividends = %total_dividends, "dividends credited");
    }

    for position in &updates {
        if let Err(err) = positions.update(position) {
            warn!(position = %position.id.0, error = %err, "position update failed, will revalue again");
        }
    }
    Ok(notes)
}

/// Open a new position or top up the existing active position of the same
/// asset class. Debits the balance and records the investment towards the
/// daily streak.
pub fn invest(
    accounts: &dyn AccountStore,
    positions: &dyn PositionStore,
    cfg: &EconomyConfig,
    user: &UserId,
    kind: AssetKind,
    amount: Decimal,
    today: NaiveDate,
) -> Result<(InvestmentPosition, Option<Notification>), EngineError> {
    if amount <= Decimal::ZERO {
        return Err(EngineError::InvalidAmount(
            "investment must be greater than zero".to_string(),
        ));
    }
    let mut account = accounts.get(user)?;
    if amount > account.coins_balance {
        return Err(EngineError::InsufficientBalance {
            have: account.coins_balance,
            need: amount,
        });
    }

    let existing = positions
        .list_by_user(user, Some(PositionStatus::Active))?
        .into_iter()
        .find(|p| p.kind == kind);
    let position = match existing {
        Some(mut position) => {
            position.amount_invested = round_coins(position.amount_invested + amount);
            position.current_value = round_coins(position.current_value + amount);
            positions.update(&position)?;
            position
        }
        None => positions.create(InvestmentPosition {
            id: PositionId(String::new()),
            user_id: user.clone(),
            kind,
            amount_invested: amount,
            current_value: amount,
            purchase_date: today,
            last_update_date: today,
            status: PositionStatus::Active,
        })?,
    };

    account.coins_balance = round_coins(account.coins_balance - amount);
    let note = streak::record_investment(&mut account, cfg, amount, today);
    accounts.update(&account)?;
    Ok((position, note))
}

/// Outcome of a (partial) sale.
#[derive(Clone, Debug, PartialEq)]
pub struct SaleOutcome {
    /// The position after the sale.
    pub position: InvestmentPosition,
    /// Gross value liquidated.
    pub gross: Decimal,
    /// Tax withheld on the profit share, zero for a loss.
    pub profit_tax: Decimal,
    /// Net amount credited to the balance.
    pub net: Decimal,
}

/// Liquidate `amount` coins of a position's current value.
///
/// The cost basis shrinks by the same proportion as the value. Positive
/// profit on the liquidated share is taxed at the configured rate; losses
/// are not. A position left with at most 0.01 value is marked sold.
pub fn sell(
    accounts: &dyn AccountStore,
    positions: &dyn PositionStore,
    cfg: &EconomyConfig,
    user: &UserId,
    position_id: &PositionId,
    amount: Decimal,
    today: NaiveDate,
) -> Result<(SaleOutcome, Notification), EngineError> {
    let mut position = positions
        .list_by_user(user, Some(PositionStatus::Active))?
        .into_iter()
        .find(|p| &p.id == position_id)
        .ok_or_else(|| persistence::StoreError::NotFound {
            kind: "position",
            id: position_id.0.clone(),
        })?;
    if amount <= Decimal::ZERO {
        return Err(EngineError::InvalidAmount(
            "sale amount must be greater than zero".to_string(),
        ));
    }
    if amount > position.current_value {
        return Err(EngineError::InvalidAmount(format!(
            "sale amount {amount} exceeds position value {}",
            position.current_value
        )));
    }

    let fraction = amount / position.current_value;
    let basis_sold = round_coins(position.amount_invested * fraction);
    let gross = round_coins(amount);
    let profit = gross - basis_sold;
    let profit_tax = if profit > Decimal::ZERO {
        round_coins(profit * cfg.profit_tax_rate)
    } else {
        Decimal::ZERO
    };
    let net = gross - profit_tax;

    position.amount_invested = round_coins(position.amount_invested - basis_sold);
    position.current_value = round_coins(position.current_value - gross);
    position.last_update_date = today;
    if position.current_value <= Decimal::new(1, 2) {
        position.status = PositionStatus::Sold;
    }
    positions.update(&position)?;

    let mut account = accounts.get(user)?;
    account.coins_balance = round_coins(account.coins_balance + net);
    accounts.update(&account)?;

    let note = Notification::SaleSettled {
        gross,
        profit_tax,
        net,
    };
    Ok((
        SaleOutcome {
            position,
            gross,
            profit_tax,
            net,
        },
        note,
    ))
}
