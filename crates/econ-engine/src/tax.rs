//! Monthly income-tax billing cycle.
//!
//! Per-user state machine: uninitialized until first encounter, then
//! accruing voluntary payments, then force-billed on or after the billing
//! day. The month comparison against `last_tax_date` guards the forced
//! collection so it fires at most once per month per user.

use chrono::NaiveDate;
use econ_core::{period, UserAccount};
use rust_decimal::Decimal;

use crate::{round_coins, EconomyConfig, EngineError, Notification};

/// Run the billing cycle for one account. Mutates in place; the caller
/// persists. Returns the collection notification when coins were taken.
pub fn run_cycle(
    account: &mut UserAccount,
    cfg: &EconomyConfig,
    today: NaiveDate,
) -> Option<Notification> {
    let (paid, due) = match (account.tax_paid, account.tax_due) {
        (Some(paid), Some(due)) => (paid, due),
        _ => {
            // First encounter: open the cycle, bill next month.
            account.tax_paid = Some(Decimal::ZERO);
            account.tax_due = Some(cfg.tax_due);
            account.last_tax_date = Some(today);
            return None;
        }
    };

    if !period::is_on_or_after_day(today, cfg.tax_billing_day) {
        return None;
    }
    let bill_is_due = match account.last_tax_date {
        None => true,
        Some(last) => period::months_between(last, today) >= 1,
    };
    if !bill_is_due {
        return None;
    }

    let remaining = due - paid;
    account.tax_paid = Some(Decimal::ZERO);
    account.tax_due = Some(cfg.tax_due);
    account.last_tax_date = Some(today);
    if remaining > Decimal::ZERO {
        // Forced collection; the balance is allowed to go negative.
        account.coins_balance = round_coins(account.coins_balance - remaining);
        Some(Notification::TaxCharged { amount: remaining })
    } else {
        None
    }
}

/// Voluntary payment towards the current cycle. The amount is clamped to the
/// outstanding remainder; returns the amount actually applied.
pub fn pay(account: &mut UserAccount, amount: Decimal) -> Result<Decimal, EngineError> {
    if amount <= Decimal::ZERO {
        return Err(EngineError::InvalidAmount(
            "payment must be greater than zero".to_string(),
        ));
    }
    let (paid, due) = match (account.tax_paid, account.tax_due) {
        (Some(paid), Some(due)) => (paid, due),
        _ => {
            return Err(EngineError::InvalidAmount(
                "tax cycle not initialized yet".to_string(),
            ))
        }
    };
    let remaining = due - paid;
    if remaining <= Decimal::ZERO {
        return Err(EngineError::InvalidAmount(
            "tax is already fully paid this cycle".to_string(),
        ));
    }
    let applied = amount.min(remaining);
    if applied > account.coins_balance {
        return Err(EngineError::InsufficientBalance {
            have: account.coins_balance,
            need: applied,
        });
    }
    account.tax_paid = Some(paid + applied);
    account.coins_balance = round_coins(account.coins_balance - applied);
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use econ_core::validate_account;
    use proptest::prelude::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn cfg() -> EconomyConfig {
        EconomyConfig::default()
    }

    fn initialized(day: NaiveDate, balance: i64) -> UserAccount {
        let mut acct = UserAccount::new_student("u1", "Alice");
        acct.coins_balance = Decimal::new(balance, 0);
        assert!(run_cycle(&mut acct, &cfg(), day).is_none());
        acct
    }

    #[test]
    fn first_encounter_initializes_without_charging() {
        let mut acct = UserAccount::new_student("u1", "Alice");
        acct.coins_balance = Decimal::new(50, 0);
        let note = run_cycle(&mut acct, &cfg(), d(2024, 6, 10));
        assert!(note.is_none());
        assert_eq!(acct.tax_paid, Some(Decimal::ZERO));
        assert_eq!(acct.tax_due, Some(Decimal::new(300, 0)));
        assert_eq!(acct.last_tax_date, Some(d(2024, 6, 10)));
        assert_eq!(acct.coins_balance, Decimal::new(50, 0));
    }

    #[test]
    fn forced_collection_can_go_negative() {
        let mut acct = initialized(d(2024, 5, 10), 100);
        let note = run_cycle(&mut acct, &cfg(), d(2024, 6, 4));
        assert_eq!(
            note,
            Some(Notification::TaxCharged {
                amount: Decimal::new(300, 0)
            })
        );
        assert_eq!(acct.coins_balance, Decimal::new(-200, 0));
        assert_eq!(acct.last_tax_date, Some(d(2024, 6, 4)));
    }

    #[test]
    fn no_collection_before_billing_day() {
        let mut acct = initialized(d(2024, 5, 10), 100);
        assert!(run_cycle(&mut acct, &cfg(), d(2024, 6, 3)).is_none());
        assert_eq!(acct.coins_balance, Decimal::new(100, 0));
        // Day 4 of the next month collects.
        assert!(run_cycle(&mut acct, &cfg(), d(2024, 6, 4)).is_some());
    }

    #[test]
    fn forced_collection_fires_once_per_month() {
        let mut acct = initialized(d(2024, 5, 10), 1_000);
        assert!(run_cycle(&mut acct, &cfg(), d(2024, 6, 4)).is_some());
        assert!(run_cycle(&mut acct, &cfg(), d(2024, 6, 5)).is_none());
        assert!(run_cycle(&mut acct, &cfg(), d(2024, 6, 28)).is_none());
        assert_eq!(acct.coins_balance, Decimal::new(700, 0));
        // Next month bills again.
        assert!(run_cycle(&mut acct, &cfg(), d(2024, 7, 4)).is_some());
        assert_eq!(acct.coins_balance, Decimal::new(400, 0));
    }

    #[test]
    fn fully_paid_cycle_resets_without_charging() {
        let mut acct = initialized(d(2024, 5, 10), 1_000);
        pay(&mut acct, Decimal::new(300, 0)).unwrap();
        assert_eq!(acct.coins_balance, Decimal::new(700, 0));
        let note = run_cycle(&mut acct, &cfg(), d(2024, 6, 4));
        assert!(note.is_none());
        assert_eq!(acct.tax_paid, Some(Decimal::ZERO));
        assert_eq!(acct.coins_balance, Decimal::new(700, 0));
    }

    #[test]
    fn payment_is_clamped_to_remaining() {
        let mut acct = initialized(d(2024, 5, 10), 1_000);
        pay(&mut acct, Decimal::new(250, 0)).unwrap();
        let applied = pay(&mut acct, Decimal::new(500, 0)).unwrap();
        assert_eq!(applied, Decimal::new(50, 0));
        assert_eq!(acct.tax_paid, Some(Decimal::new(300, 0)));
        assert_eq!(acct.coins_balance, Decimal::new(700, 0));
        validate_account(&acct).unwrap();
    }

    #[test]
    fn rejects_non_positive_and_unaffordable_payments() {
        let mut acct = initialized(d(2024, 5, 10), 20);
        assert!(matches!(
            pay(&mut acct, Decimal::ZERO),
            Err(EngineError::InvalidAmount(_))
        ));
        assert!(matches!(
            pay(&mut acct, Decimal::new(-5, 0)),
            Err(EngineError::InvalidAmount(_))
        ));
        assert!(matches!(
            pay(&mut acct, Decimal::new(100, 0)),
            Err(EngineError::InsufficientBalance { .. })
        ));
        // Nothing mutated by the rejections.
        assert_eq!(acct.coins_balance, Decimal::new(20, 0));
        assert_eq!(acct.tax_paid, Some(Decimal::ZERO));
    }

    #[test]
    fn rejects_payment_when_cycle_fully_paid() {
        let mut acct = initialized(d(2024, 5, 10), 1_000);
        pay(&mut acct, Decimal::new(300, 0)).unwrap();
        assert!(matches!(
            pay(&mut acct, Decimal::new(1, 0)),
            Err(EngineError::InvalidAmount(_))
        ));
    }

    proptest! {
        // Whatever sequence of voluntary payments arrives, paid never
        // exceeds due.
        #[test]
        fn paid_never_exceeds_due(amounts in proptest::collection::vec(1i64..500, 0..12)) {
            let mut acct = initialized(d(2024, 5, 10), 1_000_000);
            for a in amounts {
                let _ = pay(&mut acct, Decimal::new(a, 0));
                let paid = acct.tax_paid.unwrap();
                let due = acct.tax_due.unwrap();
                prop_assert!(paid <= due);
                prop_assert!(paid >= Decimal::ZERO);
            }
        }
    }
}
