//! Engine configuration.
//!
//! Defaults reproduce the production parameters; a YAML file can override any
//! subset of fields.

use std::path::Path;

use anyhow::Context;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Tunable parameters of the settlement engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyConfig {
    /// Seed for the deterministic valuation RNG.
    pub rng_seed: u64,
    /// Monthly base salary paid to every student.
    pub base_salary: Decimal,
    /// Prize bonuses for ranking tiers 1..=3, on top of the base salary.
    pub prize_bonuses: [Decimal; 3],
    /// Tax billed each cycle.
    pub tax_due: Decimal,
    /// Day of month on which the remainder is force-collected.
    pub tax_billing_day: u32,
    /// Minimum single investment that counts towards the daily streak.
    pub streak_investment_min: Decimal,
    /// Maximum quizzes credited per day.
    pub daily_quiz_limit: u8,
    /// Tax rate applied to positive profit on sale.
    pub profit_tax_rate: Decimal,
    /// Fixed income: deterministic daily growth rate.
    pub fixed_income_daily_rate: Decimal,
    /// REIT: daily dividend rate on the cost basis.
    pub reit_dividend_rate: Decimal,
    /// REIT: daily value decay rate.
    pub reit_daily_decay: Decimal,
    /// Equity: half-width of the uniform daily swing.
    pub equity_daily_swing: f64,
    /// Crypto: half-width of the uniform daily swing.
    pub crypto_daily_swing: f64,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            rng_seed: 42,
            base_salary: Decimal::new(200, 0),
            prize_bonuses: [
                Decimal::new(500, 0),
                Decimal::new(300, 0),
                Decimal::new(100, 0),
            ],
            tax_due: Decimal::new(300, 0),
            tax_billing_day: 4,
            streak_investment_min: Decimal::new(10, 0),
            daily_quiz_limit: 4,
            profit_tax_rate: Decimal::new(10, 2),         // 0.10
            fixed_income_daily_rate: Decimal::new(1, 2),  // 0.01
            reit_dividend_rate: Decimal::new(8, 3),       // 0.008
            reit_daily_decay: Decimal::new(1, 3),         // 0.001
            equity_daily_swing: 0.05,
            crypto_daily_swing: 0.07,
        }
    }
}

impl EconomyConfig {
    /// Total credited to a winner at a given tier position (1..=3):
    /// base salary plus the tier bonus.
    pub fn tier_total(&self, position: usize) -> Option<Decimal> {
        self.prize_bonuses
            .get(position.checked_sub(1)?)
            .map(|bonus| self.base_salary + *bonus)
    }

    /// Parse a config from YAML; missing fields keep their defaults.
    pub fn from_yaml_str(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    /// Load a config from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading config {}", path.as_ref().display()))?;
        Ok(Self::from_yaml_str(&raw)?)
    }
}
