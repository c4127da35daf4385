#![deny(warnings)]

//! Headless driver for the Coin Campus settlement engine: seed demo
//! accounts, run session starts, record quizzes and investments, trigger the
//! monthly distribution as a standalone job, and inspect the leaderboard.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use econ_core::{AssetKind, PositionId, PositionStatus, UserAccount, UserId};
use econ_engine::{ranking, session, settlement, streak, tax, valuation, EconomyConfig};
use persistence::{with_read_retry, AccountStore, PositionStore, RankingStore, SqliteStore};
use rust_decimal::Decimal;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
usage: cli <command> [flags]

commands:
  seed                          create the demo student accounts
  session     --user ID         run the session-start sequence
  portfolio   --user ID         revalue and list the user's positions
  invest      --user ID --kind KIND --amount N
  sell        --user ID --position ID --amount N
  quiz        --user ID         record a completed quiz
  pay-tax     --user ID --amount N
  settle                        run the monthly distribution as a job
  leaderboard                   print the ranked board
  version                       print build info

flags:
  --date YYYY-MM-DD             override today (default: local date)
  --db PATH                     sqlite file (default: coin-campus.db)
  --config PATH                 economy config YAML (default: built-ins)
";

#[derive(Default)]
struct Args {
    command: Option<String>,
    user: Option<String>,
    date: Option<String>,
    amount: Option<String>,
    kind: Option<String>,
    position: Option<String>,
    db: Option<String>,
    config: Option<String>,
}

fn parse_args() -> Args {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--user" => args.user = it.next(),
            "--date" => args.date = it.next(),
            "--amount" => args.amount = it.next(),
            "--kind" => args.kind = it.next(),
            "--position" => args.position = it.next(),
            "--db" => args.db = it.next(),
            "--config" => args.config = it.next(),
            other if args.command.is_none() && !other.starts_with("--") => {
                args.command = Some(other.to_string());
            }
            _ => {}
        }
    }
    args
}

fn today_from(args: &Args) -> Result<NaiveDate> {
    match &args.date {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .with_context(|| format!("invalid --date {raw}, expected YYYY-MM-DD")),
        None => Ok(chrono::Local::now().date_naive()),
    }
}

fn user_from(args: &Args) -> Result<UserId> {
    match &args.user {
        Some(id) => Ok(UserId(id.clone())),
        None => bail!("--user is required"),
    }
}

fn amount_from(args: &Args) -> Result<Decimal> {
    match &args.amount {
        Some(raw) => raw
            .parse::<Decimal>()
            .with_context(|| format!("invalid --amount {raw}")),
        None => bail!("--amount is required"),
    }
}

fn kind_from(args: &Args) -> Result<AssetKind> {
    match args.kind.as_deref() {
        Some("fixed_income") => Ok(AssetKind::FixedIncome),
        Some("reit") => Ok(AssetKind::Reit),
        Some("equity") => Ok(AssetKind::Equity),
        Some("crypto") => Ok(AssetKind::Crypto),
        Some(other) => bail!("unknown asset kind {other}"),
        None => bail!("--kind is required (fixed_income|reit|equity|crypto)"),
    }
}

fn seed(store: &SqliteStore) -> Result<()> {
    for (id, name, balance) in [
        ("alice", "Alice", 500),
        ("bruno", "Bruno", 500),
        ("carla", "Carla", 500),
    ] {
        let mut acct = UserAccount::new_student(id, name);
        acct.coins_balance = Decimal::new(balance, 0);
        store.insert(&acct).with_context(|| format!("seeding {id}"))?;
        info!(user = id, "seeded");
    }
    println!("Seeded 3 student accounts with 500 coins each.");
    Ok(())
}

fn run_session(store: &SqliteStore, cfg: &EconomyConfig, args: &Args) -> Result<()> {
    let user = user_from(args)?;
    let today = today_from(args)?;
    let outcome = session::run_session_start(store, store, cfg, &user, today)?;
    for note in &outcome.notifications {
        println!("{note}");
    }
    let acct = &outcome.account;
    println!(
        "{} | balance: {} | streak: {} | level: {} | xp: {}",
        acct.display_name, acct.coins_balance, acct.streak, acct.level, acct.xp_points
    );
    Ok(())
}

fn portfolio(store: &SqliteStore, cfg: &EconomyConfig, args: &Args) -> Result<()> {
    let user = user_from(args)?;
    let today = today_from(args)?;
    let notes = valuation::revalue_all(store, store, cfg, &user, today)?;
    for note in &notes {
        println!("{note}");
    }
    let positions = store.list_by_user(&user, Some(PositionStatus::Active))?;
    if positions.is_empty() {
        println!("No active positions.");
    }
    for p in positions {
        println!(
            "{} | {} | invested: {} | value: {} | since: {}",
            p.id.0,
            p.kind.display_name(),
            p.amount_invested,
            p.current_value,
            p.purchase_date
        );
    }
    Ok(())
}

fn invest(store: &SqliteStore, cfg: &EconomyConfig, args: &Args) -> Result<()> {
    let user = user_from(args)?;
    let today = today_from(args)?;
    let kind = kind_from(args)?;
    let amount = amount_from(args)?;
    let (position, note) = valuation::invest(store, store, cfg, &user, kind, amount, today)?;
    println!(
        "Invested {amount} in {} ({})",
        position.kind.display_name(),
        position.id.0
    );
    if let Some(note) = note {
        println!("{note}");
    }
    Ok(())
}

fn sell(store: &SqliteStore, cfg: &EconomyConfig, args: &Args) -> Result<()> {
    let user = user_from(args)?;
    let today = today_from(args)?;
    let amount = amount_from(args)?;
    let position = match &args.position {
        Some(id) => PositionId(id.clone()),
        None => bail!("--position is required"),
    };
    let (outcome, note) = valuation::sell(store, store, cfg, &user, &position, amount, today)?;
    println!("{note}");
    if outcome.position.status == PositionStatus::Sold {
        println!("Position {} fully liquidated.", outcome.position.id.0);
    }
    Ok(())
}

fn quiz(store: &SqliteStore, cfg: &EconomyConfig, args: &Args) -> Result<()> {
    let user = user_from(args)?;
    let today = today_from(args)?;
    let mut acct = store.get(&user)?;
    let note = streak::record_quiz_completion(&mut acct, cfg, today)?;
    AccountStore::update(store, &acct)?;
    println!(
        "Quiz recorded ({}/{} today).",
        acct.daily_quiz_count, cfg.daily_quiz_limit
    );
    if let Some(note) = note {
        println!("{note}");
    }
    Ok(())
}

fn pay_tax(store: &SqliteStore, args: &Args) -> Result<()> {
    let user = user_from(args)?;
    let amount = amount_from(args)?;
    let mut acct = store.get(&user)?;
    let applied = tax::pay(&mut acct, amount)?;
    AccountStore::update(store, &acct)?;
    let due = acct.tax_due.unwrap_or(Decimal::ZERO);
    let paid = acct.tax_paid.unwrap_or(Decimal::ZERO);
    println!("Paid {applied} towards tax ({paid}/{due} this cycle).");
    Ok(())
}

fn settle(store: &SqliteStore, cfg: &EconomyConfig, args: &Args) -> Result<()> {
    let today = today_from(args)?;
    let report = settlement::run_monthly_distribution(store, store, cfg, today)?;
    if report.already_settled {
        println!("Month already settled, nothing to do.");
        return Ok(());
    }
    for (user, payout) in &report.payouts {
        match payout.position {
            Some(p) => println!("{}: place {} -> +{}", user.0, p, payout.total),
            None => println!("{}: salary -> +{}", user.0, payout.total),
        }
    }
    println!(
        "Settled: {} paid, {} skipped, {} failed.",
        report.payouts.len(),
        report.skipped.len(),
        report.failed.len()
    );
    Ok(())
}

fn leaderboard(store: &SqliteStore) -> Result<()> {
    let entries = with_read_retry(3, Duration::from_millis(500), || {
        RankingStore::list_all(store)
    })?;
    let ranked = ranking::assign_positions(entries);
    if ranked.is_empty() {
        println!("Leaderboard is empty.");
    }
    for row in ranked {
        println!(
            "#{} {} | streak: {} | level: {} | coins: {}",
            row.position,
            row.entry.display_name,
            row.entry.streak,
            row.entry.level,
            row.entry.coins_balance
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .init();

    let args = parse_args();
    let cfg = match &args.config {
        Some(path) => EconomyConfig::from_yaml_file(path)?,
        None => EconomyConfig::default(),
    };
    let db = args.db.clone().unwrap_or_else(|| "coin-campus.db".to_string());

    let command = match args.command.as_deref() {
        Some(cmd) => cmd.to_string(),
        None => {
            print!("{USAGE}");
            return Ok(());
        }
    };
    if command == "version" {
        println!("cli {} ({})", env!("GIT_SHA"), env!("BUILD_DATE"));
        return Ok(());
    }

    let store = SqliteStore::open(&db).with_context(|| format!("opening {db}"))?;
    match command.as_str() {
        "seed" => seed(&store),
        "session" => run_session(&store, &cfg, &args),
        "portfolio" => portfolio(&store, &cfg, &args),
        "invest" => invest(&store, &cfg, &args),
        "sell" => sell(&store, &cfg, &args),
        "quiz" => quiz(&store, &cfg, &args),
        "pay-tax" => pay_tax(&store, &args),
        "settle" => settle(&store, &cfg, &args),
        "leaderboard" => leaderboard(&store),
        other => bail!("unknown command {other}\n{USAGE}"),
    }
}
