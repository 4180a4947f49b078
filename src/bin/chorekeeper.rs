//! `chorekeeper` command-line entry point.
//!
//! `run` starts the background scheduler; the other subcommands perform one
//! ledger operation and exit. Logs go to stderr so stdout stays clean for
//! command output.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::info;

use chorekeeper::config::ChoreConfig;
use chorekeeper::ledger::parse_date;
use chorekeeper::seed::{SeedFile, apply_seed};
use chorekeeper::{Clock, LedgerStore, Scheduler, SystemClock, Trigger, notify};

#[derive(Parser)]
#[command(name = "chorekeeper")]
#[command(about = "Household chore ledger with daily and weekly summaries")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "CHOREKEEPER_CONFIG")]
    config: Option<PathBuf>,

    /// Ledger database (overrides config file)
    #[arg(long, env = "CHOREKEEPER_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until interrupted
    Run,
    /// Provision users and chores from a TOML seed file
    Seed {
        file: PathBuf,
        /// Drop and recreate every table first
        #[arg(long)]
        reset: bool,
    },
    /// Materialize chore instances for a date (default: today)
    Rollover {
        #[arg(long)]
        date: Option<String>,
    },
    /// Print daily and weekly point totals for a user
    Points {
        username: String,
        #[arg(long, default_value_t = 7)]
        days: u32,
        #[arg(long, default_value_t = 4)]
        weeks: u32,
    },
    /// Compose and send one summary now. Manual sends do not count as the
    /// scheduled send for that date, except `weekly --reset`, which runs the
    /// full weekly cycle and marks it done.
    Summary {
        kind: SummaryKind,
        /// Boundary date (default: today)
        #[arg(long)]
        date: Option<String>,
        /// Also apply the weekly points reset
        #[arg(long)]
        reset: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SummaryKind {
    Daily,
    Weekly,
}

fn load_config(cli: &Cli) -> anyhow::Result<ChoreConfig> {
    let path = cli.config.clone().or_else(|| {
        dirs::config_dir()
            .map(|d| d.join("chorekeeper").join("config.toml"))
            .filter(|p| p.exists())
    });

    let mut config = match path {
        Some(path) => {
            info!("loading config from {}", path.display());
            ChoreConfig::from_file(&path)?
        }
        None => {
            info!("no config file, using defaults");
            ChoreConfig::default()
        }
    };
    if let Some(db) = &cli.db {
        config.store.db_path = db.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("chorekeeper=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let store = Arc::new(
        LedgerStore::open(&config.store.db_path)
            .with_context(|| format!("opening {}", config.store.db_path.display()))?,
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match cli.command {
        Command::Run => {
            let notifier = notify::from_config(&config.notifier)?;
            let scheduler = Scheduler::new(
                Arc::clone(&store),
                notifier,
                Arc::clone(&clock),
                config.schedule.clone(),
                config.summary.clone(),
            );
            let cancel = CancellationToken::new();
            let handle = scheduler.run(cancel.clone())?;

            tokio::signal::ctrl_c()
                .await
                .context("waiting for ctrl-c")?;
            info!("shutdown requested");
            cancel.cancel();
            handle.join().await;
            info!("chorekeeper stopped");
        }
        Command::Seed { file, reset } => {
            let seed = SeedFile::from_file(&file)?;
            if reset {
                store.reset_schema()?;
            }
            let report = apply_seed(&store, &seed)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Rollover { date } => {
            let date = match date {
                Some(d) => parse_date(&d)?,
                None => clock.today(),
            };
            store.ensure_today(date)?;
            println!("instances ready for {date}");
        }
        Command::Points {
            username,
            days,
            weeks,
        } => {
            let user = store
                .user_by_username(&username)?
                .with_context(|| format!("no user named '{username}'"))?;
            let today = clock.today();
            store.ensure_today(today)?;
            let daily = store.daily_points(user.id, today, days, Default::default())?;
            let weekly = store.weekly_points(user.id, today, weeks, Default::default())?;

            println!("{} ({}): {} points", user.username, user.role, user.points);
            for total in &daily {
                println!("  {}  {:>4}", total.date, total.points);
            }
            for total in &weekly {
                println!(
                    "  {} ({} to {})  {:>4}",
                    total.label, total.start, total.end, total.points
                );
            }
        }
        Command::Summary { kind, date, reset } => {
            let date = match date {
                Some(d) => parse_date(&d)?,
                None => clock.today(),
            };
            let notifier = notify::from_config(&config.notifier)?;
            let scheduler = Scheduler::new(
                Arc::clone(&store),
                notifier,
                clock,
                config.schedule.clone(),
                config.summary.clone(),
            );
            let report = match (kind, reset) {
                (SummaryKind::Daily, _) => {
                    scheduler.send_summary_now(Trigger::DailySummary, date).await?
                }
                (SummaryKind::Weekly, false) => {
                    scheduler.send_summary_now(Trigger::WeeklySummary, date).await?
                }
                (SummaryKind::Weekly, true) => scheduler.run_weekly_cycle(date).await?,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
