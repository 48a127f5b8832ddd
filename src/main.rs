//! # bybit-daemon — Autonomous Position Manager
//!
//! ## Architecture Overview
//!
//! ```text
//!  ┌──────────────┐  signals/command.txt   ┌──────────────────────────────┐
//!  │  Controller  │ ──────────────────────▶│  Daemon Loop                 │
//!  │  (dashboard, │                        │   ├─ Risk Engine             │──▶ Bybit trading
//!  │   CLI, test) │ ◀──────────────────────│   └─ Position Tracker        │    (prod / testnet / sim)
//!  └──────────────┘  signals/status.json   └──────────────────────────────┘
//!                                                   │
//!                                                   └──────────────────────────▶ Bybit market data (prod)
//! ```
//!
//! ## Environment Variables
//!
//! | Variable                    | Default | Description                              |
//! |-----------------------------|---------|------------------------------------------|
//! | `BYBIT_TESTNET`             | `false` | Trade against the testnet                |
//! | `BYBIT_API_KEY` / `_SECRET` | —       | Production trading credentials           |
//! | `BYBIT_TESTNET_API_KEY` / `_SECRET` | — | Testnet trading credentials          |
//! | `RISK_LIMIT_AMOUNT`         | `100`   | USDT notional per order                  |
//! | `ATR_MULTIPLIER`            | `2.0`   | Stop distance in ATRs                    |
//! | `DAEMON_BASE_DIR`           | `.`     | Root of `signals/` and `data/`           |
//! | `DAEMON_TICK_MS`            | `1000`  | Loop interval                            |
//! | `POSITION_SYNC_SECS`        | `5`     | Exchange resync interval                 |
//! | `RUST_LOG`                  | —       | Tracing filter                           |
//!
//! Without credentials for the selected environment the daemon runs in
//! simulation mode.

use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod daemon;
mod engine;
mod error;
mod exchange;
mod models;
mod risk;
mod signals;
mod state;

use config::DaemonConfig;
use daemon::Daemon;
use models::{parse_command, Action, ParsedCommand};
use signals::{CommandInbox, SignalPaths, StatusSink};

#[derive(Parser, Debug)]
#[command(author, version, about = "Bybit position-management daemon")]
struct Cli {
    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the daemon (default)
    Run {
        /// Overrides DAEMON_BASE_DIR
        #[arg(long)]
        base_dir: Option<PathBuf>,

        /// Overrides DAEMON_TICK_MS
        #[arg(long)]
        tick_ms: Option<u64>,
    },

    /// Write a command file the way a controller would
    Send {
        /// START, STOP, BUY, SELL, CLOSE_ALL, SYNC, HEALTH_CHECK or SHUTDOWN
        action: String,

        #[arg(long)]
        pair: Option<String>,

        #[arg(long, allow_hyphen_values = true)]
        score: Option<f64>,

        #[arg(long)]
        base_dir: Option<PathBuf>,
    },

    /// Print the current status snapshot
    Status {
        #[arg(long)]
        base_dir: Option<PathBuf>,
    },
}

// ─── Entry Point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Load .env (optional — the controller usually sets real env vars) ──
    dotenvy::dotenv().ok();

    // ── 2. Initialise structured logging ─────────────────────────────────────
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env()
            .add_directive("bybit_daemon=debug".parse()?)
            .add_directive("reqwest=warn".parse()?))
        .init();

    let cli = Cli::parse();

    // ── 3. Resolve configuration fresh for this process ──────────────────────
    let mut config = DaemonConfig::from_env();

    match cli.command.unwrap_or(Cmd::Run { base_dir: None, tick_ms: None }) {
        Cmd::Run { base_dir, tick_ms } => {
            if let Some(dir) = base_dir {
                config.base_dir = dir;
            }
            if let Some(ms) = tick_ms {
                config.tick_interval = std::time::Duration::from_millis(ms.max(1));
            }
            run(config).await
        }
        Cmd::Send { action, pair, score, base_dir } => {
            if let Some(dir) = base_dir {
                config.base_dir = dir;
            }
            send(&config, &action, pair.as_deref(), score)
        }
        Cmd::Status { base_dir } => {
            if let Some(dir) = base_dir {
                config.base_dir = dir;
            }
            status(&config)
        }
    }
}

async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    info!(
        r#"

  ╔═══════════════════════════════════════════════╗
  ║        BYBIT DAEMON — Position Manager        ║
  ║        Risk Engine  ·  Position Tracker       ║
  ╚═══════════════════════════════════════════════╝"#
    );

    let daemon = Daemon::new(config).context("Daemon setup failed")?;
    daemon.run().await.context("Daemon stopped on a fatal error")?;
    Ok(())
}

fn send(config: &DaemonConfig, action: &str, pair: Option<&str>, score: Option<f64>) -> anyhow::Result<()> {
    let action = Action::parse(action).with_context(|| {
        let known: Vec<&str> = Action::ALL.iter().map(|a| a.as_str()).collect();
        format!("Unknown action '{action}' (expected one of {})", known.join(", "))
    })?;

    let mut draft = format!("ACTION={action}\n");
    if let Some(pair) = pair {
        draft.push_str(&format!("PAIR={pair}\n"));
    }
    if let Some(score) = score {
        draft.push_str(&format!("SCORE={score}\n"));
    }

    // Same validation the daemon applies, so mistakes surface here; what is
    // queued is the normalised form.
    let ParsedCommand { command, .. } = parse_command(&draft, config.trading.score_range)?
        .context("Empty command")?;
    let body = command.render(Utc::now());

    let paths = SignalPaths::under(&config.base_dir);
    CommandInbox::new(&paths.command)
        .submit(&body)
        .with_context(|| format!("Cannot write {}", paths.command.display()))?;

    info!(path = %paths.command.display(), %action, "📤 Command queued");
    Ok(())
}

fn status(config: &DaemonConfig) -> anyhow::Result<()> {
    let paths = SignalPaths::under(&config.base_dir);
    let snapshot = StatusSink::new(&paths.status)
        .read()
        .with_context(|| format!("No readable status at {}", paths.status.display()))?;

    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    let age = snapshot.staleness(Utc::now());
    if age >= chrono::Duration::seconds(15) {
        eprintln!("⚠️  Heartbeat is {}s old — daemon may be frozen or stopped", age.num_seconds());
    }
    Ok(())
}
