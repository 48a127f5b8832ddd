//! # daemon — Daemon Loop
//!
//! ```text
//!  controller ──▶ signals/command.txt ──▶ [tick] ──▶ Risk Engine ──▶ Position Tracker ──▶ exchange
//!                                            │
//!  controller ◀── signals/status.json  ◀─────┘  (every tick)
//! ```
//!
//! Every tick, in order:
//! 1. take at most one pending command and dispatch it
//! 2. resync positions when the sync interval has elapsed
//! 3. rewrite the status snapshot (this is the heartbeat)
//!
//! All mutation happens on this one task. Only a [`DaemonError`] ends the
//! loop; everything else lands in `last_error` and polling continues.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::config::DaemonConfig;
use crate::engine::executor::prepare_entry;
use crate::engine::{PositionStore, PositionTracker};
use crate::error::{CommandError, DaemonError, ExchangeError, TradeError};
use crate::exchange::{select_clients, ExchangeClients, MarketData, ResolvedEndpoints};
use crate::models::{parse_command, Command, DaemonStatus, Direction, Position, TradeSignal};
use crate::risk::{ProposedTrade, RiskDecision, RiskEngine};
use crate::signals::{CommandInbox, SignalPaths, StatusSink};
use crate::state::{DaemonState, ErrorOrigin, Transition};

pub struct Daemon {
    config:          DaemonConfig,
    state:           DaemonState,
    inbox:           CommandInbox,
    status:          StatusSink,
    market:          Arc<dyn MarketData>,
    tracker:         PositionTracker,
    risk:            RiskEngine,
    endpoints:       ResolvedEndpoints,
    simulation_mode: bool,
}

impl Daemon {
    /// Resolve clients from `config` and build the daemon in `NOT_RUNNING`.
    pub fn new(config: DaemonConfig) -> Result<Self, DaemonError> {
        let paths = SignalPaths::under(&config.base_dir);
        let restored = PositionStore::new(&paths.positions).load();
        let clients = select_clients(&config, restored.clone())?;
        Self::with_clients(config, clients, restored)
    }

    /// Build around already-selected clients, seeding the tracker with
    /// `restored`.
    pub fn with_clients(
        config:   DaemonConfig,
        clients:  ExchangeClients,
        restored: Vec<Position>,
    ) -> Result<Self, DaemonError> {
        let paths = SignalPaths::under(&config.base_dir);
        paths.ensure_dirs()?;

        let store = PositionStore::new(&paths.positions);
        let tracker = PositionTracker::new(clients.trading, store, config.sync_interval, restored);

        Ok(Self {
            state:           DaemonState::new(),
            inbox:           CommandInbox::new(&paths.command),
            status:          StatusSink::new(&paths.status),
            market:          clients.market,
            tracker,
            risk:            RiskEngine::new(config.risk.clone()),
            endpoints:       clients.endpoints,
            simulation_mode: clients.simulation_mode,
            config,
        })
    }

    #[cfg(test)]
    pub fn state(&self) -> &DaemonState {
        &self.state
    }

    #[cfg(test)]
    pub fn tracker(&self) -> &PositionTracker {
        &self.tracker
    }

    #[cfg(test)]
    pub fn risk(&self) -> &RiskEngine {
        &self.risk
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// `NOT_RUNNING → IDLE` and the first status snapshot.
    pub fn start(&mut self) -> Result<(), DaemonError> {
        self.inbox.discard_stale_claim();
        if let Err(e) = self.state.transition(Transition::Boot) {
            warn!(error = %e, "Daemon already started");
        }
        let limits = self.risk.config();
        info!(
            pid          = std::process::id(),
            status       = %self.status.path().display(),
            simulation   = self.simulation_mode,
            positions    = self.tracker.count(),
            max_per_side = limits.max_positions_per_side,
            cooldown_s   = limits.cooldown.num_seconds(),
            reversal_s   = limits.reversal_window.num_seconds(),
            "🚀 Daemon up — IDLE, waiting for START"
        );
        self.state.beat(Utc::now());
        self.write_status()
    }

    /// Start, then tick until SHUTDOWN or Ctrl-C.
    pub async fn run(mut self) -> Result<(), DaemonError> {
        self.start()?;

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.state.is_terminated() {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        self.fail(&e);
                        return Err(e);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl-C received — treating as SHUTDOWN");
                    self.state.last_command = Some("SHUTDOWN (signal)".to_string());
                    let _ = self.state.transition(Transition::Shutdown);
                    self.state.beat(Utc::now());
                    if let Err(e) = self.write_status() {
                        self.fail(&e);
                        return Err(e);
                    }
                }
            }
        }

        info!("👋 Daemon terminated");
        Ok(())
    }

    /// One pass of the loop.
    pub async fn tick(&mut self) -> Result<(), DaemonError> {
        if let Some(text) = self.inbox.take()? {
            self.process(&text).await;
        }

        if !self.state.is_terminated() && self.tracker.sync_due(Instant::now()) {
            match self.tracker.sync().await {
                Ok(_) => self.state.clear_error(ErrorOrigin::Sync),
                Err(e) => self.record_exchange_error(ErrorOrigin::Sync, "Position sync", &e),
            }
        }

        self.state.beat(Utc::now());
        self.write_status()
    }

    /// Best-effort last words before the process exits on a fatal error.
    fn fail(&mut self, err: &DaemonError) {
        error!(error = %err, "💥 Fatal daemon error");
        self.state.record_error(ErrorOrigin::Fatal, err.to_string());
        let _ = self.state.transition(Transition::Shutdown);
        self.state.beat(Utc::now());
        if let Err(e) = self.write_status() {
            error!(error = %e, "Final status write failed");
        }
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    async fn process(&mut self, text: &str) {
        let parsed = match parse_command(text, self.config.trading.score_range) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "⛔ Command rejected");
                self.state.record_error(ErrorOrigin::Command, e.to_string());
                return;
            }
        };

        let label = parsed.command.describe();
        info!(command = %label, issued_at = ?parsed.issued_at, "📥 Command received");
        self.state.last_command = Some(label.clone());

        match self.handle(parsed.command).await {
            Ok(outcome) => {
                info!(command = %label, outcome = %outcome, "✅ Command done");
                self.state.clear_error(ErrorOrigin::Command);
            }
            Err(TradeError::Exchange(e)) => {
                self.record_exchange_error(ErrorOrigin::Command, &label, &e);
            }
            Err(e) => {
                warn!(command = %label, error = %e, "⛔ Command failed");
                self.state.record_error(ErrorOrigin::Command, format!("{label}: {e}"));
            }
        }
    }

    async fn handle(&mut self, command: Command) -> Result<String, TradeError> {
        match command {
            Command::Start    => self.apply(Transition::Start),
            Command::Stop     => self.apply(Transition::Stop),
            Command::Shutdown => self.apply(Transition::Shutdown),

            Command::Buy(signal)  => self.open(signal, Direction::Long).await,
            Command::Sell(signal) => self.open(signal, Direction::Short).await,

            Command::CloseAll => {
                let report = self.tracker.close_all().await;
                if report.is_complete() {
                    Ok(report.summary())
                } else {
                    Err(TradeError::PartialClose(report.summary()))
                }
            }

            Command::Sync => {
                let report = self.tracker.sync().await?;
                self.state.clear_error(ErrorOrigin::Sync);
                Ok(format!("{} position(s) on exchange", report.count))
            }

            Command::HealthCheck => {
                info!(
                    state      = %self.state.lifecycle,
                    positions  = self.tracker.count(),
                    cooldowns  = self.risk.ledger().len(),
                    simulation = self.simulation_mode,
                    private    = %self.endpoints.private,
                    "💓 Health check"
                );
                Ok("alive".to_string())
            }
        }
    }

    fn apply(&mut self, transition: Transition) -> Result<String, TradeError> {
        let from = self.state.lifecycle;
        let to = self
            .state
            .transition(transition)
            .map_err(|e| CommandError::Lifecycle(e.to_string()))?;
        if from != to {
            info!(%from, %to, "🔁 Lifecycle transition");
        }
        Ok(format!("{from} → {to}"))
    }

    /// BUY / SELL: risk gate, then sizing, then the exchange.
    async fn open(&mut self, signal: TradeSignal, direction: Direction) -> Result<String, TradeError> {
        let action = match direction {
            Direction::Long  => "BUY",
            Direction::Short => "SELL",
        };
        if !self.state.is_running() {
            return Err(CommandError::NotRunning(action).into());
        }

        let trade = ProposedTrade {
            symbol: signal.symbol.clone(),
            direction,
            score: signal.score,
        };
        if let RiskDecision::Deny(reason) = self.risk.evaluate(&trade, self.tracker.positions(), Utc::now()) {
            warn!(symbol = %trade.symbol, %direction, score = trade.score, reason = %reason, "🛡️ Risk denied");
            return Err(CommandError::RiskDenied(reason).into());
        }

        // One budget for the whole entry; each request also has its own timeout.
        let deadline = tokio::time::Instant::now() + self.config.trading.entry_timeout;
        let prepared = tokio::time::timeout_at(
            deadline,
            prepare_entry(self.market.as_ref(), &self.config.trading, &trade.symbol, direction),
        )
        .await;
        let order = match prepared {
            Ok(order) => order?,
            Err(_) => {
                return Err(ExchangeError::Timeout(format!("{action} {}: market data", trade.symbol)).into());
            }
        };

        let placed = tokio::time::timeout_at(deadline, self.tracker.execute(&order)).await;
        let receipt = match placed {
            Ok(receipt) => receipt?,
            Err(_) => {
                // The order may have reached the exchange: hold the symbol
                // in cooldown and let the next sync find out.
                warn!(symbol = %trade.symbol, %direction, "Order outcome unknown after timeout");
                self.risk.record_execution(&trade.symbol, direction, Utc::now());
                self.tracker.request_sync();
                return Err(ExchangeError::Timeout(format!("{action} {}: order placement", trade.symbol)).into());
            }
        };
        self.risk.record_execution(&trade.symbol, direction, receipt.submitted_at);

        Ok(format!(
            "{direction} {} {} @ {} (order {})",
            receipt.size, receipt.symbol, receipt.price, receipt.order_id
        ))
    }

    fn record_exchange_error(&mut self, origin: ErrorOrigin, context: &str, err: &ExchangeError) {
        if err.is_authentication() {
            // Stays on the configured endpoint; no silent switch to simulation.
            error!(context, error = %err, "🔐 Exchange authentication failed");
        } else if err.is_retryable() {
            warn!(context, error = %err, "Transient exchange failure — retrying next tick");
        } else {
            warn!(context, error = %err, "⛔ Exchange rejected request");
        }
        self.state.record_error(origin, format!("{context}: {err}"));
    }

    // ── Status ───────────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> DaemonStatus {
        DaemonStatus {
            pid:              std::process::id(),
            running:          self.state.is_running(),
            state:            self.state.lifecycle,
            last_update:      self.state.heartbeat_at,
            simulation_mode:  self.simulation_mode,
            position_count:   self.tracker.count(),
            last_command:     self.state.last_command.clone(),
            last_error:       self.state.last_error.as_ref().map(|e| e.message.clone()),
            public_endpoint:  self.endpoints.public.clone(),
            private_endpoint: self.endpoints.private.clone(),
            testnet:          self.endpoints.testnet,
        }
    }

    fn write_status(&self) -> Result<(), DaemonError> {
        self.status.write(&self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::testing::{FakeMarket, FakeTrading};
    use crate::exchange::SimulatedExchange;
    use crate::state::LifecycleState;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::path::Path;
    use tempfile::TempDir;

    fn config(dir: &Path, extra: &[(&str, &str)]) -> DaemonConfig {
        let mut map: HashMap<String, String> = extra
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        map.insert("DAEMON_BASE_DIR".into(), dir.display().to_string());
        map.entry("DAEMON_TICK_MS".into()).or_insert_with(|| "10".into());
        DaemonConfig::from_lookup(|k| map.get(k).cloned())
    }

    fn endpoints() -> ResolvedEndpoints {
        ResolvedEndpoints {
            public:  "https://api.bybit.com".into(),
            private: "https://api-testnet.bybit.com".into(),
            testnet: true,
        }
    }

    struct Harness {
        dir:     TempDir,
        daemon:  Daemon,
        market:  Arc<FakeMarket>,
        trading: Arc<FakeTrading>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_env(&[])
        }

        fn with_env(extra: &[(&str, &str)]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let market = Arc::new(FakeMarket::new(dec!(100)));
            let trading = Arc::new(FakeTrading::new());
            let clients = ExchangeClients {
                market:          market.clone(),
                trading:         trading.clone(),
                endpoints:       endpoints(),
                simulation_mode: false,
            };
            let mut daemon = Daemon::with_clients(config(dir.path(), extra), clients, Vec::new()).unwrap();
            daemon.start().unwrap();
            Self { dir, daemon, market, trading }
        }

        fn inbox(&self) -> CommandInbox {
            CommandInbox::new(SignalPaths::under(self.dir.path()).command)
        }

        async fn send(&mut self, body: &str) {
            self.inbox().submit(body).unwrap();
            self.daemon.tick().await.unwrap();
        }

        fn status(&self) -> DaemonStatus {
            StatusSink::new(SignalPaths::under(self.dir.path()).status).read().unwrap()
        }
    }

    #[tokio::test]
    async fn test_boot_writes_idle_status() {
        let h = Harness::new();
        let status = h.status();
        assert_eq!(status.state, LifecycleState::Idle);
        assert!(!status.running);
        assert_eq!(status.pid, std::process::id());
        assert_eq!(status.last_error, None);
    }

    #[tokio::test]
    async fn test_start_stop_cycle() {
        let mut h = Harness::new();
        h.send("ACTION=START\n").await;
        assert_eq!(h.status().state, LifecycleState::Running);
        assert!(h.status().running);
        assert_eq!(h.status().last_command.as_deref(), Some("START"));

        h.send("ACTION=STOP\n").await;
        assert_eq!(h.status().state, LifecycleState::Idle);
    }

    #[tokio::test]
    async fn test_buy_without_pair_never_reaches_risk_or_tracker() {
        let mut h = Harness::new();
        h.send("ACTION=START\n").await;
        h.send("ACTION=BUY\nSCORE=0.8\n").await;

        let status = h.status();
        assert_eq!(status.state, LifecycleState::Running);
        assert!(status.last_error.unwrap().contains("PAIR"));
        assert_eq!(h.market.calls(), 0);
        assert!(h.trading.orders.lock().unwrap().is_empty());
        assert_eq!(h.daemon.risk().ledger().len(), 0);
    }

    #[tokio::test]
    async fn test_command_consumed_exactly_once() {
        let mut h = Harness::new();
        h.send("ACTION=START\n").await;
        h.send("ACTION=BUY\nPAIR=BTCUSDT\nSCORE=0.9\n").await;
        assert_eq!(h.trading.orders.lock().unwrap().len(), 1);
        assert!(!h.inbox().path().exists());

        h.daemon.tick().await.unwrap();
        h.daemon.tick().await.unwrap();
        assert_eq!(h.trading.orders.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_buy_while_idle_is_rejected() {
        let mut h = Harness::new();
        h.send("ACTION=BUY\nPAIR=BTCUSDT\nSCORE=0.9\n").await;
        let status = h.status();
        assert_eq!(status.state, LifecycleState::Idle);
        assert!(status.last_error.unwrap().contains("not RUNNING"));
        assert!(h.trading.orders.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_risk_denial_surfaces_reason() {
        let mut h = Harness::new();
        h.send("ACTION=START\n").await;
        h.send("ACTION=BUY\nPAIR=ETHUSDT\nSCORE=0.9\n").await;
        assert_eq!(h.status().position_count, 1);
        assert_eq!(h.status().last_error, None);

        h.send("ACTION=SELL\nPAIR=ETHUSDT\nSCORE=-0.9\n").await;
        let err = h.status().last_error.unwrap();
        assert!(err.contains("Risk denied"), "{err}");
        assert_eq!(h.status().position_count, 1);
        assert_eq!(h.trading.orders.lock().unwrap().len(), 1);

        h.send("ACTION=BUY\nPAIR=ETHUSDT\nSCORE=0.9\n").await;
        assert!(h.status().last_error.unwrap().contains("cooldown"));
    }

    #[tokio::test]
    async fn test_auth_failure_keeps_daemon_alive() {
        let mut h = Harness::new();
        let auth = ExchangeError::Authentication {
            endpoint:   "https://api-testnet.bybit.com".into(),
            key_prefix: "abcdefgh…".into(),
            message:    "retCode=10003 API key is invalid.".into(),
        };
        h.trading.fail_listing(auth.clone());
        h.trading.fail_orders(auth);

        h.send("ACTION=START\n").await;
        let status = h.status();
        assert_eq!(status.state, LifecycleState::Running);
        assert!(status.last_error.unwrap().contains("Authentication failed"));
        assert!(!status.simulation_mode);

        h.send("ACTION=BUY\nPAIR=BTCUSDT\nSCORE=0.5\n").await;
        assert!(h.status().last_error.unwrap().contains("abcdefgh…"));
        assert_eq!(h.daemon.tracker().count(), 0);
        assert_eq!(h.daemon.risk().ledger().len(), 0);

        // still ticking, still polling the exchange
        h.daemon.tick().await.unwrap();
    }

    #[tokio::test]
    async fn test_sync_error_cleared_by_clean_sync() {
        let mut h = Harness::new();
        h.trading.fail_listing(ExchangeError::Timeout("list".into()));
        h.daemon.tick().await.unwrap();
        assert!(h.status().last_error.is_some());

        *h.trading.list_error.lock().unwrap() = None;
        h.send("ACTION=SYNC\n").await;
        assert_eq!(h.status().last_error, None);
        assert_eq!(h.status().last_command.as_deref(), Some("SYNC"));
    }

    #[tokio::test]
    async fn test_close_all_in_idle() {
        let mut h = Harness::new();
        h.send("ACTION=START\n").await;
        h.send("ACTION=BUY\nPAIR=BTCUSDT\nSCORE=0.5\n").await;
        h.send("ACTION=STOP\n").await;
        h.send("ACTION=CLOSE_ALL\n").await;

        assert_eq!(h.status().position_count, 0);
        assert_eq!(h.status().last_error, None);
        assert_eq!(h.trading.closed.lock().unwrap().as_slice(), ["BTCUSDT".to_string()]);
    }

    #[tokio::test]
    async fn test_health_check_only_refreshes_status() {
        let mut h = Harness::new();
        let before = h.status().last_update;
        h.send("ACTION=HEALTH_CHECK\n").await;
        let status = h.status();
        assert_eq!(status.state, LifecycleState::Idle);
        assert_eq!(status.last_command.as_deref(), Some("HEALTH_CHECK"));
        assert!(status.last_update >= before);
        assert!(h.trading.orders.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_simulation_mode_never_calls_trading_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let market = Arc::new(FakeMarket::new(dec!(50)));
        let clients = ExchangeClients {
            market:          market.clone(),
            trading:         Arc::new(SimulatedExchange::new()),
            endpoints:       endpoints(),
            simulation_mode: true,
        };
        let mut daemon = Daemon::with_clients(config(dir.path(), &[]), clients, Vec::new()).unwrap();
        daemon.start().unwrap();

        let inbox = CommandInbox::new(SignalPaths::under(dir.path()).command);
        for body in ["ACTION=START\n", "ACTION=SELL\nPAIR=SOLUSDT\nSCORE=-0.7\n"] {
            inbox.submit(body).unwrap();
            daemon.tick().await.unwrap();
        }

        let status = daemon.snapshot();
        assert!(status.simulation_mode);
        assert_eq!(status.position_count, 1);
        assert_eq!(status.last_error, None);
        assert!(status.last_command.unwrap().starts_with("SELL SOLUSDT"));
        assert_eq!(daemon.tracker().positions()[0].direction, Direction::Short);

        // persisted for the next simulated run
        let saved = PositionStore::new(SignalPaths::under(dir.path()).positions).load();
        assert_eq!(saved.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_credentials_selects_simulation() {
        let dir = tempfile::tempdir().unwrap();
        let mut daemon = Daemon::new(config(dir.path(), &[])).unwrap();
        daemon.start().unwrap();
        assert!(daemon.snapshot().simulation_mode);
        assert_eq!(daemon.state().lifecycle, LifecycleState::Idle);
    }

    #[tokio::test]
    async fn test_testnet_toggle_changes_private_endpoint_only() {
        let mut seen = Vec::new();
        for flag in ["0", "1"] {
            let dir = tempfile::tempdir().unwrap();
            let mut daemon = Daemon::new(config(dir.path(), &[("BYBIT_TESTNET", flag)])).unwrap();
            daemon.start().unwrap();
            let status = StatusSink::new(SignalPaths::under(dir.path()).status).read().unwrap();
            seen.push((status.public_endpoint, status.private_endpoint, status.testnet));
        }
        assert_eq!(seen[0].0, seen[1].0);
        assert_ne!(seen[0].1, seen[1].1);
        assert!(!seen[0].2 && seen[1].2);
    }

    #[tokio::test]
    async fn test_shutdown_ends_run_loop() {
        let dir = tempfile::tempdir().unwrap();
        let clients = ExchangeClients {
            market:          Arc::new(FakeMarket::new(dec!(100))),
            trading:         Arc::new(FakeTrading::new()),
            endpoints:       endpoints(),
            simulation_mode: false,
        };
        let daemon = Daemon::with_clients(config(dir.path(), &[]), clients, Vec::new()).unwrap();
        CommandInbox::new(SignalPaths::under(dir.path()).command)
            .submit(&Command::Shutdown.render(Utc::now()))
            .unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), daemon.run())
            .await
            .expect("run loop did not stop")
            .unwrap();

        let status = StatusSink::new(SignalPaths::under(dir.path()).status).read().unwrap();
        assert_eq!(status.state, LifecycleState::Terminated);
        assert!(!status.running);
    }

    #[tokio::test]
    async fn test_stale_claim_not_replayed_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SignalPaths::under(dir.path());
        std::fs::create_dir_all(&paths.signals_dir).unwrap();
        std::fs::write(
            paths.signals_dir.join("command.txt.claimed"),
            "ACTION=START\n",
        )
        .unwrap();

        let clients = ExchangeClients {
            market:          Arc::new(FakeMarket::new(dec!(100))),
            trading:         Arc::new(FakeTrading::new()),
            endpoints:       endpoints(),
            simulation_mode: false,
        };
        let mut daemon = Daemon::with_clients(config(dir.path(), &[]), clients, Vec::new()).unwrap();
        daemon.start().unwrap();
        daemon.tick().await.unwrap();
        assert_eq!(daemon.state().lifecycle, LifecycleState::Idle);
    }

    fn fake_clients() -> ExchangeClients {
        ExchangeClients {
            market:          Arc::new(FakeMarket::new(dec!(100))),
            trading:         Arc::new(FakeTrading::new()),
            endpoints:       endpoints(),
            simulation_mode: false,
        }
    }

    #[tokio::test]
    async fn test_zero_tick_from_env_still_runs() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), &[("DAEMON_TICK_MS", "0")]);
        let daemon = Daemon::with_clients(cfg, fake_clients(), Vec::new()).unwrap();
        CommandInbox::new(SignalPaths::under(dir.path()).command)
            .submit("ACTION=SHUTDOWN\n")
            .unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), daemon.run())
            .await
            .expect("run loop did not stop")
            .unwrap();
        let status = StatusSink::new(SignalPaths::under(dir.path()).status).read().unwrap();
        assert_eq!(status.state, LifecycleState::Terminated);
    }

    #[tokio::test]
    async fn test_fatal_error_writes_final_status() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SignalPaths::under(dir.path());
        let daemon = Daemon::with_clients(config(dir.path(), &[]), fake_clients(), Vec::new()).unwrap();
        // a directory where the command file should be cannot be read
        std::fs::create_dir_all(&paths.command).unwrap();

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), daemon.run())
            .await
            .expect("run loop did not stop");
        assert!(matches!(result, Err(DaemonError::CommandRead { .. })), "{result:?}");

        let status = StatusSink::new(&paths.status).read().unwrap();
        assert_eq!(status.state, LifecycleState::Terminated);
        assert!(!status.running);
        assert!(status.last_error.unwrap().contains("Cannot read command file"));
    }

    #[tokio::test]
    async fn test_slow_order_bounded_by_entry_timeout() {
        let mut h = Harness::with_env(&[("ENTRY_TIMEOUT_MS", "50")]);
        h.send("ACTION=START\n").await;
        *h.trading.order_delay.lock().unwrap() = Some(std::time::Duration::from_secs(30));

        let started = std::time::Instant::now();
        h.send("ACTION=BUY\nPAIR=ETHUSDT\nSCORE=0.9\n").await;
        assert!(started.elapsed() < std::time::Duration::from_secs(5));

        let status = h.status();
        assert_eq!(status.state, LifecycleState::Running);
        assert!(status.last_error.unwrap().contains("order placement"));
        // outcome unknown, so the symbol is held in cooldown
        assert!(h.daemon.risk().ledger().get("ETHUSDT").is_some());

        *h.trading.order_delay.lock().unwrap() = None;
        h.send("ACTION=BUY\nPAIR=ETHUSDT\nSCORE=0.9\n").await;
        assert!(h.status().last_error.unwrap().contains("cooldown"));
        assert!(h.trading.orders.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restored_positions_seed_tracker_and_simulator() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SignalPaths::under(dir.path());
        let saved = Position {
            symbol:      "BTCUSDT".into(),
            direction:   Direction::Long,
            entry_price: dec!(30000),
            size:        dec!(0.003),
            opened_at:   Utc::now(),
            stop_loss:   None,
            take_profit: None,
            entries:     2,
        };
        PositionStore::new(&paths.positions).save(&[saved]).unwrap();

        let mut daemon = Daemon::new(config(dir.path(), &[])).unwrap();
        daemon.start().unwrap();
        assert_eq!(daemon.tracker().count(), 1);

        // the simulated book agrees, so the first sync keeps it
        daemon.tick().await.unwrap();
        let status = daemon.snapshot();
        assert!(status.simulation_mode);
        assert_eq!(status.position_count, 1);
        assert_eq!(daemon.tracker().positions()[0].entries, 2);
    }
}
