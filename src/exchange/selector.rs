//! # exchange::selector — Environment selection
//!
//! Turns the resolved config into the pair of collaborators the daemon runs
//! with. Missing trading credentials is never fatal: the daemon comes up in
//! simulation mode and says so in every status snapshot.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::DaemonConfig;
use crate::error::ClientError;
use crate::exchange::{BybitClient, MarketData, SimulatedExchange, TradingClient};
use crate::models::Position;

/// Endpoints reported in the status file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoints {
    pub public:  String,
    pub private: String,
    pub testnet: bool,
}

pub struct ExchangeClients {
    pub market:          Arc<dyn MarketData>,
    pub trading:         Arc<dyn TradingClient>,
    pub endpoints:       ResolvedEndpoints,
    pub simulation_mode: bool,
}

/// Build both clients. `restored` seeds the simulator when trading is simulated.
pub fn select_clients(
    config:   &DaemonConfig,
    restored: Vec<Position>,
) -> Result<ExchangeClients, ClientError> {
    let ep = &config.endpoints;
    let endpoints = ResolvedEndpoints {
        public:  ep.public_base_url.clone(),
        private: ep.private_base_url.clone(),
        testnet: ep.testnet,
    };

    let market: Arc<dyn MarketData> =
        Arc::new(BybitClient::public(&ep.public_base_url, ep.request_timeout)?);

    let trading: Arc<dyn TradingClient> = match &ep.credentials {
        Some(creds) => match BybitClient::authenticated(
            &ep.private_base_url,
            creds.clone(),
            ep.request_timeout,
            ep.recv_window_ms,
        ) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                warn!(
                    endpoint   = %ep.private_base_url,
                    key_prefix = %creds.key_prefix(),
                    error      = %e,
                    "⚠️ Trading client failed to build — falling back to SIMULATION"
                );
                Arc::new(SimulatedExchange::with_positions(restored))
            }
        },
        None => {
            let missing = ClientError::CredentialsMissing {
                key_env:    ep.key_env,
                secret_env: ep.secret_env,
            };
            warn!(
                endpoint = %ep.private_base_url,
                testnet  = ep.testnet,
                "⚠️ {missing} — running in SIMULATION mode"
            );
            Arc::new(SimulatedExchange::with_positions(restored))
        }
    };

    let simulation_mode = trading.is_simulated();
    info!(
        public     = %endpoints.public,
        private    = %endpoints.private,
        testnet    = endpoints.testnet,
        simulation = simulation_mode,
        "🔌 Exchange endpoints resolved"
    );

    Ok(ExchangeClients { market, trading, endpoints, simulation_mode })
}
