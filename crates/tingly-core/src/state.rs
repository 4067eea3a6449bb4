use std::sync::Arc;

use tingly_balance::{Router, StatsStore};
use tingly_client::ClientPool;

use crate::auth::AuthProvider;
use crate::config::{GatewayConfig, SharedConfig};
use crate::obs::ScenarioSink;

/// Everything the handlers need, shared behind one `Arc`.
pub struct AppState {
    pub config: SharedConfig,
    pub router: Router,
    pub stats: Arc<StatsStore>,
    pub clients: Arc<ClientPool>,
    pub auth: Arc<dyn AuthProvider>,
    pub obs: Arc<ScenarioSink>,
}

impl AppState {
    pub fn new(
        config: GatewayConfig,
        stats: Arc<StatsStore>,
        clients: Arc<ClientPool>,
        auth: Arc<dyn AuthProvider>,
        obs: Arc<ScenarioSink>,
    ) -> Self {
        let router = Router::new(stats.clone());
        router.refresh(&config.providers, &config.rules);
        Self {
            config: SharedConfig::new(config),
            router,
            stats,
            clients,
            auth,
            obs,
        }
    }

    /// Swap in a new config snapshot and republish the routing table.
    pub fn reload(&self, config: GatewayConfig) {
        self.router.refresh(&config.providers, &config.rules);
        self.config.store(config);
    }
}
