use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use tingly_balance::{Provider, Rule};
use tingly_transform::TokenBudget;

fn default_true() -> bool {
    true
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8712
}

/// Per-(provider, model) output ceiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCap {
    pub provider: String,
    pub model: String,
    pub max_tokens: u32,
}

/// Everything the external configuration collaborator feeds the gateway.
/// Published as an immutable snapshot; a reload swaps the whole value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub providers: Vec<Provider>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,
    #[serde(default)]
    pub model_caps: Vec<ModelCap>,
    #[serde(default = "default_true")]
    pub adapter_enabled: bool,
    #[serde(default)]
    pub observation_enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            rules: Vec::new(),
            default_max_tokens: default_max_tokens(),
            model_caps: Vec::new(),
            adapter_enabled: true,
            observation_enabled: false,
            host: default_host(),
            port: default_port(),
        }
    }
}

impl GatewayConfig {
    /// Providers are stored by uuid; the cap table keys on provider name as
    /// well so either identifier works.
    pub fn token_budget(&self) -> TokenBudget {
        let mut budget = TokenBudget::new(self.default_max_tokens);
        for cap in &self.model_caps {
            budget.set_cap(cap.provider.clone(), cap.model.clone(), cap.max_tokens);
        }
        budget
    }
}

/// Lock-free reads of the current config snapshot.
pub struct SharedConfig {
    inner: ArcSwap<GatewayConfig>,
}

impl SharedConfig {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            inner: ArcSwap::from_pointee(config),
        }
    }

    pub fn load(&self) -> Arc<GatewayConfig> {
        self.inner.load_full()
    }

    pub fn store(&self, config: GatewayConfig) {
        self.inner.store(Arc::new(config));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_json_fills_defaults() {
        let config: GatewayConfig = serde_json::from_str("{}").unwrap();
        assert!(config.adapter_enabled);
        assert!(!config.observation_enabled);
        assert_eq!(config.default_max_tokens, 4096);
        assert_eq!(config.port, 8712);
    }

    #[test]
    fn budget_reflects_caps() {
        let mut config = GatewayConfig::default();
        config.model_caps.push(ModelCap {
            provider: "openai-a".to_string(),
            model: "gpt-4o-2024".to_string(),
            max_tokens: 2048,
        });
        let budget = config.token_budget();
        assert_eq!(budget.cap_for("openai-a", "gpt-4o-2024"), Some(2048));
        assert_eq!(budget.cap_for("openai-a", "other"), None);
    }
}
