use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tingly_balance::StatsStore;
use tingly_client::{ClientPool, TransportPool};
use tingly_core::{AppState, GatewayConfig, ScenarioSink, StaticTokenAuth};

#[derive(Debug, Parser)]
#[command(name = "tingly", version, about = "Multi-provider LLM gateway")]
struct CliArgs {
    /// Path to the gateway config file (providers, rules, caps).
    #[arg(long, env = "TINGLY_CONFIG", default_value = "tingly.json")]
    config: PathBuf,

    /// Data directory for stats and scenario records.
    #[arg(long, env = "TINGLY_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Bind host; overrides the config file.
    #[arg(long, env = "TINGLY_HOST")]
    host: Option<String>,

    /// Bind port; overrides the config file.
    #[arg(long, env = "TINGLY_PORT")]
    port: Option<u16>,

    /// Inbound bearer token(s); repeatable. Empty disables the check.
    #[arg(long = "token", env = "TINGLY_TOKEN")]
    tokens: Vec<String>,

    /// Enable request format adaptation between chat protocols.
    #[arg(long, env = "TINGLY_ADAPTER")]
    adapter: Option<bool>,

    /// Enable scenario request/response recording.
    #[arg(long, env = "TINGLY_RECORD")]
    record: Option<bool>,

    /// Log upstream request/response bodies at debug level.
    #[arg(long, env = "TINGLY_DEBUG_UPSTREAM", default_value_t = false)]
    debug_upstream: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();
    let mut config = load_config(&args.config)?;
    if let Some(host) = args.host.clone() {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(adapter) = args.adapter {
        config.adapter_enabled = adapter;
    }
    if let Some(record) = args.record {
        config.observation_enabled = record;
    }

    let stats = Arc::new(
        StatsStore::open(&args.data_dir)
            .await
            .context("open stats store")?,
    );
    stats
        .hydrate_rules(&config.rules)
        .await
        .context("hydrate service stats")?;

    let transports = Arc::new(TransportPool::new());
    let clients = Arc::new(ClientPool::new(transports, args.debug_upstream));
    let auth = Arc::new(StaticTokenAuth::new(args.tokens.clone()));
    let obs = Arc::new(ScenarioSink::new(
        &args.data_dir,
        config.observation_enabled,
    ));

    let bind = format!("{}:{}", config.host, config.port);
    info!(
        event = "gateway_starting",
        bind = %bind,
        providers = config.providers.len(),
        rules = config.rules.len(),
        adapter = config.adapter_enabled,
        record = config.observation_enabled,
    );

    let state = Arc::new(AppState::new(config, stats, clients, auth, obs));
    let app = tingly_core::app(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    axum::serve(listener, app).await.context("serve")?;
    Ok(())
}

fn load_config(path: &PathBuf) -> anyhow::Result<GatewayConfig> {
    match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .with_context(|| format!("parse config {}", path.display())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            info!(event = "config_missing", path = %path.display());
            Ok(GatewayConfig::default())
        }
        Err(err) => Err(err).with_context(|| format!("read config {}", path.display())),
    }
}
