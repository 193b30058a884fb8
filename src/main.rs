use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use mnq_agent::{AgentConfig, ExecutionMode, TradingAgent};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Execution mode: simulation, paper, or live
    #[arg(short, long, env = "MNQ_MODE", default_value = "simulation")]
    mode: ExecutionMode,

    /// Contract local symbol (base + month code + year digit)
    #[arg(short, long, env = "MNQ_CONTRACT", default_value = "MNQH6")]
    contract: String,

    /// TWS/Gateway host
    #[arg(long, env = "IB_HOST", default_value = "127.0.0.1")]
    host: String,

    /// TWS/Gateway port (paper: 7497, live: 7496)
    #[arg(long, env = "IB_PORT", default_value = "7497")]
    port: u16,

    /// Client ID (must be unique per connection)
    #[arg(long, env = "IB_CLIENT_ID", default_value = "1")]
    client_id: i32,

    /// Starting account equity in USD
    #[arg(long, env = "MNQ_EQUITY", default_value = "100000")]
    equity: f64,

    /// Fraction of equity risked per trade
    #[arg(long, env = "MNQ_RISK_PCT", default_value = "0.01")]
    risk_pct: f64,

    /// Maximum contracts per position
    #[arg(long, env = "MNQ_MAX_POSITION", default_value = "10")]
    max_position: i32,

    /// Tick interval in seconds
    #[arg(long, env = "MNQ_POLL_SECS", default_value = "60")]
    poll_secs: u64,

    /// Data directory for bar files
    #[arg(long, env = "MNQ_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Optional signal config version file (JSON)
    #[arg(long, env = "MNQ_SIGNAL_CONFIG")]
    signal_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mnq_agent=info".parse().unwrap())
                .add_directive("ibapi=warn".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    // Base symbol is the local symbol minus the month code and year digit
    // (MNQH6 -> MNQ)
    let symbol = if args.contract.len() > 2 {
        args.contract[..args.contract.len() - 2].to_string()
    } else {
        args.contract.clone()
    };

    let config = AgentConfig {
        mode: args.mode,
        symbol,
        local_symbol: args.contract.clone(),
        starting_equity: args.equity,
        risk_pct: args.risk_pct,
        max_position_size: args.max_position,
        poll_interval_secs: args.poll_secs,
        historical_path: args.data_dir.join("historical_1m.csv"),
        live_path: args.data_dir.join("live_1m.csv"),
        signal_config_path: args.signal_config,
        host: args.host,
        port: args.port,
        client_id: args.client_id,
        ..Default::default()
    };

    info!("Starting MNQ trading agent");
    info!("Contract: {} | Mode: {}", config.local_symbol, config.mode);

    let mut agent = TradingAgent::new(config)?;
    agent.run().await
}
