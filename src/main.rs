use clap::Parser;
use solarb::api::{JupiterClient, RelayClient, RpcClient};
use solarb::config::Settings;
use solarb::db::Database;
use solarb::execution::{shared_rate_limiter, EngineConfig, ExecutionEngine};
use solarb::orchestrator::{EngineState, Orchestrator};
use solarb::risk::RiskLevel;
use tokio::time::Duration;

/// Risk-gated multi-leg arbitrage execution engine
#[derive(Parser, Debug)]
#[command(name = "solarb", version)]
struct Cli {
    /// Path to a Settings.toml (defaults to ./Settings.toml when present)
    #[arg(long)]
    config: Option<String>,

    /// Override the configured risk profile: conservative | moderate | aggressive
    #[arg(long)]
    risk_level: Option<String>,

    /// Simulate every swap without broadcasting
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> solarb::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(level) = cli.risk_level.as_deref() {
        settings.trading.risk_level = parse_risk_level(level)?;
    }
    if cli.dry_run {
        settings.trading.dry_run = true;
    }

    tracing::info!("🚀 solarb starting");
    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Capital: ${:.2}", settings.trading.capital_usd);
    tracing::info!("  Risk profile: {:?}", settings.trading.risk_level);
    tracing::info!("  Base asset: {}", settings.trading.base_symbol);
    tracing::info!("  Relay endpoints: {}", settings.relay.endpoints.len());
    tracing::info!("  Dry run: {}", settings.trading.dry_run);
    for (name, enabled) in &settings.strategies {
        tracing::info!("    - {} ({})", name, if *enabled { "enabled" } else { "disabled" });
    }

    let db = connect_database(&settings).await;

    let engine = ExecutionEngine::new(
        JupiterClient::new(settings.quoter.base_url.clone()),
        RpcClient::new(settings.rpc.url.clone(), settings.rpc.commitment.clone()),
        RelayClient::new(settings.relay.endpoints.clone()),
        shared_rate_limiter(settings.quoter.requests_per_second),
        EngineConfig::from_settings(&settings),
    );

    let orchestrator = Orchestrator::new(settings, engine, db).await;

    // Opportunity producers register here; the engine runs the recovery
    // sweep and housekeeping even with none attached.
    tracing::info!("No strategy producers compiled in, running gate + recovery only");

    orchestrator.start();
    tracing::info!("✅ Engine started. Press Ctrl+C to stop...\n");

    tokio::signal::ctrl_c().await?;
    tracing::info!("\n⚠️  Received Ctrl+C, shutting down gracefully...");
    orchestrator.stop();

    // Let the in-flight tick finish; open positions stay on the book for
    // the next run's recovery sweep
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    while orchestrator.state() != EngineState::Stopped {
        if tokio::time::Instant::now() > deadline {
            tracing::warn!("Shutdown deadline reached, exiting anyway");
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    tracing::info!("👋 solarb stopped");
    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("solarb=info")),
        )
        .init();
}

fn parse_risk_level(value: &str) -> solarb::Result<RiskLevel> {
    match value.to_ascii_lowercase().as_str() {
        "conservative" => Ok(RiskLevel::Conservative),
        "moderate" => Ok(RiskLevel::Moderate),
        "aggressive" => Ok(RiskLevel::Aggressive),
        other => Err(format!("unknown risk level '{}'", other).into()),
    }
}

async fn connect_database(settings: &Settings) -> Option<Database> {
    let url = settings.database_url.clone()?;
    match Database::connect(&url).await {
        Ok(db) => Some(db),
        Err(e) => {
            tracing::warn!(
                "Failed to connect to Postgres ({}), continuing without persistence",
                e
            );
            None
        }
    }
}
