//! Pulsecast server
//!
//! Run with: cargo run -- serve --demo-interval-ms 1000
//!
//! # Configuration
//!
//! Settings come from `--config`, then the default config locations, then
//! environment variables:
//! - `PULSECAST_HOST`, `PULSECAST_PORT`, `PULSECAST_MAX_CONNECTIONS`
//! - `PULSECAST_LOG_LEVEL`, `PULSECAST_LOG_FORMAT`
//! - `RUST_LOG`: overrides the log filter entirely

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use pulsecast::config::{generate_default_config, Config};
use pulsecast::events::{
    AiInsight, Allocation, DashboardSnapshot, NewsUpdate, PortfolioSummary, RiskMetrics,
};
use pulsecast::{
    BreachDirection, CrossContextDispatcher, EventServer, PortfolioTiering, ThresholdBreach,
    UpdateTier,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "pulsecast")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Real-time event distribution over WebSocket")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the WebSocket server
    Serve {
        /// Interface to bind
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (0 picks a free port)
        #[arg(short, long)]
        port: Option<u16>,
        /// Publish synthetic analytics at this interval
        #[arg(long)]
        demo_interval_ms: Option<u64>,
    },

    /// Print the default config file
    InitConfig,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::InitConfig => {
            print!("{}", generate_default_config());
            Ok(())
        }
        Commands::Serve {
            host,
            port,
            demo_interval_ms,
        } => {
            // Logging is not up yet; the chosen source is reported once it is
            let source = cli.config.clone().or_else(Config::default_path);
            let mut config = match &source {
                Some(path) => Config::load_with_env(path)?,
                None => Config::from_env(),
            };
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            serve(config, source, demo_interval_ms.map(Duration::from_millis))
        }
    }
}

fn serve(
    config: Config,
    source: Option<PathBuf>,
    demo_interval: Option<Duration>,
) -> anyhow::Result<()> {
    pulsecast::logging::init(&config.logging)?;
    tracing::info!("Starting Pulsecast v{}", env!("CARGO_PKG_VERSION"));
    match &source {
        Some(path) => tracing::info!("Loaded config from {:?}", path),
        None => tracing::info!("Using default config with environment overrides"),
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .context("Failed to install Ctrl-C handler")?;

    let mut server = EventServer::new(config.server.clone());
    let addr = server.start()?;
    tracing::info!("Accepting WebSocket clients on ws://{}", addr);

    let producer = match demo_interval {
        Some(interval) => {
            let dispatcher = server.dispatcher();
            let tiering = PortfolioTiering::from_config(&config.significance);
            let stop = Arc::clone(&interrupted);
            Some(
                thread::Builder::new()
                    .name("pulsecast-demo".to_string())
                    .spawn(move || run_demo(dispatcher, tiering, interval, stop))
                    .context("Failed to spawn demo producer")?,
            )
        }
        None => None,
    };

    while !interrupted.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
    }

    tracing::info!("Shutting down...");
    if let Some(producer) = producer {
        if producer.join().is_err() {
            tracing::error!("Demo producer panicked");
        }
    }
    server.stop();

    tracing::info!("Pulsecast shutdown complete");
    Ok(())
}

/// Synthetic producer: a drifting portfolio plus an occasional volatility breach
fn run_demo(
    dispatcher: CrossContextDispatcher,
    mut tiering: PortfolioTiering,
    interval: Duration,
    stop: Arc<AtomicBool>,
) {
    let mut tick: u64 = 0;
    while !stop.load(Ordering::SeqCst) {
        let snapshot = demo_snapshot(tick);
        let tier = tiering.publish(&snapshot, &dispatcher, Instant::now());
        if tier != UpdateTier::Skip {
            tracing::debug!(
                tick,
                ?tier,
                clients = dispatcher.connected_clients(),
                "Published analytics"
            );
        }

        if snapshot.risk.volatility > 0.25 && tick % 10 == 0 {
            dispatcher.broadcast_threshold_breach(ThresholdBreach {
                symbol: "PORT".to_string(),
                metric: "realized_vol".to_string(),
                value: snapshot.risk.volatility,
                threshold: 0.25,
                direction: BreachDirection::Above,
                detected_at: Utc::now(),
            });
        }

        tick += 1;
        thread::sleep(interval);
    }
}

fn demo_snapshot(tick: u64) -> DashboardSnapshot {
    let phase = tick as f64 / 20.0;
    let total_value = 100_000.0 * (1.0 + 0.03 * phase.sin());
    let pnl = total_value - 100_000.0;
    let volatility = 0.2 + 0.08 * (phase / 3.0).sin();
    let now = Utc::now();

    DashboardSnapshot {
        summary: PortfolioSummary {
            portfolio_id: "demo".to_string(),
            total_value,
            pnl,
            pnl_pct: pnl / 1_000.0,
            cash: 10_000.0,
            positions_count: 2,
        },
        risk: RiskMetrics {
            volatility,
            sharpe_ratio: 1.2 + 0.3 * phase.cos(),
            value_at_risk: total_value * volatility * 0.1,
            beta: 1.0,
            max_drawdown: -0.05,
        },
        allocations: vec![
            Allocation {
                name: "equities".to_string(),
                weight: 0.6,
                market_value: (total_value - 10_000.0) * 0.6,
            },
            Allocation {
                name: "bonds".to_string(),
                weight: 0.4,
                market_value: (total_value - 10_000.0) * 0.4,
            },
        ],
        news: vec![NewsUpdate {
            headline: format!("Market update #{}", tick / 60),
            source: "demo".to_string(),
            url: None,
            symbols: vec!["SPY".to_string()],
            sentiment: Some(phase.sin()),
            published_at: now,
        }],
        insights: vec![AiInsight {
            title: "Volatility regime".to_string(),
            body: format!("Realized volatility at {:.1}%", volatility * 100.0),
            confidence: 0.6,
            related_symbols: vec![],
            generated_at: now,
        }],
        as_of: now,
    }
}
