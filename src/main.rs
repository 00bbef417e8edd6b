//! Hedged entry-execution engine entry point.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use polymarket_hedge::config::Config;
use polymarket_hedge::hedge::HedgeStrategy;
use polymarket_hedge::metrics;
use polymarket_hedge::replay::{load_ticks, ReplayTick, Replayer};
use polymarket_hedge::trading::PaperGateway;

/// Hedged entry-execution engine for Polymarket UP/DOWN cycle markets.
#[derive(Parser, Debug)]
#[command(name = "polymarket-hedge")]
#[command(about = "Momentum entries with bounded passive hedges on 15-minute UP/DOWN markets")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Trade a live book feed read as JSON lines from stdin (default).
    Run,

    /// Replay a recorded tick file against the paper gateway.
    Replay {
        /// JSON-lines tick file.
        #[arg(short, long)]
        file: PathBuf,

        /// Playback speed (1.0 = real time, 0 = no pauses).
        #[arg(short, long, default_value = "1.0")]
        speed: f64,
    },

    /// Check configuration validity.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("polymarket_hedge=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    if args.json_logs {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    match args.command {
        Some(Command::CheckConfig) => cmd_check_config(),
        Some(Command::Replay { file, speed }) => cmd_replay(file, speed).await,
        Some(Command::Run) | None => cmd_run().await,
    }
}

/// Load and validate configuration.
fn load_config() -> anyhow::Result<Config> {
    info!("Loading configuration...");
    let config = Config::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(anyhow::anyhow!("Configuration validation failed: {}", e));
    }
    Ok(config)
}

/// Register metrics and start the Prometheus listener if configured.
fn init_observability(config: &Config) -> anyhow::Result<()> {
    if let Some(port) = config.metrics_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        info!("Prometheus exporter listening on {}", addr);
    }
    metrics::init_metrics();
    Ok(())
}

fn log_settings(config: &Config) {
    info!("Mode: {}", if config.dry_run { "DRY RUN (paper)" } else { "LIVE" });
    info!("Order size: {} shares", config.order_size);
    info!("Hedge offset: {}¢", config.hedge_offset_cents);
    info!(
        "Unhedged max: {}s, reorder every {}s",
        config.unhedged_max_seconds, config.hedge_reorder_interval_seconds
    );
    info!("Liquidation policy: {}", config.liquidation_policy);
    info!("Signal: {} ({}¢ over {}s)", config.signal_mode, config.min_move_cents, config.window_seconds);
}

/// Check configuration validity.
fn cmd_check_config() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("POLYMARKET HEDGE ENGINE - CONFIGURATION CHECK");
    println!("======================================================================");

    print!("Loading configuration... ");
    let config = match Config::load() {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration load failed"));
        }
    };

    print!("Validating configuration... ");
    match config.validate() {
        Ok(()) => println!("OK"),
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration validation failed"));
        }
    }

    let t = config.hedge_thresholds();
    println!();
    println!("Order size:            {} shares", config.order_size);
    println!("Min notional / shares: ${} / {}", t.min_order_notional, t.min_share_size);
    println!("Over-hedge policy:     {:?}", t.over_hedge);
    println!("Hedge offset:          {}¢", t.hedge_offset_cents);
    println!("Reorder interval:      {:?}", t.reorder_interval);
    println!("Unhedged max:          {:?}", t.unhedged_max);
    println!("Stop loss:             {:?}", t.stop_loss_cents);
    println!("Liquidation policy:    {}", t.liquidation);
    println!("Signal mode:           {}", config.signal_mode);
    println!("Dry run:               {}", config.dry_run);
    println!();
    println!("Configuration OK");
    Ok(())
}

/// Replay a recorded tick file.
async fn cmd_replay(file: PathBuf, speed: f64) -> anyhow::Result<()> {
    let config = load_config()?;
    init_observability(&config)?;
    log_settings(&config);

    let ticks = load_ticks(&file).await?;
    info!("Loaded {} ticks from {}", ticks.len(), file.display());

    let gateway = Arc::new(PaperGateway::new());
    let strategy = HedgeStrategy::new(&config, gateway.clone());

    let summary = Replayer::new(&strategy, &gateway, speed).run(ticks).await;
    strategy.shutdown().await;

    println!("{summary}");
    Ok(())
}

/// Trade book snapshots streamed on stdin until EOF or Ctrl+C.
async fn cmd_run() -> anyhow::Result<()> {
    let config = load_config()?;
    init_observability(&config)?;
    log_settings(&config);

    if !config.dry_run {
        warn!("No live gateway is wired in this build, trading on the paper gateway");
    }

    let gateway = Arc::new(PaperGateway::new());
    let strategy = HedgeStrategy::new(&config, gateway.clone());
    let mut replayer = Replayer::new(&strategy, &gateway, 0.0);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    info!("Reading book snapshots from stdin");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("Feed closed");
                    break;
                };
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                match serde_json::from_str::<ReplayTick>(line) {
                    Ok(tick) => replayer.step(&tick).await,
                    Err(e) => warn!(error = %e, "Skipping malformed snapshot"),
                }
            }
        }
    }

    let summary = replayer.finish();
    strategy.shutdown().await;
    println!("{summary}");
    Ok(())
}
