use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pulse_core::PulseConfig;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use pulse_server::http::{self, HttpState};
use pulse_server::subsystems::dispatcher::NotificationDispatcher;
use pulse_server::subsystems::expiry::{run_expiry_loop, ExpirySweeper};
use pulse_server::subsystems::ingest::ReportProcessor;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "pulse.toml")]
    config: String,

    /// Check the configured store and exit
    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional; deployments set real env vars
    dotenvy::dotenv().ok();

    let args = Args::parse();

    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = match PulseConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    if args.health {
        match &config.database {
            Some(db) => {
                let pool = pulse_core::db::create_pool(db).await?;
                match pulse_core::db::health_check(&pool).await {
                    Ok(v) => println!("✅ PostgreSQL connected: {}", v),
                    Err(e) => {
                        println!("❌ PostgreSQL connection failed: {}", e);
                        std::process::exit(1);
                    }
                }
            }
            None => println!("✅ No database configured, using in-memory store"),
        }
        println!("✅ Pulse health check passed");
        return Ok(());
    }

    let store = match pulse_server::open_store(&config).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to open store: {}", e);
            std::process::exit(1);
        }
    };

    let dispatcher = Arc::new(NotificationDispatcher::from_config(&config.notification)?);
    if !dispatcher.is_enabled() {
        tracing::info!("No webhook_url configured, notifications disabled");
    }
    let processor = Arc::new(ReportProcessor::new(store.clone(), dispatcher.clone()));

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    let sweeper = tokio::spawn(run_expiry_loop(
        ExpirySweeper::new(store.clone()),
        Duration::from_secs(config.sweeper.interval_seconds),
        tx.subscribe(),
    ));

    let state = Arc::new(HttpState::new(processor));
    let served = http::start_http_server(state, &config.http, tx.subscribe()).await;

    // Stop the sweeper too if the server exited on its own.
    let _ = tx.send(());
    if let Err(e) = sweeper.await {
        tracing::error!("Expiry sweeper task failed: {}", e);
    }

    let drain = Duration::from_secs(config.notification.shutdown_timeout_seconds);
    if let Err(e) = dispatcher.shutdown(drain).await {
        tracing::warn!("{}", e);
    }

    served
}
