use std::time::Duration;

use audioguard_core::AppConfig;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use audioguard_server::{app, http, subsystems};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "audioguard.toml")]
    config: String,

    /// Check the result store and exit
    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience; production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match AppConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging; RUST_LOG wins over service.log_level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    if args.health {
        let store = match app::build_result_store(&config).await {
            Ok(s) => s,
            Err(e) => {
                println!("❌ Result store unavailable: {}", e);
                std::process::exit(1);
            }
        };
        match store.health().await {
            Ok(v) => println!("✅ {} store connected: {}", store.name(), v),
            Err(e) => {
                println!("❌ {} store health check failed: {}", store.name(), e);
                std::process::exit(1);
            }
        }
        println!("✅ AudioGuard health check passed");
        return Ok(());
    }

    tracing::info!(
        environment = %config.service.environment,
        production = config.service.is_production(),
        "Starting AudioGuard server"
    );

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        signal_shutdown.cancel();
    });

    let sweep_interval = Duration::from_secs(config.session.sweep_interval_secs.max(1));
    let state = app::build_http_state(config, shutdown.clone()).await?;

    tokio::spawn(subsystems::session_sweeper::run_session_sweeper(
        state.sessions.clone(),
        sweep_interval,
        shutdown.clone(),
    ));

    http::start_http_server(state).await?;

    Ok(())
}
