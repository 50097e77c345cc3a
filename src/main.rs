use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

use hopgate_core::{Config, GeoIpDb, RulesConfig};
use hopgate_proxy::{Engine, Rules};

#[derive(Parser)]
#[command(name = "hopgated", version, about = "Rule-driven multi-protocol forwarding proxy")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proxy in the foreground.
    Serve {
        /// Path to the proxy config (global, latency probe, proxy list).
        #[arg(long, default_value = "config.json")]
        config: PathBuf,

        /// Path to the routing rules (routes + groups).
        #[arg(long, default_value = "rules.json")]
        rules: PathBuf,

        /// HTTP/CONNECT inbound listener address.
        #[arg(long, default_value = "0.0.0.0:8998")]
        http_addr: SocketAddr,

        /// SOCKS5 inbound listener address.
        #[arg(long, default_value = "0.0.0.0:8999")]
        socks_addr: SocketAddr,

        /// Launch the terminal dashboard alongside the listeners.
        #[arg(long)]
        dashboard: bool,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hopgated=info,hopgate_proxy=info,hopgate_inbound=info".into()),
        )
        .init();
}

/// Spawns a task that listens for Ctrl+C and SIGTERM, then cancels the token.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => info!("received Ctrl+C, shutting down"),
                _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("received Ctrl+C, shutting down");
        }
        shutdown.cancel();
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let Cli {
        command: Commands::Serve {
            config,
            rules,
            http_addr,
            socks_addr,
            dashboard,
        },
    } = Cli::parse();

    let config = Config::load(&config)?;
    let rules_config = RulesConfig::load(&rules)?;
    let geoip_db = config.geoip_path.as_deref().and_then(GeoIpDb::open);
    let rules = Rules::build(&rules_config, geoip_db);
    let engine = Engine::new(&config, rules).await?;

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    // Each listener owns its own task — unlike a single shared counter,
    // a panic or bind failure in one never silently starves the others.
    let http_handle = tokio::spawn(hopgate_inbound::http::serve(
        engine.clone(),
        http_addr,
        shutdown.clone(),
    ));
    let socks_handle = tokio::spawn(hopgate_inbound::socks5::serve(
        engine.clone(),
        socks_addr,
        shutdown.clone(),
    ));

    info!(%http_addr, %socks_addr, "hopgate listening");

    let dashboard_handle = dashboard.then(|| {
        let engine = Arc::clone(&engine);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { hopgate_dashboard::run(engine, shutdown).await })
    });

    let (http_result, socks_result) = tokio::join!(http_handle, socks_handle);
    http_result??;
    socks_result??;

    if let Some(handle) = dashboard_handle {
        handle.await??;
    }

    Ok(())
}
