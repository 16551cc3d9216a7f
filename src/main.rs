mod cache;
mod config;
mod error;
mod monitor;
mod player;
mod playlist;
mod server;
mod tv;

use std::net::SocketAddr;

use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use crate::config::{Args, Config};
use crate::tv::Tv;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let config = Config::from(&args);
    tracing::info!("player: {} ({:?})", config.player, config.output_type);

    let client = reqwest::Client::builder().build()?;
    let tv = Tv::new(config, client);

    // A stale playlist beats an empty one when the provider is down
    if let Err(e) = tv.download(None, false).await {
        tracing::warn!("playlist refresh failed: {}", e);
        if let Err(e) = tv.load(None).await {
            tracing::warn!(
                "could not read cached playlist {}: {}",
                tv.cache().path().display(),
                e
            );
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_tv = tv.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::run_server(addr, server_tv, shutdown_rx).await {
            tracing::error!("[server] {}", e);
        }
    });

    shutdown_signal().await?;
    tracing::info!("stopping...");
    let _ = shutdown_tx.send(true);

    tv.kill().await;
    let _ = server_handle.await;

    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
