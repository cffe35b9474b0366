use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use opendx_gateway::Configuration;
use opendx_gateway::Gateway;
use opendx_gateway::server;

#[derive(Debug, Parser)]
#[command(name = "opendx-gateway", about = "Federated GraphQL data-exchange gateway")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, env = "OPENDX_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listen address from the configuration.
    #[arg(long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut configuration = match &args.config {
        Some(path) => Configuration::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Configuration::default(),
    };
    if let Some(listen) = args.listen {
        configuration.listen = listen;
    }
    let listen = configuration.listen;

    let gateway = Arc::new(Gateway::new(configuration).context("building the gateway")?);
    match gateway.active_sdl() {
        Ok(_) => tracing::info!("unified schema resolved"),
        Err(error) => tracing::warn!(
            %error,
            "no unified schema available yet; queries will fail until one is activated"
        ),
    }

    let app = server::router(gateway);
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    tracing::info!(%listen, "gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "could not install the shutdown signal handler");
    }
}
