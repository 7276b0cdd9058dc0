use anyhow::{Context, Result};
use clap::Parser;
use live_consult::{create_router, AppState, Config, SessionController};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "live-consult", about = "Live consultation session service")]
struct Args {
    /// Configuration file (without extension, `config` crate conventions)
    #[arg(long, default_value = "config/live-consult")]
    config: String,

    /// Override the configured bind address
    #[arg(long)]
    bind: Option<String>,

    /// Override the configured port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    let bind = args.bind.unwrap_or_else(|| cfg.service.http.bind.clone());
    let port = args.port.unwrap_or(cfg.service.http.port);

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));
    info!("Session link: {}", cfg.link.nats_url);

    let controller = SessionController::new(&cfg);
    let router = create_router(AppState::new(controller));

    let addr = format!("{}:{}", bind, port);
    info!("HTTP control API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, router)
        .await
        .context("HTTP server failed")?;

    Ok(())
}
