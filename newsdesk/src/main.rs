/*
newsdesk - server main.rs
Loads configuration, wires the NewsAPI gateway, cache and persister into the
command router, then serves the line protocol until Ctrl-C.
*/

use anyhow::Result;
use clap::Parser;
use common::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use newsdesk::cache::CacheStore;
use newsdesk::gateway::newsapi::NewsApiGateway;
use newsdesk::persist::ResponsePersister;
use newsdesk::router::CommandRouter;
use newsdesk::server::Server;

#[derive(Parser, Debug)]
#[command(name = "newsdesk", about = "News headline and source catalog server")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the listening host
    #[arg(long)]
    host: Option<String>,

    /// Override the listening port
    #[arg(long)]
    port: Option<u16>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    // NEWSAPI_KEY may live in a local .env
    dotenv::dotenv().ok();

    let default_path = PathBuf::from("config.default.toml");
    let override_path = if let Some(p) = args.config {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() { Some(p) } else { None }
    };

    let mut config = match Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        override_path.as_deref(),
    )
    .await
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(%e, "failed to load configuration");
            return Err(e);
        }
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    info!(default = ?default_path, override = ?override_path, "configuration loaded");

    let gateway = match NewsApiGateway::from_config(&config.newsapi) {
        Ok(gw) => Arc::new(gw),
        Err(e) => {
            error!(%e, "failed to initialize NewsAPI gateway");
            return Err(e);
        }
    };
    let cache = Arc::new(CacheStore::new(config.cache.ttl()));
    let persister = ResponsePersister::from_config(&config.output);
    info!(dir = %persister.dir().display(), ttl_secs = config.cache.ttl_seconds, "router ready");
    let router = Arc::new(CommandRouter::new(cache, gateway, persister));

    let shutdown = CancellationToken::new();
    let server = Server::bind(config.server.clone(), router, shutdown.clone()).await?;

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("ctrl-c received, shutting down"),
            Err(e) => error!(%e, "failed to listen for ctrl-c; shutting down"),
        }
        signal_token.cancel();
    });

    if let Err(e) = server.run().await {
        error!(%e, "server failed");
        return Err(e);
    }

    info!("Shutdown complete");
    Ok(())
}
