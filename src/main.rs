use std::sync::Arc;

use clap::Parser;
use masque::config::Cli;
use masque::engine::MemoryEngine;
use masque::server::{Server, ServerContext};
use masque::wire::OidCache;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = cli.load_config()?;

    let oids = Arc::new(OidCache::new());
    let engine = Arc::new(
        MemoryEngine::new(oids.clone()).with_databases(config.databases.iter().cloned()),
    );
    let context = Arc::new(ServerContext::from_config(&config, oids)?);

    let listener = TcpListener::bind(config.listen).await?;
    info!(
        addr = %listener.local_addr()?,
        auth = ?context.auth_method,
        tls = context.tls_acceptor.is_some(),
        "masque listening"
    );

    let server = Server::new(listener, engine, context);
    server.serve().await?;

    Ok(())
}
