//! Paddle Arena Server
//!
//! Binds the WebSocket listener and runs until Ctrl-C.

use std::sync::Arc;
use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use paddle_arena::{
    network::{
        AuthConfig, GameServer, GuestIdentityStore, IdentityStore, JwtIdentityStore, ServerConfig,
        TracingResultSink,
    },
    TICK_RATE, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();
    info!("Paddle Arena Server v{}", VERSION);
    info!("Tick Rate: {} Hz (default {})", config.tick_rate, TICK_RATE);

    let auth = AuthConfig::from_env();
    let identities: Arc<dyn IdentityStore> = if auth.is_configured() {
        Arc::new(JwtIdentityStore::new(auth))
    } else {
        warn!("no AUTH_SECRET or AUTH_PUBLIC_KEY_PEM set; accepting guest tokens");
        Arc::new(GuestIdentityStore)
    };

    let server = Arc::new(GameServer::new(config, identities, Arc::new(TracingResultSink)));

    let signal_server = Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received");
            signal_server.shutdown();
        }
    });

    server.run().await.context("game server failed")?;
    info!("server stopped");
    Ok(())
}
