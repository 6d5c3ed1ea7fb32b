//! WebSocket Game Server
//!
//! Async WebSocket server for multiplayer connections. Each socket gets a
//! reader loop and a writer task joined by a bounded channel; decoded
//! messages go to the [`router`](crate::network::router).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

use crate::ai::Difficulty;
use crate::game::config::{FruitFrequency, MatchSettings};
use crate::network::auth::IdentityStore;
use crate::network::connection::{ConnectionId, DuplicatePolicy, Location};
use crate::network::context::ServerContext;
use crate::network::persistence::ResultSink;
use crate::network::protocol::{ClientMessage, ErrorCode, ServerMessage};
use crate::network::router;

/// Outbound messages buffered per connection.
const OUTBOUND_BUFFER: usize = 64;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Tick rate for room simulation (Hz).
    pub tick_rate: u32,
    /// Settings for quick matches and lobbies that send none.
    pub default_settings: MatchSettings,
    /// Bot difficulty when a request names none.
    pub bot_difficulty: Difficulty,
    /// What `authenticate` does with a second connection.
    pub duplicate_policy: DuplicatePolicy,
    /// Longest a player waits in a quick-match queue.
    pub queue_timeout: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            tick_rate: crate::TICK_RATE,
            default_settings: MatchSettings::default(),
            bot_difficulty: Difficulty::default(),
            duplicate_policy: DuplicatePolicy::default(),
            queue_timeout: Duration::from_secs(300),
            version: crate::VERSION.to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by environment variables. Unparseable values are
    /// logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(addr) = env_parsed::<SocketAddr>("BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(max) = env_parsed::<usize>("MAX_CONNECTIONS") {
            config.max_connections = max;
        }
        if let Some(rate) = env_parsed::<u32>("TICK_RATE").filter(|r| *r > 0) {
            config.tick_rate = rate;
        }
        if let Some(secs) = env_parsed::<u64>("QUEUE_TIMEOUT_SECS") {
            config.queue_timeout = Duration::from_secs(secs);
        }
        if let Some(difficulty) = env_with("BOT_DIFFICULTY", Difficulty::parse) {
            config.bot_difficulty = difficulty;
        }
        if let Some(policy) = env_with("DUPLICATE_POLICY", DuplicatePolicy::parse) {
            config.duplicate_policy = policy;
        }

        let mut settings = config.default_settings;
        if let Some(lives) = env_parsed::<u32>("DEFAULT_LIVES") {
            settings.lives = lives;
        }
        if let Some(frequency) = env_with("FRUIT_FREQUENCY", parse_fruit_frequency) {
            settings.fruit_frequency = frequency;
        }
        match settings.validate() {
            Ok(()) => config.default_settings = settings,
            Err(e) => warn!(error = %e, "ignoring default match settings from environment"),
        }

        config
    }
}

fn env_with<T>(key: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    let parsed = parse(raw.trim());
    if parsed.is_none() {
        warn!(key, value = %raw, "ignoring unparseable config value");
    }
    parsed
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_with(key, |v| v.parse().ok())
}

fn parse_fruit_frequency(value: &str) -> Option<FruitFrequency> {
    match value.to_ascii_lowercase().as_str() {
        "off" => Some(FruitFrequency::Off),
        "low" => Some(FruitFrequency::Low),
        "normal" => Some(FruitFrequency::Normal),
        "high" => Some(FruitFrequency::High),
        _ => None,
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection limit reached.
    #[error("Connection limit reached")]
    ConnectionLimitReached,
}

/// The game server.
pub struct GameServer {
    ctx: Arc<ServerContext>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig, identities: Arc<dyn IdentityStore>, results: Arc<dyn ResultSink>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            ctx: Arc::new(ServerContext::new(config, identities, results)),
            shutdown_tx,
        }
    }

    /// Shared registries.
    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Run the server until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.ctx.config.bind_addr).await?;
        info!(addr = %self.ctx.config.bind_addr, "game server listening");

        let sweep_ctx = Arc::clone(&self.ctx);
        let sweep_handle = tokio::spawn(async move {
            Self::run_queue_sweep(sweep_ctx).await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if let Err(e) = self.admit(stream, addr).await {
                                warn!(%addr, error = %e, "rejecting connection");
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "accept error");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        sweep_handle.abort();
        self.ctx.rooms.shutdown_all().await;
        Ok(())
    }

    async fn admit(&self, stream: TcpStream, addr: SocketAddr) -> Result<(), GameServerError> {
        if self.ctx.connections.len().await >= self.ctx.config.max_connections {
            return Err(GameServerError::ConnectionLimitReached);
        }
        debug!(%addr, "new connection");
        self.handle_connection(stream, addr);
        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let ctx = Arc::clone(&self.ctx);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!(%addr, error = %GameServerError::from(e), "websocket handshake failed");
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER);
            let (conn, closer) = ctx.connections.register(msg_tx.clone()).await;
            info!(%conn, %addr, "connection open");

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!(error = %e, "failed to serialize message");
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                match ClientMessage::from_json(&text) {
                                    Ok(client_msg) => router::dispatch(&ctx, conn, &client_msg).await,
                                    Err(e) => {
                                        debug!(%conn, error = %e, "invalid message");
                                        let _ = msg_tx.try_send(ServerMessage::error(
                                            ErrorCode::InvalidMessage,
                                            "Invalid message format",
                                        ));
                                    }
                                }
                            }
                            Some(Ok(Message::Binary(data))) => {
                                // Malformed binary input is dropped.
                                if let Ok(client_msg) = ClientMessage::from_binary(&data) {
                                    router::dispatch(&ctx, conn, &client_msg).await;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!(%conn, "client closed");
                                break;
                            }
                            Some(Err(e)) => {
                                warn!(%conn, error = %e, "websocket error");
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = closer.notified() => {
                        debug!(%conn, "connection evicted");
                        break;
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.try_send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        });
                        break;
                    }
                }
            }

            router::disconnect(&ctx, conn).await;
            sender_task.abort();
        });
    }

    /// Drop players who waited too long for an opponent.
    async fn run_queue_sweep(ctx: Arc<ServerContext>) {
        let mut ticker = interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            for (mode, entry) in ctx.matchmaking.expire(ctx.config.queue_timeout).await {
                Self::expire_entry(&ctx, entry.connection, Location::Queued(mode)).await;
                debug!(player = %entry.player_id.short(), ?mode, "queue entry expired");
            }
        }
    }

    async fn expire_entry(ctx: &ServerContext, conn: ConnectionId, location: Location) {
        if ctx.connections.transition(conn, location, Location::Idle).await {
            ctx.connections.send(conn, ServerMessage::QueueCancelled).await;
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get connected client count.
    pub async fn connection_count(&self) -> usize {
        self.ctx.connections.len().await
    }

    /// Get running room count.
    pub async fn room_count(&self) -> usize {
        self.ctx.rooms.room_count().await
    }

    /// Get matchmaking queue size.
    pub async fn queue_size(&self) -> usize {
        self.ctx.matchmaking.total().await
    }
}
