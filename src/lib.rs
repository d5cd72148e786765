pub mod action_token;
pub mod api;
pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod clock;
pub mod db;
pub mod error;
pub mod jwt;
pub mod mail;
pub mod password;
pub mod rate_limit;
pub mod repository;
pub mod role;
pub mod service;
pub mod session;

use api::create_api_router;
use axum::Router;
use clock::Clock;
use mail::MailQueue;
use rate_limit::RateLimitConfig;
use repository::{ActionTokenRepository, UserRepository};
use service::{AuthService, AuthSettings};
use session::SessionTokens;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub struct ServerConfig {
    /// User-record store
    pub users: Arc<dyn UserRepository>,
    /// Action-token store
    pub action_tokens: Arc<dyn ActionTokenRepository>,
    /// Secret for signing access tokens
    pub access_secret: Vec<u8>,
    /// Secret for signing refresh tokens, distinct from the access secret
    pub refresh_secret: Vec<u8>,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    /// Action token lifetimes, store deadline and link base URL
    pub auth: AuthSettings,
    /// Producer side of the outbound mail queue
    pub mail: MailQueue,
    pub rate_limit: Arc<RateLimitConfig>,
    pub clock: Arc<dyn Clock>,
}

/// Build the auth service described by the configuration.
pub fn create_service(config: &ServerConfig) -> Arc<AuthService> {
    let sessions = Arc::new(SessionTokens::new(
        &config.access_secret,
        &config.refresh_secret,
        config.access_ttl,
        config.refresh_ttl,
        config.clock.clone(),
    ));

    Arc::new(AuthService::new(
        config.users.clone(),
        config.action_tokens.clone(),
        sessions,
        config.mail.clone(),
        config.clock.clone(),
        config.auth.clone(),
    ))
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    let api_router = create_api_router(create_service(config), config.rate_limit.clone());
    Router::new().nest("/api", api_router)
}

/// Run cleanup once and spawn the background scheduler, which also prunes
/// idle rate-limiter state.
/// Call this before starting the server.
pub async fn init_cleanup(config: &ServerConfig) {
    cleanup::run_cleanup(config.action_tokens.as_ref(), config.clock.as_ref()).await;
    cleanup::spawn_cleanup_scheduler(
        config.action_tokens.clone(),
        config.clock.clone(),
        config.rate_limit.clone(),
    );
}

/// Run the server on the given listener. This function blocks until the server exits.
/// Call `init_cleanup` before this to run cleanup on startup.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}

/// Start the server on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the actual address the server is listening on.
/// Note: For production use, prefer `run_server` directly in main.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> Result<(tokio::task::JoinHandle<()>, SocketAddr), std::io::Error> {
    init_cleanup(&config).await;

    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = run_server(config, listener).await {
            tracing::error!(error = %e, "Server error");
        }
    });

    Ok((handle, local_addr))
}
