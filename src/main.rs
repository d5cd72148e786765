use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use microblog_auth::cli::{
    Args, build_mail_sender, handle_create_admin, init_logging, load_session_secrets,
    open_database, validate_base_url,
};
use microblog_auth::clock::{Clock, SystemClock};
use microblog_auth::mail::{MailQueue, MailQueueSettings};
use microblog_auth::rate_limit::RateLimitConfig;
use microblog_auth::service::AuthSettings;
use microblog_auth::{ServerConfig, create_app, init_cleanup};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    let Some((access_secret, refresh_secret)) = load_session_secrets(
        args.access_secret_file.as_deref(),
        args.refresh_secret_file.as_deref(),
    ) else {
        std::process::exit(1);
    };

    let Some(base_url) = validate_base_url(&args.base_url) else {
        std::process::exit(1);
    };

    let Some(mail_sender) = build_mail_sender(&args) else {
        std::process::exit(1);
    };

    let Some(db) = open_database(&args.database).await else {
        std::process::exit(1);
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    if let Some(email) = args.create_admin.as_deref() {
        handle_create_admin(
            &db,
            clock.clone(),
            email,
            &base_url,
            args.reset_token_ttl(),
            args.store_timeout(),
        )
        .await;
    }

    let (mail, _mail_worker) = MailQueue::spawn(
        mail_sender,
        MailQueueSettings {
            capacity: args.mail_queue_size,
            max_attempts: args.mail_max_attempts,
            ..MailQueueSettings::default()
        },
    );

    let config = ServerConfig {
        users: Arc::new(db.users()),
        action_tokens: Arc::new(db.action_tokens()),
        access_secret: access_secret.into_bytes(),
        refresh_secret: refresh_secret.into_bytes(),
        access_ttl: args.access_ttl(),
        refresh_ttl: args.refresh_ttl(),
        auth: AuthSettings {
            verify_token_ttl: args.verify_token_ttl(),
            reset_token_ttl: args.reset_token_ttl(),
            store_timeout: args.store_timeout(),
            base_url,
        },
        mail,
        rate_limit: Arc::new(RateLimitConfig::new(args.client_ip_header)),
        clock,
    };

    init_cleanup(&config).await;

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    let app = create_app(&config);

    match listener.local_addr() {
        Ok(local_addr) => info!(address = %local_addr, "Listening"),
        Err(_) => info!(address = %addr, "Listening"),
    }

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    if let Err(e) = axum::serve(listener, make_service).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
