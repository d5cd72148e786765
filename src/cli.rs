//! CLI argument parsing, validation, and startup helpers.

use crate::action_token::{ActionTokens, Purpose};
use crate::auth::ClientIpHeader;
use crate::clock::Clock;
use crate::db::Database;
use crate::mail::{LogMailSender, MailSender, SmtpMailSender, SmtpSecurity, SmtpSettings};
use crate::password::hash_password_blocking;
use crate::repository::{Identity, UserRepository, within};
use crate::role::Role;
use crate::service::validate_email;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use clap::Parser;
use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use url::Url;
use uuid::Uuid;

const MIN_SECRET_LENGTH: usize = 32;

const MAX_ACCESS_TTL_MINUTES: u64 = 24 * 60;
const MAX_REFRESH_TTL_HOURS: u64 = 365 * 24;
const MAX_VERIFY_TTL_HOURS: u64 = 30 * 24;
const MAX_RESET_TTL_MINUTES: u64 = 24 * 60;
const MAX_STORE_TIMEOUT_MS: u64 = 10 * 60 * 1000;

const ACCESS_SECRET_ENV: &str = "ACCESS_TOKEN_SECRET";
const REFRESH_SECRET_ENV: &str = "REFRESH_TOKEN_SECRET";

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "microblog-auth",
    about = "Authentication service for Microblog"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "7291")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, env = "DATABASE_PATH", default_value = "microblog-auth.db")]
    pub database: String,

    /// Public origin used in mailed links (e.g., "https://blog.example.com")
    #[arg(long, env = "BASE_URL", default_value = "http://localhost:7291")]
    pub base_url: String,

    /// Path to file containing the access token secret. Prefer ACCESS_TOKEN_SECRET
    #[arg(long)]
    pub access_secret_file: Option<String>,

    /// Path to file containing the refresh token secret. Prefer REFRESH_TOKEN_SECRET
    #[arg(long)]
    pub refresh_secret_file: Option<String>,

    /// Access token lifetime in minutes (at most one day)
    #[arg(long, env = "ACCESS_TTL_MINUTES", default_value = "15",
          value_parser = clap::value_parser!(u64).range(1..=MAX_ACCESS_TTL_MINUTES))]
    pub access_ttl_minutes: u64,

    /// Refresh token lifetime in hours (at most one year)
    #[arg(long, env = "REFRESH_TTL_HOURS", default_value = "168",
          value_parser = clap::value_parser!(u64).range(1..=MAX_REFRESH_TTL_HOURS))]
    pub refresh_ttl_hours: u64,

    /// Email verification link lifetime in hours (at most 30 days)
    #[arg(long, env = "VERIFY_TOKEN_TTL_HOURS", default_value = "24",
          value_parser = clap::value_parser!(u64).range(1..=MAX_VERIFY_TTL_HOURS))]
    pub verify_token_ttl_hours: u64,

    /// Password reset link lifetime in minutes (at most one day)
    #[arg(long, env = "RESET_TOKEN_TTL_MINUTES", default_value = "60",
          value_parser = clap::value_parser!(u64).range(1..=MAX_RESET_TTL_MINUTES))]
    pub reset_token_ttl_minutes: u64,

    /// Deadline for a single database call, in milliseconds (at most 10 minutes)
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value = "5000",
          value_parser = clap::value_parser!(u64).range(1..=MAX_STORE_TIMEOUT_MS))]
    pub store_timeout_ms: u64,

    /// Outgoing mails that may wait for delivery before requests start failing
    #[arg(long, env = "MAIL_QUEUE_SIZE", default_value = "256")]
    pub mail_queue_size: usize,

    /// Delivery attempts per mail
    #[arg(long, env = "MAIL_MAX_ATTEMPTS", default_value = "3")]
    pub mail_max_attempts: u32,

    /// SMTP relay host. Without it mails are only logged
    #[arg(long, env = "SMTP_HOST")]
    pub smtp_host: Option<String>,

    /// SMTP relay port
    #[arg(long, env = "SMTP_PORT", default_value = "587")]
    pub smtp_port: u16,

    /// How the SMTP connection is secured
    #[arg(long, env = "SMTP_SECURITY", default_value = "starttls")]
    pub smtp_security: SmtpSecurity,

    /// SMTP username
    #[arg(long, env = "SMTP_USER")]
    pub smtp_user: Option<String>,

    /// SMTP password. Prefer the SMTP_PASS environment variable
    #[arg(long, env = "SMTP_PASS", hide_env_values = true)]
    pub smtp_pass: Option<String>,

    /// Sender address for outgoing mail. Defaults to the SMTP username
    #[arg(long, env = "MAIL_FROM")]
    pub mail_from: Option<String>,

    /// Take the client IP from this header (requires running behind a proxy)
    #[arg(long, env = "CLIENT_IP_HEADER")]
    pub client_ip_header: Option<ClientIpHeader>,

    /// Create an admin with this email on startup and print a link to set its password
    #[arg(long, value_name = "EMAIL")]
    pub create_admin: Option<String>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

impl Args {
    pub fn access_ttl(&self) -> Duration {
        Duration::from_secs(self.access_ttl_minutes * 60)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_ttl_hours * 60 * 60)
    }

    pub fn verify_token_ttl(&self) -> Duration {
        Duration::from_secs(self.verify_token_ttl_hours * 60 * 60)
    }

    pub fn reset_token_ttl(&self) -> Duration {
        Duration::from_secs(self.reset_token_ttl_minutes * 60)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load one signing secret from an environment variable or a file.
/// Returns None and logs an error if the secret cannot be loaded.
fn load_secret(env_var: &str, file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var(env_var) {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var(env_var) };
        secret
    } else if let Some(path) = file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read secret file");
                return None;
            }
        }
    } else {
        error!(
            "{} is required. Set the environment variable (recommended) or use the matching --*-secret-file flag",
            env_var
        );
        return None;
    };

    if secret.len() < MIN_SECRET_LENGTH {
        error!(
            "{} is shorter than {} characters. Use a longer secret",
            env_var, MIN_SECRET_LENGTH
        );
        return None;
    }

    Some(secret)
}

/// Load the access and refresh secrets. They must be present, long enough and different.
pub fn load_session_secrets(
    access_secret_file: Option<&str>,
    refresh_secret_file: Option<&str>,
) -> Option<(String, String)> {
    let access = load_secret(ACCESS_SECRET_ENV, access_secret_file)?;
    let refresh = load_secret(REFRESH_SECRET_ENV, refresh_secret_file)?;
    check_distinct(access, refresh)
}

fn check_distinct(access: String, refresh: String) -> Option<(String, String)> {
    if access == refresh {
        error!(
            "{} and {} must differ",
            ACCESS_SECRET_ENV, REFRESH_SECRET_ENV
        );
        return None;
    }
    Some((access, refresh))
}

/// Parse and validate the base URL.
/// Returns None and logs an error if validation fails.
pub fn validate_base_url(base_url: &str) -> Option<String> {
    let url = match Url::parse(base_url) {
        Ok(url) => url,
        Err(e) => {
            error!(url = %base_url, error = %e, "Invalid base URL");
            return None;
        }
    };

    let is_https = url.scheme() == "https";
    let is_localhost = url.host_str() == Some("localhost");

    if !is_https && !is_localhost {
        error!("base-url must use HTTPS for non-localhost deployments");
        return None;
    }

    Some(url.as_str().trim_end_matches('/').to_string())
}

/// Handle the --create-admin flag: create the admin if needed and print a
/// link for setting its password.
pub async fn handle_create_admin(
    db: &Database,
    clock: Arc<dyn Clock>,
    email: &str,
    base_url: &str,
    reset_ttl: Duration,
    store_timeout: Duration,
) {
    let Ok(email) = validate_email(email) else {
        error!(email = %email, "Invalid admin email");
        std::process::exit(1);
    };
    let users = db.users();

    let identity = match within(store_timeout, users.get_by_email(&email)).await {
        Ok(Some(existing)) if existing.role == Role::Admin => {
            println!();
            println!("Admin already exists: {}", existing.email);
            existing
        }
        Ok(Some(_)) => {
            error!(email = %email, "A non-admin user already has this email");
            std::process::exit(1);
        }
        Ok(None) => match create_admin(&users, clock.as_ref(), &email, store_timeout).await {
            Ok(identity) => {
                println!();
                println!("Admin user created: {}", identity.email);
                identity
            }
            Err(e) => {
                error!(error = %e, "Failed to create admin user");
                std::process::exit(1);
            }
        },
        Err(e) => {
            error!(error = %e, "Failed to check for existing admin");
            std::process::exit(1);
        }
    };

    let tokens = ActionTokens::new(Arc::new(db.action_tokens()), clock, store_timeout);
    match tokens
        .issue(&identity.id, Purpose::ResetPassword, reset_ttl)
        .await
    {
        Ok(token) => {
            println!("Set password: {}/reset-password?token={}", base_url, token);
            println!();
        }
        Err(e) => {
            error!(error = %e, "Failed to issue admin password link");
            std::process::exit(1);
        }
    }
}

/// Insert a verified admin whose password nobody knows until it is reset.
async fn create_admin(
    users: &dyn UserRepository,
    clock: &dyn Clock,
    email: &str,
    store_timeout: Duration,
) -> Result<Identity, Box<dyn std::error::Error>> {
    let mut placeholder = [0u8; 32];
    rand::rng().fill_bytes(&mut placeholder);
    let password_hash = hash_password_blocking(URL_SAFE_NO_PAD.encode(placeholder)).await?;

    let identity = Identity {
        id: Uuid::new_v4().to_string(),
        email: email.to_string(),
        password_hash,
        role: Role::Admin,
        verified: true,
        created_at: clock.now(),
    };
    within(store_timeout, users.create(&identity)).await?;
    info!(identity_id = %identity.id, "Admin created");

    Ok(identity)
}

/// Pick the mail transport: SMTP when a host is configured, the log otherwise.
/// Returns None and logs an error if the SMTP settings are incomplete.
pub fn build_mail_sender(args: &Args) -> Option<Arc<dyn MailSender>> {
    let Some(host) = args.smtp_host.clone() else {
        warn!("No SMTP host configured. Mails will only be logged");
        return Some(Arc::new(LogMailSender));
    };

    let credentials = match (args.smtp_user.clone(), args.smtp_pass.clone()) {
        (Some(user), Some(pass)) => Some((user, pass)),
        (None, None) => None,
        _ => {
            error!("SMTP_USER and SMTP_PASS must be set together");
            return None;
        }
    };

    let Some(from) = args.mail_from.clone().or_else(|| args.smtp_user.clone()) else {
        error!("MAIL_FROM is required when SMTP has no username");
        return None;
    };

    let settings = SmtpSettings {
        host,
        port: args.smtp_port,
        security: args.smtp_security,
        credentials,
        from,
    };
    info!(host = %settings.host, port = settings.port, security = ?settings.security, "SMTP mail enabled");

    match SmtpMailSender::new(settings) {
        Ok(sender) => Some(Arc::new(sender)),
        Err(e) => {
            error!(error = %e, "Failed to set up SMTP");
            None
        }
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_identical_secrets_rejected() {
        let secret = "x".repeat(40);
        assert!(check_distinct(secret.clone(), secret).is_none());
        assert!(check_distinct("a".repeat(40), "b".repeat(40)).is_some());
    }

    #[test]
    fn test_base_url_validation() {
        assert_eq!(
            validate_base_url("https://blog.example.com/").as_deref(),
            Some("https://blog.example.com")
        );
        assert!(validate_base_url("http://localhost:7291").is_some());
        assert!(validate_base_url("http://blog.example.com").is_none());
        assert!(validate_base_url("not a url").is_none());
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["microblog-auth"]).unwrap();
        assert_eq!(args.access_ttl(), Duration::from_secs(15 * 60));
        assert_eq!(args.reset_token_ttl(), Duration::from_secs(60 * 60));
        assert_eq!(args.verify_token_ttl(), Duration::from_secs(24 * 60 * 60));
        assert!(args.client_ip_header.is_none());
    }

    #[test]
    fn test_ttl_bounds_are_enforced() {
        let args = Args::try_parse_from([
            "microblog-auth",
            "--access-ttl-minutes",
            "1440",
            "--refresh-ttl-hours",
            "8760",
        ])
        .unwrap();
        assert_eq!(args.access_ttl(), Duration::from_secs(24 * 60 * 60));
        assert_eq!(args.refresh_ttl(), Duration::from_secs(365 * 24 * 60 * 60));

        for (flag, value) in [
            ("--access-ttl-minutes", "18446744073709551615"),
            ("--refresh-ttl-hours", "9000"),
            ("--verify-token-ttl-hours", "0"),
            ("--reset-token-ttl-minutes", "1441"),
            ("--store-timeout-ms", "600001"),
        ] {
            assert!(
                Args::try_parse_from(["microblog-auth", flag, value]).is_err(),
                "{flag} {value} should be rejected"
            );
        }
    }

    #[test]
    fn test_mail_sender_selection() {
        let parse = |extra: &[&str]| {
            let mut argv = vec!["microblog-auth"];
            argv.extend_from_slice(extra);
            Args::try_parse_from(argv).unwrap()
        };

        assert!(build_mail_sender(&parse(&[])).is_some());
        // Username without password.
        assert!(
            build_mail_sender(&parse(&["--smtp-host", "localhost", "--smtp-user", "bot"])).is_none()
        );
        // No username and no sender address.
        assert!(build_mail_sender(&parse(&["--smtp-host", "localhost"])).is_none());
    }

    #[tokio::test]
    async fn test_smtp_sender_from_args() {
        let args = Args::try_parse_from([
            "microblog-auth",
            "--smtp-host",
            "localhost",
            "--smtp-security",
            "none",
            "--mail-from",
            "Microblog <no-reply@example.com>",
        ])
        .unwrap();
        assert!(build_mail_sender(&args).is_some());
    }

    #[tokio::test]
    async fn test_create_admin_is_verified_admin() {
        let db = Database::open(":memory:").await.unwrap();
        let clock = ManualClock::new(1_700_000_000);
        let users = db.users();

        let admin = create_admin(&users, &clock, "root@example.com", Duration::from_secs(5))
            .await
            .unwrap();

        let stored = users.get_by_id(&admin.id).await.unwrap().unwrap();
        assert_eq!(stored.role, Role::Admin);
        assert!(stored.verified);
    }
}
