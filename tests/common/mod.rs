#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    Extension,
    extract::ConnectInfo,
    http::{Request, StatusCode, header},
};
use governor::Quota;
use microblog_auth::{
    ServerConfig,
    clock::{Clock, ManualClock},
    create_app,
    db::Database,
    mail::{MailError, MailMessage, MailQueue, MailQueueSettings, MailSender},
    password::hash_password,
    rate_limit::RateLimitConfig,
    repository::{Identity, UserRepository},
    role::Role,
    service::AuthSettings,
    session::{DEFAULT_ACCESS_TTL, DEFAULT_REFRESH_TTL},
};
use serde_json::Value;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

pub const BASE_URL: &str = "https://blog.example.com";

/// Captures every delivered message.
#[derive(Clone, Default)]
pub struct RecordingMailSender {
    sent: Arc<Mutex<Vec<MailMessage>>>,
}

#[async_trait]
impl MailSender for RecordingMailSender {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

pub struct TestContext {
    pub app: Router,
    pub db: Database,
    pub clock: ManualClock,
    mail: RecordingMailSender,
}

fn permissive_quota() -> Quota {
    Quota::per_second(NonZeroU32::new(1000).unwrap())
}

impl TestContext {
    /// App with rate limits high enough to stay out of the way.
    pub async fn new() -> Self {
        Self::with_rate_limit(RateLimitConfig::with_quotas(
            None,
            permissive_quota(),
            permissive_quota(),
            permissive_quota(),
        ))
        .await
    }

    pub async fn with_rate_limit(rate_limit: RateLimitConfig) -> Self {
        let db = Database::open(":memory:")
            .await
            .expect("Failed to open test database");
        let clock = ManualClock::new(1_700_000_000);
        let mail = RecordingMailSender::default();
        let (queue, _worker) = MailQueue::spawn(
            Arc::new(mail.clone()),
            MailQueueSettings {
                capacity: 16,
                max_attempts: 1,
                initial_backoff: Duration::from_millis(1),
            },
        );

        let config = ServerConfig {
            users: Arc::new(db.users()),
            action_tokens: Arc::new(db.action_tokens()),
            access_secret: b"test-access-secret-0123456789abcdef".to_vec(),
            refresh_secret: b"test-refresh-secret-0123456789abcdef".to_vec(),
            access_ttl: DEFAULT_ACCESS_TTL,
            refresh_ttl: DEFAULT_REFRESH_TTL,
            auth: AuthSettings {
                base_url: BASE_URL.to_string(),
                ..AuthSettings::default()
            },
            mail: queue,
            rate_limit: Arc::new(rate_limit),
            clock: Arc::new(clock.clone()),
        };

        let app = create_app(&config).layer(Extension(ConnectInfo(SocketAddr::from((
            [127, 0, 0, 1],
            40000,
        )))));

        Self {
            app,
            db,
            clock,
            mail,
        }
    }

    /// Send a request and return the status and JSON body (Null when empty).
    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        bearer: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send_request(request).await
    }

    pub async fn send_request(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn register(&self, email: &str, password: &str) -> (StatusCode, Value) {
        self.send(
            "POST",
            "/api/auth/register",
            None,
            Some(serde_json::json!({ "email": email, "password": password })),
        )
        .await
    }

    pub async fn login(&self, email: &str, password: &str) -> (StatusCode, Value) {
        self.send(
            "POST",
            "/api/auth/login",
            None,
            Some(serde_json::json!({ "email": email, "password": password })),
        )
        .await
    }

    /// Wait until at least `count` messages were delivered, then return them all.
    pub async fn mails(&self, count: usize) -> Vec<MailMessage> {
        for _ in 0..200 {
            {
                let sent = self.mail.sent.lock().unwrap();
                if sent.len() >= count {
                    return sent.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} mails", count);
    }

    /// Register, follow the mailed verification link, and log in.
    /// Returns the access token.
    pub async fn verified_user(&self, email: &str, password: &str) -> String {
        let before = self.mail.sent.lock().unwrap().len();
        let (status, _) = self.register(email, password).await;
        assert_eq!(status, StatusCode::CREATED);

        let mails = self.mails(before + 1).await;
        let token = link_token(&mails[before].body);
        let (status, _) = self
            .send("GET", &format!("/api/auth/verify?token={}", token), None, None)
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = self.login(email, password).await;
        assert_eq!(status, StatusCode::OK);
        body["access_token"].as_str().unwrap().to_string()
    }

    /// Insert a verified admin directly and log in as them.
    pub async fn admin(&self, email: &str, password: &str) -> String {
        let identity = Identity {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.to_string(),
            password_hash: hash_password(password).unwrap(),
            role: Role::Admin,
            verified: true,
            created_at: self.clock.now(),
        };
        self.db.users().create(&identity).await.unwrap();

        let (status, body) = self.login(email, password).await;
        assert_eq!(status, StatusCode::OK);
        body["access_token"].as_str().unwrap().to_string()
    }
}

/// Pull the `token` query parameter out of a mailed link.
pub fn link_token(body: &str) -> String {
    let start = body.find("?token=").expect("no link in mail") + "?token=".len();
    body[start..]
        .split(char::is_whitespace)
        .next()
        .unwrap()
        .to_string()
}
