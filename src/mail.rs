//! Outbound mail.
//!
//! Handlers never talk to a [`MailSender`] directly. They hand messages to a
//! [`MailQueue`], a bounded channel drained by one background worker that
//! retries failed deliveries with exponential backoff. A full queue is
//! reported back to the caller instead of blocking the request.

use async_trait::async_trait;
use lettre::message::{Mailbox, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Delivers one message. Implementations should not retry internally.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError>;
}

/// Development sender: records the delivery in the log without the body.
#[derive(Clone, Debug)]
pub struct LogMailSender;

#[async_trait]
impl MailSender for LogMailSender {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        info!(to = %message.to, subject = %message.subject, "Mail not sent, no SMTP host configured");
        Ok(())
    }
}

/// How the SMTP connection is secured.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SmtpSecurity {
    /// Plain connection upgraded with STARTTLS (usually port 587)
    #[default]
    Starttls,
    /// TLS from the first byte (usually port 465)
    Tls,
    /// No encryption. Only for local relays and test servers
    None,
}

#[derive(Clone, Debug)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub security: SmtpSecurity,
    /// Username and password; omitted for relays without auth
    pub credentials: Option<(String, String)>,
    /// Sender address, e.g. "Microblog <no-reply@blog.example.com>"
    pub from: String,
}

/// Sends through an SMTP relay.
pub struct SmtpMailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailSender {
    pub fn new(settings: SmtpSettings) -> Result<Self, MailError> {
        let from: Mailbox = settings
            .from
            .parse()
            .map_err(|e| MailError::Config(format!("invalid sender address: {}", e)))?;

        let builder = match settings.security {
            SmtpSecurity::Starttls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
                    .map_err(|e| MailError::Config(e.to_string()))?
            }
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
                .map_err(|e| MailError::Config(e.to_string()))?,
            SmtpSecurity::None => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
            }
        };
        let builder = builder.port(settings.port);
        let builder = match settings.credentials {
            Some((user, pass)) => builder.credentials(Credentials::new(user, pass)),
            None => builder,
        };

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl MailSender for SmtpMailSender {
    async fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        let to: Mailbox = message
            .to
            .parse()
            .map_err(|e| MailError::Delivery(format!("invalid recipient: {}", e)))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|e| MailError::Delivery(e.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| MailError::Delivery(e.to_string()))?;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MailQueueSettings {
    /// Messages that may wait for the worker before enqueue fails
    pub capacity: usize,
    /// Delivery attempts per message, including the first
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry
    pub initial_backoff: Duration,
}

impl Default for MailQueueSettings {
    fn default() -> Self {
        Self {
            capacity: 256,
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

/// Producer handle. Cheap to clone.
#[derive(Clone)]
pub struct MailQueue {
    tx: mpsc::Sender<MailMessage>,
}

impl MailQueue {
    /// Create a queue and the worker that drains it. The worker must be run
    /// (see [`MailWorker::run`]) for anything to be delivered.
    pub fn new(sender: Arc<dyn MailSender>, settings: MailQueueSettings) -> (Self, MailWorker) {
        let (tx, rx) = mpsc::channel(settings.capacity.max(1));
        (
            Self { tx },
            MailWorker {
                rx,
                sender,
                settings,
            },
        )
    }

    /// Create a queue and spawn its worker on the current runtime.
    pub fn spawn(
        sender: Arc<dyn MailSender>,
        settings: MailQueueSettings,
    ) -> (Self, JoinHandle<()>) {
        let (queue, worker) = Self::new(sender, settings);
        (queue, tokio::spawn(worker.run()))
    }

    /// Hand a message to the worker without waiting.
    pub fn enqueue(&self, message: MailMessage) -> Result<(), MailError> {
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => MailError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => MailError::Closed,
        })
    }
}

/// Consumer side of a [`MailQueue`].
pub struct MailWorker {
    rx: mpsc::Receiver<MailMessage>,
    sender: Arc<dyn MailSender>,
    settings: MailQueueSettings,
}

impl MailWorker {
    /// Deliver messages until every [`MailQueue`] handle is dropped.
    pub async fn run(mut self) {
        while let Some(message) = self.rx.recv().await {
            self.deliver(&message).await;
        }
        info!("Mail worker stopped");
    }

    async fn deliver(&self, message: &MailMessage) {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut backoff = self.settings.initial_backoff;

        for attempt in 1..=max_attempts {
            match self.sender.send(message).await {
                Ok(()) => {
                    info!(to = %message.to, subject = %message.subject, attempt, "Mail delivered");
                    return;
                }
                Err(e) if attempt < max_attempts => {
                    warn!(to = %message.to, attempt, error = %e, "Mail delivery failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => {
                    error!(
                        to = %message.to,
                        subject = %message.subject,
                        attempts = max_attempts,
                        error = %e,
                        "Mail delivery failed"
                    );
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailError {
    /// The transport rejected the message
    Delivery(String),
    /// Too many messages waiting for the worker
    QueueFull,
    /// The worker is gone
    Closed,
    /// The sender could not be set up
    Config(String),
}

impl std::fmt::Display for MailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MailError::Delivery(msg) => write!(f, "Mail delivery failed: {}", msg),
            MailError::QueueFull => write!(f, "Mail queue is full"),
            MailError::Closed => write!(f, "Mail queue is closed"),
            MailError::Config(msg) => write!(f, "Mail configuration error: {}", msg),
        }
    }
}

impl std::error::Error for MailError {}
