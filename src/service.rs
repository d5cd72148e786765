//! Use cases: register, login, refresh, email verification, password reset.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::action_token::{ActionTokens, Purpose};
use crate::clock::Clock;
use crate::error::AuthError;
use crate::mail::{MailMessage, MailQueue};
use crate::password::{hash_password_blocking, verify_password_blocking};
use crate::repository::{ActionTokenRepository, Identity, UserRepository, within};
use crate::role::Role;
use crate::session::{SessionPair, SessionTokens};

pub const MIN_PASSWORD_LENGTH: usize = 6;
pub const MAX_PASSWORD_LENGTH: usize = 128;
const MAX_EMAIL_LENGTH: usize = 254;

/// Default verification link lifetime: 24 hours
pub const DEFAULT_VERIFY_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default password reset link lifetime: 1 hour
pub const DEFAULT_RESET_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

/// Default deadline for a single store call
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct AuthSettings {
    pub verify_token_ttl: Duration,
    pub reset_token_ttl: Duration,
    pub store_timeout: Duration,
    /// Public origin mailed links point at, without trailing slash
    pub base_url: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            verify_token_ttl: DEFAULT_VERIFY_TOKEN_TTL,
            reset_token_ttl: DEFAULT_RESET_TOKEN_TTL,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            base_url: "http://localhost:7291".to_string(),
        }
    }
}

pub struct AuthService {
    users: Arc<dyn UserRepository>,
    sessions: Arc<SessionTokens>,
    action_tokens: ActionTokens,
    mail: MailQueue,
    clock: Arc<dyn Clock>,
    settings: AuthSettings,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        tokens: Arc<dyn ActionTokenRepository>,
        sessions: Arc<SessionTokens>,
        mail: MailQueue,
        clock: Arc<dyn Clock>,
        settings: AuthSettings,
    ) -> Self {
        let action_tokens = ActionTokens::new(tokens, clock.clone(), settings.store_timeout);
        Self {
            users,
            sessions,
            action_tokens,
            mail,
            clock,
            settings,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionTokens> {
        &self.sessions
    }

    /// Create an unverified user and sign them in.
    ///
    /// A verification link is mailed afterwards. Failing to issue or queue it
    /// is logged and does not fail the registration.
    pub async fn register(&self, email: &str, password: &str) -> Result<SessionPair, AuthError> {
        let email = validate_email(email)?;
        validate_password(password)?;

        if self.find_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailTaken);
        }

        let password_hash = hash_password_blocking(password.to_string()).await?;
        let identity = Identity {
            id: Uuid::new_v4().to_string(),
            email,
            password_hash,
            role: Role::User,
            verified: false,
            created_at: self.clock.now(),
        };
        // A concurrent registration can still win between the check and here;
        // the unique index turns that into EmailTaken.
        within(self.settings.store_timeout, self.users.create(&identity)).await?;
        info!(identity_id = %identity.id, "User registered");

        let pair = self.sessions.issue_pair(&identity.id, identity.role)?;

        if let Err(e) = self.mail_verification(&identity).await {
            warn!(identity_id = %identity.id, kind = e.kind(), error = %e, "Verification mail not queued");
        }

        Ok(pair)
    }

    /// Check credentials and issue a session pair.
    pub async fn login(&self, email: &str, password: &str) -> Result<SessionPair, AuthError> {
        let email = normalize_email(email);
        let identity = self.find_by_email(&email).await?;

        let digest = identity.as_ref().map(|i| i.password_hash.clone());
        if !verify_password_blocking(digest, password.to_string()).await {
            debug!("Login rejected");
            return Err(AuthError::CredentialInvalid);
        }
        let Some(identity) = identity else {
            return Err(AuthError::CredentialInvalid);
        };

        if !identity.verified {
            return Err(AuthError::AccountUnverified);
        }

        info!(identity_id = %identity.id, "User logged in");
        Ok(self.sessions.issue_pair(&identity.id, identity.role)?)
    }

    /// Exchange a refresh token for a new access token.
    pub fn refresh(&self, refresh_token: &str) -> Result<String, AuthError> {
        Ok(self.sessions.refresh(refresh_token)?)
    }

    /// Mail a fresh verification link. A no-op for verified identities.
    pub async fn send_verification(&self, identity_id: &str) -> Result<(), AuthError> {
        let identity = within(self.settings.store_timeout, self.users.get_by_id(identity_id))
            .await?
            .ok_or(AuthError::CredentialInvalid)?;

        if identity.verified {
            debug!(identity_id = %identity.id, "Already verified, not resending");
            return Ok(());
        }

        self.mail_verification(&identity).await
    }

    /// Consume a verification token and mark its identity verified.
    pub async fn verify_email(&self, token: &str) -> Result<String, AuthError> {
        let identity_id = self
            .action_tokens
            .consume(token, Purpose::VerifyEmail)
            .await?;

        let updated = match within(
            self.settings.store_timeout,
            self.users.update_verified(&identity_id, true),
        )
        .await
        {
            Ok(updated) => updated,
            Err(e) => {
                self.release_token(token, Purpose::VerifyEmail).await;
                return Err(e.into());
            }
        };
        if !updated {
            // Token outlived its identity.
            return Err(AuthError::TokenNotFound);
        }

        info!(identity_id = %identity_id, "Email verified");
        Ok(identity_id)
    }

    /// Mail a reset link if the email belongs to someone.
    ///
    /// Only the lookup can fail. Anything after it is logged instead, so the
    /// outcome looks the same whether or not the email is registered.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let email = normalize_email(email);
        let Some(identity) = self.find_by_email(&email).await? else {
            debug!("Password reset requested for unknown email");
            return Ok(());
        };

        if let Err(e) = self.mail_password_reset(&identity).await {
            error!(identity_id = %identity.id, kind = e.kind(), error = %e, "Password reset mail not queued");
        }
        Ok(())
    }

    /// Consume a reset token and store a new password for its identity.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AuthError> {
        validate_password(new_password)?;
        // Hash before spending the token so only the store write can fail after it.
        let password_hash = hash_password_blocking(new_password.to_string()).await?;

        let identity_id = self
            .action_tokens
            .consume(token, Purpose::ResetPassword)
            .await?;

        let updated = match within(
            self.settings.store_timeout,
            self.users.update_password_hash(&identity_id, &password_hash),
        )
        .await
        {
            Ok(updated) => updated,
            Err(e) => {
                self.release_token(token, Purpose::ResetPassword).await;
                return Err(e.into());
            }
        };
        if !updated {
            return Err(AuthError::TokenNotFound);
        }

        info!(identity_id = %identity_id, "Password reset");
        Ok(())
    }

    /// Look up an identity by id.
    pub async fn identity(&self, identity_id: &str) -> Result<Option<Identity>, AuthError> {
        Ok(within(self.settings.store_timeout, self.users.get_by_id(identity_id)).await?)
    }

    /// All identities, oldest first.
    pub async fn list_identities(&self) -> Result<Vec<Identity>, AuthError> {
        Ok(within(self.settings.store_timeout, self.users.list()).await?)
    }

    /// Reopen a token whose effect could not be stored, so the same link
    /// works on retry.
    async fn release_token(&self, token: &str, purpose: Purpose) {
        if let Err(e) = self.action_tokens.release(token).await {
            error!(purpose = %purpose, kind = e.kind(), error = %e, "Action token could not be released");
        }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, AuthError> {
        Ok(within(self.settings.store_timeout, self.users.get_by_email(email)).await?)
    }

    async fn mail_verification(&self, identity: &Identity) -> Result<(), AuthError> {
        let token = self
            .action_tokens
            .issue(
                &identity.id,
                Purpose::VerifyEmail,
                self.settings.verify_token_ttl,
            )
            .await?;
        let link = format!("{}/verify?token={}", self.base_url(), token);

        self.mail.enqueue(MailMessage {
            to: identity.email.clone(),
            subject: "Verify your email".to_string(),
            body: format!(
                "Welcome to Microblog.\n\n\
                 Open this link to verify your email address:\n\n{}\n\n\
                 The link expires in {} hours.\n",
                link,
                self.settings.verify_token_ttl.as_secs() / 3600
            ),
        })?;

        info!(identity_id = %identity.id, "Verification mail queued");
        Ok(())
    }

    async fn mail_password_reset(&self, identity: &Identity) -> Result<(), AuthError> {
        let token = self
            .action_tokens
            .issue(
                &identity.id,
                Purpose::ResetPassword,
                self.settings.reset_token_ttl,
            )
            .await?;
        let link = format!("{}/reset-password?token={}", self.base_url(), token);

        self.mail.enqueue(MailMessage {
            to: identity.email.clone(),
            subject: "Reset your password".to_string(),
            body: format!(
                "Someone asked to reset the password for this account.\n\n\
                 Open this link to choose a new one:\n\n{}\n\n\
                 The link expires in {} minutes. If this wasn't you, ignore this email.\n",
                link,
                self.settings.reset_token_ttl.as_secs() / 60
            ),
        })?;

        info!(identity_id = %identity.id, "Password reset mail queued");
        Ok(())
    }

    fn base_url(&self) -> &str {
        self.settings.base_url.trim_end_matches('/')
    }
}

/// Trim and lowercase an email for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Normalize an email and check its shape.
pub fn validate_email(email: &str) -> Result<String, AuthError> {
    let email = normalize_email(email);
    let invalid = || AuthError::InvalidInput("Invalid email address".to_string());

    if email.is_empty() || email.len() > MAX_EMAIL_LENGTH {
        return Err(invalid());
    }
    let Some((local, domain)) = email.split_once('@') else {
        return Err(invalid());
    };
    if local.is_empty()
        || domain.contains('@')
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
        || email.chars().any(char::is_whitespace)
    {
        return Err(invalid());
    }

    Ok(email)
}

pub fn validate_password(password: &str) -> Result<(), AuthError> {
    let len = password.chars().count();
    if len < MIN_PASSWORD_LENGTH {
        return Err(AuthError::InvalidInput(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    if len > MAX_PASSWORD_LENGTH {
        return Err(AuthError::InvalidInput(format!(
            "Password must be at most {} characters",
            MAX_PASSWORD_LENGTH
        )));
    }
    Ok(())
}
