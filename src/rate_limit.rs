//! Rate limiting for authentication endpoints.
//!
//! Uses a token bucket algorithm with per-IP tracking to slow down credential
//! stuffing, signup spam and reset-mail flooding.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{num::NonZeroU32, sync::Arc};

use crate::auth::{ClientIpHeader, extract_client_ip};

/// Per-IP rate limiter for stricter endpoint-specific limiting.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Rate limiting configuration for authentication endpoints.
pub struct RateLimitConfig {
    /// Per-IP limiter for registration (strict: 3 requests per minute)
    pub register: IpLimiter,
    /// Per-IP limiter for login (1 per second, bursts of 5)
    pub login: IpLimiter,
    /// Per-IP limiter for password reset requests (strict: 3 requests per minute)
    pub forgot_password: IpLimiter,
    /// Where the client address comes from; `None` means the socket peer
    pub client_ip: Option<ClientIpHeader>,
}

const REGISTER_PER_MIN: NonZeroU32 = NonZeroU32::new(3).unwrap();
const LOGIN_PER_SEC: NonZeroU32 = NonZeroU32::new(1).unwrap();
const LOGIN_BURST: NonZeroU32 = NonZeroU32::new(5).unwrap();
const FORGOT_PASSWORD_PER_MIN: NonZeroU32 = NonZeroU32::new(3).unwrap();

impl RateLimitConfig {
    /// Create rate limiters with default quotas.
    pub fn new(client_ip: Option<ClientIpHeader>) -> Self {
        Self::with_quotas(
            client_ip,
            Quota::per_minute(REGISTER_PER_MIN),
            Quota::per_second(LOGIN_PER_SEC).allow_burst(LOGIN_BURST),
            Quota::per_minute(FORGOT_PASSWORD_PER_MIN),
        )
    }

    pub fn with_quotas(
        client_ip: Option<ClientIpHeader>,
        register: Quota,
        login: Quota,
        forgot_password: Quota,
    ) -> Self {
        Self {
            register: RateLimiter::keyed(register),
            login: RateLimiter::keyed(login),
            forgot_password: RateLimiter::keyed(forgot_password),
            client_ip,
        }
    }

    /// Drop per-IP state that has fully replenished. Returns how many
    /// addresses are still tracked.
    pub fn retain_recent(&self) -> usize {
        let limiters = [&self.register, &self.login, &self.forgot_password];
        for limiter in limiters {
            limiter.retain_recent();
            limiter.shrink_to_fit();
        }
        limiters.iter().map(|limiter| limiter.len()).sum()
    }
}

async fn limit(
    limiter: &IpLimiter,
    client_ip: Option<ClientIpHeader>,
    request: Request,
    next: Next,
    message: &'static str,
) -> Response {
    let ip = match extract_client_ip(&request, client_ip) {
        Ok(ip) => ip,
        Err(_) => {
            return (StatusCode::FORBIDDEN, "Unable to determine client IP.").into_response();
        }
    };

    match limiter.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            tracing::debug!(ip = %ip, "Rate limited");
            (StatusCode::TOO_MANY_REQUESTS, message).into_response()
        }
    }
}

/// Middleware for rate limiting registration.
pub async fn rate_limit_register(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    limit(
        &config.register,
        config.client_ip,
        request,
        next,
        "Too many signup attempts. Please wait before trying again.",
    )
    .await
}

/// Middleware for rate limiting login.
pub async fn rate_limit_login(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    limit(
        &config.login,
        config.client_ip,
        request,
        next,
        "Too many authentication attempts. Please wait before trying again.",
    )
    .await
}

/// Middleware for rate limiting password reset requests.
pub async fn rate_limit_forgot_password(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    limit(
        &config.forgot_password,
        config.client_ip,
        request,
        next,
        "Too many password reset requests. Please try again later.",
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_retain_recent_forgets_idle_addresses() {
        let quota = Quota::per_second(NonZeroU32::new(1000).unwrap());
        let config = RateLimitConfig::with_quotas(None, quota, quota, quota);

        for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            assert!(config.login.check_key(&ip.to_string()).is_ok());
        }
        assert!(config.register.check_key(&"10.0.0.1".to_string()).is_ok());
        assert_eq!(config.login.len(), 3);

        // One cell replenishes every millisecond.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(config.retain_recent(), 0);
        assert!(config.login.is_empty());
    }
}
