//! Axum extractors and middleware for the authorization gate.

use std::marker::PhantomData;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use super::errors::GateError;
use super::state::HasAuthBackend;
use super::types::AuthContext;
use crate::error::AuthError;
use crate::role::Role;
use crate::session::SessionTokens;

/// Minimum role a route accepts.
pub trait RoleConstraint: Send + Sync + 'static {
    const MIN_ROLE: Role;
}

/// Any valid access token, guests included.
pub struct AnyRole;
/// `user` and above.
pub struct MemberOnly;
/// `manager` and above.
pub struct ManagerOnly;
pub struct AdminOnly;

impl RoleConstraint for AnyRole {
    const MIN_ROLE: Role = Role::Guest;
}

impl RoleConstraint for MemberOnly {
    const MIN_ROLE: Role = Role::User;
}

impl RoleConstraint for ManagerOnly {
    const MIN_ROLE: Role = Role::Manager;
}

impl RoleConstraint for AdminOnly {
    const MIN_ROLE: Role = Role::Admin;
}

/// Pull the bearer token out of the `Authorization` header.
fn bearer_token(headers: &HeaderMap) -> Result<&str, GateError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(GateError::MissingCredential)?
        .to_str()
        .map_err(|_| GateError::MalformedCredential)?;

    let (scheme, token) = value
        .split_once(' ')
        .ok_or(GateError::MalformedCredential)?;
    if !scheme.eq_ignore_ascii_case("Bearer")
        || token.is_empty()
        || token.contains(char::is_whitespace)
    {
        return Err(GateError::MalformedCredential);
    }

    Ok(token)
}

/// Validate the request's bearer token and return who sent it.
pub fn authenticate(headers: &HeaderMap, sessions: &SessionTokens) -> Result<AuthContext, GateError> {
    let token = bearer_token(headers)?;

    let signed = sessions.validate_access(token).map_err(|e| {
        debug!(kind = AuthError::from(e).kind(), "Access token rejected");
        GateError::InvalidCredential
    })?;

    Ok(AuthContext {
        identity_id: signed.claims.sub,
        role: signed.claims.role,
    })
}

/// [`authenticate`], then require at least `min_role`.
pub fn authorize_role(
    headers: &HeaderMap,
    sessions: &SessionTokens,
    min_role: Role,
) -> Result<AuthContext, GateError> {
    let context = authenticate(headers, sessions)?;
    if !context.role.satisfies(min_role) {
        debug!(
            identity_id = %context.identity_id,
            role = %context.role,
            required = %min_role,
            "Role below route minimum"
        );
        return Err(GateError::InsufficientRole);
    }
    Ok(context)
}

/// Extractor for endpoints that require a valid access token with at least
/// `R::MIN_ROLE`.
pub struct Auth<R: RoleConstraint = AnyRole> {
    pub context: AuthContext,
    _role: PhantomData<R>,
}

impl<R: RoleConstraint> std::ops::Deref for Auth<R> {
    type Target = AuthContext;

    fn deref(&self) -> &Self::Target {
        &self.context
    }
}

impl<S, R> FromRequestParts<S> for Auth<R>
where
    S: HasAuthBackend + Send + Sync,
    R: RoleConstraint,
{
    type Rejection = GateError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let context = authorize_role(&parts.headers, state.sessions(), R::MIN_ROLE)?;
        Ok(Auth {
            context,
            _role: PhantomData,
        })
    }
}

/// Middleware that authenticates the request and inserts [`AuthContext`]
/// into its extensions.
pub async fn authorize<S>(
    State(state): State<S>,
    request: Request,
    next: Next,
) -> Result<Response, GateError>
where
    S: HasAuthBackend + Clone + Send + Sync + 'static,
{
    gate(&state, Role::Guest, request, next).await
}

/// Like [`authorize`], but also requires at least `R::MIN_ROLE`.
///
/// ```ignore
/// let admin = Router::new()
///     .route("/stats", get(stats))
///     .layer(middleware::from_fn_with_state(
///         state.clone(),
///         authorize_with_role::<BlogState, AdminOnly>,
///     ));
/// ```
pub async fn authorize_with_role<S, R>(
    State(state): State<S>,
    request: Request,
    next: Next,
) -> Result<Response, GateError>
where
    S: HasAuthBackend + Clone + Send + Sync + 'static,
    R: RoleConstraint,
{
    gate(&state, R::MIN_ROLE, request, next).await
}

async fn gate<S: HasAuthBackend>(
    state: &S,
    min_role: Role,
    mut request: Request,
    next: Next,
) -> Result<Response, GateError> {
    let context = authorize_role(request.headers(), state.sessions(), min_role)?;
    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}
