//! Authentication state traits and macro.

use crate::session::SessionTokens;

/// Trait for state types that can validate access tokens.
pub trait HasAuthBackend {
    fn sessions(&self) -> &SessionTokens;
}

/// Macro to implement `HasAuthBackend` for state structs with the standard field.
///
/// The struct must have a `sessions: Arc<SessionTokens>` field.
///
/// # Example
/// ```ignore
/// use microblog_auth::impl_has_auth_backend;
///
/// #[derive(Clone)]
/// pub struct BlogState {
///     pub sessions: Arc<SessionTokens>,
///     // ... other fields
/// }
///
/// impl_has_auth_backend!(BlogState);
/// ```
#[macro_export]
macro_rules! impl_has_auth_backend {
    ($state_type:ty) => {
        impl $crate::auth::HasAuthBackend for $state_type {
            fn sessions(&self) -> &$crate::session::SessionTokens {
                &self.sessions
            }
        }
    };
}
