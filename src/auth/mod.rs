//! Bearer-token authorization gate with role-based access control.
//!
//! Requests carry `Authorization: Bearer <access token>`. The gate validates
//! the token statelessly and exposes the caller as an [`AuthContext`], either
//! through the [`Auth`] extractor or, for whole routers, the [`authorize`] /
//! [`authorize_with_role`] middleware.

mod errors;
mod extractors;
mod ip;
mod state;
mod types;

pub use errors::GateError;
pub use extractors::{
    AdminOnly, AnyRole, Auth, ManagerOnly, MemberOnly, RoleConstraint, authenticate, authorize,
    authorize_role, authorize_with_role,
};
pub use ip::{ClientIpHeader, HasHeadersAndExtensions, extract_client_ip};
pub use state::HasAuthBackend;
pub use types::AuthContext;
