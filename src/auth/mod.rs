mod error;
pub mod oauth;
mod resolver;
mod state;

pub use error::AuthError;
pub use oauth::{OAuthError, OAuthProvider, Profile, VatsimOAuth, VatsimOAuthConfig};
pub use resolver::{AdminSecret, BearerKey, Credentials, OAuthSession, PrincipalResolver};
pub use state::StateTokens;

use crate::model::{Booking, Organization, Role};

/// Who is making a request, as resolved by one of the credential schemes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// Holder of the shared admin secret.
    Admin,
    /// Bearer of an organization's API key.
    Organization(Organization),
    /// OAuth session user acting inside the selected organization.
    Member {
        organization: Organization,
        cid: String,
        name: String,
        role: Role,
        session_id: String,
    },
}

impl Principal {
    pub fn organization(&self) -> Option<&Organization> {
        match self {
            Principal::Admin => None,
            Principal::Organization(org) | Principal::Member { organization: org, .. } => Some(org),
        }
    }

    pub fn role(&self) -> Option<Role> {
        match self {
            Principal::Member { role, .. } => Some(*role),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Principal::Admin => "admin",
            Principal::Organization(_) => "bearer",
            Principal::Member { .. } => "session",
        }
    }
}

/// Outcome of checking a principal against an existing booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Granted,
    /// Bearer key of another organization.
    WrongOwner,
    /// Session in another organization; reported as not found.
    Hidden,
    /// Member-role session touching someone else's booking.
    NotOwnCid,
}

pub fn access(principal: &Principal, booking: &Booking) -> Access {
    match principal {
        Principal::Admin => Access::Granted,
        Principal::Organization(org) if org.id == booking.organization_id => Access::Granted,
        Principal::Organization(_) => Access::WrongOwner,
        Principal::Member { organization, .. } if organization.id != booking.organization_id => {
            Access::Hidden
        }
        Principal::Member { role: Role::Member, cid, .. } if *cid != booking.cid => Access::NotOwnCid,
        Principal::Member { .. } => Access::Granted,
    }
}

/// Role gate for session routes. Non-session principals never pass.
pub fn require_role(principal: &Principal, allowed: &[Role]) -> Result<Role, AuthError> {
    match principal.role() {
        Some(role) if allowed.contains(&role) => Ok(role),
        _ => {
            metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL, "reason" => "role").increment(1);
            Err(AuthError::Forbidden("Insufficient permissions"))
        }
    }
}
