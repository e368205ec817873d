use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::model::Ms;
use crate::observability::AUTH_FAILURES_TOTAL;
use crate::store::Store;

use super::{AuthError, Principal};

/// Raw credentials pulled off a request. Each scheme looks at one field.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// `secret_key` cookie or `x-secret-key` header.
    pub admin_secret: Option<String>,
    /// `Authorization: Bearer` token.
    pub bearer: Option<String>,
    /// `org_session` cookie.
    pub session_id: Option<String>,
}

#[async_trait]
pub trait PrincipalResolver: Send + Sync {
    fn scheme(&self) -> &'static str;

    async fn resolve(
        &self,
        store: &Store,
        credentials: &Credentials,
        now: Ms,
    ) -> Result<Principal, AuthError>;
}

fn reject(scheme: &'static str, err: AuthError) -> AuthError {
    metrics::counter!(AUTH_FAILURES_TOTAL, "scheme" => scheme).increment(1);
    tracing::debug!("{scheme} auth rejected: {err}");
    err
}

// ── Admin secret ─────────────────────────────────────────

/// The configured admin secret, kept only as a SHA-256 digest.
pub struct AdminSecret {
    digest: Vec<u8>,
}

fn sha256(raw: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hasher.finalize().to_vec()
}

impl AdminSecret {
    pub fn new(secret: &str) -> Self {
        Self { digest: sha256(secret) }
    }

    /// Compare digests in constant time so the check leaks neither content
    /// nor length of the secret.
    pub fn verify(&self, candidate: &str) -> bool {
        sha256(candidate)
            .iter()
            .zip(self.digest.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

#[async_trait]
impl PrincipalResolver for AdminSecret {
    fn scheme(&self) -> &'static str {
        "admin"
    }

    async fn resolve(&self, _: &Store, credentials: &Credentials, _: Ms) -> Result<Principal, AuthError> {
        match credentials.admin_secret.as_deref() {
            Some(candidate) if self.verify(candidate) => Ok(Principal::Admin),
            _ => Err(reject(
                self.scheme(),
                AuthError::Unauthorized("Invalid or missing secret key"),
            )),
        }
    }
}

// ── Bearer API key ───────────────────────────────────────

pub struct BearerKey;

#[async_trait]
impl PrincipalResolver for BearerKey {
    fn scheme(&self) -> &'static str {
        "bearer"
    }

    async fn resolve(&self, store: &Store, credentials: &Credentials, _: Ms) -> Result<Principal, AuthError> {
        let Some(token) = credentials.bearer.as_deref() else {
            return Err(reject(self.scheme(), AuthError::Unauthorized("Authorization token required")));
        };
        store
            .organization_by_key(token)
            .map(Principal::Organization)
            .ok_or_else(|| reject(self.scheme(), AuthError::Unauthorized("Invalid API key")))
    }
}

// ── OAuth session ────────────────────────────────────────

/// Session cookie → selected organization → live membership.
pub struct OAuthSession;

#[async_trait]
impl PrincipalResolver for OAuthSession {
    fn scheme(&self) -> &'static str {
        "session"
    }

    async fn resolve(&self, store: &Store, credentials: &Credentials, now: Ms) -> Result<Principal, AuthError> {
        let fail = |err| reject("session", err);

        let session_id = credentials
            .session_id
            .as_deref()
            .ok_or_else(|| fail(AuthError::Unauthorized("Session required")))?;
        let session = store
            .get_session(session_id)
            .ok_or_else(|| fail(AuthError::Unauthorized("Invalid session")))?;
        if session.is_expired(now) {
            if let Err(e) = store.delete_session(&session.id).await {
                tracing::warn!("failed to delete expired session: {e}");
            }
            return Err(fail(AuthError::SessionRevoked("Session expired")));
        }

        let org_id = session
            .organization_id
            .ok_or_else(|| fail(AuthError::Unauthorized("No organization selected")))?;
        let organization = store
            .get_organization(org_id)
            .ok_or_else(|| fail(AuthError::Unauthorized("Organization not found")))?;
        if !organization.portal_enabled {
            return Err(fail(AuthError::Forbidden("Organization portal access is disabled")));
        }
        let membership = store.find_member(&session.cid, organization.id).ok_or_else(|| {
            fail(AuthError::Unauthorized("You are no longer a member of this organization"))
        })?;

        Ok(Principal::Member {
            organization,
            cid: session.cid,
            name: session.name,
            role: membership.role,
            session_id: session.id,
        })
    }
}
