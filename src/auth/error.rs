use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Missing or invalid credential.
    #[error("{0}")]
    Unauthorized(&'static str),
    /// Session rejected in a way that also invalidates the cookie.
    #[error("{0}")]
    SessionRevoked(&'static str),
    /// Authenticated but not allowed.
    #[error("{0}")]
    Forbidden(&'static str),
}
