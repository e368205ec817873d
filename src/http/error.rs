use std::sync::atomic::{AtomicBool, Ordering};

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

use crate::auth::AuthError;
use crate::booking::{BookingError, FieldErrors};
use crate::roster::RosterError;
use crate::store::{Entity, StoreError};

use super::envelope::failure;
use super::extract::{SESSION_COOKIE, removal_cookie};

static VERBOSE_ERRORS: AtomicBool = AtomicBool::new(true);

/// Whether 500 responses carry the underlying message. Off in production.
pub fn set_verbose_errors(verbose: bool) {
    VERBOSE_ERRORS.store(verbose, Ordering::Relaxed);
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    /// 401 that also clears the session cookie.
    #[error("{0}")]
    SessionRevoked(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Validation failed")]
    Validation(FieldErrors),
    /// Failure talking to an external provider. The message is already
    /// sanitized and is always shown.
    #[error("{0}")]
    Upstream(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) | ApiError::SessionRevoked(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Upstream(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        match self {
            ApiError::Validation(errors) => failure(status, "Validation failed", Some(errors.clone())),
            ApiError::SessionRevoked(message) => {
                let mut response = failure(status, message, None);
                if let Err(e) = response.add_cookie(&removal_cookie(SESSION_COOKIE)) {
                    tracing::warn!("failed to clear session cookie: {e}");
                }
                response
            }
            ApiError::Internal(message) => {
                tracing::error!("internal error: {message}");
                if VERBOSE_ERRORS.load(Ordering::Relaxed) {
                    failure(status, message, None)
                } else {
                    failure(status, "Internal server error", None)
                }
            }
            other => failure(status, &other.to_string(), None),
        }
    }
}

impl From<FieldErrors> for ApiError {
    fn from(errors: FieldErrors) -> Self {
        ApiError::Validation(errors)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthorized(m) => ApiError::Unauthorized(m.to_string()),
            AuthError::SessionRevoked(m) => ApiError::SessionRevoked(m.to_string()),
            AuthError::Forbidden(m) => ApiError::Forbidden(m.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(entity, _) => ApiError::NotFound(
                match entity {
                    Entity::Organization => "Organization not found",
                    Entity::Booking => "Booking not found",
                    Entity::Member => "Member not found",
                    Entity::Session => "Session not found",
                }
                .to_string(),
            ),
            StoreError::AlreadyExists(Entity::Member, _) => {
                ApiError::bad_request("Member already exists in this organization")
            }
            err @ (StoreError::AlreadyExists(..) | StoreError::LimitExceeded(_)) => {
                ApiError::BadRequest(err.to_string())
            }
            err @ StoreError::Conflict(_) => BookingError::from(err).into(),
            StoreError::Wal(m) => ApiError::Internal(m),
        }
    }
}

impl From<BookingError> for ApiError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::Validation(errors) => ApiError::Validation(errors),
            BookingError::Rejected(m) => ApiError::bad_request(m),
            BookingError::Forbidden(m) => ApiError::Forbidden(m.to_string()),
            BookingError::NotFound => ApiError::not_found("Booking not found"),
            BookingError::Store(e) => e.into(),
        }
    }
}

impl From<RosterError> for ApiError {
    fn from(err: RosterError) -> Self {
        match err {
            RosterError::NotConfigured => ApiError::Upstream(err.to_string()),
            RosterError::Upstream(m) => ApiError::Upstream(format!("Failed to sync roster: {m}")),
            RosterError::Store(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(ApiError::bad_request("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::Validation(FieldErrors::new()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::from(AuthError::Forbidden("Insufficient permissions")).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(StoreError::not_found(Entity::Member, 3)).to_string(),
            "Member not found"
        );
    }

    #[test]
    fn overlap_becomes_field_error() {
        match ApiError::from(StoreError::Conflict(4)) {
            ApiError::Validation(errors) => assert!(errors.contains_key("booking")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn revoked_session_clears_cookie() {
        let response = ApiError::SessionRevoked("Session expired".into()).error_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let cookie = response.cookies().find(|c| c.name() == SESSION_COOKIE).unwrap();
        assert_eq!(cookie.value(), "");
    }

    #[test]
    fn roster_errors_are_sanitized() {
        let err = ApiError::from(RosterError::Upstream("upstream returned 503".into()));
        assert_eq!(err.to_string(), "Failed to sync roster: upstream returned 503");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
