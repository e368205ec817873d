//! JSON HTTP surface. Handlers resolve a principal explicitly through
//! [`AppState::authenticate`] and hand it to the booking engine or store.

mod admin;
mod bookings;
pub mod envelope;
pub mod error;
pub mod extract;
mod oauth;
mod org;
mod portal;

use std::sync::Arc;
use std::time::Instant;

use actix_web::{HttpRequest, HttpResponse, get, web};
use serde::Serialize;

use crate::auth::{
    AdminSecret, AuthError, BearerKey, OAuthProvider, OAuthSession, Principal, PrincipalResolver,
    StateTokens,
};
use crate::booking::BookingService;
use crate::booking::validate::format_instant;
use crate::model::{Ms, now_ms};
use crate::roster::RosterSource;
use crate::store::Store;

pub use error::{ApiError, set_verbose_errors};

/// Shared by every handler through `web::Data`.
pub struct AppState {
    pub store: Arc<Store>,
    pub bookings: BookingService,
    pub admin: AdminSecret,
    pub state_tokens: Arc<StateTokens>,
    pub oauth: Arc<dyn OAuthProvider>,
    pub roster: Arc<dyn RosterSource>,
    /// Base for post-login redirects, without a trailing slash.
    pub frontend_url: String,
    /// Marks cookies `Secure`.
    pub secure_cookies: bool,
    pub started: Instant,
}

impl AppState {
    pub fn new(
        store: Arc<Store>,
        admin: AdminSecret,
        state_tokens: Arc<StateTokens>,
        oauth: Arc<dyn OAuthProvider>,
        roster: Arc<dyn RosterSource>,
    ) -> Self {
        Self {
            bookings: BookingService::new(store.clone()),
            store,
            admin,
            state_tokens,
            oauth,
            roster,
            frontend_url: String::new(),
            secure_cookies: false,
            started: Instant::now(),
        }
    }

    pub fn with_frontend(mut self, frontend_url: String, secure_cookies: bool) -> Self {
        self.frontend_url = frontend_url;
        self.secure_cookies = secure_cookies;
        self
    }

    /// Try each scheme in order; the first success wins. When all fail the
    /// first scheme's error is reported.
    async fn authenticate(
        &self,
        req: &HttpRequest,
        schemes: &[&dyn PrincipalResolver],
        now: Ms,
    ) -> Result<Principal, ApiError> {
        let credentials = extract::credentials(req);
        let mut first_err: Option<AuthError> = None;
        for scheme in schemes {
            match scheme.resolve(&self.store, &credentials, now).await {
                Ok(principal) => return Ok(principal),
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        Err(first_err
            .map(ApiError::from)
            .unwrap_or_else(|| ApiError::Unauthorized("Authentication required".into())))
    }

    pub async fn admin(&self, req: &HttpRequest) -> Result<Principal, ApiError> {
        self.authenticate(req, &[&self.admin], now_ms()).await
    }

    pub async fn bearer(&self, req: &HttpRequest) -> Result<Principal, ApiError> {
        self.authenticate(req, &[&BearerKey], now_ms()).await
    }

    /// Bearer key, or the admin secret acting for any organization.
    pub async fn bearer_or_admin(&self, req: &HttpRequest) -> Result<Principal, ApiError> {
        let credentials = extract::credentials(req);
        if credentials.bearer.is_none() && credentials.admin_secret.is_some() {
            return self.admin(req).await;
        }
        self.bearer(req).await
    }

    /// Bearer key if one was presented and valid; otherwise anonymous.
    pub async fn optional_bearer(&self, req: &HttpRequest) -> Option<Principal> {
        let credentials = extract::credentials(req);
        credentials.bearer.as_ref()?;
        BearerKey.resolve(&self.store, &credentials, now_ms()).await.ok()
    }

    pub async fn session(&self, req: &HttpRequest, now: Ms) -> Result<Principal, ApiError> {
        self.authenticate(req, &[&OAuthSession], now).await
    }
}

/// Register every route plus extractor error handlers that answer in the
/// envelope shape.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _| ApiError::bad_request(format!("Invalid request body: {err}")).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _| ApiError::bad_request(format!("Invalid query: {err}")).into()),
    )
    .service(health)
    .configure(admin::configure)
    .configure(bookings::configure)
    .configure(org::configure)
    .configure(portal::configure)
    .configure(oauth::configure);
}

/// Fallback for unmatched routes.
pub async fn not_found() -> HttpResponse {
    envelope::failure(actix_web::http::StatusCode::NOT_FOUND, "Route not found", None)
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    timestamp: String,
    uptime: f64,
}

#[get("/health")]
async fn health(state: web::Data<AppState>) -> HttpResponse {
    envelope::ok(Health {
        status: "ok",
        timestamp: format_instant(now_ms()),
        uptime: state.started.elapsed().as_secs_f64(),
    })
}
