use actix_web::http::header;
use actix_web::{HttpRequest, HttpResponse, get, post, web};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::limits::SESSION_TTL_MS;
use crate::model::{Ms, Role, Session, now_ms};

use super::envelope;
use super::error::ApiError;
use super::extract::{SESSION_COOKIE, removal_cookie, session_cookie, session_id};
use super::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(authorize)
        .service(callback)
        .service(current_session)
        .service(switch_organization)
        .service(logout);
}

fn redirect(location: &str) -> HttpResponse {
    HttpResponse::Found()
        .insert_header((header::LOCATION, location))
        .finish()
}

#[get("/api/oauth/vatsim")]
async fn authorize(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let token = state.state_tokens.issue(now_ms());
    match state.oauth.authorize_url(&token) {
        Ok(url) => Ok(redirect(&url)),
        Err(e) => {
            state.state_tokens.consume(&token, now_ms());
            tracing::error!("oauth redirect unavailable: {e}");
            Err(ApiError::Upstream("VATSIM OAuth not configured".into()))
        }
    }
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

#[get("/api/oauth/vatsim/callback")]
async fn callback(query: web::Query<CallbackQuery>, state: web::Data<AppState>) -> HttpResponse {
    let login = |error: &str| redirect(&format!("{}/org/login?error={error}", state.frontend_url));
    let query = query.into_inner();
    let now = now_ms();

    if let Some(error) = query.error {
        tracing::info!("oauth provider returned error: {error}");
        return login("access_denied");
    }
    let (Some(code), Some(token)) = (query.code, query.state) else {
        return login("invalid_request");
    };
    if !state.state_tokens.consume(&token, now) {
        return login("invalid_state");
    }

    let access_token = match state.oauth.exchange_code(&code).await {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("oauth token exchange failed: {e}");
            return login("token_exchange_failed");
        }
    };
    let profile = match state.oauth.fetch_profile(&access_token).await {
        Ok(p) => p,
        Err(e) => {
            tracing::error!("oauth profile fetch failed: {e}");
            return login("user_fetch_failed");
        }
    };

    let Some((_, organization)) = state
        .store
        .memberships_of(&profile.cid)
        .into_iter()
        .find(|(_, org)| org.portal_enabled)
    else {
        tracing::info!("cid {} has no portal-enabled organization", profile.cid);
        return login("no_organization");
    };

    let session = match state
        .store
        .create_session(
            profile.cid.clone(),
            profile.display_name(),
            Some(organization.id),
            now + SESSION_TTL_MS,
        )
        .await
    {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("failed to create session: {e}");
            return login("server_error");
        }
    };
    tracing::info!("cid {} signed in to organization {}", profile.cid, organization.id);

    let mut response = redirect(&format!("{}/org", state.frontend_url));
    if let Err(e) = response.add_cookie(&session_cookie(session.id, state.secure_cookies)) {
        tracing::error!("failed to set session cookie: {e}");
        return login("server_error");
    }
    response
}

/// The raw session behind the cookie, without requiring a selected
/// organization. Expired sessions are deleted on sight.
async fn live_session(state: &AppState, req: &HttpRequest, now: Ms) -> Result<Session, ApiError> {
    let session = session_id(req)
        .and_then(|id| state.store.get_session(&id))
        .ok_or_else(|| ApiError::Unauthorized("No session".into()))?;
    if session.is_expired(now) {
        state.store.delete_session(&session.id).await?;
        return Err(ApiError::SessionRevoked("Session expired".into()));
    }
    Ok(session)
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionOrganization {
    id: u64,
    name: String,
    division: String,
    subdivision: Option<String>,
    role: Role,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionView {
    cid: String,
    name: String,
    current_org: Option<SessionOrganization>,
    organizations: Vec<SessionOrganization>,
}

#[get("/api/oauth/session")]
async fn current_session(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let session = live_session(&state, &req, now_ms()).await?;
    let organizations: Vec<SessionOrganization> = state
        .store
        .memberships_of(&session.cid)
        .into_iter()
        .filter(|(_, org)| org.portal_enabled)
        .map(|(member, org)| SessionOrganization {
            id: org.id,
            name: org.name,
            division: org.division,
            subdivision: org.subdivision,
            role: member.role,
        })
        .collect();
    let current_org = session
        .organization_id
        .and_then(|id| organizations.iter().find(|o| o.id == id).cloned());
    Ok(envelope::ok(SessionView {
        cid: session.cid,
        name: session.name,
        current_org,
        organizations,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwitchBody {
    org_id: Option<u64>,
}

#[post("/api/oauth/session/org")]
async fn switch_organization(
    req: HttpRequest,
    body: web::Json<SwitchBody>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let session = live_session(&state, &req, now_ms()).await?;
    let org_id = body
        .into_inner()
        .org_id
        .ok_or_else(|| ApiError::bad_request("Organization ID is required"))?;
    let allowed = state.store.find_member(&session.cid, org_id).is_some()
        && state
            .store
            .get_organization(org_id)
            .is_some_and(|org| org.portal_enabled);
    if !allowed {
        return Err(ApiError::bad_request("You are not a member of this organization"));
    }
    state.store.switch_session_organization(&session.id, org_id).await?;
    tracing::info!("cid {} switched to organization {org_id}", session.cid);
    Ok(envelope::ok(json!({ "switched": true })))
}

#[post("/api/oauth/logout")]
async fn logout(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    if let Some(id) = session_id(&req) {
        state.store.delete_session(&id).await?;
    }
    let mut response = envelope::ok(json!({ "loggedOut": true }));
    response
        .add_cookie(&removal_cookie(SESSION_COOKIE))
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(response)
}
