use actix_web::{HttpRequest, HttpResponse, get, web};
use serde::Serialize;

use crate::auth::Principal;
use crate::booking::validate::format_instant;
use crate::model::now_ms;

use super::envelope;
use super::error::ApiError;
use super::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(me).service(own_bookings);
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OrganizationProfile {
    id: u64,
    name: String,
    division: String,
    subdivision: Option<String>,
    created_at: String,
    booking_count: usize,
}

#[get("/api/org/me")]
async fn me(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let Principal::Organization(org) = state.bearer(&req).await? else {
        return Err(ApiError::Unauthorized("Invalid API key".into()));
    };
    let booking_count = state.store.booking_count(org.id);
    Ok(envelope::ok(OrganizationProfile {
        id: org.id,
        name: org.name,
        division: org.division,
        subdivision: org.subdivision,
        created_at: format_instant(org.created_at),
        booking_count,
    }))
}

#[get("/api/org/bookings")]
async fn own_bookings(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let principal = state.bearer(&req).await?;
    Ok(envelope::ok(state.bookings.list_own(&principal, now_ms())))
}
