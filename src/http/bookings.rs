use actix_web::{HttpRequest, HttpResponse, delete, get, post, put, web};

use crate::booking::{BookingInput, BookingQuery};
use crate::model::now_ms;

use super::envelope;
use super::error::ApiError;
use super::extract::parse_id;
use super::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(list_bookings)
        .service(create_booking)
        .service(get_booking)
        .service(update_booking)
        .service(delete_booking);
}

#[get("/api/bookings")]
async fn list_bookings(
    req: HttpRequest,
    query: web::Query<BookingQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    if let Some(caller) = state.optional_bearer(&req).await
        && let Some(org) = caller.organization()
    {
        tracing::debug!("booking list requested by organization {}", org.id);
    }
    let filter = query.into_inner().into_filter()?;
    Ok(envelope::ok(state.bookings.list(&filter, now_ms())))
}

#[post("/api/bookings")]
async fn create_booking(
    req: HttpRequest,
    body: web::Json<BookingInput>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let principal = state.bearer_or_admin(&req).await?;
    let booking = state
        .bookings
        .create(&principal, body.into_inner(), now_ms())
        .await?;
    Ok(envelope::created(booking))
}

#[get("/api/bookings/{id}")]
async fn get_booking(
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    state.bearer(&req).await?;
    let id = parse_id(&path, "Invalid booking ID")?;
    Ok(envelope::ok(state.bookings.get(id)?))
}

#[put("/api/bookings/{id}")]
async fn update_booking(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<BookingInput>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let principal = state.bearer_or_admin(&req).await?;
    let id = parse_id(&path, "Invalid booking ID")?;
    let booking = state
        .bookings
        .update(&principal, id, body.into_inner(), now_ms())
        .await?;
    Ok(envelope::ok(booking))
}

#[delete("/api/bookings/{id}")]
async fn delete_booking(
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let principal = state.bearer_or_admin(&req).await?;
    let id = parse_id(&path, "Invalid booking ID")?;
    state.bookings.delete(&principal, id).await?;
    Ok(envelope::no_content())
}
