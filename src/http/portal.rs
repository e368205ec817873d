//! Self-service portal for OAuth session users, scoped to the session's
//! selected organization.

use actix_web::{HttpRequest, HttpResponse, delete, get, post, put, web};
use serde::Deserialize;

use crate::auth::{Principal, require_role};
use crate::booking::BookingInput;
use crate::booking::validate::{field_error, is_valid_cid};
use crate::model::{OrgMember, Role, now_ms};
use crate::roster::sync_roster;

use super::admin::{MemberView, RoleBody, parse_role};
use super::envelope;
use super::error::ApiError;
use super::extract::parse_id;
use super::AppState;

const MANAGERS: &[Role] = &[Role::Manager, Role::Admin];
const ADMINS: &[Role] = &[Role::Admin];

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(list_bookings)
        .service(create_booking)
        .service(update_booking)
        .service(delete_booking)
        .service(list_members)
        .service(add_member)
        .service(sync_members)
        .service(update_member)
        .service(remove_member);
}

// ── Bookings ─────────────────────────────────────────────

#[get("/api/org/session/bookings")]
async fn list_bookings(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let now = now_ms();
    let principal = state.session(&req, now).await?;
    Ok(envelope::ok(state.bookings.list_own(&principal, now)))
}

#[post("/api/org/session/bookings")]
async fn create_booking(
    req: HttpRequest,
    body: web::Json<BookingInput>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let now = now_ms();
    let principal = state.session(&req, now).await?;
    let mut input = body.into_inner();
    // Sessions always book for their selected organization.
    input.organization_id = None;
    let booking = state.bookings.create(&principal, input, now).await?;
    Ok(envelope::created(booking))
}

#[put("/api/org/session/bookings/{id}")]
async fn update_booking(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<BookingInput>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let now = now_ms();
    let principal = state.session(&req, now).await?;
    let id = parse_id(&path, "Invalid booking ID")?;
    let booking = state.bookings.update(&principal, id, body.into_inner(), now).await?;
    Ok(envelope::ok(booking))
}

#[delete("/api/org/session/bookings/{id}")]
async fn delete_booking(
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let now = now_ms();
    let principal = state.session(&req, now).await?;
    let id = parse_id(&path, "Invalid booking ID")?;
    state.bookings.delete(&principal, id).await?;
    Ok(envelope::no_content())
}

// ── Members ──────────────────────────────────────────────

/// The session's organization and cid. Only called after a successful
/// session resolve, so other principals cannot reach it.
fn scope(principal: &Principal) -> Result<(u64, &str), ApiError> {
    match principal {
        Principal::Member { organization, cid, .. } => Ok((organization.id, cid.as_str())),
        _ => Err(ApiError::Unauthorized("Session required".into())),
    }
}

/// A member of the caller's organization; members elsewhere look missing.
fn member_in_scope(state: &AppState, org_id: u64, raw_id: &str) -> Result<OrgMember, ApiError> {
    let id = parse_id(raw_id, "Invalid member ID")?;
    state
        .store
        .get_member(id)
        .filter(|m| m.organization_id == org_id)
        .ok_or_else(|| ApiError::not_found("Member not found"))
}

#[get("/api/org/session/members")]
async fn list_members(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let principal = state.session(&req, now_ms()).await?;
    require_role(&principal, MANAGERS)?;
    let (org_id, _) = scope(&principal)?;
    let views: Vec<MemberView> = state
        .store
        .members_of(org_id)
        .into_iter()
        .map(|m| MemberView::new(m, None))
        .collect();
    Ok(envelope::ok(views))
}

#[derive(Deserialize)]
struct PortalMemberBody {
    cid: Option<String>,
    role: Option<String>,
}

#[post("/api/org/session/members")]
async fn add_member(
    req: HttpRequest,
    body: web::Json<PortalMemberBody>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let now = now_ms();
    let principal = state.session(&req, now).await?;
    let caller_role = require_role(&principal, MANAGERS)?;
    let (org_id, _) = scope(&principal)?;

    let body = body.into_inner();
    let cid = match body.cid.map(|c| c.trim().to_string()) {
        None => return Err(field_error("cid", "CID is required").into()),
        Some(c) if c.is_empty() => return Err(field_error("cid", "CID is required").into()),
        Some(c) if !is_valid_cid(&c) => {
            return Err(field_error("cid", "CID must be a valid numeric VATSIM CID").into());
        }
        Some(c) => c,
    };
    let role = parse_role(body.role.as_deref(), Role::Member)?;
    if caller_role == Role::Manager && role != Role::Member {
        return Err(ApiError::Forbidden(
            "Managers can only add members with the member role".into(),
        ));
    }

    let member = state.store.add_member(cid, org_id, role, now).await?;
    tracing::info!("portal: member {} added to organization {org_id} as {role}", member.cid);
    Ok(envelope::created(MemberView::new(member, None)))
}

#[post("/api/org/session/members/sync")]
async fn sync_members(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let now = now_ms();
    let principal = state.session(&req, now).await?;
    require_role(&principal, ADMINS)?;
    let Some(organization) = principal.organization() else {
        return Err(ApiError::Unauthorized("Session required".into()));
    };
    let report = sync_roster(&state.store, state.roster.as_ref(), organization, now).await?;
    Ok(envelope::ok_with_message(report, report.message()))
}

#[put("/api/org/session/members/{id}")]
async fn update_member(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<RoleBody>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let now = now_ms();
    let principal = state.session(&req, now).await?;
    require_role(&principal, ADMINS)?;
    let (org_id, own_cid) = scope(&principal)?;

    let target = member_in_scope(&state, org_id, &path)?;
    if target.cid == own_cid {
        return Err(ApiError::bad_request("You cannot change your own role"));
    }
    let Some(raw) = body.into_inner().role else {
        return Err(field_error("role", "Role is required").into());
    };
    let role = parse_role(Some(&raw), Role::Member)?;
    let member = state.store.set_member_role(target.id, role, now).await?;
    Ok(envelope::ok(MemberView::new(member, None)))
}

#[delete("/api/org/session/members/{id}")]
async fn remove_member(
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let principal = state.session(&req, now_ms()).await?;
    let caller_role = require_role(&principal, MANAGERS)?;
    let (org_id, own_cid) = scope(&principal)?;

    let target = member_in_scope(&state, org_id, &path)?;
    if target.cid == own_cid {
        return Err(ApiError::bad_request("You cannot remove yourself"));
    }
    if caller_role == Role::Manager && target.role != Role::Member {
        return Err(ApiError::Forbidden(
            "Managers can only remove members with the member role".into(),
        ));
    }
    state.store.remove_member(target.id).await?;
    tracing::info!("portal: member {} removed from organization {org_id}", target.cid);
    Ok(envelope::no_content())
}
