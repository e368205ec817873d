//! Secret-protected administration: admin login, organization (API key)
//! CRUD and direct membership management.

use actix_web::{HttpRequest, HttpResponse, delete, get, post, put, web};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::booking::validate::{field_error, format_instant, is_valid_cid, nullable};
use crate::booking::FieldErrors;
use crate::limits::{MAX_CODE_LEN, MAX_NAME_LEN};
use crate::model::{OrgMember, Organization, OrganizationSummary, Role, now_ms};
use crate::store::{NewOrganization, OrganizationPatch};

use super::envelope;
use super::error::ApiError;
use super::extract::{ADMIN_COOKIE, admin_cookie, parse_id, removal_cookie};
use super::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(login)
        .service(logout)
        .service(list_keys)
        .service(create_key)
        .service(get_key)
        .service(update_key)
        .service(delete_key)
        .service(list_all_members)
        .service(list_members)
        .service(add_member)
        .service(update_member)
        .service(remove_member);
}

// ── Admin login ──────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretLogin {
    secret_key: Option<String>,
}

#[post("/api/auth/secret-key")]
async fn login(body: web::Json<SecretLogin>, state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let Some(secret) = body.into_inner().secret_key.filter(|s| !s.is_empty()) else {
        return Err(ApiError::bad_request("Secret key is required"));
    };
    if !state.admin.verify(&secret) {
        tracing::warn!("admin login rejected");
        return Err(ApiError::bad_request("Invalid secret key"));
    }
    let mut response = envelope::ok(json!({ "authenticated": true }));
    response
        .add_cookie(&admin_cookie(secret, state.secure_cookies))
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(response)
}

#[post("/api/auth/logout")]
async fn logout() -> Result<HttpResponse, ApiError> {
    let mut response = envelope::ok(json!({ "loggedOut": true }));
    response
        .add_cookie(&removal_cookie(ADMIN_COOKIE))
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(response)
}

// ── Organizations ────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OrganizationView {
    id: u64,
    name: String,
    key: String,
    division: String,
    subdivision: Option<String>,
    portal_enabled: bool,
    created_at: String,
    updated_at: String,
    booking_count: usize,
}

impl OrganizationView {
    fn new(org: Organization, booking_count: usize) -> Self {
        Self {
            id: org.id,
            name: org.name,
            key: org.key,
            division: org.division,
            subdivision: org.subdivision,
            portal_enabled: org.portal_enabled,
            created_at: format_instant(org.created_at),
            updated_at: format_instant(org.updated_at),
            booking_count,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrganizationBody {
    name: Option<String>,
    division: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    subdivision: Option<Option<String>>,
    portal_enabled: Option<bool>,
}

fn check_text(errors: &mut FieldErrors, field: &str, value: &str, max: usize, label: &str) {
    if value.trim().is_empty() {
        errors.entry(field.into()).or_default().push(format!("{label} is required"));
    } else if value.len() > max {
        errors.entry(field.into()).or_default().push(format!("{label} is too long"));
    }
}

impl OrganizationBody {
    /// Returns the patch; with `require_all` name and division must be present.
    fn into_patch(self, require_all: bool) -> Result<OrganizationPatch, FieldErrors> {
        let mut errors = FieldErrors::new();
        match self.name.as_deref() {
            Some(name) => check_text(&mut errors, "name", name, MAX_NAME_LEN, "Name"),
            None if require_all => check_text(&mut errors, "name", "", MAX_NAME_LEN, "Name"),
            None => {}
        }
        match self.division.as_deref() {
            Some(division) => check_text(&mut errors, "division", division, MAX_CODE_LEN, "Division"),
            None if require_all => check_text(&mut errors, "division", "", MAX_CODE_LEN, "Division"),
            None => {}
        }
        if let Some(Some(sub)) = &self.subdivision
            && sub.len() > MAX_CODE_LEN
        {
            errors.entry("subdivision".into()).or_default().push("Subdivision is too long".into());
        }
        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(OrganizationPatch {
            name: self.name.map(|n| n.trim().to_string()),
            division: self.division.map(|d| d.trim().to_string()),
            subdivision: self
                .subdivision
                .map(|s| s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())),
            portal_enabled: self.portal_enabled,
        })
    }
}

fn key_id(path: &str) -> Result<u64, ApiError> {
    parse_id(path, "Invalid API key ID")
}

fn key_not_found() -> ApiError {
    ApiError::not_found("API key not found")
}

#[get("/api/keys")]
async fn list_keys(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    state.admin(&req).await?;
    let views: Vec<OrganizationView> = state
        .store
        .list_organizations()
        .into_iter()
        .map(|org| {
            let count = state.store.booking_count(org.id);
            OrganizationView::new(org, count)
        })
        .collect();
    Ok(envelope::ok(views))
}

#[post("/api/keys")]
async fn create_key(
    req: HttpRequest,
    body: web::Json<OrganizationBody>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    state.admin(&req).await?;
    let patch = body.into_inner().into_patch(true)?;
    let (Some(name), Some(division)) = (patch.name, patch.division) else {
        return Err(field_error("name", "Name is required").into());
    };
    let org = state
        .store
        .create_organization(
            NewOrganization {
                name,
                division,
                subdivision: patch.subdivision.flatten(),
                portal_enabled: patch.portal_enabled.unwrap_or(true),
            },
            now_ms(),
        )
        .await?;
    tracing::info!("organization {} created", org.id);
    Ok(envelope::created(OrganizationView::new(org, 0)))
}

#[get("/api/keys/{id}")]
async fn get_key(
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    state.admin(&req).await?;
    let id = key_id(&path)?;
    let org = state.store.get_organization(id).ok_or_else(key_not_found)?;
    let count = state.store.booking_count(id);
    Ok(envelope::ok(OrganizationView::new(org, count)))
}

#[put("/api/keys/{id}")]
async fn update_key(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<OrganizationBody>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    state.admin(&req).await?;
    let id = key_id(&path)?;
    let patch = body.into_inner().into_patch(false)?;
    if state.store.get_organization(id).is_none() {
        return Err(key_not_found());
    }
    let org = state.store.update_organization(id, patch, now_ms()).await?;
    let count = state.store.booking_count(id);
    Ok(envelope::ok(OrganizationView::new(org, count)))
}

#[delete("/api/keys/{id}")]
async fn delete_key(
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    state.admin(&req).await?;
    let id = key_id(&path)?;
    if state.store.get_organization(id).is_none() {
        return Err(key_not_found());
    }
    state.store.delete_organization(id).await?;
    tracing::info!("organization {id} deleted");
    Ok(envelope::no_content())
}

// ── Memberships ──────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct MemberView {
    id: u64,
    cid: String,
    organization_id: u64,
    role: Role,
    created_at: String,
    updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization: Option<OrganizationSummary>,
}

impl MemberView {
    pub(super) fn new(member: OrgMember, organization: Option<OrganizationSummary>) -> Self {
        Self {
            id: member.id,
            cid: member.cid,
            organization_id: member.organization_id,
            role: member.role,
            created_at: format_instant(member.created_at),
            updated_at: format_instant(member.updated_at),
            organization,
        }
    }
}

fn member_id(path: &str) -> Result<u64, ApiError> {
    parse_id(path, "Invalid member ID")
}

pub(super) fn parse_role(raw: Option<&str>, default: Role) -> Result<Role, ApiError> {
    match raw {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: String| field_error("role", e).into()),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MembersQuery {
    org_id: Option<String>,
}

#[get("/api/org-members/all")]
async fn list_all_members(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    state.admin(&req).await?;
    let views: Vec<MemberView> = state
        .store
        .list_members()
        .into_iter()
        .map(|m| {
            let org = state.store.get_organization(m.organization_id).map(|o| o.summary());
            MemberView::new(m, org)
        })
        .collect();
    Ok(envelope::ok(views))
}

#[get("/api/org-members")]
async fn list_members(
    req: HttpRequest,
    query: web::Query<MembersQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    state.admin(&req).await?;
    let raw = query
        .into_inner()
        .org_id
        .ok_or_else(|| ApiError::bad_request("Organization ID is required"))?;
    let org_id = parse_id(&raw, "Invalid organization ID")?;
    let org = state
        .store
        .get_organization(org_id)
        .ok_or_else(|| ApiError::not_found("Organization not found"))?;
    let summary = org.summary();
    let views: Vec<MemberView> = state
        .store
        .members_of(org_id)
        .into_iter()
        .map(|m| MemberView::new(m, Some(summary.clone())))
        .collect();
    Ok(envelope::ok(views))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewMemberBody {
    cid: Option<String>,
    api_key_id: Option<u64>,
    role: Option<String>,
}

#[post("/api/org-members")]
async fn add_member(
    req: HttpRequest,
    body: web::Json<NewMemberBody>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    state.admin(&req).await?;
    let body = body.into_inner();
    let mut errors = FieldErrors::new();
    match body.cid.as_deref() {
        None | Some("") => errors.insert("cid".into(), vec!["CID is required".into()]),
        Some(cid) if !is_valid_cid(cid) => {
            errors.insert("cid".into(), vec!["CID must be a valid numeric VATSIM CID".into()])
        }
        Some(_) => None,
    };
    if body.api_key_id.is_none() {
        errors.insert("apiKeyId".into(), vec!["Organization is required".into()]);
    }
    if !errors.is_empty() {
        return Err(errors.into());
    }
    let (Some(cid), Some(org_id)) = (body.cid, body.api_key_id) else {
        return Err(ApiError::bad_request("CID is required"));
    };
    let role = parse_role(body.role.as_deref(), Role::Manager)?;
    let org = state
        .store
        .get_organization(org_id)
        .ok_or_else(|| ApiError::not_found("Organization not found"))?;

    let member = state.store.add_member(cid, org.id, role, now_ms()).await?;
    tracing::info!("member {} added to organization {} as {}", member.cid, org.id, member.role);
    Ok(envelope::created(MemberView::new(member, Some(org.summary()))))
}

#[derive(Deserialize)]
pub(super) struct RoleBody {
    pub(super) role: Option<String>,
}

#[put("/api/org-members/{id}")]
async fn update_member(
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Json<RoleBody>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    state.admin(&req).await?;
    let id = member_id(&path)?;
    let Some(raw) = body.into_inner().role else {
        return Err(field_error("role", "Role is required").into());
    };
    let role = parse_role(Some(&raw), Role::Member)?;
    let member = state.store.set_member_role(id, role, now_ms()).await?;
    let org = state.store.get_organization(member.organization_id).map(|o| o.summary());
    Ok(envelope::ok(MemberView::new(member, org)))
}

#[delete("/api/org-members/{id}")]
async fn remove_member(
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    state.admin(&req).await?;
    let id = member_id(&path)?;
    let member = state.store.remove_member(id).await?;
    tracing::info!("member {} removed from organization {}", member.cid, member.organization_id);
    Ok(envelope::no_content())
}
