//! Booking engine: validation, ownership checks and overlap-safe writes on
//! top of the store.

pub mod validate;

pub use validate::{BookingInput, BookingQuery, FieldErrors};

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::auth::{Access, Principal, access};
use crate::model::*;
use crate::observability::{BOOKING_CONFLICTS_TOTAL, BOOKINGS_CREATED_TOTAL};
use crate::store::{BookingDraft, Entity, Store, StoreError};

use validate::{OVERLAP_MESSAGE, check_fields, check_times, field_error, format_instant};

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("Validation failed")]
    Validation(FieldErrors),
    /// Business-rule reject, e.g. touching another organization's booking
    /// with a bearer key.
    #[error("{0}")]
    Rejected(&'static str),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("Booking not found")]
    NotFound,
    #[error(transparent)]
    Store(StoreError),
}

impl From<FieldErrors> for BookingError {
    fn from(errors: FieldErrors) -> Self {
        BookingError::Validation(errors)
    }
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(existing) => {
                metrics::counter!(BOOKING_CONFLICTS_TOTAL).increment(1);
                tracing::debug!("overlap with booking {existing}");
                BookingError::Validation(field_error("booking", OVERLAP_MESSAGE))
            }
            StoreError::NotFound(Entity::Booking, _) => BookingError::NotFound,
            other => BookingError::Store(other),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Update,
    Delete,
}

/// A booking as returned to clients, with its owner denormalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingView {
    pub id: u64,
    pub cid: String,
    pub callsign: String,
    #[serde(rename = "type")]
    pub category: BookingCategory,
    pub start: String,
    pub end: String,
    pub division: String,
    pub subdivision: Option<String>,
    pub organization_id: u64,
    pub created_at: String,
    pub updated_at: String,
    pub organization: OrganizationSummary,
}

impl BookingView {
    pub fn new(booking: Booking, organization: OrganizationSummary) -> Self {
        Self {
            id: booking.id,
            cid: booking.cid,
            callsign: booking.callsign,
            category: booking.category,
            start: format_instant(booking.span.start),
            end: format_instant(booking.span.end),
            division: booking.division,
            subdivision: booking.subdivision,
            organization_id: booking.organization_id,
            created_at: format_instant(booking.created_at),
            updated_at: format_instant(booking.updated_at),
            organization,
        }
    }
}

pub struct BookingService {
    store: Arc<Store>,
}

impl BookingService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    fn view(&self, booking: Booking) -> Result<BookingView, BookingError> {
        let org = self
            .store
            .get_organization(booking.organization_id)
            .ok_or(BookingError::NotFound)?;
        Ok(BookingView::new(booking, org.summary()))
    }

    fn views(&self, bookings: Vec<Booking>) -> Vec<BookingView> {
        let mut owners: HashMap<u64, Option<OrganizationSummary>> = HashMap::new();
        bookings
            .into_iter()
            .filter_map(|b| {
                let summary = owners
                    .entry(b.organization_id)
                    .or_insert_with(|| self.store.get_organization(b.organization_id).map(|o| o.summary()))
                    .clone()?;
                Some(BookingView::new(b, summary))
            })
            .collect()
    }

    /// Owner check for update and delete. Foreign bookings look missing to
    /// session callers and wrong-owner to bearer callers.
    fn authorize(principal: &Principal, booking: &Booking, action: Action) -> Result<(), BookingError> {
        match (access(principal, booking), action) {
            (Access::Granted, _) => Ok(()),
            (Access::Hidden, _) => Err(BookingError::NotFound),
            (Access::WrongOwner, Action::Update) => {
                Err(BookingError::Rejected("You can only update your own bookings"))
            }
            (Access::WrongOwner, Action::Delete) => {
                Err(BookingError::Rejected("You can only delete your own bookings"))
            }
            (Access::NotOwnCid, Action::Update) => {
                Err(BookingError::Forbidden("You can only update your own bookings"))
            }
            (Access::NotOwnCid, Action::Delete) => {
                Err(BookingError::Forbidden("You can only delete your own bookings"))
            }
        }
    }

    /// The organization a new booking is attributed to.
    fn owner_for_create(&self, principal: &Principal, input: &BookingInput) -> Result<Organization, BookingError> {
        match principal {
            Principal::Admin => {
                let id = input
                    .organization_id
                    .ok_or_else(|| field_error("organizationId", "Organization is required"))?;
                Ok(self
                    .store
                    .get_organization(id)
                    .ok_or_else(|| field_error("organizationId", "Organization not found"))?)
            }
            Principal::Organization(org) | Principal::Member { organization: org, .. } => Ok(org.clone()),
        }
    }

    pub async fn create(
        &self,
        principal: &Principal,
        mut input: BookingInput,
        now: Ms,
    ) -> Result<BookingView, BookingError> {
        let organization = self.owner_for_create(principal, &input)?;

        if let Principal::Member { cid, role, .. } = principal {
            match input.cid.as_deref() {
                None => input.cid = Some(cid.clone()),
                Some(other) if *role == Role::Member && other != cid => {
                    return Err(BookingError::Forbidden("You can only create bookings for yourself"));
                }
                Some(_) => {}
            }
        }

        let fields = check_fields(&input, true)?;
        let (Some(cid), Some(callsign), Some(start), Some(end), Some(division)) =
            (fields.cid, fields.callsign, fields.start, fields.end, fields.division)
        else {
            return Err(field_error("booking", "Incomplete booking").into());
        };
        let span = check_times(start, end, now)?;

        let draft = BookingDraft {
            organization_id: organization.id,
            cid,
            callsign,
            category: fields.category.unwrap_or_default(),
            span,
            division,
            subdivision: fields.subdivision.flatten(),
        };
        let booking = self.store.insert_booking(draft, now).await?;
        metrics::counter!(BOOKINGS_CREATED_TOTAL, "scheme" => principal.kind()).increment(1);
        tracing::info!(
            "booking {} created on {} for cid {} by organization {}",
            booking.id,
            booking.callsign,
            booking.cid,
            organization.id
        );
        Ok(BookingView::new(booking, organization.summary()))
    }

    pub fn get(&self, id: u64) -> Result<BookingView, BookingError> {
        let booking = self.store.get_booking(id).ok_or(BookingError::NotFound)?;
        self.view(booking)
    }

    /// Public listing, ordered by start.
    pub fn list(&self, filter: &BookingFilter, now: Ms) -> Vec<BookingView> {
        self.views(self.store.list_bookings(filter, now))
    }

    /// Bookings visible to an organization-scoped caller. Member-role sessions
    /// only see their own.
    pub fn list_own(&self, principal: &Principal, now: Ms) -> Vec<BookingView> {
        let filter = match principal {
            Principal::Admin => BookingFilter::default(),
            Principal::Organization(org) => BookingFilter {
                organization_id: Some(org.id),
                ..Default::default()
            },
            Principal::Member { organization, cid, role, .. } => BookingFilter {
                organization_id: Some(organization.id),
                cid: (*role == Role::Member).then(|| cid.clone()),
                ..Default::default()
            },
        };
        self.list(&filter, now)
    }

    pub async fn update(
        &self,
        principal: &Principal,
        id: u64,
        input: BookingInput,
        now: Ms,
    ) -> Result<BookingView, BookingError> {
        // Early reject; the owner check is repeated on the locked record.
        let existing = self.store.get_booking(id).ok_or(BookingError::NotFound)?;
        Self::authorize(principal, &existing, Action::Update)?;
        if let Principal::Member { cid, role: Role::Member, .. } = principal
            && input.cid.as_ref().is_some_and(|c| c != cid)
        {
            return Err(BookingError::Forbidden("You cannot change the booking CID"));
        }

        let mut fields = check_fields(&input, false)?;
        let slot_changed = fields.start.is_some() || fields.end.is_some() || fields.callsign.is_some();
        let callsign = fields.callsign.take();

        let saved = self
            .store
            .update_booking(id, callsign, |current: &Booking| -> Result<Booking, BookingError> {
                Self::authorize(principal, current, Action::Update)?;
                let mut updated = current.clone();
                if let Some(cid) = fields.cid {
                    updated.cid = cid;
                }
                if let Some(category) = fields.category {
                    updated.category = category;
                }
                if let Some(division) = fields.division {
                    updated.division = division;
                }
                if let Some(subdivision) = fields.subdivision {
                    updated.subdivision = subdivision;
                }
                if slot_changed {
                    updated.span = check_times(
                        fields.start.unwrap_or(current.span.start),
                        fields.end.unwrap_or(current.span.end),
                        now,
                    )?;
                }
                updated.updated_at = now;
                Ok(updated)
            })
            .await?;
        tracing::info!("booking {} updated", saved.id);
        self.view(saved)
    }

    pub async fn delete(&self, principal: &Principal, id: u64) -> Result<(), BookingError> {
        self.store
            .remove_booking(id, |current: &Booking| Self::authorize(principal, current, Action::Delete))
            .await?;
        tracing::info!("booking {id} deleted");
        Ok(())
    }
}
