use std::collections::BTreeSet;

use tokio::sync::oneshot;

use crate::limits::*;
use crate::model::*;

use super::{Entity, Store, StoreError, WalCommand, generate_token};

pub struct NewOrganization {
    pub name: String,
    pub division: String,
    pub subdivision: Option<String>,
    pub portal_enabled: bool,
}

/// Partial update. `subdivision: Some(None)` clears it.
#[derive(Debug, Default)]
pub struct OrganizationPatch {
    pub name: Option<String>,
    pub division: Option<String>,
    pub subdivision: Option<Option<String>>,
    pub portal_enabled: Option<bool>,
}

/// A validated booking before it has an id.
#[derive(Debug, Clone)]
pub struct BookingDraft {
    pub organization_id: u64,
    pub cid: String,
    pub callsign: String,
    pub category: BookingCategory,
    pub span: Span,
    pub division: String,
    pub subdivision: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RosterMerge {
    pub added: usize,
    pub existing: usize,
}

impl RosterMerge {
    pub fn total(&self) -> usize {
        self.added + self.existing
    }
}

impl Store {
    // ── Organizations ────────────────────────────────────────

    pub async fn create_organization(
        &self,
        new: NewOrganization,
        now: Ms,
    ) -> Result<Organization, StoreError> {
        let _guard = self.organization_lock.lock().await;
        if self.organizations.len() >= MAX_ORGANIZATIONS {
            return Err(StoreError::LimitExceeded("too many organizations"));
        }
        let key = loop {
            let candidate = generate_token();
            if !self.org_keys.contains_key(&candidate) {
                break candidate;
            }
        };
        let org = Organization {
            id: self.next_organization_id(),
            name: new.name,
            key,
            division: new.division,
            subdivision: new.subdivision,
            portal_enabled: new.portal_enabled,
            created_at: now,
            updated_at: now,
        };
        self.persist(Event::OrganizationCreated(org.clone())).await?;
        tracing::info!("organization {} created ({})", org.id, org.name);
        Ok(org)
    }

    pub async fn update_organization(
        &self,
        id: u64,
        patch: OrganizationPatch,
        now: Ms,
    ) -> Result<Organization, StoreError> {
        let _guard = self.organization_lock.lock().await;
        let mut org = self
            .get_organization(id)
            .ok_or_else(|| StoreError::not_found(Entity::Organization, id))?;
        if let Some(name) = patch.name {
            org.name = name;
        }
        if let Some(division) = patch.division {
            org.division = division;
        }
        if let Some(subdivision) = patch.subdivision {
            org.subdivision = subdivision;
        }
        if let Some(enabled) = patch.portal_enabled {
            org.portal_enabled = enabled;
        }
        org.updated_at = now;
        self.persist(Event::OrganizationUpdated(org.clone())).await?;
        Ok(org)
    }

    /// Remove an organization together with its bookings and memberships.
    pub async fn delete_organization(&self, id: u64) -> Result<Organization, StoreError> {
        let (org, callsigns) = {
            let _guard = self.organization_lock.lock().await;
            let _gate = self.write_gate.write().await;
            let org = self
                .get_organization(id)
                .ok_or_else(|| StoreError::not_found(Entity::Organization, id))?;
            let callsigns: BTreeSet<String> = self
                .bookings
                .iter()
                .filter(|b| b.organization_id == id)
                .map(|b| b.callsign.clone())
                .collect();
            let event = Event::OrganizationDeleted { id };
            self.wal_append(&event).await?;
            self.apply_event(&event);
            (org, callsigns)
        };

        // The gate is released; stale entries are already invisible to
        // conflict checks, this just reclaims them.
        for callsign in &callsigns {
            let cal = self.calendar(callsign);
            cal.write().await.retain_live(|b| self.is_live_booking(b));
        }
        tracing::info!(
            "organization {} deleted, {} calendars pruned",
            id,
            callsigns.len()
        );
        Ok(org)
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Insert a booking unless its slot overlaps another booking on the same
    /// resource. The check and the write happen under one calendar lock.
    pub async fn insert_booking(&self, draft: BookingDraft, now: Ms) -> Result<Booking, StoreError> {
        let cal = self.calendar(&draft.callsign);
        let mut guard = cal.write().await;
        if guard.len() >= MAX_BOOKINGS_PER_CALLSIGN {
            return Err(StoreError::LimitExceeded("too many bookings on callsign"));
        }
        if let Some(existing) = guard.find_conflict(&draft.span, None, |b| self.is_live_booking(b)) {
            return Err(StoreError::Conflict(existing));
        }

        let booking = Booking {
            id: self.next_booking_id(),
            organization_id: draft.organization_id,
            cid: draft.cid,
            callsign: draft.callsign,
            category: draft.category,
            span: draft.span,
            division: draft.division,
            subdivision: draft.subdivision,
            created_at: now,
            updated_at: now,
        };
        self.persist(Event::BookingCreated(booking.clone())).await?;
        guard.insert(booking.id, booking.span);
        Ok(booking)
    }

    /// Edit a booking under its calendar locks. `edit` builds the new record
    /// from the current one and may refuse; `callsign` moves it to another
    /// resource. A changed slot is tested against every other booking on the
    /// target resource.
    pub async fn update_booking<E, F>(&self, id: u64, callsign: Option<String>, edit: F) -> Result<Booking, E>
    where
        E: From<StoreError>,
        F: FnOnce(&Booking) -> Result<Booking, E>,
    {
        let (names, mut guards, current) = loop {
            let source = self
                .bookings
                .get(&id)
                .map(|b| b.callsign.clone())
                .ok_or_else(|| StoreError::not_found(Entity::Booking, id))?;

            let mut names = vec![source.clone(), callsign.clone().unwrap_or_else(|| source.clone())];
            names.sort();
            names.dedup();
            let mut guards = Vec::with_capacity(names.len());
            for name in &names {
                guards.push(self.calendar(name).write_owned().await);
            }

            // Another writer may have moved the booking while we waited.
            match self.get_booking(id) {
                None => return Err(StoreError::not_found(Entity::Booking, id).into()),
                Some(b) if b.callsign == source => break (names, guards, b),
                Some(_) => continue,
            }
        };

        let mut updated = edit(&current)?;
        updated.id = current.id;
        updated.organization_id = current.organization_id;
        updated.created_at = current.created_at;
        updated.callsign = callsign.unwrap_or_else(|| current.callsign.clone());

        let target = names
            .binary_search(&updated.callsign)
            .unwrap_or_else(|i| i);
        let moved = updated.callsign != current.callsign;
        if moved && guards[target].len() >= MAX_BOOKINGS_PER_CALLSIGN {
            return Err(StoreError::LimitExceeded("too many bookings on callsign").into());
        }
        if (moved || updated.span != current.span)
            && let Some(existing) =
                guards[target].find_conflict(&updated.span, Some(id), |b| self.is_live_booking(b))
        {
            return Err(StoreError::Conflict(existing).into());
        }

        self.persist(Event::BookingUpdated(updated.clone())).await?;
        for guard in guards.iter_mut() {
            guard.remove(id);
        }
        guards[target].insert(id, updated.span);
        Ok(updated)
    }

    /// Delete a booking once `check` accepts the record read under its
    /// calendar lock.
    pub async fn remove_booking<E, F>(&self, id: u64, check: F) -> Result<Booking, E>
    where
        E: From<StoreError>,
        F: FnOnce(&Booking) -> Result<(), E>,
    {
        let (mut guard, booking) = loop {
            let callsign = self
                .bookings
                .get(&id)
                .map(|b| b.callsign.clone())
                .ok_or_else(|| StoreError::not_found(Entity::Booking, id))?;
            let guard = self.calendar(&callsign).write_owned().await;
            match self.get_booking(id) {
                None => return Err(StoreError::not_found(Entity::Booking, id).into()),
                Some(b) if b.callsign == callsign => break (guard, b),
                Some(_) => continue,
            }
        };

        check(&booking)?;
        self.persist(Event::BookingDeleted { id }).await?;
        guard.remove(id);
        Ok(booking)
    }

    // ── Memberships ──────────────────────────────────────────

    pub async fn add_member(
        &self,
        cid: String,
        organization_id: u64,
        role: Role,
        now: Ms,
    ) -> Result<OrgMember, StoreError> {
        let _guard = self.membership_lock.lock().await;
        self.add_member_locked(cid, organization_id, role, now).await
    }

    async fn add_member_locked(
        &self,
        cid: String,
        organization_id: u64,
        role: Role,
        now: Ms,
    ) -> Result<OrgMember, StoreError> {
        if self.member_index.contains_key(&(cid.clone(), organization_id)) {
            return Err(StoreError::AlreadyExists(
                Entity::Member,
                format!("{cid} in organization {organization_id}"),
            ));
        }
        let member = OrgMember {
            id: self.next_member_id(),
            cid,
            organization_id,
            role,
            created_at: now,
            updated_at: now,
        };
        self.persist(Event::MemberAdded(member.clone())).await?;
        Ok(member)
    }

    pub async fn set_member_role(&self, id: u64, role: Role, now: Ms) -> Result<OrgMember, StoreError> {
        let _guard = self.membership_lock.lock().await;
        if !self.members.contains_key(&id) {
            return Err(StoreError::not_found(Entity::Member, id));
        }
        self.persist(Event::MemberRoleChanged { id, role, at: now }).await?;
        self.get_member(id)
            .ok_or_else(|| StoreError::not_found(Entity::Member, id))
    }

    pub async fn remove_member(&self, id: u64) -> Result<OrgMember, StoreError> {
        let _guard = self.membership_lock.lock().await;
        let member = self
            .get_member(id)
            .ok_or_else(|| StoreError::not_found(Entity::Member, id))?;
        self.persist(Event::MemberRemoved { id }).await?;
        Ok(member)
    }

    /// Add every cid not yet in the organization with the member role. A cid
    /// listed twice counts as existing the second time.
    pub async fn merge_roster(
        &self,
        organization_id: u64,
        cids: &[String],
        now: Ms,
    ) -> Result<RosterMerge, StoreError> {
        let _guard = self.membership_lock.lock().await;
        if !self.organizations.contains_key(&organization_id) {
            return Err(StoreError::not_found(Entity::Organization, organization_id));
        }
        let mut merge = RosterMerge::default();
        for cid in cids {
            if self.member_index.contains_key(&(cid.clone(), organization_id)) {
                merge.existing += 1;
                continue;
            }
            self.add_member_locked(cid.clone(), organization_id, Role::Member, now)
                .await?;
            merge.added += 1;
        }
        Ok(merge)
    }

    // ── Sessions ─────────────────────────────────────────────

    pub async fn create_session(
        &self,
        cid: String,
        name: String,
        organization_id: Option<u64>,
        expires_at: Ms,
    ) -> Result<Session, StoreError> {
        let session = Session {
            id: generate_token(),
            cid,
            name,
            organization_id,
            expires_at,
        };
        self.persist(Event::SessionCreated(session.clone())).await?;
        Ok(session)
    }

    pub async fn switch_session_organization(
        &self,
        id: &str,
        organization_id: u64,
    ) -> Result<(), StoreError> {
        if !self.sessions.contains_key(id) {
            return Err(StoreError::not_found(Entity::Session, id));
        }
        self.persist(Event::SessionSwitched {
            id: id.to_string(),
            organization_id,
        })
        .await
    }

    /// Returns false when there was no such session.
    pub async fn delete_session(&self, id: &str) -> Result<bool, StoreError> {
        if !self.sessions.contains_key(id) {
            return Ok(false);
        }
        self.persist(Event::SessionDeleted { id: id.to_string() }).await?;
        Ok(true)
    }

    pub async fn purge_expired_sessions(&self, now: Ms) -> Result<usize, StoreError> {
        let mut purged = 0;
        for id in self.expired_session_ids(now) {
            if self.delete_session(&id).await? {
                purged += 1;
            }
        }
        Ok(purged)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL as a minimal snapshot of the live tables.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        let _gate = self.write_gate.write().await;
        let now = now_ms();

        let mut organizations: Vec<Organization> =
            self.organizations.iter().map(|o| o.value().clone()).collect();
        organizations.sort_by_key(|o| o.id);
        let mut members: Vec<OrgMember> = self.members.iter().map(|m| m.value().clone()).collect();
        members.sort_by_key(|m| m.id);
        let mut bookings: Vec<Booking> = self.bookings.iter().map(|b| b.value().clone()).collect();
        bookings.sort_by_key(|b| b.id);
        let sessions: Vec<Session> = self
            .sessions
            .iter()
            .filter(|s| !s.is_expired(now))
            .map(|s| s.value().clone())
            .collect();

        let mut events = Vec::with_capacity(
            1 + organizations.len() + members.len() + bookings.len() + sessions.len(),
        );
        events.push(self.ids.watermark());
        events.extend(organizations.into_iter().map(Event::OrganizationCreated));
        events.extend(members.into_iter().map(Event::MemberAdded));
        events.extend(bookings.into_iter().map(Event::BookingCreated));
        events.extend(sessions.into_iter().map(Event::SessionCreated));

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
