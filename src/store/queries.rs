use crate::model::*;

use super::Store;

impl Store {
    pub fn get_organization(&self, id: u64) -> Option<Organization> {
        self.organizations.get(&id).map(|o| o.value().clone())
    }

    pub fn organization_by_key(&self, key: &str) -> Option<Organization> {
        let id = *self.org_keys.get(key)?;
        self.get_organization(id)
    }

    /// Newest first.
    pub fn list_organizations(&self) -> Vec<Organization> {
        let mut orgs: Vec<Organization> = self.organizations.iter().map(|o| o.value().clone()).collect();
        orgs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        orgs
    }

    pub fn booking_count(&self, organization_id: u64) -> usize {
        self.bookings
            .iter()
            .filter(|b| b.organization_id == organization_id)
            .count()
    }

    pub fn get_booking(&self, id: u64) -> Option<Booking> {
        self.bookings.get(&id).map(|b| b.value().clone())
    }

    /// Bookings matching `filter`, ordered by start time.
    pub fn list_bookings(&self, filter: &BookingFilter, now: Ms) -> Vec<Booking> {
        let mut out: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|b| filter.matches(b.value(), now))
            .map(|b| b.value().clone())
            .collect();
        out.sort_by(|a, b| a.span.start.cmp(&b.span.start).then(a.id.cmp(&b.id)));
        out
    }

    /// Whether `span` intersects any booking on `callsign` other than `exclude`.
    pub async fn has_overlap(&self, callsign: &str, span: &Span, exclude: Option<u64>) -> bool {
        let Some(cal) = self.calendars.get(callsign).map(|c| c.value().clone()) else {
            return false;
        };
        let guard = cal.read().await;
        guard
            .find_conflict(span, exclude, |b| self.is_live_booking(b))
            .is_some()
    }

    pub fn get_member(&self, id: u64) -> Option<OrgMember> {
        self.members.get(&id).map(|m| m.value().clone())
    }

    pub fn find_member(&self, cid: &str, organization_id: u64) -> Option<OrgMember> {
        let id = *self.member_index.get(&(cid.to_string(), organization_id))?;
        self.get_member(id)
    }

    /// Members of one organization, newest first.
    pub fn members_of(&self, organization_id: u64) -> Vec<OrgMember> {
        let mut out: Vec<OrgMember> = self
            .members
            .iter()
            .filter(|m| m.organization_id == organization_id)
            .map(|m| m.value().clone())
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out
    }

    /// Every membership of `cid` paired with its organization, oldest first.
    pub fn memberships_of(&self, cid: &str) -> Vec<(OrgMember, Organization)> {
        let mut out: Vec<(OrgMember, Organization)> = self
            .members
            .iter()
            .filter(|m| m.cid == cid)
            .filter_map(|m| {
                let org = self.get_organization(m.organization_id)?;
                Some((m.value().clone(), org))
            })
            .collect();
        out.sort_by_key(|(m, _)| m.id);
        out
    }

    /// All memberships across organizations, newest first.
    pub fn list_members(&self) -> Vec<OrgMember> {
        let mut out: Vec<OrgMember> = self.members.iter().map(|m| m.value().clone()).collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out
    }

    pub fn get_session(&self, id: &str) -> Option<Session> {
        self.sessions.get(id).map(|s| s.value().clone())
    }

    pub fn expired_session_ids(&self, now: Ms) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|s| s.is_expired(now))
            .map(|s| s.key().clone())
            .collect()
    }
}
