use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Unix milliseconds. The only time type inside the store.
pub type Ms = i64;

pub fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Any non-empty intersection. Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Inclusive on both ends: a booking is "current" at its exact end instant.
    pub fn is_active_at(&self, t: Ms) -> bool {
        self.start <= t && t <= self.end
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingCategory {
    #[default]
    #[serde(alias = "booking")]
    Standard,
    Event,
    Exam,
    Training,
}

impl BookingCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingCategory::Standard => "standard",
            BookingCategory::Event => "event",
            BookingCategory::Exam => "exam",
            BookingCategory::Training => "training",
        }
    }
}

impl FromStr for BookingCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" | "booking" => Ok(BookingCategory::Standard),
            "event" => Ok(BookingCategory::Event),
            "exam" => Ok(BookingCategory::Exam),
            "training" => Ok(BookingCategory::Training),
            other => Err(format!("invalid booking type: {other}")),
        }
    }
}

/// Role of a controller inside one organization, ordered by privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Manager,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Manager => "manager",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "member" => Ok(Role::Member),
            "manager" => Ok(Role::Manager),
            "admin" => Ok(Role::Admin),
            _ => Err("Invalid role. Must be member, manager, or admin".into()),
        }
    }
}

/// A tenant. `key` is the bearer credential and is unique across organizations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: u64,
    pub name: String,
    pub key: String,
    pub division: String,
    pub subdivision: Option<String>,
    pub portal_enabled: bool,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Organization {
    pub fn summary(&self) -> OrganizationSummary {
        OrganizationSummary {
            id: self.id,
            name: self.name.clone(),
            division: self.division.clone(),
            subdivision: self.subdivision.clone(),
        }
    }
}

/// Denormalized owner attached to booking responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationSummary {
    pub id: u64,
    pub name: String,
    pub division: String,
    pub subdivision: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: u64,
    pub organization_id: u64,
    pub cid: String,
    /// Resource name, always stored upper-cased.
    pub callsign: String,
    pub category: BookingCategory,
    pub span: Span,
    pub division: String,
    pub subdivision: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgMember {
    pub id: u64,
    pub cid: String,
    pub organization_id: u64,
    pub role: Role,
    pub created_at: Ms,
    pub updated_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub cid: String,
    pub name: String,
    pub organization_id: Option<u64>,
    pub expires_at: Ms,
}

impl Session {
    pub fn is_expired(&self, now: Ms) -> bool {
        self.expires_at < now
    }
}

/// Temporal slice for booking listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeFilter {
    Current,
    Past,
    Future,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    /// Substring match on the resource name.
    pub callsign: Option<String>,
    pub division: Option<String>,
    pub subdivision: Option<String>,
    pub category: Option<BookingCategory>,
    pub organization_id: Option<u64>,
    pub cid: Option<String>,
    pub time: Option<TimeFilter>,
    /// Lower bound on `start`.
    pub start_from: Option<Ms>,
    /// Upper bound on `end`.
    pub end_until: Option<Ms>,
}

impl BookingFilter {
    pub fn matches(&self, b: &Booking, now: Ms) -> bool {
        if let Some(ref needle) = self.callsign
            && !b.callsign.contains(needle.as_str()) {
                return false;
            }
        if self.division.as_ref().is_some_and(|d| *d != b.division) {
            return false;
        }
        if self.subdivision.is_some() && self.subdivision != b.subdivision {
            return false;
        }
        if self.category.is_some_and(|c| c != b.category) {
            return false;
        }
        if self.organization_id.is_some_and(|o| o != b.organization_id) {
            return false;
        }
        if self.cid.as_ref().is_some_and(|c| *c != b.cid) {
            return false;
        }
        match self.time {
            Some(TimeFilter::Current) if !b.span.is_active_at(now) => return false,
            Some(TimeFilter::Past) if b.span.end >= now => return false,
            Some(TimeFilter::Future) if b.span.start <= now => return false,
            _ => {}
        }
        if self.start_from.is_some_and(|t| b.span.start < t) {
            return false;
        }
        if self.end_until.is_some_and(|t| b.span.end > t) {
            return false;
        }
        true
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    OrganizationCreated(Organization),
    OrganizationUpdated(Organization),
    /// Cascades to the organization's bookings and memberships.
    OrganizationDeleted {
        id: u64,
    },
    BookingCreated(Booking),
    BookingUpdated(Booking),
    BookingDeleted {
        id: u64,
    },
    MemberAdded(OrgMember),
    MemberRoleChanged {
        id: u64,
        role: Role,
        at: Ms,
    },
    MemberRemoved {
        id: u64,
    },
    SessionCreated(Session),
    SessionSwitched {
        id: String,
        organization_id: u64,
    },
    SessionDeleted {
        id: String,
    },
    /// Highest ids ever issued, written at the head of a compacted log so ids
    /// of deleted rows are never reissued.
    IdWatermark {
        organization: u64,
        booking: u64,
        member: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking(callsign: &str, start: Ms, end: Ms) -> Booking {
        Booking {
            id: 1,
            organization_id: 7,
            cid: "1234567".into(),
            callsign: callsign.into(),
            category: BookingCategory::Standard,
            span: Span::new(start, end),
            division: "USA".into(),
            subdivision: Some("ZNY".into()),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_overlap_containment() {
        let outer = Span::new(100, 400);
        let inner = Span::new(150, 300);
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
        assert!(outer.overlaps(&outer));
    }

    #[test]
    fn active_at_is_inclusive() {
        let s = Span::new(100, 200);
        assert!(s.is_active_at(100));
        assert!(s.is_active_at(200));
        assert!(!s.is_active_at(201));
        assert!(!s.is_active_at(99));
    }

    #[test]
    fn category_parsing_accepts_legacy_alias() {
        assert_eq!("booking".parse::<BookingCategory>().unwrap(), BookingCategory::Standard);
        assert_eq!("exam".parse::<BookingCategory>().unwrap(), BookingCategory::Exam);
        assert!("lesson".parse::<BookingCategory>().is_err());
        let c: BookingCategory = serde_json::from_str("\"booking\"").unwrap();
        assert_eq!(c, BookingCategory::Standard);
        assert_eq!(serde_json::to_string(&c).unwrap(), "\"standard\"");
    }

    #[test]
    fn roles_order_by_privilege() {
        assert!(Role::Member < Role::Manager);
        assert!(Role::Manager < Role::Admin);
        assert_eq!("manager".parse::<Role>().unwrap(), Role::Manager);
        assert!("owner".parse::<Role>().is_err());
    }

    #[test]
    fn filter_substring_and_exact_fields() {
        let b = booking("KJFK_TWR", 1_000, 2_000);
        let f = BookingFilter { callsign: Some("JFK".into()), ..Default::default() };
        assert!(f.matches(&b, 0));
        let f = BookingFilter { division: Some("EUR".into()), ..Default::default() };
        assert!(!f.matches(&b, 0));
        let f = BookingFilter { subdivision: Some("ZNY".into()), ..Default::default() };
        assert!(f.matches(&b, 0));
        let f = BookingFilter { category: Some(BookingCategory::Event), ..Default::default() };
        assert!(!f.matches(&b, 0));
    }

    #[test]
    fn filter_temporal_slices() {
        let b = booking("EGLL_APP", 1_000, 2_000);
        let current = BookingFilter { time: Some(TimeFilter::Current), ..Default::default() };
        let past = BookingFilter { time: Some(TimeFilter::Past), ..Default::default() };
        let future = BookingFilter { time: Some(TimeFilter::Future), ..Default::default() };

        assert!(future.matches(&b, 500));
        assert!(!current.matches(&b, 500));
        assert!(current.matches(&b, 1_500));
        assert!(current.matches(&b, 2_000));
        assert!(!past.matches(&b, 2_000));
        assert!(past.matches(&b, 2_001));
    }

    #[test]
    fn filter_date_range_bounds() {
        let b = booking("EGLL_APP", 1_000, 2_000);
        let f = BookingFilter { start_from: Some(1_000), end_until: Some(2_000), ..Default::default() };
        assert!(f.matches(&b, 0));
        let f = BookingFilter { start_from: Some(1_001), ..Default::default() };
        assert!(!f.matches(&b, 0));
        let f = BookingFilter { end_until: Some(1_999), ..Default::default() };
        assert!(!f.matches(&b, 0));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingCreated(booking("LFPG_GND", 10, 20));
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
