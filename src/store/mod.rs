mod calendar;
mod error;
mod mutations;
mod queries;

pub use calendar::{Calendar, Entry};
pub use error::{Entity, StoreError};
pub use mutations::{BookingDraft, NewOrganization, OrganizationPatch, RosterMerge};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};

use crate::limits::TOKEN_BYTES;
use crate::model::*;
use crate::wal::Wal;

pub type SharedCalendar = Arc<RwLock<Calendar>>;

/// Random hex token used for API keys, session ids and OAuth state.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill(&mut bytes[..]);
    hex::encode(bytes)
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the WAL. Each wake-up drains every append already queued and commits
/// them with a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(ref e) = result {
            tracing::error!("WAL flush of {} events failed: {e}", batch.len());
        }
        for (_, tx) in batch {
            let _ = tx.send(match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            });
        }
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let appended = batch.iter().try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so partial bytes don't leak into the next batch.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

#[derive(Default)]
pub(super) struct IdCounters {
    organization: AtomicU64,
    booking: AtomicU64,
    member: AtomicU64,
}

impl IdCounters {
    fn next(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn observe(counter: &AtomicU64, id: u64) {
        counter.fetch_max(id, Ordering::Relaxed);
    }

    pub(super) fn watermark(&self) -> Event {
        Event::IdWatermark {
            organization: self.organization.load(Ordering::Relaxed),
            booking: self.booking.load(Ordering::Relaxed),
            member: self.member.load(Ordering::Relaxed),
        }
    }
}

/// The resource store: organizations, bookings, memberships and sessions held
/// in concurrent tables, made durable through the WAL.
///
/// Lock order is calendar write locks (sorted by resource name) first, then
/// the write gate. Cascade deletes and compaction take the gate exclusively
/// and never touch a calendar lock while holding it.
pub struct Store {
    pub(super) organizations: DashMap<u64, Organization>,
    pub(super) org_keys: DashMap<String, u64>,
    pub(super) bookings: DashMap<u64, Booking>,
    pub(super) calendars: DashMap<String, SharedCalendar>,
    pub(super) members: DashMap<u64, OrgMember>,
    /// `(cid, organization_id)` → member id.
    pub(super) member_index: DashMap<(String, u64), u64>,
    pub(super) sessions: DashMap<String, Session>,
    pub(super) ids: IdCounters,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) write_gate: RwLock<()>,
    /// Serializes membership uniqueness checks with their appends.
    pub(super) membership_lock: Mutex<()>,
    /// Serializes organization creation so keys stay unique.
    pub(super) organization_lock: Mutex<()>,
}

impl Store {
    /// Recover state from the WAL at `wal_path` and start the writer task.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            organizations: DashMap::new(),
            org_keys: DashMap::new(),
            bookings: DashMap::new(),
            calendars: DashMap::new(),
            members: DashMap::new(),
            member_index: DashMap::new(),
            sessions: DashMap::new(),
            ids: IdCounters::default(),
            wal_tx,
            write_gate: RwLock::new(()),
            membership_lock: Mutex::new(()),
            organization_lock: Mutex::new(()),
        };
        for event in &events {
            store.apply_event(event);
        }
        store.rebuild_calendars();
        tracing::info!(
            "store recovered {} events: {} organizations, {} bookings, {} members",
            events.len(),
            store.organizations.len(),
            store.bookings.len(),
            store.members.len()
        );
        Ok(store)
    }

    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    /// Rows that point at an organization may only be written while it exists.
    fn check_references(&self, event: &Event) -> Result<(), StoreError> {
        let org_id = match event {
            Event::BookingCreated(b) | Event::BookingUpdated(b) => b.organization_id,
            Event::MemberAdded(m) => m.organization_id,
            Event::SessionSwitched { organization_id, .. } => *organization_id,
            _ => return Ok(()),
        };
        if self.organizations.contains_key(&org_id) {
            Ok(())
        } else {
            Err(StoreError::not_found(Entity::Organization, org_id))
        }
    }

    /// WAL-append + apply under the shared write gate.
    pub(super) async fn persist(&self, event: Event) -> Result<(), StoreError> {
        let _gate = self.write_gate.read().await;
        self.check_references(&event)?;
        self.wal_append(&event).await?;
        self.apply_event(&event);
        Ok(())
    }

    /// Apply an event to the tables. Calendars are maintained by the caller,
    /// which holds their locks.
    pub(super) fn apply_event(&self, event: &Event) {
        match event {
            Event::OrganizationCreated(org) => {
                IdCounters::observe(&self.ids.organization, org.id);
                self.org_keys.insert(org.key.clone(), org.id);
                self.organizations.insert(org.id, org.clone());
            }
            Event::OrganizationUpdated(org) => {
                self.organizations.insert(org.id, org.clone());
            }
            Event::OrganizationDeleted { id } => {
                if let Some((_, org)) = self.organizations.remove(id) {
                    self.org_keys.remove(&org.key);
                }
                self.bookings.retain(|_, b| b.organization_id != *id);
                self.members.retain(|_, m| m.organization_id != *id);
                self.member_index.retain(|(_, org_id), _| org_id != id);
            }
            Event::BookingCreated(b) => {
                IdCounters::observe(&self.ids.booking, b.id);
                self.bookings.insert(b.id, b.clone());
            }
            Event::BookingUpdated(b) => {
                self.bookings.insert(b.id, b.clone());
            }
            Event::BookingDeleted { id } => {
                self.bookings.remove(id);
            }
            Event::MemberAdded(m) => {
                IdCounters::observe(&self.ids.member, m.id);
                self.member_index.insert((m.cid.clone(), m.organization_id), m.id);
                self.members.insert(m.id, m.clone());
            }
            Event::MemberRoleChanged { id, role, at } => {
                if let Some(mut m) = self.members.get_mut(id) {
                    m.role = *role;
                    m.updated_at = *at;
                }
            }
            Event::MemberRemoved { id } => {
                if let Some((_, m)) = self.members.remove(id) {
                    self.member_index.remove(&(m.cid, m.organization_id));
                }
            }
            Event::SessionCreated(s) => {
                self.sessions.insert(s.id.clone(), s.clone());
            }
            Event::SessionSwitched { id, organization_id } => {
                if let Some(mut s) = self.sessions.get_mut(id) {
                    s.organization_id = Some(*organization_id);
                }
            }
            Event::SessionDeleted { id } => {
                self.sessions.remove(id);
            }
            Event::IdWatermark { organization, booking, member } => {
                IdCounters::observe(&self.ids.organization, *organization);
                IdCounters::observe(&self.ids.booking, *booking);
                IdCounters::observe(&self.ids.member, *member);
            }
        }
    }

    /// Rebuild every calendar from the bookings table. Only used on open, when
    /// nobody else holds a calendar.
    fn rebuild_calendars(&self) {
        let mut built: HashMap<String, Calendar> = HashMap::new();
        for entry in self.bookings.iter() {
            let b = entry.value();
            built
                .entry(b.callsign.clone())
                .or_insert_with(|| Calendar::new(b.callsign.clone()))
                .insert(b.id, b.span);
        }
        self.calendars.clear();
        for (callsign, cal) in built {
            self.calendars.insert(callsign, Arc::new(RwLock::new(cal)));
        }
    }

    /// Calendar for a resource name, created on first use.
    pub(super) fn calendar(&self, callsign: &str) -> SharedCalendar {
        if let Some(cal) = self.calendars.get(callsign) {
            return cal.value().clone();
        }
        self.calendars
            .entry(callsign.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(Calendar::new(callsign.to_string()))))
            .value()
            .clone()
    }

    pub(super) fn is_live_booking(&self, id: u64) -> bool {
        self.bookings.contains_key(&id)
    }

    pub(super) fn next_organization_id(&self) -> u64 {
        IdCounters::next(&self.ids.organization)
    }

    pub(super) fn next_booking_id(&self) -> u64 {
        IdCounters::next(&self.ids.booking)
    }

    pub(super) fn next_member_id(&self) -> u64 {
        IdCounters::next(&self.ids.member)
    }
}
