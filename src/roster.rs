use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::limits::{MAX_ROSTER_PAGES, ROSTER_PAGE_SIZE};
use crate::model::{Ms, Organization};
use crate::observability::ROSTER_SYNC_TOTAL;
use crate::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("Roster API key is not configured")]
    NotConfigured,
    #[error("roster API error: {0}")]
    Upstream(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One controller in the external roster.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RosterMember {
    pub id: u64,
    #[serde(default)]
    pub name_first: Option<String>,
    #[serde(default)]
    pub name_last: Option<String>,
    #[serde(default)]
    pub subdivision_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RosterPage {
    pub items: Vec<RosterMember>,
    /// Total across all pages.
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterScope {
    Subdivision(String),
    Division(String),
}

impl RosterScope {
    pub fn path(&self) -> String {
        match self {
            RosterScope::Subdivision(code) => format!("/v2/orgs/subdivision/{code}"),
            RosterScope::Division(code) => format!("/v2/orgs/division/{code}"),
        }
    }
}

#[async_trait]
pub trait RosterSource: Send + Sync {
    /// Fails fast when the source cannot be used at all.
    fn ready(&self) -> Result<(), RosterError> {
        Ok(())
    }

    async fn fetch_page(
        &self,
        scope: &RosterScope,
        offset: usize,
        limit: usize,
    ) -> Result<RosterPage, RosterError>;
}

/// Local subdivision codes that the roster provider spells differently.
pub fn translate_subdivision(code: &str) -> &str {
    match code {
        "CZE" => "CZCH",
        "LVA" => "LATVIA",
        other => other,
    }
}

/// Result of a sync, as reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub added: usize,
    pub existing: usize,
    pub total: usize,
}

impl SyncReport {
    pub fn message(&self) -> String {
        format!(
            "Roster synced: {} added, {} existing, {} total",
            self.added, self.existing, self.total
        )
    }
}

/// Page through `scope` until the declared total is reached or a short page
/// comes back.
pub async fn fetch_all(
    source: &dyn RosterSource,
    scope: &RosterScope,
) -> Result<Vec<RosterMember>, RosterError> {
    let mut members = Vec::new();
    let mut offset = 0;
    for _ in 0..MAX_ROSTER_PAGES {
        let page = source.fetch_page(scope, offset, ROSTER_PAGE_SIZE).await?;
        let got = page.items.len();
        members.extend(page.items);
        if members.len() >= page.count || got < ROSTER_PAGE_SIZE {
            return Ok(members);
        }
        offset += ROSTER_PAGE_SIZE;
    }
    Err(RosterError::Upstream("roster pagination did not terminate".into()))
}

/// Pull the organization's roster and add every unknown cid as a plain
/// member. Nothing is written until every page has been fetched.
pub async fn sync_roster(
    store: &Store,
    source: &dyn RosterSource,
    organization: &Organization,
    now: Ms,
) -> Result<SyncReport, RosterError> {
    let result = sync_inner(store, source, organization, now).await;
    let outcome = if result.is_ok() { "ok" } else { "error" };
    metrics::counter!(ROSTER_SYNC_TOTAL, "outcome" => outcome).increment(1);
    result
}

async fn sync_inner(
    store: &Store,
    source: &dyn RosterSource,
    organization: &Organization,
    now: Ms,
) -> Result<SyncReport, RosterError> {
    source.ready()?;
    let division = RosterScope::Division(organization.division.clone());

    let members = match organization.subdivision.as_deref() {
        Some(local) => {
            let code = translate_subdivision(local);
            let scope = RosterScope::Subdivision(code.to_string());
            info!("roster sync for organization {}: {}", organization.id, scope.path());
            match fetch_all(source, &scope).await {
                Ok(members) => members,
                Err(e) => {
                    warn!("subdivision roster {code} failed, falling back to division: {e}");
                    fetch_all(source, &division)
                        .await?
                        .into_iter()
                        .filter(|m| {
                            m.subdivision_id
                                .as_deref()
                                .is_some_and(|s| s.eq_ignore_ascii_case(code) || s.eq_ignore_ascii_case(local))
                        })
                        .collect()
                }
            }
        }
        None => {
            info!("roster sync for organization {}: {}", organization.id, division.path());
            fetch_all(source, &division).await?
        }
    };

    let cids: Vec<String> = members.iter().map(|m| m.id.to_string()).collect();
    let merge = store.merge_roster(organization.id, &cids, now).await?;
    let report = SyncReport {
        added: merge.added,
        existing: merge.existing,
        total: cids.len(),
    };
    info!("organization {}: {}", organization.id, report.message());
    Ok(report)
}

// ── HTTP source ──────────────────────────────────────────

const USER_AGENT: &str = "slotbook/0.1";

pub struct VatsimRoster {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl VatsimRoster {
    pub fn new(base_url: String, api_key: Option<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl RosterSource for VatsimRoster {
    fn ready(&self) -> Result<(), RosterError> {
        match self.api_key {
            Some(_) => Ok(()),
            None => Err(RosterError::NotConfigured),
        }
    }

    async fn fetch_page(
        &self,
        scope: &RosterScope,
        offset: usize,
        limit: usize,
    ) -> Result<RosterPage, RosterError> {
        let api_key = self.api_key.as_deref().ok_or(RosterError::NotConfigured)?;
        let url = format!("{}{}", self.base_url, scope.path());
        let response = self
            .client
            .get(&url)
            .query(&[("limit", limit), ("offset", offset)])
            .header("X-API-Key", api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| RosterError::Upstream(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("roster API error: {status} url={url} body={body}");
            return Err(RosterError::Upstream(format!("{url} returned {status}")));
        }
        response
            .json::<RosterPage>()
            .await
            .map_err(|e| RosterError::Upstream(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use crate::store::NewOrganization;

    /// Serves a fixed roster per scope. Without a subdivision list that scope errors.
    struct StubRoster {
        subdivision: Option<Vec<RosterMember>>,
        division: Vec<RosterMember>,
        calls: Mutex<Vec<(RosterScope, usize)>>,
    }

    fn member(id: u64, sub: &str) -> RosterMember {
        RosterMember {
            id,
            name_first: Some("A".into()),
            name_last: Some("B".into()),
            subdivision_id: Some(sub.into()),
        }
    }

    #[async_trait]
    impl RosterSource for StubRoster {
        async fn fetch_page(
            &self,
            scope: &RosterScope,
            offset: usize,
            limit: usize,
        ) -> Result<RosterPage, RosterError> {
            self.calls.lock().unwrap().push((scope.clone(), offset));
            let all = match scope {
                RosterScope::Subdivision(_) => self
                    .subdivision
                    .as_ref()
                    .ok_or_else(|| RosterError::Upstream("500".into()))?,
                RosterScope::Division(_) => &self.division,
            };
            Ok(RosterPage {
                items: all.iter().skip(offset).take(limit).cloned().collect(),
                count: all.len(),
            })
        }
    }

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotbook_test_roster");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn org(store: &Store, subdivision: Option<&str>) -> Organization {
        store
            .create_organization(
                NewOrganization {
                    name: "vACC".into(),
                    division: "EUD".into(),
                    subdivision: subdivision.map(String::from),
                    portal_enabled: true,
                },
                0,
            )
            .await
            .unwrap()
    }

    #[test]
    fn subdivision_codes_translate() {
        assert_eq!(translate_subdivision("CZE"), "CZCH");
        assert_eq!(translate_subdivision("LVA"), "LATVIA");
        assert_eq!(translate_subdivision("GER"), "GER");
    }

    #[tokio::test]
    async fn paginates_until_count() {
        let stub = StubRoster {
            subdivision: None,
            division: (1..=250).map(|id| member(id, "GER")).collect(),
            calls: Mutex::new(Vec::new()),
        };
        let all = fetch_all(&stub, &RosterScope::Division("EUD".into())).await.unwrap();
        assert_eq!(all.len(), 250);
        let offsets: Vec<usize> = stub.calls.lock().unwrap().iter().map(|(_, o)| *o).collect();
        assert_eq!(offsets, vec![0, 100, 200]);
    }

    #[tokio::test]
    async fn sync_twice_adds_nothing_the_second_time() {
        let store = Store::open(test_wal_path("sync_twice.wal")).unwrap();
        let o = org(&store, Some("CZE")).await;
        let stub = StubRoster {
            subdivision: Some((1..=120).map(|id| member(id, "CZCH")).collect()),
            division: Vec::new(),
            calls: Mutex::new(Vec::new()),
        };

        let first = sync_roster(&store, &stub, &o, 0).await.unwrap();
        assert_eq!(first, SyncReport { added: 120, existing: 0, total: 120 });
        let second = sync_roster(&store, &stub, &o, 0).await.unwrap();
        assert_eq!(second, SyncReport { added: 0, existing: 120, total: 120 });
        assert_eq!(store.members_of(o.id).len(), 120);
        assert_eq!(
            stub.calls.lock().unwrap()[0].0,
            RosterScope::Subdivision("CZCH".into())
        );
        assert_eq!(second.message(), "Roster synced: 0 added, 120 existing, 120 total");
    }

    #[tokio::test]
    async fn falls_back_to_division_and_filters() {
        let store = Store::open(test_wal_path("sync_fallback.wal")).unwrap();
        let o = org(&store, Some("LVA")).await;
        let stub = StubRoster {
            subdivision: None,
            division: vec![member(1, "LATVIA"), member(2, "EST"), member(3, "LATVIA")],
            calls: Mutex::new(Vec::new()),
        };
        let report = sync_roster(&store, &stub, &o, 0).await.unwrap();
        assert_eq!(report, SyncReport { added: 2, existing: 0, total: 2 });
        assert!(store.find_member("2", o.id).is_none());
    }

    #[tokio::test]
    async fn failure_leaves_membership_untouched() {
        struct Down;
        #[async_trait]
        impl RosterSource for Down {
            async fn fetch_page(&self, _: &RosterScope, _: usize, _: usize) -> Result<RosterPage, RosterError> {
                Err(RosterError::Upstream("unreachable".into()))
            }
        }
        let store = Store::open(test_wal_path("sync_down.wal")).unwrap();
        let o = org(&store, None).await;
        assert!(matches!(sync_roster(&store, &Down, &o, 0).await, Err(RosterError::Upstream(_))));
        assert!(store.members_of(o.id).is_empty());
    }

    #[test]
    fn unconfigured_http_source_is_not_ready() {
        let source = VatsimRoster::new("https://api.example.net".into(), None, Duration::from_secs(1)).unwrap();
        assert!(matches!(source.ready(), Err(RosterError::NotConfigured)));
    }
}
