use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::auth::StateTokens;
use crate::model::{Ms, now_ms};
use crate::observability::SESSIONS_REAPED_TOTAL;
use crate::store::Store;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// One sweep: stale OAuth state tokens, then expired sessions.
pub async fn sweep_once(store: &Store, state_tokens: &StateTokens, now: Ms) {
    let tokens = state_tokens.sweep(now);
    if tokens > 0 {
        tracing::debug!("reaped {tokens} oauth state tokens");
    }
    match store.purge_expired_sessions(now).await {
        Ok(0) => {}
        Ok(n) => {
            metrics::counter!(SESSIONS_REAPED_TOTAL).increment(n as u64);
            info!("reaped {n} expired sessions");
        }
        Err(e) => tracing::warn!("session reap failed: {e}"),
    }
}

/// Background task that periodically drops stale state tokens and sessions.
pub async fn run_reaper(store: Arc<Store>, state_tokens: Arc<StateTokens>) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        sweep_once(&store, &state_tokens, now_ms()).await;
    }
}

/// Background task that rewrites the WAL once enough appends have piled up.
pub async fn run_compactor(store: Arc<Store>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        let appends = store.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match store.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::error!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::STATE_TOKEN_TTL_MS;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("slotbook_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn sweep_drops_expired_sessions_and_tokens() {
        let store = Store::open(test_wal_path("reaper_sweep.wal")).unwrap();
        let tokens = StateTokens::new();
        let now = 1_900_000_000_000;

        let stale = store
            .create_session("1".into(), "Old".into(), None, now - 1)
            .await
            .unwrap();
        let fresh = store
            .create_session("2".into(), "New".into(), None, now + 60_000)
            .await
            .unwrap();
        tokens.issue(now - STATE_TOKEN_TTL_MS - 1);
        let kept = tokens.issue(now);

        sweep_once(&store, &tokens, now).await;

        assert!(store.get_session(&stale.id).is_none());
        assert!(store.get_session(&fresh.id).is_some());
        assert_eq!(tokens.len(), 1);
        assert!(tokens.consume(&kept, now));
    }
}
