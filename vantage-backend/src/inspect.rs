//! Per-player reports, cached for a fixed time after they are built.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;
use vantage_db::{GameMode, Location, PlayerId, PlayerName, PlayerRecord, StorageBackend};

use crate::error::PipelineError;
use crate::helpers::retry_with_backoff;
use crate::ingest::IngestionCache;
use crate::snapshot::{CommandCount, gamemode_shares, live_playtime, rank_commands};

const REPORT_COMMANDS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InspectReport {
    pub id: PlayerId,
    pub name: PlayerName,
    pub registered: i64,
    pub last_seen: i64,
    pub online: bool,
    pub playtime: i64,
    pub session_count: usize,
    pub average_session_length: i64,
    pub longest_session: i64,
    pub login_times: u32,
    pub player_kills: u32,
    pub mob_kills: u32,
    pub deaths: u32,
    pub kill_death_ratio: f64,
    pub afk_time: i64,
    pub gamemode_shares: BTreeMap<GameMode, f64>,
    pub chat_messages: u32,
    pub commands_used: u32,
    pub top_commands: Vec<CommandCount>,
    /// Oldest first
    pub recent_locations: Vec<Location>,
    /// When this report was built
    pub created_at: i64,
}

impl InspectReport {
    pub fn build(record: &PlayerRecord, now: i64) -> Self {
        let lengths = record.sessions.iter().map(|session| session.length());
        let session_time: i64 = lengths.clone().sum();
        let session_count = record.sessions.len();

        Self {
            id: record.id,
            name: record.name,
            registered: record.registered,
            last_seen: if record.is_online() { now } else { record.last_seen() },
            online: record.is_online(),
            playtime: live_playtime(record, now),
            session_count,
            average_session_length: if session_count == 0 {
                0
            } else {
                session_time / session_count as i64
            },
            longest_session: lengths.max().unwrap_or(0),
            login_times: record.login_times,
            player_kills: record.player_kills,
            mob_kills: record.mob_kills,
            deaths: record.deaths,
            kill_death_ratio: f64::from(record.player_kills) / f64::from(record.deaths.max(1)),
            afk_time: record.afk_time,
            gamemode_shares: gamemode_shares(&record.gamemode_times),
            chat_messages: record.chat_messages,
            commands_used: record.commands_used,
            top_commands: rank_commands(
                record
                    .command_usage
                    .iter()
                    .map(|(command, uses)| (command, u64::from(*uses))),
                REPORT_COMMANDS,
            ),
            recent_locations: record.locations.iter().cloned().collect(),
            created_at: now,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedReport {
    report: Arc<InspectReport>,
    expires_at: i64,
}

impl CachedReport {
    fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone)]
pub struct InspectSettings {
    pub ttl: Duration,
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
}

impl From<&crate::config::Config> for InspectSettings {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            ttl: config.inspect_cache_ttl,
            retry_attempts: config.flush_retry_attempts,
            retry_backoff: config.flush_retry_backoff,
        }
    }
}

pub struct InspectCache {
    reports: scc::HashMap<PlayerId, CachedReport>,
    storage: Arc<dyn StorageBackend>,
    ingest: Arc<IngestionCache>,
    settings: InspectSettings,
}

impl InspectCache {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        ingest: Arc<IngestionCache>,
        settings: InspectSettings,
    ) -> Self {
        Self {
            reports: scc::HashMap::new(),
            storage,
            ingest,
            settings,
        }
    }

    /// Return the cached report for `id`, building it if missing or expired.
    ///
    /// Failures are returned to the caller and nothing is cached for them.
    pub async fn get_report(
        &self,
        id: PlayerId,
        now: i64,
    ) -> Result<Arc<InspectReport>, PipelineError> {
        let cached = self
            .reports
            .read_async(&id, |_, cached| {
                (!cached.is_expired(now)).then(|| Arc::clone(&cached.report))
            })
            .await
            .flatten();
        if let Some(report) = cached {
            return Ok(report);
        }

        let storage = &self.storage;
        let record = {
            let _paused = self.ingest.pause_flushes().await;
            let stored = retry_with_backoff(
                self.settings.retry_attempts,
                self.settings.retry_backoff,
                || storage.load_player_record(id),
            )
            .await
            .map_err(|err| PipelineError::DataUnavailable(err.to_string()))?;
            self.ingest.reconcile_one(id, stored).await
        }
        .ok_or(PipelineError::PlayerNotFound(id))?;

        let report = Arc::new(InspectReport::build(&record, now));
        let expires_at = now + self.settings.ttl.as_millis() as i64;
        self.reports
            .upsert_async(
                id,
                CachedReport {
                    report: Arc::clone(&report),
                    expires_at,
                },
            )
            .await;
        debug!(%id, "built inspect report");
        Ok(report)
    }

    /// Drop the cached report for one player.
    pub async fn invalidate(&self, id: PlayerId) -> bool {
        self.reports.remove_async(&id).await.is_some()
    }

    /// Remove every expired report. Returns how many were removed.
    pub async fn purge_expired(&self, now: i64) -> usize {
        let before = self.reports.len();
        self.reports
            .retain_async(|_, cached| !cached.is_expired(now))
            .await;
        let purged = before.saturating_sub(self.reports.len());
        if purged > 0 {
            debug!(purged, "purged expired inspect reports");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::IngestSettings;
    use crate::test_support::{FlakyBackend, RecordingReporter};
    use std::sync::atomic::Ordering;
    use vantage_db::{ActivityEvent, EventKind};

    const NOW: i64 = 1_700_000_000_000;
    const TTL_MS: i64 = 300_000;

    async fn setup() -> (Arc<FlakyBackend>, Arc<IngestionCache>, InspectCache) {
        let storage = Arc::new(FlakyBackend::new());
        storage.init().await.unwrap();
        let ingest = Arc::new(IngestionCache::new(
            storage.clone(),
            Arc::new(RecordingReporter::default()),
            IngestSettings {
                retry_attempts: 1,
                retry_backoff: Duration::from_millis(1),
                location_limit: 10,
            },
        ));
        let inspect = InspectCache::new(
            storage.clone(),
            ingest.clone(),
            InspectSettings {
                ttl: Duration::from_millis(TTL_MS as u64),
                retry_attempts: 1,
                retry_backoff: Duration::from_millis(1),
            },
        );
        (storage, ingest, inspect)
    }

    async fn stored_player(storage: &FlakyBackend) -> PlayerId {
        let id = PlayerId::new_v4();
        let mut record = PlayerRecord::new(id, NOW - 10_000);
        record.player_kills = 6;
        record.deaths = 3;
        storage.save_player_record(&record).await.unwrap();
        id
    }

    #[test]
    fn test_build_report() {
        let id = PlayerId::new_v4();
        let mut record = PlayerRecord::new(id, 0);
        let name = PlayerName::from("Notch").unwrap();
        for (at, kind) in [
            (0, EventKind::Join { name }),
            (1_000, EventKind::PlayerKill),
            (2_000, EventKind::Quit),
            (10_000, EventKind::Join { name }),
            (16_000, EventKind::Quit),
        ] {
            record.apply(&ActivityEvent::new(at, kind), 10);
        }

        let report = InspectReport::build(&record, 20_000);
        assert_eq!(report.session_count, 2);
        assert_eq!(report.longest_session, 6_000);
        assert_eq!(report.average_session_length, 4_000);
        assert_eq!(report.last_seen, 16_000);
        assert!(!report.online);
        // No deaths counts as one
        assert_eq!(report.kill_death_ratio, 1.0);
        assert_eq!(report.created_at, 20_000);
    }

    #[tokio::test]
    async fn test_same_report_within_ttl() {
        let (storage, _, inspect) = setup().await;
        let id = stored_player(&storage).await;

        let first = inspect.get_report(id, NOW).await.unwrap();
        let second = inspect.get_report(id, NOW + TTL_MS - 1).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.kill_death_ratio, 2.0);
        assert_eq!(storage.single_loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_report_rebuilt_once() {
        let (storage, _, inspect) = setup().await;
        let id = stored_player(&storage).await;

        let first = inspect.get_report(id, NOW).await.unwrap();
        let rebuilt = inspect.get_report(id, NOW + TTL_MS).await.unwrap();
        let cached = inspect.get_report(id, NOW + TTL_MS + 1).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &rebuilt));
        assert!(Arc::ptr_eq(&rebuilt, &cached));
        assert_eq!(storage.single_loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_player_not_found() {
        let (_, _, inspect) = setup().await;
        let id = PlayerId::new_v4();
        let result = inspect.get_report(id, NOW).await;
        assert!(matches!(result, Err(PipelineError::PlayerNotFound(missing)) if missing == id));
        assert!(inspect.is_empty());
    }

    #[tokio::test]
    async fn test_storage_failure_not_cached() {
        let (storage, _, inspect) = setup().await;
        let id = stored_player(&storage).await;

        storage.set_unavailable(true);
        let result = inspect.get_report(id, NOW).await;
        assert!(matches!(result, Err(PipelineError::DataUnavailable(_))));
        assert!(inspect.is_empty());

        storage.set_unavailable(false);
        assert!(inspect.get_report(id, NOW).await.is_ok());
    }

    #[tokio::test]
    async fn test_report_includes_unflushed_events() {
        let (storage, ingest, inspect) = setup().await;
        let id = stored_player(&storage).await;
        ingest.record_event(id, ActivityEvent::new(NOW, EventKind::Death)).unwrap();

        let report = inspect.get_report(id, NOW).await.unwrap();
        assert_eq!(report.deaths, 4);
    }

    #[tokio::test]
    async fn test_invalidate_and_purge() {
        let (storage, _, inspect) = setup().await;
        let a = stored_player(&storage).await;
        let b = stored_player(&storage).await;

        inspect.get_report(a, NOW).await.unwrap();
        inspect.get_report(b, NOW + 1_000).await.unwrap();
        assert_eq!(inspect.len(), 2);

        assert_eq!(inspect.purge_expired(NOW + TTL_MS).await, 1);
        assert_eq!(inspect.len(), 1);

        assert!(inspect.invalidate(b).await);
        assert!(!inspect.invalidate(b).await);
        assert!(inspect.is_empty());
    }
}
