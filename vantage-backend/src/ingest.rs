//! Write-back cache of player activity.
//!
//! Listener callbacks fold events into per-player records held in memory;
//! storage is only touched by flushes, which run on background tasks.
//!
//! An entry starts out *pending*: the events are queued because the stored
//! record has not been loaded yet, and loading is I/O that `record_event` must
//! never do. The first flush (or an explicit hydration after a join) loads the
//! stored record, folds the queued events on top, and from then on the entry
//! holds the full record. Memory is therefore always ahead of storage, never
//! behind it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info, warn};
use vantage_db::{ActivityEvent, PlayerId, PlayerRecord, StorageBackend};

use crate::error::{ErrorReporter, PipelineError};
use crate::helpers::retry_with_backoff;

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
    /// Location samples kept per record
    pub location_limit: usize,
}

impl From<&crate::config::Config> for IngestSettings {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            retry_attempts: config.flush_retry_attempts,
            retry_backoff: config.flush_retry_backoff,
            location_limit: config.location_limit(),
        }
    }
}

#[derive(Debug, Clone)]
enum Resident {
    /// Full record, stored history included
    Hydrated(PlayerRecord),
    /// Events recorded before the stored record was loaded
    Pending(Vec<ActivityEvent>),
}

#[derive(Debug)]
struct CachedPlayer {
    resident: Resident,
    /// Bumped on every recorded event
    generation: u64,
    /// Latest generation known to be durable
    persisted: u64,
}

impl CachedPlayer {
    fn is_dirty(&self) -> bool {
        self.generation != self.persisted
    }

    fn is_online(&self) -> bool {
        match &self.resident {
            Resident::Hydrated(record) => record.is_online(),
            Resident::Pending(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Saved,
    /// Nothing to write
    Clean,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub saved: usize,
    pub failed: Vec<PlayerId>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub saved: usize,
    pub lost: Vec<PlayerId>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CacheStatus {
    /// Players held in memory
    pub resident: usize,
    /// Players with changes not yet in storage
    pub dirty: usize,
    /// Players whose stored record has not been loaded yet
    pub pending: usize,
}

pub struct IngestionCache {
    players: scc::HashMap<PlayerId, CachedPlayer>,
    storage: Arc<dyn StorageBackend>,
    reporter: Arc<dyn ErrorReporter>,
    settings: IngestSettings,
    /// Serializes flushes and hydrations so no two storage round-trips for the
    /// same player interleave.
    flush_gate: Mutex<()>,
    shutdown_saved: AtomicBool,
}

impl IngestionCache {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        reporter: Arc<dyn ErrorReporter>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            players: scc::HashMap::new(),
            storage,
            reporter,
            settings,
            flush_gate: Mutex::new(()),
            shutdown_saved: AtomicBool::new(false),
        }
    }

    /// Fold an event into the player's in-memory record and mark it dirty.
    ///
    /// Only touches memory. Calls for different players do not contend beyond
    /// a bucket lock; calls for the same player are serialized by it. Refused
    /// once the shutdown save has started.
    pub fn record_event(&self, id: PlayerId, event: ActivityEvent) -> Result<(), PipelineError> {
        let limit = self.settings.location_limit;
        let entry = self.players.entry_sync(id);
        // Checked under the bucket lock: the shutdown save collects dirty
        // players through the same locks after setting the flag.
        if self.shutdown_saved.load(Ordering::Acquire) {
            return Err(PipelineError::ShuttingDown);
        }
        let mut entry = entry.or_insert_with(|| CachedPlayer {
            resident: Resident::Pending(Vec::new()),
            generation: 0,
            persisted: 0,
        });
        let player = entry.get_mut();
        match &mut player.resident {
            Resident::Hydrated(record) => record.apply(&event, limit),
            Resident::Pending(events) => events.push(event),
        }
        player.generation += 1;
        Ok(())
    }

    /// Write one player's pending changes to storage.
    ///
    /// On failure the entry stays dirty in memory and the error is reported;
    /// the next flush retries.
    pub async fn flush(&self, id: PlayerId) -> Result<FlushOutcome, PipelineError> {
        let _gate = self.flush_gate.lock().await;
        self.flush_one(id).await.inspect_err(|err| {
            self.reporter.report("flush", err);
        })
    }

    /// Write every dirty record, then unload clean entries of offline players.
    pub async fn flush_all(&self) -> FlushReport {
        let _gate = self.flush_gate.lock().await;
        let mut report = FlushReport::default();

        for id in self.dirty_ids().await {
            match self.flush_one(id).await {
                Ok(FlushOutcome::Saved) => report.saved += 1,
                Ok(FlushOutcome::Clean) => {}
                Err(err) => {
                    error!(%id, %err, "failed to save player data, keeping it in memory");
                    self.reporter.report("flush", &err);
                    report.failed.push(id);
                }
            }
        }

        let before = self.players.len();
        self.players
            .retain_async(|_, player| player.is_dirty() || player.is_online())
            .await;
        let unloaded = before.saturating_sub(self.players.len());

        info!(
            saved = report.saved,
            failed = report.failed.len(),
            unloaded,
            "flushed player cache"
        );
        report
    }

    /// Load the stored record for a player whose entry is still pending.
    ///
    /// Run in the background after a join so later reads see full history
    /// without waiting for the next flush. Does not mark anything clean.
    pub async fn hydrate(&self, id: PlayerId) -> Result<(), PipelineError> {
        let _gate = self.flush_gate.lock().await;
        let pending = self
            .players
            .read_async(&id, |_, player| match &player.resident {
                Resident::Pending(events) => Some(events.clone()),
                Resident::Hydrated(_) => None,
            })
            .await
            .flatten();
        let Some(events) = pending else {
            return Ok(());
        };

        let stored = self.load_with_retry(id).await?;
        if let Some(record) = self.fold_onto(id, stored, &events) {
            self.install_hydrated(id, record, events.len()).await;
            debug!(%id, queued = events.len(), "hydrated player record");
        }
        Ok(())
    }

    /// Best-effort final save, bounded by `timeout`. Runs at most once.
    ///
    /// Every record that cannot be written in time, or whose write fails, is
    /// logged as lost and returned in the report.
    pub async fn save_on_shutdown(&self, timeout: Duration) -> ShutdownReport {
        if self.shutdown_saved.swap(true, Ordering::AcqRel) {
            warn!("shutdown save already ran");
            return ShutdownReport::default();
        }

        let deadline = Instant::now() + timeout;
        let mut report = ShutdownReport::default();

        let Ok(_gate) = timeout_at(deadline, self.flush_gate.lock()).await else {
            report.lost = self.dirty_ids().await;
            for id in &report.lost {
                error!(%id, "player data lost: shutdown save timed out waiting for a running flush");
            }
            return report;
        };

        for id in self.dirty_ids().await {
            match timeout_at(deadline, self.flush_one(id)).await {
                Ok(Ok(FlushOutcome::Saved)) => report.saved += 1,
                Ok(Ok(FlushOutcome::Clean)) => {}
                Ok(Err(err)) => {
                    error!(%id, %err, "player data lost: shutdown save failed");
                    self.reporter.report("shutdown save", &err);
                    report.lost.push(id);
                }
                Err(_) => {
                    error!(%id, "player data lost: shutdown save timed out");
                    report.lost.push(id);
                }
            }
        }

        info!(saved = report.saved, lost = report.lost.len(), "saved player cache on shutdown");
        report
    }

    /// Hold off flushes and hydrations until the guard is dropped.
    ///
    /// Readers that load from storage and then overlay memory take this
    /// across both steps, so no entry can be saved and unloaded in between.
    pub async fn pause_flushes(&self) -> MutexGuard<'_, ()> {
        self.flush_gate.lock().await
    }

    pub async fn status(&self) -> CacheStatus {
        let mut status = CacheStatus::default();
        self.players
            .iter_async(|_, player| {
                status.resident += 1;
                if player.is_dirty() {
                    status.dirty += 1;
                }
                if matches!(player.resident, Resident::Pending(_)) {
                    status.pending += 1;
                }
                true
            })
            .await;
        status
    }

    /// Overlay in-memory state onto records loaded from storage.
    pub async fn reconcile(&self, stored: Vec<PlayerRecord>) -> Vec<PlayerRecord> {
        let mut merged: HashMap<PlayerId, PlayerRecord> =
            stored.into_iter().map(|record| (record.id, record)).collect();

        for (id, resident) in self.residents().await {
            let record = match resident {
                Resident::Hydrated(record) => Some(record),
                Resident::Pending(events) => self.fold_onto(id, merged.remove(&id), &events),
            };
            if let Some(record) = record {
                merged.insert(id, record);
            }
        }

        let mut records: Vec<PlayerRecord> = merged.into_values().collect();
        records.sort_by_key(|record| (record.registered, record.id));
        records
    }

    /// Overlay in-memory state for one player onto its stored record.
    pub async fn reconcile_one(
        &self,
        id: PlayerId,
        stored: Option<PlayerRecord>,
    ) -> Option<PlayerRecord> {
        let resident = self
            .players
            .read_async(&id, |_, player| player.resident.clone())
            .await;
        match resident {
            Some(Resident::Hydrated(record)) => Some(record),
            Some(Resident::Pending(events)) => self.fold_onto(id, stored, &events),
            None => stored,
        }
    }

    async fn flush_one(&self, id: PlayerId) -> Result<FlushOutcome, PipelineError> {
        let captured = self
            .players
            .read_async(&id, |_, player| {
                player
                    .is_dirty()
                    .then(|| (player.generation, player.resident.clone()))
            })
            .await
            .flatten();
        let Some((generation, resident)) = captured else {
            return Ok(FlushOutcome::Clean);
        };

        let (record, consumed) = match resident {
            Resident::Hydrated(record) => (record, None),
            Resident::Pending(events) => {
                let stored = self.load_with_retry(id).await?;
                match self.fold_onto(id, stored, &events) {
                    Some(record) => (record, Some(events.len())),
                    None => return Ok(FlushOutcome::Clean),
                }
            }
        };

        let storage = &self.storage;
        retry_with_backoff(self.settings.retry_attempts, self.settings.retry_backoff, || {
            storage.save_player_record(&record)
        })
        .await?;

        if let Some(consumed) = consumed {
            self.install_hydrated(id, record, consumed).await;
        }
        self.players
            .update_async(&id, |_, player| {
                player.persisted = player.persisted.max(generation);
            })
            .await;

        debug!(%id, generation, "flushed player record");
        Ok(FlushOutcome::Saved)
    }

    /// Replace a pending entry with a hydrated record that reflects its first
    /// `consumed` queued events, replaying anything queued since.
    async fn install_hydrated(&self, id: PlayerId, record: PlayerRecord, consumed: usize) {
        let limit = self.settings.location_limit;
        self.players
            .update_async(&id, |_, player| {
                if let Resident::Pending(events) = &mut player.resident {
                    let mut record = record;
                    for event in events.iter().skip(consumed) {
                        record.apply(event, limit);
                    }
                    player.resident = Resident::Hydrated(record);
                }
            })
            .await;
    }

    async fn load_with_retry(&self, id: PlayerId) -> Result<Option<PlayerRecord>, PipelineError> {
        let storage = &self.storage;
        let stored = retry_with_backoff(
            self.settings.retry_attempts,
            self.settings.retry_backoff,
            || storage.load_player_record(id),
        )
        .await?;
        Ok(stored)
    }

    fn fold_onto(
        &self,
        id: PlayerId,
        base: Option<PlayerRecord>,
        events: &[ActivityEvent],
    ) -> Option<PlayerRecord> {
        let mut record = match base {
            Some(record) => record,
            None => PlayerRecord::new(id, events.first()?.at),
        };
        for event in events {
            record.apply(event, self.settings.location_limit);
        }
        Some(record)
    }

    async fn dirty_ids(&self) -> Vec<PlayerId> {
        let mut ids = Vec::new();
        self.players
            .iter_async(|id, player| {
                if player.is_dirty() {
                    ids.push(*id);
                }
                true
            })
            .await;
        ids
    }

    async fn residents(&self) -> Vec<(PlayerId, Resident)> {
        let mut residents = Vec::with_capacity(self.players.len());
        self.players
            .iter_async(|id, player| {
                residents.push((*id, player.resident.clone()));
                true
            })
            .await;
        residents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FlakyBackend, RecordingReporter};
    use vantage_db::{EventKind, MemoryBackend, PlayerName};

    fn settings() -> IngestSettings {
        IngestSettings {
            retry_attempts: 2,
            retry_backoff: Duration::from_millis(1),
            location_limit: 10,
        }
    }

    async fn setup() -> (Arc<FlakyBackend>, Arc<RecordingReporter>, IngestionCache) {
        let storage = Arc::new(FlakyBackend::new());
        storage.init().await.unwrap();
        let reporter = Arc::new(RecordingReporter::default());
        let cache = IngestionCache::new(storage.clone(), reporter.clone(), settings());
        (storage, reporter, cache)
    }

    fn join(at: i64) -> ActivityEvent {
        ActivityEvent::new(
            at,
            EventKind::Join {
                name: PlayerName::from("Steve").unwrap(),
            },
        )
    }

    #[tokio::test]
    async fn test_join_chats_quit_flushes_one_record() {
        let (storage, _, cache) = setup().await;
        let id = PlayerId::new_v4();
        let t0 = 1_700_000_000_000;

        cache.record_event(id, join(t0)).unwrap();
        for i in 1..=3 {
            cache.record_event(id, ActivityEvent::new(t0 + i * 1_000, EventKind::Chat)).unwrap();
        }
        cache.record_event(id, ActivityEvent::new(t0 + 90_000, EventKind::Quit)).unwrap();

        assert_eq!(cache.flush(id).await.unwrap(), FlushOutcome::Saved);

        let stored = storage.load_all_player_records().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].chat_messages, 3);
        assert_eq!(stored[0].sessions.len(), 1);
        assert_eq!(stored[0].sessions[0].length(), 90_000);
        assert_eq!(cache.status().await.dirty, 0);
    }

    #[tokio::test]
    async fn test_flushed_record_equals_fold_in_call_order() {
        let (storage, _, cache) = setup().await;
        let id = PlayerId::new_v4();
        let events = vec![
            join(10),
            ActivityEvent::new(20, EventKind::Death),
            ActivityEvent::new(30, EventKind::Quit),
            join(40),
            ActivityEvent::new(35, EventKind::Quit),
        ];
        for event in &events {
            cache.record_event(id, event.clone()).unwrap();
        }
        cache.flush_all().await;

        let mut expected = PlayerRecord::new(id, 10);
        for event in &events {
            expected.apply(event, 10);
        }
        let stored = storage.load_player_record(id).await.unwrap().unwrap();
        assert_eq!(stored, expected);
        assert_eq!(stored.last_quit, Some(35));
    }

    #[tokio::test]
    async fn test_flush_keeps_stored_history() {
        let (storage, _, cache) = setup().await;
        let id = PlayerId::new_v4();
        let mut existing = PlayerRecord::new(id, 0);
        existing.apply(&join(0), 10);
        existing.apply(&ActivityEvent::new(1_000, EventKind::Quit), 10);
        storage.save_player_record(&existing).await.unwrap();

        cache.record_event(id, join(5_000)).unwrap();
        cache.record_event(id, ActivityEvent::new(8_000, EventKind::Quit)).unwrap();
        cache.flush(id).await.unwrap();

        let stored = storage.load_player_record(id).await.unwrap().unwrap();
        assert_eq!(stored.login_times, 2);
        assert_eq!(stored.playtime, 4_000);
        assert_eq!(stored.registered, 0);
    }

    #[tokio::test]
    async fn test_hydrate_then_record_applies_directly() {
        let (storage, _, cache) = setup().await;
        let id = PlayerId::new_v4();
        let mut existing = PlayerRecord::new(id, 0);
        existing.deaths = 7;
        storage.save_player_record(&existing).await.unwrap();

        cache.record_event(id, join(100)).unwrap();
        cache.hydrate(id).await.unwrap();
        cache.record_event(id, ActivityEvent::new(200, EventKind::Death)).unwrap();

        let status = cache.status().await;
        assert_eq!(status.pending, 0);
        assert_eq!(status.dirty, 1);

        let current = cache.reconcile_one(id, None).await.unwrap();
        assert_eq!(current.deaths, 8);
        assert_eq!(current.login_times, 1);
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_record_dirty_and_reports() {
        let (storage, reporter, cache) = setup().await;
        let id = PlayerId::new_v4();
        cache.record_event(id, join(0)).unwrap();
        cache.record_event(id, ActivityEvent::new(10, EventKind::Quit)).unwrap();

        storage.set_unavailable(true);
        let report = cache.flush_all().await;
        assert_eq!(report.failed, vec![id]);
        assert_eq!(reporter.count(), 1);
        let status = cache.status().await;
        assert_eq!(status.resident, 1);
        assert_eq!(status.dirty, 1);

        storage.set_unavailable(false);
        let report = cache.flush_all().await;
        assert_eq!(report.saved, 1);
        assert!(storage.load_player_record(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_offline_players_unloaded_after_flush() {
        let (_, _, cache) = setup().await;
        let online = PlayerId::new_v4();
        let offline = PlayerId::new_v4();
        cache.record_event(online, join(0)).unwrap();
        cache.record_event(offline, join(0)).unwrap();
        cache.record_event(offline, ActivityEvent::new(50, EventKind::Quit)).unwrap();

        let report = cache.flush_all().await;
        assert_eq!(report.saved, 2);

        let status = cache.status().await;
        assert_eq!(status.resident, 1);
        assert_eq!(status.dirty, 0);
        assert!(cache.reconcile_one(online, None).await.is_some());
    }

    #[tokio::test]
    async fn test_reconcile_prefers_memory() {
        let (storage, _, cache) = setup().await;
        let stale = PlayerId::new_v4();
        let untouched = PlayerId::new_v4();
        let mut stale_record = PlayerRecord::new(stale, 0);
        stale_record.chat_messages = 2;
        storage.save_player_record(&stale_record).await.unwrap();
        storage
            .save_player_record(&PlayerRecord::new(untouched, 1))
            .await
            .unwrap();
        let fresh = PlayerId::new_v4();

        cache.record_event(stale, ActivityEvent::new(5, EventKind::Chat)).unwrap();
        cache.record_event(fresh, join(7)).unwrap();

        let stored = storage.load_all_player_records().await.unwrap();
        let merged = cache.reconcile(stored).await;
        assert_eq!(merged.len(), 3);
        let by_id = |id: PlayerId| merged.iter().find(|r| r.id == id).unwrap();
        assert_eq!(by_id(stale).chat_messages, 3);
        assert_eq!(by_id(fresh).login_times, 1);
        assert_eq!(by_id(untouched).chat_messages, 0);
    }

    #[tokio::test]
    async fn test_shutdown_save_reports_lost_records() {
        let (storage, reporter, cache) = setup().await;
        let ids: Vec<PlayerId> = (0..5).map(|_| PlayerId::new_v4()).collect();
        for id in &ids {
            cache.record_event(*id, join(0)).unwrap();
        }
        let broken = ids[2];
        storage.fail_for(broken);

        let report = cache.save_on_shutdown(Duration::from_secs(5)).await;
        assert_eq!(report.saved, 4);
        assert_eq!(report.lost, vec![broken]);
        assert_eq!(reporter.count(), 1);
        for id in ids.iter().filter(|id| **id != broken) {
            assert!(storage.load_player_record(*id).await.unwrap().is_some());
        }

        // Runs at most once
        let again = cache.save_on_shutdown(Duration::from_secs(5)).await;
        assert_eq!(again, ShutdownReport::default());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_events_are_all_folded() {
        let (_, _, cache) = setup().await;
        let cache = Arc::new(cache);
        let shared = PlayerId::new_v4();
        let own: Vec<PlayerId> = (0..8).map(|_| PlayerId::new_v4()).collect();

        let writers: Vec<_> = own
            .iter()
            .map(|&id| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    for at in 0..10_000 {
                        cache.record_event(shared, ActivityEvent::new(at, EventKind::Chat)).unwrap();
                        cache.record_event(id, ActivityEvent::new(at, EventKind::Chat)).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        let status = cache.status().await;
        assert_eq!(status.resident, 9);
        assert_eq!(status.dirty, 9);
        let shared_record = cache.reconcile_one(shared, None).await.unwrap();
        assert_eq!(shared_record.chat_messages, 80_000);
        for id in own {
            let record = cache.reconcile_one(id, None).await.unwrap();
            assert_eq!(record.chat_messages, 10_000);
        }
    }

    #[tokio::test]
    async fn test_events_during_flush_stay_dirty() {
        let (storage, _, cache) = setup().await;
        let cache = Arc::new(cache);
        let id = PlayerId::new_v4();
        cache.record_event(id, join(0)).unwrap();
        storage.pause_save.arm();

        let flushing = tokio::spawn({
            let cache = Arc::clone(&cache);
            async move { cache.flush(id).await }
        });
        storage.pause_save.reached().await;
        cache.record_event(id, ActivityEvent::new(10, EventKind::Chat)).unwrap();
        cache.record_event(id, ActivityEvent::new(20, EventKind::Quit)).unwrap();
        storage.pause_save.release();
        assert_eq!(flushing.await.unwrap().unwrap(), FlushOutcome::Saved);

        // Storage only has what was captured when the flush started
        let stored = storage.load_player_record(id).await.unwrap().unwrap();
        assert_eq!(stored.chat_messages, 0);
        assert!(stored.is_online());

        // Later events were replayed onto the hydrated record
        let status = cache.status().await;
        assert_eq!(status.pending, 0);
        assert_eq!(status.dirty, 1);
        let current = cache.reconcile_one(id, None).await.unwrap();
        assert_eq!(current.chat_messages, 1);
        assert_eq!(current.login_times, 1);
        assert!(!current.is_online());

        assert_eq!(cache.flush(id).await.unwrap(), FlushOutcome::Saved);
        assert_eq!(storage.load_player_record(id).await.unwrap().unwrap(), current);
        assert_eq!(cache.status().await.dirty, 0);
    }

    #[tokio::test]
    async fn test_shutdown_save_gives_up_waiting_for_running_flush() {
        let (storage, _, cache) = setup().await;
        let id = PlayerId::new_v4();
        cache.record_event(id, join(0)).unwrap();

        let _paused = cache.pause_flushes().await;
        let report = cache.save_on_shutdown(Duration::from_millis(50)).await;
        assert_eq!(report.saved, 0);
        assert_eq!(report.lost, vec![id]);
        assert!(storage.load_player_record(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_save_times_out_on_hanging_write() {
        let (storage, _, cache) = setup().await;
        let slow = PlayerId::new_v4();
        cache.record_event(slow, join(0)).unwrap();
        storage.pause_save.arm();

        let report = cache.save_on_shutdown(Duration::from_millis(100)).await;
        assert_eq!(report.saved, 0);
        assert_eq!(report.lost, vec![slow]);
    }

    #[tokio::test]
    async fn test_events_refused_once_shutdown_save_started() {
        let (_, _, cache) = setup().await;
        let id = PlayerId::new_v4();
        cache.record_event(id, join(0)).unwrap();
        cache.save_on_shutdown(Duration::from_secs(5)).await;

        let quit = cache.record_event(id, ActivityEvent::new(10, EventKind::Quit));
        assert!(matches!(quit, Err(PipelineError::ShuttingDown)));
        let newcomer = cache.record_event(PlayerId::new_v4(), join(20));
        assert!(matches!(newcomer, Err(PipelineError::ShuttingDown)));

        let status = cache.status().await;
        assert_eq!(status.resident, 1);
        assert_eq!(status.dirty, 0);
    }

    #[tokio::test]
    async fn test_memory_backend_pending_entry_without_history() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        storage.init().await.unwrap();
        let cache = IngestionCache::new(
            storage.clone(),
            Arc::new(RecordingReporter::default()),
            settings(),
        );
        let id = PlayerId::new_v4();
        cache.record_event(id, ActivityEvent::new(42, EventKind::MobKill)).unwrap();
        cache.flush(id).await.unwrap();

        let stored = storage.load_player_record(id).await.unwrap().unwrap();
        assert_eq!(stored.registered, 42);
        assert_eq!(stored.mob_kills, 1);
        assert_eq!(cache.flush(id).await.unwrap(), FlushOutcome::Clean);
    }
}
