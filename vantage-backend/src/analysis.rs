//! Cached server-wide analysis.
//!
//! The current [`AnalysisSnapshot`] is published through an atomic pointer swap,
//! so readers either see the previous snapshot or the new one, never a partial
//! result. At most one computation runs at a time; a request that arrives while
//! one is in flight is skipped rather than queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use serde::Serialize;
use tracing::{debug, error, info};
use vantage_db::StorageBackend;

use crate::error::{ErrorReporter, PipelineError};
use crate::helpers::retry_with_backoff;
use crate::ingest::IngestionCache;
use crate::snapshot::{self, AnalysisSnapshot};

#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    /// A refresh is skipped until the current snapshot is older than this
    pub freshness: Duration,
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
}

impl From<&crate::config::Config> for AnalysisSettings {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            freshness: config.analysis_freshness,
            retry_attempts: config.flush_retry_attempts,
            retry_backoff: config.flush_retry_backoff,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisState {
    /// No snapshot has ever been published
    Empty,
    Computing,
    Ready,
}

#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    Completed(Arc<AnalysisSnapshot>),
    /// Another computation was already running; nothing was done
    AlreadyRunning,
}

/// Holds the computing flag for the lifetime of one run.
struct ComputeGuard<'a>(&'a AtomicBool);

impl<'a> ComputeGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ComputeGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct AnalysisCache {
    storage: Arc<dyn StorageBackend>,
    ingest: Arc<IngestionCache>,
    reporter: Arc<dyn ErrorReporter>,
    settings: AnalysisSettings,
    current: ArcSwapOption<AnalysisSnapshot>,
    computing: AtomicBool,
    completed_runs: AtomicU64,
}

impl AnalysisCache {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        ingest: Arc<IngestionCache>,
        reporter: Arc<dyn ErrorReporter>,
        settings: AnalysisSettings,
    ) -> Self {
        Self {
            storage,
            ingest,
            reporter,
            settings,
            current: ArcSwapOption::empty(),
            computing: AtomicBool::new(false),
            completed_runs: AtomicU64::new(0),
        }
    }

    /// Recompute the snapshot from storage plus unflushed in-memory changes.
    ///
    /// Returns [`UpdateOutcome::AlreadyRunning`] without doing anything if a
    /// computation is in progress. On failure the previous snapshot stays
    /// current and the error is reported.
    pub async fn update_cache(&self, now: i64) -> Result<UpdateOutcome, PipelineError> {
        let Some(_guard) = ComputeGuard::acquire(&self.computing) else {
            debug!("analysis already running, skipping");
            return Ok(UpdateOutcome::AlreadyRunning);
        };

        let started = Instant::now();
        match self.compute(now).await {
            Ok(snapshot) => {
                self.current.store(Some(Arc::clone(&snapshot)));
                self.completed_runs.fetch_add(1, Ordering::AcqRel);
                info!(
                    players = snapshot.total_players,
                    online = snapshot.online_players,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "analysis refreshed"
                );
                Ok(UpdateOutcome::Completed(snapshot))
            }
            Err(err) => {
                error!(%err, "analysis failed, keeping previous snapshot");
                self.reporter.report("analysis", &err);
                Err(err)
            }
        }
    }

    /// Run [`Self::update_cache`] unless the current snapshot is still fresh.
    ///
    /// Returns `Ok(None)` when the refresh was skipped for freshness.
    pub async fn refresh_if_stale(&self, now: i64) -> Result<Option<UpdateOutcome>, PipelineError> {
        let freshness = self.settings.freshness.as_millis() as i64;
        if let Some(current) = self.get_data() {
            let age = now - current.refresh_date;
            if age <= freshness {
                debug!(age_ms = age, "analysis is fresh, skipping refresh");
                return Ok(None);
            }
        }
        self.update_cache(now).await.map(Some)
    }

    /// Whether a snapshot has ever been published. Stays true once set.
    pub fn is_cached(&self) -> bool {
        self.current.load().is_some()
    }

    /// The latest complete snapshot, if any.
    pub fn get_data(&self) -> Option<Arc<AnalysisSnapshot>> {
        self.current.load_full()
    }

    pub fn state(&self) -> AnalysisState {
        if self.computing.load(Ordering::Acquire) {
            AnalysisState::Computing
        } else if self.is_cached() {
            AnalysisState::Ready
        } else {
            AnalysisState::Empty
        }
    }

    /// Number of computations that published a snapshot.
    pub fn completed_runs(&self) -> u64 {
        self.completed_runs.load(Ordering::Acquire)
    }

    async fn compute(&self, now: i64) -> Result<Arc<AnalysisSnapshot>, PipelineError> {
        let storage = &self.storage;
        let records = {
            let _paused = self.ingest.pause_flushes().await;
            let stored = retry_with_backoff(
                self.settings.retry_attempts,
                self.settings.retry_backoff,
                || storage.load_all_player_records(),
            )
            .await?;
            self.ingest.reconcile(stored).await
        };

        let snapshot = tokio::task::spawn_blocking(move || snapshot::compute(&records, now))
            .await
            .map_err(|err| PipelineError::AggregationFailure(err.to_string()))?;
        Ok(Arc::new(snapshot))
    }
}
