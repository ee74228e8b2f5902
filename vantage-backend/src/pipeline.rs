//! Wires storage, the three caches and the scheduler into one running unit.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};
use vantage_db::{ActivityEvent, EventKind, PlayerId, StorageBackend, select_backend};

use crate::analysis::{AnalysisCache, AnalysisState, UpdateOutcome};
use crate::config::Config;
use crate::error::{ErrorReporter, PipelineError, TracingReporter};
use crate::helpers::{Clock, system_clock};
use crate::ingest::{CacheStatus, FlushReport, IngestionCache, ShutdownReport};
use crate::inspect::{InspectCache, InspectReport};
use crate::scheduler::{Scheduler, task};
use crate::snapshot::AnalysisSnapshot;

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub backend: &'static str,
    pub cache: CacheStatus,
    pub analysis: AnalysisState,
    /// Refresh date of the current snapshot
    pub last_refresh: Option<i64>,
    pub cached_reports: usize,
    pub stopping: bool,
}

pub struct Pipeline {
    config: Config,
    storage: Arc<dyn StorageBackend>,
    ingest: Arc<IngestionCache>,
    analysis: Arc<AnalysisCache>,
    inspect: Arc<InspectCache>,
    scheduler: Arc<dyn Scheduler>,
    clock: Clock,
    stopping: AtomicBool,
}

impl Pipeline {
    /// Select and initialize the configured storage backend, then start.
    ///
    /// Any storage failure here is fatal: there is no mode without storage.
    pub async fn start(
        config: Config,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Arc<Self>, PipelineError> {
        let storage = select_backend(&config.database_type, &config.database_path)
            .inspect_err(|err| error!(%err, "invalid storage configuration"))?;
        Self::start_with_storage(config, storage, scheduler, system_clock()).await
    }

    /// Start on an already selected backend with an explicit clock.
    pub async fn start_with_storage(
        config: Config,
        storage: Arc<dyn StorageBackend>,
        scheduler: Arc<dyn Scheduler>,
        clock: Clock,
    ) -> Result<Arc<Self>, PipelineError> {
        if let Err(err) = storage.init().await {
            error!(backend = storage.config_name(), %err, "failed to initialize storage");
            return Err(err.into());
        }
        info!(backend = storage.config_name(), "database established");

        let reporter: Arc<dyn ErrorReporter> = Arc::new(TracingReporter);
        let ingest = Arc::new(IngestionCache::new(
            Arc::clone(&storage),
            Arc::clone(&reporter),
            (&config).into(),
        ));
        let analysis = Arc::new(AnalysisCache::new(
            Arc::clone(&storage),
            Arc::clone(&ingest),
            reporter,
            (&config).into(),
        ));
        let inspect = Arc::new(InspectCache::new(
            Arc::clone(&storage),
            Arc::clone(&ingest),
            (&config).into(),
        ));

        let pipeline = Arc::new(Self {
            config,
            storage,
            ingest,
            analysis,
            inspect,
            scheduler,
            clock,
            stopping: AtomicBool::new(false),
        });
        pipeline.schedule_background()?;
        info!("pipeline started");
        Ok(pipeline)
    }

    fn schedule_background(&self) -> Result<(), PipelineError> {
        let interval = self.config.save_interval;
        let ingest = Arc::clone(&self.ingest);
        self.scheduler.schedule_periodic(
            "flush",
            interval,
            interval,
            task(move || {
                let ingest = Arc::clone(&ingest);
                async move {
                    ingest.flush_all().await;
                }
            }),
        )?;

        if self.config.analysis_refresh_on_enable {
            let analysis = Arc::clone(&self.analysis);
            let clock = Arc::clone(&self.clock);
            self.scheduler.schedule_once(
                "boot-analysis",
                self.config.boot_analysis_delay,
                task(move || {
                    let analysis = Arc::clone(&analysis);
                    let now = clock();
                    async move {
                        // Failures are logged and reported by the cache itself.
                        let _ = analysis.update_cache(now).await;
                    }
                }),
            )?;
        }

        if let Some(interval) = self.config.analysis_refresh_interval() {
            let analysis = Arc::clone(&self.analysis);
            let clock = Arc::clone(&self.clock);
            self.scheduler.schedule_periodic(
                "analysis",
                interval,
                interval,
                task(move || {
                    let analysis = Arc::clone(&analysis);
                    let now = clock();
                    async move {
                        let _ = analysis.refresh_if_stale(now).await;
                    }
                }),
            )?;
        }

        let ttl = self.config.inspect_cache_ttl;
        let inspect = Arc::clone(&self.inspect);
        let clock = Arc::clone(&self.clock);
        self.scheduler.schedule_periodic(
            "inspect-purge",
            ttl,
            ttl,
            task(move || {
                let inspect = Arc::clone(&inspect);
                let now = clock();
                async move {
                    inspect.purge_expired(now).await;
                }
            }),
        )?;
        Ok(())
    }

    fn ensure_running(&self) -> Result<(), PipelineError> {
        if self.stopping.load(Ordering::Acquire) {
            Err(PipelineError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    /// Fold an event into the ingestion cache. Never waits on storage.
    ///
    /// A join also schedules a background load of the player's stored record.
    pub fn record_event(&self, id: PlayerId, event: ActivityEvent) -> Result<(), PipelineError> {
        self.ensure_running()?;
        let is_join = matches!(event.kind, EventKind::Join { .. });
        self.ingest.record_event(id, event)?;

        if is_join {
            let ingest = Arc::clone(&self.ingest);
            let scheduled = self.scheduler.schedule_once(
                "hydrate",
                Duration::ZERO,
                task(move || {
                    let ingest = Arc::clone(&ingest);
                    async move {
                        if let Err(err) = ingest.hydrate(id).await {
                            warn!(%id, %err, "could not load stored player record, will retry on flush");
                        }
                    }
                }),
            );
            if let Err(err) = scheduled {
                warn!(%id, %err, "hydration not scheduled");
            }
        }
        Ok(())
    }

    /// Force an analysis run now, regardless of freshness.
    pub async fn refresh_analysis(&self) -> Result<UpdateOutcome, PipelineError> {
        self.ensure_running()?;
        self.analysis.update_cache(self.now()).await
    }

    /// Force a flush of every dirty record now.
    pub async fn flush_cache(&self) -> Result<FlushReport, PipelineError> {
        self.ensure_running()?;
        Ok(self.ingest.flush_all().await)
    }

    pub fn analysis(&self) -> Option<Arc<AnalysisSnapshot>> {
        self.analysis.get_data()
    }

    pub fn is_analysis_cached(&self) -> bool {
        self.analysis.is_cached()
    }

    pub async fn inspect(&self, id: PlayerId) -> Result<Arc<InspectReport>, PipelineError> {
        self.inspect.get_report(id, self.now()).await
    }

    /// Drop a cached inspect report so the next request rebuilds it.
    pub async fn invalidate_report(&self, id: PlayerId) -> bool {
        self.inspect.invalidate(id).await
    }

    pub async fn status(&self) -> PipelineStatus {
        PipelineStatus {
            backend: self.storage.config_name(),
            cache: self.ingest.status().await,
            analysis: self.analysis.state(),
            last_refresh: self.analysis.get_data().map(|snapshot| snapshot.refresh_date),
            cached_reports: self.inspect.len(),
            stopping: self.stopping.load(Ordering::Acquire),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn now(&self) -> i64 {
        (self.clock)()
    }

    /// Cancel all background work, then run the bounded final save.
    ///
    /// Only the first call does anything; later calls return an empty report.
    pub async fn stop(&self) -> ShutdownReport {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return ShutdownReport::default();
        }
        info!("stopping pipeline");
        self.scheduler.cancel_all();

        let report = self
            .ingest
            .save_on_shutdown(self.config.shutdown_save_timeout)
            .await;
        if report.lost.is_empty() {
            info!(saved = report.saved, "pipeline stopped");
        } else {
            error!(
                saved = report.saved,
                lost = report.lost.len(),
                "pipeline stopped with unsaved player data"
            );
        }
        report
    }
}
