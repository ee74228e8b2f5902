//! Storage and reporter doubles shared by the unit tests.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Notify;
use vantage_db::{DbError, MemoryBackend, PlayerId, PlayerRecord, Result, StorageBackend};

use crate::error::{ErrorReporter, PipelineError};

/// Parks the next matching storage call until released.
#[derive(Default)]
pub struct Pause {
    armed: AtomicBool,
    reached: Notify,
    release: Notify,
}

impl Pause {
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Resolves once a call is parked.
    pub async fn reached(&self) {
        self.reached.notified().await;
    }

    pub fn release(&self) {
        self.armed.store(false, Ordering::SeqCst);
        self.release.notify_one();
    }

    async fn hold(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.reached.notify_one();
            self.release.notified().await;
        }
    }
}

/// Memory backend that can be told to fail, globally or for chosen players.
#[derive(Default)]
pub struct FlakyBackend {
    inner: MemoryBackend,
    unavailable: AtomicBool,
    failing: Mutex<HashSet<PlayerId>>,
    pub full_loads: AtomicUsize,
    pub single_loads: AtomicUsize,
    /// Parks a full load after it has read storage
    pub pause_full_load: Pause,
    /// Parks a save before it writes
    pub pause_save: Pause,
}

impl FlakyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn fail_for(&self, id: PlayerId) {
        self.failing.lock().unwrap().insert(id);
    }

    fn check(&self, id: Option<PlayerId>) -> Result<()> {
        let failing = id.is_some_and(|id| self.failing.lock().unwrap().contains(&id));
        if self.unavailable.load(Ordering::SeqCst) || failing {
            Err(DbError::Unavailable("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StorageBackend for FlakyBackend {
    fn config_name(&self) -> &'static str {
        "flaky"
    }

    async fn init(&self) -> Result<()> {
        self.check(None)?;
        self.inner.init().await
    }

    async fn save_player_record(&self, record: &PlayerRecord) -> Result<()> {
        self.check(Some(record.id))?;
        self.pause_save.hold().await;
        self.inner.save_player_record(record).await
    }

    async fn load_player_record(&self, id: PlayerId) -> Result<Option<PlayerRecord>> {
        self.single_loads.fetch_add(1, Ordering::SeqCst);
        self.check(Some(id))?;
        self.inner.load_player_record(id).await
    }

    async fn load_all_player_records(&self) -> Result<Vec<PlayerRecord>> {
        self.full_loads.fetch_add(1, Ordering::SeqCst);
        self.check(None)?;
        let records = self.inner.load_all_player_records().await?;
        self.pause_full_load.hold().await;
        Ok(records)
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn count(&self) -> usize {
        self.reports.lock().unwrap().len()
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, context: &str, error: &PipelineError) {
        self.reports
            .lock()
            .unwrap()
            .push(format!("{context}: {error}"));
    }
}
