//! Volatile storage backend.
//!
//! Keeps every saved record in a lock-free map for the lifetime of the
//! process. Useful for ephemeral servers and tests; nothing survives a
//! restart.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{DbError, Result};
use crate::models::PlayerId;
use crate::record::PlayerRecord;
use crate::StorageBackend;

#[derive(Default)]
pub struct MemoryBackend {
  records: scc::HashMap<PlayerId, PlayerRecord>,
  initialized: AtomicBool,
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }

  fn ensure_initialized(&self) -> Result<()> {
    if self.initialized.load(Ordering::Acquire) {
      Ok(())
    } else {
      Err(DbError::NotInitialized)
    }
  }

  /// Number of stored records.
  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
  fn config_name(&self) -> &'static str {
    "memory"
  }

  async fn init(&self) -> Result<()> {
    self.initialized.store(true, Ordering::Release);
    Ok(())
  }

  async fn save_player_record(&self, record: &PlayerRecord) -> Result<()> {
    self.ensure_initialized()?;
    self.records.upsert_async(record.id, record.clone()).await;
    debug!(id = %record.id, "saved player record");
    Ok(())
  }

  async fn load_player_record(&self, id: PlayerId) -> Result<Option<PlayerRecord>> {
    self.ensure_initialized()?;
    Ok(self.records.read_async(&id, |_, record| record.clone()).await)
  }

  async fn load_all_player_records(&self) -> Result<Vec<PlayerRecord>> {
    self.ensure_initialized()?;
    let mut records = Vec::with_capacity(self.records.len());
    self
      .records
      .iter_async(|_, record| {
        records.push(record.clone());
        true
      })
      .await;
    records.sort_by_key(|record| (record.registered, record.id));
    Ok(records)
  }
}
