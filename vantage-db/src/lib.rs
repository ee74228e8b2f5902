mod error;
mod memory;
mod models;
mod record;
mod sqlite;

pub use error::{DbError, Result};
pub use memory::MemoryBackend;
pub use models::{
  ActivityEvent, EventKind, GameMode, Location, ParseGameModeError, PlayerId, PlayerName, Session,
};
pub use record::PlayerRecord;
pub use sqlite::SqliteBackend;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

/// Durable store for player records.
///
/// Every implementation must be interchangeable: the pipeline only ever talks
/// to storage through this trait and selects an implementation by
/// [`StorageBackend::config_name`].
#[async_trait]
pub trait StorageBackend: Send + Sync {
  /// Name used to select this backend from configuration (case-insensitive).
  fn config_name(&self) -> &'static str;

  /// Open connections and create the schema. Must succeed before any other call.
  async fn init(&self) -> Result<()>;

  /// Insert or fully replace the stored copy of a record.
  async fn save_player_record(&self, record: &PlayerRecord) -> Result<()>;

  async fn load_player_record(&self, id: PlayerId) -> Result<Option<PlayerRecord>>;

  async fn load_all_player_records(&self) -> Result<Vec<PlayerRecord>>;
}

/// Build the backend whose config name matches `backend_type`.
///
/// The returned backend is not yet initialized.
pub fn select_backend(
  backend_type: &str,
  database_path: impl AsRef<Path>,
) -> Result<Arc<dyn StorageBackend>> {
  let candidates: [Arc<dyn StorageBackend>; 2] = [
    Arc::new(SqliteBackend::new(database_path.as_ref())),
    Arc::new(MemoryBackend::new()),
  ];

  let backend = candidates
    .into_iter()
    .find(|backend| backend.config_name().eq_ignore_ascii_case(backend_type.trim()))
    .ok_or_else(|| DbError::UnknownBackend(backend_type.to_string()))?;

  info!(backend = backend.config_name(), "selected storage backend");
  Ok(backend)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_select_backend_by_name() {
    assert_eq!(select_backend("SQLite", "unused.db").unwrap().config_name(), "sqlite");
    assert_eq!(select_backend(" memory ", "unused.db").unwrap().config_name(), "memory");
  }

  #[test]
  fn test_select_unknown_backend() {
    let err = select_backend("mysql", "unused.db").err().unwrap();
    assert!(err.is_configuration());
    assert!(matches!(err, DbError::UnknownBackend(name) if name == "mysql"));
  }
}
