//! SQLite storage backend.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tokio_rusqlite::Connection;
use tokio_rusqlite::rusqlite::{self, OptionalExtension, Row, params, types::Type};
use tracing::{debug, info};

use crate::error::{DbError, Result};
use crate::models::{GameMode, Location, PlayerId, PlayerName, Session};
use crate::record::PlayerRecord;
use crate::StorageBackend;

const PLAYER_COLUMNS: &str = "id, name, registered, last_join, last_quit, session_start, playtime, \
   login_times, afk_time, afk_since, gamemode, gamemode_since, player_kills, mob_kills, deaths, \
   chat_messages, commands_used";

#[derive(Debug, Clone)]
enum Target {
  File(PathBuf),
  Memory,
}

/// SQLite-backed player storage.
///
/// The connection is opened by [`StorageBackend::init`]; every other call made
/// before that fails with [`DbError::NotInitialized`].
pub struct SqliteBackend {
  target: Target,
  conn: OnceCell<Connection>,
}

impl SqliteBackend {
  /// Backend that will open or create a database at the given path.
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      target: Target::File(path.into()),
      conn: OnceCell::new(),
    }
  }

  /// Backend over a private in-memory database (useful for testing).
  pub fn in_memory() -> Self {
    Self {
      target: Target::Memory,
      conn: OnceCell::new(),
    }
  }

  fn conn(&self) -> Result<&Connection> {
    self.conn.get().ok_or(DbError::NotInitialized)
  }

  async fn open(&self) -> Result<Connection> {
    let conn = match &self.target {
      Target::File(path) => Connection::open(path).await?,
      Target::Memory => Connection::open_in_memory().await?,
    };

    conn
      .call(|conn| {
        // Enable WAL mode for better concurrent read/write performance
        conn.pragma_update(None, "journal_mode", "WAL")?;

        // Enable foreign key constraints (must be set per-connection)
        conn.pragma_update(None, "foreign_keys", "ON")?;

        conn.execute_batch(
          r#"
          CREATE TABLE IF NOT EXISTS players (
              id TEXT PRIMARY KEY,
              name TEXT NOT NULL,
              registered INTEGER NOT NULL,
              last_join INTEGER,
              last_quit INTEGER,
              session_start INTEGER,
              playtime INTEGER NOT NULL DEFAULT 0,
              login_times INTEGER NOT NULL DEFAULT 0,
              afk_time INTEGER NOT NULL DEFAULT 0,
              afk_since INTEGER,
              gamemode TEXT,
              gamemode_since INTEGER,
              player_kills INTEGER NOT NULL DEFAULT 0,
              mob_kills INTEGER NOT NULL DEFAULT 0,
              deaths INTEGER NOT NULL DEFAULT 0,
              chat_messages INTEGER NOT NULL DEFAULT 0,
              commands_used INTEGER NOT NULL DEFAULT 0
          );

          -- Closed play sessions
          CREATE TABLE IF NOT EXISTS sessions (
              player_id TEXT NOT NULL REFERENCES players(id) ON DELETE CASCADE,
              session_start INTEGER NOT NULL,
              session_end INTEGER NOT NULL
          );

          CREATE TABLE IF NOT EXISTS gamemode_times (
              player_id TEXT NOT NULL REFERENCES players(id) ON DELETE CASCADE,
              gamemode TEXT NOT NULL,
              time INTEGER NOT NULL,
              PRIMARY KEY (player_id, gamemode)
          );

          CREATE TABLE IF NOT EXISTS command_usage (
              player_id TEXT NOT NULL REFERENCES players(id) ON DELETE CASCADE,
              command TEXT NOT NULL,
              uses INTEGER NOT NULL,
              PRIMARY KEY (player_id, command)
          );

          -- Location samples, seq orders them oldest first
          CREATE TABLE IF NOT EXISTS locations (
              player_id TEXT NOT NULL REFERENCES players(id) ON DELETE CASCADE,
              seq INTEGER NOT NULL,
              world TEXT NOT NULL,
              x REAL NOT NULL,
              y REAL NOT NULL,
              z REAL NOT NULL,
              recorded_at INTEGER NOT NULL,
              PRIMARY KEY (player_id, seq)
          );

          CREATE INDEX IF NOT EXISTS idx_sessions_player ON sessions(player_id);
          "#,
        )?;
        Ok::<_, rusqlite::Error>(())
      })
      .await?;

    Ok(conn)
  }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
  fn config_name(&self) -> &'static str {
    "sqlite"
  }

  async fn init(&self) -> Result<()> {
    if self.conn.initialized() {
      return Ok(());
    }
    let conn = self.open().await?;
    // A concurrent init may have won the race; its connection is equivalent.
    let _ = self.conn.set(conn);
    info!(target = ?self.target, "sqlite database initialized");
    Ok(())
  }

  async fn save_player_record(&self, record: &PlayerRecord) -> Result<()> {
    let record = record.clone();
    let id = record.id;

    self
      .conn()?
      .call(move |conn| {
        let tx = conn.transaction()?;
        let key = record.id.to_string();

        tx.prepare_cached(
          r#"
          INSERT INTO players (id, name, registered, last_join, last_quit, session_start, playtime,
              login_times, afk_time, afk_since, gamemode, gamemode_since, player_kills, mob_kills,
              deaths, chat_messages, commands_used)
          VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
          ON CONFLICT(id) DO UPDATE SET
              name = excluded.name,
              registered = excluded.registered,
              last_join = excluded.last_join,
              last_quit = excluded.last_quit,
              session_start = excluded.session_start,
              playtime = excluded.playtime,
              login_times = excluded.login_times,
              afk_time = excluded.afk_time,
              afk_since = excluded.afk_since,
              gamemode = excluded.gamemode,
              gamemode_since = excluded.gamemode_since,
              player_kills = excluded.player_kills,
              mob_kills = excluded.mob_kills,
              deaths = excluded.deaths,
              chat_messages = excluded.chat_messages,
              commands_used = excluded.commands_used
          "#,
        )?
        .execute(params![
          &key,
          record.name.as_str(),
          record.registered,
          record.last_join,
          record.last_quit,
          record.session_start,
          record.playtime,
          record.login_times,
          record.afk_time,
          record.afk_since,
          record.gamemode.map(|mode| mode.as_str()),
          record.gamemode_since,
          record.player_kills,
          record.mob_kills,
          record.deaths,
          record.chat_messages,
          record.commands_used,
        ])?;

        // Child rows are replaced wholesale; the record is the source of truth.
        for table in ["sessions", "gamemode_times", "command_usage", "locations"] {
          tx.prepare_cached(&format!("DELETE FROM {table} WHERE player_id = ?1"))?
            .execute(params![&key])?;
        }

        {
          let mut stmt = tx.prepare_cached(
            "INSERT INTO sessions (player_id, session_start, session_end) VALUES (?1, ?2, ?3)",
          )?;
          for session in &record.sessions {
            stmt.execute(params![&key, session.start, session.end])?;
          }

          let mut stmt = tx.prepare_cached(
            "INSERT INTO gamemode_times (player_id, gamemode, time) VALUES (?1, ?2, ?3)",
          )?;
          for (mode, time) in &record.gamemode_times {
            stmt.execute(params![&key, mode.as_str(), time])?;
          }

          let mut stmt = tx.prepare_cached(
            "INSERT INTO command_usage (player_id, command, uses) VALUES (?1, ?2, ?3)",
          )?;
          for (command, uses) in &record.command_usage {
            stmt.execute(params![&key, command, uses])?;
          }

          let mut stmt = tx.prepare_cached(
            "INSERT INTO locations (player_id, seq, world, x, y, z, recorded_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          )?;
          for (seq, location) in record.locations.iter().enumerate() {
            stmt.execute(params![
              &key,
              seq as i64,
              &location.world,
              location.x,
              location.y,
              location.z,
              location.recorded_at,
            ])?;
          }
        }

        tx.commit()?;
        Ok::<_, rusqlite::Error>(())
      })
      .await?;

    debug!(%id, "saved player record");
    Ok(())
  }

  async fn load_player_record(&self, id: PlayerId) -> Result<Option<PlayerRecord>> {
    let record = self
      .conn()?
      .call(move |conn| {
        let record = conn
          .prepare_cached(&format!("SELECT {PLAYER_COLUMNS} FROM players WHERE id = ?1"))?
          .query_row(params![id.to_string()], player_from_row)
          .optional()?;

        match record {
          Some(mut record) => {
            load_children(conn, &mut record)?;
            Ok::<_, rusqlite::Error>(Some(record))
          }
          None => Ok(None),
        }
      })
      .await?;

    Ok(record)
  }

  async fn load_all_player_records(&self) -> Result<Vec<PlayerRecord>> {
    let records = self
      .conn()?
      .call(|conn| {
        let mut records = conn
          .prepare_cached(&format!("SELECT {PLAYER_COLUMNS} FROM players ORDER BY registered"))?
          .query_map([], player_from_row)?
          .collect::<std::result::Result<Vec<_>, _>>()?;

        for record in &mut records {
          load_children(conn, record)?;
        }

        Ok::<_, rusqlite::Error>(records)
      })
      .await?;

    debug!(count = records.len(), "loaded all player records");
    Ok(records)
  }
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
  E: std::error::Error + Send + Sync + 'static,
{
  rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
  T: FromStr,
  T::Err: std::error::Error + Send + Sync + 'static,
{
  let raw: String = row.get(idx)?;
  raw.parse().map_err(|err| conversion_error(idx, err))
}

fn player_from_row(row: &Row<'_>) -> rusqlite::Result<PlayerRecord> {
  let name: String = row.get(1)?;
  let name = PlayerName::from(&name).map_err(|err| conversion_error(1, err.simplify()))?;
  let gamemode: Option<String> = row.get(10)?;
  let gamemode = gamemode
    .map(|mode| GameMode::from_str(&mode))
    .transpose()
    .map_err(|err| conversion_error(10, err))?;

  let mut record = PlayerRecord::new(parse_column(row, 0)?, row.get(2)?);
  record.name = name;
  record.last_join = row.get(3)?;
  record.last_quit = row.get(4)?;
  record.session_start = row.get(5)?;
  record.playtime = row.get(6)?;
  record.login_times = row.get(7)?;
  record.afk_time = row.get(8)?;
  record.afk_since = row.get(9)?;
  record.gamemode = gamemode;
  record.gamemode_since = row.get(11)?;
  record.player_kills = row.get(12)?;
  record.mob_kills = row.get(13)?;
  record.deaths = row.get(14)?;
  record.chat_messages = row.get(15)?;
  record.commands_used = row.get(16)?;
  Ok(record)
}

fn load_children(conn: &rusqlite::Connection, record: &mut PlayerRecord) -> rusqlite::Result<()> {
  let key = record.id.to_string();

  record.sessions = conn
    .prepare_cached(
      "SELECT session_start, session_end FROM sessions WHERE player_id = ?1 ORDER BY rowid",
    )?
    .query_map(params![&key], |row| {
      Ok(Session {
        start: row.get(0)?,
        end: row.get(1)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  record.gamemode_times = conn
    .prepare_cached("SELECT gamemode, time FROM gamemode_times WHERE player_id = ?1")?
    .query_map(params![&key], |row| Ok((parse_column(row, 0)?, row.get(1)?)))?
    .collect::<rusqlite::Result<BTreeMap<GameMode, i64>>>()?;

  record.command_usage = conn
    .prepare_cached("SELECT command, uses FROM command_usage WHERE player_id = ?1")?
    .query_map(params![&key], |row| Ok((row.get(0)?, row.get(1)?)))?
    .collect::<rusqlite::Result<BTreeMap<String, u32>>>()?;

  record.locations = conn
    .prepare_cached(
      "SELECT world, x, y, z, recorded_at FROM locations WHERE player_id = ?1 ORDER BY seq",
    )?
    .query_map(params![&key], |row| {
      Ok(Location {
        world: row.get(0)?,
        x: row.get(1)?,
        y: row.get(2)?,
        z: row.get(3)?,
        recorded_at: row.get(4)?,
      })
    })?
    .collect::<rusqlite::Result<VecDeque<_>>>()?;

  Ok(())
}
