use std::fmt;
use std::str::FromStr;

use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Minecraft player name - max 16 characters, stored inline (no heap allocation).
pub type PlayerName = ArrayString<16>;

/// Stable unique player identifier (the Minecraft account UUID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
  pub fn new_v4() -> Self {
    Self(Uuid::new_v4())
  }
}

impl fmt::Display for PlayerId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.0.fmt(f)
  }
}

impl FromStr for PlayerId {
  type Err = uuid::Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Uuid::parse_str(s).map(Self)
  }
}

impl From<Uuid> for PlayerId {
  fn from(uuid: Uuid) -> Self {
    Self(uuid)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
  Survival,
  Creative,
  Adventure,
  Spectator,
}

impl GameMode {
  pub const ALL: [GameMode; 4] = [
    GameMode::Survival,
    GameMode::Creative,
    GameMode::Adventure,
    GameMode::Spectator,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      GameMode::Survival => "survival",
      GameMode::Creative => "creative",
      GameMode::Adventure => "adventure",
      GameMode::Spectator => "spectator",
    }
  }
}

impl fmt::Display for GameMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown gamemode: {0}")]
pub struct ParseGameModeError(pub String);

impl FromStr for GameMode {
  type Err = ParseGameModeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    GameMode::ALL
      .into_iter()
      .find(|mode| mode.as_str().eq_ignore_ascii_case(s))
      .ok_or_else(|| ParseGameModeError(s.to_string()))
  }
}

/// A sampled player position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
  pub world: String,
  pub x: f64,
  pub y: f64,
  pub z: f64,
  /// Unix timestamp (ms) of the sample
  pub recorded_at: i64,
}

/// A closed play session, both ends in unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
  pub start: i64,
  pub end: i64,
}

impl Session {
  pub fn length(&self) -> i64 {
    (self.end - self.start).max(0)
  }
}

/// A single discrete occurrence reported by the host for one player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
  /// Unix timestamp (ms) when the host observed the event
  pub at: i64,
  #[serde(flatten)]
  pub kind: EventKind,
}

impl ActivityEvent {
  pub fn new(at: i64, kind: EventKind) -> Self {
    Self { at, kind }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
  Join { name: PlayerName },
  Quit,
  Move { location: Location },
  Chat,
  Command { command: String },
  Death,
  PlayerKill,
  MobKill,
  GameModeChange { mode: GameMode },
  AfkChange { afk: bool },
}

impl EventKind {
  pub fn label(&self) -> &'static str {
    match self {
      EventKind::Join { .. } => "join",
      EventKind::Quit => "quit",
      EventKind::Move { .. } => "move",
      EventKind::Chat => "chat",
      EventKind::Command { .. } => "command",
      EventKind::Death => "death",
      EventKind::PlayerKill => "player_kill",
      EventKind::MobKill => "mob_kill",
      EventKind::GameModeChange { .. } => "gamemode_change",
      EventKind::AfkChange { .. } => "afk_change",
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_gamemode_parse_is_case_insensitive() {
    assert_eq!("SURVIVAL".parse::<GameMode>(), Ok(GameMode::Survival));
    assert_eq!("spectator".parse::<GameMode>(), Ok(GameMode::Spectator));
    assert!("hardcore".parse::<GameMode>().is_err());
  }

  #[test]
  fn test_event_wire_shape() {
    let event: ActivityEvent =
      serde_json::from_str(r#"{"at": 1700000000000, "type": "join", "name": "Steve"}"#).unwrap();
    assert_eq!(event.at, 1_700_000_000_000);
    assert_eq!(
      event.kind,
      EventKind::Join {
        name: PlayerName::from("Steve").unwrap()
      }
    );

    let event: ActivityEvent =
      serde_json::from_str(r#"{"at": 5, "type": "gamemode_change", "mode": "creative"}"#).unwrap();
    assert_eq!(
      event.kind,
      EventKind::GameModeChange {
        mode: GameMode::Creative
      }
    );
  }

  #[test]
  fn test_overlong_name_is_rejected() {
    let result: Result<ActivityEvent, _> =
      serde_json::from_str(r#"{"at": 1, "type": "join", "name": "ThisNameIsWayTooLong"}"#);
    assert!(result.is_err());
  }
}
