//! Accumulated per-player activity and the fold that builds it from events.

use std::collections::{BTreeMap, VecDeque};

use crate::models::{ActivityEvent, EventKind, GameMode, Location, PlayerId, PlayerName, Session};

/// Everything known about one player.
///
/// Timestamps and durations are unix milliseconds. A record is only ever
/// mutated through [`PlayerRecord::apply`], so the stored state is always the
/// fold of the events seen so far, in the order they were recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRecord {
  pub id: PlayerId,
  pub name: PlayerName,
  /// When the player was first seen
  pub registered: i64,
  pub last_join: Option<i64>,
  pub last_quit: Option<i64>,
  /// Start of the session in progress, `None` while offline
  pub session_start: Option<i64>,
  pub sessions: Vec<Session>,
  pub playtime: i64,
  pub login_times: u32,
  pub afk_time: i64,
  pub afk_since: Option<i64>,
  pub gamemode: Option<GameMode>,
  pub gamemode_since: Option<i64>,
  pub gamemode_times: BTreeMap<GameMode, i64>,
  pub player_kills: u32,
  pub mob_kills: u32,
  pub deaths: u32,
  pub chat_messages: u32,
  pub commands_used: u32,
  pub command_usage: BTreeMap<String, u32>,
  /// Most recent location samples, oldest first
  pub locations: VecDeque<Location>,
}

impl PlayerRecord {
  /// Create an empty record for a player first seen at `registered`.
  pub fn new(id: PlayerId, registered: i64) -> Self {
    Self {
      id,
      name: PlayerName::new(),
      registered,
      last_join: None,
      last_quit: None,
      session_start: None,
      sessions: Vec::new(),
      playtime: 0,
      login_times: 0,
      afk_time: 0,
      afk_since: None,
      gamemode: None,
      gamemode_since: None,
      gamemode_times: BTreeMap::new(),
      player_kills: 0,
      mob_kills: 0,
      deaths: 0,
      chat_messages: 0,
      commands_used: 0,
      command_usage: BTreeMap::new(),
      locations: VecDeque::new(),
    }
  }

  pub fn is_online(&self) -> bool {
    self.session_start.is_some()
  }

  /// Most recent moment the player was known to be on the server.
  pub fn last_seen(&self) -> i64 {
    self
      .last_quit
      .into_iter()
      .chain(self.last_join)
      .max()
      .unwrap_or(self.registered)
  }

  /// Fold one event into the record.
  ///
  /// `location_limit` caps the number of retained location samples; the
  /// oldest samples are dropped first. A limit of zero discards samples.
  pub fn apply(&mut self, event: &ActivityEvent, location_limit: usize) {
    let at = event.at;
    match &event.kind {
      EventKind::Join { name } => {
        // A session left open by a crash is closed at the next join.
        self.close_session(at);
        self.name = *name;
        self.session_start = Some(at);
        self.last_join = Some(at);
        self.login_times += 1;
        if self.gamemode.is_some() {
          self.gamemode_since = Some(at);
        }
      }
      EventKind::Quit => {
        self.close_session(at);
        self.last_quit = Some(at);
      }
      EventKind::Move { location } => {
        if location_limit == 0 {
          return;
        }
        self.locations.push_back(location.clone());
        while self.locations.len() > location_limit {
          self.locations.pop_front();
        }
      }
      EventKind::Chat => self.chat_messages += 1,
      EventKind::Command { command } => {
        self.commands_used += 1;
        *self.command_usage.entry(command.clone()).or_insert(0) += 1;
      }
      EventKind::Death => self.deaths += 1,
      EventKind::PlayerKill => self.player_kills += 1,
      EventKind::MobKill => self.mob_kills += 1,
      EventKind::GameModeChange { mode } => {
        self.close_gamemode_period(at);
        self.gamemode = Some(*mode);
        self.gamemode_since = self.session_start.map(|_| at);
      }
      EventKind::AfkChange { afk: true } => {
        if self.afk_since.is_none() {
          self.afk_since = Some(at);
        }
      }
      EventKind::AfkChange { afk: false } => self.close_afk_period(at),
    }
  }

  fn close_session(&mut self, at: i64) {
    if let Some(start) = self.session_start.take() {
      let session = Session { start, end: at };
      self.playtime += session.length();
      self.sessions.push(session);
    }
    self.close_afk_period(at);
    self.close_gamemode_period(at);
  }

  fn close_afk_period(&mut self, at: i64) {
    if let Some(since) = self.afk_since.take() {
      self.afk_time += (at - since).max(0);
    }
  }

  fn close_gamemode_period(&mut self, at: i64) {
    if let (Some(mode), Some(since)) = (self.gamemode, self.gamemode_since.take()) {
      *self.gamemode_times.entry(mode).or_insert(0) += (at - since).max(0);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const LIMIT: usize = 10;

  fn join(at: i64) -> ActivityEvent {
    ActivityEvent::new(
      at,
      EventKind::Join {
        name: PlayerName::from("Steve").unwrap(),
      },
    )
  }

  fn fold(id: PlayerId, events: &[ActivityEvent]) -> PlayerRecord {
    let mut record = PlayerRecord::new(id, events[0].at);
    for event in events {
      record.apply(event, LIMIT);
    }
    record
  }

  #[test]
  fn test_join_chat_quit_session() {
    let t0 = 1_700_000_000_000;
    let events = vec![
      join(t0),
      ActivityEvent::new(t0 + 1_000, EventKind::Chat),
      ActivityEvent::new(t0 + 2_000, EventKind::Chat),
      ActivityEvent::new(t0 + 3_000, EventKind::Chat),
      ActivityEvent::new(t0 + 60_000, EventKind::Quit),
    ];
    let record = fold(PlayerId::new_v4(), &events);

    assert_eq!(record.chat_messages, 3);
    assert_eq!(record.sessions, vec![Session { start: t0, end: t0 + 60_000 }]);
    assert_eq!(record.playtime, 60_000);
    assert_eq!(record.login_times, 1);
    assert_eq!(record.last_quit, Some(t0 + 60_000));
    assert!(!record.is_online());
    assert_eq!(record.name.as_str(), "Steve");
  }

  #[test]
  fn test_last_quit_reflects_last_event() {
    let events = vec![
      join(100),
      ActivityEvent::new(200, EventKind::Quit),
      join(300),
      ActivityEvent::new(250, EventKind::Quit),
    ];
    let record = fold(PlayerId::new_v4(), &events);

    // Events are folded in call order, not timestamp order.
    assert_eq!(record.last_quit, Some(250));
    assert_eq!(record.sessions.len(), 2);
    // The out-of-order quit produces a zero-length session rather than a negative one.
    assert_eq!(record.playtime, 100);
  }

  #[test]
  fn test_dangling_session_closed_on_rejoin() {
    let record = fold(PlayerId::new_v4(), &[join(0), join(5_000)]);
    assert_eq!(record.sessions, vec![Session { start: 0, end: 5_000 }]);
    assert_eq!(record.session_start, Some(5_000));
    assert_eq!(record.login_times, 2);
  }

  #[test]
  fn test_gamemode_and_afk_accounting() {
    let events = vec![
      join(0),
      ActivityEvent::new(0, EventKind::GameModeChange { mode: GameMode::Survival }),
      ActivityEvent::new(1_000, EventKind::AfkChange { afk: true }),
      ActivityEvent::new(4_000, EventKind::AfkChange { afk: false }),
      ActivityEvent::new(6_000, EventKind::GameModeChange { mode: GameMode::Creative }),
      ActivityEvent::new(7_000, EventKind::AfkChange { afk: true }),
      ActivityEvent::new(10_000, EventKind::Quit),
    ];
    let record = fold(PlayerId::new_v4(), &events);

    assert_eq!(record.gamemode_times.get(&GameMode::Survival), Some(&6_000));
    assert_eq!(record.gamemode_times.get(&GameMode::Creative), Some(&4_000));
    // 3s of explicit AFK plus 3s closed by the quit
    assert_eq!(record.afk_time, 6_000);
    assert_eq!(record.gamemode_since, None);
  }

  #[test]
  fn test_combat_and_commands() {
    let events = vec![
      join(0),
      ActivityEvent::new(1, EventKind::PlayerKill),
      ActivityEvent::new(2, EventKind::MobKill),
      ActivityEvent::new(3, EventKind::MobKill),
      ActivityEvent::new(4, EventKind::Death),
      ActivityEvent::new(5, EventKind::Command { command: "/home".to_string() }),
      ActivityEvent::new(6, EventKind::Command { command: "/home".to_string() }),
      ActivityEvent::new(7, EventKind::Command { command: "/spawn".to_string() }),
    ];
    let record = fold(PlayerId::new_v4(), &events);

    assert_eq!(record.player_kills, 1);
    assert_eq!(record.mob_kills, 2);
    assert_eq!(record.deaths, 1);
    assert_eq!(record.commands_used, 3);
    assert_eq!(record.command_usage.get("/home"), Some(&2));
    assert_eq!(record.command_usage.get("/spawn"), Some(&1));
  }

  #[test]
  fn test_location_samples_are_bounded() {
    let mut record = PlayerRecord::new(PlayerId::new_v4(), 0);
    for i in 0..5 {
      let location = Location {
        world: "world".to_string(),
        x: i as f64,
        y: 64.0,
        z: 0.0,
        recorded_at: i,
      };
      record.apply(&ActivityEvent::new(i, EventKind::Move { location }), 3);
    }
    let xs: Vec<f64> = record.locations.iter().map(|l| l.x).collect();
    assert_eq!(xs, vec![2.0, 3.0, 4.0]);

    let location = Location {
      world: "world".to_string(),
      x: 9.0,
      y: 64.0,
      z: 0.0,
      recorded_at: 9,
    };
    record.apply(&ActivityEvent::new(9, EventKind::Move { location }), 0);
    assert_eq!(record.locations.len(), 3);
  }
}
