//! Server-wide statistics computed from every player record.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use vantage_db::{GameMode, PlayerId, PlayerName, PlayerRecord};

pub const DAY_MS: i64 = 86_400_000;
const WEEK_MS: i64 = 7 * DAY_MS;
const MONTH_MS: i64 = 30 * DAY_MS;
/// Window in which a player must have been seen to count as active
const ACTIVE_WINDOW_MS: i64 = 14 * DAY_MS;
/// Logins needed before a player can count as active
const ACTIVE_MIN_LOGINS: u32 = 3;
const RANKING_SIZE: usize = 10;
const SERIES_DAYS: i64 = 30;

/// One complete aggregation result. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisSnapshot {
    /// Unix timestamp (ms) the snapshot was computed at
    pub refresh_date: i64,
    pub total_players: usize,
    pub online_players: usize,
    pub active_players: usize,
    pub new_players_day: usize,
    pub new_players_week: usize,
    pub new_players_month: usize,
    pub total_logins: u64,
    /// Includes the running time of sessions still in progress
    pub total_playtime: i64,
    pub average_playtime: i64,
    pub session_count: usize,
    pub average_session_length: i64,
    pub player_kills: u64,
    pub mob_kills: u64,
    pub deaths: u64,
    pub total_afk_time: i64,
    pub gamemode_times: BTreeMap<GameMode, i64>,
    /// Fraction of all tracked gamemode time, 0.0..=1.0
    pub gamemode_shares: BTreeMap<GameMode, f64>,
    pub top_commands: Vec<CommandCount>,
    pub playtime_ranking: Vec<RankedPlayer>,
    /// Oldest day first
    pub daily: Vec<DailyActivity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandCount {
    pub command: String,
    pub uses: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedPlayer {
    pub id: PlayerId,
    pub name: PlayerName,
    pub playtime: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyActivity {
    pub day_start: i64,
    pub unique_players: usize,
    pub new_players: usize,
}

/// Playtime with the current session counted up to `now`.
pub fn live_playtime(record: &PlayerRecord, now: i64) -> i64 {
    record.playtime
        + record
            .session_start
            .map_or(0, |start| (now - start).max(0))
}

/// Sort command usage by count (descending), then name, keeping `limit` entries.
pub fn rank_commands<'a>(
    usage: impl IntoIterator<Item = (&'a String, u64)>,
    limit: usize,
) -> Vec<CommandCount> {
    let mut totals: HashMap<&str, u64> = HashMap::new();
    for (command, uses) in usage {
        *totals.entry(command.as_str()).or_insert(0) += uses;
    }
    let mut ranked: Vec<CommandCount> = totals
        .into_iter()
        .map(|(command, uses)| CommandCount {
            command: command.to_string(),
            uses,
        })
        .collect();
    ranked.sort_by(|a, b| b.uses.cmp(&a.uses).then_with(|| a.command.cmp(&b.command)));
    ranked.truncate(limit);
    ranked
}

/// Fraction of the total per gamemode; empty when nothing was tracked.
pub fn gamemode_shares(times: &BTreeMap<GameMode, i64>) -> BTreeMap<GameMode, f64> {
    let total: i64 = times.values().sum();
    if total <= 0 {
        return BTreeMap::new();
    }
    times
        .iter()
        .map(|(mode, time)| (*mode, *time as f64 / total as f64))
        .collect()
}

fn is_active(record: &PlayerRecord, now: i64) -> bool {
    record.login_times >= ACTIVE_MIN_LOGINS
        && (record.is_online() || now - record.last_seen() <= ACTIVE_WINDOW_MS)
}

/// Whether the player was on the server at some point in `[start, end)`.
fn played_between(record: &PlayerRecord, start: i64, end: i64) -> bool {
    let open = record
        .session_start
        .is_some_and(|session_start| session_start < end);
    open || record
        .sessions
        .iter()
        .any(|session| session.start < end && session.end >= start)
}

pub fn compute(records: &[PlayerRecord], now: i64) -> AnalysisSnapshot {
    let total_players = records.len();
    let registered_within = |window: i64| {
        records
            .iter()
            .filter(|record| now - record.registered <= window)
            .count()
    };

    let total_playtime: i64 = records.iter().map(|record| live_playtime(record, now)).sum();
    let session_count: usize = records.iter().map(|record| record.sessions.len()).sum();
    let session_time: i64 = records
        .iter()
        .flat_map(|record| record.sessions.iter())
        .map(|session| session.length())
        .sum();

    let mut gamemode_times: BTreeMap<GameMode, i64> = BTreeMap::new();
    for record in records {
        for (mode, time) in &record.gamemode_times {
            *gamemode_times.entry(*mode).or_insert(0) += time;
        }
    }

    let top_commands = rank_commands(
        records.iter().flat_map(|record| {
            record
                .command_usage
                .iter()
                .map(|(command, uses)| (command, u64::from(*uses)))
        }),
        RANKING_SIZE,
    );

    let mut playtime_ranking: Vec<RankedPlayer> = records
        .iter()
        .map(|record| RankedPlayer {
            id: record.id,
            name: record.name,
            playtime: live_playtime(record, now),
        })
        .collect();
    playtime_ranking.sort_by(|a, b| b.playtime.cmp(&a.playtime).then_with(|| a.id.cmp(&b.id)));
    playtime_ranking.truncate(RANKING_SIZE);

    let daily = (0..SERIES_DAYS)
        .map(|days_ago| {
            let day_end = now - (SERIES_DAYS - 1 - days_ago) * DAY_MS;
            let day_start = day_end - DAY_MS;
            DailyActivity {
                day_start,
                unique_players: records
                    .iter()
                    .filter(|record| played_between(record, day_start, day_end))
                    .count(),
                new_players: records
                    .iter()
                    .filter(|record| record.registered >= day_start && record.registered < day_end)
                    .count(),
            }
        })
        .collect();

    AnalysisSnapshot {
        refresh_date: now,
        total_players,
        online_players: records.iter().filter(|record| record.is_online()).count(),
        active_players: records.iter().filter(|record| is_active(record, now)).count(),
        new_players_day: registered_within(DAY_MS),
        new_players_week: registered_within(WEEK_MS),
        new_players_month: registered_within(MONTH_MS),
        total_logins: records.iter().map(|record| u64::from(record.login_times)).sum(),
        total_playtime,
        average_playtime: average(total_playtime, total_players),
        session_count,
        average_session_length: average(session_time, session_count),
        player_kills: records.iter().map(|record| u64::from(record.player_kills)).sum(),
        mob_kills: records.iter().map(|record| u64::from(record.mob_kills)).sum(),
        deaths: records.iter().map(|record| u64::from(record.deaths)).sum(),
        total_afk_time: records.iter().map(|record| record.afk_time).sum(),
        gamemode_shares: gamemode_shares(&gamemode_times),
        gamemode_times,
        top_commands,
        playtime_ranking,
        daily,
    }
}

fn average(total: i64, count: usize) -> i64 {
    if count == 0 { 0 } else { total / count as i64 }
}
