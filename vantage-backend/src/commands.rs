//! Operator console commands.
//!
//! Commands are parsed from a single line of text, run against the pipeline and
//! answered with human-readable lines.

use std::str::FromStr;

use thiserror::Error;
use vantage_db::PlayerId;

use crate::analysis::UpdateOutcome;
use crate::error::PipelineError;
use crate::helpers::format_duration;
use crate::pipeline::Pipeline;
use crate::validation::{ValidationError, parse_player_id};

const INSPECT_USAGE: &str = "inspect <uuid> [refresh]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Recompute the analysis snapshot now
    Refresh,
    /// Write all dirty records to storage now
    Flush,
    Status,
    /// Show a player report, dropping the cached one first when `refresh` is set
    Inspect { id: PlayerId, refresh: bool },
    Help,
}

#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("no command given, try 'help'")]
    Empty,

    #[error("unknown command '{0}', try 'help'")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let name = words.next().ok_or(CommandError::Empty)?;
        let command = match name.to_ascii_lowercase().as_str() {
            "refresh" => Command::Refresh,
            "flush" => Command::Flush,
            "status" => Command::Status,
            "help" => Command::Help,
            "inspect" => {
                let id = words.next().ok_or(CommandError::Usage(INSPECT_USAGE))?;
                let id = parse_player_id(id)?;
                let refresh = match words.next() {
                    None => false,
                    Some(flag) if flag.eq_ignore_ascii_case("refresh") => true,
                    Some(_) => return Err(CommandError::Usage(INSPECT_USAGE)),
                };
                Command::Inspect { id, refresh }
            }
            _ => return Err(CommandError::Unknown(name.to_string())),
        };
        if words.next().is_some() {
            return Err(CommandError::Usage(command.usage()));
        }
        Ok(command)
    }
}

impl Command {
    fn usage(&self) -> &'static str {
        match self {
            Command::Refresh => "refresh",
            Command::Flush => "flush",
            Command::Status => "status",
            Command::Inspect { .. } => INSPECT_USAGE,
            Command::Help => "help",
        }
    }

    pub async fn execute(self, pipeline: &Pipeline) -> Result<Vec<String>, PipelineError> {
        let lines = match self {
            Command::Refresh => match pipeline.refresh_analysis().await? {
                UpdateOutcome::Completed(snapshot) => vec![format!(
                    "Analysis refreshed: {} players, {} online",
                    snapshot.total_players, snapshot.online_players
                )],
                UpdateOutcome::AlreadyRunning => {
                    vec!["Analysis is already running, skipped".to_string()]
                }
            },
            Command::Flush => {
                let report = pipeline.flush_cache().await?;
                let mut lines = vec![format!("Flushed {} player records", report.saved)];
                if !report.failed.is_empty() {
                    lines.push(format!(
                        "{} records could not be saved and stay in memory",
                        report.failed.len()
                    ));
                }
                lines
            }
            Command::Status => {
                let status = pipeline.status().await;
                let refreshed = match status.last_refresh {
                    Some(at) => format!("{} ago", format_duration(pipeline.now() - at)),
                    None => "never".to_string(),
                };
                vec![
                    format!("Storage: {}", status.backend),
                    format!(
                        "Players in memory: {} ({} unsaved, {} not yet loaded)",
                        status.cache.resident, status.cache.dirty, status.cache.pending
                    ),
                    format!("Analysis: {:?}, last refreshed {}", status.analysis, refreshed),
                    format!("Cached inspect reports: {}", status.cached_reports),
                ]
            }
            Command::Inspect { id, refresh } => {
                if refresh && pipeline.invalidate_report(id).await {
                    tracing::debug!(%id, "dropped cached inspect report");
                }
                let report = pipeline.inspect(id).await?;
                let mut lines = vec![
                    format!(
                        "{} ({}){}",
                        report.name,
                        report.id,
                        if report.online { " - online" } else { "" }
                    ),
                    format!(
                        "Playtime: {} over {} sessions (longest {})",
                        format_duration(report.playtime),
                        report.session_count,
                        format_duration(report.longest_session)
                    ),
                    format!(
                        "Kills: {} players, {} mobs; deaths: {} (KDR {:.2})",
                        report.player_kills,
                        report.mob_kills,
                        report.deaths,
                        report.kill_death_ratio
                    ),
                    format!("AFK: {}", format_duration(report.afk_time)),
                ];
                if let Some(top) = report.top_commands.first() {
                    lines.push(format!("Top command: {} ({} uses)", top.command, top.uses));
                }
                lines
            }
            Command::Help => vec![
                "refresh - recompute the server analysis".to_string(),
                "flush - save all unsaved player data".to_string(),
                "status - show cache status".to_string(),
                "inspect <uuid> [refresh] - show a player report, rebuilt with 'refresh'"
                    .to_string(),
            ],
        };
        Ok(lines)
    }
}

/// Parse and run one console line, rendering failures as output lines too.
pub async fn run_line(pipeline: &Pipeline, line: &str) -> Vec<String> {
    let command = match line.parse::<Command>() {
        Ok(command) => command,
        Err(err) => return vec![err.to_string()],
    };
    match command.execute(pipeline).await {
        Ok(lines) => lines,
        Err(err) => vec![format!("Command failed: {err}")],
    }
}
