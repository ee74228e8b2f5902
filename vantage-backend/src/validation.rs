/// Input validation for events and identifiers arriving over HTTP or commands
use thiserror::Error;
use vantage_db::{EventKind, PlayerId};

/// Max events accepted in one delivery
pub const MAX_EVENT_BATCH: usize = 1000;
/// Max length of a recorded command, in bytes
pub const MAX_COMMAND_LEN: usize = 256;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Player name cannot be empty")]
    PlayerNameEmpty,

    #[error("Player name too long (max 16 characters, got {0})")]
    PlayerNameTooLong(usize),

    #[error("Player name contains invalid characters (only alphanumeric and underscore allowed)")]
    PlayerNameInvalidChars,

    #[error("Invalid player id '{0}' (expected a UUID)")]
    InvalidPlayerId(String),

    #[error("Event batch cannot be empty")]
    EventBatchEmpty,

    #[error("Event batch too large (max {max} events, got {actual})")]
    EventBatchTooLarge { max: usize, actual: usize },

    #[error("Command cannot be empty")]
    CommandEmpty,

    #[error("Command too long (max {max} bytes, got {actual})")]
    CommandTooLong { max: usize, actual: usize },

    #[error("World name cannot be empty")]
    WorldNameEmpty,

    #[error("Location coordinates must be finite")]
    LocationNotFinite,
}

/// Validates a Minecraft player name
///
/// Rules:
/// - Cannot be empty
/// - Max 16 characters (Minecraft username limit)
/// - Only alphanumeric characters and underscores
pub fn validate_player_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::PlayerNameEmpty);
    }

    if name.len() > 16 {
        return Err(ValidationError::PlayerNameTooLong(name.len()));
    }

    if !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(ValidationError::PlayerNameInvalidChars);
    }

    Ok(())
}

/// Parses a player id given as text (path segment or command argument)
pub fn parse_player_id(raw: &str) -> Result<PlayerId, ValidationError> {
    raw.trim()
        .parse()
        .map_err(|_| ValidationError::InvalidPlayerId(raw.to_string()))
}

/// Validates the size of an event delivery
///
/// Rules:
/// - At least one event
/// - Max [`MAX_EVENT_BATCH`] events per request (prevents DOS)
pub fn validate_event_count(count: usize) -> Result<(), ValidationError> {
    if count == 0 {
        return Err(ValidationError::EventBatchEmpty);
    }

    if count > MAX_EVENT_BATCH {
        return Err(ValidationError::EventBatchTooLarge {
            max: MAX_EVENT_BATCH,
            actual: count,
        });
    }

    Ok(())
}

/// Validates the payload of a single event
pub fn validate_event(kind: &EventKind) -> Result<(), ValidationError> {
    match kind {
        EventKind::Join { name } => validate_player_name(name.as_str()),
        EventKind::Command { command } => validate_command(command),
        EventKind::Move { location } => {
            if location.world.is_empty() {
                return Err(ValidationError::WorldNameEmpty);
            }
            if ![location.x, location.y, location.z]
                .iter()
                .all(|c| c.is_finite())
            {
                return Err(ValidationError::LocationNotFinite);
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Validates a recorded command
///
/// Rules:
/// - Cannot be empty or whitespace
/// - Max [`MAX_COMMAND_LEN`] bytes
pub fn validate_command(command: &str) -> Result<(), ValidationError> {
    if command.trim().is_empty() {
        return Err(ValidationError::CommandEmpty);
    }

    if command.len() > MAX_COMMAND_LEN {
        return Err(ValidationError::CommandTooLong {
            max: MAX_COMMAND_LEN,
            actual: command.len(),
        });
    }

    Ok(())
}
