use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub fn hash_api_key(key: &str) -> String {
  format!("{:x}", Sha256::digest(key.as_bytes()))
}

/// Current unix time in milliseconds.
pub fn now_millis() -> i64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|elapsed| elapsed.as_millis() as i64)
    .unwrap_or_default()
}

/// Source of the current unix time in milliseconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub fn system_clock() -> Clock {
  Arc::new(now_millis)
}

/// Bounded retry with exponential backoff.
///
/// Runs `op` up to `attempts` times (at least once), sleeping `backoff`,
/// `2 * backoff`, ... between failures. Returns the last error if every
/// attempt fails.
pub async fn retry_with_backoff<T, E, F, Fut>(
  attempts: u32,
  backoff: Duration,
  mut op: F,
) -> Result<T, E>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, E>>,
  E: std::fmt::Display,
{
  let attempts = attempts.max(1);
  let mut delay = backoff;
  let mut attempt = 1;
  loop {
    match op().await {
      Ok(value) => return Ok(value),
      Err(err) if attempt < attempts => {
        tracing::warn!(attempt, attempts, error = %err, "storage call failed, retrying");
        tokio::time::sleep(delay).await;
        delay = delay.saturating_mul(2);
        attempt += 1;
      }
      Err(err) => return Err(err),
    }
  }
}

/// Human readable duration, e.g. `2h 5m` or `40s`.
pub fn format_duration(millis: i64) -> String {
  let seconds = millis.max(0) / 1000;
  let (days, hours, minutes, secs) = (
    seconds / 86_400,
    (seconds % 86_400) / 3_600,
    (seconds % 3_600) / 60,
    seconds % 60,
  );
  if days > 0 {
    format!("{}d {}h", days, hours)
  } else if hours > 0 {
    format!("{}h {}m", hours, minutes)
  } else if minutes > 0 {
    format!("{}m {}s", minutes, secs)
  } else {
    format!("{}s", secs)
  }
}
