//! Bounded retry for SQLite lock contention
//!
//! Concurrent pipeline units persist status through one database file, so
//! a status write may briefly find the database locked.

use mbr_common::{Error, Result};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Total time a status write may spend waiting out lock contention
pub const DEFAULT_MAX_LOCK_WAIT: Duration = Duration::from_secs(5);

const FIRST_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Run `write` until it succeeds, fails with a non-lock error, or the lock
/// has been held for longer than `max_wait`. Backoff doubles from 10ms up
/// to 1s and never sleeps past the deadline.
pub async fn retry_on_lock<F, Fut, T>(what: &str, max_wait: Duration, mut write: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let mut backoff = FIRST_BACKOFF;
    let mut tries = 0u32;

    loop {
        tries += 1;
        let err = match write().await {
            Ok(value) => {
                if tries > 1 {
                    debug!(what, tries, waited_ms = started.elapsed().as_millis() as u64, "Lock cleared");
                }
                return Ok(value);
            }
            Err(err) if err.is_lock_contention() => err,
            Err(err) => return Err(err),
        };

        let waited = started.elapsed();
        let Some(remaining) = max_wait.checked_sub(waited).filter(|r| !r.is_zero()) else {
            warn!(what, tries, waited_ms = waited.as_millis() as u64, "Gave up waiting for database lock");
            return Err(Error::Internal(format!(
                "{} still locked after {} tries over {} ms: {}",
                what,
                tries,
                waited.as_millis(),
                err
            )));
        };

        debug!(what, tries, backoff_ms = backoff.as_millis() as u64, "Database locked");
        tokio::time::sleep(backoff.min(remaining)).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}
