//! Transient-error retry for Store writes (spec.md §7 / SPEC_FULL.md §C).
//!
//! SQLite surfaces contention between the pool's own `busy_timeout` and a
//! writer as a "database is locked" error rather than blocking forever.
//! `with_retry` gives a mutating Store call a few extra attempts to ride
//! that out. It never retries an optimistic-concurrency loss
//! (`DomainError::ConcurrencyConflict`) or a validation/lookup failure —
//! only the database-busy case is transient here.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;

use crate::domain::error::DomainError;

const MAX_ATTEMPTS: u8 = 3;

pub(crate) async fn with_retry<T, F, Fut>(mut op: F) -> Result<T, DomainError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DomainError>>,
{
    let mut backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(5))
        .with_max_interval(Duration::from_millis(50))
        .build();

    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < MAX_ATTEMPTS && is_transient(&err) => {
                if let Some(delay) = backoff.next_backoff() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn is_transient(err: &DomainError) -> bool {
    matches!(err, DomainError::DatabaseError(msg) if msg.contains("locked") || msg.contains("busy"))
}
