//! Generic poll-until-condition helper shared by every wait loop in the snapshot engine.
//!
//! `fetch` returns `Ok(None)` when the object doesn't exist. If `not_found_message` is
//! set, a missing object is treated as a terminal error (used when waiting for
//! readiness — disappearing mid-wait is unexpected). If `not_found_message` is `None`,
//! absence is left to `is_ready` to judge (used when waiting for deletion, where
//! `is_ready` is simply "the object is gone").

use std::time::Duration;

use tokio::time::Instant;

use crate::error::{OperationError, Result};

pub async fn wait_for_condition<T, F, Fut, P>(
    mut fetch: F,
    is_ready: P,
    timeout: Duration,
    poll_interval: Duration,
    not_found_message: Option<&str>,
    timeout_message: &str,
) -> Result<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Option<T>>>,
    P: Fn(&Option<T>) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        let current = fetch().await?;
        if current.is_none() {
            if let Some(msg) = not_found_message {
                return Err(OperationError::NotFound(msg.to_string()));
            }
        }
        if is_ready(&current) {
            return Ok(current);
        }
        if Instant::now() >= deadline {
            return Err(OperationError::Timeout(timeout_message.to_string()));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

pub async fn wait_for_absence<T, F, Fut>(
    fetch: F,
    timeout: Duration,
    poll_interval: Duration,
    timeout_message: &str,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Option<T>>>,
{
    wait_for_condition(fetch, |r| r.is_none(), timeout, poll_interval, None, timeout_message).await?;
    Ok(())
}
