//! Fixed-interval polling for the adapter waiters.
//!
//! The AWS calls this tool depends on are eventually consistent: a command is
//! observable some time after it was sent, tasks stop some time after a
//! drain. Each waiter polls its describe call on a fixed interval until the
//! condition holds or the attempt budget runs out.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::{Error, Result};

/// Attempt budget and pacing for one waiter.
#[derive(Clone, Debug)]
pub struct PollConfig {
    /// Maximum number of polls before giving up
    pub max_attempts: u32,
    /// Delay between polls
    pub delay: Duration,
    /// What is being waited on, for logs and the exhaustion error
    pub description: &'static str,
}

/// Command invocations usually land within a few seconds of dispatch.
pub const COMMAND_EXECUTED: PollConfig = PollConfig {
    max_attempts: 50,
    delay: Duration::from_secs(5),
    description: "command execution",
};

/// Task drain is bounded by the tasks' stop timeout, which defaults to 30s
/// but is commonly raised; budget for slow-stopping services.
pub const TASKS_STOPPED: PollConfig = PollConfig {
    max_attempts: 100,
    delay: Duration::from_secs(6),
    description: "tasks to stop",
};

/// A rebooting instance takes minutes to pass both status checks.
pub const INSTANCE_STATUS_OK: PollConfig = PollConfig {
    max_attempts: 40,
    delay: Duration::from_secs(15),
    description: "instance status checks",
};

/// Poll `check` until it reports the condition holds.
///
/// `Ok(true)` completes the wait, `Ok(false)` polls again after the
/// configured delay, and `Err` aborts immediately. Exhausting the attempt
/// budget yields [`Error::WaitExhausted`].
pub async fn poll_until<F, Fut>(config: &PollConfig, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    for attempt in 1..=config.max_attempts {
        if check().await? {
            return Ok(());
        }
        debug!(
            attempt,
            max_attempts = config.max_attempts,
            "waiting for {}",
            config.description
        );
        if attempt < config.max_attempts {
            tokio::time::sleep(config.delay).await;
        }
    }
    Err(Error::wait_exhausted(config.description))
}
