//! Bounded retries for hardware commands.
//
// Every command the hardware-control worker issues while preparing devices
// goes through `retry_hardware_command`. Failed attempts are logged; once the
// budget is spent the last failure becomes a fatal `AcqError::HardwareControl`.

use crate::error::AcqError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, warn};

/// Defines a policy for retrying a hardware command.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// The maximum number of attempts (including the first one).
    pub max_attempts: u32,
    /// The delay between attempts.
    pub backoff_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            backoff_delay: Duration::from_millis(5),
        }
    }
}

impl RetryPolicy {
    /// Policy with `max_attempts` tries and a fixed delay between them.
    pub fn new(max_attempts: u32, backoff_delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff_delay,
        }
    }
}

/// Runs `operation` until it succeeds or the policy is exhausted.
///
/// `command` names the operation in logs and in the resulting error.
pub async fn retry_hardware_command<T, F, Fut>(
    policy: &RetryPolicy,
    command: &str,
    mut operation: F,
) -> Result<T, AcqError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error = None;
    for attempt in 0..attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!(
                    command,
                    attempt,
                    delay_ms = policy.backoff_delay.as_millis() as u64,
                    "Problem {}: {:#}",
                    command,
                    err
                );
                last_error = Some(err);
                if attempt + 1 < attempts {
                    sleep(policy.backoff_delay).await;
                }
            }
        }
    }
    let err = last_error.unwrap_or_else(|| anyhow::anyhow!("{command} unsuccessful"));
    error!(command, "Giving up after {} attempts", attempts);
    Err(AcqError::hardware(command, &err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tracing_test::traced_test;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_retry_logic_succeeds() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let result = retry_hardware_command(&fast_policy(3), "moving stage", move || async move {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= 2 {
                Ok(n)
            } else {
                Err(anyhow::anyhow!("device busy"))
            }
        })
        .await;
        assert_eq!(result.ok(), Some(2));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_retry_logic_fails() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let result: Result<(), _> =
            retry_hardware_command(&fast_policy(3), "changing exposure", move || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("camera not responding"))
            })
            .await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        match result {
            Err(AcqError::HardwareControl { command, message }) => {
                assert_eq!(command, "changing exposure");
                assert!(message.contains("camera not responding"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(logs_contain("Giving up after 3 attempts"));
    }

    #[test]
    fn test_default_policy_matches_engine_constants() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 6);
        assert_eq!(policy.backoff_delay, Duration::from_millis(5));
    }
}
