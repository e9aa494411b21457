use crate::config::RetryConfig;
use std::fmt::Display;
use std::time::Duration;

/// Bounded retry with a fixed delay between attempts.
///
/// Attempts are numbered from 1. The first attempt runs immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// How long to wait before `attempt`, or `None` once attempts are exhausted.
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        match attempt {
            0 => None,
            1 => Some(Duration::ZERO),
            n if n <= self.max_attempts => Some(self.delay),
            _ => None,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.delay_ms))
    }
}

/// Every attempt failed
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl<E: Display> Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "gave up after {} attempts: {}",
            self.attempts, self.last_error
        )
    }
}

/// Run `op` under `policy`, sleeping the calling thread between attempts.
pub fn retry_blocking<T, E, F>(policy: &RetryPolicy, mut op: F) -> Result<T, RetryExhausted<E>>
where
    E: Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(e) => {
                log::warn!("Attempt {}/{} failed: {}", attempt, policy.max_attempts, e);
                match policy.delay_before(attempt + 1) {
                    Some(delay) => {
                        if !delay.is_zero() {
                            std::thread::sleep(delay);
                        }
                        attempt += 1;
                    }
                    None => {
                        return Err(RetryExhausted {
                            attempts: attempt,
                            last_error: e,
                        })
                    }
                }
            }
        }
    }
}
