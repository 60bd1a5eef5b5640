use crate::error::{Error, Result, StoreResult};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Fixed-count, fixed-backoff retry for mutating store calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self { attempts, backoff }
    }

    /// Runs `call` until it succeeds or `attempts` calls have failed, sleeping
    /// `backoff` between attempts. The last failure comes back as
    /// [`Error::RetriesExhausted`].
    pub fn run<T>(&self, operation: &str, mut call: impl FnMut() -> StoreResult<T>) -> Result<T> {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!("Attempt {}/{} of {}", attempt, attempts, operation);
            match call() {
                Ok(value) => return Ok(value),
                Err(source) if attempt >= attempts => {
                    return Err(Error::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts,
                        source,
                    });
                }
                Err(err) => {
                    warn!("Attempt {}/{} of {} failed: {}", attempt, attempts, operation, err);
                    info!("Retrying in {} seconds", self.backoff.as_secs());
                    thread::sleep(self.backoff);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(10))
    }
}
