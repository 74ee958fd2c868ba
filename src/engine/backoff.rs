//! Connection backoff
//!
//! Exponential backoff with jitter. The ceiling starts at the base delay and
//! doubles per failure up to the maximum; each delay is drawn from the upper
//! half of the current ceiling, so delays strictly grow until the cap.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("Connection failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl BackoffPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Delay generator for one connection sequence
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    ceiling_ms: u64,
    max_ms: u64,
}

impl ExponentialBackoff {
    pub fn new(policy: &BackoffPolicy) -> Self {
        let max_ms = policy.max_delay_ms.max(policy.base_delay_ms);
        Self {
            ceiling_ms: policy.base_delay_ms,
            max_ms,
        }
    }

    pub fn ceiling(&self) -> Duration {
        Duration::from_millis(self.ceiling_ms)
    }

    /// Draw the next delay from `[ceiling/2, ceiling)` and grow the ceiling
    pub fn next_delay<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let ceiling = self.ceiling_ms;
        let floor = ceiling / 2;
        let delay = if floor < ceiling {
            rng.gen_range(floor..ceiling)
        } else {
            ceiling
        };
        self.ceiling_ms = ceiling.saturating_mul(2).min(self.max_ms);
        Duration::from_millis(delay)
    }
}

/// Retry `attempt` until it succeeds or the policy's attempts run out.
///
/// The attempt number (starting at 1) is passed to each call.
pub async fn connect_with_backoff<C, E, F, Fut>(mut attempt: F, policy: &BackoffPolicy) -> Result<C, ConnectError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<C, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff = ExponentialBackoff::new(policy);
    let mut number = 1;

    loop {
        match attempt(number).await {
            Ok(connection) => {
                if number > 1 {
                    info!(attempt = number, "Connected after retry");
                }
                return Ok(connection);
            }
            Err(e) if number >= max_attempts => {
                warn!(attempts = number, error = %e, "Connection attempts exhausted");
                return Err(ConnectError::RetriesExhausted {
                    attempts: number,
                    last_error: e.to_string(),
                });
            }
            Err(e) => {
                let delay = backoff.next_delay(&mut rand::thread_rng());
                warn!(attempt = number, error = %e, delay_ms = delay.as_millis() as u64, "Connection failed, backing off");
                tokio::time::sleep(delay).await;
                number += 1;
            }
        }
    }
}
