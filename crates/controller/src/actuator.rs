//! Watering commands to the external irrigation program controller.
//!
//! A command is `GET <url>?plant=<name>`. Connect errors, timeouts and HTTP
//! 5xx are retried with exponential backoff; HTTP 4xx is final.

use anyhow::Context;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::{ActuatorConfig, ScheduleConfig};

/// Acknowledgement from the irrigation controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub status: u16,
    pub attempts: u32,
}

#[derive(Debug, Error)]
pub enum ActuationError {
    #[error("irrigation controller rejected watering for {plant}: HTTP {status}")]
    Rejected { plant: String, status: u16 },
    #[error("irrigation controller unreachable for {plant} after {attempts} attempt(s): {last}")]
    Exhausted {
        plant: String,
        attempts: u32,
        last: String,
    },
}

#[async_trait]
pub trait Actuator: Send + Sync {
    async fn water(&self, plant: &str) -> Result<Ack, ActuationError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

pub struct HttpActuator {
    client: reqwest::Client,
    url: String,
    max_attempts: u32,
    backoff: Duration,
}

impl HttpActuator {
    pub fn new(cfg: &ActuatorConfig, schedule: &ScheduleConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            client,
            url: cfg.url.clone(),
            max_attempts: cfg.max_attempts.max(1),
            backoff: schedule.scaled(Duration::from_millis(cfg.backoff_ms)),
        })
    }

    /// Delay before attempt `attempt + 1`.
    fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

#[async_trait]
impl Actuator for HttpActuator {
    async fn water(&self, plant: &str) -> Result<Ack, ActuationError> {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let last = match self
                .client
                .get(&self.url)
                .query(&[("plant", plant)])
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => {
                    debug!(plant, status = resp.status().as_u16(), attempt, "watering command accepted");
                    return Ok(Ack {
                        status: resp.status().as_u16(),
                        attempts: attempt,
                    });
                }
                Ok(resp) if resp.status().is_client_error() => {
                    return Err(ActuationError::Rejected {
                        plant: plant.to_string(),
                        status: resp.status().as_u16(),
                    });
                }
                Ok(resp) => format!("HTTP {}", resp.status().as_u16()),
                Err(e) if e.is_timeout() => "request timed out".to_string(),
                Err(e) => e.to_string(),
            };

            if attempt >= self.max_attempts {
                return Err(ActuationError::Exhausted {
                    plant: plant.to_string(),
                    attempts: attempt,
                    last,
                });
            }

            let delay = self.backoff_for(attempt);
            warn!(
                plant,
                attempt,
                max_attempts = self.max_attempts,
                retry_in_ms = delay.as_millis() as u64,
                "watering command failed: {last}"
            );
            sleep(delay).await;
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
