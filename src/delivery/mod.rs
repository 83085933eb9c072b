//! Moving buffered events to the ingestion endpoint.
//!
//! Two channels exist: an unload-safe beacon that is fired once and never
//! retried, and an async POST retried with exponential backoff.

mod payload;
mod transport;

pub use payload::{PagePayload, SessionPayload, TrackingPayload};
pub use transport::{HttpTransport, Transport};

use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};

use crate::config::TrackerConfig;

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Beacon-style send usable during page teardown.
    UnloadSafe,
    /// Awaited POST with bounded retry.
    Retryable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    /// Retries exhausted; the events stay buffered.
    Failed { attempts: u32 },
    /// The beacon was refused; the events are gone.
    Dropped,
    /// Nothing was sent.
    Skipped,
}

impl DeliveryOutcome {
    /// Whether the sent events should leave the buffer.
    pub fn releases_events(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. } | DeliveryOutcome::Dropped)
    }
}

#[derive(Clone)]
pub struct DeliveryClient {
    transport: Arc<dyn Transport>,
    endpoint_url: String,
    attempts: u32,
    base_delay: Duration,
}

impl DeliveryClient {
    pub fn new(transport: Arc<dyn Transport>, config: &TrackerConfig) -> Self {
        Self {
            transport,
            endpoint_url: config.endpoint_url.clone(),
            attempts: config.retry_attempts.max(1),
            base_delay: config.retry_base_delay,
        }
    }

    pub async fn deliver(&self, channel: Channel, payload: &TrackingPayload) -> DeliveryOutcome {
        match channel {
            Channel::UnloadSafe => {
                if self.send_unload(payload) {
                    DeliveryOutcome::Delivered { attempts: 1 }
                } else {
                    DeliveryOutcome::Dropped
                }
            }
            Channel::Retryable => self.send_with_retry(payload).await,
        }
    }

    /// Fire-and-forget send. `false` means the payload is lost.
    pub fn send_unload(&self, payload: &TrackingPayload) -> bool {
        let body = match serde_json::to_string(payload) {
            Ok(body) => body,
            Err(err) => {
                log_error!("failed to encode unload payload: {err}");
                return false;
            }
        };

        let queued = self.transport.send_beacon(&self.endpoint_url, body);
        if queued {
            log_info!(
                "queued {} events for session {} via beacon",
                payload.events.len(),
                payload.session.session_id
            );
        } else {
            log_warn!(
                "beacon refused, dropping {} events of session {}",
                payload.events.len(),
                payload.session.session_id
            );
        }
        queued
    }

    /// POSTs the payload up to `attempts` times, sleeping
    /// `base_delay * 2^attempt` between tries. Never errors.
    pub async fn send_with_retry(&self, payload: &TrackingPayload) -> DeliveryOutcome {
        let body = match serde_json::to_string(payload) {
            Ok(body) => body,
            Err(err) => {
                log_error!("failed to encode payload: {err}");
                return DeliveryOutcome::Failed { attempts: 0 };
            }
        };

        for attempt in 0..self.attempts {
            match self.transport.post_json(&self.endpoint_url, body.clone()).await {
                Ok(()) => {
                    log_info!(
                        "delivered {} events for session {} (attempt {})",
                        payload.events.len(),
                        payload.session.session_id,
                        attempt + 1
                    );
                    return DeliveryOutcome::Delivered {
                        attempts: attempt + 1,
                    };
                }
                Err(err) => {
                    log_warn!(
                        "delivery attempt {}/{} failed: {err}",
                        attempt + 1,
                        self.attempts
                    );
                    if attempt + 1 < self.attempts {
                        tokio::time::sleep(self.backoff(attempt)).await;
                    }
                }
            }
        }

        log_warn!(
            "giving up on {} events after {} attempts; keeping them buffered",
            payload.events.len(),
            self.attempts
        );
        DeliveryOutcome::Failed {
            attempts: self.attempts,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}
