use async_trait::async_trait;

use crate::error::TransportError;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// How payloads leave the process.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Single-shot send usable while the page is being torn down. Returns
    /// whether the payload was accepted for transmission.
    fn send_beacon(&self, url: &str, body: String) -> bool;

    /// One POST attempt; non-2xx answers are errors.
    async fn post_json(&self, url: &str, body: String) -> Result<(), TransportError>;
}

/// `reqwest`-backed transport.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn send_beacon(&self, url: &str, body: String) -> bool {
        // A beacon is queued, not awaited: the request outlives the caller.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log_warn!("no async runtime available for beacon to {url}");
            return false;
        };

        let request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .body(body);
        let url = url.to_string();
        runtime.spawn(async move {
            match request.send().await {
                Ok(response) => log_debug!("beacon to {url} answered {}", response.status()),
                Err(err) => log_warn!("beacon to {url} failed: {err}"),
            }
        });
        true
    }

    async fn post_json(&self, url: &str, body: String) -> Result<(), TransportError> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(TransportError::Status {
                status: status.as_u16(),
            })
        }
    }
}
