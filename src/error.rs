use thiserror::Error;

/// Failures of the key/value storage seam.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage is unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("stored value under {key} is corrupt: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("storage IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures of a single delivery attempt.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint answered with status {status}")]
    Status { status: u16 },

    #[error("transport unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Failures of a single geolocation provider.
#[derive(Debug, Error)]
pub enum LocationError {
    #[error("{provider} request failed: {source}")]
    Request {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} returned an unusable reply: {reason}")]
    Unusable {
        provider: &'static str,
        reason: String,
    },
}
