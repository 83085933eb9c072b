use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

pub const DEFAULT_ENDPOINT_URL: &str = "http://localhost:3000/api/tracking";

/// Tunables for one tracker instance. Durations serialize as milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackerConfig {
    /// Ingestion endpoint receiving `{session, events}` payloads.
    pub endpoint_url: String,
    /// Tenant the tracked page belongs to.
    pub business_id: String,
    #[serde(with = "duration_ms")]
    pub heartbeat_interval: Duration,
    /// Silence after which the session ends with reason `inactivity`.
    #[serde(with = "duration_ms")]
    pub inactivity_timeout: Duration,
    /// Sessions ended before this elapses are never reported.
    #[serde(with = "duration_ms")]
    pub start_debounce: Duration,
    #[serde(with = "duration_ms")]
    pub activity_tick: Duration,
    /// Gap since last input above which activity ticks are skipped.
    #[serde(with = "duration_ms")]
    pub activity_threshold: Duration,
    #[serde(with = "duration_ms")]
    pub scroll_tick: Duration,
    /// Width of one scroll zone in percent of document height.
    pub scroll_zone_percent: u32,
    /// Total attempts on the retryable channel.
    pub retry_attempts: u32,
    #[serde(with = "duration_ms")]
    pub retry_base_delay: Duration,
    #[serde(with = "duration_ms")]
    pub location_cache_ttl: Duration,
    #[serde(with = "duration_ms")]
    pub provider_timeout: Duration,
    /// Whether the page becoming visible again counts as user activity.
    pub visibility_resets_inactivity: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            endpoint_url: DEFAULT_ENDPOINT_URL.to_string(),
            business_id: String::new(),
            heartbeat_interval: Duration::from_secs(30),
            inactivity_timeout: Duration::from_secs(30 * 60),
            start_debounce: Duration::from_millis(100),
            activity_tick: Duration::from_secs(2),
            activity_threshold: Duration::from_secs(3),
            scroll_tick: Duration::from_secs(1),
            scroll_zone_percent: 10,
            retry_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            location_cache_ttl: Duration::from_secs(24 * 60 * 60),
            provider_timeout: Duration::from_secs(3),
            visibility_resets_inactivity: true,
        }
    }
}

impl TrackerConfig {
    /// Short timers for local development.
    pub fn development() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            inactivity_timeout: Duration::from_secs(20),
            retry_base_delay: Duration::from_millis(500),
            ..Self::default()
        }
    }

    /// Picks the development profile when `PAGETRACK_DEBUG` is truthy and
    /// applies `PAGETRACK_ENDPOINT` / `PAGETRACK_BUSINESS_ID` overrides.
    pub fn from_env() -> Self {
        let debug_mode = std::env::var("PAGETRACK_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let mut config = if debug_mode {
            Self::development()
        } else {
            Self::default()
        };

        if let Ok(endpoint) = std::env::var("PAGETRACK_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                config.endpoint_url = endpoint;
            }
        }
        if let Ok(business_id) = std::env::var("PAGETRACK_BUSINESS_ID") {
            config.business_id = business_id;
        }

        config
    }

    /// Reads a JSON config file; absent fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read tracker config from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Invalid tracker config in {}", path.display()))
    }

    /// Zone width clamped into `1..=100`.
    pub fn zone_percent(&self) -> u32 {
        self.scroll_zone_percent.clamp(1, 100)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
