use serde::{Deserialize, Serialize};

pub const UNKNOWN: &str = "Unknown";

/// Coarse, IP-derived visitor location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub ip: String,
    pub country: String,
    pub country_code: String,
    pub region: String,
    pub city: String,
    pub timezone: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Provider that produced the record, `default` for the fallback.
    pub source: String,
}

impl Location {
    /// Fully populated placeholder used when no provider answers.
    pub fn unknown(timezone: Option<&str>) -> Self {
        Self {
            ip: "unknown".into(),
            country: UNKNOWN.into(),
            country_code: "XX".into(),
            region: UNKNOWN.into(),
            city: UNKNOWN.into(),
            timezone: timezone.unwrap_or("UTC").to_string(),
            latitude: 0.0,
            longitude: 0.0,
            source: "default".into(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.source == "default"
    }
}
