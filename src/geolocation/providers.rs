use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::error::LocationError;

/// Provider reply before normalization. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawLocation {
    pub ip: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub timezone: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl RawLocation {
    fn is_usable(&self) -> bool {
        self.ip.is_some() || self.country.is_some()
    }
}

/// One source of IP-derived location.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn resolve_location(&self) -> Result<RawLocation, LocationError>;
}

/// `ipapi.co`, queried first.
pub struct IpApiProvider {
    client: reqwest::Client,
    url: String,
}

/// `ipwho.is`.
pub struct IpWhoIsProvider {
    client: reqwest::Client,
    url: String,
}

/// `ipinfo.io`, last resort.
pub struct IpInfoProvider {
    client: reqwest::Client,
    url: String,
}

impl IpApiProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            url: "https://ipapi.co/json/".into(),
        }
    }
}

impl IpWhoIsProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            url: "https://ipwho.is/".into(),
        }
    }
}

impl IpInfoProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            url: "https://ipinfo.io/json".into(),
        }
    }
}

#[async_trait]
impl LocationProvider for IpApiProvider {
    fn name(&self) -> &'static str {
        "ipapi.co"
    }

    async fn resolve_location(&self) -> Result<RawLocation, LocationError> {
        let body = fetch_json(&self.client, &self.url, self.name()).await?;
        parse_ipapi(&body)
    }
}

#[async_trait]
impl LocationProvider for IpWhoIsProvider {
    fn name(&self) -> &'static str {
        "ipwho.is"
    }

    async fn resolve_location(&self) -> Result<RawLocation, LocationError> {
        let body = fetch_json(&self.client, &self.url, self.name()).await?;
        parse_ipwhois(&body)
    }
}

#[async_trait]
impl LocationProvider for IpInfoProvider {
    fn name(&self) -> &'static str {
        "ipinfo.io"
    }

    async fn resolve_location(&self) -> Result<RawLocation, LocationError> {
        let body = fetch_json(&self.client, &self.url, self.name()).await?;
        parse_ipinfo(&body)
    }
}

/// The production chain, each request bounded by `timeout`.
pub fn default_providers(timeout: Duration) -> Vec<std::sync::Arc<dyn LocationProvider>> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|err| {
            log::warn!("falling back to default HTTP client for geolocation: {err}");
            reqwest::Client::new()
        });

    vec![
        std::sync::Arc::new(IpApiProvider::new(client.clone())),
        std::sync::Arc::new(IpWhoIsProvider::new(client.clone())),
        std::sync::Arc::new(IpInfoProvider::new(client)),
    ]
}

async fn fetch_json(
    client: &reqwest::Client,
    url: &str,
    provider: &'static str,
) -> Result<Value, LocationError> {
    let request_error = |source| LocationError::Request { provider, source };

    client
        .get(url)
        .header("Accept", "application/json")
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(request_error)?
        .json::<Value>()
        .await
        .map_err(request_error)
}

fn text(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn number(value: &Value, key: &str) -> Option<f64> {
    match value.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

fn usable(raw: RawLocation, provider: &'static str) -> Result<RawLocation, LocationError> {
    if raw.is_usable() {
        Ok(raw)
    } else {
        Err(LocationError::Unusable {
            provider,
            reason: "reply carries neither ip nor country".into(),
        })
    }
}

pub(crate) fn parse_ipapi(body: &Value) -> Result<RawLocation, LocationError> {
    if body.get("error").and_then(Value::as_bool).unwrap_or(false) {
        return Err(LocationError::Unusable {
            provider: "ipapi.co",
            reason: text(body, "reason").unwrap_or_else(|| "error flag set".into()),
        });
    }

    usable(
        RawLocation {
            ip: text(body, "ip"),
            country: text(body, "country_name"),
            country_code: text(body, "country_code").or_else(|| text(body, "country")),
            region: text(body, "region"),
            city: text(body, "city"),
            timezone: text(body, "timezone"),
            latitude: number(body, "latitude"),
            longitude: number(body, "longitude"),
        },
        "ipapi.co",
    )
}

pub(crate) fn parse_ipwhois(body: &Value) -> Result<RawLocation, LocationError> {
    if body.get("success").and_then(Value::as_bool) == Some(false) {
        return Err(LocationError::Unusable {
            provider: "ipwho.is",
            reason: text(body, "message").unwrap_or_else(|| "success flag unset".into()),
        });
    }

    let timezone = body
        .get("timezone")
        .and_then(|tz| match tz {
            Value::Object(_) => text(tz, "id"),
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        });

    usable(
        RawLocation {
            ip: text(body, "ip"),
            country: text(body, "country"),
            country_code: text(body, "country_code"),
            region: text(body, "region"),
            city: text(body, "city"),
            timezone,
            latitude: number(body, "latitude"),
            longitude: number(body, "longitude"),
        },
        "ipwho.is",
    )
}

pub(crate) fn parse_ipinfo(body: &Value) -> Result<RawLocation, LocationError> {
    let (latitude, longitude) = text(body, "loc")
        .and_then(|loc| {
            let (lat, long) = loc.split_once(',')?;
            Some((lat.trim().parse().ok()?, long.trim().parse().ok()?))
        })
        .map_or((None, None), |(lat, long)| (Some(lat), Some(long)));

    // ipinfo only reports the ISO code.
    let country_code = text(body, "country");

    usable(
        RawLocation {
            ip: text(body, "ip"),
            country: country_code.clone(),
            country_code,
            region: text(body, "region"),
            city: text(body, "city"),
            timezone: text(body, "timezone"),
            latitude,
            longitude,
        },
        "ipinfo.io",
    )
}
