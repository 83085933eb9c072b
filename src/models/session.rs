use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::Location;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
}

impl DeviceType {
    /// Coarse classification from a user agent string.
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_ascii_lowercase();
        if ua.contains("ipad") || ua.contains("tablet") || (ua.contains("android") && !ua.contains("mobile")) {
            DeviceType::Tablet
        } else if ua.contains("mobi") || ua.contains("iphone") || ua.contains("ipod") {
            DeviceType::Mobile
        } else {
            DeviceType::Desktop
        }
    }
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::Desktop
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub user_agent: String,
    pub platform: String,
    pub language: String,
    pub screen_width: u32,
    pub screen_height: u32,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub device_type: DeviceType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PointerPosition {
    pub x: f64,
    pub y: f64,
}

/// Behavior accumulated while the session runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorSummary {
    pub time_on_page_secs: u64,
    pub max_scroll_percent: u32,
    /// Zone label (`"0-10"`) to whole seconds of visibility.
    pub attention_map: BTreeMap<String, u64>,
    pub visible_zones: Vec<String>,
    pub last_pointer: Option<PointerPosition>,
}

/// The one live browsing session of a controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub visitor_id: String,
    pub business_id: String,
    pub fingerprint: String,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub device: DeviceInfo,
    pub location: Location,
    pub referrer: Option<String>,
    pub entry_url: String,
    pub page_views: u32,
    pub behavior: BehaviorSummary,
}

impl SessionRecord {
    pub fn mirror(&self) -> ActiveTrackerMirror {
        ActiveTrackerMirror {
            session_id: self.session_id.clone(),
            visitor_id: self.visitor_id.clone(),
            business_id: self.business_id.clone(),
            started_at: self.started_at,
            last_activity_at: self.last_activity_at,
            page_views: self.page_views,
            entry_url: self.entry_url.clone(),
        }
    }
}

/// Compact copy of the live session kept in storage so other scripts on the
/// page can see which session is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTrackerMirror {
    pub session_id: String,
    pub visitor_id: String,
    pub business_id: String,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub page_views: u32,
    pub entry_url: String,
}
