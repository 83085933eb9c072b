use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{BehaviorSummary, DeviceInfo, EventRecord, Location, SessionRecord};

/// Body POSTed to the ingestion endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct TrackingPayload {
    pub session: SessionPayload,
    /// Always in append order.
    pub events: Vec<EventRecord>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    pub session_id: String,
    pub visitor_id: String,
    pub business_id: String,
    pub fingerprint: String,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub device: DeviceInfo,
    pub location: Location,
    pub page: PagePayload,
    pub behavior: BehaviorSummary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PagePayload {
    pub entry_url: String,
    pub current_url: String,
    pub referrer: Option<String>,
    pub page_views: u32,
}

impl TrackingPayload {
    pub fn new(session: &SessionRecord, current_url: String, events: Vec<EventRecord>) -> Self {
        Self {
            session: SessionPayload {
                session_id: session.session_id.clone(),
                visitor_id: session.visitor_id.clone(),
                business_id: session.business_id.clone(),
                fingerprint: session.fingerprint.clone(),
                started_at: session.started_at,
                last_activity_at: session.last_activity_at,
                device: session.device.clone(),
                location: session.location.clone(),
                page: PagePayload {
                    entry_url: session.entry_url.clone(),
                    current_url,
                    referrer: session.referrer.clone(),
                    page_views: session.page_views,
                },
                behavior: session.behavior.clone(),
            },
            events,
        }
    }
}
