use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::time::Instant;

const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

use crate::{
    input::{Disposer, InputEvent, InputHub, InputKind},
    models::PointerPosition,
};

use super::ScrollAttention;

/// Payload of an `activity_update` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySnapshot {
    pub time_on_page_secs: u64,
    pub max_scroll_percent: u32,
    pub visible_zones: Vec<String>,
    pub last_pointer: Option<PointerPosition>,
}

#[derive(Debug)]
struct MonitorState {
    page_started: Instant,
    last_input: Option<Instant>,
    last_pointer: Option<PointerPosition>,
}

/// Remembers when the user last moved the pointer or scrolled.
#[derive(Clone)]
pub struct ActivityMonitor {
    state: Arc<Mutex<MonitorState>>,
}

impl ActivityMonitor {
    pub fn new(now: Instant) -> Self {
        Self {
            state: Arc::new(Mutex::new(MonitorState {
                page_started: now,
                last_input: None,
                last_pointer: None,
            })),
        }
    }

    /// Starts a fresh observation window, e.g. for a new session.
    pub fn reset(&self, now: Instant) {
        let mut guard = self.lock();
        guard.page_started = now;
        guard.last_input = None;
        guard.last_pointer = None;
    }

    pub fn record_input(&self, event: &InputEvent, now: Instant) {
        let mut guard = self.lock();
        guard.last_input = Some(now);
        if let Some(position) = event.position {
            guard.last_pointer = Some(position);
        }
    }

    /// True while the gap since the last input is below `threshold`. No
    /// input since the last reset means inactive.
    pub fn is_active(&self, now: Instant, threshold: Duration) -> bool {
        self.lock()
            .last_input
            .is_some_and(|last| now.saturating_duration_since(last) < threshold)
    }

    pub fn time_on_page(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.lock().page_started)
    }

    pub fn snapshot(&self, now: Instant, attention: &ScrollAttention) -> ActivitySnapshot {
        let guard = self.lock();
        ActivitySnapshot {
            time_on_page_secs: now.saturating_duration_since(guard.page_started).as_secs(),
            max_scroll_percent: attention.max_scroll_percent(),
            visible_zones: attention.visible_labels(),
            last_pointer: guard.last_pointer,
        }
    }

    /// Follows pointer movement and scrolling on `hub` until disposed.
    pub fn listen(&self, hub: &InputHub) -> Disposer {
        let monitor = self.clone();
        hub.subscribe(&[InputKind::PointerMove, InputKind::Scroll], move |event| {
            monitor.record_input(event, Instant::now());
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Copy)]
struct ClockState {
    last: Instant,
    at: DateTime<Utc>,
}

/// Last qualifying interaction, the anchor of the inactivity deadline.
#[derive(Clone)]
pub struct ActivityClock {
    state: Arc<Mutex<ClockState>>,
}

impl ActivityClock {
    pub fn new(now: Instant) -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                last: now,
                at: Utc::now(),
            })),
        }
    }

    pub fn touch(&self) {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        guard.last = Instant::now();
        guard.at = Utc::now();
    }

    pub fn last(&self) -> Instant {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).last
    }

    pub fn last_at(&self) -> DateTime<Utc> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).at
    }

    /// When the session expires unless touched again. Timeouts too large
    /// for the clock land thirty years out.
    pub fn deadline(&self, timeout: Duration) -> Instant {
        let last = self.last();
        last.checked_add(timeout).unwrap_or_else(|| last + FAR_FUTURE)
    }
}
