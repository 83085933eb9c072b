use chrono::Utc;
use serde_json::{json, Value};
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};
use tokio::time::Instant;

use crate::{
    config::TrackerConfig,
    delivery::{Channel, DeliveryClient, DeliveryOutcome, HttpTransport, TrackingPayload, Transport},
    geolocation::{default_providers, LocationResolver},
    host::PageHost,
    identity::{fingerprint, IdentityStore},
    input::{CleanupList, InputEvent, InputHub, InputKind},
    models::{EventRecord, EventType, SessionRecord},
    storage::{write_json, KeyValueStore, ACTIVE_TRACKER_KEY},
    tracking::{ActivityClock, ActivityMonitor, Checkpoint, ScrollAttention},
};

use super::{
    state::{ControllerState, EndReason, LifecycleState},
    workers,
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

struct ControllerInner {
    config: TrackerConfig,
    page: Arc<dyn PageHost>,
    store: Arc<dyn KeyValueStore>,
    identity: IdentityStore,
    resolver: Arc<LocationResolver>,
    delivery: DeliveryClient,
    hub: InputHub,
    state: tokio::sync::Mutex<ControllerState>,
    scroll: Mutex<ScrollAttention>,
    activity: ActivityMonitor,
    clock: ActivityClock,
}

/// Owns the session of one page: its timers, listeners, buffered events and
/// the delivery of those events when the session ends.
///
/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

/// Handle held by background tasks so they never keep a controller alive.
#[derive(Clone)]
pub(super) struct WeakController(Weak<ControllerInner>);

impl WeakController {
    pub(super) fn upgrade(&self) -> Option<SessionController> {
        self.0.upgrade().map(|inner| SessionController { inner })
    }
}

impl SessionController {
    pub fn new(
        config: TrackerConfig,
        page: Arc<dyn PageHost>,
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn Transport>,
        resolver: Arc<LocationResolver>,
    ) -> Self {
        let now = Instant::now();
        Self {
            inner: Arc::new(ControllerInner {
                identity: IdentityStore::new(Arc::clone(&store)),
                delivery: DeliveryClient::new(transport, &config),
                scroll: Mutex::new(ScrollAttention::new(config.zone_percent())),
                hub: InputHub::new(),
                state: tokio::sync::Mutex::new(ControllerState::default()),
                activity: ActivityMonitor::new(now),
                clock: ActivityClock::new(now),
                config,
                page,
                store,
                resolver,
            }),
        }
    }

    /// Production wiring: HTTP delivery and the default geolocation chain.
    pub fn with_http(
        config: TrackerConfig,
        page: Arc<dyn PageHost>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let resolver = Arc::new(LocationResolver::new(
            default_providers(config.provider_timeout),
            Arc::clone(&store),
            config.location_cache_ttl,
        ));
        Self::new(config, page, store, Arc::new(HttpTransport::default()), resolver)
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    pub async fn state(&self) -> LifecycleState {
        self.inner.state.lock().await.lifecycle
    }

    pub async fn current_session(&self) -> Option<SessionRecord> {
        self.inner.state.lock().await.session.clone()
    }

    /// Events waiting for delivery, oldest first: leftovers of earlier
    /// sessions, then the running session's.
    pub async fn buffered_events(&self) -> Vec<EventRecord> {
        let st = self.inner.state.lock().await;
        st.leftovers
            .iter()
            .flat_map(|leftover| leftover.buffer.events())
            .chain(st.buffer.events())
            .cloned()
            .collect()
    }

    pub async fn start_session(&self) {
        let Some(generation) = self.begin_start().await else {
            return;
        };

        let page = &self.inner.page;
        let timezone = page.timezone();
        let location = self.inner.resolver.resolve(timezone.as_deref()).await;
        let visitor_id = self.inner.identity.get_or_create_visitor_id();

        let mut st = self.inner.state.lock().await;
        if st.lifecycle != LifecycleState::Starting || st.generation != generation {
            log_info!("session start cancelled while resolving location");
            return;
        }

        let now = Utc::now();
        let device = page.device();
        let entry_url = page.url();
        let session = SessionRecord {
            session_id: self.inner.identity.new_session_id(),
            visitor_id,
            business_id: self.inner.config.business_id.clone(),
            fingerprint: fingerprint(&device, timezone.as_deref()),
            started_at: now,
            last_activity_at: now,
            device,
            location,
            referrer: page.referrer(),
            entry_url: entry_url.clone(),
            page_views: 1,
            behavior: Default::default(),
        };

        let start_event = EventRecord::new(
            EventType::Lifecycle,
            "session_start",
            json!({
                "sessionId": session.session_id,
                "visitorId": session.visitor_id,
                "referrer": session.referrer,
                "title": page.title(),
            }),
            entry_url,
        );

        let started = Instant::now();
        self.inner.activity.reset(started);
        self.inner.clock.touch();
        {
            let mut scroll = self.scroll();
            scroll.reset();
            scroll.observe(&page.viewport(), Duration::ZERO);
        }

        st.lifecycle = LifecycleState::Active;
        st.start_reported = false;
        st.pending = vec![start_event];
        st.cleanup = self.arm(generation);

        self.persist_mirror(&session);
        log_info!(
            "session {} started for visitor {} (generation {generation})",
            session.session_id,
            session.visitor_id
        );
        st.session = Some(session);
    }

    /// Records an event on the running session. Ignored unless Active.
    pub async fn track_event(&self, event_type: EventType, name: &str, data: Value) {
        let mut st = self.inner.state.lock().await;
        if !st.is_active() {
            log_debug!("ignoring {name}: no active session");
            return;
        }

        if event_type.is_interaction() {
            self.note_activity(st.session.as_mut());
        }
        st.record(EventRecord::new(event_type, name, data, self.inner.page.url()));
    }

    pub async fn track_page_view(&self, title: &str) {
        let mut st = self.inner.state.lock().await;
        if !st.is_active() {
            return;
        }

        let url = self.inner.page.url();
        let Some(session) = st.session.as_mut() else {
            return;
        };
        session.page_views += 1;
        self.note_activity(Some(&mut *session));
        let metadata = json!({
            "title": title,
            "url": url,
            "pageViews": session.page_views,
        });
        self.persist_mirror(session);

        st.record(EventRecord::new(EventType::PageView, "page_view", metadata, url));
    }

    /// Raw input from page instrumentation.
    pub fn handle_input(&self, event: &InputEvent) {
        self.inner.hub.dispatch(event);
    }

    pub async fn handle_visibility_change(&self, visible: bool) {
        let mut st = self.inner.state.lock().await;
        if !st.is_active() {
            return;
        }

        if visible && self.inner.config.visibility_resets_inactivity {
            self.note_activity(st.session.as_mut());
        }
        let metadata = json!({
            "visible": visible,
            "state": if visible { "visible" } else { "hidden" },
        });
        st.record(EventRecord::new(
            EventType::VisibilityChange,
            "visibility_change",
            metadata,
            self.inner.page.url(),
        ));
    }

    /// The page is being torn down.
    pub async fn handle_page_hide(&self) -> Option<DeliveryOutcome> {
        self.end_session(EndReason::PageLeave).await
    }

    /// Ends the running session and flushes its events.
    ///
    /// Returns `None` when there was no active session to end.
    pub async fn end_session(&self, reason: EndReason) -> Option<DeliveryOutcome> {
        self.finish(reason, None).await
    }

    /// Sends whatever is buffered. Leftovers of earlier sessions go first,
    /// one payload per session, then the running session's events.
    ///
    /// A failure of either part wins over a success of the other.
    pub async fn flush(&self, channel: Channel) -> DeliveryOutcome {
        let earlier = self.deliver_leftovers(channel).await;
        let live = self.flush_live(channel).await;
        match (earlier, live) {
            (failed @ DeliveryOutcome::Failed { .. }, _) => failed,
            (earlier, DeliveryOutcome::Skipped) => earlier,
            (_, live) => live,
        }
    }

    async fn flush_live(&self, channel: Channel) -> DeliveryOutcome {
        let (payload, checkpoint) = {
            let st = self.inner.state.lock().await;
            if st.buffer.is_empty() {
                return DeliveryOutcome::Skipped;
            }
            let Some(mut session) = st.session.clone() else {
                return DeliveryOutcome::Skipped;
            };
            self.sync_last_activity(&mut session);
            let (events, checkpoint) = st.buffer.snapshot();
            (
                TrackingPayload::new(&session, self.inner.page.url(), events),
                checkpoint,
            )
        };

        let outcome = self.inner.delivery.deliver(channel, &payload).await;
        if outcome.releases_events() {
            self.inner.state.lock().await.buffer.acknowledge(checkpoint);
        }
        outcome
    }

    /// Sends parked sessions oldest first, each under its own record, and
    /// stops at the first failure.
    async fn deliver_leftovers(&self, channel: Channel) -> DeliveryOutcome {
        let mut outcome = DeliveryOutcome::Skipped;
        loop {
            let (session_id, payload, checkpoint) = {
                let st = self.inner.state.lock().await;
                let Some(leftover) = st.leftovers.first() else {
                    break;
                };
                let (events, checkpoint) = leftover.buffer.snapshot();
                (
                    leftover.session.session_id.clone(),
                    TrackingPayload::new(&leftover.session, self.inner.page.url(), events),
                    checkpoint,
                )
            };

            outcome = self.inner.delivery.deliver(channel, &payload).await;
            if !outcome.releases_events() {
                log_warn!("leftover events of session {session_id} still undelivered");
                break;
            }

            let mut st = self.inner.state.lock().await;
            if let Some(index) = st
                .leftovers
                .iter()
                .position(|leftover| leftover.session.session_id == session_id)
            {
                st.leftovers[index].buffer.acknowledge(checkpoint);
                if st.leftovers[index].buffer.is_empty() {
                    st.leftovers.remove(index);
                }
            }
        }
        outcome
    }

    /// Claims the controller for a new session. `None` when a start is
    /// already under way or a session is running.
    async fn begin_start(&self) -> Option<u64> {
        let mut st = self.inner.state.lock().await;
        if st.is_busy() {
            return None;
        }
        st.dormant = None;
        st.generation += 1;
        st.lifecycle = LifecycleState::Starting;
        Some(st.generation)
    }

    fn downgrade(&self) -> WeakController {
        WeakController(Arc::downgrade(&self.inner))
    }

    /// Starts every timer and listener of a session.
    fn arm(&self, generation: u64) -> CleanupList {
        let config = &self.inner.config;
        let weak = self.downgrade();
        let mut cleanup = CleanupList::new();

        cleanup.push(workers::spawn_start_debounce(
            weak.clone(),
            generation,
            config.start_debounce,
        ));
        cleanup.push(workers::spawn_inactivity_watch(
            weak.clone(),
            generation,
            config.inactivity_timeout,
        ));
        cleanup.push(workers::spawn_heartbeat(
            weak.clone(),
            generation,
            config.heartbeat_interval,
        ));
        cleanup.push(workers::spawn_scroll_sampler(weak.clone(), config.scroll_tick));
        cleanup.push(workers::spawn_activity_ticker(
            weak,
            generation,
            config.activity_tick,
        ));

        cleanup.push(self.inner.activity.listen(&self.inner.hub));
        let clock = self.inner.clock.clone();
        cleanup.push(self.inner.hub.subscribe(&InputKind::ALL, move |_| clock.touch()));

        cleanup
    }

    pub(super) async fn confirm_start(&self, generation: u64) {
        let mut st = self.inner.state.lock().await;
        if !st.is_current(generation) {
            return;
        }
        st.confirm_start();
        log_debug!("session start confirmed for generation {generation}");
    }

    pub(super) fn activity_deadline(&self, timeout: Duration) -> Instant {
        self.inner.clock.deadline(timeout)
    }

    pub(super) async fn expire(&self, generation: u64) {
        log_info!("no activity for {:?}, ending session", self.inner.config.inactivity_timeout);
        self.finish(EndReason::Inactivity, Some(generation)).await;
    }

    pub(super) async fn record_heartbeat(&self, generation: u64) {
        let mut st = self.inner.state.lock().await;
        if !st.is_current(generation) {
            return;
        }

        let url = self.inner.page.url();
        let time_on_page = self.inner.activity.time_on_page(Instant::now()).as_secs();
        let Some(session) = st.session.as_mut() else {
            return;
        };
        self.sync_last_activity(session);
        self.persist_mirror(session);
        let metadata = json!({
            "sessionId": session.session_id,
            "timeOnPageSecs": time_on_page,
        });

        st.record(EventRecord::new(EventType::Heartbeat, "heartbeat", metadata, url));
    }

    pub(super) fn sample_scroll(&self, elapsed: Duration) {
        let viewport = self.inner.page.viewport();
        self.scroll().observe(&viewport, elapsed);
    }

    pub(super) async fn record_activity_tick(&self, generation: u64) {
        let mut st = self.inner.state.lock().await;
        if !st.is_current(generation) || !st.start_reported {
            return;
        }

        let now = Instant::now();
        if !self
            .inner
            .activity
            .is_active(now, self.inner.config.activity_threshold)
        {
            return;
        }

        let (snapshot, attention_map) = {
            let scroll = self.scroll();
            (self.inner.activity.snapshot(now, &scroll), scroll.attention_map())
        };
        if let Some(session) = st.session.as_mut() {
            let behavior = &mut session.behavior;
            behavior.time_on_page_secs = snapshot.time_on_page_secs;
            behavior.max_scroll_percent = snapshot.max_scroll_percent;
            behavior.attention_map = attention_map;
            behavior.visible_zones = snapshot.visible_zones.clone();
            behavior.last_pointer = snapshot.last_pointer;
        }

        let metadata = serde_json::to_value(&snapshot).unwrap_or_default();
        st.record(EventRecord::new(
            EventType::Activity,
            "activity_update",
            metadata,
            self.inner.page.url(),
        ));
    }

    /// Ends the session; with `generation` set, only if that session is still
    /// the running one.
    async fn finish(&self, reason: EndReason, generation: Option<u64>) -> Option<DeliveryOutcome> {
        let prepared = {
            let mut st = self.inner.state.lock().await;
            if generation.is_none() && st.lifecycle == LifecycleState::Starting {
                // The pending start sees the state change and bails.
                st.lifecycle = LifecycleState::Idle;
                log_info!("session start cancelled ({reason}) before it completed");
                return Some(DeliveryOutcome::Skipped);
            }
            let current = match generation {
                Some(generation) => st.is_current(generation),
                None => st.is_active(),
            };
            if !current {
                return None;
            }

            st.lifecycle = LifecycleState::Ending;
            st.cleanup.dispose_all();
            let session = st.session.take();
            self.clear_mirror();

            match session {
                Some(session) if st.start_reported => Some(self.close(&mut st, session, reason)),
                _ => {
                    // Ended inside the start debounce: the session never existed.
                    st.pending.clear();
                    log_info!("session ended ({reason}) before its start was confirmed");
                    None
                }
            }
        };

        let outcome = match prepared {
            Some((channel, payload, checkpoint)) => {
                let earlier = self.deliver_leftovers(channel).await;
                if earlier != DeliveryOutcome::Skipped {
                    log_debug!("leftovers of earlier sessions: {earlier:?}");
                }

                let outcome = self.inner.delivery.deliver(channel, &payload).await;
                let mut st = self.inner.state.lock().await;
                if outcome.releases_events() {
                    st.buffer.acknowledge(checkpoint);
                }
                if let DeliveryOutcome::Failed { .. } = outcome {
                    log_warn!("{} events kept for the next flush", st.buffer.len());
                    if let Some(session) = st.last_session.clone() {
                        st.park_buffer(session);
                    }
                }
                outcome
            }
            None => DeliveryOutcome::Skipped,
        };

        let mut st = self.inner.state.lock().await;
        if reason == EndReason::Inactivity {
            let weak = self.downgrade();
            st.dormant = Some(
                self.inner
                    .hub
                    .subscribe_once(&InputKind::ALL, move |_| workers::spawn_restart(weak.clone())),
            );
            st.lifecycle = LifecycleState::DormantRestart;
        } else {
            st.lifecycle = LifecycleState::Idle;
        }
        log_info!("session ended ({reason}): {outcome:?}");

        Some(outcome)
    }

    /// Appends `session_end` and builds the final payload.
    fn close(
        &self,
        st: &mut ControllerState,
        mut session: SessionRecord,
        reason: EndReason,
    ) -> (Channel, TrackingPayload, Checkpoint) {
        let now = Instant::now();
        let url = self.inner.page.url();
        let (snapshot, attention_map) = {
            let scroll = self.scroll();
            (self.inner.activity.snapshot(now, &scroll), scroll.attention_map())
        };

        self.sync_last_activity(&mut session);
        session.behavior.time_on_page_secs = snapshot.time_on_page_secs;
        session.behavior.max_scroll_percent = snapshot.max_scroll_percent;
        session.behavior.attention_map = attention_map.clone();
        session.behavior.visible_zones = snapshot.visible_zones;
        session.behavior.last_pointer = snapshot.last_pointer;

        let duration_secs = Utc::now()
            .signed_duration_since(session.started_at)
            .num_seconds()
            .max(0);
        st.record(EventRecord::new(
            EventType::Lifecycle,
            "session_end",
            json!({
                "reason": reason.as_str(),
                "durationSecs": duration_secs,
                "maxScrollPercent": snapshot.max_scroll_percent,
                "attentionMap": attention_map,
                "pageViews": session.page_views,
            }),
            url.clone(),
        ));

        let channel = match reason {
            EndReason::PageLeave => Channel::UnloadSafe,
            EndReason::Inactivity | EndReason::Manual => Channel::Retryable,
        };
        let (events, checkpoint) = st.buffer.snapshot();
        let payload = TrackingPayload::new(&session, url, events);
        st.last_session = Some(session);

        (channel, payload, checkpoint)
    }

    fn note_activity(&self, session: Option<&mut SessionRecord>) {
        self.inner.clock.touch();
        if let Some(session) = session {
            session.last_activity_at = self.inner.clock.last_at();
        }
    }

    /// Input listeners touch the clock without the state lock; fold that in.
    fn sync_last_activity(&self, session: &mut SessionRecord) {
        session.last_activity_at = session.last_activity_at.max(self.inner.clock.last_at());
    }

    fn persist_mirror(&self, session: &SessionRecord) {
        if let Err(err) = write_json(self.inner.store.as_ref(), ACTIVE_TRACKER_KEY, &session.mirror()) {
            log_warn!("failed to persist session mirror: {err}");
        }
    }

    fn clear_mirror(&self) {
        if let Err(err) = self.inner.store.remove(ACTIVE_TRACKER_KEY) {
            log_warn!("failed to clear session mirror: {err}");
        }
    }

    fn scroll(&self) -> MutexGuard<'_, ScrollAttention> {
        self.inner.scroll.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
