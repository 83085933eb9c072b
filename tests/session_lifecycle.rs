use async_trait::async_trait;
use pagetrack_lib::{
    error::{LocationError, TransportError},
    geolocation::RawLocation,
    identity::is_valid_uuid_v4,
    storage::{UnavailableStore, ACTIVE_TRACKER_KEY},
    Channel, DeliveryOutcome, EndReason, EventType, InputEvent, InputKind, KeyValueStore,
    LifecycleState, LocationProvider, LocationResolver, MemoryStore, SessionController, SimulatedPage,
    TrackerConfig, Transport,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::time::sleep;

const PAST_DEBOUNCE: Duration = Duration::from_millis(150);

/// Keeps every body it is handed instead of sending it.
#[derive(Default)]
struct RecordingTransport {
    refuse_beacons: AtomicBool,
    failing_posts: AtomicU32,
    beacons: Mutex<Vec<Value>>,
    posts: Mutex<Vec<Value>>,
}

impl RecordingTransport {
    fn beacons(&self) -> Vec<Value> {
        self.beacons.lock().unwrap().clone()
    }

    fn posts(&self) -> Vec<Value> {
        self.posts.lock().unwrap().clone()
    }

    fn sent(&self) -> usize {
        self.beacons.lock().unwrap().len() + self.posts.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn send_beacon(&self, _url: &str, body: String) -> bool {
        if self.refuse_beacons.load(Ordering::SeqCst) {
            return false;
        }
        self.beacons
            .lock()
            .unwrap()
            .push(serde_json::from_str(&body).unwrap());
        true
    }

    async fn post_json(&self, _url: &str, body: String) -> Result<(), TransportError> {
        let failing = self.failing_posts.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_posts.store(failing - 1, Ordering::SeqCst);
            return Err(TransportError::Status { status: 502 });
        }
        self.posts
            .lock()
            .unwrap()
            .push(serde_json::from_str(&body).unwrap());
        Ok(())
    }
}

/// Answers after a few seconds, like a provider on a slow network.
struct SlowProvider;

#[async_trait]
impl LocationProvider for SlowProvider {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn resolve_location(&self) -> Result<RawLocation, LocationError> {
        sleep(Duration::from_secs(3)).await;
        Ok(RawLocation {
            ip: Some("203.0.113.7".into()),
            country: Some("Iceland".into()),
            ..RawLocation::default()
        })
    }
}

struct Harness {
    controller: SessionController,
    transport: Arc<RecordingTransport>,
    page: Arc<SimulatedPage>,
    store: Arc<dyn KeyValueStore>,
}

fn harness_with(config: TrackerConfig, store: Arc<dyn KeyValueStore>) -> Harness {
    harness_with_providers(config, store, Vec::new())
}

fn harness_with_providers(
    config: TrackerConfig,
    store: Arc<dyn KeyValueStore>,
    providers: Vec<Arc<dyn LocationProvider>>,
) -> Harness {
    let transport = Arc::new(RecordingTransport::default());
    let page = Arc::new(SimulatedPage::new("https://shop.example/").with_referrer("https://search.example/"));
    let resolver = Arc::new(LocationResolver::new(
        providers,
        Arc::clone(&store),
        config.location_cache_ttl,
    ));
    let controller = SessionController::new(
        config,
        page.clone(),
        Arc::clone(&store),
        transport.clone(),
        resolver,
    );
    Harness {
        controller,
        transport,
        page,
        store,
    }
}

fn harness() -> Harness {
    harness_with(TrackerConfig::development(), Arc::new(MemoryStore::new()))
}

fn event_names(payload: &Value) -> Vec<String> {
    payload["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|event| event["name"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn page_leave_delivers_four_events_in_order() {
    let h = harness();

    h.controller.start_session().await;
    sleep(PAST_DEBOUNCE).await;
    h.controller
        .track_event(EventType::UserInteraction, "button_click", json!({}))
        .await;
    h.controller
        .track_event(EventType::UserInteraction, "button_click", json!({}))
        .await;
    let outcome = h.controller.end_session(EndReason::PageLeave).await;

    assert_eq!(outcome, Some(DeliveryOutcome::Delivered { attempts: 1 }));
    let beacons = h.transport.beacons();
    assert_eq!(beacons.len(), 1);
    assert!(h.transport.posts().is_empty());
    assert_eq!(
        event_names(&beacons[0]),
        vec!["session_start", "button_click", "button_click", "session_end"]
    );

    let end = &beacons[0]["events"][3];
    assert_eq!(end["type"], "lifecycle");
    assert_eq!(end["metadata"]["reason"], "page_leave");
    assert_eq!(beacons[0]["session"]["page"]["referrer"], "https://search.example/");

    assert!(h.controller.buffered_events().await.is_empty());
    assert_eq!(h.controller.state().await, LifecycleState::Idle);
    assert_eq!(h.store.get(ACTIVE_TRACKER_KEY).unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn second_start_is_ignored() {
    let h = harness();

    h.controller.start_session().await;
    let first = h.controller.current_session().await.unwrap();
    h.controller.start_session().await;
    let second = h.controller.current_session().await.unwrap();
    sleep(PAST_DEBOUNCE).await;

    assert_eq!(first.session_id, second.session_id);
    let starts = h
        .controller
        .buffered_events()
        .await
        .iter()
        .filter(|event| event.name == "session_start")
        .count();
    assert_eq!(starts, 1);
}

#[tokio::test(start_paused = true)]
async fn ending_an_idle_controller_does_nothing() {
    let h = harness();

    assert_eq!(h.controller.end_session(EndReason::Manual).await, None);
    h.controller
        .track_event(EventType::UserInteraction, "stray_click", json!({}))
        .await;

    assert_eq!(h.transport.sent(), 0);
    assert_eq!(h.controller.state().await, LifecycleState::Idle);
    assert!(h.controller.buffered_events().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn ending_inside_the_debounce_sends_nothing() {
    let h = harness();

    h.controller.start_session().await;
    sleep(Duration::from_millis(50)).await;
    h.controller
        .track_event(EventType::UserInteraction, "early_click", json!({}))
        .await;
    let outcome = h.controller.end_session(EndReason::Manual).await;
    sleep(Duration::from_secs(1)).await;

    assert_eq!(outcome, Some(DeliveryOutcome::Skipped));
    assert_eq!(h.transport.sent(), 0);
    assert!(h.controller.buffered_events().await.is_empty());
    assert_eq!(h.controller.state().await, LifecycleState::Idle);
}

#[tokio::test(start_paused = true)]
async fn events_from_the_debounce_window_follow_session_start() {
    let h = harness();

    h.controller.start_session().await;
    h.controller
        .track_event(EventType::UserInteraction, "early_click", json!({}))
        .await;
    sleep(PAST_DEBOUNCE).await;
    h.controller.end_session(EndReason::Manual).await;

    let posts = h.transport.posts();
    assert_eq!(
        event_names(&posts[0]),
        vec!["session_start", "early_click", "session_end"]
    );
}

#[tokio::test(start_paused = true)]
async fn inactivity_ends_session_and_input_restarts_it() {
    let h = harness();
    h.controller.start_session().await;
    let first = h.controller.current_session().await.unwrap();

    // Heartbeats at 5s, 10s and 15s do not count as activity.
    sleep(Duration::from_millis(19_900)).await;
    assert_eq!(h.controller.state().await, LifecycleState::Active);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(h.controller.state().await, LifecycleState::DormantRestart);
    assert!(h.controller.current_session().await.is_none());

    let posts = h.transport.posts();
    assert_eq!(posts.len(), 1);
    let names = event_names(&posts[0]);
    assert_eq!(names.first().map(String::as_str), Some("session_start"));
    assert_eq!(names.last().map(String::as_str), Some("session_end"));
    assert!(names.iter().filter(|name| *name == "heartbeat").count() >= 3);
    let end = posts[0]["events"].as_array().unwrap().last().unwrap().clone();
    assert_eq!(end["metadata"]["reason"], "inactivity");

    h.controller.handle_input(&InputEvent::new(InputKind::Click));
    sleep(PAST_DEBOUNCE).await;

    assert_eq!(h.controller.state().await, LifecycleState::Active);
    let second = h.controller.current_session().await.unwrap();
    assert_ne!(first.session_id, second.session_id);
    assert_eq!(first.visitor_id, second.visitor_id);

    // The restart listener fired once and is gone.
    h.controller.handle_input(&InputEvent::new(InputKind::Click));
    sleep(PAST_DEBOUNCE).await;
    assert_eq!(
        h.controller.current_session().await.unwrap().session_id,
        second.session_id
    );
}

#[tokio::test(start_paused = true)]
async fn input_pushes_the_inactivity_deadline_back() {
    let h = harness();
    h.controller.start_session().await;

    sleep(Duration::from_secs(15)).await;
    h.controller.handle_input(&InputEvent::pointer_move(12.0, 40.0));

    sleep(Duration::from_secs(15)).await;
    assert_eq!(h.controller.state().await, LifecycleState::Active);

    sleep(Duration::from_secs(6)).await;
    assert_eq!(h.controller.state().await, LifecycleState::DormantRestart);
}

#[tokio::test(start_paused = true)]
async fn visibility_resets_inactivity_when_enabled() {
    let h = harness();
    h.controller.start_session().await;

    sleep(Duration::from_secs(15)).await;
    h.controller.handle_visibility_change(true).await;
    sleep(Duration::from_secs(10)).await;

    assert_eq!(h.controller.state().await, LifecycleState::Active);
    let names: Vec<String> = h
        .controller
        .buffered_events()
        .await
        .into_iter()
        .map(|event| event.name)
        .collect();
    assert!(names.contains(&"visibility_change".to_string()));
}

#[tokio::test(start_paused = true)]
async fn visibility_is_not_activity_when_disabled() {
    let config = TrackerConfig {
        visibility_resets_inactivity: false,
        ..TrackerConfig::development()
    };
    let h = harness_with(config, Arc::new(MemoryStore::new()));
    h.controller.start_session().await;

    sleep(Duration::from_secs(15)).await;
    h.controller.handle_visibility_change(true).await;
    sleep(Duration::from_secs(6)).await;

    assert_eq!(h.controller.state().await, LifecycleState::DormantRestart);
}

#[tokio::test(start_paused = true)]
async fn failed_retryable_flush_keeps_events_for_later() {
    let h = harness();
    h.transport.failing_posts.store(3, Ordering::SeqCst);

    h.controller.start_session().await;
    sleep(PAST_DEBOUNCE).await;
    h.controller
        .track_event(EventType::UserInteraction, "add_to_cart", json!({ "sku": "A-1" }))
        .await;
    let ended = h.controller.current_session().await.unwrap();
    let outcome = h.controller.end_session(EndReason::Manual).await;

    assert_eq!(outcome, Some(DeliveryOutcome::Failed { attempts: 3 }));
    assert_eq!(h.controller.buffered_events().await.len(), 3);
    assert_eq!(h.controller.state().await, LifecycleState::Idle);

    let outcome = h.controller.flush(Channel::Retryable).await;

    assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 1 });
    assert!(h.controller.buffered_events().await.is_empty());
    let posts = h.transport.posts();
    assert_eq!(posts[0]["session"]["sessionId"], ended.session_id.as_str());
    assert_eq!(
        event_names(&posts[0]),
        vec!["session_start", "add_to_cart", "session_end"]
    );
}

#[tokio::test(start_paused = true)]
async fn refused_beacon_drops_the_buffer() {
    let h = harness();
    h.transport.refuse_beacons.store(true, Ordering::SeqCst);

    h.controller.start_session().await;
    sleep(PAST_DEBOUNCE).await;
    h.controller
        .track_event(EventType::UserInteraction, "button_click", json!({}))
        .await;
    let outcome = h.controller.handle_page_hide().await;

    assert_eq!(outcome, Some(DeliveryOutcome::Dropped));
    assert!(h.controller.buffered_events().await.is_empty());
    assert_eq!(h.controller.flush(Channel::Retryable).await, DeliveryOutcome::Skipped);
}

#[tokio::test(start_paused = true)]
async fn delivery_preserves_call_order() {
    let h = harness();
    h.controller.start_session().await;
    sleep(PAST_DEBOUNCE).await;

    for index in 0..10 {
        h.controller
            .track_event(EventType::UserInteraction, &format!("event_{index}"), json!({ "index": index }))
            .await;
    }
    h.controller.end_session(EndReason::PageLeave).await;

    let names = event_names(&h.transport.beacons()[0]);
    let expected: Vec<String> = std::iter::once("session_start".to_string())
        .chain((0..10).map(|index| format!("event_{index}")))
        .chain(std::iter::once("session_end".to_string()))
        .collect();
    assert_eq!(names, expected);
}

#[tokio::test(start_paused = true)]
async fn events_carry_the_url_they_were_created_on() {
    let h = harness();
    h.controller.start_session().await;
    sleep(PAST_DEBOUNCE).await;

    h.controller
        .track_event(EventType::UserInteraction, "hero_click", json!({}))
        .await;
    h.page.navigate("https://shop.example/checkout", "Checkout");
    h.controller.track_page_view("Checkout").await;
    h.controller
        .track_event(EventType::UserInteraction, "pay_click", json!({}))
        .await;
    h.controller.end_session(EndReason::PageLeave).await;

    let payload = &h.transport.beacons()[0];
    let urls: Vec<&str> = payload["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|event| event["pageUrl"].as_str().unwrap())
        .collect();
    assert_eq!(
        urls,
        vec![
            "https://shop.example/",
            "https://shop.example/",
            "https://shop.example/checkout",
            "https://shop.example/checkout",
            "https://shop.example/checkout",
        ]
    );
    assert_eq!(payload["session"]["page"]["entryUrl"], "https://shop.example/");
    assert_eq!(payload["session"]["page"]["currentUrl"], "https://shop.example/checkout");
    assert_eq!(payload["session"]["page"]["pageViews"], 2);
}

#[tokio::test(start_paused = true)]
async fn blocked_storage_still_tracks() {
    let h = harness_with(TrackerConfig::development(), Arc::new(UnavailableStore));

    h.controller.start_session().await;
    sleep(PAST_DEBOUNCE).await;
    let session = h.controller.current_session().await.unwrap();
    let outcome = h.controller.end_session(EndReason::PageLeave).await;

    assert!(is_valid_uuid_v4(&session.visitor_id));
    assert!(session.location.is_unknown());
    assert_eq!(outcome, Some(DeliveryOutcome::Delivered { attempts: 1 }));
}

#[tokio::test(start_paused = true)]
async fn end_during_location_lookup_cancels_the_start() {
    let h = harness_with_providers(
        TrackerConfig::development(),
        Arc::new(MemoryStore::new()),
        vec![Arc::new(SlowProvider)],
    );

    let starting = {
        let controller = h.controller.clone();
        tokio::spawn(async move { controller.start_session().await })
    };
    sleep(Duration::from_millis(500)).await;
    assert_eq!(h.controller.state().await, LifecycleState::Starting);

    let outcome = h.controller.end_session(EndReason::PageLeave).await;
    assert_eq!(outcome, Some(DeliveryOutcome::Skipped));

    starting.await.unwrap();
    assert_eq!(h.controller.state().await, LifecycleState::Idle);
    assert!(h.controller.current_session().await.is_none());

    sleep(Duration::from_secs(30)).await;
    assert_eq!(h.controller.state().await, LifecycleState::Idle);
    assert!(h.controller.buffered_events().await.is_empty());
    assert_eq!(h.transport.sent(), 0);
}

#[tokio::test(start_paused = true)]
async fn second_start_during_lookup_is_ignored() {
    let h = harness_with_providers(
        TrackerConfig::development(),
        Arc::new(MemoryStore::new()),
        vec![Arc::new(SlowProvider)],
    );

    let first = {
        let controller = h.controller.clone();
        tokio::spawn(async move { controller.start_session().await })
    };
    sleep(Duration::from_millis(500)).await;
    h.controller.start_session().await;
    assert_eq!(h.controller.state().await, LifecycleState::Starting);

    first.await.unwrap();
    sleep(PAST_DEBOUNCE).await;
    assert_eq!(h.controller.state().await, LifecycleState::Active);
    let session = h.controller.current_session().await.unwrap();
    assert_eq!(session.location.country, "Iceland");

    h.controller.end_session(EndReason::PageLeave).await;
    let beacons = h.transport.beacons();
    assert_eq!(beacons.len(), 1);
    assert_eq!(event_names(&beacons[0]), vec!["session_start", "session_end"]);
}

#[tokio::test(start_paused = true)]
async fn leftovers_are_sent_under_their_own_session() {
    let h = harness();
    h.transport.failing_posts.store(3, Ordering::SeqCst);

    h.controller.start_session().await;
    sleep(PAST_DEBOUNCE).await;
    let first = h.controller.current_session().await.unwrap();
    let outcome = h.controller.end_session(EndReason::Manual).await;
    assert_eq!(outcome, Some(DeliveryOutcome::Failed { attempts: 3 }));

    h.controller.start_session().await;
    sleep(PAST_DEBOUNCE).await;
    let second = h.controller.current_session().await.unwrap();
    assert_ne!(first.session_id, second.session_id);
    assert_eq!(
        h.controller.buffered_events().await.len(),
        3,
        "ended session's two events then the new session_start"
    );

    let outcome = h.controller.end_session(EndReason::PageLeave).await;
    assert_eq!(outcome, Some(DeliveryOutcome::Delivered { attempts: 1 }));

    let beacons = h.transport.beacons();
    assert_eq!(beacons.len(), 2);
    assert_eq!(beacons[0]["session"]["sessionId"], first.session_id.as_str());
    assert_eq!(event_names(&beacons[0]), vec!["session_start", "session_end"]);
    assert_eq!(beacons[1]["session"]["sessionId"], second.session_id.as_str());
    assert_eq!(event_names(&beacons[1]), vec!["session_start", "session_end"]);
    assert!(h.controller.buffered_events().await.is_empty());
}
