//! Drives a controller from a JSON script of host events.
//!
//! ```json
//! {
//!   "url": "https://shop.example/",
//!   "config": { "endpointUrl": "http://localhost:8080/ingest" },
//!   "steps": [
//!     { "step": "start" },
//!     { "step": "wait", "ms": 500 },
//!     { "step": "track", "eventType": "user_interaction", "name": "button_click" },
//!     { "step": "page_hide" }
//!   ]
//! }
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::{fs, path::Path, path::PathBuf, sync::Arc, time::Duration};

use crate::{
    config::TrackerConfig,
    delivery::Channel,
    host::SimulatedPage,
    input::{InputEvent, InputKind},
    models::{EventType, PointerPosition},
    session::{EndReason, SessionController},
    storage::{JsonFileStore, KeyValueStore, MemoryStore},
};

const ENABLE_LOGS: bool = true;

use crate::log_info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    pub url: String,
    #[serde(default)]
    pub referrer: Option<String>,
    /// Overrides the environment-derived configuration when present.
    #[serde(default)]
    pub config: Option<TrackerConfig>,
    /// Persist storage to this JSON file instead of keeping it in memory.
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    Start,
    Input {
        kind: InputKind,
        #[serde(default)]
        x: Option<f64>,
        #[serde(default)]
        y: Option<f64>,
    },
    #[serde(rename_all = "camelCase")]
    Track {
        event_type: EventType,
        name: String,
        #[serde(default)]
        data: Value,
    },
    PageView {
        url: String,
        #[serde(default)]
        title: String,
    },
    ScrollTo {
        top: f64,
    },
    Visibility {
        visible: bool,
    },
    PageHide,
    End {
        #[serde(default = "manual")]
        reason: EndReason,
    },
    Flush {
        #[serde(default = "retryable")]
        channel: Channel,
    },
    Wait {
        ms: u64,
    },
}

fn manual() -> EndReason {
    EndReason::Manual
}

fn retryable() -> Channel {
    Channel::Retryable
}

impl Script {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay script {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Invalid replay script {}", path.display()))
    }
}

/// Runs every step in order against a simulated page.
pub async fn replay(script: Script) -> Result<()> {
    let config = script.config.unwrap_or_else(TrackerConfig::from_env);
    let store: Arc<dyn KeyValueStore> = match &script.store_path {
        Some(path) => Arc::new(
            JsonFileStore::new(path.clone())
                .with_context(|| format!("Failed to open store at {}", path.display()))?,
        ),
        None => Arc::new(MemoryStore::new()),
    };

    let page = SimulatedPage::new(script.url.clone());
    let page = Arc::new(match script.referrer {
        Some(referrer) => page.with_referrer(referrer),
        None => page,
    });

    log_info!(
        "replaying {} steps against {}",
        script.steps.len(),
        config.endpoint_url
    );
    let controller = SessionController::with_http(config, page.clone(), store);

    for (index, step) in script.steps.into_iter().enumerate() {
        log_info!("step {}: {:?}", index + 1, step);
        run_step(&controller, &page, step).await;
    }

    log_info!("replay finished in state {:?}", controller.state().await);
    Ok(())
}

async fn run_step(controller: &SessionController, page: &SimulatedPage, step: Step) {
    match step {
        Step::Start => controller.start_session().await,
        Step::Input { kind, x, y } => {
            let position = match (x, y) {
                (Some(x), Some(y)) => Some(PointerPosition { x, y }),
                _ => None,
            };
            controller.handle_input(&InputEvent { kind, position });
        }
        Step::Track {
            event_type,
            name,
            data,
        } => controller.track_event(event_type, &name, data).await,
        Step::PageView { url, title } => {
            page.navigate(url, title.clone());
            controller.track_page_view(&title).await;
        }
        Step::ScrollTo { top } => {
            page.scroll_to(top);
            controller.handle_input(&InputEvent::new(InputKind::Scroll));
        }
        Step::Visibility { visible } => controller.handle_visibility_change(visible).await,
        Step::PageHide => {
            let outcome = controller.handle_page_hide().await;
            log_info!("page hide: {outcome:?}");
            // Let the queued beacon go out before the runtime shuts down.
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        Step::End { reason } => {
            let outcome = controller.end_session(reason).await;
            log_info!("end ({reason}): {outcome:?}");
        }
        Step::Flush { channel } => {
            let outcome = controller.flush(channel).await;
            log_info!("flush via {channel:?}: {outcome:?}");
        }
        Step::Wait { ms } => tokio::time::sleep(Duration::from_millis(ms)).await,
    }
}
