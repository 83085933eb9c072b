//! Client-side session and event tracking.
//!
//! A [`SessionController`] owns one visitor session on one page: it resolves
//! identity and location, buffers events while timers sample scroll depth and
//! activity, and delivers everything to the ingestion endpoint when the
//! session ends.

pub mod config;
pub mod delivery;
pub mod error;
pub mod geolocation;
pub mod host;
pub mod identity;
pub mod input;
pub mod models;
pub mod replay;
pub mod session;
pub mod storage;
pub mod tracking;
pub mod utils;

pub use config::TrackerConfig;
pub use delivery::{Channel, DeliveryOutcome, HttpTransport, Transport};
pub use geolocation::{LocationProvider, LocationResolver};
pub use host::{PageHost, SimulatedPage, Viewport};
pub use input::{InputEvent, InputKind};
pub use models::{EventRecord, EventType, SessionRecord};
pub use session::{EndReason, LifecycleState, SessionController};
pub use storage::{JsonFileStore, KeyValueStore, MemoryStore};
pub use utils::init_logging;

use std::path::PathBuf;

/// Entry point of the `pagetrack` binary: `pagetrack <script.json>`.
pub fn run() {
    init_logging();

    log::info!("pagetrack starting up...");

    let result = (|| -> anyhow::Result<()> {
        let path = std::env::args_os()
            .nth(1)
            .map(PathBuf::from)
            .ok_or_else(|| anyhow::anyhow!("usage: pagetrack <script.json>"))?;
        let script = replay::Script::load(&path)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        runtime.block_on(replay::replay(script))
    })();

    if let Err(err) = result {
        log::error!("{err:#}");
        std::process::exit(1);
    }
}
