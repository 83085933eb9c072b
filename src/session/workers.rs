//! Timers owned by a running session.
//!
//! Each spawn returns a [`Disposer`] that cancels the task. Tasks hold only a
//! weak handle to the controller and carry the generation they were started
//! for, so a late wakeup never touches a newer session.

use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::input::Disposer;

use super::controller::WeakController;

const ENABLE_LOGS: bool = false;

use crate::log_debug;

fn cancel_on_dispose(token: CancellationToken) -> Disposer {
    Disposer::new(move || token.cancel())
}

fn ticker(period: Duration) -> time::Interval {
    // First tick one period from now, not immediately.
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Confirms the session start once `delay` passes.
pub(super) fn spawn_start_debounce(
    controller: WeakController,
    generation: u64,
    delay: Duration,
) -> Disposer {
    let token = CancellationToken::new();
    let cancel = token.clone();

    tokio::spawn(async move {
        tokio::select! {
            _ = time::sleep(delay) => {
                if let Some(controller) = controller.upgrade() {
                    controller.confirm_start(generation).await;
                }
            }
            _ = cancel.cancelled() => {
                log_debug!("start debounce cancelled for generation {generation}");
            }
        }
    });

    cancel_on_dispose(token)
}

/// Ends the session once no qualifying interaction happened for `timeout`.
///
/// The deadline is re-read after every wakeup, so touching the activity
/// clock is all it takes to push it back.
pub(super) fn spawn_inactivity_watch(
    controller: WeakController,
    generation: u64,
    timeout: Duration,
) -> Disposer {
    let token = CancellationToken::new();
    let cancel = token.clone();

    tokio::spawn(async move {
        loop {
            let Some(deadline) = controller.upgrade().map(|c| c.activity_deadline(timeout)) else {
                break;
            };

            tokio::select! {
                _ = time::sleep_until(deadline) => {
                    let Some(controller) = controller.upgrade() else { break };
                    if controller.activity_deadline(timeout) <= Instant::now() {
                        controller.expire(generation).await;
                        break;
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    });

    cancel_on_dispose(token)
}

pub(super) fn spawn_heartbeat(
    controller: WeakController,
    generation: u64,
    period: Duration,
) -> Disposer {
    let token = CancellationToken::new();
    let cancel = token.clone();

    tokio::spawn(async move {
        let mut interval = ticker(period);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let Some(controller) = controller.upgrade() else { break };
                    controller.record_heartbeat(generation).await;
                }
                _ = cancel.cancelled() => break,
            }
        }
    });

    cancel_on_dispose(token)
}

/// Credits wall-clock time to the visible scroll zones every `period`.
pub(super) fn spawn_scroll_sampler(controller: WeakController, period: Duration) -> Disposer {
    let token = CancellationToken::new();
    let cancel = token.clone();

    tokio::spawn(async move {
        let mut interval = ticker(period);
        let mut last = Instant::now();
        loop {
            tokio::select! {
                now = interval.tick() => {
                    let Some(controller) = controller.upgrade() else { break };
                    controller.sample_scroll(now.saturating_duration_since(last));
                    last = now;
                }
                _ = cancel.cancelled() => break,
            }
        }
    });

    cancel_on_dispose(token)
}

pub(super) fn spawn_activity_ticker(
    controller: WeakController,
    generation: u64,
    period: Duration,
) -> Disposer {
    let token = CancellationToken::new();
    let cancel = token.clone();

    tokio::spawn(async move {
        let mut interval = ticker(period);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let Some(controller) = controller.upgrade() else { break };
                    controller.record_activity_tick(generation).await;
                }
                _ = cancel.cancelled() => break,
            }
        }
    });

    cancel_on_dispose(token)
}

/// Starts a new session from a dormant controller.
pub(super) fn spawn_restart(controller: WeakController) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        log::warn!("cannot restart session: no async runtime");
        return;
    };

    runtime.spawn(async move {
        if let Some(controller) = controller.upgrade() {
            controller.start_session().await;
        }
    });
}
