use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{
    input::{CleanupList, Disposer},
    models::{EventRecord, SessionRecord},
    tracking::EventBuffer,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleState {
    Idle,
    /// Location and identity lookups in flight; an end cancels the start.
    Starting,
    Active,
    /// `session_end` queued, flush in progress.
    Ending,
    /// Ended for inactivity; the next interaction starts a new session.
    DormantRestart,
}

impl Default for LifecycleState {
    fn default() -> Self {
        LifecycleState::Idle
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    PageLeave,
    Inactivity,
    Manual,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::PageLeave => "page_leave",
            EndReason::Inactivity => "inactivity",
            EndReason::Manual => "manual",
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Undelivered events of an ended session, sent later under that session.
#[derive(Debug, Clone)]
pub struct Leftover {
    pub session: SessionRecord,
    pub buffer: EventBuffer,
}

/// Everything the controller mutates, behind one async lock.
#[derive(Default)]
pub struct ControllerState {
    pub lifecycle: LifecycleState,
    /// Bumped on every start; workers of older sessions compare and bail.
    pub generation: u64,
    pub session: Option<SessionRecord>,
    /// Session of the most recent end, kept for re-flushing leftovers.
    pub last_session: Option<SessionRecord>,
    /// Events of the running session.
    pub buffer: EventBuffer,
    /// Earlier sessions whose final flush failed, oldest first.
    pub leftovers: Vec<Leftover>,
    /// Events held back until the start debounce elapses, `session_start`
    /// first.
    pub pending: Vec<EventRecord>,
    pub start_reported: bool,
    /// Timers and listeners owned by the running session.
    pub cleanup: CleanupList,
    /// Single-shot restart listener while dormant.
    pub dormant: Option<Disposer>,
}

impl ControllerState {
    pub fn is_active(&self) -> bool {
        self.lifecycle == LifecycleState::Active
    }

    /// True while a start or a running session would make another start a
    /// duplicate.
    pub fn is_busy(&self) -> bool {
        matches!(
            self.lifecycle,
            LifecycleState::Starting | LifecycleState::Active | LifecycleState::Ending
        )
    }

    /// Parks whatever is buffered under `session` so the next session starts
    /// with an empty buffer.
    pub fn park_buffer(&mut self, session: SessionRecord) {
        if self.buffer.is_empty() {
            return;
        }
        let buffer = std::mem::take(&mut self.buffer);
        self.leftovers.push(Leftover { session, buffer });
    }

    /// True when a worker spawned for `generation` may still act.
    pub fn is_current(&self, generation: u64) -> bool {
        self.is_active() && self.generation == generation
    }

    /// Appends to the buffer, or to the pending list during the debounce.
    pub fn record(&mut self, event: EventRecord) {
        if self.start_reported {
            self.buffer.push(event);
        } else {
            self.pending.push(event);
        }
    }

    /// Moves held-back events into the buffer once the start is confirmed.
    pub fn confirm_start(&mut self) {
        self.start_reported = true;
        let pending = std::mem::take(&mut self.pending);
        self.buffer.extend(pending);
    }
}
