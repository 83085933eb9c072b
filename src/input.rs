//! Raw input reported by page instrumentation, and the listener registry
//! that fans it out.
//!
//! Every registration hands back a [`Disposer`] that unregisters exactly what
//! was registered. Owners collect disposers in a [`CleanupList`].

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError, Weak},
};

use crate::models::PointerPosition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Click,
    KeyDown,
    PointerMove,
    Touch,
    Scroll,
}

impl InputKind {
    /// Every kind that counts as a user being present.
    pub const ALL: [InputKind; 5] = [
        InputKind::Click,
        InputKind::KeyDown,
        InputKind::PointerMove,
        InputKind::Touch,
        InputKind::Scroll,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputEvent {
    pub kind: InputKind,
    #[serde(default)]
    pub position: Option<PointerPosition>,
}

impl InputEvent {
    pub fn new(kind: InputKind) -> Self {
        Self { kind, position: None }
    }

    pub fn pointer_move(x: f64, y: f64) -> Self {
        Self {
            kind: InputKind::PointerMove,
            position: Some(PointerPosition { x, y }),
        }
    }
}

/// Runs a cleanup action once, either explicitly or when dropped.
#[must_use = "dropping a Disposer runs it immediately"]
pub struct Disposer(Option<Box<dyn FnOnce() + Send>>);

impl Disposer {
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(action)))
    }

    pub fn dispose(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(action) = self.0.take() {
            action();
        }
    }
}

impl Drop for Disposer {
    fn drop(&mut self) {
        self.run();
    }
}

/// Disposers owned by one activation, released in reverse order.
#[derive(Default)]
pub struct CleanupList {
    disposers: Vec<Disposer>,
}

impl CleanupList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, disposer: Disposer) {
        self.disposers.push(disposer);
    }

    pub fn is_empty(&self) -> bool {
        self.disposers.is_empty()
    }

    pub fn dispose_all(&mut self) {
        while let Some(disposer) = self.disposers.pop() {
            disposer.dispose();
        }
    }
}

impl Drop for CleanupList {
    fn drop(&mut self) {
        self.dispose_all();
    }
}

type Callback = Arc<dyn Fn(&InputEvent) + Send + Sync>;

struct Listener {
    kinds: Vec<InputKind>,
    callback: Callback,
}

#[derive(Default)]
struct HubInner {
    next_id: u64,
    listeners: BTreeMap<u64, Listener>,
}

/// Registry of input listeners.
#[derive(Clone, Default)]
pub struct InputHub {
    inner: Arc<Mutex<HubInner>>,
}

impl InputHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for the given kinds.
    pub fn subscribe(
        &self,
        kinds: &[InputKind],
        callback: impl Fn(&InputEvent) + Send + Sync + 'static,
    ) -> Disposer {
        let id = self.insert(kinds, Arc::new(callback));
        self.disposer_for(id)
    }

    /// Registers a listener that removes itself after its first invocation.
    pub fn subscribe_once(
        &self,
        kinds: &[InputKind],
        callback: impl Fn(&InputEvent) + Send + Sync + 'static,
    ) -> Disposer {
        let mut guard = self.lock();
        let id = guard.next_id;
        guard.next_id += 1;

        let weak = Arc::downgrade(&self.inner);
        let wrapper = move |event: &InputEvent| {
            // Only the invocation that actually removes the entry fires.
            if remove_listener(&weak, id) {
                callback(event);
            }
        };
        guard.listeners.insert(
            id,
            Listener {
                kinds: kinds.to_vec(),
                callback: Arc::new(wrapper),
            },
        );
        drop(guard);

        self.disposer_for(id)
    }

    /// Delivers `event` to every matching listener.
    ///
    /// Callbacks run outside the registry lock, so they may subscribe or
    /// dispose listeners themselves.
    pub fn dispatch(&self, event: &InputEvent) {
        let callbacks: Vec<Callback> = self
            .lock()
            .listeners
            .values()
            .filter(|listener| listener.kinds.contains(&event.kind))
            .map(|listener| Arc::clone(&listener.callback))
            .collect();

        for callback in callbacks {
            callback(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    fn insert(&self, kinds: &[InputKind], callback: Callback) -> u64 {
        let mut guard = self.lock();
        let id = guard.next_id;
        guard.next_id += 1;
        guard.listeners.insert(
            id,
            Listener {
                kinds: kinds.to_vec(),
                callback,
            },
        );
        id
    }

    fn disposer_for(&self, id: u64) -> Disposer {
        let weak = Arc::downgrade(&self.inner);
        Disposer::new(move || {
            remove_listener(&weak, id);
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn remove_listener(hub: &Weak<Mutex<HubInner>>, id: u64) -> bool {
    match hub.upgrade() {
        Some(inner) => inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .remove(&id)
            .is_some(),
        None => false,
    }
}
