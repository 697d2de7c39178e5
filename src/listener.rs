//! Engine events: callbacks and subscription streams.
//!
//! Fact changes, agenda changes, firings, and focus changes are
//! reported through a dispatcher. Subscribers get bounded channels and
//! delivery never blocks the engine; events to a full stream are
//! dropped and counted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::fact::{Fact, FactId};
use crate::network::{NodeId, Tag};

/// Default per-subscription stream capacity.
pub const DEFAULT_STREAM_CAPACITY: usize = 1024;

/// What happened.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum EventKind {
    /// A new fact entered working memory.
    FactAsserted {
        /// The published fact.
        fact: Arc<Fact>,
    },
    /// A fact left working memory.
    FactRetracted {
        /// The withdrawn fact.
        fact: Arc<Fact>,
    },
    /// A fact's slots were replaced under the same id.
    FactModified {
        /// The pre-modify fact.
        old: Arc<Fact>,
        /// The post-modify fact.
        new: Arc<Fact>,
    },
    /// An activation was queued.
    ActivationAdded {
        /// Rule name.
        rule: String,
        /// Matched fact ids, join order.
        facts: Vec<FactId>,
        /// Salience at queue time.
        salience: i64,
    },
    /// A queued activation was cancelled before firing.
    ActivationCancelled {
        /// Rule name.
        rule: String,
        /// Matched fact ids.
        facts: Vec<FactId>,
    },
    /// An activation fired.
    ActivationFired {
        /// Rule name.
        rule: String,
        /// Matched fact ids.
        facts: Vec<FactId>,
    },
    /// The focus stack's top changed.
    FocusChanged {
        /// The module now in focus.
        module: String,
    },
    /// The conflict-resolution strategy was replaced.
    StrategyChanged {
        /// New strategy name.
        strategy: &'static str,
    },
    /// A token reached a node. Emitted only when node events are
    /// enabled; intended for network debugging.
    NodeReached {
        /// The node.
        node: NodeId,
        /// Propagation tag of the arriving token.
        tag: Tag,
        /// Fact ids carried by the token.
        facts: Vec<FactId>,
    },
    /// Working memory and the agenda were cleared.
    EngineCleared,
}

/// A timestamped engine event.
#[derive(Debug, Clone)]
pub struct EngineEvent {
    /// When the event was dispatched.
    pub at: DateTime<Utc>,
    /// What happened.
    pub kind: EventKind,
}

/// Handle for removing a registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackId(u64);

type Callback = Box<dyn Fn(&EngineEvent) + Send + Sync>;

/// A bounded subscription to engine events.
///
/// The stream disconnects when the engine is dropped or the dispatcher
/// prunes it after the receiver side is dropped.
#[derive(Debug)]
pub struct EventStream {
    rx: Receiver<EngineEvent>,
}

impl EventStream {
    /// Receives the next event, blocking. Returns `None` once the
    /// engine side is gone.
    pub fn recv(&self) -> Option<EngineEvent> {
        self.rx.recv().ok()
    }

    /// Receives the next event with a timeout. `None` on timeout or
    /// disconnect.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<EngineEvent> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Option<EngineEvent> {
        self.rx.try_recv().ok()
    }

    /// Drains everything currently queued.
    pub fn drain(&self) -> Vec<EngineEvent> {
        self.rx.try_iter().collect()
    }
}

#[derive(Default)]
struct DispatcherState {
    callbacks: Vec<(CallbackId, Callback)>,
    streams: Vec<Sender<EngineEvent>>,
    next_callback: u64,
}

/// Fans engine events out to callbacks and streams.
pub(crate) struct EventDispatcher {
    state: Mutex<DispatcherState>,
    active: AtomicBool,
    node_events: AtomicBool,
    dropped: AtomicU64,
}

impl EventDispatcher {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(DispatcherState::default()),
            active: AtomicBool::new(false),
            node_events: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Cheap check so the engine can skip building event payloads when
    /// nobody is listening.
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn node_events_enabled(&self) -> bool {
        self.node_events.load(Ordering::Acquire)
    }

    pub(crate) fn set_node_events(&self, enabled: bool) {
        self.node_events.store(enabled, Ordering::Release);
    }

    /// Events dropped because a subscriber's stream was full.
    pub(crate) fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn add_callback(&self, callback: Callback) -> CallbackId {
        let mut state = self.lock();
        state.next_callback += 1;
        let id = CallbackId(state.next_callback);
        state.callbacks.push((id, callback));
        self.active.store(true, Ordering::Release);
        id
    }

    pub(crate) fn remove_callback(&self, id: CallbackId) -> bool {
        let mut state = self.lock();
        let before = state.callbacks.len();
        state.callbacks.retain(|(cb_id, _)| *cb_id != id);
        let removed = state.callbacks.len() != before;
        self.refresh_active(&state);
        removed
    }

    pub(crate) fn subscribe(&self, capacity: usize) -> EventStream {
        let (tx, rx) = bounded(capacity.max(1));
        let mut state = self.lock();
        state.streams.push(tx);
        self.active.store(true, Ordering::Release);
        EventStream { rx }
    }

    /// Dispatches one event: callbacks synchronously, then a
    /// non-blocking send to each stream. Disconnected streams are
    /// pruned in passing.
    pub(crate) fn emit(&self, kind: EventKind) {
        if !self.is_active() {
            return;
        }
        let event = EngineEvent {
            at: Utc::now(),
            kind,
        };

        let mut state = self.lock();
        for (_, callback) in &state.callbacks {
            callback(&event);
        }

        let mut pruned = false;
        state.streams.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                pruned = true;
                false
            }
        });
        if pruned {
            self.refresh_active(&state);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DispatcherState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn refresh_active(&self, state: &DispatcherState) {
        self.active.store(
            !state.callbacks.is_empty() || !state.streams.is_empty(),
            Ordering::Release,
        );
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("EventDispatcher")
            .field("callbacks", &state.callbacks.len())
            .field("streams", &state.streams.len())
            .field("dropped", &self.dropped_events())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn inactive_dispatcher_skips_work() {
        let d = EventDispatcher::new();
        assert!(!d.is_active());
        d.emit(EventKind::EngineCleared);
        assert_eq!(d.dropped_events(), 0);
    }

    #[test]
    fn callbacks_see_every_event() {
        let d = EventDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        d.add_callback(Box::new(move |_| {
            seen.fetch_add(1, Ordering::Relaxed);
        }));

        d.emit(EventKind::EngineCleared);
        d.emit(EventKind::FocusChanged {
            module: "MAIN".to_string(),
        });
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn removed_callback_goes_quiet() {
        let d = EventDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let id = d.add_callback(Box::new(move |_| {
            seen.fetch_add(1, Ordering::Relaxed);
        }));

        assert!(d.remove_callback(id));
        assert!(!d.remove_callback(id));
        d.emit(EventKind::EngineCleared);
        assert_eq!(count.load(Ordering::Relaxed), 0);
        assert!(!d.is_active());
    }

    #[test]
    fn streams_receive_in_order() {
        let d = EventDispatcher::new();
        let stream = d.subscribe(8);
        d.emit(EventKind::EngineCleared);
        d.emit(EventKind::StrategyChanged { strategy: "depth" });

        let events = stream.drain();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].kind, EventKind::EngineCleared));
        assert!(matches!(
            events[1].kind,
            EventKind::StrategyChanged { strategy: "depth" }
        ));
    }

    #[test]
    fn full_stream_drops_and_counts() {
        let d = EventDispatcher::new();
        let stream = d.subscribe(1);
        d.emit(EventKind::EngineCleared);
        d.emit(EventKind::EngineCleared);
        assert_eq!(d.dropped_events(), 1);
        assert_eq!(stream.drain().len(), 1);
    }

    #[test]
    fn dropped_stream_is_pruned() {
        let d = EventDispatcher::new();
        let stream = d.subscribe(4);
        drop(stream);
        d.emit(EventKind::EngineCleared);
        assert!(!d.is_active());
    }
}
