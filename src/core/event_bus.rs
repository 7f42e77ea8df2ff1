//! Pub/Sub event bus for cross-component playback signals.
//!
//! - `subscribe()` registers a callback per event type, invoked synchronously
//!   on the emitting thread (cache completions arrive on worker threads)
//! - `emit()` invokes callbacks AND queues the event for `poll()`, so the
//!   render loop can batch-process what happened since the last tick
//!
//! Callback order: FIFO within one event type. No ordering across types.

use log::warn;
use serde::Serialize;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::entities::frame::{FrameError, FrameReference};

/// Maximum events in queue before oldest are evicted
const MAX_QUEUE_SIZE: usize = 1000;

/// Marker trait for events. Events must be Send + Sync + 'static.
pub trait Event: Any + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &'static str;
}

impl<T: Any + Send + Sync + 'static> Event for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

type Callback = Arc<dyn Fn(&dyn Any) + Send + Sync>;

pub type BoxedEvent = Box<dyn Event>;

// ============================================================================
// Playback events
// ============================================================================

/// A load finished and the frame is now READY
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameReadyEvent {
    pub frame: FrameReference,
    pub bytes: usize,
}

/// A load errored; the entry stays FAILED until evicted or invalidated
#[derive(Debug, Clone, PartialEq)]
pub struct FrameFailedEvent {
    pub frame: FrameReference,
    pub error: FrameError,
}

/// `prepare()` dropped a request that can never fit the budget
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestSkippedEvent {
    pub frame: FrameReference,
    pub cost: usize,
    pub limit: usize,
}

/// First resolved frame of a session (renderer may recompute zoom-to-fit)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FirstFrameReadyEvent {
    pub timeline_frame: i64,
    pub frame: FrameReference,
}

// ============================================================================
// Bus
// ============================================================================

#[derive(Default)]
struct Shared {
    subscribers: RwLock<HashMap<TypeId, Vec<Callback>>>,
    queue: Mutex<Vec<BoxedEvent>>,
}

/// Cloneable bus handle; clones share subscribers and queue.
#[derive(Clone, Default)]
pub struct EventBus {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_types", &self.shared.subscribers.read().map(|s| s.len()).unwrap_or(0))
            .field("queue_len", &self.queue_len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events of type E.
    ///
    /// # Example
    /// ```ignore
    /// let ready = Arc::new(AtomicUsize::new(0));
    /// let r = Arc::clone(&ready);
    /// bus.subscribe::<FrameReadyEvent, _>(move |_| {
    ///     r.fetch_add(1, Ordering::Relaxed);
    /// });
    /// ```
    pub fn subscribe<E, F>(&self, callback: F)
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let wrapped: Callback = Arc::new(move |any: &dyn Any| {
            if let Some(event) = any.downcast_ref::<E>() {
                callback(event);
            }
        });
        self.shared
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(TypeId::of::<E>())
            .or_default()
            .push(wrapped);
    }

    /// Emit event: invoke callbacks immediately, then queue for `poll()`.
    pub fn emit<E: Event>(&self, event: E) {
        // Clone the callback list so subscribers may emit without deadlocking
        let callbacks = self
            .shared
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&TypeId::of::<E>())
            .cloned();
        for cb in callbacks.iter().flatten() {
            cb(&event);
        }

        let mut queue = self.shared.queue.lock().unwrap_or_else(|e| e.into_inner());
        if queue.len() >= MAX_QUEUE_SIZE {
            let evict_count = queue.len() / 2;
            warn!("EventBus queue full ({} events), evicting oldest {}", queue.len(), evict_count);
            queue.drain(0..evict_count);
        }
        queue.push(Box::new(event));
    }

    /// Take all queued events (emission order)
    pub fn poll(&self) -> Vec<BoxedEvent> {
        std::mem::take(&mut *self.shared.queue.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Clear subscribers for type E
    pub fn unsubscribe_all<E: Event>(&self) {
        self.shared
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&TypeId::of::<E>());
    }

    pub fn has_subscribers<E: Event>(&self) -> bool {
        self.shared
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&TypeId::of::<E>())
            .is_some_and(|v| !v.is_empty())
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Downcast a polled event to a concrete type.
///
/// Derefs to `dyn Event` first: calling `as_any()` on the box itself would
/// hit the blanket impl for `Box<dyn Event>` and never match.
#[inline]
pub fn downcast_event<E: Event>(event: &BoxedEvent) -> Option<&E> {
    (**event).as_any().downcast_ref::<E>()
}
