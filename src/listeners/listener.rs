//! # Listener record: subscription mask, sink, diagnostics.
//!
//! ## Rules
//! - Exactly one sink per listener; the constructors enforce this.
//! - The mask is mutated only by the dispatcher (through subscription
//!   commands); the record itself is shared across tasks.
//! - `overrun` is sticky: any dropped queue delivery sets it and it stays
//!   set until [`Listener::clear_overrun`].
//! - `refs` counts pooled envelopes sitting in this listener's queue that
//!   have not yet been released through it.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};

use crate::events::EventRef;
use crate::topic::TopicMask;

/// Delivery sink. One per listener.
pub(crate) enum Sink {
    Callback(Box<dyn Fn(&EventRef) + Send + Sync>),
    Queue(mpsc::Sender<EventRef>),
    Wake(Arc<Notify>),
}

impl Sink {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Sink::Callback(_) => "callback",
            Sink::Queue(_) => "queue",
            Sink::Wake(_) => "wake",
        }
    }
}

/// A registered consumer: topic mask, one delivery sink, and diagnostic
/// counters. Created through [`Listener::callback`], [`Listener::queue`],
/// or [`Listener::wake`]; shared as `Arc<Listener>`.
pub struct Listener {
    name: String,
    mask: TopicMask,
    sink: Sink,
    overrun: AtomicBool,
    refs: AtomicU16,
    delivered: AtomicU64,
}

impl Listener {
    /// Creates a callback-sink listener.
    ///
    /// The callback runs synchronously on the dispatcher task. It must not
    /// call back into the bus (the dispatcher cannot drain its own inbox)
    /// and must not keep the envelope reference past return unless the
    /// envelope is caller-allocated.
    pub fn callback(
        name: impl Into<String>,
        callback: impl Fn(&EventRef) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Self::with_sink(name, Sink::Callback(Box::new(callback)))
    }

    /// Creates a queue-sink listener with a bounded queue of `capacity`
    /// (clamped to at least 1). Returns the listener and the receiving end.
    ///
    /// Deliveries never block the dispatcher: when the queue is full the
    /// delivery is dropped and the sticky overrun flag is set.
    pub fn queue(name: impl Into<String>, capacity: usize) -> (Arc<Self>, mpsc::Receiver<EventRef>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::with_sink(name, Sink::Queue(tx)), rx)
    }

    /// Creates a wake-sink listener signalling `notify`.
    ///
    /// No envelope is handed over; a delivery stores one notification
    /// permit, so a publication racing ahead of the waiter is not lost.
    pub fn wake(name: impl Into<String>, notify: Arc<Notify>) -> Arc<Self> {
        Self::with_sink(name, Sink::Wake(notify))
    }

    fn with_sink(name: impl Into<String>, sink: Sink) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            mask: TopicMask::empty(),
            sink,
            overrun: AtomicBool::new(false),
            refs: AtomicU16::new(0),
            delivered: AtomicU64::new(0),
        })
    }

    /// Diagnostic name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscription bitmask.
    pub fn mask(&self) -> &TopicMask {
        &self.mask
    }

    /// True if any queue delivery has been dropped since the last
    /// [`clear_overrun`](Self::clear_overrun).
    pub fn overrun(&self) -> bool {
        self.overrun.load(Ordering::Acquire)
    }

    /// Resets the sticky overrun flag.
    pub fn clear_overrun(&self) {
        self.overrun.store(false, Ordering::Release);
    }

    /// Pooled envelopes currently queued and not yet released through this
    /// listener.
    pub fn refs(&self) -> u16 {
        self.refs.load(Ordering::Acquire)
    }

    /// Total successful deliveries.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub(crate) fn sink(&self) -> &Sink {
        &self.sink
    }

    pub(crate) fn is_queue(&self) -> bool {
        matches!(self.sink, Sink::Queue(_))
    }

    pub(crate) fn note_overrun(&self) {
        self.overrun.store(true, Ordering::Release);
    }

    pub(crate) fn note_delivery(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_ref(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn retract_ref(&self) {
        let previous = self.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "listener refcount underflow");
    }
}
