//! # Dispatcher: the single owner of registry, retained cache, and fan-out.
//!
//! One task drains the command inbox and performs every mutation of the
//! listener registry, the subscription masks, and the retained cache.
//! Message passing to this single owner replaces locks on those
//! structures and gives the bus a total order over topology changes and
//! publications.
//!
//! ## Fan-out
//! ```text
//! Publish(event, retain)
//!   ├─► stamp publish time, set published flag
//!   ├─► retain ? store in retained[topic] : clear retained[topic]
//!   ├─► walk registry in insertion order
//!   │     ├─► mask bit clear → skip
//!   │     └─► deliver per sink (callback / queue try_send / wake)
//!   └─► pooled & nobody queued it → block returns to its pool
//! ```
//!
//! ## Rules
//! - Listeners attached earlier receive a publication strictly before
//!   listeners attached later; there is no cross-publication ordering
//!   beyond the inbox FIFO.
//! - A full queue drops that one delivery, sets the listener's sticky
//!   overrun flag, and the walk continues (partial-failure fan-out).
//! - Callbacks run on the dispatcher task; a panicking callback is caught
//!   and logged, a callback that re-enters the bus deadlocks its own
//!   inbox.
//! - Retained envelopes must be caller-allocated; retention never prolongs
//!   a pool block's lifetime.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::bus::Command;
use crate::events::{EventRef, RetainedCache};
use crate::listeners::{Listener, Sink};
use crate::pools::PoolSet;
use crate::topic::{TopicId, TOPIC_COUNT};

/// Per-topic fan-out latency aggregate.
#[derive(Clone, Copy)]
struct LatencySlot {
    count: u64,
    min: Duration,
    max: Duration,
}

pub(crate) struct Dispatcher {
    inbox: mpsc::Receiver<Command>,
    pools: Arc<PoolSet>,
    /// Insertion-ordered listener registry. Attach appends, detach scans;
    /// the dispatcher is the only writer.
    registry: Vec<Arc<Listener>>,
    retained: RetainedCache,
    latency: Vec<Option<LatencySlot>>,
    epoch: Instant,
}

impl Dispatcher {
    pub(crate) fn new(inbox: mpsc::Receiver<Command>, pools: Arc<PoolSet>) -> Self {
        Self {
            inbox,
            pools,
            registry: Vec::new(),
            retained: RetainedCache::new(),
            latency: vec![None; TOPIC_COUNT],
            epoch: Instant::now(),
        }
    }

    /// Serves commands until cancellation or until every client handle is
    /// dropped.
    pub(crate) async fn run(mut self, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                command = self.inbox.recv() => match command {
                    Some(command) => self.serve(command),
                    None => break,
                }
            }
        }
        log::debug!("dispatcher stopped");
    }

    fn serve(&mut self, command: Command) {
        log::trace!("serving {}", command.as_label());
        match command {
            Command::Attach { listener, ack } => {
                self.attach(listener);
                let _ = ack.send(());
            }
            Command::Detach { listener, ack } => {
                self.detach(&listener);
                let _ = ack.send(());
            }
            Command::SubscribeOne { listener, topic, ack } => {
                self.subscribe(&listener, topic);
                let _ = ack.send(());
            }
            Command::SubscribeMany { listener, topics, ack } => {
                for topic in topics {
                    self.subscribe(&listener, topic);
                }
                let _ = ack.send(());
            }
            Command::UnsubscribeOne { listener, topic, ack } => {
                listener.mask().clear(topic);
                let _ = ack.send(());
            }
            Command::Publish { event, retain, ack } => {
                self.publish(event, retain);
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            Command::Invalidate { event, ack } => {
                self.retained.clear(event.topic());
                let _ = ack.send(());
            }
            Command::DumpListeners { reply } => {
                let _ = reply.send(self.render_listeners());
            }
            Command::TopicLatency { reply } => {
                let _ = reply.send(self.render_latency());
            }
        }
    }

    fn attach(&mut self, listener: Arc<Listener>) {
        assert!(
            !self.registry.iter().any(|l| Arc::ptr_eq(l, &listener)),
            "listener '{}' is already attached",
            listener.name()
        );
        log::debug!("attach listener '{}'", listener.name());
        self.registry.push(listener);
    }

    fn detach(&mut self, listener: &Arc<Listener>) {
        match self.registry.iter().position(|l| Arc::ptr_eq(l, listener)) {
            Some(index) => {
                self.registry.remove(index);
                log::debug!("detach listener '{}'", listener.name());
            }
            None => log::warn!("detach of unattached listener '{}'", listener.name()),
        }
    }

    fn subscribe(&mut self, listener: &Arc<Listener>, topic: TopicId) {
        listener.mask().set(topic);
        // Late-join replay: the subscriber sees the last retained value
        // for this topic before any further publication on it.
        if let Some(retained) = self.retained.get(topic) {
            Self::deliver(listener, retained);
        }
    }

    fn publish(&mut self, event: EventRef, retain: bool) {
        let walk_started = Instant::now();
        event.mark_published(self.now_ms());

        if retain {
            assert!(
                event.pool_class().is_none(),
                "retained events must be caller-allocated"
            );
            self.retained.store(event.clone());
        } else {
            self.retained.clear(event.topic());
        }

        let pooled = event.pool_class().is_some();
        if pooled {
            // Fan-out holds one reference: a consumer scheduled on another
            // worker cannot reclaim the block while the walk is in progress.
            event.acquire_ref();
        }

        for listener in &self.registry {
            if listener.mask().contains(event.topic()) {
                Self::deliver(listener, &event);
            }
        }

        if pooled {
            // Drops the fan-out reference; when no queue accepted the
            // event this is the last one and the block returns to its pool.
            self.pools.release(&event, None);
        }

        self.record(event.topic(), walk_started.elapsed());
    }

    fn deliver(listener: &Arc<Listener>, event: &EventRef) {
        match listener.sink() {
            Sink::Callback(callback) => {
                if panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                    log::error!("callback listener '{}' panicked", listener.name());
                } else {
                    listener.note_delivery();
                }
            }
            Sink::Queue(queue) => {
                let pooled = event.pool_class().is_some();
                if pooled {
                    // Counts are bumped before the push: the consumer may
                    // run on another worker and release immediately after
                    // recv.
                    event.acquire_ref();
                    listener.add_ref();
                }
                match queue.try_send(event.clone()) {
                    Ok(()) => listener.note_delivery(),
                    Err(err) => {
                        if pooled {
                            event.release_ref();
                            listener.retract_ref();
                        }
                        listener.note_overrun();
                        let reason = match err {
                            TrySendError::Full(_) => "queue full",
                            TrySendError::Closed(_) => "receiver closed",
                        };
                        log::warn!(
                            "listener '{}' dropped event on topic {}: {reason}",
                            listener.name(),
                            event.topic()
                        );
                    }
                }
            }
            Sink::Wake(notify) => {
                notify.notify_one();
                listener.note_delivery();
            }
        }
    }

    fn record(&mut self, topic: TopicId, elapsed: Duration) {
        let slot = self.latency[topic.index()].get_or_insert(LatencySlot {
            count: 0,
            min: elapsed,
            max: elapsed,
        });
        slot.count += 1;
        slot.min = slot.min.min(elapsed);
        slot.max = slot.max.max(elapsed);
    }

    fn now_ms(&self) -> u32 {
        self.epoch.elapsed().as_millis() as u32
    }

    fn render_listeners(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(out, "{} listener(s)", self.registry.len());
        for listener in &self.registry {
            let _ = writeln!(
                out,
                "  '{}' sink={} mask={} delivered={} refs={} overrun={}",
                listener.name(),
                listener.sink().kind(),
                listener.mask().render(),
                listener.delivered(),
                listener.refs(),
                listener.overrun(),
            );
        }
        out
    }

    fn render_latency(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        for (index, slot) in self.latency.iter().enumerate() {
            if let Some(slot) = slot {
                let _ = writeln!(
                    out,
                    "topic {index}: count={} min={:?} max={:?}",
                    slot.count, slot.min, slot.max
                );
            }
        }
        if out.is_empty() {
            out.push_str("no publications\n");
        }
        out
    }
}
