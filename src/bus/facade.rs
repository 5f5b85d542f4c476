//! # EventBus: the client façade.
//!
//! [`EventBus`] owns the dispatcher task, its command inbox, and the three
//! payload pools. It is the whole public surface: topology changes,
//! publication, pooled allocation, one-shot waits, and introspection.
//!
//! ## Rules
//! - Topology and blocking publish calls enqueue a command and await the
//!   dispatcher's acknowledgement; commands from one task are processed in
//!   the order they were pushed, cross-task ordering is the inbox FIFO.
//! - [`EventBus::try_publish`] never blocks and never awaits: it is the
//!   path for contexts that must not suspend (the ISR analogue). A full
//!   inbox is reported to the caller instead of waited out.
//! - One bus instance is one isolated world: registry, retained cache, and
//!   pools are per-instance, so tests can run several buses side by side.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::bus::dispatcher::Dispatcher;
use crate::bus::{Ack, Command};
use crate::config::BusConfig;
use crate::error::{AllocError, BusError, IntegrityError};
use crate::events::EventRef;
use crate::listeners::{Listener, Sink};
use crate::pools::{PoolClass, PoolInfo, PoolSet};
use crate::topic::TopicId;

/// A topic-filtered publish/subscribe bus.
///
/// Created with [`EventBus::new`] inside a Tokio runtime; the dispatcher
/// task lives until [`EventBus::shutdown`] or until the bus is dropped and
/// the inbox drains.
pub struct EventBus {
    commands: mpsc::Sender<Command>,
    pools: Arc<PoolSet>,
    token: CancellationToken,
    dispatcher: JoinHandle<()>,
}

impl EventBus {
    /// Creates the pools, the inbox, and spawns the dispatcher task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: BusConfig) -> Self {
        let pools = PoolSet::new(&config);
        let (commands, inbox) = mpsc::channel(config.inbox_depth.max(1));
        let token = CancellationToken::new();
        let dispatcher = tokio::spawn(Dispatcher::new(inbox, Arc::clone(&pools)).run(token.clone()));
        Self {
            commands,
            pools,
            token,
            dispatcher,
        }
    }

    // ---- Topology -------------------------------------------------------

    /// Appends `listener` to the registry.
    ///
    /// Listeners attached earlier receive every publication strictly
    /// before listeners attached later.
    pub async fn attach(&self, listener: &Arc<Listener>) -> Result<(), BusError> {
        let listener = Arc::clone(listener);
        self.acked(|ack| Command::Attach { listener, ack }).await
    }

    /// Removes `listener` from the registry. After the returned future
    /// resolves, no further publication is delivered to it.
    pub async fn detach(&self, listener: &Arc<Listener>) -> Result<(), BusError> {
        let listener = Arc::clone(listener);
        self.acked(|ack| Command::Detach { listener, ack }).await
    }

    /// Sets one topic bit. If the topic has a retained event it is
    /// replayed to `listener` before this call resolves.
    pub async fn subscribe_one(
        &self,
        listener: &Arc<Listener>,
        topic: TopicId,
    ) -> Result<(), BusError> {
        let listener = Arc::clone(listener);
        self.acked(|ack| Command::SubscribeOne { listener, topic, ack })
            .await
    }

    /// As [`subscribe_one`](Self::subscribe_one), once per entry.
    pub async fn subscribe_many(
        &self,
        listener: &Arc<Listener>,
        topics: &[TopicId],
    ) -> Result<(), BusError> {
        let listener = Arc::clone(listener);
        let topics = topics.to_vec();
        self.acked(|ack| Command::SubscribeMany { listener, topics, ack })
            .await
    }

    /// Clears one topic bit.
    pub async fn unsubscribe_one(
        &self,
        listener: &Arc<Listener>,
        topic: TopicId,
    ) -> Result<(), BusError> {
        let listener = Arc::clone(listener);
        self.acked(|ack| Command::UnsubscribeOne { listener, topic, ack })
            .await
    }

    // ---- Publication ----------------------------------------------------

    /// Publishes `event`, blocking while the inbox is full, and resolves
    /// once the dispatcher has completed the fan-out.
    ///
    /// With `retain` the event replaces the topic's retained slot and is
    /// replayed to late subscribers; without it any retained event on the
    /// topic is dropped.
    ///
    /// ### Panics
    /// If `retain` is set on a pooled envelope.
    pub async fn publish(&self, event: &EventRef, retain: bool) -> Result<(), BusError> {
        Self::check_retain(event, retain);
        let event = Arc::clone(event);
        self.acked(|ack| Command::Publish {
            event,
            retain,
            ack: Some(ack),
        })
        .await
    }

    /// Fire-and-forget publish for contexts that must not suspend.
    ///
    /// Never blocks: a full inbox is returned as
    /// [`BusError::InboxFull`] and the caller decides recovery. No
    /// acknowledgement is delivered.
    pub fn try_publish(&self, event: &EventRef, retain: bool) -> Result<(), BusError> {
        Self::check_retain(event, retain);
        self.commands
            .try_send(Command::Publish {
                event: Arc::clone(event),
                retain,
                ack: None,
            })
            .map_err(|err| match err {
                TrySendError::Full(_) => BusError::InboxFull,
                TrySendError::Closed(_) => BusError::Closed,
            })
    }

    /// Delivers `event` straight into one listener's queue, bypassing the
    /// dispatcher, with refcount bookkeeping. Waits up to `timeout` for
    /// queue space; returns whether the push succeeded.
    ///
    /// On failure the delivery reference is released again. For an
    /// envelope with no publisher-held reference
    /// ([`event_alloc`](Self::event_alloc)) that reclaims the block, like
    /// a zero-consumer publish; allocate with
    /// [`thread_event_alloc`](Self::thread_event_alloc) to keep the
    /// envelope alive for a retry.
    ///
    /// ### Panics
    /// If `listener` does not have a queue sink.
    pub async fn publish_to_listener(
        &self,
        listener: &Arc<Listener>,
        event: &EventRef,
        timeout: Duration,
    ) -> bool {
        let Sink::Queue(queue) = listener.sink() else {
            panic!(
                "publish_to_listener requires a queue sink (listener '{}')",
                listener.name()
            );
        };

        let pooled = event.pool_class().is_some();
        if pooled {
            event.acquire_ref();
            listener.add_ref();
        }
        match queue.send_timeout(Arc::clone(event), timeout).await {
            Ok(()) => {
                listener.note_delivery();
                true
            }
            Err(_) => {
                if pooled {
                    listener.retract_ref();
                    // The undo goes through the allocator: with no
                    // publisher-held reference left the block is
                    // reclaimed, as on a zero-consumer publish.
                    self.pools.release(event, None);
                }
                listener.note_overrun();
                log::warn!(
                    "direct delivery to '{}' failed on topic {}",
                    listener.name(),
                    event.topic()
                );
                false
            }
        }
    }

    /// Clears the retained slot for the event's topic. Idempotent.
    pub async fn invalidate(&self, event: &EventRef) -> Result<(), BusError> {
        let event = Arc::clone(event);
        self.acked(|ack| Command::Invalidate { event, ack }).await
    }

    // ---- Pooled allocation ----------------------------------------------

    /// Allocates a pooled envelope with the consumer refcount at zero: if
    /// no subscriber picks it up during fan-out, the block returns to its
    /// pool immediately after publication.
    ///
    /// ### Panics
    /// If the payload exceeds the largest pool block.
    pub fn event_alloc(
        &self,
        payload: &[u8],
        topic: TopicId,
        publisher: u16,
    ) -> Result<EventRef, AllocError> {
        self.pools.alloc(payload, topic, publisher, 0)
    }

    /// As [`event_alloc`](Self::event_alloc), but the allocating task
    /// keeps one reference, so the envelope survives a zero-subscriber
    /// fan-out until the publisher releases it explicitly.
    pub fn thread_event_alloc(
        &self,
        payload: &[u8],
        topic: TopicId,
        publisher: u16,
    ) -> Result<EventRef, AllocError> {
        self.pools.alloc(payload, topic, publisher, 1)
    }

    /// Drops one consumer reference; the block returns to its pool when
    /// the count reaches zero. `from` names the queue-sink listener the
    /// reference was held through (`None` for the publisher-release path).
    /// No-op on caller-allocated envelopes.
    ///
    /// ### Panics
    /// On double release, or when `from` is not a queue-sink listener.
    pub fn event_release(&self, event: &EventRef, from: Option<&Arc<Listener>>) {
        self.pools.release(event, from.map(Arc::as_ref));
    }

    // ---- Waiting --------------------------------------------------------

    /// Blocks until one event is published on `topic`, or until `timeout`.
    ///
    /// Attaches a transient wake-sink listener, subscribes it, waits on
    /// its notification, and detaches. A delivery that lands between
    /// wake-up and detach is drained so the stored permit cannot leak
    /// into an unrelated waiter.
    pub async fn wait_for(&self, topic: TopicId, timeout: Duration) -> Result<(), BusError> {
        let notify = Arc::new(Notify::new());
        let waiter = Listener::wake("wait-for", Arc::clone(&notify));

        self.attach(&waiter).await?;
        self.subscribe_one(&waiter, topic).await?;
        let woken = time::timeout(timeout, notify.notified()).await.is_ok();
        self.detach(&waiter).await?;
        let late = notify.notified().now_or_never().is_some();

        if woken || late {
            Ok(())
        } else {
            Err(BusError::WaitTimeout { timeout })
        }
    }

    // ---- Introspection --------------------------------------------------

    /// Renders the listener table (name, sink, mask, counters).
    pub async fn dump_listeners(&self) -> Result<String, BusError> {
        self.query(|reply| Command::DumpListeners { reply }).await
    }

    /// Renders per-topic min/max fan-out latency.
    pub async fn topic_latency(&self) -> Result<String, BusError> {
        self.query(|reply| Command::TopicLatency { reply }).await
    }

    /// Renders one diagnostic line per pool.
    pub fn pool_stats(&self) -> String {
        self.pools.stats()
    }

    /// Runs the integrity check of one pool and returns its counters.
    pub fn pool_info(&self, class: PoolClass) -> Result<PoolInfo, IntegrityError> {
        self.pools.info(class)
    }

    // ---- Lifecycle ------------------------------------------------------

    /// Stops the dispatcher and awaits its exit. Commands still queued in
    /// the inbox are dropped; their callers observe [`BusError::Closed`].
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.dispatcher.await;
    }

    pub(crate) fn pools(&self) -> &Arc<PoolSet> {
        &self.pools
    }

    fn check_retain(event: &EventRef, retain: bool) {
        assert!(
            !retain || event.pool_class().is_none(),
            "retained events must be caller-allocated"
        );
    }

    async fn acked(&self, build: impl FnOnce(Ack) -> Command) -> Result<(), BusError> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(build(ack))
            .await
            .map_err(|_| BusError::Closed)?;
        done.await.map_err(|_| BusError::Closed)
    }

    async fn query(
        &self,
        build: impl FnOnce(oneshot::Sender<String>) -> Command,
    ) -> Result<String, BusError> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| BusError::Closed)?;
        answer.await.map_err(|_| BusError::Closed)
    }
}
