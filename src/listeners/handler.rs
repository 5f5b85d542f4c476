//! # Consumer worker for queue-sink listeners.
//!
//! [`spawn_handler`] pairs a queue-sink listener with an [`EventHandler`]
//! and runs a dedicated worker task:
//!
//! ```text
//! dispatcher ──► [bounded queue] ──► worker ──► handler.on_event()
//!                                       └─────► release pooled envelope
//! ```
//!
//! ## Rules
//! - Panics inside the handler are caught and logged; the worker keeps
//!   draining (isolation).
//! - Pooled envelopes are released after `on_event` returns, whether it
//!   panicked or not, so the refcount bookkeeping cannot leak.
//! - The worker holds only a weak handle to the listener. The listener
//!   owns the queue's sender, so once the last strong handle is dropped
//!   (detach, then the caller's own `Arc`) the queue closes and the worker
//!   drains the remainder and exits.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bus::EventBus;
use crate::events::EventRef;
use crate::listeners::Listener;

/// Processes events delivered to a queue-sink listener.
///
/// ### Rules
/// - `on_event` runs on the worker task, never on the dispatcher.
/// - Events arrive in queue (FIFO) order.
/// - Do not release the envelope inside `on_event`; the worker does that
///   after it returns.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Processes one event.
    async fn on_event(&self, event: &EventRef);

    /// Returns the handler name for logging.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Spawns a worker draining `receiver` into `handler`.
///
/// The worker keeps no strong handle to `listener`: dropping every other
/// `Arc<Listener>` (typically after detach) closes the queue and lets the
/// worker finish once the backlog is drained.
///
/// ### Panics
/// If `listener` does not have a queue sink.
pub fn spawn_handler(
    bus: &EventBus,
    listener: Arc<Listener>,
    mut receiver: mpsc::Receiver<EventRef>,
    handler: Arc<dyn EventHandler>,
) -> JoinHandle<()> {
    assert!(
        listener.is_queue(),
        "spawn_handler requires a queue-sink listener (got '{}')",
        listener.name()
    );
    let pools = Arc::clone(bus.pools());
    let listener: Weak<Listener> = Arc::downgrade(&listener);

    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            let work = handler.on_event(&event);
            if let Err(panic) = std::panic::AssertUnwindSafe(work).catch_unwind().await {
                log::error!("handler '{}' panicked: {:?}", handler.name(), panic);
            }
            // The listener may already be gone while its queue still holds
            // events; the envelope reference must be dropped either way.
            pools.release(&event, listener.upgrade().as_deref());
        }
    })
}
