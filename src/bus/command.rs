//! # Commands carried on the dispatcher inbox.
//!
//! Every command carries the channel used to acknowledge completion back
//! to the caller, mirroring the blocking client calls. The publish command
//! makes the ack optional: the fire-and-forget path omits it.

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::events::EventRef;
use crate::listeners::Listener;
use crate::topic::TopicId;

/// Completion acknowledgement back to the caller.
pub(crate) type Ack = oneshot::Sender<()>;

pub(crate) enum Command {
    /// Append a listener to the registry.
    Attach { listener: Arc<Listener>, ack: Ack },
    /// Remove a listener from the registry.
    Detach { listener: Arc<Listener>, ack: Ack },
    /// Set one mask bit; replay the retained event if present.
    SubscribeOne {
        listener: Arc<Listener>,
        topic: TopicId,
        ack: Ack,
    },
    /// As `SubscribeOne`, per entry.
    SubscribeMany {
        listener: Arc<Listener>,
        topics: Vec<TopicId>,
        ack: Ack,
    },
    /// Clear one mask bit.
    UnsubscribeOne {
        listener: Arc<Listener>,
        topic: TopicId,
        ack: Ack,
    },
    /// Fan the event out to matching listeners; `ack` is `None` on the
    /// fire-and-forget path.
    Publish {
        event: EventRef,
        retain: bool,
        ack: Option<Ack>,
    },
    /// Clear the retained slot for the event's topic.
    Invalidate { event: EventRef, ack: Ack },
    /// Render the listener table.
    DumpListeners { reply: oneshot::Sender<String> },
    /// Render per-topic fan-out latency.
    TopicLatency { reply: oneshot::Sender<String> },
}

impl Command {
    /// Returns a short stable label for logs.
    pub(crate) fn as_label(&self) -> &'static str {
        match self {
            Command::Attach { .. } => "attach",
            Command::Detach { .. } => "detach",
            Command::SubscribeOne { .. } => "subscribe_one",
            Command::SubscribeMany { .. } => "subscribe_many",
            Command::UnsubscribeOne { .. } => "unsubscribe_one",
            Command::Publish { .. } => "publish",
            Command::Invalidate { .. } => "invalidate",
            Command::DumpListeners { .. } => "dump_listeners",
            Command::TopicLatency { .. } => "topic_latency",
        }
    }
}
