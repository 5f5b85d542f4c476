//! # topicbus
//!
//! **Topicbus** is a topic-filtered, in-process publish/subscribe event bus.
//!
//! Publishers emit events tagged with a small integer topic id; listeners
//! declare interest through a topic bitmask and receive events through one
//! of three delivery modes. The crate is designed for runtimes where many
//! independent tasks coordinate through typed events without sharing locks.
//!
//! ## Features
//!
//! | Area            | Description                                                            | Key types / functions                    |
//! |-----------------|------------------------------------------------------------------------|------------------------------------------|
//! | **Dispatch**    | One owner task serializes topology changes and publications.           | [`EventBus`]                             |
//! | **Listeners**   | Topic bitmask + one sink: callback, bounded queue, or one-shot wake.   | [`Listener`], [`TopicMask`]              |
//! | **Retention**   | Last retained event per topic, replayed to late subscribers.           | `publish(ev, true)`, `invalidate`        |
//! | **Pools**       | Fixed-block payload pools with refcounted release.                     | [`EventMessage`], [`PoolClass`]          |
//! | **Consumers**   | Worker adapter for queue-sink listeners with panic isolation.          | [`EventHandler`], [`spawn_handler`]      |
//! | **Diagnostics** | Listener table, per-topic latency, pool statistics.                    | `dump_listeners`, `pool_stats`           |
//!
//! ## Delivery modes
//! - **Callback** — invoked synchronously on the dispatcher task. Must not
//!   call back into the bus.
//! - **Queue** — bounded channel; a full queue drops that delivery and sets
//!   the listener's sticky overrun flag, the fan-out continues.
//! - **Wake** — signals a one-shot waiter; no envelope is handed over.
//!
//! ```no_run
//! use topicbus::{BusConfig, EventBus, EventMessage, Listener, TopicId};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), topicbus::BusError> {
//!     let bus = EventBus::new(BusConfig::default());
//!
//!     let (listener, mut rx) = Listener::queue("ui", 8);
//!     bus.attach(&listener).await?;
//!     bus.subscribe_one(&listener, TopicId::new(3)).await?;
//!
//!     // Retained: late subscribers on topic 3 will see this value too.
//!     let ev = EventMessage::with_payload(TopicId::new(3), 0, b"hello");
//!     bus.publish(&ev, true).await?;
//!
//!     let got = rx.recv().await.expect("delivery");
//!     assert_eq!(&got.payload()[..], b"hello");
//!
//!     bus.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ---

mod bus;
mod config;
mod error;
mod events;
mod listeners;
mod pools;
mod topic;

// ---- Public re-exports ----

pub use bus::EventBus;
pub use config::{BusConfig, PoolConfig};
pub use error::{AllocError, BusError, IntegrityError};
pub use events::{EventMessage, EventRef, PayloadRef, PUBLISHER_MAX};
pub use listeners::{spawn_handler, EventHandler, Listener};
pub use pools::{BlockPool, PoolClass, PoolInfo};
pub use topic::{TopicId, TopicMask, TOPIC_COUNT, TOPIC_WORDS};
