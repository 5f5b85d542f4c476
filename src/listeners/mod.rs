//! # Listeners: registered consumers with one delivery sink each.
//!
//! A [`Listener`] pairs a topic bitmask with exactly one delivery sink:
//!
//! - **Callback** — invoked synchronously on the dispatcher task;
//! - **Queue** — bounded channel, non-blocking push, drop-on-full with a
//!   sticky overrun flag;
//! - **Wake** — a notification permit for one-shot waiters, no envelope
//!   handed over.
//!
//! [`EventHandler`] and [`spawn_handler`] wrap a queue-sink listener in a
//! dedicated worker task that isolates panics and releases pooled
//! envelopes after processing.

mod handler;
mod listener;

pub use handler::{spawn_handler, EventHandler};
pub use listener::Listener;

pub(crate) use listener::Sink;
