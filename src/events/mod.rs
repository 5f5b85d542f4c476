//! # Event envelopes and the retained-event cache.
//!
//! [`EventMessage`] is the envelope every publication carries: topic,
//! optional publisher id, payload, and the bookkeeping the bus needs
//! (publish stamp, consumer refcount, owning pool). Envelopes travel as
//! [`EventRef`] — a cheaply clonable shared handle.
//!
//! [`RetainedCache`] keeps the most recent retained envelope per topic for
//! late-join replay.

mod message;
mod retained;

pub use message::{EventMessage, EventRef, PayloadRef, PUBLISHER_MAX};

pub(crate) use retained::RetainedCache;
