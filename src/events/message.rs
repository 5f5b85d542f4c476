//! # Event envelope.
//!
//! An [`EventMessage`] is either **caller-allocated** (payload inline,
//! lifetime managed by the shared handle, never returned to a pool) or
//! **pooled** (payload in a fixed-size block, consumer-refcounted, returned
//! to its pool on the last release).
//!
//! ## Rules
//! - Only caller-allocated envelopes may be retained; retention must never
//!   prolong a pool block's lifetime.
//! - The consumer refcount applies to pooled envelopes only; on
//!   caller-allocated envelopes release is a no-op and the count stays 0.
//! - `published` and `publish_time` are stamped by the dispatcher on the
//!   first/every publication respectively.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;

use crate::pools::{BlockGuard, PoolClass, PoolSet};
use crate::topic::TopicId;

/// Shared handle to an event envelope.
pub type EventRef = Arc<EventMessage>;

/// Highest publisher id: the field is 12 bits wide, 0 means unspecified.
pub const PUBLISHER_MAX: u16 = (1 << 12) - 1;

enum Payload {
    Inline(Box<[u8]>),
    Pooled {
        pools: Arc<PoolSet>,
        class: PoolClass,
        offset: usize,
        len: usize,
    },
}

/// Envelope carried by every publication.
pub struct EventMessage {
    topic: TopicId,
    publisher: u16,
    published: AtomicBool,
    publish_time: AtomicU32,
    refs: AtomicU16,
    payload: Payload,
}

impl fmt::Debug for EventMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventMessage")
            .field("topic", &self.topic)
            .field("publisher", &self.publisher)
            .field("published", &self.published.load(Ordering::Relaxed))
            .field("publish_time", &self.publish_time.load(Ordering::Relaxed))
            .field("refs", &self.refs.load(Ordering::Relaxed))
            .finish()
    }
}

impl EventMessage {
    /// Creates a caller-allocated envelope with the given payload.
    ///
    /// The bus never frees these: they may be published any number of
    /// times and are the only envelopes eligible for retention.
    ///
    /// ### Panics
    /// If `publisher` does not fit in 12 bits.
    pub fn with_payload(topic: TopicId, publisher: u16, payload: &[u8]) -> EventRef {
        assert!(publisher <= PUBLISHER_MAX, "publisher id must fit in 12 bits");
        Arc::new(Self {
            topic,
            publisher,
            published: AtomicBool::new(false),
            publish_time: AtomicU32::new(0),
            refs: AtomicU16::new(0),
            payload: Payload::Inline(payload.into()),
        })
    }

    /// Creates a caller-allocated envelope with an empty payload.
    pub fn signal(topic: TopicId) -> EventRef {
        Self::with_payload(topic, 0, &[])
    }

    pub(crate) fn new_pooled(
        topic: TopicId,
        publisher: u16,
        class: PoolClass,
        offset: usize,
        len: usize,
        pools: Arc<PoolSet>,
        initial_refs: u16,
    ) -> EventRef {
        assert!(publisher <= PUBLISHER_MAX, "publisher id must fit in 12 bits");
        Arc::new(Self {
            topic,
            publisher,
            published: AtomicBool::new(false),
            publish_time: AtomicU32::new(0),
            refs: AtomicU16::new(initial_refs),
            payload: Payload::Pooled {
                pools,
                class,
                offset,
                len,
            },
        })
    }

    /// Topic this envelope publishes on.
    pub fn topic(&self) -> TopicId {
        self.topic
    }

    /// Publisher id (12-bit, 0 = unspecified).
    pub fn publisher(&self) -> u16 {
        self.publisher
    }

    /// Size class of the owning pool, or `None` for caller-allocated
    /// envelopes.
    pub fn pool_class(&self) -> Option<PoolClass> {
        match &self.payload {
            Payload::Inline(_) => None,
            Payload::Pooled { class, .. } => Some(*class),
        }
    }

    /// True once the dispatcher has published this envelope.
    pub fn published(&self) -> bool {
        self.published.load(Ordering::Acquire)
    }

    /// Milliseconds since bus start at the most recent publication.
    pub fn publish_time(&self) -> u32 {
        self.publish_time.load(Ordering::Relaxed)
    }

    /// Outstanding consumer references (pooled envelopes only).
    pub fn refs(&self) -> u16 {
        self.refs.load(Ordering::Acquire)
    }

    /// Borrows the payload bytes.
    ///
    /// For pooled envelopes the returned guard holds the owning pool's
    /// lock; drop it before releasing the envelope.
    pub fn payload(&self) -> PayloadRef<'_> {
        match &self.payload {
            Payload::Inline(bytes) => PayloadRef(Repr::Inline(bytes)),
            Payload::Pooled {
                pools,
                class,
                offset,
                len,
            } => PayloadRef(Repr::Pooled(pools.read_block(*class, *offset, *len))),
        }
    }

    pub(crate) fn pooled_block(&self) -> Option<(PoolClass, usize)> {
        match &self.payload {
            Payload::Inline(_) => None,
            Payload::Pooled { class, offset, .. } => Some((*class, *offset)),
        }
    }

    pub(crate) fn mark_published(&self, now_ms: u32) {
        self.publish_time.store(now_ms, Ordering::Relaxed);
        self.published.store(true, Ordering::Release);
    }

    pub(crate) fn acquire_ref(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drops one reference and returns the previous count. Freeing on zero
    /// is the caller's job (`PoolSet::release`); the rollback paths call
    /// this directly and must not free.
    pub(crate) fn release_ref(&self) -> u16 {
        self.refs.fetch_sub(1, Ordering::AcqRel)
    }
}

enum Repr<'a> {
    Inline(&'a [u8]),
    Pooled(BlockGuard<'a>),
}

/// Borrowed view of an envelope's payload bytes.
///
/// Dereferences to `&[u8]`. For pooled envelopes this holds the owning
/// pool's lock for its lifetime.
pub struct PayloadRef<'a>(Repr<'a>);

impl Deref for PayloadRef<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.0 {
            Repr::Inline(bytes) => bytes,
            Repr::Pooled(guard) => guard,
        }
    }
}
