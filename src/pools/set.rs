//! # Allocator façade over the three size-class pools.
//!
//! [`PoolSet`] owns one [`BlockPool`] per size class and implements the
//! reference-counted envelope lifecycle:
//!
//! - `alloc` picks the smallest class whose blocks can hold the payload,
//!   copies the payload in, and wraps the block in an
//!   [`EventMessage`](crate::EventMessage);
//! - `release` drops one consumer reference and returns the block to its
//!   owning pool when the count reaches zero.
//!
//! ## Rules
//! - Each pool is guarded by its own mutex; this is the critical section
//!   around alloc/free, reachable from publishers, consumers, and the
//!   dispatcher alike.
//! - A payload larger than the largest block is a contract violation and
//!   panics; a transiently exhausted pool is an [`AllocError`].
//! - Releasing a caller-allocated envelope is a no-op.

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{AllocError, IntegrityError};
use crate::events::{EventMessage, EventRef};
use crate::listeners::Listener;
use crate::pools::block::{BlockPool, PoolInfo};
use crate::topic::TopicId;
use crate::BusConfig;

/// Size class of a pooled envelope.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PoolClass {
    Small = 0,
    Medium = 1,
    Large = 2,
}

impl PoolClass {
    pub(crate) const ALL: [PoolClass; 3] = [PoolClass::Small, PoolClass::Medium, PoolClass::Large];

    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            PoolClass::Small => "small",
            PoolClass::Medium => "medium",
            PoolClass::Large => "large",
        }
    }
}

impl fmt::Display for PoolClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// The three size-class pools plus the refcounted release protocol.
pub(crate) struct PoolSet {
    pools: [Mutex<BlockPool>; 3],
    sizes: [usize; 3],
}

impl PoolSet {
    pub(crate) fn new(config: &BusConfig) -> Arc<Self> {
        Arc::new(Self {
            pools: [
                Mutex::new(BlockPool::new(&config.small)),
                Mutex::new(BlockPool::new(&config.medium)),
                Mutex::new(BlockPool::new(&config.large)),
            ],
            sizes: [
                config.small.block_size,
                config.medium.block_size,
                config.large.block_size,
            ],
        })
    }

    /// Allocates a pooled envelope with `initial_refs` consumer references.
    ///
    /// Classes are tried smallest-first; a class whose blocks are too small
    /// is skipped, an exhausted class falls through to the next larger one.
    ///
    /// ### Panics
    /// If the payload exceeds the largest block size.
    pub(crate) fn alloc(
        self: &Arc<Self>,
        payload: &[u8],
        topic: TopicId,
        publisher: u16,
        initial_refs: u16,
    ) -> Result<EventRef, AllocError> {
        let size = payload.len();
        assert!(
            size <= self.sizes[PoolClass::Large as usize],
            "payload of {size} bytes exceeds the largest pool block ({})",
            self.sizes[PoolClass::Large as usize]
        );

        for class in PoolClass::ALL {
            if self.sizes[class as usize] < size {
                continue;
            }
            let mut pool = self.lock(class);
            if let Some(offset) = pool.alloc() {
                pool.write(offset, payload);
                drop(pool);
                log::trace!("allocated {class} block at {offset} for topic {topic}");
                return Ok(EventMessage::new_pooled(
                    topic,
                    publisher,
                    class,
                    offset,
                    size,
                    Arc::clone(self),
                    initial_refs,
                ));
            }
        }

        log::warn!("event allocation failed: no free block of {size} bytes");
        Err(AllocError::Exhausted { size })
    }

    /// Drops one consumer reference from `event`.
    ///
    /// `from` names the queue-sink listener whose pending count the
    /// reference was held against; `None` is the publisher/dispatcher
    /// release path. The block returns to its pool when the last reference
    /// is dropped. A caller-allocated envelope is a no-op.
    ///
    /// ### Panics
    /// If the envelope has no outstanding references (double release), or
    /// `from` is not a queue-sink listener.
    pub(crate) fn release(&self, event: &EventMessage, from: Option<&Listener>) {
        let Some((class, offset)) = event.pooled_block() else {
            return;
        };
        if let Some(listener) = from {
            assert!(
                listener.is_queue(),
                "release through listener '{}' requires a queue sink",
                listener.name()
            );
            listener.retract_ref();
        }
        let previous = event.release_ref();
        assert!(previous > 0, "release of an envelope with no outstanding references");
        if previous == 1 {
            self.lock(class).free(offset);
            log::trace!("returned {class} block at {offset}");
        }
    }

    /// Borrows the payload bytes of an allocated block. The guard holds the
    /// owning pool's lock.
    pub(crate) fn read_block(&self, class: PoolClass, offset: usize, len: usize) -> BlockGuard<'_> {
        BlockGuard {
            guard: self.lock(class),
            offset,
            len,
        }
    }

    /// Runs the integrity check of one pool.
    pub(crate) fn info(&self, class: PoolClass) -> Result<PoolInfo, IntegrityError> {
        self.lock(class).integrity()
    }

    /// Formats a diagnostic line per pool.
    pub(crate) fn stats(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        for class in PoolClass::ALL {
            match self.info(class) {
                Ok(info) => {
                    let _ = writeln!(
                        out,
                        "pool {class}: block_size={} blocks={} in_use={} high_water={} free={}",
                        self.sizes[class as usize],
                        info.blocks,
                        info.in_use,
                        info.high_water,
                        info.free_listed + info.never_allocated,
                    );
                }
                Err(err) => {
                    let _ = writeln!(out, "pool {class}: CORRUPT ({err})");
                }
            }
        }
        out
    }

    fn lock(&self, class: PoolClass) -> MutexGuard<'_, BlockPool> {
        self.pools[class as usize]
            .lock()
            .expect("pool lock poisoned")
    }
}

/// Shared borrow of one allocated block's payload bytes.
///
/// Holds the owning pool's lock for its lifetime; drop it before calling
/// any allocation or release function on the same bus.
pub(crate) struct BlockGuard<'a> {
    guard: MutexGuard<'a, BlockPool>,
    offset: usize,
    len: usize,
}

impl Deref for BlockGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.guard.read(self.offset, self.len)
    }
}
