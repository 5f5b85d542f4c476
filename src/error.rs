//! # Error types used by the bus runtime.
//!
//! Three enums cover the recoverable failures:
//!
//! - [`BusError`] — failures of bus operations (full inbox, shut-down bus,
//!   wait timeout).
//! - [`AllocError`] — pooled allocation failures.
//! - [`IntegrityError`] — pool self-check failures.
//!
//! Contract violations (topic out of range, retained pooled envelope,
//! double release, oversized payload, direct publish to a non-queue sink)
//! are not represented here: they panic, because continuing past them risks
//! silent refcount leaks and pool corruption.
//!
//! All types provide `as_label` helpers for logs and metrics.

use std::time::Duration;

use thiserror::Error;

/// # Errors produced by bus operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BusError {
    /// The dispatcher inbox was full on the fire-and-forget publish path.
    #[error("dispatcher inbox is full")]
    InboxFull,

    /// The bus has been shut down; the dispatcher no longer serves commands.
    #[error("bus is shut down")]
    Closed,

    /// No matching event arrived within the wait window.
    #[error("no event arrived within {timeout:?}")]
    WaitTimeout {
        /// The configured wait window.
        timeout: Duration,
    },
}

impl BusError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            BusError::InboxFull => "bus_inbox_full",
            BusError::Closed => "bus_closed",
            BusError::WaitTimeout { .. } => "bus_wait_timeout",
        }
    }
}

/// # Errors produced by pooled event allocation.
///
/// Oversized payloads (larger than the largest pool block) are a contract
/// violation and panic instead; this enum covers the recoverable case of a
/// transiently exhausted pool.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum AllocError {
    /// Every pool whose blocks could hold the payload is out of free blocks.
    #[error("no free block of at least {size} bytes")]
    Exhausted {
        /// Requested payload size in bytes.
        size: usize,
    },
}

impl AllocError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            AllocError::Exhausted { .. } => "alloc_exhausted",
        }
    }
}

/// # Pool self-check failures reported by `integrity()`.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum IntegrityError {
    /// A free-list link points outside the pool's byte span.
    #[error("free-list link at offset {offset} escapes the pool")]
    LinkOutOfBounds {
        /// Offset stored in the offending link.
        offset: usize,
    },

    /// Block accounting does not add up:
    /// `block_count - in_use != free_listed + never_allocated`.
    #[error("block accounting mismatch: expected {expected} free, found {found}")]
    CountMismatch {
        /// Free blocks implied by the in-use counter.
        expected: usize,
        /// Free blocks actually found (list walk + unlinked prefix).
        found: usize,
    },
}
