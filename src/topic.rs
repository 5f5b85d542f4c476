//! # Topic ids and subscription bitmasks.
//!
//! Topics are small integers in `[0, TOPIC_COUNT)` and form the filtering
//! axis of the bus: every publication carries one topic, every listener
//! carries a [`TopicMask`] with one bit per topic.
//!
//! ## Rules
//! - [`TOPIC_COUNT`] is a compile-time constant and a multiple of 32; it
//!   fixes the number of mask words.
//! - Constructing a [`TopicId`] outside the valid range is a contract
//!   violation and panics.
//! - Mask bits are mutated only by the dispatcher task; the atomic words
//!   exist because the listener record itself is shared across tasks.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Number of distinct topics the bus can route. Must be a multiple of 32.
pub const TOPIC_COUNT: usize = 128;

/// Number of 32-bit words in a subscription mask.
pub const TOPIC_WORDS: usize = TOPIC_COUNT / 32;

const _: () = assert!(TOPIC_COUNT % 32 == 0, "TOPIC_COUNT must be a multiple of 32");
const _: () = assert!(TOPIC_COUNT <= u16::MAX as usize);

/// Identifier of one topic, validated on construction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TopicId(u16);

impl TopicId {
    /// Creates a topic id.
    ///
    /// ### Panics
    /// If `id >= TOPIC_COUNT`.
    pub fn new(id: usize) -> Self {
        assert!(id < TOPIC_COUNT, "topic id {id} out of range (max {})", TOPIC_COUNT - 1);
        Self(id as u16)
    }

    /// Returns the numeric index in `[0, TOPIC_COUNT)`.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn word(self) -> usize {
        self.index() / 32
    }

    pub(crate) fn bit(self) -> u32 {
        1 << (self.index() % 32)
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-listener subscription bitmask, one bit per topic.
///
/// Writes go through the dispatcher only; reads may happen from any task
/// holding the listener, so the words are atomic. Relaxed ordering is
/// sufficient under the single-writer rule: every subscription change is
/// acknowledged over a channel before the caller proceeds.
pub struct TopicMask {
    words: [AtomicU32; TOPIC_WORDS],
}

impl TopicMask {
    /// Creates a mask with no topics set.
    pub fn empty() -> Self {
        Self {
            words: std::array::from_fn(|_| AtomicU32::new(0)),
        }
    }

    pub(crate) fn set(&self, topic: TopicId) {
        self.words[topic.word()].fetch_or(topic.bit(), Ordering::Relaxed);
    }

    pub(crate) fn clear(&self, topic: TopicId) {
        self.words[topic.word()].fetch_and(!topic.bit(), Ordering::Relaxed);
    }

    /// Returns true if the topic bit is set.
    pub fn contains(&self, topic: TopicId) -> bool {
        self.words[topic.word()].load(Ordering::Relaxed) & topic.bit() != 0
    }

    /// Returns true if no topic bit is set.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| w.load(Ordering::Relaxed) == 0)
    }

    /// Formats the mask as underscore-separated hex words, highest word first.
    pub(crate) fn render(&self) -> String {
        let mut out = String::with_capacity(TOPIC_WORDS * 9);
        for w in self.words.iter().rev() {
            if !out.is_empty() {
                out.push('_');
            }
            out.push_str(&format!("{:08x}", w.load(Ordering::Relaxed)));
        }
        out
    }
}

impl fmt::Debug for TopicMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TopicMask({})", self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_clear_round_trip() {
        let mask = TopicMask::empty();
        assert!(mask.is_empty());

        let low = TopicId::new(0);
        let high = TopicId::new(TOPIC_COUNT - 1);
        mask.set(low);
        mask.set(high);
        assert!(mask.contains(low));
        assert!(mask.contains(high));
        assert!(!mask.contains(TopicId::new(1)));

        mask.clear(low);
        assert!(!mask.contains(low));
        assert!(mask.contains(high));
    }

    #[test]
    fn bits_land_in_the_right_word() {
        let mask = TopicMask::empty();
        mask.set(TopicId::new(80));
        assert!(mask.contains(TopicId::new(80)));
        assert!(!mask.contains(TopicId::new(80 - 32)));
        assert!(!mask.contains(TopicId::new(80 + 32)));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn out_of_range_topic_panics() {
        let _ = TopicId::new(TOPIC_COUNT);
    }
}
