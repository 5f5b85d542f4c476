//! # Last-value cache, one slot per topic.
//!
//! Stores the most recent retained envelope for each topic and feeds the
//! late-join replay: a subscriber that sets a topic bit receives the
//! retained envelope immediately, before any further publication on that
//! topic.
//!
//! Owned and mutated exclusively by the dispatcher.

use crate::events::EventRef;
use crate::topic::{TopicId, TOPIC_COUNT};

pub(crate) struct RetainedCache {
    slots: Vec<Option<EventRef>>,
}

impl RetainedCache {
    pub(crate) fn new() -> Self {
        Self {
            slots: vec![None; TOPIC_COUNT],
        }
    }

    /// Stores `event` in its topic's slot, replacing any previous entry.
    pub(crate) fn store(&mut self, event: EventRef) {
        let index = event.topic().index();
        self.slots[index] = Some(event);
    }

    /// Empties the slot for `topic`. Idempotent.
    pub(crate) fn clear(&mut self, topic: TopicId) {
        self.slots[topic.index()] = None;
    }

    pub(crate) fn get(&self, topic: TopicId) -> Option<&EventRef> {
        self.slots[topic.index()].as_ref()
    }
}
