//! Aggregate root trait and the event buffer aggregates record into.

use crate::entity::Entity;

/// Aggregate root marker + minimal interface.
///
/// State transitions are ordinary methods on the aggregate; each transition
/// records the events it produced. The unit of work that persisted the
/// aggregate then takes those events exactly once and hands them to the
/// mediator.
pub trait AggregateRoot: Entity {
    type Event: Clone + core::fmt::Debug;

    /// Drain the buffered events. A second call returns an empty vector.
    fn take_events(&mut self) -> Vec<Self::Event>;
}

/// Buffer of events raised by an aggregate during one unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBuffer<E> {
    events: Vec<E>,
}

impl<E> Default for EventBuffer<E> {
    fn default() -> Self {
        Self { events: Vec::new() }
    }
}

impl<E> EventBuffer<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: E) {
        self.events.push(event);
    }

    /// Release buffered events in the order they were recorded.
    pub fn drain(&mut self) -> Vec<E> {
        std::mem::take(&mut self.events)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
