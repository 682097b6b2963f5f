use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::sim_interface::{FutureEvent, SimTime};

/// Heap entry. Ordered so that `BinaryHeap` (a max-heap) pops the earliest
/// time first, and among equal times the earliest insertion.
#[derive(Debug, Clone)]
struct QueuedEvent {
    seq: u64,
    event: FutureEvent,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.event.time == other.event.time && self.seq == other.seq
    }
}

impl Eq for QueuedEvent {}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .event
            .time
            .cmp(&self.event.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Future event list: pending events keyed by trigger time.
#[derive(Debug, Default)]
pub struct Fel {
    heap: BinaryHeap<QueuedEvent>,
    next_seq: u64,
}

impl Fel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an event. The returned sequence number identifies it for
    /// `retract`.
    pub fn push(&mut self, event: FutureEvent) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueuedEvent { seq, event });
        seq
    }

    pub fn pop_min(&mut self) -> Option<FutureEvent> {
        self.heap.pop().map(|q| q.event)
    }

    pub fn peek_time(&self) -> Option<SimTime> {
        self.heap.peek().map(|q| q.event.time)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Remove the event pushed with `seq`, if it is still pending.
    pub fn retract(&mut self, seq: u64) -> Option<FutureEvent> {
        let mut found = None;
        let entries = std::mem::take(&mut self.heap).into_vec();
        let mut keep = Vec::with_capacity(entries.len());
        for q in entries {
            if q.seq == seq {
                found = Some(q.event);
            } else {
                keep.push(q);
            }
        }
        self.heap = BinaryHeap::from(keep);
        found
    }

    /// Pending events in pop order.
    pub fn snapshot(&self) -> Vec<FutureEvent> {
        let mut entries: Vec<&QueuedEvent> = self.heap.iter().collect();
        // heap order is reversed, so descending sort yields pop order
        entries.sort_by(|a, b| b.cmp(a));
        entries.into_iter().map(|q| q.event.clone()).collect()
    }

    /// Replace the contents with `events`, preserving their relative order
    /// for equal times.
    pub fn restore(&mut self, events: Vec<FutureEvent>) {
        self.clear();
        for e in events {
            self.push(e);
        }
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}
