//! Sample-accurate event scheduler
//!
//! Pending note events sit in a fixed number of slots, each with a
//! countdown in samples. A block is rendered in segments that end exactly
//! where the next event is due, so note starts and releases land on the
//! sample they were scheduled for instead of the block boundary.

use tracing::warn;

/// Note event delivered to a synthesizing device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteEvent {
    On { note: u8, velocity: u8 },
    Off { note: u8 },
}

/// Receiver of scheduled events and of the audio segments between them
pub trait EventTarget {
    /// Apply an event that is due at the current sample
    fn handle_event(&mut self, event: NoteEvent);

    /// Render `len` samples starting `offset` samples into the block
    fn render(&mut self, offset: usize, len: usize);
}

#[derive(Debug, Clone, Copy)]
struct PendingEvent {
    event: NoteEvent,
    delta: usize,
    /// Insertion order, so events due on the same sample fire in order
    seq: u64,
}

/// Fixed-capacity queue of countdown events
#[derive(Debug)]
pub struct EventScheduler {
    slots: Box<[Option<PendingEvent>]>,
    next_seq: u64,
    dropped: u64,
}

impl EventScheduler {
    /// Create a scheduler holding at most `capacity` pending events
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity].into_boxed_slice(),
            next_seq: 0,
            dropped: 0,
        }
    }

    /// Queue an event `delta` samples from the start of the next block
    ///
    /// # Returns
    /// `false` if every slot is taken; the event is dropped and counted.
    pub fn schedule(&mut self, event: NoteEvent, delta: usize) -> bool {
        let Some(slot) = self.slots.iter_mut().find(|s| s.is_none()) else {
            self.dropped += 1;
            warn!(
                ?event,
                delta,
                capacity = self.slots.len(),
                dropped = self.dropped,
                "event slots full, dropping event"
            );
            return false;
        };
        *slot = Some(PendingEvent {
            event,
            delta,
            seq: self.next_seq,
        });
        self.next_seq += 1;
        true
    }

    /// Number of events still counting down
    pub fn pending(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Total number of events dropped because the slots were full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.slots.fill(None);
    }

    /// Render `num_samples` through `target`, firing events on their exact sample
    ///
    /// Each iteration fires whatever is due, renders up to the next pending
    /// countdown (or the end of the block), then counts every remaining event
    /// down by the rendered length. Events due exactly at the end of the block
    /// stay pending and fire on the first sample of the next one.
    pub fn run<T: EventTarget>(&mut self, num_samples: usize, target: &mut T) {
        let mut offset = 0;
        let mut remaining = num_samples;

        while remaining > 0 {
            self.fire_due(target);

            let step = self
                .slots
                .iter()
                .flatten()
                .map(|p| p.delta)
                .fold(remaining, usize::min);

            target.render(offset, step);

            for pending in self.slots.iter_mut().flatten() {
                pending.delta -= step;
            }
            offset += step;
            remaining -= step;
        }
    }

    /// Fire every event whose countdown reached zero, oldest first
    fn fire_due<T: EventTarget>(&mut self, target: &mut T) {
        loop {
            let due = self
                .slots
                .iter()
                .enumerate()
                .filter_map(|(i, s)| s.filter(|p| p.delta == 0).map(|p| (i, p.seq)))
                .min_by_key(|&(_, seq)| seq);

            let Some((index, _)) = due else {
                break;
            };
            if let Some(pending) = self.slots[index].take() {
                target.handle_event(pending.event);
            }
        }
    }
}
