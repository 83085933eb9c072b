use crate::models::EventRecord;

/// Position in the buffer up to which a snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(Option<u64>);

/// Events of the running (and any undelivered earlier) session, in creation
/// order.
#[derive(Debug, Default, Clone)]
pub struct EventBuffer {
    entries: Vec<(u64, EventRecord)>,
    next_seq: u64,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: EventRecord) {
        self.entries.push((self.next_seq, event));
        self.next_seq += 1;
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = EventRecord>) {
        for event in events {
            self.push(event);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn events(&self) -> impl Iterator<Item = &EventRecord> + '_ {
        self.entries.iter().map(|(_, event)| event)
    }

    /// Copy of the current contents plus the checkpoint to acknowledge once
    /// they are delivered.
    pub fn snapshot(&self) -> (Vec<EventRecord>, Checkpoint) {
        let events = self.events().cloned().collect();
        let through = self.entries.last().map(|(seq, _)| *seq);
        (events, Checkpoint(through))
    }

    /// Removes everything up to `checkpoint`.
    ///
    /// Events appended after the snapshot stay buffered, and acknowledging
    /// the same checkpoint twice is harmless.
    pub fn acknowledge(&mut self, checkpoint: Checkpoint) {
        if let Checkpoint(Some(through)) = checkpoint {
            self.entries.retain(|(seq, _)| *seq > through);
        }
    }
}
