//! Fixed-capacity event ring buffer
//!
//! The scheduler appends one `EventKind` at each of the well-known points
//! spec.md §6 lists. `DUMP_THREAD_INFO` memcpys the whole buffer into the
//! caller's snapshot (§4.7); there is no other reader, so a plain `Vec`-backed
//! ring with an overwrite-oldest policy is enough — no locking, since only the
//! worker thread ever touches it (§5).

const CAPACITY: usize = 1200;

/// One entry in the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    DevAdded(i32),
    StreamAdded(u32),
    ThreadWake,
    /// Sleep with the pending relative timeout, in microseconds (`None` means
    /// block indefinitely).
    ThreadSleep(Option<u64>),
    CommandReceived,
    IodevCallbackFired(i32),
    StreamSleepTimeSet(u32),
    WriteStreamsWait,
}

/// A single timestamped event.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub kind: EventKind,
    pub at_micros: u64,
}

/// Ring buffer of [`Event`]s, oldest overwritten first once full.
pub struct EventLog {
    entries: Vec<Event>,
    next: usize,
    len: usize,
}

impl EventLog {
    pub fn new() -> Self {
        EventLog {
            entries: Vec::with_capacity(CAPACITY),
            next: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, kind: EventKind, at_micros: u64) {
        let event = Event { kind, at_micros };
        if self.entries.len() < CAPACITY {
            self.entries.push(event);
        } else {
            self.entries[self.next] = event;
        }
        self.next = (self.next + 1) % CAPACITY;
        self.len = (self.len + 1).min(CAPACITY);
    }

    /// Snapshot events in chronological order, oldest first.
    pub fn snapshot(&self) -> Vec<Event> {
        if self.entries.len() < CAPACITY {
            self.entries.clone()
        } else {
            let mut out = Vec::with_capacity(CAPACITY);
            out.extend_from_slice(&self.entries[self.next..]);
            out.extend_from_slice(&self.entries[..self.next]);
            out
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}
