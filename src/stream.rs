//! Stream handle trait and the central stream registry (spec.md §3, §6)
//!
//! A `StreamHandle` is backed by shared memory in a real implementation, so
//! its state (draining flag, frame count, overruns) is naturally read/written
//! through shared references rather than requiring `&mut self` — this mirrors
//! how the teacher's lock-free engine favors atomics over mutexes for
//! cross-boundary state (`engine::command`'s doc comment on real-time safety).

use std::collections::HashMap;

use crate::device::{DeviceFormat, Direction};
use crate::error::{CoreError, CoreResult};

/// The opaque stream handle external collaborators provide (spec.md §6).
pub trait StreamHandle: Send {
    fn id(&self) -> u32;
    fn direction(&self) -> Direction;
    fn format(&self) -> DeviceFormat;
    fn buffer_frames(&self) -> u32;
    fn cb_threshold(&self) -> u32;

    /// Frames currently queued in the shared-memory region. Signed because
    /// the wake scheduler treats "at or below zero" as "nothing to fetch"
    /// (spec.md §4.4).
    fn shm_frames(&self) -> i64;

    fn set_draining(&self, draining: bool);
    fn is_draining(&self) -> bool;

    fn longest_fetch_interval(&self) -> std::time::Duration;
    fn overruns(&self) -> u32;

    /// Whether this stream has an APM (AEC) handle attached (spec.md §3).
    fn has_apm(&self) -> bool;

    /// The fd the wake scheduler polls to learn this stream's shared-memory
    /// region changed (spec.md §4.6 step 3). `None` if the backend has none
    /// to offer; the stream is still serviced every `dev_io_run` regardless.
    fn wake_fd(&self) -> Option<std::os::fd::RawFd> {
        None
    }
}

/// Owns every stream currently known to the audio thread, keyed by stream
/// id. `DevStream` bindings only carry the id; lookups go through here.
#[derive(Default)]
pub struct StreamRegistry {
    streams: HashMap<u32, Box<dyn StreamHandle>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, stream: Box<dyn StreamHandle>) {
        self.streams.insert(stream.id(), stream);
    }

    pub fn remove(&mut self, id: u32) -> Option<Box<dyn StreamHandle>> {
        self.streams.remove(&id)
    }

    pub fn get(&self, id: u32) -> CoreResult<&dyn StreamHandle> {
        self.streams
            .get(&id)
            .map(|b| b.as_ref())
            .ok_or(CoreError::NotFound(id as i32))
    }

    pub fn contains(&self, id: u32) -> bool {
        self.streams.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeStream;

    #[test]
    fn insert_then_remove_round_trips() {
        let mut reg = StreamRegistry::new();
        reg.insert(Box::new(FakeStream::output(1, 256, 0)));
        assert!(reg.contains(1));
        assert_eq!(reg.get(1).unwrap().cb_threshold(), 256);
        reg.remove(1);
        assert!(!reg.contains(1));
    }

    #[test]
    fn unknown_id_is_not_found() {
        let reg = StreamRegistry::new();
        assert!(matches!(reg.get(9), Err(CoreError::NotFound(9))));
    }
}
