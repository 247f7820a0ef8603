//! External scheduler collaborators (spec.md §6)
//!
//! `DevIoRunner` and `RealtimeMonitor` are the two collaborators the wake
//! scheduler calls into every iteration but never owns the implementation
//! of — a real backend would drive ALSA and feed a metrics process here. A
//! `NullCollaborators` pair is provided for tests, the way the teacher's
//! `pd` module is stubbed out when its feature is disabled.

use crate::device::OpenDevice;
use crate::eventlog::EventLog;
use crate::time::MonotonicTime;

/// Drives device I/O for both direction lists once per wake-scheduler
/// iteration (spec.md §4.6 step 1), and aggregates the next wake time for
/// input devices (step 2). Owns the only code that knows when a hardware
/// callback actually fires, a stream's sleep time is set, or a write-streams
/// wait happens, so it appends those three `EventKind`s itself (spec.md §6).
pub trait DevIoRunner: Send {
    fn run(&mut self, output: &mut [OpenDevice], input: &mut [OpenDevice], event_log: &mut EventLog);

    /// Fold every input device's contribution into `min_ts`, returning the
    /// new minimum.
    fn next_input_wake(&self, input: &[OpenDevice], min_ts: MonotonicTime) -> MonotonicTime;
}

/// Notified when the busyloop detector fires (spec.md §4.6 step 5).
pub trait RealtimeMonitor: Send {
    fn busyloop(&self);
}

/// No-op collaborators: device I/O does nothing, input devices never push
/// the wake time earlier, busyloop notifications are dropped. Used by
/// scheduler tests that only care about pollfd bookkeeping and command
/// dispatch, not real device callbacks.
pub struct NullDevIoRunner;

impl DevIoRunner for NullDevIoRunner {
    fn run(&mut self, _output: &mut [OpenDevice], _input: &mut [OpenDevice], _event_log: &mut EventLog) {}

    fn next_input_wake(&self, _input: &[OpenDevice], min_ts: MonotonicTime) -> MonotonicTime {
        min_ts
    }
}

pub struct NullRealtimeMonitor;

impl RealtimeMonitor for NullRealtimeMonitor {
    fn busyloop(&self) {}
}
