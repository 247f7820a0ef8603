//! Debug sampler: `DUMP_THREAD_INFO` snapshot (spec.md §4.7)
//!
//! The snapshot is bounded (`MAX_DEBUG_DEVS`/`MAX_DEBUG_STREAMS`), output
//! devices first then input, preserving registration order, plus a copy of
//! the event log ring buffer.

use crate::device::{Direction, OpenDeviceRegistry};
use crate::eventlog::{Event, EventLog};
use crate::stream::StreamRegistry;

pub const MAX_DEBUG_DEVS: usize = 16;
pub const MAX_DEBUG_STREAMS: usize = 32;

/// One device's slice of the debug snapshot.
#[derive(Debug, Clone)]
pub struct DebugDevice {
    pub index: i32,
    pub direction: Direction,
    pub name: String,
    pub buffer_frames: u32,
    pub min_cb_threshold: u32,
    pub max_cb_threshold: u32,
    pub underruns: u32,
    pub severe_underruns: u32,
    pub high_water_mark: u32,
    pub rate_hz: u32,
    pub channels: u16,
    pub est_rate_ratio: f64,
}

/// One stream's slice of the debug snapshot.
#[derive(Debug, Clone)]
pub struct DebugStream {
    pub stream_id: u32,
    pub device_index: i32,
    pub direction: Direction,
    pub buffer_frames: u32,
    pub cb_threshold: u32,
    pub rate_hz: u32,
    pub channels: u16,
    pub longest_fetch_interval: std::time::Duration,
    pub overruns: u32,
    pub has_apm: bool,
}

/// The filled-in `DUMP_THREAD_INFO` response.
#[derive(Debug, Clone, Default)]
pub struct ThreadSnapshot {
    pub devices: Vec<DebugDevice>,
    pub streams: Vec<DebugStream>,
    pub longest_wake: std::time::Duration,
    pub event_log: Vec<Event>,
}

/// Builds a [`ThreadSnapshot`] from live registries. `longest_wake` is reset
/// to zero by the caller exactly once, before this runs (spec.md §9 Open
/// Question — see DESIGN.md); this function only reads the value it is
/// handed and does not itself touch the scheduler's running maximum.
pub fn dump_thread_info(
    devices: &OpenDeviceRegistry,
    streams: &StreamRegistry,
    longest_wake: std::time::Duration,
    event_log: &EventLog,
) -> ThreadSnapshot {
    let mut snapshot = ThreadSnapshot {
        longest_wake,
        ..Default::default()
    };

    for direction in [Direction::Output, Direction::Input] {
        for dev in devices.list(direction) {
            if snapshot.devices.len() >= MAX_DEBUG_DEVS {
                break;
            }
            let fmt = dev.handle.format();
            snapshot.devices.push(DebugDevice {
                index: dev.index(),
                direction,
                name: dev.handle.name().to_string(),
                buffer_frames: dev.handle.buffer_frames(),
                min_cb_threshold: dev.handle.min_cb_threshold(),
                max_cb_threshold: dev.handle.max_cb_threshold(),
                underruns: dev.handle.underruns(),
                severe_underruns: dev.handle.severe_underruns(),
                high_water_mark: dev.handle.high_water_mark(),
                rate_hz: fmt.rate_hz,
                channels: fmt.channels,
                est_rate_ratio: dev.handle.est_rate_ratio(),
            });

            for dev_stream in &dev.streams {
                if snapshot.streams.len() >= MAX_DEBUG_STREAMS {
                    break;
                }
                if let Ok(handle) = streams.get(dev_stream.stream_id) {
                    snapshot.streams.push(DebugStream {
                        stream_id: dev_stream.stream_id,
                        device_index: dev.index(),
                        direction,
                        buffer_frames: handle.buffer_frames(),
                        cb_threshold: handle.cb_threshold(),
                        rate_hz: dev_stream.format.rate_hz,
                        channels: dev_stream.format.channels,
                        longest_fetch_interval: handle.longest_fetch_interval(),
                        overruns: handle.overruns(),
                        has_apm: handle.has_apm(),
                    });
                }
            }
        }
    }

    snapshot.event_log = event_log.snapshot();
    snapshot
}
