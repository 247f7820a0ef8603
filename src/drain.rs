//! Drain controller (spec.md §4.4)
//!
//! Only output streams drain. `drain_stream` is meant to be called again and
//! again by the controller (`DRAIN_STREAM` is a poll, not a one-shot) until
//! it returns `0`, at which point the stream has been reaped from every
//! output device and must not be referenced again.

use crate::device::{Direction, OpenDeviceRegistry};
use crate::stream::StreamRegistry;

/// `DRAIN_STREAM`. Returns the milliseconds remaining before the stream's
/// shared-memory buffer empties, or `0` once it has been reaped.
pub fn drain_stream(
    devices: &mut OpenDeviceRegistry,
    streams: &mut StreamRegistry,
    stream_id: u32,
) -> u32 {
    if !devices
        .list(Direction::Output)
        .iter()
        .any(|d| d.find_stream(stream_id).is_some())
    {
        return 0;
    }

    let Ok(handle) = streams.get(stream_id) else {
        return 0;
    };
    let frames = handle.shm_frames();

    if frames <= 0 {
        for dev in devices.list_mut(Direction::Output) {
            if dev.find_stream(stream_id).is_some() {
                dev.streams.retain(|s| s.stream_id != stream_id);
                dev.handle.notify_stream_removed(stream_id);
            }
        }
        streams.remove(stream_id);
        return 0;
    }

    handle.set_draining(true);
    let rate_hz = handle.format().rate_hz.max(1) as i64;
    (1 + frames * 1000 / rate_hz) as u32
}

/// Whether the wake scheduler should skip this dev-stream when folding it
/// into the next wake-time computation: draining streams with nothing left
/// to play must not hold back the device's wake time during reap (spec.md
/// §4.4 last paragraph).
pub fn skips_wake_contribution(streams: &StreamRegistry, stream_id: u32) -> bool {
    match streams.get(stream_id) {
        Ok(handle) => handle.is_draining() && handle.shm_frames() <= 0,
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DevStream;
    use crate::test_support::{FakeDevice, FakeStream};
    use crate::time::MonotonicTime;

    fn attach_fake_output_stream(
        devices: &mut OpenDeviceRegistry,
        streams: &mut StreamRegistry,
        stream_id: u32,
        shm_frames: i64,
    ) {
        devices.add_open_dev(Box::new(FakeDevice::output(1))).unwrap();
        let fmt = FakeDevice::output(1).format();
        devices
            .find_mut(Direction::Output, 1)
            .unwrap()
            .streams
            .push(DevStream {
                stream_id,
                device_index: 1,
                format: fmt,
                next_cb_ts: MonotonicTime::now(),
                written_offset: 0,
                device_offset: 0,
            });
        streams.insert(Box::new(FakeStream::output(stream_id, 256, shm_frames)));
    }

    #[test]
    fn not_attached_returns_zero() {
        let mut devices = OpenDeviceRegistry::new();
        let mut streams = StreamRegistry::new();
        assert_eq!(drain_stream(&mut devices, &mut streams, 1), 0);
    }

    #[test]
    fn zero_frames_reaps_stream_and_returns_zero() {
        let mut devices = OpenDeviceRegistry::new();
        let mut streams = StreamRegistry::new();
        attach_fake_output_stream(&mut devices, &mut streams, 1, 0);

        assert_eq!(drain_stream(&mut devices, &mut streams, 1), 0);
        assert!(!streams.contains(1));
        assert!(devices.find(Direction::Output, 1).unwrap().find_stream(1).is_none());
    }

    #[test]
    fn nonzero_frames_sets_draining_and_returns_ms_remaining() {
        let mut devices = OpenDeviceRegistry::new();
        let mut streams = StreamRegistry::new();
        attach_fake_output_stream(&mut devices, &mut streams, 1, 48_000);

        let ms = drain_stream(&mut devices, &mut streams, 1);
        assert_eq!(ms, 1 + 48_000 * 1000 / 48_000);
        assert!(streams.get(1).unwrap().is_draining());
        assert!(streams.contains(1));
    }

    #[test]
    fn draining_with_no_frames_left_skips_wake_contribution() {
        let mut streams = StreamRegistry::new();
        streams.insert(Box::new(FakeStream::output(1, 256, 0)));
        streams.get(1).unwrap().set_draining(true);
        assert!(skips_wake_contribution(&streams, 1));
    }
}
