//! Stream attach/detach protocol (spec.md §4.3)
//!
//! `attach_stream` mirrors `ADD_STREAM`: it walks the target device list,
//! building one [`DevStream`] per device that is actually open, and rolls
//! the whole operation back if any step past the first fails. `detach_stream`
//! mirrors `DISCONNECT_STREAM`.

use crate::device::{DevStream, Direction, OpenDeviceRegistry};
use crate::error::{CoreError, CoreResult};
use crate::stream::{StreamHandle, StreamRegistry};
use crate::time::MonotonicTime;

/// `ADD_STREAM`. Takes ownership of the new stream handle and a list of
/// target `(direction, device index)` pairs, attaching to every target that
/// is actually open. Unknown or already-bound targets are skipped silently,
/// matching spec.md §4.3 steps 1–2.
pub fn attach_stream(
    devices: &mut OpenDeviceRegistry,
    streams: &mut StreamRegistry,
    stream: Box<dyn StreamHandle>,
    targets: &[(Direction, i32)],
) -> CoreResult<()> {
    let stream_id = stream.id();
    let cb_threshold = stream.cb_threshold();
    streams.insert(stream);

    let mut attached: Vec<(Direction, i32)> = Vec::new();

    for &(direction, index) in targets {
        let Some(dev) = devices.find_mut(direction, index) else {
            continue;
        };
        if dev.find_stream(stream_id).is_some() {
            continue;
        }

        let had_existing_streams = !dev.streams.is_empty();

        let init_cb_ts = if direction == Direction::Output && had_existing_streams {
            dev.streams
                .iter()
                .map(|s| s.next_cb_ts)
                .min()
                .unwrap_or_else(MonotonicTime::now)
        } else {
            MonotonicTime::now()
        };

        if direction == Direction::Input && !had_existing_streams {
            if let Err(e) = dev.handle.flush_capture() {
                rollback(devices, streams, stream_id, &attached);
                return Err(e);
            }
        }

        let mut dev_stream = DevStream {
            stream_id,
            device_index: index,
            format: dev.handle.format(),
            next_cb_ts: init_cb_ts,
            written_offset: 0,
            device_offset: 0,
        };

        if direction == Direction::Input && had_existing_streams {
            if let Some(first) = dev.streams.first() {
                dev_stream.written_offset = first.written_offset.min(cb_threshold);
                dev_stream.device_offset = first.device_offset.min(cb_threshold);
            }
        }

        dev.streams.push(dev_stream);
        dev.handle.notify_stream_added(stream_id);
        attached.push((direction, index));
    }

    Ok(())
}

fn rollback(
    devices: &mut OpenDeviceRegistry,
    streams: &mut StreamRegistry,
    stream_id: u32,
    attached: &[(Direction, i32)],
) {
    for &(direction, index) in attached {
        if let Some(dev) = devices.find_mut(direction, index) {
            dev.streams.retain(|s| s.stream_id != stream_id);
            dev.handle.notify_stream_removed(stream_id);
        }
    }
    streams.remove(stream_id);
}

/// `DISCONNECT_STREAM`. `device = None` removes the stream from every device
/// in its own direction; `Some((direction, index))` removes it from just
/// that one device.
pub fn detach_stream(
    devices: &mut OpenDeviceRegistry,
    streams: &mut StreamRegistry,
    stream_id: u32,
    device: Option<(Direction, i32)>,
) -> CoreResult<()> {
    // An unknown or already-reaped stream id is a no-op, not an error:
    // DISCONNECT_STREAM's wire contract always returns 0 (spec.md §4.1).
    let Ok(handle) = streams.get(stream_id) else {
        return Ok(());
    };
    let direction = handle.direction();

    match device {
        Some((dev_direction, index)) => {
            if let Some(dev) = devices.find_mut(dev_direction, index) {
                detach_from(dev, stream_id);
            }
        }
        None => {
            for dev in devices.list_mut(direction) {
                detach_from(dev, stream_id);
            }
        }
    }
    Ok(())
}

fn detach_from(dev: &mut crate::device::OpenDevice, stream_id: u32) {
    if dev.find_stream(stream_id).is_some() {
        dev.streams.retain(|s| s.stream_id != stream_id);
        dev.handle.notify_stream_removed(stream_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeDevice, FakeStream};

    #[test]
    fn attach_to_unknown_device_is_silently_skipped() {
        let mut devices = OpenDeviceRegistry::new();
        let mut streams = StreamRegistry::new();
        let stream = Box::new(FakeStream::output(1, 256, 1024));
        attach_stream(&mut devices, &mut streams, stream, &[(Direction::Output, 99)]).unwrap();
        assert!(streams.contains(1));
    }

    #[test]
    fn output_attach_aligns_to_earliest_existing_callback() {
        let mut devices = OpenDeviceRegistry::new();
        devices.add_open_dev(Box::new(FakeDevice::output(1))).unwrap();
        let mut streams = StreamRegistry::new();

        attach_stream(
            &mut devices,
            &mut streams,
            Box::new(FakeStream::output(1, 256, 1024)),
            &[(Direction::Output, 1)],
        )
        .unwrap();
        let earliest = devices.find(Direction::Output, 1).unwrap().streams[0].next_cb_ts;

        attach_stream(
            &mut devices,
            &mut streams,
            Box::new(FakeStream::output(2, 256, 1024)),
            &[(Direction::Output, 1)],
        )
        .unwrap();
        let second = devices
            .find(Direction::Output, 1)
            .unwrap()
            .find_stream(2)
            .unwrap()
            .next_cb_ts;
        assert_eq!(second, earliest);
    }

    #[test]
    fn second_input_stream_clamps_offset_to_first() {
        let mut devices = OpenDeviceRegistry::new();
        devices.add_open_dev(Box::new(FakeDevice::input(1))).unwrap();
        let mut streams = StreamRegistry::new();

        attach_stream(
            &mut devices,
            &mut streams,
            Box::new(FakeStream::input(1, 256)),
            &[(Direction::Input, 1)],
        )
        .unwrap();
        {
            let dev = devices.find_mut(Direction::Input, 1).unwrap();
            let first = dev.find_stream_mut(1).unwrap();
            first.written_offset = 9_999;
            first.device_offset = 9_999;
        }

        attach_stream(
            &mut devices,
            &mut streams,
            Box::new(FakeStream::input(2, 128)),
            &[(Direction::Input, 1)],
        )
        .unwrap();

        let dev = devices.find(Direction::Input, 1).unwrap();
        let second = dev.find_stream(2).unwrap();
        assert_eq!(second.written_offset, 128);
        assert_eq!(second.device_offset, 128);
    }

    #[test]
    fn first_input_stream_flushes_capture() {
        let mut devices = OpenDeviceRegistry::new();
        let dev = FakeDevice::input(1);
        let flushes = dev.flush_calls.clone();
        devices.add_open_dev(Box::new(dev)).unwrap();
        let mut streams = StreamRegistry::new();

        attach_stream(
            &mut devices,
            &mut streams,
            Box::new(FakeStream::input(1, 256)),
            &[(Direction::Input, 1)],
        )
        .unwrap();
        assert_eq!(*flushes.lock().unwrap(), 1);
    }

    #[test]
    fn detach_unknown_stream_is_a_no_op_returning_ok() {
        let mut devices = OpenDeviceRegistry::new();
        let mut streams = StreamRegistry::new();
        assert!(detach_stream(&mut devices, &mut streams, 404, None).is_ok());
        assert!(detach_stream(&mut devices, &mut streams, 404, Some((Direction::Output, 1))).is_ok());
    }

    #[test]
    fn detach_from_single_device_removes_only_that_binding() {
        let mut devices = OpenDeviceRegistry::new();
        devices.add_open_dev(Box::new(FakeDevice::output(1))).unwrap();
        devices.add_open_dev(Box::new(FakeDevice::output(2))).unwrap();
        let mut streams = StreamRegistry::new();
        attach_stream(
            &mut devices,
            &mut streams,
            Box::new(FakeStream::output(1, 256, 1024)),
            &[(Direction::Output, 1), (Direction::Output, 2)],
        )
        .unwrap();

        detach_stream(&mut devices, &mut streams, 1, Some((Direction::Output, 1))).unwrap();

        assert!(devices.find(Direction::Output, 1).unwrap().find_stream(1).is_none());
        assert!(devices.find(Direction::Output, 2).unwrap().find_stream(1).is_some());
    }

    #[test]
    fn detach_with_no_device_removes_from_all() {
        let mut devices = OpenDeviceRegistry::new();
        devices.add_open_dev(Box::new(FakeDevice::output(1))).unwrap();
        devices.add_open_dev(Box::new(FakeDevice::output(2))).unwrap();
        let mut streams = StreamRegistry::new();
        attach_stream(
            &mut devices,
            &mut streams,
            Box::new(FakeStream::output(1, 256, 1024)),
            &[(Direction::Output, 1), (Direction::Output, 2)],
        )
        .unwrap();

        detach_stream(&mut devices, &mut streams, 1, None).unwrap();

        assert!(devices.find(Direction::Output, 1).unwrap().find_stream(1).is_none());
        assert!(devices.find(Direction::Output, 2).unwrap().find_stream(1).is_none());
    }

    #[test]
    fn failed_capture_flush_rolls_back_partial_attach() {
        let mut devices = OpenDeviceRegistry::new();
        devices.add_open_dev(Box::new(FakeDevice::input(1))).unwrap();
        devices.add_open_dev(Box::new(FailingFlushInput::new(2))).unwrap();
        let mut streams = StreamRegistry::new();

        let err = attach_stream(
            &mut devices,
            &mut streams,
            Box::new(FakeStream::input(1, 256)),
            &[(Direction::Input, 1), (Direction::Input, 2)],
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Collaborator(_)));

        assert!(devices.find(Direction::Input, 1).unwrap().find_stream(1).is_none());
        assert!(!streams.contains(1));
    }

    /// A device whose direction is Input but whose `flush_capture` always
    /// fails, used only to exercise the attach rollback path.
    struct FailingFlushInput(FakeDevice);

    impl FailingFlushInput {
        fn new(index: i32) -> Self {
            FailingFlushInput(FakeDevice::input(index))
        }
    }

    impl crate::device::DeviceHandle for FailingFlushInput {
        fn index(&self) -> i32 {
            self.0.index()
        }
        fn direction(&self) -> Direction {
            self.0.direction()
        }
        fn name(&self) -> &str {
            self.0.name()
        }
        fn format(&self) -> crate::device::DeviceFormat {
            self.0.format()
        }
        fn buffer_frames(&self) -> u32 {
            self.0.buffer_frames()
        }
        fn min_buffer_level(&self) -> u32 {
            self.0.min_buffer_level()
        }
        fn min_cb_threshold(&self) -> u32 {
            self.0.min_cb_threshold()
        }
        fn max_cb_threshold(&self) -> u32 {
            self.0.max_cb_threshold()
        }
        fn fill_zeros(&mut self, frames: u32) -> CoreResult<()> {
            self.0.fill_zeros(frames)
        }
        fn flush_capture(&mut self) -> CoreResult<u32> {
            Err(CoreError::Collaborator("flush failed".into()))
        }
        fn notify_stream_added(&mut self, stream_id: u32) {
            self.0.notify_stream_added(stream_id)
        }
        fn notify_stream_removed(&mut self, stream_id: u32) {
            self.0.notify_stream_removed(stream_id)
        }
        fn is_open(&self) -> bool {
            self.0.is_open()
        }
        fn start_ramp(&mut self, request: crate::device::RampRequest) -> CoreResult<()> {
            self.0.start_ramp(request)
        }
        fn should_wake(&self) -> bool {
            self.0.should_wake()
        }
        fn wake_ts(&self) -> MonotonicTime {
            self.0.wake_ts()
        }
        fn underruns(&self) -> u32 {
            self.0.underruns()
        }
        fn severe_underruns(&self) -> u32 {
            self.0.severe_underruns()
        }
        fn high_water_mark(&self) -> u32 {
            self.0.high_water_mark()
        }
        fn est_rate_ratio(&self) -> f64 {
            self.0.est_rate_ratio()
        }
    }
}
