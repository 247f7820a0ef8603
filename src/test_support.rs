//! In-memory fakes for [`DeviceHandle`] and [`StreamHandle`]
//!
//! Used by this crate's own unit tests and by `tests/thread_lifecycle.rs`.
//! Gated behind the `test-support` feature (see Cargo.toml) since
//! integration tests link the library without `cfg(test)`.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::device::{DeviceFormat, DeviceHandle, Direction, RampRequest};
use crate::error::CoreResult;
use crate::stream::StreamHandle;
use crate::time::MonotonicTime;

/// A device handle with no backing hardware: `fill_zeros`/`flush_capture`
/// just record that they were called, which is what the attach/registry
/// tests need to assert against.
pub struct FakeDevice {
    index: i32,
    direction: Direction,
    name: String,
    format: DeviceFormat,
    should_wake: bool,
    wake_ts: MonotonicTime,
    pub fill_calls: Arc<Mutex<Vec<u32>>>,
    pub flush_calls: Arc<Mutex<u32>>,
}

impl FakeDevice {
    pub const MIN_BUFFER_LEVEL: u32 = 480;

    pub fn output(index: i32) -> Self {
        FakeDevice {
            index,
            direction: Direction::Output,
            name: format!("fake-out-{index}"),
            format: DeviceFormat {
                rate_hz: 48_000,
                channels: 2,
            },
            should_wake: false,
            wake_ts: MonotonicTime::now(),
            fill_calls: Arc::new(Mutex::new(Vec::new())),
            flush_calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn input(index: i32) -> Self {
        FakeDevice {
            direction: Direction::Input,
            name: format!("fake-in-{index}"),
            ..FakeDevice::output(index)
        }
    }
}

impl DeviceHandle for FakeDevice {
    fn index(&self) -> i32 {
        self.index
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> DeviceFormat {
        self.format
    }

    fn buffer_frames(&self) -> u32 {
        4096
    }

    fn min_buffer_level(&self) -> u32 {
        Self::MIN_BUFFER_LEVEL
    }

    fn min_cb_threshold(&self) -> u32 {
        240
    }

    fn max_cb_threshold(&self) -> u32 {
        1024
    }

    fn fill_zeros(&mut self, frames: u32) -> CoreResult<()> {
        self.fill_calls.lock().unwrap().push(frames);
        Ok(())
    }

    fn flush_capture(&mut self) -> CoreResult<u32> {
        *self.flush_calls.lock().unwrap() += 1;
        Ok(0)
    }

    fn notify_stream_added(&mut self, _stream_id: u32) {}
    fn notify_stream_removed(&mut self, _stream_id: u32) {}

    fn is_open(&self) -> bool {
        true
    }

    fn start_ramp(&mut self, _request: RampRequest) -> CoreResult<()> {
        Ok(())
    }

    fn should_wake(&self) -> bool {
        self.should_wake
    }

    fn wake_ts(&self) -> MonotonicTime {
        self.wake_ts
    }

    fn underruns(&self) -> u32 {
        0
    }

    fn severe_underruns(&self) -> u32 {
        0
    }

    fn high_water_mark(&self) -> u32 {
        0
    }

    fn est_rate_ratio(&self) -> f64 {
        1.0
    }
}

/// A stream handle backed by atomics, standing in for a shared-memory region.
pub struct FakeStream {
    id: u32,
    direction: Direction,
    format: DeviceFormat,
    cb_threshold: u32,
    shm_frames: AtomicI64,
    draining: AtomicBool,
    overruns: AtomicU32,
}

impl FakeStream {
    pub fn output(id: u32, cb_threshold: u32, shm_frames: i64) -> Self {
        FakeStream {
            id,
            direction: Direction::Output,
            format: DeviceFormat {
                rate_hz: 48_000,
                channels: 2,
            },
            cb_threshold,
            shm_frames: AtomicI64::new(shm_frames),
            draining: AtomicBool::new(false),
            overruns: AtomicU32::new(0),
        }
    }

    pub fn input(id: u32, cb_threshold: u32) -> Self {
        FakeStream {
            direction: Direction::Input,
            ..FakeStream::output(id, cb_threshold, 0)
        }
    }

    pub fn set_shm_frames(&self, frames: i64) {
        self.shm_frames.store(frames, Ordering::SeqCst);
    }
}

impl StreamHandle for FakeStream {
    fn id(&self) -> u32 {
        self.id
    }

    fn direction(&self) -> Direction {
        self.direction
    }

    fn format(&self) -> DeviceFormat {
        self.format
    }

    fn buffer_frames(&self) -> u32 {
        self.cb_threshold * 4
    }

    fn cb_threshold(&self) -> u32 {
        self.cb_threshold
    }

    fn shm_frames(&self) -> i64 {
        self.shm_frames.load(Ordering::SeqCst)
    }

    fn set_draining(&self, draining: bool) {
        self.draining.store(draining, Ordering::SeqCst);
    }

    fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    fn longest_fetch_interval(&self) -> std::time::Duration {
        std::time::Duration::ZERO
    }

    fn overruns(&self) -> u32 {
        self.overruns.load(Ordering::SeqCst)
    }

    fn has_apm(&self) -> bool {
        false
    }
}
