//! Wake scheduler — the heart of the audio thread (spec.md §4.6)
//!
//! One call to [`WakeScheduler::run_iteration`] is one pass of the loop:
//! drive device I/O, compute the next wake time, rebuild the `pollfd` set,
//! track wake-interval and busyloop metrics, block in `ppoll`, then dispatch
//! whatever became ready — command handling before callback dispatch, both
//! after device I/O ran against the previously computed state (spec.md §5).

use std::os::fd::{BorrowedFd, RawFd};
use std::time::Duration;

use nix::poll::{ppoll, PollFd, PollFlags};
use nix::sys::time::TimeSpec;

use crate::attach;
use crate::callback::CallbackRegistry;
use crate::collab::DevIoRunner;
use crate::command::{Command, CommandChannelWorker, RemixConverter};
use crate::debug;
use crate::device::{Direction, OpenDeviceRegistry};
use crate::drain;
use crate::error::CoreResult;
use crate::eventlog::{EventKind, EventLog};
use crate::stream::StreamRegistry;
use crate::time::{MonotonicTime, BUSYLOOP_THRESHOLD, WAKE_CEILING};

const INITIAL_POLLFD_CAPACITY: usize = 32;

/// Outcome of one `run_iteration` call, for callers (mainly tests and the
/// lifecycle loop) that want to observe what happened without re-deriving it.
#[derive(Debug, Default)]
pub struct IterationReport {
    pub command_processed: bool,
    pub callbacks_fired: usize,
    pub relative_timeout: Option<Duration>,
    pub busyloop_fired: bool,
    pub stop_requested: bool,
}

/// Drives one worker thread's wake loop. Owns no I/O resources or registries
/// itself — those live in [`crate::thread`]'s worker closure — only the
/// scheduling metrics that must persist across iterations.
pub struct WakeScheduler {
    pollfd_capacity: usize,
    last_wake: Option<MonotonicTime>,
    longest_wake: Duration,
    consecutive_zero_timeouts: u32,
}

impl WakeScheduler {
    pub fn new() -> Self {
        WakeScheduler {
            pollfd_capacity: INITIAL_POLLFD_CAPACITY,
            last_wake: None,
            longest_wake: Duration::ZERO,
            consecutive_zero_timeouts: 0,
        }
    }

    pub fn longest_wake(&self) -> Duration {
        self.longest_wake
    }

    /// Reset the running wake-interval maximum. Called exactly once per
    /// `DUMP_THREAD_INFO`, before the snapshot's device/stream append loop
    /// runs (spec.md §9 Open Question; see DESIGN.md).
    pub fn reset_longest_wake(&mut self) {
        self.longest_wake = Duration::ZERO;
    }

    /// Run one iteration of the scheduler loop.
    #[allow(clippy::too_many_arguments)]
    pub fn run_iteration(
        &mut self,
        command_worker: &CommandChannelWorker,
        devices: &mut OpenDeviceRegistry,
        streams: &mut StreamRegistry,
        callbacks: &mut CallbackRegistry,
        remix: &mut Option<Box<dyn RemixConverter>>,
        dev_io: &mut dyn DevIoRunner,
        monitor: &dyn crate::collab::RealtimeMonitor,
        event_log: &mut EventLog,
        now_micros: impl Fn() -> u64,
    ) -> CoreResult<IterationReport> {
        let mut report = IterationReport::default();

        // Step 1: drive device I/O across both direction lists together.
        let (output, input) = devices.split_mut();
        dev_io.run(output, input, event_log);

        let now = MonotonicTime::now();

        // Step 2: compute the next wake time.
        let (relative_timeout, _contributors) = self.compute_next_wake(now, devices, streams, dev_io);
        report.relative_timeout = relative_timeout;

        // Step 3: rebuild the pollfd set.
        let descriptors =
            self.collect_descriptors(command_worker.command_fd(), callbacks, devices, streams);
        self.ensure_capacity(descriptors.len());
        let mut raw_pollfds = build_pollfd_vec(&descriptors);

        // Step 4: wake-interval metric.
        if let Some(last) = self.last_wake {
            let interval = now.saturating_duration_since(last);
            if interval > self.longest_wake {
                self.longest_wake = interval;
            }
        }
        self.last_wake = Some(now);

        // Step 5: busyloop detector.
        let is_zero_timeout = relative_timeout == Some(Duration::ZERO);
        self.consecutive_zero_timeouts = if is_zero_timeout {
            self.consecutive_zero_timeouts + 1
        } else {
            0
        };
        // Fire exactly once on the transition into the busyloop condition;
        // the counter only re-arms once a non-zero timeout resets it to 0.
        if self.consecutive_zero_timeouts == BUSYLOOP_THRESHOLD {
            monitor.busyloop();
            report.busyloop_fired = true;
        }

        event_log.push(
            EventKind::ThreadSleep(relative_timeout.map(|d| d.as_micros() as u64)),
            now_micros(),
        );

        // Step 6: block in ppoll. No timeout means block indefinitely.
        let timeout =
            relative_timeout.map(|d| TimeSpec::new(d.as_secs() as i64, d.subsec_nanos() as i64));
        let ready = ppoll(&mut raw_pollfds, timeout, None).unwrap_or(0);
        if ready <= 0 {
            return Ok(report);
        }

        event_log.push(EventKind::ThreadWake, now_micros());

        // Step 7: process exactly one command message if pollfd[0] is ready.
        let command_ready = raw_pollfds
            .first()
            .and_then(|pfd| pfd.revents())
            .map(|r| r.contains(PollFlags::POLLIN))
            .unwrap_or(false);
        if command_ready {
            event_log.push(EventKind::CommandReceived, now_micros());
            match self.dispatch_one_command(
                command_worker,
                devices,
                streams,
                callbacks,
                remix,
                event_log,
                &now_micros,
            ) {
                Ok(stop) => report.stop_requested = stop,
                Err(e) => log::warn!("command dispatch failed: {e}"),
            }
            report.command_processed = true;
        }

        // Step 8: dispatch ready callback-registry entries. Stream-wake fds
        // need no explicit dispatch here — the next iteration's device I/O
        // services them (spec.md §4.6, final paragraph).
        for (pfd, desc) in raw_pollfds.iter().zip(descriptors.iter()).skip(1) {
            if let Descriptor::Callback(fd) = desc {
                let ready = pfd
                    .revents()
                    .map(|r| r.intersects(PollFlags::POLLIN | PollFlags::POLLOUT))
                    .unwrap_or(false);
                if ready {
                    callbacks.dispatch(*fd);
                    report.callbacks_fired += 1;
                }
            }
        }

        Ok(report)
    }

    /// Decode and handle exactly one command, replying on the to-main pipe.
    /// Returns whether `STOP` was the command received.
    #[allow(clippy::too_many_arguments)]
    fn dispatch_one_command(
        &mut self,
        worker: &CommandChannelWorker,
        devices: &mut OpenDeviceRegistry,
        streams: &mut StreamRegistry,
        callbacks: &mut CallbackRegistry,
        remix: &mut Option<Box<dyn RemixConverter>>,
        event_log: &mut EventLog,
        now_micros: &impl Fn() -> u64,
    ) -> CoreResult<bool> {
        let command = worker.recv()?;
        let mut stop = false;
        match command {
            Command::AddOpenDev(handle) => {
                let index = handle.index();
                let result = devices.add_open_dev(handle);
                event_log.push(EventKind::DevAdded(index), now_micros());
                worker.reply_status(status_of(result))?;
            }
            Command::RmOpenDev { direction, index } => {
                let result = devices.rm_open_dev(direction, index);
                worker.reply_status(status_of(result))?;
            }
            Command::IsDevOpen { direction, index } => {
                worker.reply_status(devices.is_open(direction, index) as i32)?;
            }
            Command::AddStream { stream, targets } => {
                let stream_id = stream.id();
                let result = attach::attach_stream(devices, streams, stream, &targets);
                event_log.push(EventKind::StreamAdded(stream_id), now_micros());
                worker.reply_status(status_of(result))?;
            }
            Command::DisconnectStream { stream_id, device } => {
                let result = attach::detach_stream(devices, streams, stream_id, device);
                worker.reply_status(status_of(result))?;
            }
            Command::DrainStream { stream_id } => {
                let ms = drain::drain_stream(devices, streams, stream_id);
                worker.reply_status(ms as i32)?;
            }
            Command::DevStartRamp {
                direction,
                index,
                request,
            } => {
                let result = devices.start_ramp(direction, index, request);
                worker.reply_status(status_of(result))?;
            }
            Command::ConfigGlobalRemix(new) => {
                let old = std::mem::replace(remix, new);
                worker.reply_remix(old)?;
            }
            Command::DumpThreadInfo => {
                let longest = self.longest_wake;
                self.reset_longest_wake();
                let snapshot = debug::dump_thread_info(devices, streams, longest, event_log);
                worker.reply_snapshot(snapshot)?;
            }
            Command::AecDump { .. } => {
                // AEC/APM internals are out of scope; acknowledge so
                // controllers polling this command don't stall.
                worker.reply_status(0)?;
            }
            Command::RemoveCallback { fd } => {
                callbacks.remove(fd)?;
                worker.reply_status(0)?;
            }
            Command::Stop => {
                worker.reply_status(0)?;
                stop = true;
            }
        }
        Ok(stop)
    }

    fn ensure_capacity(&mut self, required: usize) {
        while self.pollfd_capacity < required {
            self.pollfd_capacity *= 2;
        }
    }

    fn collect_descriptors(
        &self,
        command_fd: RawFd,
        callbacks: &CallbackRegistry,
        devices: &OpenDeviceRegistry,
        streams: &StreamRegistry,
    ) -> Vec<Descriptor> {
        let mut descriptors = Vec::with_capacity(self.pollfd_capacity);
        descriptors.push(Descriptor::Command(command_fd));

        for entry in callbacks.enabled_entries() {
            descriptors.push(Descriptor::Callback(entry.fd));
        }

        // Output dev-streams, then input — same ordering as everywhere else
        // in the scheduler (spec.md §4.6 step 3).
        for direction in [Direction::Output, Direction::Input] {
            for dev in devices.list(direction) {
                for dev_stream in &dev.streams {
                    if let Ok(handle) = streams.get(dev_stream.stream_id) {
                        if let Some(fd) = handle.wake_fd() {
                            descriptors.push(Descriptor::StreamWake(fd));
                        }
                    }
                }
            }
        }

        descriptors
    }

    /// Compute the 20-second-ceiling, device/stream-minimum wake time
    /// (spec.md §4.6 step 2), returning the relative timeout to pass to
    /// `ppoll` plus the number of contributors folded in (zero means block
    /// indefinitely).
    fn compute_next_wake(
        &self,
        now: MonotonicTime,
        devices: &OpenDeviceRegistry,
        streams: &StreamRegistry,
        dev_io: &dyn DevIoRunner,
    ) -> (Option<Duration>, usize) {
        let mut min_ts = now.plus(WAKE_CEILING);
        let mut contributors = 0usize;

        for dev in devices.list(Direction::Output) {
            for dev_stream in &dev.streams {
                if drain::skips_wake_contribution(streams, dev_stream.stream_id) {
                    continue;
                }
                if dev_stream.next_cb_ts < min_ts {
                    min_ts = dev_stream.next_cb_ts;
                }
                contributors += 1;
            }
            if dev.handle.should_wake() {
                if dev.handle.wake_ts() < min_ts {
                    min_ts = dev.handle.wake_ts();
                }
                contributors += 1;
            }
        }

        let input_devices = devices.list(Direction::Input);
        if !input_devices.is_empty() {
            let folded = dev_io.next_input_wake(input_devices, min_ts);
            if folded < min_ts {
                min_ts = folded;
            }
            contributors += 1;
        }

        if contributors == 0 {
            return (None, 0);
        }

        (Some(min_ts.saturating_duration_since(now)), contributors)
    }
}

impl Default for WakeScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// A source the pollfd set watches; kept alongside the `PollFd` it produced
/// so step 7/8 dispatch can tell a callback fd from the command fd.
enum Descriptor {
    Command(RawFd),
    Callback(RawFd),
    StreamWake(RawFd),
}

fn build_pollfd_vec(descriptors: &[Descriptor]) -> Vec<PollFd<'static>> {
    descriptors
        .iter()
        .map(|d| {
            let (fd, flags) = match d {
                Descriptor::Command(fd) => (*fd, PollFlags::POLLIN),
                Descriptor::Callback(fd) => (*fd, PollFlags::POLLIN | PollFlags::POLLOUT),
                Descriptor::StreamWake(fd) => (*fd, PollFlags::POLLIN),
            };
            // SAFETY: every fd here is owned by `AudioThread` or the
            // external collaborator and is guaranteed to outlive this single
            // `ppoll` call, which completes before the next iteration rebuilds
            // the set.
            let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
            PollFd::new(borrowed, flags)
        })
        .collect()
}

fn status_of(result: CoreResult<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => e.as_errno(),
    }
}
