//! Lifecycle: create/start/stop/destroy (spec.md §4.8)
//!
//! `AudioThread` is the controller-side handle. The worker thread owns every
//! piece of scheduler state exclusively once `start` hands it over (spec.md
//! §5): no other thread touches the open-device registry, stream registry,
//! callback registry, pollfd set, remix converter, or event log again.

use std::thread::JoinHandle;

use crate::callback::CallbackRegistry;
use crate::collab::{DevIoRunner, NullDevIoRunner, NullRealtimeMonitor, RealtimeMonitor};
use crate::command::{CommandChannel, CommandChannelWorker, CommandTag, RemixConverter};
use crate::device::OpenDeviceRegistry;
use crate::error::{CoreError, CoreResult};
use crate::eventlog::EventLog;
use crate::scheduler::WakeScheduler;
use crate::stream::StreamRegistry;

/// Controller-side handle to the audio I/O thread.
pub struct AudioThread {
    controller: CommandChannel,
    worker: Option<CommandChannelWorker>,
    join_handle: Option<JoinHandle<()>>,
    started: bool,
}

impl AudioThread {
    /// `create`: open both pipes and initialize the command channel. The
    /// worker thread itself, and everything it owns, is not spawned until
    /// [`AudioThread::start`].
    pub fn create() -> CoreResult<Self> {
        let (controller, worker) = CommandChannel::pair()?;
        Ok(AudioThread {
            controller,
            worker: Some(worker),
            join_handle: None,
            started: false,
        })
    }

    /// `start`: spawn the worker thread running the scheduler loop with the
    /// given device-I/O and realtime-monitor collaborators. Uses no-op
    /// collaborators if `None` is passed, for callers that only care about
    /// command-channel and registry behavior (spec.md §6).
    pub fn start(
        &mut self,
        dev_io: Option<Box<dyn DevIoRunner>>,
        monitor: Option<Box<dyn RealtimeMonitor>>,
    ) -> CoreResult<()> {
        if self.started {
            return Ok(());
        }
        let worker = self
            .worker
            .take()
            .ok_or_else(|| CoreError::Collaborator("start called after worker handed off".into()))?;
        let dev_io = dev_io.unwrap_or_else(|| Box::new(NullDevIoRunner));
        let monitor = monitor.unwrap_or_else(|| Box::new(NullRealtimeMonitor));

        let handle = std::thread::Builder::new()
            .name("audio-io".into())
            .spawn(move || {
                maybe_raise_realtime_priority();
                run_worker_loop(worker, dev_io, monitor);
            })
            .map_err(CoreError::Io)?;

        self.join_handle = Some(handle);
        self.started = true;
        Ok(())
    }

    /// Access to the command channel for posting commands.
    pub fn commands(&self) -> &CommandChannel {
        &self.controller
    }

    /// `destroy`: if started, post STOP and join the worker. Idempotent.
    pub fn stop(&mut self) -> CoreResult<()> {
        if !self.started {
            return Ok(());
        }
        self.controller.post_status(CommandTag::Stop, &[])?;
        if let Some(handle) = self.join_handle.take() {
            handle
                .join()
                .map_err(|_| CoreError::Collaborator("audio worker thread panicked".into()))?;
        }
        self.started = false;
        Ok(())
    }
}

impl Drop for AudioThread {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("error stopping audio thread on drop: {e}");
        }
    }
}

/// The worker thread's body: owns every piece of scheduler state and loops
/// `run_iteration` until `STOP` is processed or a fatal pipe error occurs
/// (spec.md §5 "Error propagation").
fn run_worker_loop(
    worker: CommandChannelWorker,
    mut dev_io: Box<dyn DevIoRunner>,
    monitor: Box<dyn RealtimeMonitor>,
) {
    let mut devices = OpenDeviceRegistry::new();
    let mut streams = StreamRegistry::new();
    let mut callbacks = CallbackRegistry::new();
    let mut remix: Option<Box<dyn RemixConverter>> = None;
    let mut event_log = EventLog::new();
    let mut scheduler = WakeScheduler::new();

    loop {
        let report = scheduler.run_iteration(
            &worker,
            &mut devices,
            &mut streams,
            &mut callbacks,
            &mut remix,
            dev_io.as_mut(),
            monitor.as_ref(),
            &mut event_log,
            now_micros,
        );
        match report {
            Ok(report) if report.stop_requested => break,
            Ok(_) => continue,
            Err(e) => {
                log::error!("audio worker: fatal pipe error, exiting: {e}");
                break;
            }
        }
    }
}

fn now_micros() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Best-effort `SCHED_FIFO` for the calling thread. Only compiled in when
/// the `rt-priority` feature is enabled (most deployments lack
/// `CAP_SYS_NICE`); failure here is deliberately swallowed, matching spec.md
/// §4.8's "failure is non-fatal".
#[cfg(feature = "rt-priority")]
fn maybe_raise_realtime_priority() {
    unsafe {
        let params = libc::sched_param {
            sched_priority: libc::sched_get_priority_max(libc::SCHED_FIFO),
        };
        if libc::sched_setscheduler(0, libc::SCHED_FIFO, &params) != 0 {
            log::warn!(
                "failed to raise audio worker to SCHED_FIFO: {}",
                std::io::Error::last_os_error()
            );
        }
    }
}

#[cfg(not(feature = "rt-priority"))]
fn maybe_raise_realtime_priority() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_start_stop_round_trips() {
        let mut thread = AudioThread::create().unwrap();
        thread.start(None, None).unwrap();
        thread.stop().unwrap();
    }

    #[test]
    fn stop_before_start_is_a_no_op() {
        let mut thread = AudioThread::create().unwrap();
        thread.stop().unwrap();
    }

    #[test]
    fn add_open_dev_round_trips_through_running_thread() {
        use crate::command::MailboxPayload;
        use crate::test_support::FakeDevice;

        let mut thread = AudioThread::create().unwrap();
        thread.start(None, None).unwrap();

        let resp = thread
            .commands()
            .post_mailbox(
                CommandTag::AddOpenDev,
                MailboxPayload::AddOpenDev(Box::new(FakeDevice::output(1))),
            )
            .unwrap();
        assert_eq!(resp.status().unwrap(), 0);

        let is_open = thread
            .commands()
            .post_status(
                CommandTag::IsDevOpen,
                &crate::command::encode_dev_ref(crate::device::Direction::Output, 1),
            )
            .unwrap();
        assert_eq!(is_open, 1);

        thread.stop().unwrap();
    }
}
