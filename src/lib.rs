//! `iodev-thread`: a realtime audio I/O scheduler.
//!
//! A single dedicated thread ([`thread::AudioThread`]) multiplexes open
//! playback/capture devices against client audio streams using `ppoll` as
//! its sole blocking point. Sample mixing, rate/format conversion, AEC/APM,
//! device drivers, shared-memory buffers, and the IPC/RPC layer are all
//! external collaborators reached only through the traits in [`device`] and
//! [`stream`] — this crate is the scheduling core, not the audio pipeline.

pub mod attach;
pub mod callback;
pub mod codec;
pub mod collab;
pub mod command;
pub mod debug;
pub mod device;
pub mod drain;
pub mod error;
pub mod eventlog;
pub mod pipe;
pub mod scheduler;
pub mod stream;
pub mod thread;
pub mod time;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use command::{Command, CommandChannel, CommandTag, RemixConverter, Response};
pub use debug::ThreadSnapshot;
pub use device::{DeviceFormat, DeviceHandle, Direction, RampRequest};
pub use error::{CoreError, CoreResult};
pub use stream::StreamHandle;
pub use thread::AudioThread;
