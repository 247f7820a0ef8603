//! Blocking OS pipe with EINTR-transparent, short-read/write-safe I/O
//!
//! Both the to-thread and to-main pipes (spec.md §4.1) are plain
//! `pipe(2)` pairs; the only thing this wrapper adds over raw `nix::unistd`
//! calls is retrying on `EINTR` and turning a zero-byte read into the fatal
//! `-EPIPE` the spec calls for.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::unistd;

use crate::error::{CoreError, CoreResult};

/// One direction of a pipe: the end this side reads, and the end it writes.
/// The command channel owns two of these (to-thread, to-main); each side of
/// the channel holds the opposite ends.
pub struct PipeEnd {
    fd: OwnedFd,
}

impl PipeEnd {
    fn new(fd: OwnedFd) -> Self {
        PipeEnd { fd }
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Read exactly `buf.len()` bytes, retrying on `EINTR` and on short reads.
    /// A zero-byte read (writer closed) is reported as [`CoreError::Io`]
    /// wrapping `EPIPE`, matching spec.md §4.1's "zero-byte read is a fatal
    /// -EPIPE".
    pub fn read_exact(&self, buf: &mut [u8]) -> CoreResult<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match unistd::read(&self.fd, &mut buf[filled..]) {
                Ok(0) => {
                    return Err(CoreError::Io(std::io::Error::from_raw_os_error(
                        Errno::EPIPE as i32,
                    )))
                }
                Ok(n) => filled += n,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(CoreError::Io(std::io::Error::from(e))),
            }
        }
        Ok(())
    }

    /// Write the whole buffer, retrying on `EINTR` and on short writes.
    pub fn write_all(&self, buf: &[u8]) -> CoreResult<()> {
        let mut sent = 0;
        while sent < buf.len() {
            match unistd::write(&self.fd, &buf[sent..]) {
                Ok(n) => sent += n,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(CoreError::Io(std::io::Error::from(e))),
            }
        }
        Ok(())
    }
}

/// A pipe pair: `reader` is the end you poll/read, `writer` is the end the
/// other side writes to wake you up.
pub struct Pipe {
    pub reader: PipeEnd,
    pub writer: PipeEnd,
}

impl Pipe {
    pub fn new() -> CoreResult<Self> {
        let (read_fd, write_fd) = unistd::pipe().map_err(|e| CoreError::Io(e.into()))?;
        Ok(Pipe {
            reader: PipeEnd::new(read_fd),
            writer: PipeEnd::new(write_fd),
        })
    }
}
