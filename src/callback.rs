//! Callback registry (spec.md §4.5)
//!
//! External subsystems (client RPC fds, etc.) register an fd with a read or
//! write callback; the registry is consulted every scheduler iteration to
//! build the `pollfd` set and to dispatch ready entries.

use std::os::fd::RawFd;

use crate::error::CoreResult;

/// Which edge of an fd a callback watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoDirection {
    Read,
    Write,
}

/// A registered fd callback plus opaque user data, invoked when the fd is
/// ready in the direction it was registered for.
pub struct CallbackEntry {
    pub fd: RawFd,
    pub enabled: bool,
    pub direction: IoDirection,
    pub data: usize,
    callback: Box<dyn FnMut(RawFd, usize) + Send>,
}

/// Process-wide, append-only (except for explicit removal) list of fd
/// callbacks, de-duplicated by `(fd, data)`.
#[derive(Default)]
pub struct CallbackRegistry {
    entries: Vec<CallbackEntry>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. A duplicate `(fd, data)` pair is a no-op, per
    /// the de-duplication rule in spec.md §4.5.
    pub fn add(
        &mut self,
        fd: RawFd,
        direction: IoDirection,
        data: usize,
        callback: Box<dyn FnMut(RawFd, usize) + Send>,
    ) {
        if self.entries.iter().any(|e| e.fd == fd && e.data == data) {
            return;
        }
        self.entries.push(CallbackEntry {
            fd,
            enabled: true,
            direction,
            data,
            callback,
        });
    }

    /// `REMOVE_CALLBACK`: drop every entry for this fd.
    pub fn remove(&mut self, fd: RawFd) -> CoreResult<()> {
        self.entries.retain(|e| e.fd != fd);
        Ok(())
    }

    pub fn set_enabled(&mut self, fd: RawFd, enabled: bool) {
        for e in self.entries.iter_mut().filter(|e| e.fd == fd) {
            e.enabled = enabled;
        }
    }

    pub fn enabled_entries(&self) -> impl Iterator<Item = &CallbackEntry> {
        self.entries.iter().filter(|e| e.enabled)
    }

    /// Invoke the callback for `fd` if it is enabled.
    pub fn dispatch(&mut self, fd: RawFd) {
        for e in self.entries.iter_mut().filter(|e| e.enabled && e.fd == fd) {
            (e.callback)(e.fd, e.data);
        }
    }
}
