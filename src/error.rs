//! Error types for the audio I/O thread
//!
//! Mirrors the POSIX-flavored status codes the command channel returns on
//! the wire (spec.md §7): every command handler resolves to one of these
//! before it is collapsed to an `i32` errno for the response pipe.

use thiserror::Error;

/// Errors raised by the scheduler, registry, and attach/detach logic.
#[derive(Error, Debug)]
pub enum CoreError {
    /// `ADD_OPEN_DEV` on a device already present in the registry.
    #[error("device already open: {0}")]
    AlreadyOpen(i32),

    /// Device or stream absent from the relevant list.
    #[error("unknown device or stream: {0}")]
    NotFound(i32),

    /// Allocation or dev-stream creation failed during attach.
    #[error("out of memory creating dev-stream")]
    NoMemory,

    /// Pipe read/write failure, including EOF on a command read.
    #[error("pipe I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A message exceeded the maximum frame size (§4.1).
    #[error("message too large: {0} bytes")]
    MessageTooLarge(usize),

    /// A collaborator (device/stream handle) returned failure.
    #[error("collaborator call failed: {0}")]
    Collaborator(String),
}

impl CoreError {
    /// Collapse to the negative errno the command channel writes back.
    pub fn as_errno(&self) -> i32 {
        match self {
            CoreError::AlreadyOpen(_) => -libc_eexist(),
            CoreError::NotFound(_) => -libc_einval(),
            CoreError::NoMemory => -libc_enomem(),
            CoreError::Io(_) => -libc_epipe(),
            CoreError::MessageTooLarge(_) => -libc_enomem(),
            CoreError::Collaborator(_) => -libc_einval(),
        }
    }
}

/// Crate-local result alias, mirroring the teacher's `AudioResult<T>`.
pub type CoreResult<T> = Result<T, CoreError>;

// Small local constants so this crate does not need a direct `libc` dependency
// just for four errno values; values match Linux/POSIX.
fn libc_eexist() -> i32 {
    17
}
fn libc_einval() -> i32 {
    22
}
fn libc_enomem() -> i32 {
    12
}
fn libc_epipe() -> i32 {
    32
}
