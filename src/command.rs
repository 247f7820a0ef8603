//! Command channel: message tags, payloads, and the synchronous post/wait
//! protocol (spec.md §4.1)
//!
//! Every command named in spec.md's table is represented here. Payloads that
//! are plain integers round-trip through [`codec`] over the real to-thread
//! pipe, matching the wire protocol byte-for-byte. A handful of commands
//! (`ADD_OPEN_DEV`, `ADD_STREAM`, `CONFIG_GLOBAL_REMIX`, `DUMP_THREAD_INFO`)
//! carry a boxed trait object or a snapshot buffer that has no sensible wire
//! encoding; spec.md §9 itself calls this out ("pipe-as-mailbox... raw
//! pointers in messages are a same-process convenience"), so those payloads
//! travel through an in-process mailbox guarded by the same post/wait
//! discipline instead of being serialized.

use std::sync::Mutex;

use crate::debug::ThreadSnapshot;
use crate::device::{DeviceHandle, Direction, RampRequest};
use crate::error::{CoreError, CoreResult};
use crate::pipe::Pipe;
use crate::stream::StreamHandle;

/// One-byte wire tag identifying a command, in the same order as spec.md's
/// command table.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTag {
    AddOpenDev = 0,
    RmOpenDev = 1,
    IsDevOpen = 2,
    AddStream = 3,
    DisconnectStream = 4,
    DrainStream = 5,
    DevStartRamp = 6,
    ConfigGlobalRemix = 7,
    DumpThreadInfo = 8,
    AecDump = 9,
    RemoveCallback = 10,
    Stop = 11,
}

/// Marker trait swapped in by `CONFIG_GLOBAL_REMIX`; the core never calls
/// into it beyond holding and handing it back (spec.md §6).
pub trait RemixConverter: Send {}

/// Non-wire-safe payload for the handful of commands spec.md's own design
/// notes license as a same-process mailbox exchange rather than a byte
/// encoding.
pub enum MailboxPayload {
    AddOpenDev(Box<dyn DeviceHandle>),
    AddStream {
        stream: Box<dyn StreamHandle>,
        targets: Vec<(Direction, i32)>,
    },
    ConfigGlobalRemix(Option<Box<dyn RemixConverter>>),
    /// `DUMP_THREAD_INFO` carries no outbound payload; this is just the
    /// shape `post_mailbox` needs to select its mailbox/wake code path.
    DumpThreadInfoRequest,
    DumpThreadInfoResult(ThreadSnapshot),
    ConfigGlobalRemixResult(Option<Box<dyn RemixConverter>>),
}

/// A fully decoded command, ready for the worker loop to act on.
pub enum Command {
    AddOpenDev(Box<dyn DeviceHandle>),
    RmOpenDev { direction: Direction, index: i32 },
    IsDevOpen { direction: Direction, index: i32 },
    AddStream {
        stream: Box<dyn StreamHandle>,
        targets: Vec<(Direction, i32)>,
    },
    DisconnectStream { stream_id: u32, device: Option<(Direction, i32)> },
    DrainStream { stream_id: u32 },
    DevStartRamp { direction: Direction, index: i32, request: RampRequest },
    ConfigGlobalRemix(Option<Box<dyn RemixConverter>>),
    DumpThreadInfo,
    AecDump { stream_id: u32, start: bool, fd: i32 },
    RemoveCallback { fd: i32 },
    Stop,
}

/// The worker's reply to a posted command.
pub enum Response {
    /// Plain integer status/return value (spec.md's `0`/negative-errno/
    /// ms-remaining/0-or-1 returns all fit this shape).
    Status(i32),
    /// Displaced remix converter, returned by `CONFIG_GLOBAL_REMIX`.
    Remix(Option<Box<dyn RemixConverter>>),
    /// Filled-in debug snapshot, returned by `DUMP_THREAD_INFO`.
    Snapshot(ThreadSnapshot),
}

impl Response {
    pub fn status(&self) -> CoreResult<i32> {
        match self {
            Response::Status(v) => Ok(*v),
            _ => Err(CoreError::Collaborator(
                "response did not carry a status".into(),
            )),
        }
    }
}

/// Single-slot mailbox for non-wire-safe payloads. One command is ever in
/// flight at a time (spec.md §4.1's post-and-wait rule), so a `Mutex<Option<_>>`
/// is all the synchronization this needs; the to-thread/to-main pipes already
/// provide the ordering.
#[derive(Default)]
struct Mailbox {
    outbound: Mutex<Option<MailboxPayload>>,
    inbound: Mutex<Option<MailboxPayload>>,
}

/// Controller-side handle: the two pipe ends the controller writes/reads,
/// plus the mailbox shared with the worker thread.
pub struct CommandChannel {
    to_thread_writer: crate::pipe::PipeEnd,
    to_main_reader: crate::pipe::PipeEnd,
    mailbox: std::sync::Arc<Mailbox>,
}

/// Worker-side handle to the same pipes and mailbox, held by the thread
/// running the scheduler loop.
pub struct CommandChannelWorker {
    to_thread_reader: crate::pipe::PipeEnd,
    to_main_writer: crate::pipe::PipeEnd,
    mailbox: std::sync::Arc<Mailbox>,
}

impl CommandChannel {
    /// Build a connected controller/worker pair of command channels: the
    /// controller writes to-thread and reads to-main; the worker holds the
    /// opposite ends of the same two pipes.
    pub fn pair() -> CoreResult<(CommandChannel, CommandChannelWorker)> {
        let to_thread = Pipe::new()?;
        let to_main = Pipe::new()?;
        let mailbox = std::sync::Arc::new(Mailbox::default());
        Ok((
            CommandChannel {
                to_thread_writer: to_thread.writer,
                to_main_reader: to_main.reader,
                mailbox: mailbox.clone(),
            },
            CommandChannelWorker {
                to_thread_reader: to_thread.reader,
                to_main_writer: to_main.writer,
                mailbox,
            },
        ))
    }

    pub fn wake_fd(&self) -> std::os::fd::RawFd {
        self.to_thread_writer.raw_fd()
    }

    /// Post a plain integer-tagged command and block for its integer
    /// response, per spec.md §4.1's `post_message` rule.
    pub fn post_status(&self, tag: CommandTag, payload: &[u8]) -> CoreResult<i32> {
        crate::codec::write_frame(&self.to_thread_writer, tag as u8, payload)?;
        let (_tag, resp) = crate::codec::read_frame(&self.to_main_reader)?;
        if resp.len() < 4 {
            return Err(CoreError::Collaborator("short status response".into()));
        }
        Ok(i32::from_le_bytes(resp[..4].try_into().unwrap()))
    }

    /// Post a command whose payload is not wire-safe: stash it in the
    /// mailbox, wake the worker with a zero-length frame, then block for the
    /// worker's mailbox reply plus its integer/ack response.
    pub fn post_mailbox(&self, tag: CommandTag, payload: MailboxPayload) -> CoreResult<Response> {
        *self.mailbox.outbound.lock().unwrap() = Some(payload);
        crate::codec::write_frame(&self.to_thread_writer, tag as u8, &[])?;
        let (_tag, resp) = crate::codec::read_frame(&self.to_main_reader)?;
        let reply = self.mailbox.inbound.lock().unwrap().take();
        match reply {
            Some(MailboxPayload::DumpThreadInfoResult(snap)) => Ok(Response::Snapshot(snap)),
            Some(MailboxPayload::ConfigGlobalRemixResult(old)) => Ok(Response::Remix(old)),
            _ => {
                if resp.len() < 4 {
                    return Err(CoreError::Collaborator("short mailbox ack".into()));
                }
                Ok(Response::Status(i32::from_le_bytes(
                    resp[..4].try_into().unwrap(),
                )))
            }
        }
    }

    /// Convenience wrapper for `DUMP_THREAD_INFO`, which needs the mailbox's
    /// wake-and-wait path but carries no outbound payload of its own.
    pub fn dump_thread_info(&self) -> CoreResult<ThreadSnapshot> {
        match self.post_mailbox(CommandTag::DumpThreadInfo, MailboxPayload::DumpThreadInfoRequest)? {
            Response::Snapshot(snapshot) => Ok(snapshot),
            _ => Err(CoreError::Collaborator("expected a debug snapshot".into())),
        }
    }
}

impl CommandChannelWorker {
    pub fn command_fd(&self) -> std::os::fd::RawFd {
        self.to_thread_reader.raw_fd()
    }

    /// Receive exactly one command message, decoding mailbox payloads where
    /// the tag calls for them.
    pub fn recv(&self) -> CoreResult<Command> {
        let (tag, payload) = crate::codec::read_frame(&self.to_thread_reader)?;
        let tag = decode_tag(tag)?;
        match tag {
            CommandTag::AddOpenDev => match self.take_mailbox()? {
                MailboxPayload::AddOpenDev(handle) => Ok(Command::AddOpenDev(handle)),
                _ => Err(CoreError::Collaborator("mailbox/tag mismatch".into())),
            },
            CommandTag::RmOpenDev => {
                let (direction, index) = decode_dev_ref(&payload)?;
                Ok(Command::RmOpenDev { direction, index })
            }
            CommandTag::IsDevOpen => {
                let (direction, index) = decode_dev_ref(&payload)?;
                Ok(Command::IsDevOpen { direction, index })
            }
            CommandTag::AddStream => match self.take_mailbox()? {
                MailboxPayload::AddStream { stream, targets } => {
                    Ok(Command::AddStream { stream, targets })
                }
                _ => Err(CoreError::Collaborator("mailbox/tag mismatch".into())),
            },
            CommandTag::DisconnectStream => {
                if payload.len() < 4 {
                    return Err(CoreError::Collaborator("short DISCONNECT_STREAM".into()));
                }
                let stream_id = u32::from_le_bytes(payload[0..4].try_into().unwrap());
                let device = if payload.len() >= 9 {
                    let direction = decode_direction(payload[4])?;
                    let index = i32::from_le_bytes(payload[5..9].try_into().unwrap());
                    Some((direction, index))
                } else {
                    None
                };
                Ok(Command::DisconnectStream { stream_id, device })
            }
            CommandTag::DrainStream => {
                let stream_id = decode_u32(&payload)?;
                Ok(Command::DrainStream { stream_id })
            }
            CommandTag::DevStartRamp => {
                if payload.len() < 13 {
                    return Err(CoreError::Collaborator("short DEV_START_RAMP".into()));
                }
                let direction = decode_direction(payload[0])?;
                let index = i32::from_le_bytes(payload[1..5].try_into().unwrap());
                let target_gain = f32::from_le_bytes(payload[5..9].try_into().unwrap());
                let duration_frames = u32::from_le_bytes(payload[9..13].try_into().unwrap());
                Ok(Command::DevStartRamp {
                    direction,
                    index,
                    request: RampRequest {
                        target_gain,
                        duration_frames,
                    },
                })
            }
            CommandTag::ConfigGlobalRemix => match self.take_mailbox()? {
                MailboxPayload::ConfigGlobalRemix(new) => Ok(Command::ConfigGlobalRemix(new)),
                _ => Err(CoreError::Collaborator("mailbox/tag mismatch".into())),
            },
            CommandTag::DumpThreadInfo => Ok(Command::DumpThreadInfo),
            CommandTag::AecDump => {
                if payload.len() < 9 {
                    return Err(CoreError::Collaborator("short AEC_DUMP".into()));
                }
                let stream_id = u32::from_le_bytes(payload[0..4].try_into().unwrap());
                let start = payload[4] != 0;
                let fd = i32::from_le_bytes(payload[5..9].try_into().unwrap());
                Ok(Command::AecDump { stream_id, start, fd })
            }
            CommandTag::RemoveCallback => {
                let fd = decode_u32(&payload)? as i32;
                Ok(Command::RemoveCallback { fd })
            }
            CommandTag::Stop => Ok(Command::Stop),
        }
    }

    fn take_mailbox(&self) -> CoreResult<MailboxPayload> {
        self.mailbox
            .outbound
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| CoreError::Collaborator("mailbox empty for tagged command".into()))
    }

    /// Send a plain integer status response (every command except
    /// `DUMP_THREAD_INFO`/`CONFIG_GLOBAL_REMIX`, which also stash a mailbox
    /// reply first).
    pub fn reply_status(&self, status: i32) -> CoreResult<()> {
        crate::codec::write_frame(&self.to_main_writer, 0, &status.to_le_bytes())
    }

    pub fn reply_snapshot(&self, snapshot: ThreadSnapshot) -> CoreResult<()> {
        *self.mailbox.inbound.lock().unwrap() = Some(MailboxPayload::DumpThreadInfoResult(snapshot));
        self.reply_status(0)
    }

    pub fn reply_remix(&self, old: Option<Box<dyn RemixConverter>>) -> CoreResult<()> {
        *self.mailbox.inbound.lock().unwrap() = Some(MailboxPayload::ConfigGlobalRemixResult(old));
        self.reply_status(0)
    }
}

fn decode_tag(raw: u8) -> CoreResult<CommandTag> {
    Ok(match raw {
        0 => CommandTag::AddOpenDev,
        1 => CommandTag::RmOpenDev,
        2 => CommandTag::IsDevOpen,
        3 => CommandTag::AddStream,
        4 => CommandTag::DisconnectStream,
        5 => CommandTag::DrainStream,
        6 => CommandTag::DevStartRamp,
        7 => CommandTag::ConfigGlobalRemix,
        8 => CommandTag::DumpThreadInfo,
        9 => CommandTag::AecDump,
        10 => CommandTag::RemoveCallback,
        11 => CommandTag::Stop,
        other => return Err(CoreError::Collaborator(format!("unknown command tag {other}"))),
    })
}

fn decode_direction(raw: u8) -> CoreResult<Direction> {
    match raw {
        0 => Ok(Direction::Output),
        1 => Ok(Direction::Input),
        other => Err(CoreError::Collaborator(format!("unknown direction {other}"))),
    }
}

fn decode_dev_ref(payload: &[u8]) -> CoreResult<(Direction, i32)> {
    if payload.len() < 5 {
        return Err(CoreError::Collaborator("short device reference".into()));
    }
    let direction = decode_direction(payload[0])?;
    let index = i32::from_le_bytes(payload[1..5].try_into().unwrap());
    Ok((direction, index))
}

fn decode_u32(payload: &[u8]) -> CoreResult<u32> {
    if payload.len() < 4 {
        return Err(CoreError::Collaborator("short integer payload".into()));
    }
    Ok(u32::from_le_bytes(payload[0..4].try_into().unwrap()))
}

/// Encode a `(direction, index)` device reference the way [`decode_dev_ref`]
/// expects it, for controller-side callers of `post_status`.
pub fn encode_dev_ref(direction: Direction, index: i32) -> Vec<u8> {
    let mut out = Vec::with_capacity(5);
    out.push(match direction {
        Direction::Output => 0,
        Direction::Input => 1,
    });
    out.extend_from_slice(&index.to_le_bytes());
    out
}
