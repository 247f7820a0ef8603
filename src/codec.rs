//! Message framing for the command pipe (spec.md §4.1)
//!
//! Every message begins with a fixed-width length prefix, followed by a
//! one-byte message-type tag and a type-specific payload. `LEN_PREFIX_WIDTH`
//! bytes are read first; the remaining `length - LEN_PREFIX_WIDTH` bytes are
//! read in one more call. `MAX_MESSAGE_SIZE` bounds the payload so a
//! corrupted or adversarial length prefix can't make the reader allocate
//! unbounded memory.

use crate::error::{CoreError, CoreResult};
use crate::pipe::PipeEnd;

/// Width, in bytes, of the length prefix itself.
pub const LEN_PREFIX_WIDTH: usize = 4;

/// Largest frame the codec will read; comfortably covers every command in
/// spec.md §4.1's table.
pub const MAX_MESSAGE_SIZE: usize = 256;

/// Write one complete frame: `[len:u32 LE][tag:u8][payload]`. `len` counts
/// the whole frame, including the four prefix bytes, so the reader's
/// `length - prefix_width` arithmetic lines up.
pub fn write_frame(pipe: &PipeEnd, tag: u8, payload: &[u8]) -> CoreResult<()> {
    let total = LEN_PREFIX_WIDTH + 1 + payload.len();
    if total > MAX_MESSAGE_SIZE {
        return Err(CoreError::MessageTooLarge(total));
    }
    let mut frame = Vec::with_capacity(total);
    frame.extend_from_slice(&(total as u32).to_le_bytes());
    frame.push(tag);
    frame.extend_from_slice(payload);
    pipe.write_all(&frame)
}

/// Read one complete frame, returning its tag and payload.
pub fn read_frame(pipe: &PipeEnd) -> CoreResult<(u8, Vec<u8>)> {
    let mut len_buf = [0u8; LEN_PREFIX_WIDTH];
    pipe.read_exact(&mut len_buf)?;
    let total = u32::from_le_bytes(len_buf) as usize;
    if total > MAX_MESSAGE_SIZE || total < LEN_PREFIX_WIDTH + 1 {
        return Err(CoreError::MessageTooLarge(total));
    }
    let mut rest = vec![0u8; total - LEN_PREFIX_WIDTH];
    pipe.read_exact(&mut rest)?;
    let tag = rest[0];
    let payload = rest[1..].to_vec();
    Ok((tag, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::Pipe;

    #[test]
    fn round_trips_tag_and_payload() {
        let pipe = Pipe::new().unwrap();
        write_frame(&pipe.writer, 7, &[1, 2, 3, 4]).unwrap();
        let (tag, payload) = read_frame(&pipe.reader).unwrap();
        assert_eq!(tag, 7);
        assert_eq!(payload, vec![1, 2, 3, 4]);
    }

    #[test]
    fn empty_payload_round_trips() {
        let pipe = Pipe::new().unwrap();
        write_frame(&pipe.writer, 1, &[]).unwrap();
        let (tag, payload) = read_frame(&pipe.reader).unwrap();
        assert_eq!(tag, 1);
        assert!(payload.is_empty());
    }

    #[test]
    fn oversized_payload_is_rejected_before_write() {
        let pipe = Pipe::new().unwrap();
        let huge = vec![0u8; MAX_MESSAGE_SIZE];
        let err = write_frame(&pipe.writer, 1, &huge).unwrap_err();
        assert!(matches!(err, CoreError::MessageTooLarge(_)));
    }
}
