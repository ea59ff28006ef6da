//! Message framing
//!
//! Every message in a FIFO is a 4-byte header followed by the payload:
//!
//! ```text
//! byte:  0        1          2..3
//!        L2 id    reserved   payload length (u16, little endian)
//! ```
//!
//! Read as one little-endian word the header is `(length << 16) | l2`.
//! The layout is shared with modem firmware and must not change.

use static_assertions::const_assert;

use crate::channel::Channel;
use crate::fifo::{FifoReader, FifoWriter, PendingFrame};
use crate::{Result, ShrmError};

/// Size of the frame header in bytes
pub const HEADER_LEN: usize = 4;

/// Largest payload the length field can describe
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

const_assert!(HEADER_LEN == core::mem::size_of::<u32>());

/// Frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub l2: u8,
    pub length: u16,
}

impl MessageHeader {
    pub fn new(l2: u8, length: usize) -> Result<Self> {
        let length = u16::try_from(length).map_err(|_| ShrmError::PayloadTooLarge {
            len: length,
            max: MAX_PAYLOAD,
        })?;
        Ok(Self { l2, length })
    }

    pub fn word(&self) -> u32 {
        (u32::from(self.length) << 16) | u32::from(self.l2)
    }

    pub fn from_word(word: u32) -> Self {
        Self {
            l2: (word & 0xFF) as u8,
            length: (word >> 16) as u16,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        self.word().to_le_bytes()
    }

    pub fn decode(bytes: [u8; HEADER_LEN]) -> Self {
        Self::from_word(u32::from_le_bytes(bytes))
    }

    /// Header plus payload
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + usize::from(self.length)
    }
}

/// A message taken out of a FIFO
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub l2: u8,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn channel(&self) -> Result<Channel> {
        Channel::try_from(self.l2)
    }

    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }
}

/// Serialize a message into a standalone byte sequence
pub fn frame_message(l2: u8, payload: &[u8]) -> Result<Vec<u8>> {
    let header = MessageHeader::new(l2, payload.len())?;
    let mut frame = Vec::with_capacity(header.frame_len());
    frame.extend_from_slice(&header.encode());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Copy a complete frame into `writer`
///
/// Space for the whole frame is checked before the first byte is copied,
/// so on error nothing has been written. The returned frame still has to
/// be committed.
pub fn write_message(writer: &mut FifoWriter, l2: u8, payload: &[u8]) -> Result<PendingFrame> {
    let header = MessageHeader::new(l2, payload.len())?;
    let needed = header.frame_len();
    let max = writer.capacity() - 1;
    if needed > max {
        return Err(ShrmError::PayloadTooLarge {
            len: payload.len(),
            max: max - HEADER_LEN,
        });
    }

    writer.ensure_space(needed)?;
    writer.write(&header.encode())?;
    writer.write(payload)?;
    Ok(writer.seal(needed))
}

/// Look at the next frame header without consuming it
///
/// Returns `None` while no complete header has been published.
pub fn peek_header(reader: &mut FifoReader) -> Result<Option<MessageHeader>> {
    reader.sync_remote();
    if reader.available_to_read() < HEADER_LEN {
        return Ok(None);
    }
    let mut raw = [0u8; HEADER_LEN];
    reader.peek_into(&mut raw)?;
    let header = MessageHeader::decode(raw);
    if header.frame_len() > reader.capacity() - 1 {
        return Err(ShrmError::CorruptFrame {
            fifo: reader.id(),
            header: header.word(),
        });
    }
    Ok(Some(header))
}

/// Consume the next complete message
///
/// Handles headers and payloads that straddle the end of the FIFO. The
/// read pointer is not committed. Returns `None` while the frame is not
/// fully published.
pub fn read_one_message(reader: &mut FifoReader) -> Result<Option<Message>> {
    let header = match peek_header(reader)? {
        Some(header) => header,
        None => return Ok(None),
    };
    if reader.available_to_read() < header.frame_len() {
        return Ok(None);
    }

    let mut raw = [0u8; HEADER_LEN];
    reader.read_into(&mut raw)?;
    let payload = reader.read(usize::from(header.length))?;
    Ok(Some(Message {
        l2: header.l2,
        payload,
    }))
}

/// Whether a frame of `frame_len` bytes is everything left to read
///
/// Used to batch read notifications: only the last message of a burst
/// needs to tell the producer that space was freed.
pub fn is_the_only_unread_message(reader: &FifoReader, frame_len: usize) -> bool {
    reader.available_to_read() == frame_len
}
