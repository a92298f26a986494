//! Offset-tagged chunking and reassembly.
//!
//! Every physical frame in either direction carries a 2-byte
//! little-endian header:
//!
//! ```text
//! ┌───────────────┬────────────────────────────┐
//! │ header (u16)  │ payload                    │
//! │ bit 15: final │ write: up to MTU           │
//! │ bits 0–14:    │ notify: up to 16 bytes     │
//! │   offset      │                            │
//! └───────────────┴────────────────────────────┘
//! ```
//!
//! Writes (client → hub) land in a [`WriteReassembly`] buffer; the hub
//! acks each accepted chunk by notifying the next expected offset, and
//! [`ACK_CONSUMED`] once the full message has been handed upstream.
//! Pushes (hub → client) use [`frame_message`], and handshake reads use
//! the offset/capacity window rule in [`read_window`].

extern crate alloc;
use alloc::vec::Vec;

use crate::error::{FramingError, Result};

/// Header bit marking the last chunk of a message.
pub const FINAL_FLAG: u16 = 0x8000;

/// Header bits carrying the payload offset.
pub const OFFSET_MASK: u16 = 0x7FFF;

/// Ack value notified once a complete message has been consumed.
pub const ACK_CONSUMED: u16 = 0xFFFF;

/// Payload bytes per pushed notify frame.
pub const NOTIFY_PAYLOAD: usize = 16;

// ── Write reassembly ─────────────────────────────────────────

/// Reassembly buffer for one writable characteristic.
///
/// Chunks may arrive out of order; completion requires the running
/// `expected_offset` to have reached the final chunk's end.  The check
/// is against the final end offset only, which accepts some reordered
/// interleavings a stricter contiguity rule would not — deployed
/// clients rely on the looser rule, so it stays.
pub struct WriteReassembly {
    buf: Vec<u8>,
    capacity: usize,
    expected_offset: usize,
    last_ack: u16,
}

impl WriteReassembly {
    pub fn new(capacity: usize) -> Self {
        let mut buf = Vec::new();
        buf.resize(capacity, 0);
        Self {
            buf,
            capacity,
            expected_offset: 0,
            last_ack: 0,
        }
    }

    /// Feed one physical write.
    ///
    /// Returns `Ok(Some(message))` when this chunk completes a message,
    /// `Ok(None)` when more chunks are expected.  Framing errors reject
    /// the chunk without touching accumulated state; whether that
    /// escalates to a session reset is the owning layer's call.
    pub fn accept_chunk(&mut self, frame: &[u8]) -> Result<Option<Vec<u8>>> {
        if frame.len() < 2 {
            return Err(FramingError::TruncatedHeader.into());
        }
        let header = u16::from_le_bytes([frame[0], frame[1]]);
        let final_chunk = header & FINAL_FLAG != 0;
        let offset = (header & OFFSET_MASK) as usize;
        let payload = &frame[2..];

        if offset >= self.capacity {
            return Err(FramingError::OffsetOutOfRange.into());
        }
        let end = offset + payload.len();
        if end > self.capacity {
            return Err(FramingError::Overflow.into());
        }

        self.buf[offset..end].copy_from_slice(payload);
        if offset == self.expected_offset {
            self.expected_offset = end;
        }

        if final_chunk && self.expected_offset == end {
            let len = self.expected_offset;
            self.expected_offset = 0;
            self.last_ack = ACK_CONSUMED;
            return Ok(Some(self.buf[..len].to_vec()));
        }

        self.last_ack = self.expected_offset as u16;
        Ok(None)
    }

    /// Value to notify back to the writer after the most recent chunk:
    /// the next expected offset, or [`ACK_CONSUMED`].
    pub fn pending_ack(&self) -> u16 {
        self.last_ack
    }

    /// Drop any partial message, e.g. on session reset.
    pub fn reset(&mut self) {
        self.expected_offset = 0;
        self.last_ack = 0;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ── Read windowing ───────────────────────────────────────────

/// Serve a bounded read of `source` at `offset`, at most `cap` bytes.
///
/// `offset >= source.len()` is an error so a confused client gets a
/// failure status instead of a silent empty read.
pub fn read_window(source: &[u8], offset: usize, cap: usize) -> Result<&[u8]> {
    if offset >= source.len() {
        return Err(FramingError::OffsetOutOfRange.into());
    }
    let end = source.len().min(offset + cap);
    Ok(&source[offset..end])
}

// ── Notify push framing ──────────────────────────────────────

/// Split `message` into notify frames of [`NOTIFY_PAYLOAD`] bytes, each
/// prefixed with the shared 2-byte header.  The receiver applies the
/// same reassembly rule as the write path.
pub fn frame_message(message: &[u8]) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    if message.is_empty() {
        frames.push(FINAL_FLAG.to_le_bytes().to_vec());
        return frames;
    }
    let mut offset = 0usize;
    while offset < message.len() {
        let end = message.len().min(offset + NOTIFY_PAYLOAD);
        let mut header = offset as u16;
        if end == message.len() {
            header |= FINAL_FLAG;
        }
        let mut frame = Vec::with_capacity(2 + (end - offset));
        frame.extend_from_slice(&header.to_le_bytes());
        frame.extend_from_slice(&message[offset..end]);
        frames.push(frame);
        offset = end;
    }
    frames
}

// ── Tests ────────────────────────────────────────────────────
