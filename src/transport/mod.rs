//! Chunked GATT transport.
//!
//! A single GATT write or notify moves at most a few dozen bytes, while
//! handshake and RPC payloads run to hundreds.  This module carries
//! logical messages across that gap in both directions with one shared
//! framing rule.

pub mod chunked;

pub use chunked::{
    ACK_CONSUMED, FINAL_FLAG, NOTIFY_PAYLOAD, OFFSET_MASK, WriteReassembly, frame_message,
    read_window,
};
