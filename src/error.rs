//! Unified error types for the setup firmware.
//!
//! A single `Error` enum that every subsystem converts into, keeping the
//! top-level supervision loop's error handling uniform.  All variants are
//! `Copy` so they can be passed through the pairing session and GATT
//! callbacks without allocation.  Low-level variants never leak onto the
//! wire: the RPC layer maps everything to its own error envelope and the
//! pairing session answers protocol violations with a reset, not a
//! diagnostic.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The peer violated the pairing or channel protocol.
    Protocol(ProtocolViolation),
    /// A cryptographic operation failed.
    Crypto(CryptoError),
    /// A chunked-transport frame was malformed.
    Framing(FramingError),
    /// Peripheral or subsystem initialisation failed.
    Init(&'static str),
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(e) => write!(f, "protocol: {e}"),
            Self::Crypto(e) => write!(f, "crypto: {e}"),
            Self::Framing(e) => write!(f, "framing: {e}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl core::error::Error for Error {}

// ---------------------------------------------------------------------------
// Protocol violations
// ---------------------------------------------------------------------------

/// Peer behaviour that forces a session reset.  These carry no peer-visible
/// detail on purpose: an unauthenticated client learns nothing beyond the
/// fact that it must start over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// A characteristic was written in a state that does not accept it.
    WrongState,
    /// The client's SRP public value was zero mod N.
    DegenerateClientKey,
    /// The client's SRP proof did not match.
    ProofMismatch,
    /// An encrypted message carried a replayed or out-of-window IV.
    IvViolation,
    /// Pair-intent writes arrived faster than the rate limiter allows.
    RateLimited,
}

impl fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongState => write!(f, "write in wrong state"),
            Self::DegenerateClientKey => write!(f, "degenerate client public value"),
            Self::ProofMismatch => write!(f, "client proof mismatch"),
            Self::IvViolation => write!(f, "IV replay or out of window"),
            Self::RateLimited => write!(f, "intent rate limited"),
        }
    }
}

impl From<ProtocolViolation> for Error {
    fn from(e: ProtocolViolation) -> Self {
        Self::Protocol(e)
    }
}

// ---------------------------------------------------------------------------
// Crypto errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// Ciphertext shorter than one AES block.
    ShortCiphertext,
    /// No session key has been negotiated yet.
    NoSessionKey,
    /// The platform RNG failed.
    RandomUnavailable,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShortCiphertext => write!(f, "ciphertext shorter than one block"),
            Self::NoSessionKey => write!(f, "no session key"),
            Self::RandomUnavailable => write!(f, "platform RNG unavailable"),
        }
    }
}

impl From<CryptoError> for Error {
    fn from(e: CryptoError) -> Self {
        Self::Crypto(e)
    }
}

// ---------------------------------------------------------------------------
// Framing errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingError {
    /// Chunk shorter than its 2-byte header.
    TruncatedHeader,
    /// Chunk offset does not continue the message being assembled.
    UnexpectedOffset,
    /// Read offset at or past the end of the pending payload.
    OffsetOutOfRange,
    /// Reassembled message would exceed the buffer capacity.
    Overflow,
}

impl fmt::Display for FramingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TruncatedHeader => write!(f, "chunk shorter than header"),
            Self::UnexpectedOffset => write!(f, "unexpected chunk offset"),
            Self::OffsetOutOfRange => write!(f, "read offset out of range"),
            Self::Overflow => write!(f, "message exceeds buffer capacity"),
        }
    }
}

impl From<FramingError> for Error {
    fn from(e: FramingError) -> Self {
        Self::Framing(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
