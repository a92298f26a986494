//! Encrypted JSON-RPC stack for the secured BLE channel.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                     RPC Stack                              │
//! │                                                            │
//! │  chunked writes ──▶ codec (AES-CFB + IV ledger)            │
//! │                        │ plaintext JSON                    │
//! │                        ▼                                   │
//! │                    envelope ──▶ router ──▶ handlers        │
//! │                        │ response                          │
//! │                        ▼                                   │
//! │                 codec ──▶ pump ──▶ notify frames           │
//! └────────────────────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod envelope;
pub mod pump;
pub mod router;
