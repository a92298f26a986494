//! Application core — RPC method surface and collaborator boundaries.
//!
//! All interaction with the WiFi stack, the display service, and the
//! updater happens through the **port traits** defined in [`ports`],
//! keeping this layer fully testable without a radio or a display.

pub mod ports;
pub mod service;
