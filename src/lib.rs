//! Sphere hub setup firmware library.
//!
//! A secured RPC channel over BLE GATT for pairing a mobile client with
//! a headless hub and provisioning its WiFi:
//!
//! ```text
//!  GATT writes ──▶ transport (chunk reassembly)
//!                      │
//!                      ▼
//!                  pairing (one-time code · SRP-6a · session state)
//!                      │ session key
//!                      ▼
//!                  rpc (AES-256-CFB codec · JSON-RPC router · pump)
//!                      │ port traits
//!                      ▼
//!                  app (setup service handlers) ──▶ adapters
//! ```
//!
//! Exposes the pure-logic modules for integration testing and external
//! inspection. All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod config;
pub mod error;
pub mod pairing;
pub mod rpc;
pub mod transport;

mod esp_link_shims;
