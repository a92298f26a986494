//! Integration suite driver.
//!
//! The whole suite runs on the host: the BLE dispatch layer, pairing
//! session, codec, router and handlers are all radio-independent, and
//! the WiFi station and updater come from the simulation adapters.

#![cfg(not(target_os = "espidf"))]

mod mock_ports;
mod pairing_flow_tests;
mod setup_service_tests;
