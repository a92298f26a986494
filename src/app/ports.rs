//! Port traits — the hexagonal boundary between the protocol core and
//! the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ RPC handlers / pairing session
//! ```
//!
//! Driven adapters (WiFi stack, display service, updater, storage)
//! implement these traits.  The protocol core consumes them as trait
//! objects, so it never touches ESP-IDF APIs directly and every handler
//! is exercisable against the in-memory mocks on a host target.

extern crate alloc;
use alloc::string::String;
use alloc::vec::Vec;

use std::sync::mpsc;

use crate::config::SetupConfig;

// ───────────────────────────────────────────────────────────────
// WiFi station port (domain → network stack)
// ───────────────────────────────────────────────────────────────

/// One network found by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleNetwork {
    pub ssid: String,
    /// Signal strength in dBm.
    pub rssi: i8,
    pub secured: bool,
}

/// Link-state events produced by the station after credentials are
/// applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
    /// Authentication failed — the supplied key is wrong.
    InvalidKey,
}

/// The hub's WiFi station, as seen by the provisioning handlers.
pub trait WifiStation: Send + Sync {
    /// Scan for visible networks.  Blocking, bounded by the driver.
    fn scan(&self) -> Result<Vec<VisibleNetwork>, WifiError>;

    /// Forget every configured network so a failed candidate cannot
    /// keep retrying in the background during setup.
    fn disable_all_networks(&self) -> Result<(), WifiError>;

    /// Apply `ssid`/`key` and begin associating.  Completion arrives
    /// through [`WifiStation::watch_link_state`].
    fn apply_credentials(&self, ssid: &str, key: &str) -> Result<(), WifiError>;

    /// Subscribe to link-state events.  Each call returns an
    /// independent receiver; events are fanned out to all of them.
    fn watch_link_state(&self) -> mpsc::Receiver<LinkState>;

    /// Hub serial number, reported to the client on a successful
    /// connect so it can find the hub on the LAN afterwards.
    fn serial_number(&self) -> String;

    /// Mark provisioning as confirmed by the client.
    fn acknowledge_connected(&self) -> Result<(), WifiError>;
}

// ───────────────────────────────────────────────────────────────
// Pairing UI port (domain → presentation subsystem)
// ───────────────────────────────────────────────────────────────

/// User-facing feedback surface.  One capability interface; the
/// concrete backend (console log, LED panel forwarder) is chosen at
/// startup from the operating mode.
pub trait PairingUi: Send + Sync {
    /// Informational colour hint written by the client pre-pairing.
    fn show_color_hint(&self, rgb: [u8; 3]);

    /// Display the freshly generated pairing code out-of-band.
    fn show_pairing_code(&self, code: &str);

    /// Show a named status icon (`wifi-connecting.gif` etc.).
    fn show_icon(&self, name: &str);

    /// Hand the display over to the client ("control" mode).
    fn enable_control(&self) -> Result<(), UiError>;

    fn disable_control(&self) -> Result<(), UiError>;

    /// Factory-reset attract screen.
    fn show_reset_mode(&self);

    /// Switch the display to client-driven drawing mode.
    fn display_drawing(&self) -> Result<(), UiError>;

    /// Forward raw drawing commands to the display service.
    fn draw(&self, commands: &[serde_json::Value]) -> Result<(), UiError>;
}

// ───────────────────────────────────────────────────────────────
// Update subsystem port (domain → updater)
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateProgress {
    pub running: bool,
    pub percent: u8,
    pub description: String,
}

/// Thin client over the external updater process.
pub trait UpdateService: Send + Sync {
    /// Kick off an update check/install.
    fn start(&self) -> Result<(), UpdateError>;

    /// Latest cached progress report.
    fn progress(&self) -> UpdateProgress;
}

// ───────────────────────────────────────────────────────────────
// Configuration port (domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists the setup configuration and the last applied
/// wireless credentials.
pub trait ConfigStore {
    /// Returns [`SetupConfig::default`] when nothing is stored yet.
    fn load(&self) -> Result<SetupConfig, StorageError>;

    fn save(&mut self, config: &SetupConfig) -> Result<(), StorageError>;

    fn save_credentials(&mut self, ssid: &str, key: &str) -> Result<(), StorageError>;

    fn load_credentials(&self) -> Result<Option<(String, String)>, StorageError>;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiError {
    /// The driver rejected the operation or timed out internally.
    DriverFailed,
    /// Scan attempted while the interface is down.
    InterfaceDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiError {
    /// The display service did not answer within its deadline.
    Timeout,
    /// The display service rejected the call.
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateError {
    /// The updater refused to start (already running, or unreachable).
    NotAccepted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    NotFound,
    /// Stored blob failed deserialization.
    Corrupted,
    Full,
    IoError,
}

impl core::fmt::Display for WifiError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::DriverFailed => write!(f, "wifi driver failed"),
            Self::InterfaceDown => write!(f, "wifi interface down"),
        }
    }
}

impl core::fmt::Display for UiError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Timeout => write!(f, "display service timeout"),
            Self::Rejected => write!(f, "display service rejected call"),
        }
    }
}

impl core::fmt::Display for UpdateError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotAccepted => write!(f, "updater refused to start"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Corrupted => write!(f, "stored blob corrupted"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}
