//! Pairing UI backends.
//!
//! Two implementations of [`PairingUi`], chosen at startup from the
//! operating mode:
//!
//! - [`ConsolePairingUi`] — writes everything to the logger.  Used on
//!   hubs without a display and in factory-reset mode, where the code
//!   is read off the serial console.
//! - [`LedPanelUi`] — forwards each call as a JSON-RPC notification to
//!   the display service over a local socket.

extern crate alloc;
use alloc::string::String;

use std::io::Write as _;
use std::net::TcpStream;
use std::sync::Mutex;

use log::{info, warn};
use serde_json::{Value, json};

use crate::app::ports::{PairingUi, UiError};

// ───────────────────────────────────────────────────────────────
// Console backend
// ───────────────────────────────────────────────────────────────

/// Logs every UI event to the serial console.
pub struct ConsolePairingUi;

impl ConsolePairingUi {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ConsolePairingUi {
    fn default() -> Self {
        Self::new()
    }
}

impl PairingUi for ConsolePairingUi {
    fn show_color_hint(&self, rgb: [u8; 3]) {
        info!("UI | colour hint #{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2]);
    }

    fn show_pairing_code(&self, code: &str) {
        // The code is the only secret the user carries to the app.
        info!("UI | ==============================");
        info!("UI |     PAIRING CODE: {code}");
        info!("UI | ==============================");
    }

    fn show_icon(&self, name: &str) {
        info!("UI | icon {name}");
    }

    fn enable_control(&self) -> Result<(), UiError> {
        info!("UI | control mode enabled");
        Ok(())
    }

    fn disable_control(&self) -> Result<(), UiError> {
        info!("UI | control mode disabled");
        Ok(())
    }

    fn show_reset_mode(&self) {
        info!("UI | factory reset mode");
    }

    fn display_drawing(&self) -> Result<(), UiError> {
        info!("UI | drawing mode");
        Ok(())
    }

    fn draw(&self, commands: &[Value]) -> Result<(), UiError> {
        info!("UI | draw ({} commands)", commands.len());
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Display-service backend
// ───────────────────────────────────────────────────────────────

/// Forwards UI calls to the display service as newline-delimited
/// JSON-RPC notifications.  The connection is opened lazily and
/// reopened once after a write failure.
pub struct LedPanelUi {
    address: String,
    stream: Mutex<Option<TcpStream>>,
}

impl LedPanelUi {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.into(),
            stream: Mutex::new(None),
        }
    }

    fn notify(&self, method: &str, params: Value) -> Result<(), UiError> {
        let line = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        let mut payload = line.to_string();
        payload.push('\n');

        let mut guard = self.stream.lock().map_err(|_| UiError::Rejected)?;
        for attempt in 0..2 {
            if guard.is_none() {
                match TcpStream::connect(&self.address) {
                    Ok(s) => *guard = Some(s),
                    Err(e) => {
                        warn!("ui: display service unreachable at {}: {e}", self.address);
                        return Err(UiError::Timeout);
                    }
                }
            }
            if let Some(stream) = guard.as_mut() {
                match stream.write_all(payload.as_bytes()) {
                    Ok(()) => return Ok(()),
                    Err(e) => {
                        // Stale socket from a restarted display service.
                        if attempt == 0 {
                            *guard = None;
                        } else {
                            warn!("ui: write to display service failed: {e}");
                        }
                    }
                }
            }
        }
        Err(UiError::Rejected)
    }

    fn notify_logged(&self, method: &str, params: Value) {
        if self.notify(method, params).is_err() {
            warn!("ui: dropped {method} notification");
        }
    }
}

impl PairingUi for LedPanelUi {
    fn show_color_hint(&self, rgb: [u8; 3]) {
        self.notify_logged("showColor", json!([{ "r": rgb[0], "g": rgb[1], "b": rgb[2] }]));
    }

    fn show_pairing_code(&self, code: &str) {
        self.notify_logged("showPairingCode", json!([code]));
    }

    fn show_icon(&self, name: &str) {
        self.notify_logged("showIcon", json!([name]));
    }

    fn enable_control(&self) -> Result<(), UiError> {
        self.notify("enableControl", json!([]))
    }

    fn disable_control(&self) -> Result<(), UiError> {
        self.notify("disableControl", json!([]))
    }

    fn show_reset_mode(&self) {
        self.notify_logged("showResetMode", json!([]));
    }

    fn display_drawing(&self) -> Result<(), UiError> {
        self.notify("displayDrawing", json!([]))
    }

    fn draw(&self, commands: &[Value]) -> Result<(), UiError> {
        self.notify("draw", json!(commands))
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
