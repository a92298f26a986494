//! WiFi station adapter.
//!
//! Implements [`WifiStation`] — the boundary the provisioning handlers
//! talk to.  Association runs asynchronously: `apply_credentials`
//! returns as soon as the attempt starts and the outcome arrives on the
//! link-state stream, fanned out to every watcher.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: real ESP-IDF WiFi driver calls via
//!   `esp_idf_svc::wifi`.
//! - **all other targets**: a scripted simulation for host-side tests —
//!   known SSID + right key connects, known SSID + wrong key raises
//!   `InvalidKey`, unknown SSID stays silent so callers exercise their
//!   bounded waits.

extern crate alloc;
use alloc::string::String;
use alloc::vec::Vec;

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, mpsc};

use log::{info, warn};

use crate::app::ports::{LinkState, VisibleNetwork, WifiError, WifiStation};

// ───────────────────────────────────────────────────────────────
// Credential validation
// ───────────────────────────────────────────────────────────────

/// Printable ASCII only (0x20..=0x7E); control bytes in an SSID are a
/// sign of a mangled request, not a real network.
fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

fn valid_ssid(ssid: &str) -> bool {
    !ssid.is_empty() && ssid.len() <= 32 && is_printable_ascii(ssid)
}

/// WPA2 keys are 8–64 bytes; empty means an open network.
fn plausible_key(key: &str) -> bool {
    key.is_empty() || (8..=64).contains(&key.len())
}

// ───────────────────────────────────────────────────────────────
// Watcher fan-out
// ───────────────────────────────────────────────────────────────

struct Watchers {
    senders: Mutex<Vec<mpsc::Sender<LinkState>>>,
}

impl Watchers {
    fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }

    fn subscribe(&self) -> mpsc::Receiver<LinkState> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut senders) = self.senders.lock() {
            senders.push(tx);
        }
        rx
    }

    /// Deliver to every live watcher, dropping the dead ones.
    fn broadcast(&self, event: LinkState) {
        if let Ok(mut senders) = self.senders.lock() {
            senders.retain(|tx| tx.send(event).is_ok());
        }
    }
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF adapter
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
mod platform {
    use super::*;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::wifi::{
        AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi,
    };
    use std::sync::Arc;

    pub struct WifiAdapter {
        driver: Arc<Mutex<BlockingWifi<EspWifi<'static>>>>,
        watchers: Arc<Watchers>,
        serial: String,
        acked: AtomicBool,
    }

    impl WifiAdapter {
        pub fn new(
            wifi: EspWifi<'static>,
            sysloop: EspSystemEventLoop,
            serial: String,
        ) -> crate::error::Result<Self> {
            let blocking = BlockingWifi::wrap(wifi, sysloop)
                .map_err(|_| crate::error::Error::Init("wifi driver wrap failed"))?;
            Ok(Self {
                driver: Arc::new(Mutex::new(blocking)),
                watchers: Arc::new(Watchers::new()),
                serial,
                acked: AtomicBool::new(false),
            })
        }
    }

    impl WifiStation for WifiAdapter {
        fn scan(&self) -> Result<Vec<VisibleNetwork>, WifiError> {
            let mut driver = self.driver.lock().map_err(|_| WifiError::DriverFailed)?;
            if !driver.is_started().unwrap_or(false) {
                driver.start().map_err(|_| WifiError::InterfaceDown)?;
            }
            let aps = driver.scan().map_err(|_| WifiError::DriverFailed)?;
            Ok(aps
                .iter()
                .map(|ap| VisibleNetwork {
                    ssid: ap.ssid.as_str().into(),
                    rssi: ap.signal_strength,
                    secured: ap.auth_method.is_some_and(|m| m != AuthMethod::None),
                })
                .collect())
        }

        fn disable_all_networks(&self) -> Result<(), WifiError> {
            let mut driver = self.driver.lock().map_err(|_| WifiError::DriverFailed)?;
            let _ = driver.disconnect();
            Ok(())
        }

        fn apply_credentials(&self, ssid: &str, key: &str) -> Result<(), WifiError> {
            if !valid_ssid(ssid) {
                return Err(WifiError::DriverFailed);
            }
            if !plausible_key(key) {
                // A key outside the WPA2 length range can never match.
                self.watchers.broadcast(LinkState::InvalidKey);
                return Ok(());
            }
            {
                let mut driver = self.driver.lock().map_err(|_| WifiError::DriverFailed)?;
                let config = Configuration::Client(ClientConfiguration {
                    ssid: ssid.try_into().map_err(|()| WifiError::DriverFailed)?,
                    password: key.try_into().map_err(|()| WifiError::DriverFailed)?,
                    auth_method: if key.is_empty() {
                        AuthMethod::None
                    } else {
                        AuthMethod::WPA2Personal
                    },
                    ..Default::default()
                });
                driver
                    .set_configuration(&config)
                    .map_err(|_| WifiError::DriverFailed)?;
                if !driver.is_started().unwrap_or(false) {
                    driver.start().map_err(|_| WifiError::InterfaceDown)?;
                }
            }

            // Associate on a worker; the outcome is a link-state event.
            let watchers = Arc::clone(&self.watchers);
            let driver = Arc::clone(&self.driver);
            let result = std::thread::Builder::new()
                .name("wifi-assoc".into())
                .spawn(move || {
                    let outcome = {
                        let mut d = match driver.lock() {
                            Ok(d) => d,
                            Err(_) => return,
                        };
                        d.connect().and_then(|()| d.wait_netif_up())
                    };
                    match outcome {
                        Ok(()) => watchers.broadcast(LinkState::Connected),
                        // Auth failures surface as connect errors under
                        // BLE coexistence; the client retries with a
                        // fresh key either way.
                        Err(_) => watchers.broadcast(LinkState::InvalidKey),
                    }
                });
            if result.is_err() {
                return Err(WifiError::DriverFailed);
            }
            Ok(())
        }

        fn watch_link_state(&self) -> mpsc::Receiver<LinkState> {
            self.watchers.subscribe()
        }

        fn serial_number(&self) -> String {
            self.serial.clone()
        }

        fn acknowledge_connected(&self) -> Result<(), WifiError> {
            self.acked.store(true, Ordering::Release);
            info!("wifi: client acknowledged connection");
            Ok(())
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Simulation adapter
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
mod platform {
    use super::*;

    /// One scripted network the simulation will "see".
    #[derive(Debug, Clone)]
    pub struct SimNetwork {
        pub ssid: String,
        pub key: String,
        pub rssi: i8,
    }

    pub struct WifiAdapter {
        networks: Vec<SimNetwork>,
        watchers: std::sync::Arc<Watchers>,
        serial: String,
        acked: AtomicBool,
    }

    impl WifiAdapter {
        pub fn simulated(networks: Vec<SimNetwork>, serial: &str) -> Self {
            Self {
                networks,
                watchers: std::sync::Arc::new(Watchers::new()),
                serial: serial.into(),
                acked: AtomicBool::new(false),
            }
        }

        pub fn was_acknowledged(&self) -> bool {
            self.acked.load(Ordering::Acquire)
        }
    }

    impl WifiStation for WifiAdapter {
        fn scan(&self) -> Result<Vec<VisibleNetwork>, WifiError> {
            Ok(self
                .networks
                .iter()
                .map(|n| VisibleNetwork {
                    ssid: n.ssid.clone(),
                    rssi: n.rssi,
                    secured: !n.key.is_empty(),
                })
                .collect())
        }

        fn disable_all_networks(&self) -> Result<(), WifiError> {
            info!("wifi(sim): all configured networks disabled");
            Ok(())
        }

        fn apply_credentials(&self, ssid: &str, key: &str) -> Result<(), WifiError> {
            if !valid_ssid(ssid) {
                return Err(WifiError::DriverFailed);
            }
            let outcome = self.networks.iter().find(|n| n.ssid == ssid).map(|n| {
                if n.key == key && plausible_key(key) {
                    LinkState::Connected
                } else {
                    LinkState::InvalidKey
                }
            });
            let watchers = std::sync::Arc::clone(&self.watchers);
            let ssid: String = ssid.into();
            let spawned = std::thread::Builder::new().name("wifi-sim".into()).spawn(move || {
                std::thread::sleep(core::time::Duration::from_millis(30));
                match outcome {
                    Some(event) => watchers.broadcast(event),
                    // Unreachable SSID: no event at all; the caller's
                    // bounded wait decides the failure.
                    None => warn!("wifi(sim): ssid '{ssid}' not reachable, staying silent"),
                }
            });
            spawned.map(|_| ()).map_err(|_| WifiError::DriverFailed)
        }

        fn watch_link_state(&self) -> mpsc::Receiver<LinkState> {
            self.watchers.subscribe()
        }

        fn serial_number(&self) -> String {
            self.serial.clone()
        }

        fn acknowledge_connected(&self) -> Result<(), WifiError> {
            self.acked.store(true, Ordering::Release);
            Ok(())
        }
    }
}

pub use platform::WifiAdapter;

#[cfg(not(target_os = "espidf"))]
pub use platform::SimNetwork;

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
