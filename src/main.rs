//! Sphere setup firmware — main entry point.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Adapters (outer ring)                    │
//! │                                                              │
//! │  BleService      WifiAdapter    NvsAdapter    OtaUpdater     │
//! │  (GATT server)   (WifiStation)  (ConfigStore) (UpdateService)│
//! │  LedPanelUi / ConsolePairingUi  (PairingUi)                  │
//! │                                                              │
//! │  ─────────────── Port Trait Boundary ──────────────────      │
//! │                                                              │
//! │  ┌──────────────────────────────────────────────────────┐    │
//! │  │  PairingSession (SRP-6a · AES-CFB channel)           │    │
//! │  │  SetupService (JSON-RPC handlers)                    │    │
//! │  └──────────────────────────────────────────────────────┘    │
//! │                                                              │
//! │  notify pump · control heartbeat · supervision loop          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::sync::{Arc, Mutex, mpsc};
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{info, warn};

use sphere_setup::adapters::ble::{self, BleService};
use sphere_setup::adapters::device_id::DeviceIdentity;
use sphere_setup::adapters::nvs::NvsAdapter;
use sphere_setup::adapters::ui::{ConsolePairingUi, LedPanelUi};
use sphere_setup::adapters::update::{self, OtaUpdater};
use sphere_setup::adapters::wifi::WifiAdapter;
use sphere_setup::app::ports::{ConfigStore, LinkState, PairingUi, WifiStation};
use sphere_setup::app::service::SetupService;
use sphere_setup::pairing::{PairingSession, SessionState, lock_session};
use sphere_setup::rpc::pump::{self, ControlMode};

/// Local display service the LED panel forwarder talks to.
const DISPLAY_SERVICE_ADDR: &str = "127.0.0.1:3579";

/// Firmware image the updater streams from.
const FIRMWARE_URL: &str = "http://firmware.sphere.io/latest/sphere-setup.bin";

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  sphere-setup v{}                 ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    update::confirm_boot();

    // ── 2. Config from NVS ────────────────────────────────────
    let mut nvs = NvsAdapter::new().map_err(|e| anyhow::anyhow!("nvs init failed: {e}"))?;
    let config = nvs
        .load()
        .map_err(|e| anyhow::anyhow!("stored config unusable: {e}"))?;

    let identity = DeviceIdentity::from_efuse();
    let serial = identity.serial();
    info!(
        "hub serial {} ({}) advertising as '{}'",
        serial,
        identity.hostname(),
        config.advertised_name()
    );

    // ── 3. Pairing UI for the operating mode ──────────────────
    let ui: Arc<dyn PairingUi> = if config.factory_reset {
        // Recovery boot: code goes to the serial console and any
        // previously provisioned network is forgotten.
        let ui = ConsolePairingUi::new();
        ui.show_reset_mode();
        if let Err(e) = nvs.erase_credentials() {
            warn!("factory reset: could not erase credentials: {e}");
        }
        Arc::new(ui)
    } else {
        Arc::new(LedPanelUi::new(DISPLAY_SERVICE_ADDR))
    };

    // ── 4. WiFi station ───────────────────────────────────────
    let peripherals = esp_idf_svc::hal::peripherals::Peripherals::take()?;
    let sysloop = esp_idf_svc::eventloop::EspSystemEventLoop::take()?;
    let nvs_partition = esp_idf_svc::nvs::EspDefaultNvsPartition::take()?;
    let driver = esp_idf_svc::wifi::EspWifi::new(
        peripherals.modem,
        sysloop.clone(),
        Some(nvs_partition),
    )?;
    let wifi = Arc::new(WifiAdapter::new(driver, sysloop, serial.as_str().into())?);

    // Rejoin the stored network; provisioning remains available either way.
    if !config.factory_reset {
        if let Ok(Some((ssid, key))) = nvs.load_credentials() {
            info!("rejoining stored network '{ssid}'");
            if let Err(e) = wifi.apply_credentials(&ssid, &key) {
                warn!("stored credentials rejected: {e}");
            }
        }
    }

    // ── 5. RPC surface + pairing session ──────────────────────
    let control = Arc::new(ControlMode::new());
    let updater = Arc::new(OtaUpdater::new(FIRMWARE_URL));
    let service = SetupService::new(
        &config,
        Arc::clone(&wifi) as Arc<dyn WifiStation>,
        Arc::clone(&ui),
        updater,
        Arc::clone(&control),
    );
    let router = Arc::new(service.build_router());

    let session = PairingSession::new(&config, Arc::clone(&ui), router)
        .map_err(|e| anyhow::anyhow!("pairing session init failed: {e}"))?;
    let session = Arc::new(Mutex::new(session));

    // ── 6. Outbound pump + heartbeat ──────────────────────────
    pump::spawn(
        Arc::clone(&session),
        Box::new(ble::notify_comms),
        Arc::clone(&ui),
        control,
        Duration::from_secs(u64::from(config.heartbeat_interval_secs)),
    )?;

    // ── 7. GATT server ────────────────────────────────────────
    let name = heapless::String::try_from(config.advertised_name())
        .map_err(|()| anyhow::anyhow!("advertised name too long"))?;
    ble::start(BleService::new(Arc::clone(&session), name))
        .map_err(|e| anyhow::anyhow!("ble start failed: {e}"))?;

    info!("setup channel ready, entering supervision loop");
    supervise(&session, wifi.as_ref(), &config);
    Ok(())
}

/// Watch the WiFi link; when the hub has been offline longer than the
/// staleness window and nobody is mid-pairing, rotate the pairing code
/// so the one shown to the user is always fresh.
fn supervise(
    session: &Arc<Mutex<PairingSession>>,
    wifi: &dyn WifiStation,
    config: &sphere_setup::config::SetupConfig,
) {
    let stale_after = Duration::from_secs(u64::from(config.wifi_stale_timeout_secs));
    let events = wifi.watch_link_state();
    let mut last_online = Instant::now();

    loop {
        match events.recv_timeout(Duration::from_secs(1)) {
            Ok(LinkState::Connected) => {
                last_online = Instant::now();
            }
            Ok(LinkState::Disconnected | LinkState::InvalidKey)
            | Err(mpsc::RecvTimeoutError::Timeout) => {
                if last_online.elapsed() > stale_after {
                    let mut s = lock_session(session);
                    if matches!(s.state(), SessionState::AwaitingIntent) {
                        warn!("supervise: offline for {}s, rotating pairing code", stale_after.as_secs());
                        s.reset("wifi stale");
                    }
                    last_online = Instant::now();
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                warn!("supervise: link-state stream closed");
                std::thread::sleep(Duration::from_secs(1));
            }
        }
    }
}
