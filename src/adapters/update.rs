//! Firmware update adapter — backed by the `esp-ota` crate.
//!
//! Implements [`UpdateService`]: `start` kicks off a background worker
//! that streams the firmware image from the configured URL into the
//! inactive OTA partition, and `progress` returns the latest cached
//! report for the polling RPC handler.  On non-espidf targets the
//! download is simulated so handler behaviour stays testable.

extern crate alloc;
use alloc::string::String;
use alloc::sync::Arc;

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{info, warn};

use crate::app::ports::{UpdateError, UpdateProgress, UpdateService};

/// Upper bound on a plausible image; the OTA partition is 4 MiB.
#[cfg(target_os = "espidf")]
const MAX_FIRMWARE_SIZE: u64 = 4 * 1024 * 1024;

struct UpdaterInner {
    firmware_url: String,
    running: AtomicBool,
    progress: Mutex<UpdateProgress>,
}

impl UpdaterInner {
    fn report(&self, running: bool, percent: u8, description: &str) {
        if let Ok(mut p) = self.progress.lock() {
            p.running = running;
            p.percent = percent;
            p.description = description.into();
        }
    }

    fn finish(&self, description: &str, percent: u8) {
        self.report(false, percent, description);
        self.running.store(false, Ordering::Release);
    }
}

/// Streams firmware updates and caches progress for pollers.
pub struct OtaUpdater {
    inner: Arc<UpdaterInner>,
}

impl OtaUpdater {
    pub fn new(firmware_url: &str) -> Self {
        Self {
            inner: Arc::new(UpdaterInner {
                firmware_url: firmware_url.into(),
                running: AtomicBool::new(false),
                progress: Mutex::new(UpdateProgress {
                    running: false,
                    percent: 0,
                    description: String::from("idle"),
                }),
            }),
        }
    }
}

impl UpdateService for OtaUpdater {
    fn start(&self) -> Result<(), UpdateError> {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return Err(UpdateError::NotAccepted);
        }
        self.inner.report(true, 0, "starting");

        let inner = Arc::clone(&self.inner);
        let spawned = std::thread::Builder::new()
            .name("updater".into())
            .spawn(move || match run_update(&inner) {
                Ok(()) => inner.finish("update complete, rebooting", 100),
                Err(reason) => {
                    warn!("update: failed: {reason}");
                    inner.finish(reason, 0);
                }
            });
        if spawned.is_err() {
            self.inner.finish("could not start updater", 0);
            return Err(UpdateError::NotAccepted);
        }
        Ok(())
    }

    fn progress(&self) -> UpdateProgress {
        self.inner
            .progress
            .lock()
            .map(|p| p.clone())
            .unwrap_or(UpdateProgress {
                running: false,
                percent: 0,
                description: String::from("unknown"),
            })
    }
}

// ───────────────────────────────────────────────────────────────
// Platform update flows
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
fn run_update(updater: &UpdaterInner) -> Result<(), &'static str> {
    use esp_idf_svc::http::Method;
    use esp_idf_svc::http::client::{Configuration, EspHttpConnection};

    updater.report(true, 0, "downloading");
    info!("update: fetching {}", updater.firmware_url);

    let mut conn = EspHttpConnection::new(&Configuration {
        buffer_size: Some(4096),
        ..Default::default()
    })
    .map_err(|_| "http client init failed")?;

    conn.initiate_request(Method::Get, &updater.firmware_url, &[])
        .map_err(|_| "request failed")?;
    conn.initiate_response().map_err(|_| "download failed")?;
    if conn.status() != 200 {
        return Err("update server returned an error");
    }
    let total = conn
        .header("Content-Length")
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|len| *len > 0 && *len <= MAX_FIRMWARE_SIZE)
        .ok_or("firmware size missing or out of range")?;

    let mut ota = esp_ota::OtaUpdate::begin().map_err(|_| "no inactive partition")?;

    let mut buf = [0u8; 4096];
    let mut written: u64 = 0;
    loop {
        let n = conn.read(&mut buf).map_err(|_| "download interrupted")?;
        if n == 0 {
            break;
        }
        ota.write(&buf[..n]).map_err(|_| "flash write failed")?;
        written += n as u64;
        if written > total {
            return Err("image larger than declared");
        }
        let percent = ((written * 90) / total) as u8;
        updater.report(true, percent, "downloading");
    }
    if written != total {
        return Err("download truncated");
    }

    updater.report(true, 95, "verifying");
    let mut completed = ota.finalize().map_err(|_| "image verification failed")?;
    completed
        .set_as_boot_partition()
        .map_err(|_| "set boot partition failed")?;

    updater.report(true, 100, "rebooting");
    info!("update: flashed {written} bytes, rebooting into new firmware");
    esp_ota::restart();
}

#[cfg(not(target_os = "espidf"))]
fn run_update(updater: &UpdaterInner) -> Result<(), &'static str> {
    info!("update(sim): pretending to fetch {}", updater.firmware_url);
    for percent in [10u8, 40, 70, 90] {
        std::thread::sleep(core::time::Duration::from_millis(5));
        updater.report(true, percent, "downloading");
    }
    updater.report(true, 95, "verifying");
    std::thread::sleep(core::time::Duration::from_millis(5));
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// Boot validation
// ───────────────────────────────────────────────────────────────

/// Mark the running firmware as good on startup.
///
/// Without this, the rollback watchdog reverts to the previous firmware
/// after three consecutive failed boots.
#[cfg(target_os = "espidf")]
pub fn confirm_boot() {
    match esp_ota::mark_app_valid() {
        Ok(()) => info!("update: firmware marked valid (rollback cancelled)"),
        Err(e) => warn!("update: mark_app_valid failed: {e:?}"),
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn confirm_boot() {
    info!("update(sim): rollback check skipped");
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
