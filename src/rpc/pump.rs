//! Outbound notify pump and control heartbeat.
//!
//! Runs in a dedicated thread using `edge-executor` for cooperative
//! scheduling and `async-io-mini` for reactor-driven timers.  Two
//! concurrent futures:
//!
//! 1. **Pump** — drains the session's outbound frame queue into the
//!    BLE notify sink; sleeps on a wake [`Signal`] between bursts so
//!    nothing polls.
//! 2. **Heartbeat** — while control mode is on, re-sends the
//!    enable-control call to the display service every few seconds.
//!    Each beat runs on a short-lived worker; a beat is skipped while
//!    the previous one is still in flight rather than queued behind it.

extern crate alloc;
use alloc::boxed::Box;
use alloc::sync::Arc;

use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use std::sync::Mutex;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use log::{info, warn};

use crate::app::ports::PairingUi;
use crate::pairing::{PairingSession, lock_session};

/// Latched wake for the pump; set whenever frames are queued.
static OUTBOUND_WAKE: Signal<CriticalSectionRawMutex, ()> = Signal::new();

/// Nudge the pump after queueing outbound frames.
pub fn wake() {
    OUTBOUND_WAKE.signal(());
}

/// Control-mode flags shared between the RPC handlers and the
/// heartbeat task.
pub struct ControlMode {
    /// Client has requested control of the display.
    pub enabled: AtomicBool,
    /// A heartbeat call is currently in flight.
    in_flight: AtomicBool,
}

impl ControlMode {
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
        }
    }
}

/// Per-frame notify delivery into the BLE stack.
pub type NotifySink = Box<dyn Fn(&[u8]) + Send>;

// ── Async loops ──────────────────────────────────────────────

async fn pump_loop(session: Arc<Mutex<PairingSession>>, sink: NotifySink) {
    loop {
        loop {
            let frame = lock_session(&session).pop_outbound();
            match frame {
                Some(f) => sink(&f),
                None => break,
            }
        }
        // Signal latches, so frames queued between the drain and this
        // wait are not missed.
        OUTBOUND_WAKE.wait().await;
    }
}

async fn heartbeat_loop(ui: Arc<dyn PairingUi>, control: Arc<ControlMode>, interval: Duration) {
    loop {
        async_io_mini::Timer::after(interval).await;
        if !control.enabled.load(Ordering::Acquire) {
            continue;
        }
        if control.in_flight.swap(true, Ordering::AcqRel) {
            // Previous beat still talking to the display service.
            continue;
        }
        let ui = Arc::clone(&ui);
        let control_done = Arc::clone(&control);
        let spawned = std::thread::Builder::new()
            .name("ctl-beat".into())
            .spawn(move || {
                if ui.enable_control().is_err() {
                    warn!("pump: control heartbeat rejected by display service");
                }
                control_done.in_flight.store(false, Ordering::Release);
            });
        if spawned.is_err() {
            control.in_flight.store(false, Ordering::Release);
        }
    }
}

fn run_pump(
    session: Arc<Mutex<PairingSession>>,
    sink: NotifySink,
    ui: Arc<dyn PairingUi>,
    control: Arc<ControlMode>,
    heartbeat_interval: Duration,
) {
    let executor: edge_executor::LocalExecutor<'_, 4> = edge_executor::LocalExecutor::new();

    executor.spawn(pump_loop(session, sink)).detach();
    executor
        .spawn(heartbeat_loop(ui, control, heartbeat_interval))
        .detach();

    info!("pump: notify pump started");
    futures_lite::future::block_on(executor.run(core::future::pending::<()>()));
}

/// Spawn the pump thread.  Runs for the life of the process.
pub fn spawn(
    session: Arc<Mutex<PairingSession>>,
    sink: NotifySink,
    ui: Arc<dyn PairingUi>,
    control: Arc<ControlMode>,
    heartbeat_interval: Duration,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("notify-pump".into())
        .spawn(move || run_pump(session, sink, ui, control, heartbeat_interval))
}

// ── Tests ────────────────────────────────────────────────────

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;

    #[test]
    fn wake_latches_before_wait() {
        wake();
        // Must complete immediately because the signal is latched.
        futures_lite::future::block_on(OUTBOUND_WAKE.wait());
    }

    #[test]
    fn control_mode_starts_disabled() {
        let c = ControlMode::new();
        assert!(!c.enabled.load(Ordering::Acquire));
        assert!(!c.in_flight.load(Ordering::Acquire));
    }
}
