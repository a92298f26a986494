//! Setup service — registers every `sphere.setup.*` RPC handler.
//!
//! Handlers talk to the outside world only through port traits injected
//! at construction, so the whole method surface is testable with mock
//! adapters.  Fast handlers answer synchronously via
//! [`reply_now`](crate::rpc::router::reply_now); anything that waits on
//! an external subsystem spawns a short-lived worker and hands back the
//! response slot.
//!
//! ```text
//!  WifiStation ──▶ ┌────────────────────────┐
//!  PairingUi   ──▶ │      SetupService       │ ──▶ Router handlers
//!  UpdateService ─▶└────────────────────────┘
//! ```

extern crate alloc;
use alloc::string::String;
use alloc::sync::Arc;

use core::sync::atomic::Ordering;
use core::time::Duration;
use std::sync::mpsc;

use log::{info, warn};
use serde_json::{Value, json};

use crate::config::SetupConfig;
use crate::rpc::envelope::{DOMAIN_ERROR, RpcRequest, RpcResponse};
use crate::rpc::pump::ControlMode;
use crate::rpc::router::{ResponseSlot, Router, reply_now};

use super::ports::{LinkState, PairingUi, UpdateService, WifiStation};

/// Collaborators shared by all handlers.
pub struct SetupService {
    wifi: Arc<dyn WifiStation>,
    ui: Arc<dyn PairingUi>,
    updater: Arc<dyn UpdateService>,
    control: Arc<ControlMode>,
    connect_timeout: Duration,
}

impl SetupService {
    pub fn new(
        config: &SetupConfig,
        wifi: Arc<dyn WifiStation>,
        ui: Arc<dyn PairingUi>,
        updater: Arc<dyn UpdateService>,
        control: Arc<ControlMode>,
    ) -> Arc<Self> {
        Arc::new(Self {
            wifi,
            ui,
            updater,
            control,
            connect_timeout: Duration::from_secs(u64::from(config.wifi_connect_timeout_secs)),
        })
    }

    /// Build the method table.
    pub fn build_router(self: &Arc<Self>) -> Router {
        let mut router = Router::new();

        router.register("sphere.setup.ping", |req| {
            reply_now(RpcResponse::result(req.id, json!(1234)))
        });

        let svc = Arc::clone(self);
        router.register("sphere.setup.get_visible_wifi_networks", move |req| {
            svc.clone().scan_networks(req)
        });

        let svc = Arc::clone(self);
        router.register("sphere.setup.connect_wifi_network", move |req| {
            svc.clone().connect_network(req)
        });

        let svc = Arc::clone(self);
        router.register("sphere.setup.acknowledge_connected", move |req| {
            let resp = match svc.wifi.acknowledge_connected() {
                Ok(()) => RpcResponse::result(req.id, json!(true)),
                Err(e) => {
                    warn!("setup: acknowledge_connected failed: {e}");
                    RpcResponse::error(req.id, DOMAIN_ERROR, "could not acknowledge connection")
                }
            };
            reply_now(resp)
        });

        let svc = Arc::clone(self);
        router.register("sphere.setup.start_update", move |req| {
            let resp = match svc.updater.start() {
                Ok(()) => RpcResponse::result(req.id, json!(true)),
                Err(e) => {
                    warn!("setup: updater refused start: {e}");
                    RpcResponse::error(req.id, DOMAIN_ERROR, "update could not be started")
                }
            };
            reply_now(resp)
        });

        let svc = Arc::clone(self);
        router.register("sphere.setup.get_update_progress", move |req| {
            let p = svc.updater.progress();
            reply_now(RpcResponse::result(
                req.id,
                json!({
                    "running": p.running,
                    "percent": p.percent,
                    "description": p.description,
                }),
            ))
        });

        let svc = Arc::clone(self);
        router.register("sphere.setup.display_drawing", move |req| {
            let resp = match svc.ui.display_drawing() {
                Ok(()) => RpcResponse::result(req.id, json!(true)),
                Err(e) => {
                    warn!("setup: display_drawing failed: {e}");
                    RpcResponse::error(req.id, DOMAIN_ERROR, "display unavailable")
                }
            };
            reply_now(resp)
        });

        let svc = Arc::clone(self);
        router.register("sphere.setup.draw", move |req| {
            let resp = match svc.ui.draw(&req.params) {
                Ok(()) => RpcResponse::result(req.id, json!(true)),
                Err(e) => {
                    warn!("setup: draw failed: {e}");
                    RpcResponse::error(req.id, DOMAIN_ERROR, "display unavailable")
                }
            };
            reply_now(resp)
        });

        let svc = Arc::clone(self);
        router.register("sphere.setup.enable_control", move |req| {
            svc.clone().set_control(req, true)
        });

        let svc = Arc::clone(self);
        router.register("sphere.setup.disable_control", move |req| {
            svc.clone().set_control(req, false)
        });

        router
    }

    // ── Deferred handlers ────────────────────────────────────

    /// Scan runs on a worker: the driver blocks for seconds and must
    /// never stall the GATT callback that dispatched the request.
    fn scan_networks(self: Arc<Self>, req: RpcRequest) -> ResponseSlot {
        let (tx, rx) = mpsc::channel();
        spawn_worker("wifi-scan", move || {
            // A half-applied candidate network retrying in the
            // background skews scan results and races the next connect.
            if let Err(e) = self.wifi.disable_all_networks() {
                warn!("setup: disable_all_networks failed: {e}");
            }
            self.ui.show_icon("wifi-searching.gif");
            let resp = match self.wifi.scan() {
                Ok(networks) => {
                    let list: alloc::vec::Vec<Value> = networks
                        .iter()
                        .map(|n| {
                            json!({
                                "ssid": n.ssid,
                                "rssi": n.rssi,
                                "secured": n.secured,
                            })
                        })
                        .collect();
                    RpcResponse::result(req.id, Value::Array(list))
                }
                Err(e) => {
                    warn!("setup: scan failed: {e}");
                    RpcResponse::error(req.id, DOMAIN_ERROR, "scan failed")
                }
            };
            let _ = tx.send(resp);
        });
        rx
    }

    /// Apply credentials, then block on the link-state stream until the
    /// association settles or the bounded wait elapses.
    fn connect_network(self: Arc<Self>, req: RpcRequest) -> ResponseSlot {
        let (tx, rx) = mpsc::channel();

        let Some((ssid, key)) = credential_params(&req) else {
            let _ = tx.send(RpcResponse::error(
                req.id,
                DOMAIN_ERROR,
                "ssid and key required",
            ));
            return rx;
        };

        spawn_worker("wifi-connect", move || {
            self.ui.show_icon("wifi-connecting.gif");
            let events = self.wifi.watch_link_state();
            if let Err(e) = self.wifi.apply_credentials(&ssid, &key) {
                warn!("setup: apply_credentials failed: {e}");
                self.ui.show_icon("wifi-failed.gif");
                let _ = tx.send(RpcResponse::error(
                    req.id,
                    DOMAIN_ERROR,
                    "could not apply credentials",
                ));
                return;
            }

            let deadline = std::time::Instant::now() + self.connect_timeout;
            let resp = loop {
                let remaining = deadline.saturating_duration_since(std::time::Instant::now());
                match events.recv_timeout(remaining) {
                    Ok(LinkState::Connected) => {
                        info!("setup: wifi connected to {ssid}");
                        self.ui.show_icon("wifi-connected.gif");
                        break RpcResponse::result(
                            req.id,
                            json!({ "serial": self.wifi.serial_number() }),
                        );
                    }
                    Ok(LinkState::InvalidKey) => {
                        self.ui.show_icon("wifi-failed.gif");
                        break RpcResponse::error(req.id, DOMAIN_ERROR, "invalid wireless key");
                    }
                    // Transient drops happen mid-association; keep
                    // waiting for a terminal event.
                    Ok(LinkState::Disconnected) => {}
                    Err(_) => {
                        self.ui.show_icon("wifi-failed.gif");
                        break RpcResponse::error(
                            req.id,
                            DOMAIN_ERROR,
                            "could not connect to network",
                        );
                    }
                }
            };
            let _ = tx.send(resp);
        });
        rx
    }

    fn set_control(self: Arc<Self>, req: RpcRequest, enable: bool) -> ResponseSlot {
        let (tx, rx) = mpsc::channel();
        spawn_worker("ctl-toggle", move || {
            let outcome = if enable {
                self.ui.enable_control()
            } else {
                self.ui.disable_control()
            };
            let resp = match outcome {
                Ok(()) => {
                    self.control.enabled.store(enable, Ordering::Release);
                    RpcResponse::result(req.id, json!(true))
                }
                Err(e) => {
                    warn!("setup: control toggle failed: {e}");
                    RpcResponse::error(req.id, DOMAIN_ERROR, "display service unavailable")
                }
            };
            let _ = tx.send(resp);
        });
        rx
    }
}

/// Extract `{"ssid", "key"}` from the first positional param.
fn credential_params(req: &RpcRequest) -> Option<(String, String)> {
    let obj = req.params.first()?;
    let ssid = obj.get("ssid")?.as_str()?;
    let key = obj.get("key").and_then(Value::as_str).unwrap_or_default();
    Some((String::from(ssid), String::from(key)))
}

fn spawn_worker(name: &str, body: impl FnOnce() + Send + 'static) {
    if let Err(e) = std::thread::Builder::new().name(name.into()).spawn(body) {
        warn!("setup: could not spawn {name} worker: {e}");
    }
}

// ── Tests ────────────────────────────────────────────────────
//
// Handler behavior is covered by the integration suite against mock
// ports; only the pure helpers are unit-tested here.
