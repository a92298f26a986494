//! The `sphere.setup.*` method surface, exercised end to end: paired
//! client, encrypted Comms channel, real router and handlers, simulated
//! WiFi station.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use serde_json::json;

use sphere_setup::adapters::update::OtaUpdater;
use sphere_setup::adapters::wifi::{SimNetwork, WifiAdapter};
use sphere_setup::app::ports::{PairingUi, UpdateService, WifiStation};
use sphere_setup::app::service::SetupService;
use sphere_setup::config::SetupConfig;
use sphere_setup::rpc::envelope::{DOMAIN_ERROR, METHOD_NOT_FOUND, PARSE_ERROR, RpcResponse};
use sphere_setup::rpc::pump::ControlMode;

use crate::mock_ports::{PairedClient, RecordingUi, ScriptedUpdater};

struct Stack {
    client: PairedClient,
    wifi: Arc<WifiAdapter>,
    control: Arc<ControlMode>,
    ui: Arc<RecordingUi>,
}

fn sim_networks() -> Vec<SimNetwork> {
    vec![
        SimNetwork {
            ssid: "home".into(),
            key: "hunter22".into(),
            rssi: -48,
        },
        SimNetwork {
            ssid: "cafe".into(),
            key: String::new(),
            rssi: -71,
        },
    ]
}

fn stack_with_updater(updater: Arc<dyn UpdateService>) -> Stack {
    let mut config = SetupConfig::default();
    // Keep the bounded connect wait short so the silence path is cheap.
    config.wifi_connect_timeout_secs = 1;

    let ui = RecordingUi::new();
    let wifi = Arc::new(WifiAdapter::simulated(sim_networks(), "SPHERE-1234"));
    let control = Arc::new(ControlMode::new());

    let service = SetupService::new(
        &config,
        Arc::clone(&wifi) as Arc<dyn WifiStation>,
        Arc::clone(&ui) as Arc<dyn PairingUi>,
        updater,
        Arc::clone(&control),
    );
    let router = service.build_router();

    let mut client = PairedClient::unpaired(&config, Arc::clone(&ui), router);
    client.pair();
    Stack {
        client,
        wifi,
        control,
        ui,
    }
}

fn stack() -> Stack {
    stack_with_updater(ScriptedUpdater::idle())
}

fn error_of(resp: &RpcResponse) -> (i32, String) {
    let err = resp.error.as_ref().expect("expected an error response");
    (err.code, err.message.clone())
}

#[test]
fn ping_answers_1234() {
    let mut s = stack();
    let resp = s.client.call("sphere.setup.ping", json!([]));
    assert_eq!(resp.result, Some(json!(1234)));
}

#[test]
fn unknown_method_is_rejected() {
    let mut s = stack();
    let resp = s.client.call("sphere.setup.reboot", json!([]));
    assert_eq!(error_of(&resp).0, METHOD_NOT_FOUND);
}

#[test]
fn unparsable_request_reports_parse_error() {
    let mut s = stack();
    s.client.send_raw(b"this is not json").unwrap();
    let resp = s.client.await_notify();
    assert_eq!(error_of(&resp).0, PARSE_ERROR);
    assert_eq!(resp.id, json!(null));
}

#[test]
fn scan_lists_visible_networks() {
    let mut s = stack();
    let resp = s
        .client
        .call("sphere.setup.get_visible_wifi_networks", json!([]));
    let nets = resp.result.expect("scan result");
    let nets = nets.as_array().expect("array of networks");
    assert_eq!(nets.len(), 2);

    let home = nets.iter().find(|n| n["ssid"] == json!("home")).unwrap();
    assert_eq!(home["secured"], json!(true));
    assert_eq!(home["rssi"], json!(-48));
    let cafe = nets.iter().find(|n| n["ssid"] == json!("cafe")).unwrap();
    assert_eq!(cafe["secured"], json!(false));

    assert!(s.ui.icons().iter().any(|i| i == "wifi-searching.gif"));
}

#[test]
fn connect_returns_hub_serial() {
    let mut s = stack();
    let resp = s.client.call(
        "sphere.setup.connect_wifi_network",
        json!([{"ssid": "home", "key": "hunter22"}]),
    );
    assert_eq!(resp.result, Some(json!({"serial": "SPHERE-1234"})));
    let icons = s.ui.icons();
    assert!(icons.iter().any(|i| i == "wifi-connecting.gif"));
    assert!(icons.iter().any(|i| i == "wifi-connected.gif"));
}

#[test]
fn wrong_key_reports_invalid_wireless_key() {
    let mut s = stack();
    let resp = s.client.call(
        "sphere.setup.connect_wifi_network",
        json!([{"ssid": "home", "key": "wrong-key"}]),
    );
    let (code, message) = error_of(&resp);
    assert_eq!(code, DOMAIN_ERROR);
    assert_eq!(message, "invalid wireless key");
    assert!(s.ui.icons().iter().any(|i| i == "wifi-failed.gif"));
}

#[test]
fn unreachable_network_fails_after_bounded_wait() {
    let mut s = stack();
    let started = Instant::now();
    let resp = s.client.call(
        "sphere.setup.connect_wifi_network",
        json!([{"ssid": "not-there", "key": "whatever1"}]),
    );
    let (code, message) = error_of(&resp);
    assert_eq!(code, DOMAIN_ERROR);
    assert_eq!(message, "could not connect to network");
    assert!(started.elapsed() >= Duration::from_millis(900));
}

#[test]
fn connect_without_ssid_is_rejected() {
    let mut s = stack();
    let resp = s.client.call(
        "sphere.setup.connect_wifi_network",
        json!([{"key": "hunter22"}]),
    );
    let (code, message) = error_of(&resp);
    assert_eq!(code, DOMAIN_ERROR);
    assert_eq!(message, "ssid and key required");
}

#[test]
fn open_network_connects_with_empty_key() {
    let mut s = stack();
    let resp = s.client.call(
        "sphere.setup.connect_wifi_network",
        json!([{"ssid": "cafe"}]),
    );
    assert_eq!(resp.result, Some(json!({"serial": "SPHERE-1234"})));
}

#[test]
fn acknowledge_connected_marks_station() {
    let mut s = stack();
    assert!(!s.wifi.was_acknowledged());
    let resp = s.client.call("sphere.setup.acknowledge_connected", json!([]));
    assert_eq!(resp.result, Some(json!(true)));
    assert!(s.wifi.was_acknowledged());
}

#[test]
fn control_toggles_follow_display_service() {
    let mut s = stack();

    let resp = s.client.call("sphere.setup.enable_control", json!([]));
    assert_eq!(resp.result, Some(json!(true)));
    assert!(s.control.enabled.load(Ordering::Acquire));

    let resp = s.client.call("sphere.setup.disable_control", json!([]));
    assert_eq!(resp.result, Some(json!(true)));
    assert!(!s.control.enabled.load(Ordering::Acquire));

    assert_eq!(s.ui.control_calls(), vec![true, false]);
}

#[test]
fn rejected_control_leaves_mode_disabled() {
    let mut s = stack();
    s.ui.reject_control.store(true, Ordering::Release);
    let resp = s.client.call("sphere.setup.enable_control", json!([]));
    let (code, message) = error_of(&resp);
    assert_eq!(code, DOMAIN_ERROR);
    assert_eq!(message, "display service unavailable");
    assert!(!s.control.enabled.load(Ordering::Acquire));
}

#[test]
fn drawing_methods_reach_the_display() {
    let mut s = stack();
    let resp = s.client.call("sphere.setup.display_drawing", json!([]));
    assert_eq!(resp.result, Some(json!(true)));
    let resp = s.client.call(
        "sphere.setup.draw",
        json!([[0, 0, 255, 255], [1, 1, 128, 0]]),
    );
    assert_eq!(resp.result, Some(json!(true)));
}

#[test]
fn refused_update_start_surfaces_domain_error() {
    let mut s = stack_with_updater(Arc::new(ScriptedUpdater {
        accept: false,
        report: sphere_setup::app::ports::UpdateProgress {
            running: false,
            percent: 0,
            description: String::from("unreachable"),
        },
    }));
    let resp = s.client.call("sphere.setup.start_update", json!([]));
    let (code, message) = error_of(&resp);
    assert_eq!(code, DOMAIN_ERROR);
    assert_eq!(message, "update could not be started");
}

#[test]
fn update_runs_to_completion_over_the_channel() {
    let updater = Arc::new(OtaUpdater::new("http://firmware.test/sphere-setup.bin"));
    let mut s = stack_with_updater(updater);

    let resp = s.client.call("sphere.setup.start_update", json!([]));
    assert_eq!(resp.result, Some(json!(true)));

    // Poll progress until the simulated install finishes.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let resp = s.client.call("sphere.setup.get_update_progress", json!([]));
        let progress = resp.result.expect("progress result");
        if progress["running"] == json!(false) && progress["percent"].as_u64().unwrap() > 0 {
            break;
        }
        assert!(Instant::now() < deadline, "update never finished");
        std::thread::sleep(Duration::from_millis(10));
    }
}
