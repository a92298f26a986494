//! Shared test doubles and the client-side pairing harness.
//!
//! `PairedClient` plays the mobile app: it drives [`BleService`] through
//! the full SRP handshake using the passcode captured from the hub's own
//! UI port, then speaks encrypted JSON-RPC over the Comms
//! characteristic exactly as a real peer would, chunk headers and IV
//! counters included.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;

use sphere_setup::adapters::ble::{BleService, Characteristic};
use sphere_setup::app::ports::{PairingUi, UiError, UpdateProgress, UpdateService, UpdateError};
use sphere_setup::config::SetupConfig;
use sphere_setup::error::Result;
use sphere_setup::pairing::{PairingSession, lock_session, srp};
use sphere_setup::rpc::codec;
use sphere_setup::rpc::envelope::RpcResponse;
use sphere_setup::rpc::router::Router;
use sphere_setup::transport::{ACK_CONSUMED, FINAL_FLAG, OFFSET_MASK, WriteReassembly, frame_message};

/// Payload bytes per simulated GATT write.
const WRITE_PAYLOAD: usize = 18;

// ── Recording UI ─────────────────────────────────────────────

/// Records every call so tests can assert on codes and icons.
#[derive(Default)]
pub struct RecordingUi {
    codes: Mutex<Vec<String>>,
    icons: Mutex<Vec<String>>,
    control_enabled: Mutex<Vec<bool>>,
    pub reject_control: std::sync::atomic::AtomicBool,
}

impl RecordingUi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The most recently displayed pairing code.
    pub fn pairing_code(&self) -> String {
        self.codes.lock().unwrap().last().cloned().expect("no pairing code shown")
    }

    pub fn codes_shown(&self) -> usize {
        self.codes.lock().unwrap().len()
    }

    pub fn icons(&self) -> Vec<String> {
        self.icons.lock().unwrap().clone()
    }

    pub fn control_calls(&self) -> Vec<bool> {
        self.control_enabled.lock().unwrap().clone()
    }
}

impl PairingUi for RecordingUi {
    fn show_color_hint(&self, _rgb: [u8; 3]) {}

    fn show_pairing_code(&self, code: &str) {
        self.codes.lock().unwrap().push(code.into());
    }

    fn show_icon(&self, name: &str) {
        self.icons.lock().unwrap().push(name.into());
    }

    fn enable_control(&self) -> core::result::Result<(), UiError> {
        if self.reject_control.load(std::sync::atomic::Ordering::Acquire) {
            return Err(UiError::Rejected);
        }
        self.control_enabled.lock().unwrap().push(true);
        Ok(())
    }

    fn disable_control(&self) -> core::result::Result<(), UiError> {
        self.control_enabled.lock().unwrap().push(false);
        Ok(())
    }

    fn show_reset_mode(&self) {}

    fn display_drawing(&self) -> core::result::Result<(), UiError> {
        Ok(())
    }

    fn draw(&self, _commands: &[Value]) -> core::result::Result<(), UiError> {
        Ok(())
    }
}

// ── Scripted updater ─────────────────────────────────────────

/// Updater double with a scripted acceptance and a fixed progress
/// report.
pub struct ScriptedUpdater {
    pub accept: bool,
    pub report: UpdateProgress,
}

impl ScriptedUpdater {
    pub fn idle() -> Arc<Self> {
        Arc::new(Self {
            accept: true,
            report: UpdateProgress {
                running: false,
                percent: 0,
                description: String::from("idle"),
            },
        })
    }
}

impl UpdateService for ScriptedUpdater {
    fn start(&self) -> core::result::Result<(), UpdateError> {
        if self.accept { Ok(()) } else { Err(UpdateError::NotAccepted) }
    }

    fn progress(&self) -> UpdateProgress {
        self.report.clone()
    }
}

// ── Client-side harness ──────────────────────────────────────

/// Drives the hub's GATT surface the way the mobile app does.
pub struct PairedClient {
    pub svc: BleService,
    pub ui: Arc<RecordingUi>,
    session_key: Option<[u8; 32]>,
    next_request_iv: u64,
    next_id: u64,
}

impl PairedClient {
    /// Build a hub stack around `router` and return an unpaired client.
    pub fn unpaired(config: &SetupConfig, ui: Arc<RecordingUi>, router: Router) -> Self {
        let session = PairingSession::new(config, ui.clone() as Arc<dyn PairingUi>, Arc::new(router))
            .expect("pairing session");
        let name = heapless::String::try_from(config.advertised_name()).unwrap();
        let svc = BleService::new(Arc::new(Mutex::new(session)), name);
        Self {
            svc,
            ui,
            session_key: None,
            // The hub's replay ledger starts at 0, so the first usable
            // request IV is 1.
            next_request_iv: 1,
            next_id: 1,
        }
    }

    /// Chunk `payload` into writes on `chr`; returns the final ack.
    pub fn write_chunked(&self, chr: Characteristic, payload: &[u8]) -> Result<u16> {
        let mut last_ack = 0u16;
        let mut offset = 0usize;
        let mut chunks = payload.chunks(WRITE_PAYLOAD).peekable();
        while let Some(chunk) = chunks.next() {
            let mut header = (offset as u16) & OFFSET_MASK;
            if chunks.peek().is_none() {
                header |= FINAL_FLAG;
            }
            let mut frame = header.to_le_bytes().to_vec();
            frame.extend_from_slice(chunk);
            last_ack = self
                .svc
                .handle_write(chr, &frame)?
                .expect("chunked channel returns an ack");
            offset += chunk.len();
        }
        Ok(last_ack)
    }

    /// Read a handshake value of known length via windowed reads.
    pub fn read_value(&self, chr: Characteristic, len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            let window = self.svc.handle_read(chr, out.len()).expect("read window");
            assert!(!window.is_empty(), "zero-length read window");
            out.extend_from_slice(&window);
        }
        assert_eq!(out.len(), len);
        out
    }

    /// Run the complete handshake with the code the hub just displayed.
    pub fn pair(&mut self) {
        let code = self.begin_handshake();
        self.finish_handshake(&code);
    }

    /// Write pair-intent and return the fresh passcode from the UI.
    pub fn begin_handshake(&self) -> String {
        self.svc
            .handle_write(Characteristic::PairIntent, &[0x01])
            .expect("pair intent accepted");
        self.ui.pairing_code()
    }

    /// Finish the handshake using `code` as the SRP password.
    /// Panics if the hub rejects any step, so failure-path tests should
    /// drive the steps by hand instead.
    pub fn finish_handshake(&mut self, code: &str) {
        let ih = srp::hash_credentials("spheramid", code);
        let mut cli = srp::client::ClientSession::new(ih);

        let ack = self
            .write_chunked(Characteristic::BytesA, &cli.public_value())
            .expect("client public accepted");
        assert_eq!(ack, ACK_CONSUMED);

        let salt = self.read_value(Characteristic::BytesS, srp::SALT_BYTES);
        let server_b = self.read_value(Characteristic::BytesB, srp::GROUP_BYTES);
        let proof = cli.process_challenge(&salt, &server_b);

        let ack = self
            .write_chunked(Characteristic::BytesM, &proof)
            .expect("client proof accepted");
        assert_eq!(ack, ACK_CONSUMED);

        let hamk = self.read_value(Characteristic::Hamk, 32);
        assert!(cli.verify_server_proof(&hamk), "server proof mismatch");

        self.session_key = Some(cli.session_key().expect("client session key"));
    }

    pub fn session_key(&self) -> [u8; 32] {
        self.session_key.expect("client not paired")
    }

    /// Seal `body` and push its frames over the Comms characteristic.
    pub fn send_raw(&mut self, body: &[u8]) -> Result<()> {
        let sealed = codec::seal(&self.session_key(), body, self.next_request_iv);
        self.next_request_iv += 1;
        for frame in frame_message(&sealed) {
            self.svc.handle_write(Characteristic::Comms, &frame)?;
        }
        Ok(())
    }

    /// One JSON-RPC round trip through the encrypted channel.
    pub fn call(&mut self, method: &str, params: Value) -> RpcResponse {
        let id = self.next_id;
        self.next_id += 1;
        let req = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        self.send_raw(&serde_json::to_vec(&req).unwrap())
            .expect("rpc request accepted");
        let resp = self.await_notify();
        assert_eq!(resp.id, serde_json::json!(id), "response id echo");
        resp
    }

    /// Drain notify frames from the session queue (standing in for the
    /// pump) until one complete sealed response arrives.
    pub fn await_notify(&mut self) -> RpcResponse {
        let key = self.session_key();
        let mut reassembly = WriteReassembly::new(2048);
        let deadline = Instant::now() + Duration::from_secs(5);

        loop {
            let frame = lock_session(self.svc.session()).pop_outbound();
            match frame {
                Some(frame) => {
                    if let Some(sealed) = reassembly.accept_chunk(&frame).expect("notify frame") {
                        let (iv, ciphertext) = codec::split_sealed(&sealed).expect("iv prefix");
                        assert!(iv > codec::IV_MIDPOINT, "hub IVs start above the midpoint");
                        let plain = codec::decrypt(&key, ciphertext, iv).expect("decrypt");
                        let end = plain.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
                        return serde_json::from_slice(&plain[..end]).expect("response json");
                    }
                }
                None => {
                    assert!(Instant::now() < deadline, "timed out waiting for a notify");
                    std::thread::sleep(Duration::from_millis(5));
                }
            }
        }
    }

    pub fn session_state(&self) -> &'static str {
        lock_session(self.svc.session()).state().name()
    }
}
