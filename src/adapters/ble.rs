//! BLE GATT adapter for the secured setup channel.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: Bluedroid GATT server via
//!   `esp_idf_svc::sys` raw bindings.
//! - **all other targets**: no radio; [`BleService::handle_write`] and
//!   [`BleService::handle_read`] are driven directly by tests.
//!
//! ## GATT Service Layout
//!
//! | Characteristic | UUID            | Perms        | Carries               |
//! |----------------|-----------------|--------------|-----------------------|
//! | Pair intent    | `1DDAB97A-…`    | Write        | `[0x01]` start byte   |
//! | Colorize       | `0DEB4AA3-…`    | Write        | RGB identify hint     |
//! | Bytes A        | `D4737CD3-…`    | Write        | client public (chunked)|
//! | Bytes S        | `BBD351ED-…`    | Read         | salt                  |
//! | Bytes B        | `BE884021-…`    | Read         | server public         |
//! | Bytes M        | `39DA849F-…`    | Write        | client proof (chunked)|
//! | HAMK           | `44FE636C-…`    | Read         | server proof          |
//! | Comms          | `2A06F376-…`    | Write+Notify | encrypted RPC frames  |
//!
//! The link itself is open; every secret crosses it inside the SRP
//! handshake or the derived-key ciphertext, so no Bluedroid pairing or
//! bonding is configured.

extern crate alloc;
use alloc::sync::Arc;
use alloc::vec::Vec;

use std::sync::Mutex;

use log::warn;

use crate::error::Result;
use crate::pairing::{PairingSession, WriteChannel, handle_rpc_write, lock_session};

// ───────────────────────────────────────────────────────────────
// Constants
// ───────────────────────────────────────────────────────────────

pub const SERVICE_UUID: u128 = 0xECE10CF7_F74F_4E56_A03C_CE3120853589;
pub const CHAR_PAIR_INTENT: u128 = 0x1DDAB97A_4769_4747_82BE_62413EFC2795;
pub const CHAR_COLORIZE: u128 = 0x0DEB4AA3_BB1A_42DE_B4B5_5100D5551521;
pub const CHAR_BYTES_A: u128 = 0xD4737CD3_44DD_4C07_AB81_376C722898BB;
pub const CHAR_BYTES_S: u128 = 0xBBD351ED_680B_49E6_9990_10050C3C35F0;
pub const CHAR_BYTES_B: u128 = 0xBE884021_B791_40BF_A035_72715C2537F3;
pub const CHAR_BYTES_M: u128 = 0x39DA849F_11BD_417F_9FE6_D686B244CA59;
pub const CHAR_HAMK: u128 = 0x44FE636C_B58A_4C9A_BECC_77491ACCF94C;
pub const CHAR_COMMS: u128 = 0x2A06F376_8721_4AD7_9A8E_173A204CEC1C;

/// Window returned per GATT read request.
pub const READ_WINDOW: usize = 20;

// ───────────────────────────────────────────────────────────────
// Characteristic dispatch
// ───────────────────────────────────────────────────────────────

/// The service's characteristics, independent of GATT handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Characteristic {
    PairIntent,
    Colorize,
    BytesA,
    BytesS,
    BytesB,
    BytesM,
    Hamk,
    Comms,
}

/// Bridges GATT events to the pairing session.  One instance for the
/// life of the process; on espidf the C callbacks reach it through the
/// static installed by [`start`].
pub struct BleService {
    session: Arc<Mutex<PairingSession>>,
    device_name: heapless::String<24>,
}

impl BleService {
    pub fn new(session: Arc<Mutex<PairingSession>>, device_name: heapless::String<24>) -> Self {
        Self {
            session,
            device_name,
        }
    }

    pub fn session(&self) -> &Arc<Mutex<PairingSession>> {
        &self.session
    }

    /// Dispatch a client write.  Chunked channels return the 2-byte ack
    /// value the client polls for; plain writes return `None`.
    pub fn handle_write(&self, chr: Characteristic, data: &[u8]) -> Result<Option<u16>> {
        match chr {
            Characteristic::PairIntent => {
                lock_session(&self.session).handle_intent_write(data)?;
                Ok(None)
            }
            Characteristic::Colorize => {
                lock_session(&self.session).handle_color_hint(data)?;
                Ok(None)
            }
            Characteristic::BytesA => {
                let mut s = lock_session(&self.session);
                s.handle_client_public_chunk(data)?;
                Ok(Some(s.pending_ack(WriteChannel::ClientPublic)))
            }
            Characteristic::BytesM => {
                let mut s = lock_session(&self.session);
                s.handle_client_proof_chunk(data)?;
                Ok(Some(s.pending_ack(WriteChannel::ClientProof)))
            }
            Characteristic::Comms => handle_rpc_write(&self.session, data).map(Some),
            Characteristic::BytesS | Characteristic::BytesB | Characteristic::Hamk => {
                warn!("ble: write to read-only characteristic");
                Err(crate::error::ProtocolViolation::WrongState.into())
            }
        }
    }

    /// Dispatch a client read at `offset` into the handshake value.
    pub fn handle_read(&self, chr: Characteristic, offset: usize) -> Result<Vec<u8>> {
        let mut s = lock_session(&self.session);
        match chr {
            Characteristic::BytesS => s.read_salt(offset, READ_WINDOW),
            Characteristic::BytesB => s.read_server_public(offset, READ_WINDOW),
            Characteristic::Hamk => s.read_server_proof(offset, READ_WINDOW),
            _ => {
                warn!("ble: read from write-only characteristic");
                Err(crate::error::ProtocolViolation::WrongState.into())
            }
        }
    }

    /// A dropped link invalidates whatever the client had in flight.
    pub fn on_link_dropped(&self) {
        lock_session(&self.session).reset("link dropped");
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF Bluedroid backend
// ───────────────────────────────────────────────────────────────
//
// Bluedroid callbacks are C function pointers that cannot capture Rust
// closures. These statics bridge the callback context to the service.

#[cfg(target_os = "espidf")]
mod platform {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};
    use log::info;
    use std::sync::OnceLock;

    static SERVICE: OnceLock<BleService> = OnceLock::new();

    static GATTS_IF: AtomicU32 = AtomicU32::new(0);
    static CONN_ID: AtomicU32 = AtomicU32::new(u32::MAX);
    static SVC_HANDLE: AtomicU32 = AtomicU32::new(0);
    static CHAR_STEP: AtomicU32 = AtomicU32::new(0);

    // Attribute handles in registration order.
    static HANDLES: [AtomicU32; 8] = [
        AtomicU32::new(0),
        AtomicU32::new(0),
        AtomicU32::new(0),
        AtomicU32::new(0),
        AtomicU32::new(0),
        AtomicU32::new(0),
        AtomicU32::new(0),
        AtomicU32::new(0),
    ];

    /// Registration chain order; index matches [`HANDLES`].
    const CHAIN: [Characteristic; 8] = [
        Characteristic::PairIntent,
        Characteristic::Colorize,
        Characteristic::BytesA,
        Characteristic::BytesS,
        Characteristic::BytesB,
        Characteristic::BytesM,
        Characteristic::Hamk,
        Characteristic::Comms,
    ];

    fn chain_uuid(chr: Characteristic) -> u128 {
        match chr {
            Characteristic::PairIntent => CHAR_PAIR_INTENT,
            Characteristic::Colorize => CHAR_COLORIZE,
            Characteristic::BytesA => CHAR_BYTES_A,
            Characteristic::BytesS => CHAR_BYTES_S,
            Characteristic::BytesB => CHAR_BYTES_B,
            Characteristic::BytesM => CHAR_BYTES_M,
            Characteristic::Hamk => CHAR_HAMK,
            Characteristic::Comms => CHAR_COMMS,
        }
    }

    fn chr_for_handle(handle: u32) -> Option<Characteristic> {
        HANDLES
            .iter()
            .position(|h| h.load(Ordering::Relaxed) == handle)
            .map(|i| CHAIN[i])
    }

    fn uuid128_to_esp(uuid: u128) -> esp_idf_svc::sys::esp_bt_uuid_t {
        let mut t: esp_idf_svc::sys::esp_bt_uuid_t = unsafe { core::mem::zeroed() };
        t.len = 16;
        unsafe {
            t.uuid.uuid128 = uuid.to_le_bytes();
        }
        t
    }

    unsafe fn add_chain_char(svc_handle: u16, chr: Characteristic) {
        use esp_idf_svc::sys::*;
        let (perm, prop) = match chr {
            Characteristic::PairIntent
            | Characteristic::Colorize
            | Characteristic::BytesA
            | Characteristic::BytesM => (ESP_GATT_PERM_WRITE, ESP_GATT_CHAR_PROP_BIT_WRITE),
            Characteristic::BytesS | Characteristic::BytesB | Characteristic::Hamk => {
                (ESP_GATT_PERM_READ, ESP_GATT_CHAR_PROP_BIT_READ)
            }
            Characteristic::Comms => (
                ESP_GATT_PERM_READ | ESP_GATT_PERM_WRITE,
                ESP_GATT_CHAR_PROP_BIT_WRITE | ESP_GATT_CHAR_PROP_BIT_NOTIFY,
            ),
        };
        let mut char_uuid = uuid128_to_esp(chain_uuid(chr));
        esp_ble_gatts_add_char(
            svc_handle,
            &mut char_uuid,
            perm as esp_gatt_perm_t,
            prop as esp_gatt_char_prop_t,
            core::ptr::null_mut(),
            core::ptr::null_mut(),
        );
    }

    unsafe extern "C" fn gap_event_handler(
        event: esp_idf_svc::sys::esp_gap_ble_cb_event_t,
        _param: *mut esp_idf_svc::sys::esp_ble_gap_cb_param_t,
    ) {
        use esp_idf_svc::sys::*;
        match event {
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_START_COMPLETE_EVT => {
                info!("ble: advertising started");
            }
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_STOP_COMPLETE_EVT => {
                info!("ble: advertising stopped");
            }
            _ => {}
        }
    }

    unsafe fn start_advertising() {
        use esp_idf_svc::sys::*;
        let mut adv_params = esp_ble_adv_params_t {
            adv_int_min: 0x20,
            adv_int_max: 0x40,
            adv_type: esp_ble_adv_type_t_ADV_TYPE_IND,
            own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
            channel_map: esp_ble_adv_channel_t_ADV_CHNL_ALL,
            adv_filter_policy: esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
            ..core::mem::zeroed()
        };
        esp_ble_gap_start_advertising(&mut adv_params);
    }

    unsafe fn send_write_response(
        gatts_if: esp_idf_svc::sys::esp_gatt_if_t,
        conn_id: u16,
        trans_id: u32,
        handle: u16,
        ok: bool,
    ) {
        use esp_idf_svc::sys::*;
        let mut rsp: esp_gatt_rsp_t = core::mem::zeroed();
        rsp.attr_value.handle = handle;
        let status = if ok {
            esp_gatt_status_t_ESP_GATT_OK
        } else {
            esp_gatt_status_t_ESP_GATT_WRITE_NOT_PERMIT
        };
        esp_ble_gatts_send_response(gatts_if, conn_id, trans_id, status, &mut rsp);
    }

    unsafe extern "C" fn gatts_event_handler(
        event: esp_idf_svc::sys::esp_gatts_cb_event_t,
        gatts_if: esp_idf_svc::sys::esp_gatt_if_t,
        param: *mut esp_idf_svc::sys::esp_ble_gatts_cb_param_t,
    ) {
        use esp_idf_svc::sys::*;

        GATTS_IF.store(gatts_if as u32, Ordering::Relaxed);

        match event {
            esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => {
                info!("ble: app registered (if={})", gatts_if);
                let svc_uuid = uuid128_to_esp(SERVICE_UUID);
                let mut svc_id = esp_gatt_srvc_id_t {
                    id: esp_gatt_id_t {
                        uuid: svc_uuid,
                        inst_id: 0,
                    },
                    is_primary: true,
                };
                // service decl + 8 chars, 2 attributes each, + CCCD slack
                esp_ble_gatts_create_service(gatts_if, &mut svc_id, 20);
            }
            esp_gatts_cb_event_t_ESP_GATTS_CREATE_EVT => {
                let p = &(*param).create;
                let svc_handle = p.service_handle;
                SVC_HANDLE.store(svc_handle as u32, Ordering::Relaxed);
                info!("ble: service created (handle={})", svc_handle);
                esp_ble_gatts_start_service(svc_handle);
                CHAR_STEP.store(0, Ordering::Relaxed);
                add_chain_char(svc_handle, CHAIN[0]);
            }
            esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_EVT => {
                let p = &(*param).add_char;
                let step = CHAR_STEP.load(Ordering::Relaxed) as usize;
                if step < CHAIN.len() {
                    HANDLES[step].store(p.attr_handle as u32, Ordering::Relaxed);
                    let next = step + 1;
                    CHAR_STEP.store(next as u32, Ordering::Relaxed);
                    if next < CHAIN.len() {
                        let svc_handle = SVC_HANDLE.load(Ordering::Relaxed) as u16;
                        add_chain_char(svc_handle, CHAIN[next]);
                    } else {
                        info!("ble: all characteristics registered");
                    }
                }
            }
            esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => {
                let p = &(*param).connect;
                CONN_ID.store(p.conn_id as u32, Ordering::Relaxed);
                info!("ble: client connected (conn_id={})", p.conn_id);
            }
            esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => {
                CONN_ID.store(u32::MAX, Ordering::Relaxed);
                info!("ble: client disconnected");
                if let Some(service) = SERVICE.get() {
                    service.on_link_dropped();
                }
                start_advertising();
            }
            esp_gatts_cb_event_t_ESP_GATTS_WRITE_EVT => {
                let p = &(*param).write;
                let data = core::slice::from_raw_parts(p.value, p.len as usize);
                let Some(chr) = chr_for_handle(p.handle as u32) else {
                    return;
                };
                let Some(service) = SERVICE.get() else {
                    return;
                };
                let outcome = service.handle_write(chr, data);
                if p.need_rsp {
                    send_write_response(gatts_if, p.conn_id, p.trans_id, p.handle, outcome.is_ok());
                }
                match outcome {
                    // Chunked channels: notify the client how far the
                    // reassembly advanced.
                    Ok(Some(ack)) => notify_raw(p.handle, &ack.to_le_bytes()),
                    Ok(None) => {}
                    Err(e) => warn!("ble: write rejected: {e}"),
                }
            }
            esp_gatts_cb_event_t_ESP_GATTS_READ_EVT => {
                let p = &(*param).read;
                let Some(chr) = chr_for_handle(p.handle as u32) else {
                    return;
                };
                let Some(service) = SERVICE.get() else {
                    return;
                };
                let mut rsp: esp_gatt_rsp_t = core::mem::zeroed();
                rsp.attr_value.handle = p.handle;
                let status = match service.handle_read(chr, p.offset as usize) {
                    Ok(window) => {
                        rsp.attr_value.len = window.len() as u16;
                        rsp.attr_value.value[..window.len()].copy_from_slice(&window);
                        esp_gatt_status_t_ESP_GATT_OK
                    }
                    Err(e) => {
                        warn!("ble: read rejected: {e}");
                        esp_gatt_status_t_ESP_GATT_READ_NOT_PERMIT
                    }
                };
                esp_ble_gatts_send_response(gatts_if, p.conn_id, p.trans_id, status, &mut rsp);
            }
            _ => {}
        }
    }

    fn notify_raw(handle: u16, payload: &[u8]) {
        use esp_idf_svc::sys::*;
        let conn = CONN_ID.load(Ordering::Relaxed);
        if conn == u32::MAX {
            return;
        }
        unsafe {
            esp_ble_gatts_send_indicate(
                GATTS_IF.load(Ordering::Relaxed) as u8,
                conn as u16,
                handle,
                payload.len() as u16,
                payload.as_ptr() as *mut u8,
                false,
            );
        }
    }

    /// Push one framed notify payload out on the Comms characteristic.
    /// This is the pump's notify sink.
    pub fn notify_comms(payload: &[u8]) {
        let idx = CHAIN
            .iter()
            .position(|c| *c == Characteristic::Comms)
            .unwrap_or(CHAIN.len() - 1);
        let handle = HANDLES[idx].load(Ordering::Relaxed);
        if handle != 0 {
            notify_raw(handle as u16, payload);
        }
    }

    /// Bring up Bluedroid and start advertising.  The service becomes
    /// reachable from the C callbacks from here on.
    pub fn start(service: BleService) -> crate::error::Result<()> {
        use esp_idf_svc::sys::*;

        let name = heapless::String::<25>::try_from(service.device_name())
            .map_err(|()| crate::error::Error::Init("device name too long"))?;

        if SERVICE.set(service).is_err() {
            return Err(crate::error::Error::Init("ble service already started"));
        }

        unsafe {
            // Release classic BT memory (BLE-only mode saves ~30 KB).
            esp_bt_controller_mem_release(esp_bt_mode_t_ESP_BT_MODE_CLASSIC_BT);

            let mut bt_cfg = esp_bt_controller_config_t::default();
            if esp_bt_controller_init(&mut bt_cfg) != ESP_OK as i32 {
                return Err(crate::error::Error::Init("bt controller init failed"));
            }
            if esp_bt_controller_enable(esp_bt_mode_t_ESP_BT_MODE_BLE) != ESP_OK as i32 {
                return Err(crate::error::Error::Init("bt controller enable failed"));
            }
            if esp_bluedroid_init() != ESP_OK as i32 {
                return Err(crate::error::Error::Init("bluedroid init failed"));
            }
            if esp_bluedroid_enable() != ESP_OK as i32 {
                return Err(crate::error::Error::Init("bluedroid enable failed"));
            }

            esp_ble_gap_register_callback(Some(gap_event_handler));
            esp_ble_gatts_register_callback(Some(gatts_event_handler));
            esp_ble_gatts_app_register(0);

            // NUL-terminated advertising name.
            let mut name_buf = [0u8; 26];
            name_buf[..name.len()].copy_from_slice(name.as_bytes());
            esp_ble_gap_set_device_name(name_buf.as_ptr().cast());

            start_advertising();
        }

        info!("ble: advertising as '{name}'");
        Ok(())
    }
}

#[cfg(target_os = "espidf")]
pub use platform::{notify_comms, start};

// ───────────────────────────────────────────────────────────────
// Tests (host only; the dispatch layer is radio-independent)
// ───────────────────────────────────────────────────────────────
