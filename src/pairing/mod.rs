//! SRP pairing state machine and session lifecycle.
//!
//! One [`PairingSession`] exists per BLE connection.  It owns every
//! piece of mutable protocol state: the state enum, the SRP handshake,
//! both IV counters, the per-characteristic reassembly buffers, and the
//! outbound notify queue.  GATT callbacks lock it briefly for buffer
//! and state work; everything slow (handler completion, the notify
//! pump) runs on other threads that re-lock on their own.
//!
//! ```text
//! AwaitingIntent ──0x01──▶ AwaitingClientPublicValue ──A──▶
//!     AwaitingClientProof ──M ok──▶ Verified ──RPC traffic──▶ Verified
//!         └───────────── any violation, anywhere ─────────────┘
//!                         (reset, new passcode)
//! ```
//!
//! A reset is total: new passcode, new salt and verifier, new SRP
//! ephemeral, both IV counters rezeroed, queued output dropped and the
//! generation counter bumped so in-flight handler completions from the
//! old session are discarded when they try to enqueue.

pub mod passcode;
pub mod srp;

extern crate alloc;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;

use core::time::Duration;
use std::sync::{Mutex, MutexGuard};

use burster::Limiter;
use log::{info, warn};

use crate::app::ports::PairingUi;
use crate::config::SetupConfig;
use crate::error::{Error, FramingError, ProtocolViolation, Result};
use crate::rpc::codec;
use crate::rpc::router::{self, Router};
use crate::transport::WriteReassembly;
use crate::transport::chunked::frame_message;
use passcode::OneTimePasscode;
use srp::{SALT_BYTES, ServerSession};

/// Reassembly capacity for the client public value characteristic.
pub const CLIENT_PUBLIC_CAPACITY: usize = 512;

/// Reassembly capacity for the client proof characteristic.
pub const CLIENT_PROOF_CAPACITY: usize = 256;

/// Reassembly capacity for the RPC channel.
pub const RPC_CAPACITY: usize = 1024;

/// Exact length of a client proof (SHA-256 digest).
const PROOF_LEN: usize = 32;

// ── State machine ────────────────────────────────────────────

/// Session state.  The key lives inside `Verified`, so "session key
/// defined iff verified" holds by construction.
#[derive(Clone, Copy)]
pub enum SessionState {
    AwaitingIntent,
    AwaitingClientPublicValue,
    AwaitingClientProof,
    Verified { session_key: [u8; 32] },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AwaitingIntent => "AwaitingIntent",
            Self::AwaitingClientPublicValue => "AwaitingClientPublicValue",
            Self::AwaitingClientProof => "AwaitingClientProof",
            Self::Verified { .. } => "Verified",
        }
    }
}

/// Writable characteristics backed by a reassembly buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteChannel {
    ClientPublic,
    ClientProof,
    Rpc,
}

// ── Session ──────────────────────────────────────────────────

pub struct PairingSession {
    state: SessionState,
    passcode: OneTimePasscode,
    srp: Option<ServerSession>,
    salt: [u8; SALT_BYTES],

    /// Last accepted inbound IV counter; the next must exceed it.
    decrypt_iv: u64,
    /// Last issued outbound IV counter.
    encrypt_iv: u64,
    /// Bumped on every reset; fences stale handler completions.
    generation: u64,

    a_buf: WriteReassembly,
    m_buf: WriteReassembly,
    rpc_buf: WriteReassembly,

    /// Framed notify frames awaiting the pump.
    outbound: VecDeque<Vec<u8>>,

    intent_limiter: burster::TokenBucket<fn() -> Duration>,
    rpc_timeout: Duration,

    ui: Arc<dyn PairingUi>,
    router: Arc<Router>,
}

impl PairingSession {
    pub fn new(config: &SetupConfig, ui: Arc<dyn PairingUi>, router: Arc<Router>) -> Result<Self> {
        let mut session = Self {
            state: SessionState::AwaitingIntent,
            passcode: OneTimePasscode::new(&config.srp_username)?,
            srp: None,
            salt: [0u8; SALT_BYTES],
            decrypt_iv: 0,
            encrypt_iv: codec::IV_MIDPOINT,
            generation: 0,
            a_buf: WriteReassembly::new(CLIENT_PUBLIC_CAPACITY),
            m_buf: WriteReassembly::new(CLIENT_PROOF_CAPACITY),
            rpc_buf: WriteReassembly::new(RPC_CAPACITY),
            outbound: VecDeque::new(),
            intent_limiter: burster::TokenBucket::new_with_time_provider(
                u64::from(config.intent_burst),
                1,
                passcode::platform_now as fn() -> Duration,
            ),
            rpc_timeout: Duration::from_secs(u64::from(config.rpc_call_timeout_secs)),
            ui,
            router,
        };
        session.reset("startup");
        Ok(session)
    }

    /// Tear the session down to `AwaitingIntent` with fresh material.
    pub fn reset(&mut self, reason: &str) {
        info!("pairing: reset ({reason})");
        self.state = SessionState::AwaitingIntent;
        self.passcode.invalidate();
        self.salt = passcode::random_bytes::<SALT_BYTES>();
        let verifier = srp::compute_verifier(
            &self.salt,
            &srp::hash_credentials(self.passcode.username(), self.passcode.password()),
        );
        self.srp = Some(ServerSession::new(&verifier));
        self.decrypt_iv = 0;
        self.encrypt_iv = codec::IV_MIDPOINT;
        self.generation = self.generation.wrapping_add(1);
        self.a_buf.reset();
        self.m_buf.reset();
        self.rpc_buf.reset();
        self.outbound.clear();
        self.ui.show_pairing_code(self.passcode.password());
    }

    // ── Handshake writes ─────────────────────────────────────

    /// Pair-intent characteristic: a single `0x01` byte begins (or
    /// restarts) a handshake.  Rate-limited; a rejected write does not
    /// disturb the current session.
    pub fn handle_intent_write(&mut self, value: &[u8]) -> Result<()> {
        if self.intent_limiter.try_consume(1).is_err() {
            warn!("pairing: intent write rate limited");
            return Err(ProtocolViolation::RateLimited.into());
        }
        if value != [0x01] {
            self.reset("malformed intent value");
            return Err(ProtocolViolation::WrongState.into());
        }
        self.reset("pair intent");
        self.state = SessionState::AwaitingClientPublicValue;
        Ok(())
    }

    /// Chunk of the client SRP public value `A`.
    pub fn handle_client_public_chunk(&mut self, frame: &[u8]) -> Result<()> {
        if !matches!(self.state, SessionState::AwaitingClientPublicValue) {
            self.reset("client public value in wrong state");
            return Err(ProtocolViolation::WrongState.into());
        }
        let Some(message) = self.accept_chunk(WriteChannel::ClientPublic, frame)? else {
            return Ok(());
        };

        let srp = self.srp.as_mut().ok_or(Error::Init("srp session missing"))?;
        match srp.compute_key(&message) {
            Ok(_) => {
                self.state = SessionState::AwaitingClientProof;
                Ok(())
            }
            Err(e) => {
                self.reset("degenerate client public value");
                Err(e)
            }
        }
    }

    /// Chunk of the client proof `M`.  The complete message must be
    /// exactly one SHA-256 digest.
    pub fn handle_client_proof_chunk(&mut self, frame: &[u8]) -> Result<()> {
        if !matches!(self.state, SessionState::AwaitingClientProof) {
            self.reset("client proof in wrong state");
            return Err(ProtocolViolation::WrongState.into());
        }
        let Some(message) = self.accept_chunk(WriteChannel::ClientProof, frame)? else {
            return Ok(());
        };

        if message.len() != PROOF_LEN {
            self.reset("client proof wrong length");
            return Err(ProtocolViolation::ProofMismatch.into());
        }
        let srp = self.srp.as_ref().ok_or(Error::Init("srp session missing"))?;
        if !srp.verify_client_proof(&message) {
            self.reset("client proof mismatch");
            return Err(ProtocolViolation::ProofMismatch.into());
        }
        let session_key = srp
            .session_key()
            .ok_or(Error::Init("srp key missing after proof"))?;
        info!("pairing: client verified, channel keys established");
        self.state = SessionState::Verified { session_key };
        Ok(())
    }

    /// Plaintext colour hint, accepted only pre-handshake.  Carries no
    /// security weight: a rejected write fails the GATT status but
    /// never resets the session.
    pub fn handle_color_hint(&mut self, data: &[u8]) -> Result<()> {
        if !matches!(self.state, SessionState::AwaitingIntent) {
            return Err(ProtocolViolation::WrongState.into());
        }
        let [r, g, b, ..] = *data else {
            return Err(ProtocolViolation::WrongState.into());
        };
        self.ui.show_color_hint([r, g, b]);
        Ok(())
    }

    // ── Handshake reads ──────────────────────────────────────

    /// Salt characteristic, readable while the client computes its
    /// proof.
    pub fn read_salt(&mut self, offset: usize, cap: usize) -> Result<Vec<u8>> {
        self.read_handshake_value(offset, cap, HandshakeRead::Salt)
    }

    /// Server public value `B`.
    pub fn read_server_public(&mut self, offset: usize, cap: usize) -> Result<Vec<u8>> {
        self.read_handshake_value(offset, cap, HandshakeRead::ServerPublic)
    }

    /// Server proof `HAMK`, readable once verified.
    pub fn read_server_proof(&mut self, offset: usize, cap: usize) -> Result<Vec<u8>> {
        self.read_handshake_value(offset, cap, HandshakeRead::ServerProof)
    }

    fn read_handshake_value(
        &mut self,
        offset: usize,
        cap: usize,
        which: HandshakeRead,
    ) -> Result<Vec<u8>> {
        let ok_state = match which {
            HandshakeRead::Salt | HandshakeRead::ServerPublic => {
                matches!(self.state, SessionState::AwaitingClientProof)
            }
            HandshakeRead::ServerProof => matches!(self.state, SessionState::Verified { .. }),
        };
        if !ok_state {
            self.reset("handshake read in wrong state");
            return Err(ProtocolViolation::WrongState.into());
        }

        let srp = self.srp.as_ref().ok_or(Error::Init("srp session missing"))?;
        let window = match which {
            HandshakeRead::Salt => crate::transport::read_window(&self.salt, offset, cap)?,
            HandshakeRead::ServerPublic => {
                let b = srp.public_value();
                return Ok(crate::transport::read_window(&b, offset, cap)?.to_vec());
            }
            HandshakeRead::ServerProof => {
                let hamk = srp
                    .server_proof()
                    .ok_or(Error::Init("server proof missing"))?;
                return Ok(crate::transport::read_window(&hamk, offset, cap)?.to_vec());
            }
        };
        Ok(window.to_vec())
    }

    // ── Chunk plumbing ───────────────────────────────────────

    fn buffer(&mut self, chan: WriteChannel) -> &mut WriteReassembly {
        match chan {
            WriteChannel::ClientPublic => &mut self.a_buf,
            WriteChannel::ClientProof => &mut self.m_buf,
            WriteChannel::Rpc => &mut self.rpc_buf,
        }
    }

    /// Feed one physical write into a reassembly buffer.  Bad offsets
    /// escalate to a session reset; a merely truncated frame only fails
    /// the write.
    fn accept_chunk(&mut self, chan: WriteChannel, frame: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.buffer(chan).accept_chunk(frame) {
            Ok(done) => Ok(done),
            Err(e @ Error::Framing(FramingError::TruncatedHeader)) => Err(e),
            Err(e) => {
                self.reset("bad chunk offset");
                Err(e)
            }
        }
    }

    /// Ack value to notify after the most recent chunk on `chan`.
    pub fn pending_ack(&mut self, chan: WriteChannel) -> u16 {
        self.buffer(chan).pending_ack()
    }

    // ── Encrypted RPC channel ────────────────────────────────

    /// Feed one RPC-characteristic write; returns the decrypted
    /// plaintext when this chunk completes a message.
    pub fn handle_rpc_chunk(&mut self, frame: &[u8]) -> Result<Option<Vec<u8>>> {
        if !matches!(self.state, SessionState::Verified { .. }) {
            self.reset("rpc write before verification");
            return Err(ProtocolViolation::WrongState.into());
        }
        match self.accept_chunk(WriteChannel::Rpc, frame)? {
            None => Ok(None),
            Some(sealed) => self.unseal_inbound(&sealed).map(Some),
        }
    }

    /// Validate the IV window and decrypt.  Any violation is a full
    /// reset: replay protection fails closed.
    fn unseal_inbound(&mut self, sealed: &[u8]) -> Result<Vec<u8>> {
        let SessionState::Verified { session_key } = self.state else {
            return Err(ProtocolViolation::WrongState.into());
        };
        let (iv, ciphertext) = match codec::split_sealed(sealed) {
            Ok(parts) => parts,
            Err(e) => {
                self.reset("rpc message too short");
                return Err(e);
            }
        };
        if iv <= self.decrypt_iv || iv >= codec::IV_MIDPOINT {
            self.reset("inbound IV replayed or out of window");
            return Err(ProtocolViolation::IvViolation.into());
        }
        let plaintext = match codec::decrypt(&session_key, ciphertext, iv) {
            Ok(p) => p,
            Err(e) => {
                self.reset("rpc decrypt failed");
                return Err(e);
            }
        };
        self.decrypt_iv = iv;

        // Clients zero-pad to the cipher block; trim before JSON parse.
        let len = plaintext.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        Ok(plaintext[..len].to_vec())
    }

    /// Seal a response and queue its notify frames, unless the session
    /// has been reset since the request was dispatched.
    pub fn queue_response(&mut self, generation: u64, response: &[u8]) {
        if generation != self.generation {
            warn!("pairing: dropping response from stale session generation");
            return;
        }
        let SessionState::Verified { session_key } = self.state else {
            warn!("pairing: dropping response, session no longer verified");
            return;
        };
        self.encrypt_iv += 1;
        let sealed = codec::seal(&session_key, response, self.encrypt_iv);
        self.outbound.extend(frame_message(&sealed));
        crate::rpc::pump::wake();
    }

    /// Next notify frame for the pump, FIFO.
    pub fn pop_outbound(&mut self) -> Option<Vec<u8>> {
        self.outbound.pop_front()
    }

    // ── Accessors ────────────────────────────────────────────

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn router(&self) -> Arc<Router> {
        Arc::clone(&self.router)
    }

    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }
}

#[derive(Clone, Copy)]
enum HandshakeRead {
    Salt,
    ServerPublic,
    ServerProof,
}

// ── Shared-session entry points ──────────────────────────────

/// Lock the session, recovering from a poisoned mutex — a panicked
/// worker must not wedge the BLE callbacks.
pub fn lock_session(session: &Arc<Mutex<PairingSession>>) -> MutexGuard<'_, PairingSession> {
    session.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Full RPC write path: reassemble, unseal, dispatch, and hand the
/// deferred completion to a worker thread that seals and queues the
/// response.  Returns the ack to notify for this chunk.
pub fn handle_rpc_write(session: &Arc<Mutex<PairingSession>>, frame: &[u8]) -> Result<u16> {
    let (plaintext, router, generation, timeout, ack) = {
        let mut s = lock_session(session);
        let complete = s.handle_rpc_chunk(frame)?;
        let ack = s.pending_ack(WriteChannel::Rpc);
        match complete {
            None => return Ok(ack),
            Some(pt) => (pt, s.router(), s.generation(), s.rpc_timeout(), ack),
        }
    };

    let dispatch = router.dispatch(&plaintext);
    let session = Arc::clone(session);
    let spawned = std::thread::Builder::new()
        .name("rpc-call".into())
        .spawn(move || {
            let resp = router::await_response(dispatch, timeout);
            match serde_json::to_vec(&resp) {
                Ok(bytes) => lock_session(&session).queue_response(generation, &bytes),
                Err(e) => warn!("rpc: response serialization failed: {e}"),
            }
        });
    if let Err(e) = spawned {
        warn!("rpc: could not spawn completion worker: {e}");
        return Err(Error::Init("worker spawn failed"));
    }
    Ok(ack)
}

// ── Tests ────────────────────────────────────────────────────
