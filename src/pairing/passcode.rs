//! One-time pairing passcode.
//!
//! Each pairing attempt gets a fresh four-digit code drawn from the
//! hardware RNG.  The code doubles as the SRP password, so it is only
//! ever shown on the hub's own display and never travels over the air.

use core::time::Duration;
use heapless::String;

use crate::error::{Error, Result};

/// One-time passcode generator bound to the fixed SRP username.
pub struct OneTimePasscode {
    username: String<32>,
    password: String<8>,
}

impl OneTimePasscode {
    pub fn new(username: &str) -> Result<Self> {
        let mut pc = Self {
            username: String::try_from(username)
                .map_err(|()| Error::Config("username too long"))?,
            password: String::new(),
        };
        pc.invalidate();
        Ok(pc)
    }

    /// Discard the current code and draw a new one.
    ///
    /// Four RNG bytes are folded into `u32 (LE) % 10000` and zero-padded
    /// to four digits, so `0042` is a valid code.
    pub fn invalidate(&mut self) {
        let mut raw = [0u8; 4];
        fill_random(&mut raw);
        let code = u32::from_le_bytes(raw) % 10_000;

        self.password.clear();
        let mut digits = [0u8; 4];
        let mut rest = code;
        for slot in digits.iter_mut().rev() {
            *slot = b'0' + (rest % 10) as u8;
            rest /= 10;
        }
        for d in digits {
            // Four ASCII digits always fit in the 8-byte backing store.
            let _ = self.password.push(d as char);
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

// ── Platform randomness ──────────────────────────────────────

/// Fill `buf` with cryptographically random data.
///
/// ESP-IDF: hardware RNG via `esp_fill_random`.
#[cfg(target_os = "espidf")]
pub(crate) fn fill_random(buf: &mut [u8]) {
    // SAFETY: esp_fill_random writes to the provided buffer using
    // the hardware RNG. Buffer is valid and exclusively owned.
    unsafe {
        esp_idf_sys::esp_fill_random(buf.as_mut_ptr().cast(), buf.len());
    }
}

/// Simulation stub — `RandomState` entropy, good enough for host tests.
#[cfg(not(target_os = "espidf"))]
pub(crate) fn fill_random(buf: &mut [u8]) {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    for chunk in buf.chunks_mut(8) {
        let s = RandomState::new();
        let val = s.build_hasher().finish().to_le_bytes();
        let len = chunk.len().min(val.len());
        chunk[..len].copy_from_slice(&val[..len]);
    }
}

pub(crate) fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    fill_random(&mut buf);
    buf
}

// ── Platform time for rate limiting ──────────────────────────

#[cfg(target_os = "espidf")]
pub(crate) fn platform_now() -> Duration {
    let us = unsafe { esp_idf_sys::esp_timer_get_time() };
    Duration::from_micros(us as u64)
}

#[cfg(not(target_os = "espidf"))]
pub(crate) fn platform_now() -> Duration {
    use std::time::Instant;
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    START.get_or_init(Instant::now).elapsed()
}

// ── Tests ────────────────────────────────────────────────────
