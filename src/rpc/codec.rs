//! Symmetric channel codec — AES-256-CFB with counter-derived IVs.
//!
//! The IV is never random: each direction runs a monotonic 64-bit
//! counter, little-endian-encoded into the low 8 bytes of a zeroed
//! 16-byte block.  Each side keeps a last-used ledger and increments
//! before sending: the client ledger begins at 0 (first message carries
//! IV 1), the hub ledger at [`IV_MIDPOINT`], so the two directions can
//! never collide under the same session key.  On the wire every
//! encrypted message is
//! prefixed with the raw 8-byte counter, outside the ciphertext, so the
//! receiver can enforce the anti-replay window before paying for a
//! decrypt.

extern crate alloc;
use alloc::vec::Vec;

use aes::Aes256;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};

use crate::error::{CryptoError, Result};

/// AES block size; also the minimum ciphertext length.
pub const BLOCK_SIZE: usize = 16;

/// Initial outbound IV ledger value; the first response carries the
/// midpoint plus one.  Inbound counters live strictly below it.
pub const IV_MIDPOINT: u64 = 0x8000_0000_0000_0000;

/// Length of the plaintext counter prefix on sealed messages.
pub const IV_PREFIX_LEN: usize = 8;

fn iv_block(counter: u64) -> [u8; BLOCK_SIZE] {
    let mut iv = [0u8; BLOCK_SIZE];
    iv[..8].copy_from_slice(&counter.to_le_bytes());
    iv
}

/// Encrypt `plaintext` under `key` with the IV derived from `counter`.
///
/// The plaintext is zero-padded to a whole number of blocks, matching
/// what deployed clients expect; the decrypting side trims trailing
/// NULs before JSON parsing.
pub fn encrypt(key: &[u8; 32], plaintext: &[u8], counter: u64) -> Vec<u8> {
    let mut buf = plaintext.to_vec();
    let pad = (BLOCK_SIZE - buf.len() % BLOCK_SIZE) % BLOCK_SIZE;
    buf.resize(buf.len() + pad, 0);

    let iv = iv_block(counter);
    cfb_mode::Encryptor::<Aes256>::new(key.into(), (&iv).into()).encrypt(&mut buf);
    buf
}

/// Decrypt `ciphertext` under `key` with the IV derived from `counter`.
/// Errors on anything shorter than one block.
pub fn decrypt(key: &[u8; 32], ciphertext: &[u8], counter: u64) -> Result<Vec<u8>> {
    if ciphertext.len() < BLOCK_SIZE {
        return Err(CryptoError::ShortCiphertext.into());
    }
    let mut buf = ciphertext.to_vec();
    let iv = iv_block(counter);
    cfb_mode::Decryptor::<Aes256>::new(key.into(), (&iv).into()).decrypt(&mut buf);
    Ok(buf)
}

/// Encrypt and prepend the 8-byte little-endian counter.
pub fn seal(key: &[u8; 32], plaintext: &[u8], counter: u64) -> Vec<u8> {
    let ct = encrypt(key, plaintext, counter);
    let mut out = Vec::with_capacity(IV_PREFIX_LEN + ct.len());
    out.extend_from_slice(&counter.to_le_bytes());
    out.extend_from_slice(&ct);
    out
}

/// Split a sealed message into its counter and ciphertext.
pub fn split_sealed(message: &[u8]) -> Result<(u64, &[u8])> {
    if message.len() < IV_PREFIX_LEN + BLOCK_SIZE {
        return Err(CryptoError::ShortCiphertext.into());
    }
    let mut prefix = [0u8; IV_PREFIX_LEN];
    prefix.copy_from_slice(&message[..IV_PREFIX_LEN]);
    Ok((u64::from_le_bytes(prefix), &message[IV_PREFIX_LEN..]))
}

// ── Tests ────────────────────────────────────────────────────
