//! SRP-6a verifier-based key agreement (server side).
//!
//! Runs over the RFC 5054 2048-bit group with SHA-256.  All group
//! elements are left-padded to the 256-byte modulus width before they
//! are hashed, and the public values travel on the wire in that padded
//! form.  Proof shapes are the simple digest forms:
//!
//! ```text
//! k    = H(N ‖ pad(g))
//! x    = H(salt ‖ identity_hash)        identity_hash = H(user ‖ ":" ‖ pass)
//! v    = g^x mod N
//! B    = (k·v + g^b) mod N
//! u    = H(pad(A) ‖ pad(B))
//! S    = (A·v^u)^b mod N
//! K    = H(pad(S))
//! M    = H(pad(A) ‖ pad(B) ‖ K)
//! HAMK = H(pad(A) ‖ M ‖ K)
//! ```
//!
//! The double hash in `x` is deliberate: the credential handed to this
//! module is already `H(user ‖ ":" ‖ pass)`, and deployed clients depend
//! on that exact ordering.

use num_bigint::BigUint;

use crate::error::{ProtocolViolation, Result};
use crate::pairing::passcode::random_bytes;

/// Modulus width in bytes; all padded operands use this width.
pub const GROUP_BYTES: usize = 256;

/// Salt length drawn for each pairing attempt.
pub const SALT_BYTES: usize = 16;

/// RFC 5054 group 2048 prime, big-endian.
const N_HEX: &str = "\
AC6BDB41324A9A9BF166DE5E1389582FAF72B6651987EE07FC3192943DB56050\
A37329CBB4A099ED8193E0757767A13DD52312AB4B03310DCD7F48A9DA04FD50\
E8083969EDB767B0CF6095179A163AB3661A05FBD5FAAAE82918A9962F0B93B8\
55F97993EC975EEAA80D740ADBF4FF747359D041D5C33EA71D281E446B14773B\
CA97B43A23FB801676BD207A436C6481F1D2B9078717461A5B9D32E688F87748\
544523B524B0D57D5EA77A2775D2ECFA032CFBDBF52FB3786160279004E57AE6\
AF874E7303CE53299CCC041C7BC308D82A5698F3A8D0C38271AE35F8E9DBFBB6\
94B5C803D89F7AE435DE236D525F54759B65E372FCD68EF20FA7111F9E4AFF73";

fn group_n() -> BigUint {
    BigUint::parse_bytes(N_HEX.as_bytes(), 16).unwrap_or_default()
}

fn group_g() -> BigUint {
    BigUint::from(2u8)
}

/// Left-pad a group element to the modulus width.
fn pad(value: &BigUint) -> [u8; GROUP_BYTES] {
    let bytes = value.to_bytes_be();
    let mut out = [0u8; GROUP_BYTES];
    let start = GROUP_BYTES.saturating_sub(bytes.len());
    let take = bytes.len().min(GROUP_BYTES);
    out[start..].copy_from_slice(&bytes[bytes.len() - take..]);
    out
}

fn hash_parts(parts: &[&[u8]]) -> [u8; 32] {
    let mut h = hmac_sha256::Hash::new();
    for p in parts {
        h.update(p);
    }
    h.finalize()
}

/// `k = H(N ‖ pad(g))`, the SRP-6a multiplier.
fn multiplier_k(n: &BigUint) -> BigUint {
    let digest = hash_parts(&[&pad(n), &pad(&group_g())]);
    BigUint::from_bytes_be(&digest)
}

/// `H(username ‖ ":" ‖ password)` — the credential fed into `x`.
pub fn hash_credentials(username: &str, password: &str) -> [u8; 32] {
    hash_parts(&[username.as_bytes(), b":", password.as_bytes()])
}

/// Derive the password verifier `v = g^x mod N` from a salt and an
/// already-hashed credential.
pub fn compute_verifier(salt: &[u8], identity_hash: &[u8; 32]) -> [u8; GROUP_BYTES] {
    let n = group_n();
    let x = BigUint::from_bytes_be(&hash_parts(&[salt, identity_hash]));
    pad(&group_g().modpow(&x, &n))
}

/// Constant-time digest comparison.
fn digests_equal(a: &[u8; 32], b: &[u8]) -> bool {
    if b.len() != 32 {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

// ── Server session ───────────────────────────────────────────

/// One server-side SRP handshake.  Created fresh on every session
/// reset; never reused across attempts.
pub struct ServerSession {
    verifier: BigUint,
    b: BigUint,
    public_b: BigUint,
    /// Populated by [`ServerSession::compute_key`].
    derived: Option<Derived>,
}

struct Derived {
    session_key: [u8; 32],
    client_proof: [u8; 32],
    server_proof: [u8; 32],
}

impl ServerSession {
    /// Start a handshake for the given verifier, drawing a fresh
    /// ephemeral secret `b`.
    pub fn new(verifier: &[u8]) -> Self {
        let n = group_n();
        let v = BigUint::from_bytes_be(verifier);
        let b = BigUint::from_bytes_be(&random_bytes::<32>());
        let k = multiplier_k(&n);
        // B = (k·v + g^b) mod N
        let public_b = (&k * &v + group_g().modpow(&b, &n)) % &n;
        Self {
            verifier: v,
            b,
            public_b,
            derived: None,
        }
    }

    /// Server public value `B`, padded to the group width.
    pub fn public_value(&self) -> [u8; GROUP_BYTES] {
        pad(&self.public_b)
    }

    /// Absorb the client public value `A` and derive the session key
    /// and both proofs.
    ///
    /// Rejects `A ≡ 0 (mod N)`, which would let a client force `S = 0`.
    pub fn compute_key(&mut self, client_a: &[u8]) -> Result<[u8; 32]> {
        let n = group_n();
        let a = BigUint::from_bytes_be(client_a);
        if (&a % &n) == BigUint::ZERO {
            return Err(ProtocolViolation::DegenerateClientKey.into());
        }

        let u = BigUint::from_bytes_be(&hash_parts(&[&pad(&a), &pad(&self.public_b)]));
        // S = (A·v^u)^b mod N
        let s = ((&a % &n) * self.verifier.modpow(&u, &n) % &n).modpow(&self.b, &n);
        let session_key = hash_parts(&[&pad(&s)]);

        let client_proof = hash_parts(&[&pad(&a), &pad(&self.public_b), &session_key]);
        let server_proof = hash_parts(&[&pad(&a), &client_proof, &session_key]);

        self.derived = Some(Derived {
            session_key,
            client_proof,
            server_proof,
        });
        Ok(session_key)
    }

    /// Check the client's proof `M` in constant time.
    pub fn verify_client_proof(&self, proof: &[u8]) -> bool {
        match &self.derived {
            Some(d) => digests_equal(&d.client_proof, proof),
            None => false,
        }
    }

    /// Server proof `HAMK`, valid only after [`ServerSession::compute_key`].
    pub fn server_proof(&self) -> Option<[u8; 32]> {
        self.derived.as_ref().map(|d| d.server_proof)
    }

    pub fn session_key(&self) -> Option<[u8; 32]> {
        self.derived.as_ref().map(|d| d.session_key)
    }
}

// ── Client half ──────────────────────────────────────────────

/// Client side of the handshake.  The firmware never runs this path;
/// it exists for integration tests and the provisioning CLI tooling.
pub mod client {
    use super::{
        BigUint, GROUP_BYTES, digests_equal, group_g, group_n, hash_parts, multiplier_k, pad,
        random_bytes,
    };

    pub struct ClientSession {
        a: BigUint,
        public_a: BigUint,
        identity_hash: [u8; 32],
        derived: Option<ClientDerived>,
    }

    struct ClientDerived {
        session_key: [u8; 32],
        server_proof: [u8; 32],
    }

    impl ClientSession {
        pub fn new(identity_hash: [u8; 32]) -> Self {
            let n = group_n();
            let a = BigUint::from_bytes_be(&random_bytes::<32>());
            let public_a = group_g().modpow(&a, &n);
            Self {
                a,
                public_a,
                identity_hash,
                derived: None,
            }
        }

        pub fn public_value(&self) -> [u8; GROUP_BYTES] {
            pad(&self.public_a)
        }

        /// Absorb salt and server public value, derive key and proofs.
        /// Returns the proof `M` to send to the server.
        pub fn process_challenge(&mut self, salt: &[u8], server_b: &[u8]) -> [u8; 32] {
            let n = group_n();
            let b_pub = BigUint::from_bytes_be(server_b);
            let k = multiplier_k(&n);
            let x = BigUint::from_bytes_be(&hash_parts(&[salt, &self.identity_hash]));
            let u = BigUint::from_bytes_be(&hash_parts(&[&pad(&self.public_a), &pad(&b_pub)]));

            // S = (B - k·g^x)^(a + u·x) mod N
            let gx = group_g().modpow(&x, &n);
            let base = ((&b_pub % &n) + &n - (&k * &gx % &n)) % &n;
            let exp = &self.a + &u * &x;
            let s = base.modpow(&exp, &n);
            let session_key = hash_parts(&[&pad(&s)]);

            let client_proof =
                hash_parts(&[&pad(&self.public_a), &pad(&b_pub), &session_key]);
            let server_proof = hash_parts(&[&pad(&self.public_a), &client_proof, &session_key]);

            self.derived = Some(ClientDerived {
                session_key,
                server_proof,
            });
            client_proof
        }

        pub fn verify_server_proof(&self, proof: &[u8]) -> bool {
            match &self.derived {
                Some(d) => digests_equal(&d.server_proof, proof),
                None => false,
            }
        }

        pub fn session_key(&self) -> Option<[u8; 32]> {
            self.derived.as_ref().map(|d| d.session_key)
        }
    }
}

// ── Tests ────────────────────────────────────────────────────
