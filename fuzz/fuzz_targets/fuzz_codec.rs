//! Feeds the channel codec attacker-controlled sealed messages and
//! checks that honest seal/unseal round-trips whatever bytes come in.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sphere_setup::rpc::codec;

fuzz_target!(|data: &[u8]| {
    // Need key + counter + at least one payload byte.
    if data.len() <= 40 {
        return;
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&data[..32]);
    let mut counter_bytes = [0u8; 8];
    counter_bytes.copy_from_slice(&data[32..40]);
    let counter = u64::from_le_bytes(counter_bytes);
    let payload = &data[40..];

    // Peer-controlled bytes must never panic the receive path.
    let _ = codec::split_sealed(payload);
    let _ = codec::decrypt(&key, payload, counter);

    // Honest round trip recovers the payload modulo NUL padding.
    let sealed = codec::seal(&key, payload, counter);
    let (found, ciphertext) = codec::split_sealed(&sealed).expect("sealed form is well formed");
    assert_eq!(found, counter);
    let plain = codec::decrypt(&key, ciphertext, counter).expect("own ciphertext decrypts");
    assert_eq!(&plain[..payload.len()], payload);
    assert!(plain[payload.len()..].iter().all(|&b| b == 0));
});
