//! Drives a write-reassembly buffer with attacker-controlled frame
//! sequences.  The input is split into frames by a leading length byte,
//! so the fuzzer explores header bits, offsets and payload sizes.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sphere_setup::transport::{ACK_CONSUMED, WriteReassembly};

const CAPACITY: usize = 1024;

fuzz_target!(|data: &[u8]| {
    let mut reassembly = WriteReassembly::new(CAPACITY);
    let mut rest = data;

    while let Some((&len, tail)) = rest.split_first() {
        let take = (len as usize).min(tail.len());
        let (frame, remainder) = tail.split_at(take);
        rest = remainder;

        if let Ok(Some(message)) = reassembly.accept_chunk(frame) {
            assert!(message.len() <= CAPACITY);
            assert_eq!(reassembly.pending_ack(), ACK_CONSUMED);
        }
        let ack = reassembly.pending_ack();
        assert!(ack == ACK_CONSUMED || (ack as usize) <= CAPACITY);
    }
});
