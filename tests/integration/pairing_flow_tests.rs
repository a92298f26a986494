//! End-to-end pairing handshake coverage: the happy path and every
//! violation that must tear the session down to a fresh passcode.

use serde_json::json;

use sphere_setup::adapters::ble::Characteristic;
use sphere_setup::config::SetupConfig;
use sphere_setup::error::{Error, ProtocolViolation};
use sphere_setup::pairing::{lock_session, srp};
use sphere_setup::rpc::codec;
use sphere_setup::rpc::envelope::RpcResponse;
use sphere_setup::rpc::router::{Router, reply_now};
use sphere_setup::transport::{FINAL_FLAG, WriteReassembly, frame_message};

use crate::mock_ports::{PairedClient, RecordingUi};

fn ping_router() -> Router {
    let mut router = Router::new();
    router.register("sphere.setup.ping", |req| {
        reply_now(RpcResponse::result(req.id, json!(1234)))
    });
    router
}

fn client() -> PairedClient {
    PairedClient::unpaired(&SetupConfig::default(), RecordingUi::new(), ping_router())
}

#[test]
fn full_handshake_verifies_both_sides() {
    let mut c = client();
    c.pair();
    assert_eq!(c.session_state(), "Verified");
}

#[test]
fn ping_answers_over_encrypted_channel() {
    let mut c = client();
    c.pair();
    let resp = c.call("sphere.setup.ping", json!([]));
    assert_eq!(resp.result, Some(json!(1234)));
    assert!(resp.error.is_none());
}

#[test]
fn verified_channel_survives_multiple_calls() {
    let mut c = client();
    c.pair();
    for _ in 0..5 {
        let resp = c.call("sphere.setup.ping", json!([]));
        assert_eq!(resp.result, Some(json!(1234)));
    }
    assert_eq!(c.session_state(), "Verified");
}

#[test]
fn wrong_passcode_fails_proof_and_rotates_code() {
    let c = client();
    let code = c.begin_handshake();

    // Off-by-one guess for the displayed code.
    let digits: u32 = code.parse().unwrap();
    let guess = format!("{:04}", (digits + 1) % 10_000);

    let ih = srp::hash_credentials("spheramid", &guess);
    let mut cli = srp::client::ClientSession::new(ih);
    c.write_chunked(Characteristic::BytesA, &cli.public_value())
        .unwrap();

    let salt = c.read_value(Characteristic::BytesS, srp::SALT_BYTES);
    let server_b = c.read_value(Characteristic::BytesB, srp::GROUP_BYTES);
    let proof = cli.process_challenge(&salt, &server_b);

    let codes_before = c.ui.codes_shown();
    let err = c
        .write_chunked(Characteristic::BytesM, &proof)
        .unwrap_err();
    assert_eq!(err, Error::Protocol(ProtocolViolation::ProofMismatch));
    assert_eq!(c.session_state(), "AwaitingIntent");
    assert!(c.ui.codes_shown() > codes_before, "reset must show a fresh code");
}

#[test]
fn zero_client_public_value_resets_session() {
    let mut c = client();
    c.begin_handshake();
    // A ≡ 0 mod N lets anyone force S = 0; the hub must refuse it.
    let err = c
        .write_chunked(Characteristic::BytesA, &[0u8; srp::GROUP_BYTES])
        .unwrap_err();
    assert_eq!(err, Error::Protocol(ProtocolViolation::DegenerateClientKey));
    assert_eq!(c.session_state(), "AwaitingIntent");

    // The reset is recoverable: a full pairing still goes through.
    c.pair();
    assert_eq!(c.session_state(), "Verified");
}

#[test]
fn handshake_reads_out_of_order_reset_session() {
    let c = client();
    c.begin_handshake();
    // Salt is only readable once the client public value is in.
    assert!(c.svc.handle_read(Characteristic::BytesS, 0).is_err());
    assert_eq!(c.session_state(), "AwaitingIntent");
}

#[test]
fn proof_of_wrong_length_is_rejected() {
    let c = client();
    let code = c.begin_handshake();
    let ih = srp::hash_credentials("spheramid", &code);
    let cli = srp::client::ClientSession::new(ih);
    c.write_chunked(Characteristic::BytesA, &cli.public_value())
        .unwrap();

    let err = c
        .write_chunked(Characteristic::BytesM, &[0xAA; 16])
        .unwrap_err();
    assert_eq!(err, Error::Protocol(ProtocolViolation::ProofMismatch));
    assert_eq!(c.session_state(), "AwaitingIntent");
}

#[test]
fn rpc_write_before_verification_resets_session() {
    let c = client();
    c.begin_handshake();
    let mut frame = FINAL_FLAG.to_le_bytes().to_vec();
    frame.extend_from_slice(b"premature");
    let err = c.svc.handle_write(Characteristic::Comms, &frame).unwrap_err();
    assert_eq!(err, Error::Protocol(ProtocolViolation::WrongState));
    assert_eq!(c.session_state(), "AwaitingIntent");
}

#[test]
fn replayed_iv_resets_session() {
    let mut c = client();
    c.pair();

    let req = serde_json::to_vec(&json!({
        "jsonrpc": "2.0", "id": 1, "method": "sphere.setup.ping", "params": [],
    }))
    .unwrap();

    // First message with IV 1 goes through.
    let sealed = codec::seal(&c.session_key(), &req, 1);
    for frame in frame_message(&sealed) {
        c.svc.handle_write(Characteristic::Comms, &frame).unwrap();
    }
    c.await_notify();

    // Replaying the identical frames must tear the channel down.
    let mut outcome = Ok(());
    for frame in frame_message(&sealed) {
        outcome = c.svc.handle_write(Characteristic::Comms, &frame).map(|_| ());
        if outcome.is_err() {
            break;
        }
    }
    assert_eq!(
        outcome.unwrap_err(),
        Error::Protocol(ProtocolViolation::IvViolation)
    );
    assert_eq!(c.session_state(), "AwaitingIntent");
}

#[test]
fn initial_iv_zero_is_rejected() {
    let mut c = client();
    c.pair();
    // Zero is the hub's initial ledger value, never a usable counter.
    let sealed = codec::seal(&c.session_key(), b"{}", 0);
    let mut outcome = Ok(());
    for frame in frame_message(&sealed) {
        outcome = c.svc.handle_write(Characteristic::Comms, &frame).map(|_| ());
        if outcome.is_err() {
            break;
        }
    }
    assert_eq!(
        outcome.unwrap_err(),
        Error::Protocol(ProtocolViolation::IvViolation)
    );
    assert_eq!(c.session_state(), "AwaitingIntent");
}

#[test]
fn first_response_iv_is_midpoint_plus_one() {
    let mut c = client();
    c.pair();
    c.send_raw(
        br#"{"jsonrpc":"2.0","id":9,"method":"sphere.setup.ping","params":[]}"#,
    )
    .unwrap();

    let mut reassembly = WriteReassembly::new(2048);
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        match lock_session(c.svc.session()).pop_outbound() {
            Some(frame) => {
                if let Some(sealed) = reassembly.accept_chunk(&frame).unwrap() {
                    let (iv, _) = codec::split_sealed(&sealed).unwrap();
                    assert_eq!(iv, codec::IV_MIDPOINT + 1);
                    return;
                }
            }
            None => {
                assert!(std::time::Instant::now() < deadline, "no response queued");
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
        }
    }
}

#[test]
fn client_iv_from_upper_half_is_rejected() {
    let mut c = client();
    c.pair();
    // The upper half belongs to the hub's responses.
    let sealed = codec::seal(&c.session_key(), b"{}", codec::IV_MIDPOINT);
    let mut outcome = Ok(());
    for frame in frame_message(&sealed) {
        outcome = c.svc.handle_write(Characteristic::Comms, &frame).map(|_| ());
        if outcome.is_err() {
            break;
        }
    }
    assert_eq!(
        outcome.unwrap_err(),
        Error::Protocol(ProtocolViolation::IvViolation)
    );
}

#[test]
fn garbage_ciphertext_resets_session() {
    let mut c = client();
    c.pair();
    // Sealed message shorter than IV prefix + one block.
    let mut frame = FINAL_FLAG.to_le_bytes().to_vec();
    frame.extend_from_slice(&[0u8; 10]);
    assert!(c.svc.handle_write(Characteristic::Comms, &frame).is_err());
    assert_eq!(c.session_state(), "AwaitingIntent");
}

#[test]
fn intent_writes_are_rate_limited() {
    let config = SetupConfig::default();
    let c = PairedClient::unpaired(&config, RecordingUi::new(), ping_router());

    for _ in 0..config.intent_burst {
        c.svc
            .handle_write(Characteristic::PairIntent, &[0x01])
            .expect("within burst");
    }
    let err = c
        .svc
        .handle_write(Characteristic::PairIntent, &[0x01])
        .unwrap_err();
    assert_eq!(err, Error::Protocol(ProtocolViolation::RateLimited));
    // A rejected intent must not disturb the session already open.
    assert_eq!(c.session_state(), "AwaitingClientPublicValue");
}

#[test]
fn malformed_intent_value_resets() {
    let c = client();
    c.begin_handshake();
    assert!(c.svc.handle_write(Characteristic::PairIntent, &[0x02]).is_err());
    assert_eq!(c.session_state(), "AwaitingIntent");
}

#[test]
fn link_drop_invalidates_verified_session() {
    let mut c = client();
    c.pair();
    c.svc.on_link_dropped();
    assert_eq!(c.session_state(), "AwaitingIntent");

    // Old key is useless now.
    let sealed = codec::seal(&c.session_key(), b"{}", 1);
    let mut failed = false;
    for frame in frame_message(&sealed) {
        if c.svc.handle_write(Characteristic::Comms, &frame).is_err() {
            failed = true;
            break;
        }
    }
    assert!(failed);
}

#[test]
fn stale_handler_response_is_fenced_after_reset() {
    let mut c = client();
    c.pair();
    let generation = lock_session(c.svc.session()).generation();

    // Reset while nothing is queued, then try to queue with the old
    // generation the way a late worker would.
    lock_session(c.svc.session()).reset("test: simulated staleness");
    let mut s = lock_session(c.svc.session());
    s.queue_response(generation, b"{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":1}");
    assert!(s.pop_outbound().is_none(), "stale response must be dropped");
}
