//! Throws arbitrary decrypted bodies at the router.  Whatever comes in,
//! dispatch must produce a well-formed JSON-RPC response and never
//! panic or hang.

#![no_main]

use core::time::Duration;

use libfuzzer_sys::fuzz_target;
use sphere_setup::rpc::envelope::RpcResponse;
use sphere_setup::rpc::router::{Router, await_response, reply_now};

fn build_router() -> Router {
    let mut router = Router::new();
    router.register("sphere.setup.ping", |req| {
        reply_now(RpcResponse::result(req.id, serde_json::json!(1234)))
    });
    router
}

fuzz_target!(|data: &[u8]| {
    let router = build_router();
    let resp = await_response(router.dispatch(data), Duration::from_millis(50));

    // Every response serializes and carries either a result or an error.
    let bytes = serde_json::to_vec(&resp).expect("response serializes");
    assert!(!bytes.is_empty());
    assert!(resp.result.is_some() ^ resp.error.is_some());
});
