//! JSON-RPC method router.
//!
//! Handlers return a [`ResponseSlot`] instead of a response value, so a
//! handler that must wait on an external subsystem (WiFi association,
//! the updater) can hand the slot to a worker and reply later.  Quick
//! handlers use [`reply_now`].  Responses are matched to requests by
//! `id` and may complete out of order across distinct requests.

extern crate alloc;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;

use core::time::Duration;
use std::sync::mpsc;

use log::debug;
use serde_json::Value;

use super::envelope::{METHOD_NOT_FOUND, PARSE_ERROR, RpcRequest, RpcResponse};

/// Receiving end of a deferred handler response.
pub type ResponseSlot = mpsc::Receiver<RpcResponse>;

type Handler = Box<dyn Fn(RpcRequest) -> ResponseSlot + Send + Sync>;

/// Outcome of dispatching one raw message.
pub enum Dispatch {
    /// Router-level failure answered without invoking any handler.
    Immediate(RpcResponse),
    /// Handler invoked; the response arrives through the slot.
    Deferred { id: Value, slot: ResponseSlot },
}

/// Build a slot that already holds `resp`, for handlers that can answer
/// synchronously.
pub fn reply_now(resp: RpcResponse) -> ResponseSlot {
    let (tx, rx) = mpsc::channel();
    let _ = tx.send(resp);
    rx
}

pub struct Router {
    handlers: BTreeMap<String, Handler>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    pub fn register(
        &mut self,
        method: &str,
        handler: impl Fn(RpcRequest) -> ResponseSlot + Send + Sync + 'static,
    ) {
        self.handlers.insert(String::from(method), Box::new(handler));
    }

    /// Parse and route one decrypted message.
    ///
    /// Malformed JSON answers `-32700`, echoing the request id when one
    /// can still be dug out of the body; unknown methods answer
    /// `-32601`.
    pub fn dispatch(&self, raw: &[u8]) -> Dispatch {
        let req: RpcRequest = match serde_json::from_slice(raw) {
            Ok(req) => req,
            Err(_) => {
                let id = serde_json::from_slice::<Value>(raw)
                    .ok()
                    .and_then(|v| v.get("id").cloned())
                    .unwrap_or(Value::Null);
                return Dispatch::Immediate(RpcResponse::error(id, PARSE_ERROR, "Parse error"));
            }
        };

        debug!("rpc: dispatch {} (id {})", req.method, req.id);
        match self.handlers.get(&req.method) {
            Some(handler) => {
                let id = req.id.clone();
                let slot = handler(req);
                Dispatch::Deferred { id, slot }
            }
            None => Dispatch::Immediate(RpcResponse::error(
                req.id,
                METHOD_NOT_FOUND,
                "Method not found",
            )),
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for the dispatched response, bounded by `timeout`.  A handler
/// that drops its slot or overruns the wait yields `-32603`.
pub fn await_response(dispatch: Dispatch, timeout: Duration) -> RpcResponse {
    match dispatch {
        Dispatch::Immediate(resp) => resp,
        Dispatch::Deferred { id, slot } => slot.recv_timeout(timeout).unwrap_or_else(|_| {
            RpcResponse::error(id, super::envelope::INTERNAL_ERROR, "Internal error")
        }),
    }
}

// ── Tests ────────────────────────────────────────────────────
