//! JSON-RPC 2.0 envelopes.
//!
//! Requests carry positional `params` (an array of objects); responses
//! echo the request `id` so concurrent in-flight calls can be
//! demultiplexed by the client.

extern crate alloc;
use alloc::string::String;
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Error codes ──────────────────────────────────────────────

/// JSON could not be parsed.
pub const PARSE_ERROR: i32 = -32700;
/// No handler registered for the method.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Handler failed without producing a response.
pub const INTERNAL_ERROR: i32 = -32603;
/// Domain failure (wrong WiFi key, connect timeout, updater refusal).
pub const DOMAIN_ERROR: i32 = 500;

// ── Envelopes ────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcResponse {
    pub fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: String::from("2.0"),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i32, message: &str) -> Self {
        Self {
            jsonrpc: String::from("2.0"),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: String::from(message),
                data: None,
            }),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────
