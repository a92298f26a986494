//! System configuration parameters
//!
//! All tunable parameters for the setup assistant.  Values can be
//! overridden via NVS (non-volatile storage); the defaults match the
//! shipped hub image.

use heapless::String;
use serde::{Deserialize, Serialize};

/// Core setup-assistant configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupConfig {
    // --- Identity ---
    /// Fixed SRP username presented by the hub.
    pub srp_username: String<32>,
    /// Advertised BLE device name in normal operation.
    pub device_name: String<32>,
    /// Advertised BLE device name in factory-reset mode.
    pub reset_device_name: String<32>,
    /// Factory-reset mode flag (set by the recovery boot path).
    pub factory_reset: bool,

    // --- Timing ---
    /// How long to wait for a link-state event after applying credentials
    /// before reporting a connect failure (seconds).
    pub wifi_connect_timeout_secs: u16,
    /// Bounded wait for a deferred RPC handler to produce a response
    /// (seconds).
    pub rpc_call_timeout_secs: u16,
    /// Control-mode heartbeat interval (seconds).
    pub heartbeat_interval_secs: u16,
    /// How long the hub may stay offline before the supervision loop
    /// re-enables pairing (seconds).
    pub wifi_stale_timeout_secs: u16,

    // --- Rate limiting ---
    /// Pair-intent write burst allowed before the token bucket (1
    /// token/second refill) starts rejecting.
    pub intent_burst: u16,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            srp_username: String::try_from("spheramid").unwrap_or_default(),
            device_name: String::try_from("ninjasphere").unwrap_or_default(),
            reset_device_name: String::try_from("resetsphere").unwrap_or_default(),
            factory_reset: false,

            wifi_connect_timeout_secs: 15,
            rpc_call_timeout_secs: 10,
            heartbeat_interval_secs: 5,
            wifi_stale_timeout_secs: 30,

            intent_burst: 5,
        }
    }
}

impl SetupConfig {
    /// Name this hub advertises over BLE for the current operating mode.
    pub fn advertised_name(&self) -> &str {
        if self.factory_reset {
            &self.reset_device_name
        } else {
            &self.device_name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let c = SetupConfig::default();
        assert_eq!(c.srp_username.as_str(), "spheramid");
        assert!(c.wifi_connect_timeout_secs > 0);
        assert!(c.rpc_call_timeout_secs > 0);
        assert!(c.heartbeat_interval_secs > 0);
        assert!(c.intent_burst > 0);
    }

    #[test]
    fn advertised_name_follows_mode() {
        let mut c = SetupConfig::default();
        assert_eq!(c.advertised_name(), "ninjasphere");
        c.factory_reset = true;
        assert_eq!(c.advertised_name(), "resetsphere");
    }

    #[test]
    fn stale_timeout_exceeds_connect_wait() {
        let c = SetupConfig::default();
        assert!(
            c.wifi_stale_timeout_secs > c.wifi_connect_timeout_secs,
            "staleness fallback must not fire while a connect is still pending"
        );
    }

    #[test]
    fn serde_roundtrip() {
        let c = SetupConfig::default();
        let json = serde_json::to_string(&c).unwrap();
        let c2: SetupConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(c.srp_username, c2.srp_username);
        assert_eq!(c.wifi_connect_timeout_secs, c2.wifi_connect_timeout_secs);
        assert_eq!(c.factory_reset, c2.factory_reset);
    }

    #[test]
    fn postcard_roundtrip() {
        let c = SetupConfig::default();
        let bytes = postcard::to_allocvec(&c).unwrap();
        let c2: SetupConfig = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(c.device_name, c2.device_name);
        assert_eq!(c.heartbeat_interval_secs, c2.heartbeat_interval_secs);
    }
}
