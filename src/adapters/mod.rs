//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter     | Implements     | Connects to                   |
//! |-------------|----------------|-------------------------------|
//! | `ble`       | —              | Bluedroid GATT server         |
//! | `device_id` | —              | eFuse factory MAC             |
//! | `nvs`       | ConfigStore    | NVS / in-memory store         |
//! | `ui`        | PairingUi      | Serial log / display service  |
//! | `update`    | UpdateService  | esp-ota + HTTP firmware fetch |
//! | `wifi`      | WifiStation    | ESP-IDF WiFi STA              |

pub mod ble;
pub mod device_id;
pub mod nvs;
pub mod ui;
pub mod update;
pub mod wifi;
