//! Hub identity derived from the factory MAC address.

use core::fmt::Write;

/// Identity material burned into eFuse at the factory.  The last three
/// MAC bytes name the unit everywhere a human sees it: `SP-XXYYZZ` on
/// the sticker and in `connect_wifi_network` responses, `sphere-xxyyzz`
/// on the LAN.
pub struct DeviceIdentity {
    mac: [u8; 6],
}

impl DeviceIdentity {
    /// Read the factory MAC from eFuse.  Stable across reboots and
    /// reflashes.
    #[cfg(target_os = "espidf")]
    pub fn from_efuse() -> Self {
        let mut mac = [0u8; 6];
        unsafe {
            esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
        }
        Self { mac }
    }

    /// Simulation identity with a fixed MAC.
    #[cfg(not(target_os = "espidf"))]
    pub fn from_efuse() -> Self {
        Self {
            mac: [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE],
        }
    }

    pub fn mac(&self) -> [u8; 6] {
        self.mac
    }

    /// Printed serial, e.g. `SP-EFCAFE`.
    pub fn serial(&self) -> heapless::String<16> {
        let [.., x, y, z] = self.mac;
        let mut s = heapless::String::new();
        let _ = write!(s, "SP-{x:02X}{y:02X}{z:02X}");
        s
    }

    /// Network hostname, e.g. `sphere-efcafe`.
    pub fn hostname(&self) -> heapless::String<24> {
        let [.., x, y, z] = self.mac;
        let mut s = heapless::String::new();
        let _ = write!(s, "sphere-{x:02x}{y:02x}{z:02x}");
        s
    }
}

impl From<[u8; 6]> for DeviceIdentity {
    fn from(mac: [u8; 6]) -> Self {
        Self { mac }
    }
}
