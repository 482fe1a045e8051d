use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codes::IrCodeSet;

pub const DEFAULT_TX_PIN: i32 = 4;
pub const DEFAULT_CARRIER_KHZ: u32 = 38;
pub const MAX_REPEAT_COUNT: u8 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("wifiSsid cannot be empty")]
    EmptySsid,
    #[error("staticIp, gateway, and subnet are required when useStaticIp is true")]
    IncompleteStaticIp,
    #[error("subnet must be a contiguous netmask")]
    InvalidSubnetMask,
    #[error("txPin must be >= 0")]
    InvalidTxPin,
    #[error("rmtChannel is not supported")]
    UnsupportedRmtChannel,
    #[error("carrierKHz must be between 10 and 100")]
    CarrierOutOfRange,
    #[error("repeatCount must be between 1 and 5")]
    RepeatCountOutOfRange,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub use_static_ip: bool,
    pub static_ip: Option<[u8; 4]>,
    pub gateway: Option<[u8; 4]>,
    pub subnet: Option<[u8; 4]>,
    pub dns: Option<[u8; 4]>,
}

impl NetworkConfig {
    pub fn has_station_credentials(&self) -> bool {
        let ssid = self.wifi_ssid.trim();
        !ssid.is_empty() && ssid != "CHANGE_ME"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrHardwareConfig {
    pub tx_pin: i32,
    pub rmt_channel: u8,
    pub carrier_khz: u32,
    #[serde(default = "default_repeat_count")]
    pub repeat_count: u8,
}

fn default_repeat_count() -> u8 {
    1
}

impl Default for IrHardwareConfig {
    fn default() -> Self {
        Self {
            tx_pin: DEFAULT_TX_PIN,
            rmt_channel: 0,
            carrier_khz: DEFAULT_CARRIER_KHZ,
            repeat_count: default_repeat_count(),
        }
    }
}

impl IrHardwareConfig {
    pub fn sanitize(&mut self) {
        if self.tx_pin < 0 {
            self.tx_pin = DEFAULT_TX_PIN;
        }

        if !is_supported_rmt_channel(self.rmt_channel) {
            self.rmt_channel = 0;
        }

        self.carrier_khz = self.carrier_khz.clamp(10, 100);
        self.repeat_count = self.repeat_count.clamp(1, MAX_REPEAT_COUNT);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub ir: IrHardwareConfig,
    #[serde(default)]
    pub codes: IrCodeSet,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.ir.sanitize();
        self.codes.sanitize();
    }
}

pub fn is_supported_rmt_channel(channel: u8) -> bool {
    channel <= 7
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let runtime: RuntimeConfig =
            serde_json::from_str(r#"{"network":{"wifi_ssid":"home","wifi_pass":"secret","use_static_ip":false,"static_ip":null,"gateway":null,"subnet":null,"dns":null}}"#)
                .unwrap();

        assert_eq!(runtime.network.wifi_ssid, "home");
        assert_eq!(runtime.ir, IrHardwareConfig::default());
        assert_eq!(runtime.codes, IrCodeSet::default());
    }

    #[test]
    fn ir_config_without_repeat_count_defaults_to_single_frame() {
        let ir: IrHardwareConfig =
            serde_json::from_str(r#"{"tx_pin":5,"rmt_channel":1,"carrier_khz":36}"#).unwrap();
        assert_eq!(ir.repeat_count, 1);
    }

    #[test]
    fn sanitize_clamps_hardware_fields() {
        let mut ir = IrHardwareConfig {
            tx_pin: -3,
            rmt_channel: 9,
            carrier_khz: 500,
            repeat_count: 0,
        };
        ir.sanitize();

        assert_eq!(
            ir,
            IrHardwareConfig {
                tx_pin: DEFAULT_TX_PIN,
                rmt_channel: 0,
                carrier_khz: 100,
                repeat_count: 1,
            }
        );
    }

    #[test]
    fn placeholder_ssid_is_not_a_credential() {
        let mut network = NetworkConfig::default();
        assert!(!network.has_station_credentials());

        network.wifi_ssid = " CHANGE_ME ".to_string();
        assert!(!network.has_station_credentials());

        network.wifi_ssid = "home".to_string();
        assert!(network.has_station_credentials());
    }
}
