//! JSON payloads shared by the ESP32 and host HTTP servers.

use serde::{Deserialize, Serialize};

use crate::{
    config::{
        is_supported_rmt_channel, ConfigError, IrHardwareConfig, NetworkConfig, MAX_REPEAT_COUNT,
    },
    network::prefix_len,
};

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct NetworkConfigView {
    #[serde(rename = "wifiSsid")]
    pub wifi_ssid: String,
    #[serde(rename = "wifiPassSet")]
    pub wifi_pass_set: bool,
    #[serde(rename = "useStaticIp")]
    pub use_static_ip: bool,
    #[serde(rename = "staticIp")]
    pub static_ip: Option<[u8; 4]>,
    pub gateway: Option<[u8; 4]>,
    pub subnet: Option<[u8; 4]>,
    pub dns: Option<[u8; 4]>,
}

#[derive(Debug, Deserialize)]
pub struct NetworkConfigUpdate {
    #[serde(rename = "wifiSsid")]
    pub wifi_ssid: String,
    #[serde(rename = "wifiPass", default)]
    pub wifi_pass: Option<String>,
    #[serde(rename = "useStaticIp", default)]
    pub use_static_ip: bool,
    #[serde(rename = "staticIp", default)]
    pub static_ip: Option<[u8; 4]>,
    #[serde(default)]
    pub gateway: Option<[u8; 4]>,
    #[serde(default)]
    pub subnet: Option<[u8; 4]>,
    #[serde(default)]
    pub dns: Option<[u8; 4]>,
}

#[derive(Debug, Serialize)]
pub struct NetworkUpdateResponse {
    #[serde(rename = "restartRequired")]
    pub restart_required: bool,
    pub network: NetworkConfigView,
}

#[derive(Debug, Serialize)]
pub struct IrConfigView {
    #[serde(rename = "txPin")]
    pub tx_pin: i32,
    #[serde(rename = "rmtChannel")]
    pub rmt_channel: u8,
    #[serde(rename = "carrierKHz")]
    pub carrier_khz: u32,
    #[serde(rename = "repeatCount")]
    pub repeat_count: u8,
}

#[derive(Debug, Deserialize)]
pub struct IrConfigUpdate {
    #[serde(rename = "txPin")]
    pub tx_pin: i32,
    #[serde(rename = "rmtChannel")]
    pub rmt_channel: u8,
    #[serde(rename = "carrierKHz")]
    pub carrier_khz: u32,
    #[serde(rename = "repeatCount", default)]
    pub repeat_count: Option<u8>,
}

#[derive(Debug, Serialize)]
pub struct IrConfigUpdateResponse {
    #[serde(rename = "restartRequired")]
    pub restart_required: bool,
    pub ir: IrConfigView,
}

#[derive(Debug, Clone, Serialize)]
pub struct IrDiagnostics {
    pub enabled: bool,
    #[serde(rename = "carrierKHz")]
    pub carrier_khz: u32,
    #[serde(rename = "repeatCount")]
    pub repeat_count: u8,
    #[serde(rename = "repeatGapMs")]
    pub repeat_gap_ms: u64,
    #[serde(rename = "minSendIntervalMs")]
    pub min_send_interval_ms: u64,
    #[serde(rename = "lastSendMs")]
    pub last_send_ms: Option<u64>,
    #[serde(rename = "sentFrames")]
    pub sent_frames: u64,
    #[serde(rename = "failedActions")]
    pub failed_actions: u64,
    #[serde(rename = "lastError")]
    pub last_error: Option<String>,
}

pub fn build_network_config_view(network: &NetworkConfig) -> NetworkConfigView {
    NetworkConfigView {
        wifi_ssid: network.wifi_ssid.clone(),
        wifi_pass_set: !network.wifi_pass.is_empty(),
        use_static_ip: network.use_static_ip,
        static_ip: network.static_ip,
        gateway: network.gateway,
        subnet: network.subnet,
        dns: network.dns,
    }
}

pub fn validate_network_update(update: &NetworkConfigUpdate) -> Result<(), ConfigError> {
    if update.wifi_ssid.trim().is_empty() {
        return Err(ConfigError::EmptySsid);
    }
    if update.use_static_ip
        && (update.static_ip.is_none() || update.gateway.is_none() || update.subnet.is_none())
    {
        return Err(ConfigError::IncompleteStaticIp);
    }
    if let (true, Some(subnet)) = (update.use_static_ip, update.subnet) {
        if prefix_len(subnet).is_none() {
            return Err(ConfigError::InvalidSubnetMask);
        }
    }
    Ok(())
}

/// Applies a validated update and reports whether the station link has to be
/// re-established.
pub fn apply_network_update(network: &mut NetworkConfig, update: NetworkConfigUpdate) -> bool {
    let previous = network.clone();

    network.wifi_ssid = update.wifi_ssid.trim().to_string();
    if let Some(pass) = update.wifi_pass {
        network.wifi_pass = pass;
    }
    network.use_static_ip = update.use_static_ip;
    network.static_ip = update.static_ip;
    network.gateway = update.gateway;
    network.subnet = update.subnet;
    network.dns = update.dns;

    previous != *network
}

pub fn build_ir_config_view(ir: &IrHardwareConfig) -> IrConfigView {
    IrConfigView {
        tx_pin: ir.tx_pin,
        rmt_channel: ir.rmt_channel,
        carrier_khz: ir.carrier_khz,
        repeat_count: ir.repeat_count,
    }
}

pub fn validate_ir_update(update: &IrConfigUpdate) -> Result<(), ConfigError> {
    if update.tx_pin < 0 {
        return Err(ConfigError::InvalidTxPin);
    }
    if !is_supported_rmt_channel(update.rmt_channel) {
        return Err(ConfigError::UnsupportedRmtChannel);
    }
    if !(10..=100).contains(&update.carrier_khz) {
        return Err(ConfigError::CarrierOutOfRange);
    }
    if let Some(repeat_count) = update.repeat_count {
        if !(1..=MAX_REPEAT_COUNT).contains(&repeat_count) {
            return Err(ConfigError::RepeatCountOutOfRange);
        }
    }
    Ok(())
}

/// Applies a validated update. The RMT driver is only built at boot, so any
/// change requires a restart.
pub fn apply_ir_update(ir: &mut IrHardwareConfig, update: &IrConfigUpdate) -> bool {
    let previous = ir.clone();

    ir.tx_pin = update.tx_pin;
    ir.rmt_channel = update.rmt_channel;
    ir.carrier_khz = update.carrier_khz;
    if let Some(repeat_count) = update.repeat_count {
        ir.repeat_count = repeat_count;
    }
    ir.sanitize();

    previous != *ir
}
