//! Station bring-up decisions, kept free of ESP-IDF types so they run on the host.

use crate::config::{ConfigError, NetworkConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticIpv4 {
    pub ip: [u8; 4],
    pub gateway: [u8; 4],
    pub prefix_len: u8,
    pub dns: Option<[u8; 4]>,
}

/// Why the device falls back to its setup access point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupReason {
    MissingCredentials,
    InvalidStaticIp(ConfigError),
    JoinFailed { attempts: u32 },
}

impl SetupReason {
    pub fn describe(&self) -> String {
        match self {
            Self::MissingCredentials => "no wifi credentials stored".to_string(),
            Self::InvalidStaticIp(err) => format!("static IP settings rejected: {err}"),
            Self::JoinFailed { attempts } => format!("station join failed {attempts} times"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StationPlan {
    Join {
        ssid: String,
        password: String,
        static_ip: Option<StaticIpv4>,
    },
    Setup(SetupReason),
}

pub fn plan_station(network: &NetworkConfig) -> StationPlan {
    if !network.has_station_credentials() {
        return StationPlan::Setup(SetupReason::MissingCredentials);
    }

    let static_ip = if network.use_static_ip {
        match static_ipv4(network) {
            Ok(settings) => Some(settings),
            Err(err) => return StationPlan::Setup(SetupReason::InvalidStaticIp(err)),
        }
    } else {
        None
    };

    StationPlan::Join {
        ssid: network.wifi_ssid.trim().to_string(),
        password: network.wifi_pass.clone(),
        static_ip,
    }
}

fn static_ipv4(network: &NetworkConfig) -> Result<StaticIpv4, ConfigError> {
    let (Some(ip), Some(gateway), Some(subnet)) =
        (network.static_ip, network.gateway, network.subnet)
    else {
        return Err(ConfigError::IncompleteStaticIp);
    };
    let prefix_len = prefix_len(subnet).ok_or(ConfigError::InvalidSubnetMask)?;

    Ok(StaticIpv4 {
        ip,
        gateway,
        prefix_len,
        dns: network.dns,
    })
}

/// Prefix length of a contiguous netmask such as `255.255.255.0`.
pub fn prefix_len(mask: [u8; 4]) -> Option<u8> {
    let bits = u32::from_be_bytes(mask);
    let ones = bits.leading_ones();
    (bits.checked_shl(ones).unwrap_or(0) == 0).then_some(ones as u8)
}

/// How many times the station join is tried before giving up, and how long
/// to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay_ms: 3_000,
        }
    }
}

impl RetryPolicy {
    /// Calls `attempt` with a 1-based attempt number until it succeeds. `pause`
    /// runs between failed tries, never after the last one.
    pub fn run<T, E>(
        &self,
        mut attempt: impl FnMut(u32) -> Result<T, E>,
        mut pause: impl FnMut(u32, &E),
    ) -> Result<T, E> {
        let attempts = self.attempts.max(1);
        let mut number = 1;
        loop {
            match attempt(number) {
                Ok(value) => return Ok(value),
                Err(err) if number < attempts => pause(number, &err),
                Err(err) => return Err(err),
            }
            number += 1;
        }
    }
}
