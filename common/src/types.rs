use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FanPower {
    On,
    #[default]
    Off,
}

impl FanPower {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
        }
    }

    pub fn is_on(self) -> bool {
        matches!(self, Self::On)
    }

    pub fn flipped(self) -> Self {
        match self {
            Self::On => Self::Off,
            Self::Off => Self::On,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FanStatus {
    pub power: &'static str,
    #[serde(rename = "fanOn")]
    pub fan_on: bool,
    pub toggles: u64,
    #[serde(rename = "lastCommand")]
    pub last_command: Option<&'static str>,
    #[serde(rename = "lastChangeMs")]
    pub last_change_ms: Option<u64>,
}
