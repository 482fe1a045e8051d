pub mod api;
pub mod codes;
pub mod config;
pub mod fan;
pub mod network;
pub mod page;
pub mod types;

pub use codes::{nec, FanCode, IrCodeSet};
pub use config::{ConfigError, IrHardwareConfig, NetworkConfig, RuntimeConfig};
pub use fan::{FanAction, FanController, FanRoute, FanTracker};
pub use network::{plan_station, RetryPolicy, SetupReason, StationPlan};
pub use page::{render_index, render_setup_page};
pub use types::{FanPower, FanStatus};
