use crate::{
    codes::FanCode,
    types::{FanPower, FanStatus},
};

/// The five POST routes the controller answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanRoute {
    Toggle,
    AddPower,
    LowerPower,
    SyncOn,
    SyncOff,
}

impl FanRoute {
    pub const ALL: [FanRoute; 5] = [
        Self::Toggle,
        Self::AddPower,
        Self::LowerPower,
        Self::SyncOn,
        Self::SyncOff,
    ];

    pub fn path(self) -> &'static str {
        match self {
            Self::Toggle => "/toggle",
            Self::AddPower => "/send_add_power",
            Self::LowerPower => "/send_lower_power",
            Self::SyncOn => "/sync_on",
            Self::SyncOff => "/sync_off",
        }
    }

    /// Matches on the path component only; any query string is ignored.
    pub fn from_path(path: &str) -> Option<Self> {
        let path = path.split_once('?').map_or(path, |(path, _)| path);
        Self::ALL.into_iter().find(|route| route.path() == path)
    }

    pub fn as_str(self) -> &'static str {
        self.path().trim_start_matches('/')
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Toggle => "Toggle Power",
            Self::AddPower => "Add Power",
            Self::LowerPower => "Lower Power",
            Self::SyncOn => "Mark as ON",
            Self::SyncOff => "Mark as OFF",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanAction {
    Send(FanCode),
}

/// Presumed fan power. Nothing is ever observed, so this is only as good as
/// the commands that reached the fan.
#[derive(Debug, Clone, Default)]
pub struct FanTracker {
    power: FanPower,
    toggles: u64,
    last_change_ms: Option<u64>,
}

impl FanTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn power(&self) -> FanPower {
        self.power
    }

    pub fn is_on(&self) -> bool {
        self.power.is_on()
    }

    pub fn toggles(&self) -> u64 {
        self.toggles
    }

    pub fn last_change_ms(&self) -> Option<u64> {
        self.last_change_ms
    }

    pub fn toggle(&mut self, now_ms: u64) -> FanPower {
        self.power = self.power.flipped();
        self.toggles = self.toggles.saturating_add(1);
        self.last_change_ms = Some(now_ms);
        self.power
    }

    pub fn sync(&mut self, power: FanPower, now_ms: u64) -> bool {
        if self.power == power {
            return false;
        }
        self.power = power;
        self.last_change_ms = Some(now_ms);
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct FanController {
    tracker: FanTracker,
    last_route: Option<FanRoute>,
}

impl FanController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracker(&self) -> &FanTracker {
        &self.tracker
    }

    pub fn power(&self) -> FanPower {
        self.tracker.power()
    }

    /// Applies the route's state effect and returns the transmissions the
    /// caller has to perform.
    pub fn dispatch(&mut self, route: FanRoute, now_ms: u64) -> Vec<FanAction> {
        self.last_route = Some(route);
        match route {
            FanRoute::Toggle => {
                self.tracker.toggle(now_ms);
                vec![FanAction::Send(FanCode::Power)]
            }
            FanRoute::AddPower => vec![FanAction::Send(FanCode::SpeedUp)],
            FanRoute::LowerPower => vec![FanAction::Send(FanCode::SpeedDown)],
            FanRoute::SyncOn => {
                self.tracker.sync(FanPower::On, now_ms);
                Vec::new()
            }
            FanRoute::SyncOff => {
                self.tracker.sync(FanPower::Off, now_ms);
                Vec::new()
            }
        }
    }

    pub fn status(&self) -> FanStatus {
        FanStatus {
            power: self.tracker.power().as_str(),
            fan_on: self.tracker.is_on(),
            toggles: self.tracker.toggles(),
            last_command: self.last_route.map(FanRoute::as_str),
            last_change_ms: self.tracker.last_change_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn boots_presumed_off() {
        let controller = FanController::new();
        assert_eq!(controller.power(), FanPower::Off);
        assert_eq!(controller.status().last_command, None);
    }

    #[test]
    fn toggle_flips_state_and_sends_power() {
        let mut controller = FanController::new();

        let actions = controller.dispatch(FanRoute::Toggle, 10);
        assert_eq!(actions, vec![FanAction::Send(FanCode::Power)]);
        assert_eq!(controller.power(), FanPower::On);

        let actions = controller.dispatch(FanRoute::Toggle, 20);
        assert_eq!(actions, vec![FanAction::Send(FanCode::Power)]);
        assert_eq!(controller.power(), FanPower::Off);
        assert_eq!(controller.tracker().toggles(), 2);
        assert_eq!(controller.tracker().last_change_ms(), Some(20));
    }

    #[test]
    fn power_levels_transmit_without_touching_state() {
        let mut controller = FanController::new();

        assert_eq!(
            controller.dispatch(FanRoute::AddPower, 5),
            vec![FanAction::Send(FanCode::SpeedUp)]
        );
        assert_eq!(
            controller.dispatch(FanRoute::LowerPower, 6),
            vec![FanAction::Send(FanCode::SpeedDown)]
        );
        assert_eq!(controller.power(), FanPower::Off);
        assert_eq!(controller.tracker().last_change_ms(), None);
        assert_eq!(controller.status().last_command, Some("send_lower_power"));
    }

    #[test]
    fn sync_sets_state_without_transmitting() {
        let mut controller = FanController::new();

        assert!(controller.dispatch(FanRoute::SyncOn, 100).is_empty());
        assert_eq!(controller.power(), FanPower::On);

        assert!(controller.dispatch(FanRoute::SyncOn, 200).is_empty());
        assert_eq!(controller.tracker().last_change_ms(), Some(100));

        assert!(controller.dispatch(FanRoute::SyncOff, 300).is_empty());
        assert_eq!(controller.power(), FanPower::Off);
        assert_eq!(controller.tracker().toggles(), 0);
    }

    #[test]
    fn tracker_sync_reports_whether_power_changed() {
        let mut tracker = FanTracker::new();

        assert!(!tracker.sync(FanPower::Off, 10));
        assert_eq!(tracker.last_change_ms(), None);

        assert!(tracker.sync(FanPower::On, 20));
        assert!(tracker.is_on());
        assert!(!tracker.sync(FanPower::On, 30));
        assert_eq!(tracker.last_change_ms(), Some(20));

        assert!(tracker.sync(FanPower::Off, 40));
        assert_eq!(tracker.toggles(), 0);
    }

    #[test]
    fn routes_resolve_from_paths() {
        for route in FanRoute::ALL {
            assert_eq!(FanRoute::from_path(route.path()), Some(route));
        }
        assert_eq!(FanRoute::from_path("/toggle?junk=1"), Some(FanRoute::Toggle));
        assert_eq!(FanRoute::from_path("/"), None);
        assert_eq!(FanRoute::from_path("/toggle/"), None);
        assert_eq!(FanRoute::from_path("toggle"), None);
    }

    #[test]
    fn status_reflects_tracker() {
        let mut controller = FanController::new();
        controller.dispatch(FanRoute::Toggle, 42);

        assert_eq!(
            controller.status(),
            FanStatus {
                power: "ON",
                fan_on: true,
                toggles: 1,
                last_command: Some("toggle"),
                last_change_ms: Some(42),
            }
        );
    }
}
