use serde::Serialize;
use strum::Display;

use super::snapshot::DeviceRationale;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionGroup {
    /// Locked by a timing or completion constraint
    Mandatory,
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Reason {
    #[strum(to_string = "Minimum on time not met")]
    MinOnTime,
    #[strum(to_string = "Minimum on time not met, amperage re-optimized")]
    MinOnTimeReoptimized,
    #[strum(to_string = "Minimum on time not met, tariff allows full draw")]
    MinOnTimeFullDraw,
    #[strum(to_string = "Minimum off time not met")]
    MinOffTime,
    #[strum(to_string = "Task completed")]
    TaskCompleted,
    #[strum(to_string = "Already on")]
    AlreadyOn,
    #[strum(to_string = "Turned on")]
    TurnedOn,
    #[strum(to_string = "Not enough power available")]
    NotEnoughPower,
    #[strum(to_string = "Free tariff, maximum draw")]
    FreeTariff,
    #[strum(to_string = "Below daily minimum energy")]
    BelowDailyMinimum,
    #[strum(to_string = "Daily minimum energy reached")]
    DailyMinimumReached,
    #[strum(to_string = "No daily minimum configured")]
    NoDailyMinimum,
    #[strum(to_string = "Tariff is not cheap")]
    TariffNotCheap,
}

/// Desired end state of one device for the current cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub name: String,
    pub desired_on: bool,
    pub desired_amperage: Option<f64>,
    /// Expected draw once applied (W)
    pub power_w: f64,
    pub reason: Reason,
    pub group: DecisionGroup,
}

impl Decision {
    pub fn on(
        name: &str,
        amperage: Option<f64>,
        power_w: f64,
        reason: Reason,
        group: DecisionGroup,
    ) -> Self {
        Self {
            name: name.to_string(),
            desired_on: true,
            desired_amperage: amperage,
            power_w,
            reason,
            group,
        }
    }

    pub fn off(name: &str, reason: Reason, group: DecisionGroup) -> Self {
        Self {
            name: name.to_string(),
            desired_on: false,
            desired_amperage: None,
            power_w: 0.0,
            reason,
            group,
        }
    }

    pub fn is_mandatory(&self) -> bool {
        self.group == DecisionGroup::Mandatory
    }
}

/// Decisions keyed by device name, in the order they were first made.
///
/// Built up over one cycle and applied once at the end.
#[derive(Debug, Clone, Default)]
pub struct DecisionTable {
    entries: Vec<Decision>,
}

impl DecisionTable {
    /// Insert or replace, keeping the original position of a replaced entry.
    pub fn set(&mut self, decision: Decision) {
        match self.entries.iter_mut().find(|d| d.name == decision.name) {
            Some(slot) => *slot = decision,
            None => self.entries.push(decision),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Decision> {
        self.entries.iter().find(|d| d.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Decision> {
        self.entries.iter_mut().find(|d| d.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Decision> {
        self.entries.iter()
    }

    /// Names of mandatory devices that must stay on.
    pub fn locked_on(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|d| d.is_mandatory() && d.desired_on)
            .map(|d| d.name.clone())
            .collect()
    }

    pub fn rationale(&self, group: DecisionGroup) -> Vec<DeviceRationale> {
        self.entries
            .iter()
            .filter(|d| d.group == group)
            .map(|d| DeviceRationale {
                name: d.name.clone(),
                power: d.power_w,
                reason: d.reason.to_string(),
            })
            .collect()
    }
}
