use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Bucket a tariff-rate reading maps to.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TariffMode {
    #[default]
    Normal,
    Cheap,
    Free,
}

impl TariffMode {
    pub const ALL: [TariffMode; 3] = [TariffMode::Normal, TariffMode::Cheap, TariffMode::Free];

    /// Cheap and free windows allow loads to run at full draw.
    pub fn allows_full_draw(self) -> bool {
        matches!(self, TariffMode::Cheap | TariffMode::Free)
    }
}

/// Control branch selected for one cycle, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ControlMode {
    /// Free tariff: everything runs flat out, regardless of time of day.
    Free,
    /// Daylight: follow the measured export.
    Solar,
    /// Night with a non-free tariff: satisfy daily energy floors in cheap windows.
    Tariff,
}

impl ControlMode {
    pub fn select(tariff: TariffMode, daylight: bool) -> Self {
        if tariff == TariffMode::Free {
            ControlMode::Free
        } else if daylight {
            ControlMode::Solar
        } else {
            ControlMode::Tariff
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_tariff_mode_parsing() {
        assert_eq!(TariffMode::from_str("cheap").unwrap(), TariffMode::Cheap);
        assert_eq!(TariffMode::from_str("FREE").unwrap(), TariffMode::Free);
        assert!(TariffMode::from_str("expensive").is_err());
        assert_eq!(TariffMode::Normal.to_string(), "normal");
    }

    #[test]
    fn test_tariff_mode_serde() {
        let mode: TariffMode = serde_json::from_str("\"cheap\"").unwrap();
        assert_eq!(mode, TariffMode::Cheap);
        assert_eq!(serde_json::to_string(&TariffMode::Free).unwrap(), "\"free\"");
    }

    #[test]
    fn test_free_tariff_wins_over_daylight() {
        assert_eq!(ControlMode::select(TariffMode::Free, true), ControlMode::Free);
        assert_eq!(ControlMode::select(TariffMode::Free, false), ControlMode::Free);
        assert_eq!(ControlMode::select(TariffMode::Cheap, true), ControlMode::Solar);
        assert_eq!(ControlMode::select(TariffMode::Normal, false), ControlMode::Tariff);
        assert_eq!(ControlMode::select(TariffMode::Cheap, false), ControlMode::Tariff);
    }
}
