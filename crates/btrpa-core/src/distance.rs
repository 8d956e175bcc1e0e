//! Distance estimation from RSSI.
//!
//! Uses the log-distance path loss model:
//!
//! ```text
//! distance = 10 ^ ((measured_power - rssi) / (10 * n))
//! ```
//!
//! `measured_power` is the expected RSSI at one metre. A calibrated
//! `ref_rssi` wins; otherwise it is derived from the advertised TX power.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;
use utoipa::ToSchema;

/// Offset (dB) subtracted from TX power to get the one-metre RSSI.
///
/// ~41 dB free-space loss at 1 m on 2.4 GHz plus ~18 dB of antenna and
/// enclosure loss. Matches the iBeacon convention of -59 dBm for 0 dBm TX.
pub const DEFAULT_REF_OFFSET: i16 = 59;

/// Propagation environment preset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Line of sight, n = 2.0.
    #[default]
    FreeSpace,
    /// Open air with some obstruction, n = 2.2.
    Outdoor,
    /// Walls and furniture, n = 3.0.
    Indoor,
}

impl Environment {
    /// Path-loss exponent for this environment.
    #[must_use]
    pub const fn path_loss_exponent(self) -> f64 {
        match self {
            Self::FreeSpace => 2.0,
            Self::Outdoor => 2.2,
            Self::Indoor => 3.0,
        }
    }

    /// Look up a preset by name, falling back to free space for unknown names.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        name.parse().unwrap_or_else(|()| {
            debug!(environment = name, "Unknown environment, using free_space");
            Self::FreeSpace
        })
    }

    /// Config/wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FreeSpace => "free_space",
            Self::Outdoor => "outdoor",
            Self::Indoor => "indoor",
        }
    }
}

impl FromStr for Environment {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "free_space" | "freespace" => Ok(Self::FreeSpace),
            "outdoor" => Ok(Self::Outdoor),
            "indoor" => Ok(Self::Indoor),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Environment {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from_name(&name))
    }
}

/// Estimate range in metres.
///
/// Returns `None` when `rssi` is the `0` "no reading" sentinel, or when
/// neither `ref_rssi` nor `tx_power` is known.
#[must_use]
pub fn estimate_distance(
    rssi: i16,
    tx_power: Option<i16>,
    environment: Environment,
    ref_rssi: Option<i16>,
) -> Option<f64> {
    if rssi == 0 {
        return None;
    }
    let measured_power = match (ref_rssi, tx_power) {
        (Some(reference), _) => f64::from(reference),
        (None, Some(tx)) => f64::from(tx) - f64::from(DEFAULT_REF_OFFSET),
        (None, None) => return None,
    };
    let exponent = (measured_power - f64::from(rssi)) / (10.0 * environment.path_loss_exponent());
    Some(10f64.powf(exponent))
}

/// Distance estimator bound to one environment and optional calibration.
#[derive(Debug, Clone, Copy, Default)]
pub struct DistanceEstimator {
    environment: Environment,
    ref_rssi: Option<i16>,
}

impl DistanceEstimator {
    /// Create an estimator.
    #[must_use]
    pub const fn new(environment: Environment, ref_rssi: Option<i16>) -> Self {
        Self {
            environment,
            ref_rssi,
        }
    }

    /// Estimate range for one reading.
    #[must_use]
    pub fn estimate(&self, rssi: i16, tx_power: Option<i16>) -> Option<f64> {
        estimate_distance(rssi, tx_power, self.environment, self.ref_rssi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rssi_zero_returns_none() {
        assert_eq!(estimate_distance(0, Some(-10), Environment::FreeSpace, None), None);
        assert_eq!(estimate_distance(0, None, Environment::Indoor, Some(-59)), None);
    }

    #[test]
    fn test_no_tx_power_no_ref_returns_none() {
        assert_eq!(estimate_distance(-60, None, Environment::FreeSpace, None), None);
    }

    #[test]
    fn test_one_metre_at_measured_power() {
        let dist = estimate_distance(-59, Some(0), Environment::FreeSpace, None).unwrap();
        assert!((dist - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_ref_rssi_overrides_tx_power() {
        let dist = estimate_distance(-59, Some(99), Environment::FreeSpace, Some(-59)).unwrap();
        assert!((dist - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_ref_rssi_without_tx_power() {
        let dist = estimate_distance(-59, None, Environment::FreeSpace, Some(-59)).unwrap();
        assert!((dist - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_weaker_rssi_gives_larger_distance() {
        let mut previous = 0.0;
        for rssi in (-100..=-40).rev() {
            let dist = estimate_distance(rssi, Some(0), Environment::FreeSpace, None).unwrap();
            assert!(dist > previous);
            previous = dist;
        }
    }

    #[test]
    fn test_indoor_shorter_than_free_space() {
        let free = estimate_distance(-70, Some(0), Environment::FreeSpace, None).unwrap();
        let indoor = estimate_distance(-70, Some(0), Environment::Indoor, None).unwrap();
        assert!(indoor < free);
    }

    #[test]
    fn test_unknown_environment_falls_back() {
        assert_eq!(Environment::from_name("nonexistent"), Environment::FreeSpace);
        assert_eq!(Environment::from_name("Indoor"), Environment::Indoor);
        assert_eq!(Environment::from_name("free-space"), Environment::FreeSpace);
    }

    #[test]
    fn test_environment_deserialize_is_lenient() {
        #[derive(Deserialize)]
        struct Wrapper {
            environment: Environment,
        }
        let parsed: Wrapper = toml::from_str("environment = \"underwater\"").unwrap();
        assert_eq!(parsed.environment, Environment::FreeSpace);
        let parsed: Wrapper = toml::from_str("environment = \"outdoor\"").unwrap();
        assert_eq!(parsed.environment, Environment::Outdoor);
    }

    #[test]
    fn test_estimator_uses_bound_settings() {
        let estimator = DistanceEstimator::new(Environment::Indoor, Some(-50));
        let dist = estimator.estimate(-80, None).unwrap();
        assert!((dist - 10.0).abs() < 0.01);
    }
}
