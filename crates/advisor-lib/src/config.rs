//! Provisioning configuration
//!
//! Maps each region type to the indicators that govern it and each indicator
//! to its response parameters. Loaded once at startup.

use crate::error::{ProvisionError, ProvisionResult};
use crate::models::{
    RegionType, INDICATOR_CPU_CPI_CONTAINER, INDICATOR_CPU_SCHEDWAIT, INDICATOR_MEM_BANDWIDTH_NUMA,
};
use crate::provision::{validate_target, FirstOrderPidParams, IncreaseAggregation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// An indicator governing a region type, with its default target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorTargetConfig {
    pub name: String,
    /// Target used when the caller does not supply one
    #[serde(default)]
    pub target: Option<f64>,
}

impl IndicatorTargetConfig {
    pub fn new(name: impl Into<String>, target: f64) -> Self {
        Self {
            name: name.into(),
            target: Some(target),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionConfig {
    #[serde(default = "default_region_indicator_targets")]
    pub region_indicator_targets: BTreeMap<RegionType, Vec<IndicatorTargetConfig>>,

    #[serde(default = "default_pid_parameters")]
    pub pid_parameters: BTreeMap<String, FirstOrderPidParams>,

    #[serde(default)]
    pub increase_aggregation: IncreaseAggregation,

    /// Interval between control cycles, also the derivative time step
    #[serde(default = "default_control_interval_secs")]
    pub control_interval_secs: f64,
}

fn default_region_indicator_targets() -> BTreeMap<RegionType, Vec<IndicatorTargetConfig>> {
    BTreeMap::from([
        (
            RegionType::Share,
            vec![IndicatorTargetConfig::new(INDICATOR_CPU_SCHEDWAIT, 400.0)],
        ),
        (
            RegionType::DedicatedNumaExclusive,
            vec![
                IndicatorTargetConfig::new(INDICATOR_CPU_CPI_CONTAINER, 1.0),
                IndicatorTargetConfig::new(INDICATOR_MEM_BANDWIDTH_NUMA, 40.0),
            ],
        ),
    ])
}

fn default_pid_parameters() -> BTreeMap<String, FirstOrderPidParams> {
    BTreeMap::from([
        (
            INDICATOR_CPU_SCHEDWAIT.to_string(),
            FirstOrderPidParams::proportional(10.0, 1.0, 0.8, 0.05),
        ),
        (
            INDICATOR_CPU_CPI_CONTAINER.to_string(),
            FirstOrderPidParams::proportional(10.0, 1.0, 0.95, 0.02),
        ),
        (
            INDICATOR_MEM_BANDWIDTH_NUMA.to_string(),
            FirstOrderPidParams::proportional(10.0, 1.0, 0.95, 0.02),
        ),
    ])
}

fn default_control_interval_secs() -> f64 {
    10.0
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            region_indicator_targets: default_region_indicator_targets(),
            pid_parameters: default_pid_parameters(),
            increase_aggregation: IncreaseAggregation::default(),
            control_interval_secs: default_control_interval_secs(),
        }
    }
}

impl ProvisionConfig {
    /// Indicators configured for a region type, in evaluation order
    pub fn indicators_for(&self, region_type: RegionType) -> ProvisionResult<&[IndicatorTargetConfig]> {
        match self.region_indicator_targets.get(&region_type) {
            Some(indicators) if !indicators.is_empty() => Ok(indicators),
            _ => Err(ProvisionError::UnknownRegionType(region_type)),
        }
    }

    pub fn pid_params(&self, indicator: &str) -> ProvisionResult<&FirstOrderPidParams> {
        self.pid_parameters
            .get(indicator)
            .ok_or_else(|| ProvisionError::UnmappedIndicator(indicator.to_string()))
    }

    pub fn control_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.control_interval_secs)
            .unwrap_or_else(|_| Duration::from_secs_f64(default_control_interval_secs()))
    }

    /// Check the table once so cycles only fail on bad runtime input
    pub fn validate(&self) -> ProvisionResult<()> {
        if !self.control_interval_secs.is_finite() || self.control_interval_secs <= 0.0 {
            return Err(ProvisionError::InvalidConfig(format!(
                "control_interval_secs must be positive, got {}",
                self.control_interval_secs
            )));
        }

        for (name, params) in &self.pid_parameters {
            params.validate(name)?;
        }

        for indicators in self.region_indicator_targets.values() {
            for indicator in indicators {
                self.pid_params(&indicator.name)?;
                if let Some(target) = indicator.target {
                    validate_target(&indicator.name, target)?;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ProvisionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.control_interval(), Duration::from_secs(10));
        assert_eq!(config.indicators_for(RegionType::Share).unwrap().len(), 1);
        assert_eq!(
            config
                .indicators_for(RegionType::DedicatedNumaExclusive)
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn test_unknown_region_type() {
        let config = ProvisionConfig::default();
        assert_eq!(
            config.indicators_for(RegionType::Isolation),
            Err(ProvisionError::UnknownRegionType(RegionType::Isolation))
        );
    }

    #[test]
    fn test_unmapped_indicator_fails_validation() {
        let mut config = ProvisionConfig::default();
        config.pid_parameters.remove(INDICATOR_CPU_SCHEDWAIT);

        assert_eq!(
            config.validate(),
            Err(ProvisionError::UnmappedIndicator(INDICATOR_CPU_SCHEDWAIT.to_string()))
        );
    }

    #[test]
    fn test_zero_default_target_fails_validation() {
        let mut config = ProvisionConfig::default();
        config
            .region_indicator_targets
            .insert(RegionType::Share, vec![IndicatorTargetConfig::new(INDICATOR_CPU_SCHEDWAIT, 0.0)]);

        assert!(matches!(config.validate(), Err(ProvisionError::ZeroTarget(_))));
    }

    #[test]
    fn test_negative_default_target_fails_validation() {
        let mut config = ProvisionConfig::default();
        config.region_indicator_targets.insert(
            RegionType::Share,
            vec![IndicatorTargetConfig::new(INDICATOR_CPU_SCHEDWAIT, -400.0)],
        );

        let result = config.validate();
        assert!(matches!(result, Err(ProvisionError::InvalidParameters { .. })));
        assert!(result.unwrap_err().is_configuration());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let json = r#"{
            "increase_aggregation": "sum",
            "pid_parameters": {
                "cpu_schedwait": {
                    "kpp": 5.0,
                    "kpn": 0.5,
                    "deadband_lower_pct": 0.5,
                    "deadband_upper_pct": 0.1
                }
            }
        }"#;

        let config: ProvisionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.increase_aggregation, IncreaseAggregation::Sum);
        assert_eq!(config.control_interval_secs, 10.0);

        let params = config.pid_params(INDICATOR_CPU_SCHEDWAIT).unwrap();
        assert_eq!(params.kpp, 5.0);
        assert_eq!(params.kdp, 0.0);
        assert_eq!(params.adjustment_upper_bound, 8.0);
        assert_eq!(params.adjustment_lower_bound, -2.0);

        // Region table falls back to defaults, but dedicated indicators are now unmapped
        assert!(config.validate().is_err());
    }
}
