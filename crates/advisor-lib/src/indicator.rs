//! Indicator readings
//!
//! The provisioning core only needs a current value per indicator name. The
//! targets come from configuration. `IndicatorStore` keeps the latest reading
//! pushed for each region and treats readings older than the staleness
//! window as unavailable.

use crate::config::IndicatorTargetConfig;
use crate::error::{ProvisionError, ProvisionResult};
use crate::models::{IndicatorValue, Indicators};
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Default age after which a pushed reading is ignored
pub const DEFAULT_STALENESS: Duration = Duration::from_secs(30);

/// Source of current indicator values
pub trait IndicatorSource: Send + Sync {
    /// Fresh reading for `name`, or `IndicatorUnavailable`
    fn get_indicator_value(&self, name: &str) -> ProvisionResult<f64>;
}

/// Assemble the indicator snapshot for a region.
///
/// Indicators without a reading or without any target are left out, so the
/// policy sees them as unavailable. `overrides` replaces configured targets.
pub fn gather_indicators(
    source: &dyn IndicatorSource,
    configured: &[IndicatorTargetConfig],
    overrides: &HashMap<String, f64>,
) -> Indicators {
    let mut indicators = Indicators::new();

    for indicator in configured {
        let Some(target) = overrides.get(&indicator.name).copied().or(indicator.target) else {
            debug!(indicator = %indicator.name, "No target configured for indicator");
            continue;
        };

        match source.get_indicator_value(&indicator.name) {
            Ok(current) => {
                indicators.insert(indicator.name.clone(), IndicatorValue { current, target });
            }
            Err(e) => {
                debug!(indicator = %indicator.name, error = %e, "Skipping indicator");
            }
        }
    }

    indicators
}

#[derive(Debug, Clone, Copy)]
struct Reading {
    value: f64,
    timestamp: i64,
}

/// Latest pushed readings per region
#[derive(Debug)]
pub struct IndicatorStore {
    /// region -> indicator -> reading
    readings: DashMap<String, HashMap<String, Reading>>,
    /// region -> indicator -> target override
    targets: DashMap<String, HashMap<String, f64>>,
    staleness_secs: i64,
}

impl Default for IndicatorStore {
    fn default() -> Self {
        Self::new(DEFAULT_STALENESS)
    }
}

impl IndicatorStore {
    pub fn new(staleness: Duration) -> Self {
        Self {
            readings: DashMap::new(),
            targets: DashMap::new(),
            staleness_secs: staleness.as_secs() as i64,
        }
    }

    /// Record a reading taken at `timestamp` (unix seconds)
    pub fn record(&self, region: &str, indicator: &str, value: f64, timestamp: i64) {
        self.readings
            .entry(region.to_string())
            .or_default()
            .insert(indicator.to_string(), Reading { value, timestamp });
    }

    /// Override the configured target of an indicator for one region
    pub fn set_target(&self, region: &str, indicator: &str, target: f64) {
        self.targets
            .entry(region.to_string())
            .or_default()
            .insert(indicator.to_string(), target);
    }

    pub fn target_overrides(&self, region: &str) -> HashMap<String, f64> {
        self.targets
            .get(region)
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    /// Forget everything recorded for a region
    pub fn remove_region(&self, region: &str) {
        self.readings.remove(region);
        self.targets.remove(region);
    }

    /// Snapshot of a region's readings as seen at `now`
    pub fn view(&self, region: &str, now: i64) -> RegionReadings {
        let readings = self
            .readings
            .get(region)
            .map(|r| r.clone())
            .unwrap_or_default();

        RegionReadings {
            readings,
            now,
            staleness_secs: self.staleness_secs,
        }
    }
}

/// Point-in-time view of one region's readings
#[derive(Debug, Clone)]
pub struct RegionReadings {
    readings: HashMap<String, Reading>,
    now: i64,
    staleness_secs: i64,
}

impl IndicatorSource for RegionReadings {
    fn get_indicator_value(&self, name: &str) -> ProvisionResult<f64> {
        match self.readings.get(name) {
            Some(reading) if self.now - reading.timestamp <= self.staleness_secs => {
                Ok(reading.value)
            }
            _ => Err(ProvisionError::IndicatorUnavailable(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource(HashMap<String, f64>);

    impl IndicatorSource for FixedSource {
        fn get_indicator_value(&self, name: &str) -> ProvisionResult<f64> {
            self.0
                .get(name)
                .copied()
                .ok_or_else(|| ProvisionError::IndicatorUnavailable(name.to_string()))
        }
    }

    #[test]
    fn test_gather_skips_unavailable() {
        let source = FixedSource(HashMap::from([("cpi".to_string(), 2.0)]));
        let configured = vec![
            IndicatorTargetConfig::new("cpi", 1.0),
            IndicatorTargetConfig::new("membw", 40.0),
        ];

        let indicators = gather_indicators(&source, &configured, &HashMap::new());

        assert_eq!(indicators.len(), 1);
        assert_eq!(indicators["cpi"], IndicatorValue { current: 2.0, target: 1.0 });
    }

    #[test]
    fn test_gather_applies_target_override() {
        let source = FixedSource(HashMap::from([("cpi".to_string(), 2.0)]));
        let configured = vec![IndicatorTargetConfig {
            name: "cpi".to_string(),
            target: None,
        }];

        assert!(gather_indicators(&source, &configured, &HashMap::new()).is_empty());

        let overrides = HashMap::from([("cpi".to_string(), 1.5)]);
        let indicators = gather_indicators(&source, &configured, &overrides);
        assert_eq!(indicators["cpi"].target, 1.5);
    }

    #[test]
    fn test_store_staleness() {
        let store = IndicatorStore::new(Duration::from_secs(30));
        store.record("share-a", "cpu_schedwait", 800.0, 1_000);

        let fresh = store.view("share-a", 1_030);
        assert_eq!(fresh.get_indicator_value("cpu_schedwait"), Ok(800.0));

        let stale = store.view("share-a", 1_031);
        assert!(stale.get_indicator_value("cpu_schedwait").is_err());

        let other = store.view("share-b", 1_000);
        assert!(other.get_indicator_value("cpu_schedwait").is_err());
    }

    #[test]
    fn test_store_remove_region() {
        let store = IndicatorStore::default();
        store.record("share-a", "cpu_schedwait", 800.0, 1_000);
        store.set_target("share-a", "cpu_schedwait", 300.0);

        assert_eq!(store.target_overrides("share-a")["cpu_schedwait"], 300.0);

        store.remove_region("share-a");
        assert!(store.target_overrides("share-a").is_empty());
        assert!(store.view("share-a", 1_000).get_indicator_value("cpu_schedwait").is_err());
    }
}
