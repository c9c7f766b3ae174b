//! Observability infrastructure for the provisioning advisor
//!
//! Provides:
//! - Prometheus metrics derived from control-cycle reports
//! - Structured JSON logging with tracing

use crate::error::ProvisionError;
use crate::provision::{CycleReport, RAMA_CONTROL_KNOB};
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter_vec, register_int_gauge,
    GaugeVec, Histogram, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for control-cycle latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AdvisorMetricsInner> = OnceLock::new();

struct AdvisorMetricsInner {
    cycle_latency_seconds: Histogram,
    control_knob_value: GaugeVec,
    control_knob_actions: IntCounterVec,
    indicator_delta: GaugeVec,
    cycle_errors: IntCounterVec,
    overlap_suppressions: IntCounterVec,
    regions_controlled: IntGauge,
}

impl AdvisorMetricsInner {
    fn new() -> Self {
        Self {
            cycle_latency_seconds: register_histogram!(
                "qos_advisor_cycle_latency_seconds",
                "Time spent running one control cycle over all regions",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_latency_seconds"),

            control_knob_value: register_gauge_vec!(
                "qos_advisor_control_knob_value",
                "Control knob value produced by the last cycle",
                &["region", "knob"]
            )
            .expect("Failed to register control_knob_value"),

            control_knob_actions: register_int_counter_vec!(
                "qos_advisor_control_knob_actions_total",
                "Control knob actions taken, by region and action",
                &["region", "action"]
            )
            .expect("Failed to register control_knob_actions"),

            indicator_delta: register_gauge_vec!(
                "qos_advisor_indicator_delta",
                "Delta requested by each indicator in the last cycle",
                &["region", "indicator"]
            )
            .expect("Failed to register indicator_delta"),

            cycle_errors: register_int_counter_vec!(
                "qos_advisor_cycle_errors_total",
                "Failed control cycles, by region and error kind",
                &["region", "kind"]
            )
            .expect("Failed to register cycle_errors"),

            overlap_suppressions: register_int_counter_vec!(
                "qos_advisor_overlap_suppressions_total",
                "Decreases dropped because of reclaim overlap",
                &["region"]
            )
            .expect("Failed to register overlap_suppressions"),

            regions_controlled: register_int_gauge!(
                "qos_advisor_regions_controlled",
                "Number of regions under control"
            )
            .expect("Failed to register regions_controlled"),
        }
    }
}

/// Advisor metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance. Clones share the same
/// underlying metrics.
#[derive(Clone)]
pub struct AdvisorMetrics {
    _private: (),
}

impl Default for AdvisorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AdvisorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AdvisorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AdvisorMetricsInner {
        GLOBAL_METRICS.get_or_init(AdvisorMetricsInner::new)
    }

    pub fn observe_cycle_latency(&self, duration_secs: f64) {
        self.inner().cycle_latency_seconds.observe(duration_secs);
    }

    pub fn set_regions_controlled(&self, count: i64) {
        self.inner().regions_controlled.set(count);
    }

    /// Translate a cycle report into knob, action and per-indicator series
    pub fn record_cycle(&self, report: &CycleReport) {
        let inner = self.inner();
        let region = report.region_name.as_str();

        inner
            .control_knob_value
            .with_label_values(&[region, report.knob.as_str()])
            .set(report.value);
        inner
            .control_knob_actions
            .with_label_values(&[region, report.action.as_str()])
            .inc();

        for delta in &report.deltas {
            inner
                .indicator_delta
                .with_label_values(&[region, delta.indicator.as_str()])
                .set(delta.delta);
        }

        if report.suppressed_by_overlap {
            inner.overlap_suppressions.with_label_values(&[region]).inc();
        }
    }

    pub fn record_cycle_error(&self, region: &str, error: &ProvisionError) {
        self.inner()
            .cycle_errors
            .with_label_values(&[region, error.kind()])
            .inc();
    }

    /// Drop the gauges of an evicted region
    pub fn forget_region(&self, region: &str, indicators: &[&str]) {
        let inner = self.inner();
        let _ = inner
            .control_knob_value
            .remove_label_values(&[region, RAMA_CONTROL_KNOB.as_str()]);
        for indicator in indicators {
            let _ = inner.indicator_delta.remove_label_values(&[region, *indicator]);
        }
    }
}

/// Structured logger for advisor events
///
/// Consistent JSON-formatted events for knob adjustments, failed cycles and
/// lifecycle changes.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    /// Log the knob produced by a cycle
    pub fn log_cycle(&self, report: &CycleReport) {
        let decided_by: Vec<&str> = report
            .deltas
            .iter()
            .filter(|d| d.delta != 0.0)
            .map(|d| d.indicator.as_str())
            .collect();

        if report.clamp.is_some() {
            // Persistently pinned knobs point at mis-tuned bounds
            warn!(
                event = "knob_at_limit",
                node = %self.node_name,
                region = %report.region_name,
                knob = %report.knob.as_str(),
                previous_value = report.previous_value,
                value = report.value,
                clamp = ?report.clamp,
                "Control knob pinned at resource bound"
            );
        } else if report.previous_value != report.value {
            info!(
                event = "knob_adjusted",
                node = %self.node_name,
                region = %report.region_name,
                region_type = %report.region_type,
                knob = %report.knob.as_str(),
                previous_value = report.previous_value,
                value = report.value,
                action = %report.action.as_str(),
                outcome = ?report.outcome,
                indicators = ?decided_by,
                "Adjusted control knob"
            );
        }

        if report.suppressed_by_overlap {
            info!(
                event = "decrease_suppressed",
                node = %self.node_name,
                region = %report.region_name,
                value = report.value,
                "Decrease deferred while reclaim overlaps the region"
            );
        }

        if !report.unavailable.is_empty() {
            info!(
                event = "indicators_unavailable",
                node = %self.node_name,
                region = %report.region_name,
                indicators = ?report.unavailable,
                "Indicators skipped for lack of readings"
            );
        }
    }

    pub fn log_cycle_failed(&self, region: &str, error: &ProvisionError) {
        warn!(
            event = "cycle_failed",
            node = %self.node_name,
            region = %region,
            kind = %error.kind(),
            configuration = error.is_configuration(),
            error = %error,
            "Control cycle failed, keeping previous knob"
        );
    }

    pub fn log_region_evicted(&self, region: &str) {
        info!(
            event = "region_evicted",
            node = %self.node_name,
            region = %region,
            "Region evicted after membership emptied"
        );
    }

    pub fn log_startup(&self, version: &str, regions: usize) {
        info!(
            event = "advisor_started",
            node = %self.node_name,
            advisor_version = %version,
            regions = regions,
            "QoS advisor started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "advisor_shutdown",
            node = %self.node_name,
            reason = %reason,
            "QoS advisor shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ControlKnobAction, ControlKnobName, RegionType};
    use crate::provision::{AdjustmentDelta, AdjustmentDirection, CycleOutcome};

    fn report() -> CycleReport {
        CycleReport {
            region_name: "share-test".to_string(),
            region_type: RegionType::Share,
            knob: ControlKnobName::NonReclaimedCpuSize,
            previous_value: 40.0,
            value: 48.0,
            action: ControlKnobAction::Increase,
            outcome: CycleOutcome::Adjusted,
            clamp: None,
            suppressed_by_overlap: false,
            deltas: vec![AdjustmentDelta {
                indicator: "cpu_schedwait".to_string(),
                delta: 8.0,
                direction: AdjustmentDirection::Increase,
                error: 1.0,
            }],
            unavailable: Vec::new(),
        }
    }

    #[test]
    fn test_record_cycle_sets_knob_gauge() {
        let metrics = AdvisorMetrics::new();
        metrics.record_cycle(&report());
        metrics.observe_cycle_latency(0.0001);
        metrics.set_regions_controlled(1);

        let value = metrics
            .inner()
            .control_knob_value
            .with_label_values(&["share-test", "non_reclaimed_cpu_size"])
            .get();
        assert_eq!(value, 48.0);
    }

    #[test]
    fn test_record_cycle_error_counts_by_kind() {
        let metrics = AdvisorMetrics::new();
        let error = ProvisionError::ZeroTarget("cpu_schedwait".to_string());

        metrics.record_cycle_error("share-errors", &error);
        metrics.record_cycle_error("share-errors", &error);

        let count = metrics
            .inner()
            .cycle_errors
            .with_label_values(&["share-errors", "zero_target"])
            .get();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-node");
        assert_eq!(logger.node_name, "test-node");
        logger.log_cycle(&report());
    }
}
