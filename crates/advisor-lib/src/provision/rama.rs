//! Rama provision policy
//!
//! Drives one region's non-reclaimed CPU size from its performance
//! indicators: every configured indicator is evaluated by the first-order
//! PID, the arbiter merges the deltas, and the result is applied to the
//! current knob and clamped to the resource bounds of the cycle.

use super::arbiter::{combine, ArbitrationOutcome};
use super::pid::{evaluate, AdjustmentDelta};
use super::ProvisionPolicy;
use crate::config::ProvisionConfig;
use crate::error::{ProvisionError, ProvisionResult};
use crate::models::{
    ControlEssentials, ControlKnob, ControlKnobAction, ControlKnobName, ControlKnobValue, CpuSet,
    PodSet, RegionInfo, RegionType, ResourceEssentials,
};
use crate::registry::RegionRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Knob adjusted by this policy
pub const RAMA_CONTROL_KNOB: ControlKnobName = ControlKnobName::NonReclaimedCpuSize;

/// Lifecycle of a policy instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyState {
    /// Bound to a region, no successful update yet
    Bound,
    /// At least one update completed
    Updated,
}

/// How the knob value of a cycle was decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Indicators were evaluated and arbitrated
    Adjusted,
    /// Reclaim disabled, knob pinned to the allocatable maximum
    ReclaimDisabled,
    /// Region has no members, knob left as is
    EmptyRegion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClampReason {
    LowerBound,
    UpperBound,
}

/// Structured result of one `update()`, for metrics and logging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub region_name: String,
    pub region_type: RegionType,
    pub knob: ControlKnobName,
    pub previous_value: f64,
    pub value: f64,
    pub action: ControlKnobAction,
    pub outcome: CycleOutcome,
    pub clamp: Option<ClampReason>,
    pub suppressed_by_overlap: bool,
    pub deltas: Vec<AdjustmentDelta>,
    /// Configured indicators skipped for lack of a reading
    pub unavailable: Vec<String>,
}

pub struct PolicyRama {
    region: RegionInfo,
    pod_set: PodSet,
    config: Arc<ProvisionConfig>,
    registry: Arc<dyn RegionRegistry>,
    essentials: Option<(ResourceEssentials, ControlEssentials)>,
    adjusted: Option<ControlKnob>,
    state: PolicyState,
}

impl PolicyRama {
    pub fn new(
        region: RegionInfo,
        config: Arc<ProvisionConfig>,
        registry: Arc<dyn RegionRegistry>,
    ) -> Self {
        Self {
            region,
            pod_set: PodSet::new(),
            config,
            registry,
            essentials: None,
            adjusted: None,
            state: PolicyState::Bound,
        }
    }

    pub fn state(&self) -> PolicyState {
        self.state
    }

    pub fn binding_numas(&self) -> &CpuSet {
        &self.region.binding_numas
    }

    pub fn pod_set(&self) -> &PodSet {
        &self.pod_set
    }

    /// Knob value the cycle starts from
    fn current_knob(&self, control: &ControlEssentials) -> ProvisionResult<f64> {
        if let Some(knob) = control.control_knobs.get(&RAMA_CONTROL_KNOB) {
            return Ok(knob.value);
        }

        self.adjusted
            .clone()
            .or_else(|| self.registry.persisted_knob(&self.region.region_name))
            .and_then(|knobs| knobs.get(&RAMA_CONTROL_KNOB).map(|k| k.value))
            .ok_or_else(|| ProvisionError::MissingControlKnob(self.region.region_name.clone()))
    }

    /// Evaluate every configured indicator, skipping the ones without a reading
    fn evaluate_indicators(
        &self,
        resource: &ResourceEssentials,
        control: &ControlEssentials,
    ) -> ProvisionResult<(Vec<AdjustmentDelta>, Vec<String>)> {
        let region_name = &self.region.region_name;
        let configured = self.config.indicators_for(self.region.region_type)?;

        let mut deltas = Vec::with_capacity(configured.len());
        let mut unavailable = Vec::new();

        for indicator in configured {
            let params = self.config.pid_params(&indicator.name)?;

            let Some(value) = control.indicators.get(&indicator.name) else {
                debug!(region = %region_name, indicator = %indicator.name, "Indicator reading unavailable");
                unavailable.push(indicator.name.clone());
                continue;
            };

            let previous_error = self.registry.previous_error(region_name, &indicator.name);
            match evaluate(
                &indicator.name,
                value,
                params,
                resource.resource_upper_bound,
                previous_error,
                self.config.control_interval_secs,
            ) {
                Ok(delta) => deltas.push(delta),
                Err(ProvisionError::IndicatorUnavailable(name)) => {
                    debug!(region = %region_name, indicator = %name, "Indicator reading not usable");
                    unavailable.push(name);
                }
                Err(e) => return Err(e),
            }
        }

        if deltas.is_empty() {
            return Err(ProvisionError::IndicatorsUnavailable {
                region: region_name.clone(),
                indicators: unavailable,
            });
        }

        Ok((deltas, unavailable))
    }

    fn adjusted_knob(control: &ControlEssentials, value: f64, action: ControlKnobAction) -> ControlKnob {
        let mut knob: ControlKnob = control
            .control_knobs
            .iter()
            .map(|(name, v)| (*name, ControlKnobValue::new(v.value)))
            .collect();
        knob.insert(RAMA_CONTROL_KNOB, ControlKnobValue { value, action });
        knob
    }
}

/// Direction of a change that was not clamped
fn action_between(previous: f64, value: f64) -> ControlKnobAction {
    if value > previous {
        ControlKnobAction::Increase
    } else if value < previous {
        ControlKnobAction::Decrease
    } else {
        ControlKnobAction::None
    }
}

/// Clamp to the resource bounds, reporting which bound applied
fn clamp_to_bounds(value: f64, resource: &ResourceEssentials) -> (f64, Option<ClampReason>) {
    if value < resource.resource_lower_bound {
        (resource.resource_lower_bound, Some(ClampReason::LowerBound))
    } else if value > resource.resource_upper_bound {
        (resource.resource_upper_bound, Some(ClampReason::UpperBound))
    } else {
        (value, None)
    }
}

impl ProvisionPolicy for PolicyRama {
    fn region_name(&self) -> &str {
        &self.region.region_name
    }

    fn region_type(&self) -> RegionType {
        self.region.region_type
    }

    fn set_binding_numas(&mut self, numas: CpuSet) {
        self.region.binding_numas = numas;
    }

    fn set_pod_set(&mut self, pod_set: PodSet) {
        self.pod_set = pod_set;
    }

    fn set_essentials(
        &mut self,
        resource: ResourceEssentials,
        control: ControlEssentials,
    ) -> ProvisionResult<()> {
        resource.validate()?;
        if let Some((name, knob)) = control
            .control_knobs
            .iter()
            .find(|(_, knob)| !knob.value.is_finite())
        {
            return Err(ProvisionError::InvalidControlKnob {
                region: self.region.region_name.clone(),
                knob: name.as_str().to_string(),
                value: knob.value,
            });
        }
        self.essentials = Some((resource, control));
        Ok(())
    }

    fn update(&mut self) -> ProvisionResult<CycleReport> {
        let region_name = self.region.region_name.clone();
        // Essentials are consumed by the cycle, successful or not
        let (resource, control) = self
            .essentials
            .take()
            .ok_or_else(|| ProvisionError::EssentialsMissing(region_name.clone()))?;

        let previous_value = self.current_knob(&control)?;
        let mut report = CycleReport {
            region_name: region_name.clone(),
            region_type: self.region.region_type,
            knob: RAMA_CONTROL_KNOB,
            previous_value,
            value: previous_value,
            action: ControlKnobAction::None,
            outcome: CycleOutcome::Adjusted,
            clamp: None,
            suppressed_by_overlap: false,
            deltas: Vec::new(),
            unavailable: Vec::new(),
        };
        let mut carried_errors = BTreeMap::new();

        if !resource.enable_reclaim {
            let pinned = resource.resource_upper_bound - resource.reserved_for_allocate;
            let (value, clamp) = clamp_to_bounds(pinned, &resource);
            report.value = value;
            report.clamp = clamp;
            report.action = match clamp {
                Some(_) => ControlKnobAction::AtLimit,
                None => action_between(previous_value, value),
            };
            report.outcome = CycleOutcome::ReclaimDisabled;
        } else if self.pod_set.is_empty() {
            debug!(region = %region_name, "Region has no members, skipping adjustment");
            report.outcome = CycleOutcome::EmptyRegion;
        } else {
            let (deltas, unavailable) = self.evaluate_indicators(&resource, &control)?;
            let ArbitrationOutcome {
                delta,
                suppressed_by_overlap,
                ..
            } = combine(&deltas, control.reclaim_overlap, self.config.increase_aggregation);

            let (value, clamp) = clamp_to_bounds(previous_value + delta, &resource);
            report.value = value;
            report.clamp = clamp;
            report.action = match clamp {
                Some(_) => ControlKnobAction::AtLimit,
                None => action_between(previous_value, value),
            };
            report.suppressed_by_overlap = suppressed_by_overlap;

            carried_errors = deltas
                .iter()
                .map(|d| (d.indicator.clone(), d.error))
                .collect();
            report.deltas = deltas;
            report.unavailable = unavailable;
        }

        let knob = Self::adjusted_knob(&control, report.value, report.action);
        self.registry.store_cycle(&region_name, &knob, &carried_errors);
        self.adjusted = Some(knob);
        self.state = PolicyState::Updated;

        Ok(report)
    }

    fn get_control_knob_adjusted(&self) -> ProvisionResult<ControlKnob> {
        self.adjusted
            .clone()
            .ok_or_else(|| ProvisionError::NotUpdated(self.region.region_name.clone()))
    }
}
