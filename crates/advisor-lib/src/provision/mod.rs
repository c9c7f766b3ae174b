//! Provision policies for QoS regions
//!
//! A provision policy owns one region's control knob and recomputes it once
//! per control cycle from the cycle's resource bounds and indicator readings.
//! The building blocks are pure functions:
//! - Deadband test around an indicator target
//! - First-order PID evaluation of a single indicator
//! - Conservative arbitration across the indicators of a region

mod arbiter;
mod deadband;
mod pid;
mod rama;


pub use arbiter::{combine, ArbitrationOutcome, IncreaseAggregation};
pub use deadband::in_band;
pub use pid::{
    evaluate, validate_target, AdjustmentDelta, AdjustmentDirection, FirstOrderPidParams,
    MAX_RAMP_DOWN_STEP, MAX_RAMP_UP_STEP,
};
pub use rama::{ClampReason, CycleOutcome, CycleReport, PolicyRama, PolicyState, RAMA_CONTROL_KNOB};

use crate::error::ProvisionResult;
use crate::models::{ControlEssentials, ControlKnob, CpuSet, PodSet, RegionType, ResourceEssentials};

/// A per-region control policy, driven by a single writer once per cycle
pub trait ProvisionPolicy: Send {
    fn region_name(&self) -> &str;

    fn region_type(&self) -> RegionType;

    /// Update the NUMA nodes the region is bound to, effective next cycle
    fn set_binding_numas(&mut self, numas: CpuSet);

    /// Update the region's membership, effective next cycle
    fn set_pod_set(&mut self, pod_set: PodSet);

    /// Store the snapshot for the next `update()`
    fn set_essentials(
        &mut self,
        resource: ResourceEssentials,
        control: ControlEssentials,
    ) -> ProvisionResult<()>;

    /// Run one control cycle; on error the previous knob is kept
    fn update(&mut self) -> ProvisionResult<CycleReport>;

    /// Knob produced by the last successful `update()`
    fn get_control_knob_adjusted(&self) -> ProvisionResult<ControlKnob>;
}
