//! Core data models for the provisioning advisor

use crate::error::{ProvisionError, ProvisionResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Scheduling wait time of runnable tasks in a shared pool
pub const INDICATOR_CPU_SCHEDWAIT: &str = "cpu_schedwait";
/// Cycles per instruction observed in dedicated containers
pub const INDICATOR_CPU_CPI_CONTAINER: &str = "cpu_cpi_container";
/// Memory bandwidth consumed on a NUMA node
pub const INDICATOR_MEM_BANDWIDTH_NUMA: &str = "mem_bandwidth_numa";

/// Kind of QoS region, which decides the indicators that govern it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionType {
    /// Shared-cores pool spanning the node
    Share,
    /// Dedicated cores with exclusive NUMA nodes
    DedicatedNumaExclusive,
    /// Isolated pods carved out of a shared pool
    Isolation,
}

impl RegionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegionType::Share => "share",
            RegionType::DedicatedNumaExclusive => "dedicated_numa_exclusive",
            RegionType::Isolation => "isolation",
        }
    }
}

impl fmt::Display for RegionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of CPU or NUMA node identifiers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CpuSet(BTreeSet<usize>);

impl CpuSet {
    pub fn new(ids: impl IntoIterator<Item = usize>) -> Self {
        Self(ids.into_iter().collect())
    }

    pub fn contains(&self, id: usize) -> bool {
        self.0.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }
}

/// Renders the set in cpuset list format, e.g. `0-3,6`
impl fmt::Display for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids = self.0.iter().copied().peekable();
        let mut first = true;

        while let Some(start) = ids.next() {
            let mut end = start;
            while ids.peek() == Some(&(end + 1)) {
                end += 1;
                ids.next();
            }

            if !first {
                f.write_str(",")?;
            }
            first = false;

            if start == end {
                write!(f, "{}", start)?;
            } else {
                write!(f, "{}-{}", start, end)?;
            }
        }

        Ok(())
    }
}

impl FromStr for CpuSet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut ids = BTreeSet::new();

        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.split_once('-') {
                Some((start, end)) => {
                    let start: usize = start
                        .trim()
                        .parse()
                        .map_err(|_| format!("invalid range start in '{}'", part))?;
                    let end: usize = end
                        .trim()
                        .parse()
                        .map_err(|_| format!("invalid range end in '{}'", part))?;
                    if start > end {
                        return Err(format!("inverted range '{}'", part));
                    }
                    ids.extend(start..=end);
                }
                None => {
                    let id: usize = part
                        .parse()
                        .map_err(|_| format!("invalid id '{}'", part))?;
                    ids.insert(id);
                }
            }
        }

        Ok(Self(ids))
    }
}

/// Pod uid -> container names
pub type PodSet = BTreeMap<String, BTreeSet<String>>;

/// Identity and hardware binding of a region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionInfo {
    pub region_name: String,
    pub region_type: RegionType,
    #[serde(default)]
    pub owner_pool_name: String,
    #[serde(default)]
    pub binding_numas: CpuSet,
}

/// QoS level of a container as seen by the resource manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QosLevel {
    SharedCores,
    DedicatedCores,
    ReclaimedCores,
    SystemCores,
}

/// Container metadata held by the region registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub pod_uid: String,
    #[serde(default)]
    pub pod_namespace: String,
    #[serde(default)]
    pub pod_name: String,
    pub container_name: String,
    pub qos_level: QosLevel,
    #[serde(default)]
    pub owner_pool_name: String,
    /// Regions this container is accounted to
    #[serde(default)]
    pub region_names: BTreeSet<String>,
}

/// Observed and desired value of one performance indicator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorValue {
    pub current: f64,
    pub target: f64,
}

/// Indicator name -> reading
pub type Indicators = BTreeMap<String, IndicatorValue>;

/// Tunable resource quantities a policy may adjust
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKnobName {
    /// CPU size guaranteed to non-reclaimed workloads of a region
    NonReclaimedCpuSize,
}

impl ControlKnobName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlKnobName::NonReclaimedCpuSize => "non_reclaimed_cpu_size",
        }
    }
}

/// What the last cycle did to a knob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKnobAction {
    #[default]
    None,
    Increase,
    Decrease,
    /// Result was clamped to a resource bound
    AtLimit,
}

impl ControlKnobAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlKnobAction::None => "none",
            ControlKnobAction::Increase => "increase",
            ControlKnobAction::Decrease => "decrease",
            ControlKnobAction::AtLimit => "at_limit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlKnobValue {
    pub value: f64,
    #[serde(default)]
    pub action: ControlKnobAction,
}

impl ControlKnobValue {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            action: ControlKnobAction::None,
        }
    }
}

pub type ControlKnob = BTreeMap<ControlKnobName, ControlKnobValue>;

/// Hard constraints for one control cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceEssentials {
    pub enable_reclaim: bool,
    pub resource_upper_bound: f64,
    pub resource_lower_bound: f64,
    #[serde(default)]
    pub reserved_for_allocate: f64,
}

impl ResourceEssentials {
    /// Bounds must be finite and ordered, the reservation non-negative
    pub fn validate(&self) -> ProvisionResult<()> {
        let lower = self.resource_lower_bound;
        let upper = self.resource_upper_bound;
        let reserved = self.reserved_for_allocate;

        let finite = lower.is_finite() && upper.is_finite() && reserved.is_finite();
        if !finite || lower > upper || reserved < 0.0 {
            return Err(ProvisionError::InvalidBounds {
                lower,
                upper,
                reserved,
            });
        }

        Ok(())
    }
}

/// Knobs and indicator readings for one control cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlEssentials {
    pub control_knobs: ControlKnob,
    pub indicators: Indicators,
    /// Reclaimed and guaranteed work currently contend for the same CPUs
    #[serde(default)]
    pub reclaim_overlap: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpuset_display_ranges() {
        let set = CpuSet::new([0, 1, 2, 3, 6, 8, 9]);
        assert_eq!(set.to_string(), "0-3,6,8-9");
        assert_eq!(CpuSet::default().to_string(), "");
    }

    #[test]
    fn test_cpuset_parse() {
        let set: CpuSet = "0-2, 5".parse().unwrap();
        assert_eq!(set, CpuSet::new([0, 1, 2, 5]));
        assert!(set.contains(5));
        assert_eq!(set.len(), 4);

        assert!("3-1".parse::<CpuSet>().is_err());
        assert!("a".parse::<CpuSet>().is_err());
    }

    #[test]
    fn test_region_type_serde_names() {
        let json = serde_json::to_string(&RegionType::DedicatedNumaExclusive).unwrap();
        assert_eq!(json, "\"dedicated_numa_exclusive\"");

        let parsed: RegionType = serde_json::from_str("\"share\"").unwrap();
        assert_eq!(parsed, RegionType::Share);
    }

    #[test]
    fn test_resource_essentials_validation() {
        let mut resource = ResourceEssentials {
            enable_reclaim: true,
            resource_upper_bound: 90.0,
            resource_lower_bound: 4.0,
            reserved_for_allocate: 0.0,
        };
        assert!(resource.validate().is_ok());

        resource.resource_lower_bound = 95.0;
        assert!(resource.validate().is_err());

        resource.resource_lower_bound = 4.0;
        resource.reserved_for_allocate = f64::NAN;
        assert!(resource.validate().is_err());
    }

    #[test]
    fn test_control_knob_serializes_as_map() {
        let mut knob = ControlKnob::new();
        knob.insert(ControlKnobName::NonReclaimedCpuSize, ControlKnobValue::new(40.0));

        let value = serde_json::to_value(&knob).unwrap();
        assert_eq!(value["non_reclaimed_cpu_size"]["value"], 40.0);
        assert_eq!(value["non_reclaimed_cpu_size"]["action"], "none");
    }
}
