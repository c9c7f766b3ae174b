//! Region registry
//!
//! Holds per-region and per-container state across control cycles: region
//! identity, container membership, resource essentials, the persisted knob
//! and the error each indicator carries into its next derivative term.
//! Entries are sharded by region key so one region's state is always
//! updated as a unit.

use crate::error::{ProvisionError, ProvisionResult};
use crate::models::{ContainerInfo, ControlKnob, PodSet, RegionInfo, ResourceEssentials};
use dashmap::DashMap;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// State the region policy reads and writes between cycles
pub trait RegionRegistry: Send + Sync {
    /// Error carried by an indicator from the last successful cycle
    fn previous_error(&self, region: &str, indicator: &str) -> Option<f64>;

    /// Knob persisted by the last successful cycle
    fn persisted_knob(&self, region: &str) -> Option<ControlKnob>;

    /// Record the outcome of a successful cycle atomically.
    ///
    /// `errors` replaces the carried errors: indicators not evaluated this
    /// cycle start their next derivative term afresh.
    fn store_cycle(&self, region: &str, knob: &ControlKnob, errors: &BTreeMap<String, f64>);
}

#[derive(Debug, Clone)]
struct RegionEntry {
    info: RegionInfo,
    resource: Option<ResourceEssentials>,
    reclaim_overlap: bool,
    control_knob: Option<ControlKnob>,
    previous_errors: BTreeMap<String, f64>,
    /// Membership has been non-empty at least once
    populated: bool,
}

impl RegionEntry {
    fn new(info: RegionInfo) -> Self {
        Self {
            info,
            resource: None,
            reclaim_overlap: false,
            control_knob: None,
            previous_errors: BTreeMap::new(),
            populated: false,
        }
    }
}

/// In-memory region registry
#[derive(Debug, Default)]
pub struct MetaCache {
    regions: DashMap<String, RegionEntry>,
    /// (pod uid, container name) -> container info
    containers: DashMap<(String, String), ContainerInfo>,
}

impl MetaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a region or refresh its identity, keeping cross-cycle state
    pub fn upsert_region(&self, info: RegionInfo) {
        match self.regions.get_mut(&info.region_name) {
            Some(mut entry) => {
                if entry.info.region_type != info.region_type {
                    // Errors of another indicator set mean nothing here
                    entry.previous_errors.clear();
                }
                entry.info = info;
            }
            None => {
                info!(region = %info.region_name, region_type = %info.region_type, "Registering region");
                self.regions
                    .insert(info.region_name.clone(), RegionEntry::new(info));
            }
        }
    }

    pub fn region_info(&self, region: &str) -> Option<RegionInfo> {
        self.regions.get(region).map(|e| e.info.clone())
    }

    pub fn list_regions(&self) -> Vec<RegionInfo> {
        let mut regions: Vec<RegionInfo> = self.regions.iter().map(|e| e.info.clone()).collect();
        regions.sort_by(|a, b| a.region_name.cmp(&b.region_name));
        regions
    }

    pub fn remove_region(&self, region: &str) -> Option<RegionInfo> {
        debug!(region = %region, "Removing region");
        self.regions.remove(region).map(|(_, e)| e.info)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn set_resource_essentials(
        &self,
        region: &str,
        resource: ResourceEssentials,
    ) -> ProvisionResult<()> {
        let mut entry = self
            .regions
            .get_mut(region)
            .ok_or_else(|| ProvisionError::RegionNotFound(region.to_string()))?;
        entry.resource = Some(resource);
        Ok(())
    }

    pub fn resource_essentials(&self, region: &str) -> Option<ResourceEssentials> {
        self.regions.get(region).and_then(|e| e.resource)
    }

    pub fn set_reclaim_overlap(&self, region: &str, overlap: bool) -> ProvisionResult<()> {
        let mut entry = self
            .regions
            .get_mut(region)
            .ok_or_else(|| ProvisionError::RegionNotFound(region.to_string()))?;
        entry.reclaim_overlap = overlap;
        Ok(())
    }

    pub fn reclaim_overlap(&self, region: &str) -> bool {
        self.regions.get(region).map(|e| e.reclaim_overlap).unwrap_or(false)
    }

    /// Seed or overwrite the knob a region starts its next cycle from
    pub fn set_control_knob(&self, region: &str, knob: ControlKnob) -> ProvisionResult<()> {
        let mut entry = self
            .regions
            .get_mut(region)
            .ok_or_else(|| ProvisionError::RegionNotFound(region.to_string()))?;
        entry.control_knob = Some(knob);
        Ok(())
    }

    /// Add or replace a container; the regions it names must exist
    pub fn add_container(
        &self,
        pod_uid: &str,
        container_name: &str,
        info: ContainerInfo,
    ) -> ProvisionResult<()> {
        if let Some(missing) = info
            .region_names
            .iter()
            .find(|region| !self.regions.contains_key(*region))
        {
            return Err(ProvisionError::RegionNotFound(missing.clone()));
        }

        debug!(pod_uid = %pod_uid, container = %container_name, "Adding container");
        let regions = info.region_names.clone();
        self.containers
            .insert((pod_uid.to_string(), container_name.to_string()), info);

        // Populated only once the member is visible to pod_set
        for region in &regions {
            if let Some(mut entry) = self.regions.get_mut(region) {
                entry.populated = true;
            }
        }
        Ok(())
    }

    pub fn get_container(&self, pod_uid: &str, container_name: &str) -> Option<ContainerInfo> {
        self.containers
            .get(&(pod_uid.to_string(), container_name.to_string()))
            .map(|c| c.clone())
    }

    pub fn remove_container(&self, pod_uid: &str, container_name: &str) -> Option<ContainerInfo> {
        self.containers
            .remove(&(pod_uid.to_string(), container_name.to_string()))
            .map(|(_, c)| c)
    }

    /// Remove every container of a pod, returning how many were removed
    pub fn remove_pod(&self, pod_uid: &str) -> usize {
        let mut removed = 0;
        self.containers.retain(|(uid, _), _| {
            let keep = uid != pod_uid;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Pods and containers currently accounted to a region
    pub fn pod_set(&self, region: &str) -> PodSet {
        let mut pod_set = PodSet::new();
        for container in self.containers.iter() {
            if container.region_names.contains(region) {
                let (pod_uid, container_name) = container.key();
                pod_set
                    .entry(pod_uid.clone())
                    .or_default()
                    .insert(container_name.clone());
            }
        }
        pod_set
    }

    /// Drop regions whose membership went from populated to empty
    pub fn evict_empty_regions(&self) -> Vec<String> {
        let candidates: Vec<String> = self
            .regions
            .iter()
            .filter(|e| e.populated)
            .map(|e| e.key().clone())
            .collect();

        let mut evicted = Vec::new();
        for region in candidates {
            let removed = self
                .regions
                .remove_if(&region, |_, entry| entry.populated && self.pod_set(&region).is_empty());
            if removed.is_some() {
                info!(region = %region, "Evicting region with empty membership");
                evicted.push(region);
            }
        }
        evicted
    }
}

impl RegionRegistry for MetaCache {
    fn previous_error(&self, region: &str, indicator: &str) -> Option<f64> {
        self.regions
            .get(region)
            .and_then(|e| e.previous_errors.get(indicator).copied())
    }

    fn persisted_knob(&self, region: &str) -> Option<ControlKnob> {
        self.regions.get(region).and_then(|e| e.control_knob.clone())
    }

    fn store_cycle(&self, region: &str, knob: &ControlKnob, errors: &BTreeMap<String, f64>) {
        if let Some(mut entry) = self.regions.get_mut(region) {
            entry.control_knob = Some(knob.clone());
            entry.previous_errors = errors.clone();
        }
    }
}
