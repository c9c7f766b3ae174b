//! Periodic control loop
//!
//! Runs one provisioning cycle per registered region every control interval.
//! The loop is the single writer of every region policy: policies live in
//! the loop and regions are driven one after another inside one task.

use crate::config::ProvisionConfig;
use crate::error::ProvisionError;
use crate::health::HealthRegistry;
use crate::indicator::{gather_indicators, IndicatorStore};
use crate::models::{ControlEssentials, RegionInfo};
use crate::observability::{AdvisorMetrics, StructuredLogger};
use crate::provision::{CycleReport, PolicyRama, ProvisionPolicy, RAMA_CONTROL_KNOB};
use crate::registry::{MetaCache, RegionRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Outcome of one pass over all regions
#[derive(Debug, Default)]
pub struct CycleSummary {
    pub reports: Vec<CycleReport>,
    pub failures: Vec<(String, ProvisionError)>,
    /// Regions without essentials or an initial knob yet
    pub skipped: Vec<String>,
    pub evicted: Vec<String>,
}

impl CycleSummary {
    pub fn attempted(&self) -> usize {
        self.reports.len() + self.failures.len()
    }
}

pub struct ControlLoop {
    config: Arc<ProvisionConfig>,
    registry: Arc<MetaCache>,
    store: Arc<IndicatorStore>,
    metrics: AdvisorMetrics,
    logger: StructuredLogger,
    health: Option<HealthRegistry>,
    policies: HashMap<String, PolicyRama>,
}

impl ControlLoop {
    pub fn new(
        config: Arc<ProvisionConfig>,
        registry: Arc<MetaCache>,
        store: Arc<IndicatorStore>,
        metrics: AdvisorMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            metrics,
            logger,
            health: None,
            policies: HashMap::new(),
        }
    }

    /// Report loop health to a registry after each cycle
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Run until a shutdown signal arrives
    pub async fn run(mut self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let period = self.config.control_interval();
        info!(interval_ms = period.as_millis() as u64, "Starting control loop");

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    let summary = self.run_cycle(chrono::Utc::now().timestamp());
                    self.metrics.observe_cycle_latency(start.elapsed().as_secs_f64());

                    if let Some(health) = &self.health {
                        health.record_cycle(summary.failures.len(), summary.attempted()).await;
                    }

                    debug!(
                        adjusted = summary.reports.len(),
                        failed = summary.failures.len(),
                        skipped = summary.skipped.len(),
                        elapsed_us = start.elapsed().as_micros() as u64,
                        "Control cycle complete"
                    );
                }
                _ = shutdown.recv() => {
                    info!("Shutting down control loop");
                    break;
                }
            }
        }
    }

    /// Run one cycle over every registered region as of `now` (unix seconds)
    pub fn run_cycle(&mut self, now: i64) -> CycleSummary {
        let mut summary = CycleSummary::default();
        let regions = self.registry.list_regions();

        self.policies
            .retain(|name, _| regions.iter().any(|r| &r.region_name == name));

        for region in &regions {
            match self.run_region(region, now) {
                Ok(Some(report)) => {
                    self.metrics.record_cycle(&report);
                    self.logger.log_cycle(&report);
                    summary.reports.push(report);
                }
                Ok(None) => summary.skipped.push(region.region_name.clone()),
                Err(e) => {
                    self.metrics.record_cycle_error(&region.region_name, &e);
                    self.logger.log_cycle_failed(&region.region_name, &e);
                    summary.failures.push((region.region_name.clone(), e));
                }
            }
        }

        for region in self.registry.evict_empty_regions() {
            let indicators: Vec<&str> = self
                .policies
                .get(&region)
                .and_then(|p| self.config.indicators_for(p.region_type()).ok())
                .map(|configured| configured.iter().map(|i| i.name.as_str()).collect())
                .unwrap_or_default();
            self.metrics.forget_region(&region, &indicators);

            self.policies.remove(&region);
            self.store.remove_region(&region);
            self.logger.log_region_evicted(&region);
            summary.evicted.push(region);
        }

        self.metrics.set_regions_controlled(self.registry.len() as i64);
        summary
    }

    /// Policy currently driving a region
    pub fn policy(&self, region: &str) -> Option<&PolicyRama> {
        self.policies.get(region)
    }

    fn run_region(
        &mut self,
        region: &RegionInfo,
        now: i64,
    ) -> Result<Option<CycleReport>, ProvisionError> {
        let name = region.region_name.as_str();

        let Some(resource) = self.registry.resource_essentials(name) else {
            debug!(region = %name, "No resource essentials yet, skipping region");
            return Ok(None);
        };
        let Some(control_knobs) = self.registry.persisted_knob(name) else {
            debug!(region = %name, "No initial control knob yet, skipping region");
            return Ok(None);
        };
        if !control_knobs.contains_key(&RAMA_CONTROL_KNOB) {
            return Err(ProvisionError::MissingControlKnob(name.to_string()));
        }

        let stale_type = self
            .policies
            .get(name)
            .is_some_and(|p| p.region_type() != region.region_type);
        if stale_type {
            info!(region = %name, region_type = %region.region_type, "Region type changed, rebuilding policy");
            self.policies.remove(name);
        }

        let registry: Arc<dyn RegionRegistry> = self.registry.clone();
        let config = self.config.clone();
        let policy = self
            .policies
            .entry(name.to_string())
            .or_insert_with(|| PolicyRama::new(region.clone(), config, registry));

        policy.set_binding_numas(region.binding_numas.clone());
        policy.set_pod_set(self.registry.pod_set(name));

        // Reclaim-disabled regions need no indicators
        let indicators = match self.config.indicators_for(region.region_type) {
            Ok(configured) => gather_indicators(
                &self.store.view(name, now),
                configured,
                &self.store.target_overrides(name),
            ),
            Err(_) if !resource.enable_reclaim => Default::default(),
            Err(e) => return Err(e),
        };

        policy.set_essentials(
            resource,
            ControlEssentials {
                control_knobs,
                indicators,
                reclaim_overlap: self.registry.reclaim_overlap(name),
            },
        )?;

        policy.update().map(Some)
    }
}
