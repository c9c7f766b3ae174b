//! HTTP API for health checks, Prometheus metrics and region state
//!
//! The resource manager pushes regions, container membership and indicator
//! readings here; the control loop picks them up on its next cycle.

use advisor_lib::{
    health::{ComponentStatus, HealthRegistry},
    observability::AdvisorMetrics,
    provision::validate_target,
    ContainerInfo, ControlKnob, ControlKnobName, ControlKnobValue, CpuSet, IndicatorStore,
    MetaCache, ProvisionConfig, ProvisionError, RegionInfo, RegionRegistry, RegionType,
    ResourceEssentials,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, put},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: AdvisorMetrics,
    pub config: Arc<ProvisionConfig>,
    pub registry: Arc<MetaCache>,
    pub store: Arc<IndicatorStore>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: AdvisorMetrics,
        config: Arc<ProvisionConfig>,
        registry: Arc<MetaCache>,
        store: Arc<IndicatorStore>,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            config,
            registry,
            store,
        }
    }
}

/// Provisioning error rendered as a JSON response
pub struct ApiError(ProvisionError);

impl From<ProvisionError> for ApiError {
    fn from(e: ProvisionError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ProvisionError::RegionNotFound(_) => StatusCode::NOT_FOUND,
            e if e.is_configuration() => StatusCode::BAD_REQUEST,
            _ => StatusCode::CONFLICT,
        };

        let body = serde_json::json!({
            "error": self.0.to_string(),
            "kind": self.0.kind(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Clone, Deserialize)]
pub struct RegionRequest {
    pub region_type: RegionType,
    #[serde(default)]
    pub owner_pool_name: String,
    #[serde(default)]
    pub binding_numas: CpuSet,
    pub resource: ResourceEssentials,
    #[serde(default)]
    pub reclaim_overlap: bool,
    /// Starting knob; defaults to the full guarantee on first registration
    #[serde(default)]
    pub initial_knob: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegionStatus {
    #[serde(flatten)]
    pub info: RegionInfo,
    pub resource: Option<ResourceEssentials>,
    pub reclaim_overlap: bool,
    pub pod_count: usize,
    pub control_knob: Option<ControlKnob>,
}

fn region_status(state: &AppState, info: RegionInfo) -> RegionStatus {
    let name = info.region_name.as_str();
    RegionStatus {
        resource: state.registry.resource_essentials(name),
        reclaim_overlap: state.registry.reclaim_overlap(name),
        pod_count: state.registry.pod_set(name).len(),
        control_knob: state.registry.persisted_knob(name),
        info,
    }
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn list_regions(State(state): State<Arc<AppState>>) -> Json<Vec<RegionStatus>> {
    let regions = state
        .registry
        .list_regions()
        .into_iter()
        .map(|info| region_status(&state, info))
        .collect();
    Json(regions)
}

async fn put_region(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(request): Json<RegionRequest>,
) -> ApiResult<Json<RegionStatus>> {
    request.resource.validate()?;
    if request.resource.enable_reclaim {
        state.config.indicators_for(request.region_type)?;
    }

    let info = RegionInfo {
        region_name: name.clone(),
        region_type: request.region_type,
        owner_pool_name: request.owner_pool_name,
        binding_numas: request.binding_numas,
    };
    let created = state.registry.region_info(&name).is_none();
    state.registry.upsert_region(info.clone());
    state.registry.set_resource_essentials(&name, request.resource)?;
    state.registry.set_reclaim_overlap(&name, request.reclaim_overlap)?;

    let resource = request.resource;
    let seed = match request.initial_knob {
        Some(value) => Some(value),
        None if created => Some(resource.resource_upper_bound - resource.reserved_for_allocate),
        None => None,
    };
    if let Some(value) = seed {
        let value = value.clamp(resource.resource_lower_bound, resource.resource_upper_bound);
        state.registry.set_control_knob(
            &name,
            ControlKnob::from([(ControlKnobName::NonReclaimedCpuSize, ControlKnobValue::new(value))]),
        )?;
    }

    info!(region = %name, region_type = %info.region_type, created = created, "Region updated");
    Ok(Json(region_status(&state, info)))
}

async fn delete_region(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    let info = state
        .registry
        .remove_region(&name)
        .ok_or_else(|| ProvisionError::RegionNotFound(name.clone()))?;
    state.store.remove_region(&name);

    let indicators: Vec<&str> = state
        .config
        .indicators_for(info.region_type)
        .map(|configured| configured.iter().map(|i| i.name.as_str()).collect())
        .unwrap_or_default();
    state.metrics.forget_region(&name, &indicators);

    info!(region = %name, "Region removed");
    Ok(StatusCode::NO_CONTENT)
}

/// Record indicator readings (name -> current value) taken now
async fn put_indicators(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(readings): Json<HashMap<String, f64>>,
) -> ApiResult<StatusCode> {
    if state.registry.region_info(&name).is_none() {
        return Err(ProvisionError::RegionNotFound(name).into());
    }

    let now = chrono::Utc::now().timestamp();
    for (indicator, value) in &readings {
        state.store.record(&name, indicator, *value, now);
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Override configured targets (name -> target) for one region
async fn put_targets(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(targets): Json<HashMap<String, f64>>,
) -> ApiResult<StatusCode> {
    if state.registry.region_info(&name).is_none() {
        return Err(ProvisionError::RegionNotFound(name).into());
    }
    for (indicator, target) in &targets {
        validate_target(indicator, *target)?;
    }

    for (indicator, target) in &targets {
        state.store.set_target(&name, indicator, *target);
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn get_knob(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<ControlKnob>> {
    state
        .registry
        .persisted_knob(&name)
        .map(Json)
        .ok_or_else(|| ProvisionError::RegionNotFound(name).into())
}

async fn put_container(
    State(state): State<Arc<AppState>>,
    Path((pod_uid, container)): Path<(String, String)>,
    Json(mut info): Json<ContainerInfo>,
) -> ApiResult<StatusCode> {
    info.pod_uid = pod_uid.clone();
    info.container_name = container.clone();
    state.registry.add_container(&pod_uid, &container, info)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_pod(
    State(state): State<Arc<AppState>>,
    Path(pod_uid): Path<String>,
) -> Json<serde_json::Value> {
    let removed = state.registry.remove_pod(&pod_uid);
    Json(serde_json::json!({ "removed": removed }))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/regions", get(list_regions))
        .route("/regions/:name", put(put_region).delete(delete_region))
        .route("/regions/:name/indicators", put(put_indicators))
        .route("/regions/:name/targets", put(put_targets))
        .route("/regions/:name/knob", get(get_knob))
        .route("/pods/:pod_uid", delete(delete_pod))
        .route("/pods/:pod_uid/containers/:container", put(put_container))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
