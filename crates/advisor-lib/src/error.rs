//! Provisioning error types.

use crate::models::RegionType;
use thiserror::Error;

/// Errors surfaced by the provisioning core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProvisionError {
    #[error("indicator {0} has a zero target")]
    ZeroTarget(String),

    #[error("invalid resource bounds: lower {lower}, upper {upper}, reserved {reserved}")]
    InvalidBounds { lower: f64, upper: f64, reserved: f64 },

    #[error("no indicators configured for region type {0}")]
    UnknownRegionType(RegionType),

    #[error("indicator {0} has no response parameters")]
    UnmappedIndicator(String),

    #[error("invalid response parameters for {indicator}: {reason}")]
    InvalidParameters { indicator: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("indicator {0} unavailable")]
    IndicatorUnavailable(String),

    #[error("region {region}: no configured indicator available ({indicators:?})")]
    IndicatorsUnavailable {
        region: String,
        indicators: Vec<String>,
    },

    #[error("region {region}: control knob {knob} is not a finite value ({value})")]
    InvalidControlKnob {
        region: String,
        knob: String,
        value: f64,
    },

    #[error("region {0}: control knob missing from essentials")]
    MissingControlKnob(String),

    #[error("region {0}: essentials not set")]
    EssentialsMissing(String),

    #[error("region {0}: control knob not adjusted yet")]
    NotUpdated(String),

    #[error("region not found: {0}")]
    RegionNotFound(String),
}

impl ProvisionError {
    /// True for errors caused by static configuration or caller-supplied bounds
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ProvisionError::ZeroTarget(_)
                | ProvisionError::InvalidBounds { .. }
                | ProvisionError::UnknownRegionType(_)
                | ProvisionError::UnmappedIndicator(_)
                | ProvisionError::InvalidParameters { .. }
                | ProvisionError::InvalidConfig(_)
        )
    }

    /// Short label used for metrics and log events
    pub fn kind(&self) -> &'static str {
        match self {
            ProvisionError::ZeroTarget(_) => "zero_target",
            ProvisionError::InvalidBounds { .. } => "invalid_bounds",
            ProvisionError::UnknownRegionType(_) => "unknown_region_type",
            ProvisionError::UnmappedIndicator(_) => "unmapped_indicator",
            ProvisionError::InvalidParameters { .. } => "invalid_parameters",
            ProvisionError::InvalidConfig(_) => "invalid_config",
            ProvisionError::IndicatorUnavailable(_) => "indicator_unavailable",
            ProvisionError::IndicatorsUnavailable { .. } => "indicators_unavailable",
            ProvisionError::InvalidControlKnob { .. } => "invalid_control_knob",
            ProvisionError::MissingControlKnob(_) => "missing_control_knob",
            ProvisionError::EssentialsMissing(_) => "essentials_missing",
            ProvisionError::NotUpdated(_) => "not_updated",
            ProvisionError::RegionNotFound(_) => "region_not_found",
        }
    }
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;
