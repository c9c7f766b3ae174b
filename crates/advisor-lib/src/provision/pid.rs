//! First-order PID evaluation of a single indicator
//!
//! Turns one indicator reading into a bounded knob delta. Gains are selected
//! by the sign of the normalized error so over- and undershoot can react with
//! different strength. The evaluator keeps no state: the previous error used
//! by the derivative term is passed in and the new error is handed back.

use super::deadband::in_band;
use crate::error::{ProvisionError, ProvisionResult};
use crate::models::IndicatorValue;
use serde::{Deserialize, Serialize};

/// Largest knob increase one indicator may request per cycle
pub const MAX_RAMP_UP_STEP: f64 = 8.0;

/// Largest knob decrease one indicator may request per cycle
pub const MAX_RAMP_DOWN_STEP: f64 = 2.0;

/// Response parameters of one indicator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FirstOrderPidParams {
    /// Proportional gain when above target
    pub kpp: f64,
    /// Proportional gain when below target
    pub kpn: f64,
    /// Derivative gain when above target
    #[serde(default)]
    pub kdp: f64,
    /// Derivative gain when below target
    #[serde(default)]
    pub kdn: f64,
    #[serde(default = "default_adjustment_upper_bound")]
    pub adjustment_upper_bound: f64,
    #[serde(default = "default_adjustment_lower_bound")]
    pub adjustment_lower_bound: f64,
    pub deadband_lower_pct: f64,
    pub deadband_upper_pct: f64,
}

fn default_adjustment_upper_bound() -> f64 {
    MAX_RAMP_UP_STEP
}

fn default_adjustment_lower_bound() -> f64 {
    -MAX_RAMP_DOWN_STEP
}

impl FirstOrderPidParams {
    /// Parameters with the default ramp steps and no derivative action
    pub fn proportional(kpp: f64, kpn: f64, deadband_lower_pct: f64, deadband_upper_pct: f64) -> Self {
        Self {
            kpp,
            kpn,
            kdp: 0.0,
            kdn: 0.0,
            adjustment_upper_bound: MAX_RAMP_UP_STEP,
            adjustment_lower_bound: -MAX_RAMP_DOWN_STEP,
            deadband_lower_pct,
            deadband_upper_pct,
        }
    }

    pub fn validate(&self, indicator: &str) -> ProvisionResult<()> {
        let invalid = |reason: &str| ProvisionError::InvalidParameters {
            indicator: indicator.to_string(),
            reason: reason.to_string(),
        };

        let values = [
            self.kpp,
            self.kpn,
            self.kdp,
            self.kdn,
            self.adjustment_upper_bound,
            self.adjustment_lower_bound,
            self.deadband_lower_pct,
            self.deadband_upper_pct,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(invalid("parameters must be finite"));
        }
        if [self.kpp, self.kpn, self.kdp, self.kdn].iter().any(|k| *k < 0.0) {
            return Err(invalid("gains must be non-negative"));
        }
        if self.adjustment_lower_bound > 0.0 || self.adjustment_upper_bound < 0.0 {
            return Err(invalid("adjustment bounds must straddle zero"));
        }
        if self.deadband_lower_pct < 0.0 || self.deadband_upper_pct < 0.0 {
            return Err(invalid("deadband percentages must be non-negative"));
        }

        Ok(())
    }
}

/// Direction an indicator pushes the knob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentDirection {
    None,
    Increase,
    Decrease,
}

impl AdjustmentDirection {
    fn of(delta: f64) -> Self {
        if delta > 0.0 {
            AdjustmentDirection::Increase
        } else if delta < 0.0 {
            AdjustmentDirection::Decrease
        } else {
            AdjustmentDirection::None
        }
    }
}

/// Bounded delta requested by one indicator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentDelta {
    pub indicator: String,
    pub delta: f64,
    pub direction: AdjustmentDirection,
    /// Normalized error to carry into the next cycle's derivative term
    pub error: f64,
}

/// Targets normalize the error, so they must be positive
pub fn validate_target(indicator: &str, target: f64) -> ProvisionResult<()> {
    if target == 0.0 {
        return Err(ProvisionError::ZeroTarget(indicator.to_string()));
    }
    if target < 0.0 {
        return Err(ProvisionError::InvalidParameters {
            indicator: indicator.to_string(),
            reason: format!("negative target {}", target),
        });
    }
    Ok(())
}

/// Evaluate one indicator.
///
/// # Arguments
/// * `scale` - Knob units per unit of normalized error, normally the region's
///   resource upper bound
/// * `previous_error` - Error carried from the last cycle, if any
/// * `dt` - Control interval in seconds
pub fn evaluate(
    indicator: &str,
    value: &IndicatorValue,
    params: &FirstOrderPidParams,
    scale: f64,
    previous_error: Option<f64>,
    dt: f64,
) -> ProvisionResult<AdjustmentDelta> {
    if !value.current.is_finite() || !value.target.is_finite() {
        return Err(ProvisionError::IndicatorUnavailable(indicator.to_string()));
    }
    validate_target(indicator, value.target)?;

    if in_band(
        value.current,
        value.target,
        params.deadband_lower_pct,
        params.deadband_upper_pct,
    ) {
        return Ok(AdjustmentDelta {
            indicator: indicator.to_string(),
            delta: 0.0,
            direction: AdjustmentDirection::None,
            error: 0.0,
        });
    }

    let error = (value.current - value.target) / value.target;
    let (kp, kd) = if error > 0.0 {
        (params.kpp, params.kdp)
    } else {
        (params.kpn, params.kdn)
    };

    let derivative = match previous_error {
        Some(previous) if kd != 0.0 && dt > 0.0 => kd * (error - previous) / dt,
        _ => 0.0,
    };

    let raw = (kp * error + derivative) * scale;

    // The derivative term may dampen a correction but never reverse it
    let directed = if error > 0.0 { raw.max(0.0) } else { raw.min(0.0) };
    let delta = directed.clamp(params.adjustment_lower_bound, params.adjustment_upper_bound);

    Ok(AdjustmentDelta {
        indicator: indicator.to_string(),
        delta,
        direction: AdjustmentDirection::of(delta),
        error,
    })
}
