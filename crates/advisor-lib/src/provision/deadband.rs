//! Tolerance band around an indicator target
//!
//! Lower and upper percentages are independent, so a band can tolerate a
//! large undershoot while reacting to the smallest overshoot, or the reverse.

/// Returns true when `current` lies inside
/// `[target * (1 - lower_pct), target * (1 + upper_pct)]`.
pub fn in_band(current: f64, target: f64, lower_pct: f64, upper_pct: f64) -> bool {
    let upper = target * (1.0 + upper_pct);
    let lower = target * (1.0 - lower_pct);

    lower <= current && current <= upper
}
