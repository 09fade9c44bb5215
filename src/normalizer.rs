//! Usage API normalization
//!
//! Turns the usage endpoint's snake_case payload into a [`UsageSnapshot`].
//! Normalization never fails: missing or malformed optional fields fall back to
//! documented defaults (utilization `0`, no reset time), and the Opus window is
//! only carried over when the payload actually contains one.

use serde::Deserialize;
use serde_json::Value;

use crate::models::{UsageSnapshot, UsageWindow};

/// Typed form of the usage endpoint response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawUsageResponse {
    #[serde(default)]
    pub five_hour: Option<RawUsageWindow>,
    #[serde(default)]
    pub seven_day: Option<RawUsageWindow>,
    #[serde(default)]
    pub seven_day_opus: Option<RawUsageWindow>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawUsageWindow {
    #[serde(default)]
    pub utilization: Option<f64>,
    #[serde(default)]
    pub resets_at: Option<String>,
}

impl From<RawUsageWindow> for UsageWindow {
    fn from(raw: RawUsageWindow) -> Self {
        Self {
            utilization: finite_or_zero(raw.utilization),
            resets_at: raw.resets_at,
        }
    }
}

impl From<RawUsageResponse> for UsageSnapshot {
    fn from(raw: RawUsageResponse) -> Self {
        Self {
            five_hour: raw.five_hour.map(UsageWindow::from).unwrap_or_default(),
            seven_day: raw.seven_day.map(UsageWindow::from).unwrap_or_default(),
            seven_day_opus: raw.seven_day_opus.map(UsageWindow::from),
        }
    }
}

/// Normalize an arbitrary JSON payload.
///
/// Accepts any shape. A non-object root, or a window that is not an object,
/// is treated as absent.
pub fn normalize_usage(payload: &Value) -> UsageSnapshot {
    UsageSnapshot {
        five_hour: window_field(payload, "five_hour").unwrap_or_default(),
        seven_day: window_field(payload, "seven_day").unwrap_or_default(),
        seven_day_opus: window_field(payload, "seven_day_opus"),
    }
}

fn window_field(payload: &Value, key: &str) -> Option<UsageWindow> {
    let window = payload.get(key)?.as_object()?;

    Some(UsageWindow {
        utilization: finite_or_zero(window.get("utilization").and_then(Value::as_f64)),
        resets_at: window
            .get("resets_at")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn finite_or_zero(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or(0.0)
}
