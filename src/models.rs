//! Core Data Models
//!
//! This module defines the data structures shared by the usage tracking engine.
//! They cover both halves of the pipeline: the subscription usage windows
//! reported by the usage API, and the per-session token usage that the
//! aggregator folds into summary statistics.
//!
//! ## Data Flow
//!
//! 1. **Remote usage**: [`UsageSnapshot`] - Normalized five-hour / seven-day windows
//! 2. **Eligibility**: [`UsageAvailability`] - Whether the account can see usage data at all
//! 3. **Per session**: [`SessionTokenUsage`] and [`SessionUsageDelta`] - Attached to session records
//! 4. **Summary**: [`AggregateStats`] - Totals and the top sessions by five-hour impact
//!
//! ## Serialization
//!
//! Every public type serializes with camelCase field names, the shape the
//! display layer consumes. Optional fields are skipped when absent so that a
//! missing Opus window stays distinguishable from a zeroed one.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One rate-limit window's fill level and next reset instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageWindow {
    /// Utilization percentage (0-100, may briefly exceed 100)
    pub utilization: f64,
    /// ISO timestamp when the window resets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resets_at: Option<String>,
}

impl Default for UsageWindow {
    fn default() -> Self {
        Self {
            utilization: 0.0,
            resets_at: None,
        }
    }
}

impl UsageWindow {
    pub fn new(utilization: f64, resets_at: Option<String>) -> Self {
        Self {
            utilization,
            resets_at,
        }
    }

    /// Parsed reset instant, if present and well formed.
    pub fn reset_time(&self) -> Option<DateTime<Utc>> {
        self.resets_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Time left until the window resets.
    ///
    /// An overdue reset is reported as `Duration::zero()`, never negative.
    pub fn time_until_reset(&self, now: DateTime<Utc>) -> Option<Duration> {
        let reset = self.reset_time()?;
        Some((reset - now).max(Duration::zero()))
    }

    pub fn is_reset_overdue(&self, now: DateTime<Utc>) -> bool {
        self.reset_time().map(|reset| reset <= now).unwrap_or(false)
    }
}

/// Normalized view of the usage API response.
///
/// Produced once per successful fetch and replaced wholesale by the next one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub five_hour: UsageWindow,
    pub seven_day: UsageWindow,
    /// Only present for accounts with a separate Opus allowance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seven_day_opus: Option<UsageWindow>,
}

impl UsageSnapshot {
    /// Percentage points consumed since `baseline` was taken.
    ///
    /// A window that reset in between contributes 0 rather than a negative
    /// value. The Opus delta is only reported when both snapshots carry it.
    pub fn delta_since(&self, baseline: &UsageSnapshot) -> SessionUsageDelta {
        let diff = |now: &UsageWindow, then: &UsageWindow| {
            (now.utilization - then.utilization).max(0.0)
        };

        SessionUsageDelta {
            five_hour_delta: diff(&self.five_hour, &baseline.five_hour),
            seven_day_delta: diff(&self.seven_day, &baseline.seven_day),
            seven_day_opus_delta: match (&self.seven_day_opus, &baseline.seven_day_opus) {
                (Some(now), Some(then)) => Some(diff(now, then)),
                _ => None,
            },
        }
    }
}

/// Whether the authenticated account is entitled to usage data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UsageAvailability {
    /// No fetch has completed yet
    #[default]
    Unknown,
    /// A snapshot is present
    Available,
    /// The account lacks the subscription scope or the token expired
    Unavailable,
}

impl UsageAvailability {
    pub fn is_available(self) -> bool {
        matches!(self, UsageAvailability::Available)
    }
}

/// A session's contribution to each subscription window, in percentage points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUsageDelta {
    pub five_hour_delta: f64,
    pub seven_day_delta: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seven_day_opus_delta: Option<f64>,
}

/// Token and subscription usage attached to a session record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub context_tokens: u64,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_delta: Option<SessionUsageDelta>,
}

impl SessionTokenUsage {
    /// Fold another run's usage into this one.
    ///
    /// Counts and cost are summed; `context_tokens` tracks the latest run since
    /// it describes the current context window, not a cumulative quantity.
    pub fn accumulate(&mut self, run: &SessionTokenUsage) {
        self.input_tokens += run.input_tokens;
        self.output_tokens += run.output_tokens;
        self.total_tokens += run.total_tokens;
        self.context_tokens = run.context_tokens;
        self.cost_usd += run.cost_usd;
    }
}

/// A session as handed over by the session store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<SessionTokenUsage>,
}

impl SessionRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            hidden: false,
            token_usage: None,
        }
    }

    pub fn with_usage(mut self, usage: SessionTokenUsage) -> Self {
        self.token_usage = Some(usage);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

/// Summary statistics over the visible sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    pub total_sessions: usize,
    pub sessions_with_usage: usize,
    pub total_five_hour_delta: f64,
    pub total_seven_day_delta: f64,
    pub total_tokens: u64,
    /// Session ids ranked by five-hour delta, highest first
    pub top_sessions: Vec<String>,
}
