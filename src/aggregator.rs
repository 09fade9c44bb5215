//! Session usage aggregation
//!
//! Folds a collection of session records into [`AggregateStats`]: token and
//! delta totals over the visible sessions, plus the sessions that moved the
//! five-hour window the most.
//!
//! The pass is pure and cheap, so it is simply re-run whenever the caller needs
//! fresh numbers; nothing is cached between calls.

use std::cmp::Ordering;

use crate::models::{AggregateStats, SessionRecord, SessionTokenUsage};

/// Length of the ranked list in [`AggregateStats::top_sessions`]
pub const TOP_SESSIONS_LIMIT: usize = 10;

/// Read access to a session record, so callers can aggregate their own types.
pub trait UsageSession {
    fn session_id(&self) -> &str;
    fn is_hidden(&self) -> bool;
    fn token_usage(&self) -> Option<&SessionTokenUsage>;
}

impl UsageSession for SessionRecord {
    fn session_id(&self) -> &str {
        &self.id
    }

    fn is_hidden(&self) -> bool {
        self.hidden
    }

    fn token_usage(&self) -> Option<&SessionTokenUsage> {
        self.token_usage.as_ref()
    }
}

impl<T: UsageSession + ?Sized> UsageSession for &T {
    fn session_id(&self) -> &str {
        (**self).session_id()
    }

    fn is_hidden(&self) -> bool {
        (**self).is_hidden()
    }

    fn token_usage(&self) -> Option<&SessionTokenUsage> {
        (**self).token_usage()
    }
}

/// Aggregate with the default top-N of [`TOP_SESSIONS_LIMIT`].
pub fn aggregate<S: UsageSession>(sessions: &[S]) -> AggregateStats {
    aggregate_with_limit(sessions, TOP_SESSIONS_LIMIT)
}

/// Aggregate, keeping at most `limit` ranked sessions.
///
/// Hidden sessions are skipped entirely. Ranking is by five-hour delta,
/// highest first; sessions with equal deltas keep their input order.
pub fn aggregate_with_limit<S: UsageSession>(sessions: &[S], limit: usize) -> AggregateStats {
    let visible: Vec<&S> = sessions.iter().filter(|s| !s.is_hidden()).collect();

    let mut stats = AggregateStats {
        total_sessions: visible.len(),
        ..Default::default()
    };

    for usage in visible.iter().filter_map(|s| s.token_usage()) {
        stats.total_tokens += usage.total_tokens;

        if let Some(delta) = &usage.usage_delta {
            stats.total_five_hour_delta += delta.five_hour_delta;
            stats.total_seven_day_delta += delta.seven_day_delta;
            stats.sessions_with_usage += 1;
        }
    }

    let mut ranked: Vec<(&str, f64)> = visible
        .iter()
        .filter_map(|s| {
            let delta = s.token_usage()?.usage_delta.as_ref()?;
            Some((s.session_id(), delta.five_hour_delta))
        })
        .collect();

    // sort_by is stable, ties keep input order
    ranked.sort_by(|a, b| descending(a.1, b.1));

    stats.top_sessions = ranked
        .into_iter()
        .take(limit)
        .map(|(id, _)| id.to_string())
        .collect();

    stats
}

fn descending(a: f64, b: f64) -> Ordering {
    rank_key(b).total_cmp(&rank_key(a))
}

// NaN ranks as zero, and -0.0 ties with 0.0.
fn rank_key(delta: f64) -> f64 {
    if delta.is_nan() || delta == 0.0 {
        0.0
    } else {
        delta
    }
}
