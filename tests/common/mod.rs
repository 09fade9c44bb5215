#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use usage_tracker::error::{Result, UsageError};
use usage_tracker::fetcher::{FetchOutcome, TransportResponse, UsageRequest, UsageSource, UsageTransport};
use usage_tracker::models::{
    SessionRecord, SessionTokenUsage, SessionUsageDelta, UsageSnapshot, UsageWindow,
};

/// Snapshot identified by its five-hour utilization.
pub fn snapshot(five_hour: f64) -> UsageSnapshot {
    UsageSnapshot {
        five_hour: UsageWindow::new(five_hour, Some("2025-01-01T15:00:00Z".to_string())),
        seven_day: UsageWindow::new(five_hour / 4.0, None),
        seven_day_opus: None,
    }
}

pub fn updated(five_hour: f64) -> FetchOutcome {
    FetchOutcome::Updated(snapshot(five_hour))
}

pub fn transient() -> FetchOutcome {
    FetchOutcome::Transient {
        reason: "connection reset".to_string(),
    }
}

pub fn server_error() -> FetchOutcome {
    FetchOutcome::Failed {
        status: 500,
        message: "internal error".to_string(),
    }
}

/// Usage source that replays a script, then repeats a fallback outcome.
pub struct ScriptedSource {
    calls: AtomicUsize,
    script: Mutex<VecDeque<(Duration, FetchOutcome)>>,
    fallback: (Duration, FetchOutcome),
}

impl ScriptedSource {
    pub fn always(outcome: FetchOutcome) -> Self {
        Self::delayed(Duration::ZERO, outcome)
    }

    /// Every call takes `delay` before returning `outcome`.
    pub fn delayed(delay: Duration, outcome: FetchOutcome) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            script: Mutex::new(VecDeque::new()),
            fallback: (delay, outcome),
        }
    }

    pub fn script(steps: Vec<(Duration, FetchOutcome)>, fallback: FetchOutcome) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            script: Mutex::new(steps.into()),
            fallback: (Duration::ZERO, fallback),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UsageSource for ScriptedSource {
    async fn fetch_usage(&self) -> FetchOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().unwrap().pop_front();
        let (delay, outcome) = step.unwrap_or_else(|| self.fallback.clone());

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        outcome
    }
}

/// Transport that records requests and replays canned responses.
pub struct ScriptedTransport {
    requests: Mutex<Vec<UsageRequest>>,
    responses: Mutex<VecDeque<Result<TransportResponse>>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Result<TransportResponse>>) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            responses: Mutex::new(responses.into()),
        }
    }

    pub fn responding(status: u16, body: &str) -> Self {
        Self::new(vec![Ok(TransportResponse::new(status, body))])
    }

    pub fn failing(error: UsageError) -> Self {
        Self::new(vec![Err(error)])
    }

    pub fn requests(&self) -> Vec<UsageRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl UsageTransport for ScriptedTransport {
    async fn get(&self, request: &UsageRequest) -> Result<TransportResponse> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(UsageError::Transport("no scripted response".to_string())))
    }
}

/// Visible session with a five-hour delta and a matching token count.
pub fn session_with_delta(id: &str, five_hour: f64, tokens: u64) -> SessionRecord {
    SessionRecord::new(id).with_usage(SessionTokenUsage {
        input_tokens: tokens / 2,
        output_tokens: tokens - tokens / 2,
        total_tokens: tokens,
        context_tokens: tokens,
        cost_usd: tokens as f64 * 0.000_01,
        usage_delta: Some(SessionUsageDelta {
            five_hour_delta: five_hour,
            seven_day_delta: five_hour / 5.0,
            seven_day_opus_delta: None,
        }),
    })
}

pub fn session_tokens_only(id: &str, tokens: u64) -> SessionRecord {
    SessionRecord::new(id).with_usage(SessionTokenUsage {
        total_tokens: tokens,
        ..Default::default()
    })
}
