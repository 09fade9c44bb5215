//! Usage poller
//!
//! Keeps a [`UsageSnapshot`] fresh. [`UsagePoller::start`] fetches immediately
//! and then once per interval; [`UsagePoller::refresh`] fetches out of band
//! without moving the schedule; [`UsagePoller::stop`] cancels the timer.
//!
//! ## Overlapping fetches
//!
//! Interval fetches and manual refreshes run as independent tasks and are not
//! serialized: whichever completes last owns the stored snapshot. Snapshots
//! are wholesale replacements, so a stale overwrite is corrected by the next
//! cycle.
//!
//! ## Cancellation
//!
//! Every fetch records the lifecycle generation it was launched under.
//! `stop()` advances the generation, so fetches still in flight at that point
//! finish normally but their results are discarded.
//!
//! ## Observing changes
//!
//! [`UsagePoller::subscribe`] hands out a broadcast receiver of
//! [`UsageEvent`]s, emitted whenever the snapshot or availability changes.

use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::fetcher::{FetchOutcome, UsageSource};
use crate::models::{UsageAvailability, UsageSnapshot};

/// Refresh cadence used when none is configured
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Longest accepted refresh cadence
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// What the poller currently knows, as returned by [`UsagePoller::current`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageState {
    pub snapshot: Option<UsageSnapshot>,
    pub availability: UsageAvailability,
    pub loading: bool,
}

/// Lifecycle phase derived from [`UsageState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerPhase {
    Idle,
    Loading,
    Available,
    Unavailable,
}

impl UsageState {
    pub fn phase(&self) -> PollerPhase {
        if self.loading {
            return PollerPhase::Loading;
        }
        match self.availability {
            UsageAvailability::Unknown => PollerPhase::Idle,
            UsageAvailability::Available => PollerPhase::Available,
            UsageAvailability::Unavailable => PollerPhase::Unavailable,
        }
    }
}

/// Change notification delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum UsageEvent {
    SnapshotUpdated(UsageSnapshot),
    AvailabilityChanged {
        previous: UsageAvailability,
        current: UsageAvailability,
    },
}

/// Why a fetch was started, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchTrigger {
    Initial,
    Interval,
    Manual,
}

#[derive(Debug, Default)]
struct Slot {
    snapshot: Option<UsageSnapshot>,
    availability: UsageAvailability,
    in_flight: usize,
    generation: u64,
}

struct Shared<S> {
    source: S,
    slot: Mutex<Slot>,
    events: broadcast::Sender<UsageEvent>,
}

impl<S: UsageSource + 'static> Shared<S> {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a fetch under the current generation.
    fn begin(self: &Arc<Self>) -> InFlight<S> {
        let mut slot = self.lock();
        slot.in_flight += 1;
        InFlight {
            shared: Arc::clone(self),
            generation: slot.generation,
            settled: false,
        }
    }

    /// Close out a fetch, applying `outcome` if its generation is still current.
    fn settle(&self, generation: u64, outcome: Option<FetchOutcome>) {
        let events = {
            let mut slot = self.lock();
            if slot.generation != generation {
                debug!(generation, "Dropping result of a fetch from a stopped poller");
                return;
            }
            slot.in_flight = slot.in_flight.saturating_sub(1);

            match outcome {
                Some(outcome) => apply_outcome(&mut slot, outcome),
                None => Vec::new(),
            }
        };

        for event in events {
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }

    async fn run_cycle(mut ticket: InFlight<S>, trigger: FetchTrigger) {
        let span = info_span!("usage_fetch", cycle_id = %Uuid::new_v4(), trigger = ?trigger);

        async {
            let outcome = ticket.shared.source.fetch_usage().await;
            debug!(?outcome, "Fetch cycle finished");
            ticket.settle(outcome);
        }
        .instrument(span)
        .await
    }
}

fn apply_outcome(slot: &mut Slot, outcome: FetchOutcome) -> Vec<UsageEvent> {
    let previous = slot.availability;
    let current = UsageAvailability::from_outcome(previous, &outcome);
    let mut events = Vec::new();

    match outcome {
        FetchOutcome::Updated(snapshot) => {
            if slot.snapshot.as_ref() != Some(&snapshot) {
                slot.snapshot = Some(snapshot.clone());
                events.push(UsageEvent::SnapshotUpdated(snapshot));
            }
        }
        FetchOutcome::NotEligible { .. } => {
            slot.snapshot = None;
        }
        FetchOutcome::Transient { .. } | FetchOutcome::Failed { .. } => {}
    }

    if current != previous {
        slot.availability = current;
        events.push(UsageEvent::AvailabilityChanged { previous, current });
    }

    events
}

/// A launched fetch. Dropping it without settling still releases the loading
/// flag.
struct InFlight<S: UsageSource + 'static> {
    shared: Arc<Shared<S>>,
    generation: u64,
    settled: bool,
}

impl<S: UsageSource + 'static> InFlight<S> {
    fn settle(&mut self, outcome: FetchOutcome) {
        self.settled = true;
        self.shared.settle(self.generation, Some(outcome));
    }
}

impl<S: UsageSource + 'static> Drop for InFlight<S> {
    fn drop(&mut self) {
        if !self.settled {
            self.shared.settle(self.generation, None);
        }
    }
}

/// Owns the refresh lifecycle for one usage source.
///
/// `start`, `refresh` and `stop` spawn or abort Tokio tasks and must be called
/// from within a Tokio runtime.
pub struct UsagePoller<S: UsageSource + 'static> {
    shared: Arc<Shared<S>>,
    interval: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl<S: UsageSource + 'static> UsagePoller<S> {
    pub fn new(source: S) -> Self {
        Self::with_interval(source, DEFAULT_POLL_INTERVAL)
    }

    /// `interval` is clamped to between one millisecond and [`MAX_POLL_INTERVAL`].
    pub fn with_interval(source: S, interval: Duration) -> Self {
        let interval = interval.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                source,
                slot: Mutex::new(Slot::default()),
                events,
            }),
            interval,
            timer: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn timer(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetch now and then on every interval. No-op while already running.
    pub fn start(&self) {
        let mut timer = self.timer();
        if timer.is_some() {
            debug!("Usage poller already running");
            return;
        }

        info!(interval_secs = self.interval.as_secs(), "Starting usage poller");
        tokio::spawn(Shared::run_cycle(self.shared.begin(), FetchTrigger::Initial));

        let shared = Arc::clone(&self.shared);
        let period = self.interval;
        *timer = Some(tokio::spawn(async move {
            let now = Instant::now();
            let first_tick = now.checked_add(period).unwrap_or(now);
            let mut ticker = time::interval_at(first_tick, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                tokio::spawn(Shared::run_cycle(shared.begin(), FetchTrigger::Interval));
            }
        }));
    }

    /// Fetch out of band, leaving the interval schedule alone.
    ///
    /// The fetch is registered immediately; the returned future drives it and
    /// resolves once its result has been applied or discarded. It can be
    /// awaited or handed to `tokio::spawn`.
    pub fn refresh(&self) -> impl Future<Output = ()> + Send + 'static {
        Shared::run_cycle(self.shared.begin(), FetchTrigger::Manual)
    }

    /// Cancel the timer. Results of fetches still in flight are discarded.
    pub fn stop(&self) {
        let handle = self.timer().take();

        {
            let mut slot = self.shared.lock();
            slot.generation += 1;
            slot.in_flight = 0;
        }

        if let Some(handle) = handle {
            handle.abort();
            info!("Stopped usage poller");
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer().is_some()
    }

    /// Latest snapshot, availability and loading flag.
    pub fn current(&self) -> UsageState {
        let slot = self.shared.lock();
        UsageState {
            snapshot: slot.snapshot.clone(),
            availability: slot.availability,
            loading: slot.in_flight > 0,
        }
    }

    /// Receive an event every time the snapshot or availability changes.
    pub fn subscribe(&self) -> broadcast::Receiver<UsageEvent> {
        self.shared.events.subscribe()
    }
}

impl<S: UsageSource + 'static> Drop for UsagePoller<S> {
    fn drop(&mut self) {
        if let Some(handle) = self.timer().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UsageWindow;

    fn snapshot(five_hour: f64) -> UsageSnapshot {
        UsageSnapshot {
            five_hour: UsageWindow::new(five_hour, None),
            ..Default::default()
        }
    }

    #[test]
    fn test_phase_from_state() {
        let mut state = UsageState::default();
        assert_eq!(state.phase(), PollerPhase::Idle);

        state.loading = true;
        assert_eq!(state.phase(), PollerPhase::Loading);

        state.loading = false;
        state.availability = UsageAvailability::Unavailable;
        assert_eq!(state.phase(), PollerPhase::Unavailable);
    }

    #[test]
    fn test_apply_updated_emits_both_events() {
        let mut slot = Slot::default();
        let events = apply_outcome(&mut slot, FetchOutcome::Updated(snapshot(12.0)));

        assert_eq!(slot.availability, UsageAvailability::Available);
        assert_eq!(slot.snapshot, Some(snapshot(12.0)));
        assert_eq!(
            events,
            vec![
                UsageEvent::SnapshotUpdated(snapshot(12.0)),
                UsageEvent::AvailabilityChanged {
                    previous: UsageAvailability::Unknown,
                    current: UsageAvailability::Available,
                },
            ]
        );
    }

    #[test]
    fn test_apply_identical_snapshot_is_silent() {
        let mut slot = Slot::default();
        apply_outcome(&mut slot, FetchOutcome::Updated(snapshot(12.0)));

        let events = apply_outcome(&mut slot, FetchOutcome::Updated(snapshot(12.0)));
        assert!(events.is_empty());
        assert_eq!(slot.snapshot, Some(snapshot(12.0)));
    }

    #[test]
    fn test_apply_failure_preserves_snapshot() {
        let mut slot = Slot {
            snapshot: Some(snapshot(40.0)),
            availability: UsageAvailability::Available,
            ..Default::default()
        };

        let events = apply_outcome(
            &mut slot,
            FetchOutcome::Failed {
                status: 500,
                message: "internal".to_string(),
            },
        );
        assert!(events.is_empty());
        assert_eq!(slot.snapshot, Some(snapshot(40.0)));
        assert_eq!(slot.availability, UsageAvailability::Available);

        let events = apply_outcome(
            &mut slot,
            FetchOutcome::Transient {
                reason: "timeout".to_string(),
            },
        );
        assert!(events.is_empty());
        assert_eq!(slot.snapshot, Some(snapshot(40.0)));
    }

    #[test]
    fn test_apply_not_eligible_clears_snapshot() {
        let mut slot = Slot {
            snapshot: Some(snapshot(40.0)),
            availability: UsageAvailability::Available,
            ..Default::default()
        };

        let events = apply_outcome(&mut slot, FetchOutcome::NotEligible { status: Some(401) });
        assert!(slot.snapshot.is_none());
        assert_eq!(slot.availability, UsageAvailability::Unavailable);
        assert_eq!(
            events,
            vec![UsageEvent::AvailabilityChanged {
                previous: UsageAvailability::Available,
                current: UsageAvailability::Unavailable,
            }]
        );
    }
}
