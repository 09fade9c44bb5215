//! Usage Tracker Library
//!
//! Tracks a Claude subscription's rate-limit usage (the rolling five-hour
//! window and the weekly window) and summarizes per-session usage deltas.
//!
//! ## Core Features
//!
//! - **Normalization**: the usage API's payload becomes a stable
//!   [`UsageSnapshot`], with documented defaults for anything missing
//! - **Outcome classification**: transient network failures, ineligible
//!   accounts (401/403) and hard API errors are kept apart so a network blip
//!   never hides usage from an eligible user
//! - **Polling**: [`UsagePoller`] keeps the snapshot fresh on a fixed interval
//!   with manual refresh and typed change events
//! - **Aggregation**: [`aggregate`] turns session records into totals and a
//!   ranked top-10 list
//!
//! ## Architecture Overview
//!
//! - [`models`] - Usage windows, snapshots, session usage and summary stats
//! - [`normalizer`] - Raw payload to [`UsageSnapshot`]
//! - [`fetcher`] - Request building, transport seam, outcome classification
//! - [`poller`] - Refresh lifecycle and change notification
//! - [`aggregator`] - Session statistics and ranking
//! - [`credentials`] - Bearer token providers
//! - [`config`] - Configuration management with environment variable support
//! - [`logging`] - Structured logging with JSON and pretty-print formats
//! - [`display`] - Terminal output for the CLI
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use usage_tracker::credentials::CredentialsFile;
//! use usage_tracker::fetcher::{HttpTransport, UsageFetcher};
//! use usage_tracker::UsagePoller;
//!
//! # async fn example() {
//! let fetcher = UsageFetcher::new(HttpTransport::new(), Arc::new(CredentialsFile::default()));
//! let poller = UsagePoller::new(fetcher);
//! let mut events = poller.subscribe();
//!
//! poller.start();
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # }
//! ```

pub mod aggregator;
pub mod config;
pub mod credentials;
pub mod display;
pub mod error;
pub mod fetcher;
pub mod logging;
pub mod models;
pub mod normalizer;
pub mod poller;

pub use aggregator::{aggregate, aggregate_with_limit, UsageSession, TOP_SESSIONS_LIMIT};
pub use error::UsageError;
pub use fetcher::{FetchOutcome, UsageFetcher, UsageSource, UsageTransport};
pub use models::*;
pub use normalizer::normalize_usage;
pub use poller::{UsageEvent, UsagePoller, UsageState};
