//! Terminal output for the CLI
//!
//! Human-readable colored output, or pretty JSON when `json_output` is set.
//! Progress bars and reset-time formatting belong to richer frontends; this
//! module only prints the numbers.

use chrono::Utc;
use colored::Colorize;
use serde::Serialize;

use crate::fetcher::FetchOutcome;
use crate::models::{AggregateStats, UsageAvailability, UsageSnapshot, UsageWindow};
use crate::poller::{UsageEvent, UsageState};

pub struct DisplayManager {
    json_output: bool,
}

impl DisplayManager {
    pub fn new(json_output: bool) -> Self {
        Self { json_output }
    }

    pub fn display_outcome(&self, outcome: &FetchOutcome) {
        if self.json_output {
            let output = match outcome {
                FetchOutcome::Updated(snapshot) => {
                    serde_json::json!({"status": "available", "usage": snapshot})
                }
                FetchOutcome::NotEligible { status } => {
                    serde_json::json!({"status": "unavailable", "httpStatus": status})
                }
                FetchOutcome::Transient { reason } => {
                    serde_json::json!({"status": "unchanged", "reason": reason})
                }
                FetchOutcome::Failed { status, message } => {
                    serde_json::json!({"status": "error", "httpStatus": status, "message": message})
                }
            };
            print_json(&output);
            return;
        }

        match outcome {
            FetchOutcome::Updated(snapshot) => self.print_snapshot(snapshot),
            FetchOutcome::NotEligible { .. } => println!(
                "{} {}",
                "ℹ".bright_blue(),
                "Usage data is not available for this account (subscription login required)"
                    .bright_white()
            ),
            FetchOutcome::Transient { reason } => println!(
                "{} Could not reach the usage API: {}",
                "⚠".bright_yellow(),
                reason
            ),
            FetchOutcome::Failed { status, .. } => println!(
                "{} Usage API returned HTTP {}",
                "✗".bright_red(),
                status.to_string().bright_red().bold()
            ),
        }
    }

    pub fn display_state(&self, state: &UsageState) {
        if self.json_output {
            print_json(state);
            return;
        }

        match (&state.availability, &state.snapshot) {
            (UsageAvailability::Available, Some(snapshot)) => self.print_snapshot(snapshot),
            (UsageAvailability::Unavailable, _) => println!(
                "{} {}",
                "ℹ".bright_blue(),
                "Usage data is not available for this account".bright_white()
            ),
            _ => println!("{} Waiting for usage data...", "…".bright_black()),
        }
    }

    pub fn display_event(&self, event: &UsageEvent) {
        match event {
            UsageEvent::SnapshotUpdated(snapshot) => {
                if self.json_output {
                    print_json(&serde_json::json!({"event": "snapshotUpdated", "usage": snapshot}));
                } else {
                    self.print_snapshot(snapshot);
                }
            }
            UsageEvent::AvailabilityChanged { previous, current } => {
                if self.json_output {
                    print_json(&serde_json::json!({
                        "event": "availabilityChanged",
                        "previous": previous,
                        "current": current
                    }));
                } else {
                    println!(
                        "{} availability: {:?} → {}",
                        "↻".bright_cyan(),
                        previous,
                        format!("{current:?}").bright_white().bold()
                    );
                }
            }
        }
    }

    pub fn display_stats(&self, stats: &AggregateStats) {
        if self.json_output {
            print_json(stats);
            return;
        }

        println!("\n{}", "=".repeat(60).bright_cyan());
        println!("{}", "Session Usage Summary".bright_white().bold());
        println!("{}", "=".repeat(60).bright_cyan());

        println!(
            "\n{} {} sessions • {} with usage • {} tokens",
            "📊".bright_yellow(),
            stats.total_sessions.to_string().bright_white().bold(),
            stats.sessions_with_usage.to_string().bright_white().bold(),
            stats.total_tokens.to_string().bright_green().bold()
        );
        println!(
            "   5-hour window: {}   7-day window: {}",
            format!("{:.1}%", stats.total_five_hour_delta).bright_yellow(),
            format!("{:.1}%", stats.total_seven_day_delta).bright_yellow()
        );

        if !stats.top_sessions.is_empty() {
            println!("\n{} Top sessions by 5-hour impact:", "🏁".bright_blue());
            for (rank, id) in stats.top_sessions.iter().enumerate() {
                println!("   {:>2}. {}", rank + 1, id.bright_cyan());
            }
        }
        println!();
    }

    fn print_snapshot(&self, snapshot: &UsageSnapshot) {
        println!("{}", "[ SUBSCRIPTION USAGE ]".bright_white().bold());
        print_window("5-hour", &snapshot.five_hour);
        print_window("7-day", &snapshot.seven_day);
        if let Some(opus) = &snapshot.seven_day_opus {
            print_window("7-day Opus", opus);
        }
    }
}

fn print_window(label: &str, window: &UsageWindow) {
    let pct = format!("{:.0}%", window.utilization);
    let pct = if window.utilization >= 90.0 {
        pct.bright_red().bold()
    } else if window.utilization >= 70.0 {
        pct.bright_yellow().bold()
    } else {
        pct.bright_green().bold()
    };

    let reset = match window.time_until_reset(Utc::now()) {
        Some(left) if left.num_minutes() <= 0 => "resets now".to_string(),
        Some(left) => format!("resets in {}h {}m", left.num_hours(), left.num_minutes() % 60),
        None => String::new(),
    };

    println!("   {:<11} {:>5}  {}", label, pct, reset.bright_black());
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json_str) => println!("{}", json_str),
        Err(e) => eprintln!("Error serializing output to JSON: {}", e),
    }
}
