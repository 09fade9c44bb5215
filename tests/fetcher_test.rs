//! Fetcher classification tests against a scripted transport

mod common;

use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use common::*;
use usage_tracker::credentials::{CredentialsFile, EnvToken, StaticToken};
use usage_tracker::error::UsageError;
use usage_tracker::fetcher::{
    ApiSettings, FetchOutcome, TransportResponse, UsageFetcher, ANTHROPIC_BETA_VALUE,
    CLAUDE_CODE_USER_AGENT, USAGE_API_URL,
};
use usage_tracker::models::{UsageAvailability, UsageWindow};
use usage_tracker::poller::UsagePoller;

fn fetcher(transport: &Arc<ScriptedTransport>) -> UsageFetcher<Arc<ScriptedTransport>> {
    UsageFetcher::new(Arc::clone(transport), Arc::new(StaticToken::new("sk-ant-oat-test")))
}

const FULL_BODY: &str = r#"{
    "five_hour": {"utilization": 42.0, "resets_at": "2025-08-01T18:00:00+00:00"},
    "seven_day": {"utilization": 13.5, "resets_at": "2025-08-05T09:00:00+00:00"},
    "seven_day_opus": null
}"#;

#[tokio::test]
async fn test_success_is_normalized() {
    let transport = Arc::new(ScriptedTransport::responding(200, FULL_BODY));
    let outcome = fetcher(&transport).fetch().await;

    let FetchOutcome::Updated(snapshot) = outcome else {
        panic!("expected a snapshot, got {outcome:?}");
    };
    assert_eq!(
        snapshot.five_hour,
        UsageWindow::new(42.0, Some("2025-08-01T18:00:00+00:00".to_string()))
    );
    assert_eq!(snapshot.seven_day.utilization, 13.5);
    assert!(snapshot.seven_day_opus.is_none());
}

#[tokio::test]
async fn test_request_carries_fixed_headers() {
    let transport = Arc::new(ScriptedTransport::responding(200, "{}"));
    fetcher(&transport).fetch().await;

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.url, USAGE_API_URL);
    assert_eq!(request.header("Accept"), Some("application/json"));
    assert_eq!(request.header("Content-Type"), Some("application/json"));
    assert_eq!(request.header("Authorization"), Some("Bearer sk-ant-oat-test"));
    assert_eq!(request.header("anthropic-beta"), Some(ANTHROPIC_BETA_VALUE));
    assert_eq!(request.header("User-Agent"), Some(CLAUDE_CODE_USER_AGENT));
}

#[tokio::test]
async fn test_custom_settings_are_used() {
    let transport = Arc::new(ScriptedTransport::responding(200, "{}"));
    let settings = ApiSettings {
        endpoint: "http://127.0.0.1:8080/usage".to_string(),
        timeout: Duration::from_secs(5),
        ..ApiSettings::default()
    };
    let fetcher = UsageFetcher::with_settings(
        Arc::clone(&transport),
        Arc::new(StaticToken::new("tok")),
        settings,
    );

    fetcher.fetch().await;
    let request = &transport.requests()[0];
    assert_eq!(request.url, "http://127.0.0.1:8080/usage");
    assert_eq!(request.timeout, Duration::from_secs(5));
}

#[tokio::test]
async fn test_unauthorized_and_forbidden_are_not_eligible() {
    for status in [401, 403] {
        let transport = Arc::new(ScriptedTransport::responding(status, r#"{"error":"nope"}"#));
        let outcome = fetcher(&transport).fetch().await;
        assert_eq!(outcome, FetchOutcome::NotEligible { status: Some(status) });
        assert_eq!(
            UsageAvailability::from_outcome(UsageAvailability::Available, &outcome),
            UsageAvailability::Unavailable
        );
    }
}

#[tokio::test]
async fn test_server_error_is_failed() {
    let transport = Arc::new(ScriptedTransport::responding(500, "upstream exploded"));
    let outcome = fetcher(&transport).fetch().await;

    assert_eq!(
        outcome,
        FetchOutcome::Failed {
            status: 500,
            message: "upstream exploded".to_string(),
        }
    );
    assert!(outcome.is_no_change());
}

#[tokio::test]
async fn test_transport_failures_are_transient() {
    let errors = vec![
        UsageError::Transport("dns error".to_string()),
        UsageError::Timeout(30),
    ];

    for error in errors {
        let transport = Arc::new(ScriptedTransport::failing(error));
        let outcome = fetcher(&transport).fetch().await;
        assert!(matches!(outcome, FetchOutcome::Transient { .. }), "{outcome:?}");
    }
}

#[tokio::test]
async fn test_malformed_json_is_transient() {
    let transport = Arc::new(ScriptedTransport::responding(200, "<html>gateway</html>"));
    let outcome = fetcher(&transport).fetch().await;
    assert!(matches!(outcome, FetchOutcome::Transient { .. }));
}

#[tokio::test]
async fn test_missing_credential_skips_request() {
    let transport = Arc::new(ScriptedTransport::responding(200, FULL_BODY));
    let fetcher = UsageFetcher::new(
        Arc::clone(&transport),
        Arc::new(EnvToken::new("USAGE_TRACKER_TEST_NEVER_SET")),
    );

    let outcome = fetcher.fetch().await;
    assert_eq!(outcome, FetchOutcome::NotEligible { status: None });
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn test_server_error_preserves_snapshot_through_poller() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        Ok(TransportResponse::new(200, FULL_BODY)),
        Ok(TransportResponse::new(500, "oops")),
    ]));
    let poller = UsagePoller::new(fetcher(&transport));

    poller.refresh().await;
    let before = poller.current();
    assert_eq!(before.availability, UsageAvailability::Available);

    poller.refresh().await;
    assert_eq!(poller.current(), before);
    assert_eq!(transport.requests().len(), 2);
}

#[tokio::test]
async fn test_missing_credentials_file_is_not_eligible() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(ScriptedTransport::responding(200, FULL_BODY));
    let fetcher = UsageFetcher::new(
        Arc::clone(&transport),
        Arc::new(CredentialsFile::new(dir.path().join(".credentials.json"))),
    );

    assert_eq!(fetcher.fetch().await, FetchOutcome::NotEligible { status: None });
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn test_unreadable_credentials_keep_user_available() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(".credentials.json");
    fs::write(&path, r#"{"claudeAiOauth":{"accessToken":"from-file"}}"#).unwrap();

    let transport = Arc::new(ScriptedTransport::new(vec![
        Ok(TransportResponse::new(200, FULL_BODY)),
        Ok(TransportResponse::new(200, FULL_BODY)),
    ]));
    let poller = UsagePoller::new(UsageFetcher::new(
        Arc::clone(&transport),
        Arc::new(CredentialsFile::new(&path)),
    ));

    poller.refresh().await;
    let before = poller.current();
    assert_eq!(before.availability, UsageAvailability::Available);
    assert_eq!(before.snapshot.as_ref().map(|s| s.five_hour.utilization), Some(42.0));

    // Caught mid-rewrite during a token refresh
    fs::write(&path, r#"{"claudeAiOa"#).unwrap();
    poller.refresh().await;

    assert_eq!(poller.current(), before);
    assert_eq!(transport.requests().len(), 1);
}
