use std::time::Duration;

use ieeg_bids_downloader::fetcher::retry_formatter::{RetryContext, RetryErrorType};
use ieeg_bids_downloader::remote::SessionError;

fn sample_context(error: SessionError) -> RetryContext {
    RetryContext::new(
        2,
        3,
        &error,
        Duration::from_secs(5),
        "HUP101_phaseII",
        Some((600_000_000, 600_000_000)),
        "get_data",
    )
}

#[test]
fn format_retry_captures_attempt_and_wait() {
    let ctx = sample_context(SessionError::Service("503 Service Unavailable".into()));
    let message = ctx.format_retry();
    assert!(message.contains("Retrying get_data (attempt 2/3)"));
    assert!(message.contains("service error"));
    assert!(message.contains("5.0 seconds"));
    assert!(message.contains("HUP101_phaseII"));
    assert!(message.contains("600.000s to 1200.000s"));
}

#[test]
fn format_success_includes_dataset() {
    let ctx = sample_context(SessionError::Timeout(Duration::from_secs(60)));
    let message = ctx.format_success();
    assert!(message.contains("get_data succeeded on attempt 2/3"));
    assert!(message.contains("HUP101_phaseII"));
}

#[test]
fn format_failure_lists_suggestion() {
    let ctx = sample_context(SessionError::Timeout(Duration::from_secs(60)));
    let output = ctx.format_failure();
    assert!(output.contains("[FAILED] get_data failed after 2 attempt(s)"));
    assert!(output.contains("Window: 600.000s to 1200.000s"));
    assert!(output.contains("--timeout-secs"));
}

#[test]
fn error_types_follow_session_errors() {
    assert_eq!(
        RetryErrorType::from(&SessionError::Connection("reset".into())),
        RetryErrorType::ConnectionFailed
    );
    assert_eq!(
        RetryErrorType::from(&SessionError::Rejected("401".into())),
        RetryErrorType::Rejected
    );
    assert_eq!(
        RetryErrorType::from(&SessionError::MalformedResponse("eof".into())).description(),
        "malformed response"
    );
}
