//! Step report relay tests

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use deploy_api::{Receipt, StepReport, StepState};

use fastdeploy::deploy::relay::{deliver, forward_lines, DeliveryPolicy, ForwardSummary, StepSink};
use fastdeploy::errors::AppError;

/// Plays back scripted outcomes, then accepts everything
#[derive(Default)]
struct ScriptedSink {
    outcomes: Mutex<VecDeque<Result<(), AppError>>>,
    attempts: Mutex<usize>,
    delivered: Mutex<Vec<StepReport>>,
}

impl ScriptedSink {
    fn failing(failures: usize) -> Self {
        let sink = Self::default();
        for _ in 0..failures {
            sink.push(Err(AppError::ConnectionError("connection refused".to_string())));
        }
        sink
    }

    fn push(&self, outcome: Result<(), AppError>) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }

    fn delivered(&self) -> Vec<StepReport> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl StepSink for ScriptedSink {
    async fn send(&self, report: &StepReport) -> Result<Receipt, AppError> {
        *self.attempts.lock().unwrap() += 1;
        let outcome = self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(()));
        outcome?;
        self.delivered.lock().unwrap().push(report.clone());
        Ok(Receipt { received: true })
    }
}

fn policy() -> DeliveryPolicy {
    DeliveryPolicy {
        attempts: 3,
        delay: Duration::from_secs(3),
    }
}

/// A sleep function that records the requested delays instead of sleeping
fn recording_sleep() -> (
    Arc<Mutex<Vec<Duration>>>,
    impl Fn(Duration) -> std::future::Ready<()>,
) {
    let delays = Arc::new(Mutex::new(Vec::new()));
    let recorded = delays.clone();
    let sleep_fn = move |delay: Duration| {
        recorded.lock().unwrap().push(delay);
        std::future::ready(())
    };
    (delays, sleep_fn)
}

#[tokio::test]
async fn test_two_failures_then_success() {
    let sink = ScriptedSink::failing(2);
    let (delays, sleep_fn) = recording_sleep();
    let report = StepReport::new("build", StepState::Success);

    let delivered = deliver(&sink, &report, &policy(), &sleep_fn).await;

    assert!(delivered);
    assert_eq!(sink.attempts(), 3);
    assert_eq!(sink.delivered(), vec![report]);
    assert_eq!(*delays.lock().unwrap(), vec![Duration::from_secs(3); 2]);
}

#[tokio::test]
async fn test_three_failures_exhaust_attempts() {
    let sink = ScriptedSink::failing(3);
    let (delays, sleep_fn) = recording_sleep();

    let delivered = deliver(
        &sink,
        &StepReport::new("build", StepState::Success),
        &policy(),
        &sleep_fn,
    )
    .await;

    assert!(!delivered);
    assert_eq!(sink.attempts(), 3);
    assert!(sink.delivered().is_empty());
    // no sleep after the last attempt
    assert_eq!(delays.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_rejected_report_is_not_retried() {
    let sink = ScriptedSink::default();
    sink.push(Err(AppError::DeliveryRejected("401 Unauthorized".to_string())));
    let (delays, sleep_fn) = recording_sleep();

    let delivered = deliver(
        &sink,
        &StepReport::new("build", StepState::Success),
        &policy(),
        &sleep_fn,
    )
    .await;

    assert!(!delivered);
    assert_eq!(sink.attempts(), 1);
    assert!(delays.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_forward_lines_skips_malformed_output() {
    let output = concat!(
        "starting deploy\n",
        "{\"name\": \"build\", \"state\": \"success\"}\n",
        "\n",
        "{\"name\": \"broken\"\n",
        "{\"name\": \"deploy\", \"state\": \"bogus\"}\n",
        "{\"name\": \"deploy\", \"state\": \"failure\", \"message\": \"exit 1\"}",
    );
    let sink = ScriptedSink::default();
    let (_, sleep_fn) = recording_sleep();

    let summary = forward_lines(output.as_bytes(), &sink, &policy(), sleep_fn).await;

    assert_eq!(
        summary,
        ForwardSummary {
            forwarded: 2,
            skipped: 3,
            dropped: 0,
        }
    );
    let delivered = sink.delivered();
    assert_eq!(delivered[0].name, "build");
    assert_eq!(delivered[1].state, StepState::Failure);
    assert_eq!(delivered[1].message, "exit 1");
}

#[tokio::test]
async fn test_forward_lines_continues_after_dropped_report() {
    let output = concat!(
        "{\"name\": \"build\", \"state\": \"success\"}\n",
        "{\"name\": \"deploy\", \"state\": \"success\"}\n",
    );
    let sink = ScriptedSink::failing(3);
    let (_, sleep_fn) = recording_sleep();

    let summary = forward_lines(output.as_bytes(), &sink, &policy(), sleep_fn).await;

    assert_eq!(summary.dropped, 1);
    assert_eq!(summary.forwarded, 1);
    assert_eq!(sink.attempts(), 4);
    assert_eq!(sink.delivered()[0].name, "deploy");
}

#[tokio::test]
async fn test_forward_lines_tolerates_invalid_utf8() {
    let mut output = b"\xff\xfe garbage\n".to_vec();
    output.extend_from_slice(b"{\"name\": \"build\", \"state\": \"running\"}\n");
    let sink = ScriptedSink::default();
    let (_, sleep_fn) = recording_sleep();

    let summary = forward_lines(output.as_slice(), &sink, &policy(), sleep_fn).await;

    assert_eq!(summary.forwarded, 1);
    assert_eq!(summary.skipped, 1);
}
