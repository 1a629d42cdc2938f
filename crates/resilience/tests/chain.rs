//! Step runner: ordering, optional steps, metadata, retries, timeouts and logs.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use faultline_error::{Cancelled, DeadlineExceeded, Error, chain};
use faultline_resilience::{CancellationToken, Chain, RetryOption};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

type Journal = Arc<Mutex<Vec<u32>>>;

fn record(
    journal: &Journal,
    id: u32,
) -> impl FnMut() -> std::future::Ready<Result<(), Error>> + Send + 'static {
    let journal = Arc::clone(journal);
    move || {
        journal.lock().push(id);
        std::future::ready(Ok(()))
    }
}

fn fail(
    journal: &Journal,
    id: u32,
    message: &'static str,
) -> impl FnMut() -> std::future::Ready<Result<(), io::Error>> + Send + 'static {
    let journal = Arc::clone(journal);
    move || {
        journal.lock().push(id);
        std::future::ready(Err(io::Error::other(message)))
    }
}

fn executed(journal: &Journal) -> Vec<u32> {
    journal.lock().clone()
}

// =============================================================================
// Run
// =============================================================================

#[tokio::test]
async fn runs_steps_in_order() {
    let journal = Journal::default();
    let mut chain = Chain::new()
        .step(record(&journal, 1))
        .step(record(&journal, 2))
        .step(record(&journal, 3));

    chain.run().await.unwrap();

    assert_eq!(executed(&journal), vec![1, 2, 3]);
    assert!(!chain.has_errors());
    assert_eq!(chain.len(), 3);
}

#[tokio::test]
async fn failing_step_stops_the_chain() {
    let journal = Journal::default();
    let mut chain = Chain::new()
        .step(record(&journal, 1))
        .step(fail(&journal, 2, "test error"))
        .step(record(&journal, 3));

    let err = chain.run().await.unwrap_err();

    assert_eq!(executed(&journal), vec![1, 2]);
    assert_eq!(err.to_string(), "test error");
    assert!(err.has_stack());
    assert!(chain::is(&err, &io::Error::other("test error")));
    assert!(chain::as_type::<io::Error>(&err).is_some());
    assert_eq!(chain.errors().len(), 1);
    assert_eq!(chain.last_error().map(Error::message), Some(err.message()));
}

#[tokio::test]
async fn optional_failure_is_recorded_not_returned() {
    let journal = Journal::default();
    let mut chain = Chain::new()
        .step(record(&journal, 1))
        .step(fail(&journal, 2, "optional broke"))
        .optional()
        .step(record(&journal, 3));

    chain.run().await.unwrap();

    assert_eq!(executed(&journal), vec![1, 2, 3]);
    assert!(chain.has_errors());
    assert_eq!(chain.errors()[0].to_string(), "optional broke");
}

#[tokio::test]
async fn step_metadata_lands_on_the_error() {
    let journal = Journal::default();
    let mut chain = Chain::new()
        .step(fail(&journal, 1, "db down"))
        .with("table", "users")
        .with("shard", 3)
        .tag("database")
        .code(503);

    let err = chain.run().await.unwrap_err();

    assert_eq!(err.category(), "database");
    assert_eq!(err.code(), 503);
    assert_eq!(chain::code(&err), 503);
    assert_eq!(
        err.context_value("table"),
        Some(serde_json::Value::from("users"))
    );
    assert_eq!(err.context_value("shard"), Some(serde_json::Value::from(3)));
}

#[tokio::test]
async fn without_auto_wrap_the_raw_error_comes_back() {
    let journal = Journal::default();
    let mut chain = Chain::new()
        .with_auto_wrap(false)
        .step(fail(&journal, 1, "raw"))
        .tag("ignored")
        .code(500);

    let err = chain.run().await.unwrap_err();

    assert_eq!(err.to_string(), "raw");
    assert!(!err.has_stack());
    assert_eq!(err.code(), 0);
    assert_eq!(err.category(), "");
}

#[tokio::test]
async fn custom_errors_keep_their_identity() {
    let mut chain = Chain::new().step(|| async {
        Err::<(), _>(Error::named("ValidationError").with_code(422))
    });

    let err = chain.run().await.unwrap_err();

    assert_eq!(err.name(), "ValidationError");
    assert_eq!(err.code(), 422);
    assert!(chain::is(&err, &Error::named("ValidationError")));
}

// =============================================================================
// Retries and timeouts
// =============================================================================

#[tokio::test]
async fn retry_recovers_a_flaky_step() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let mut chain = Chain::new()
        .step(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(Error::new("transient"))
                } else {
                    Ok(())
                }
            }
        })
        .retry(3, Duration::from_millis(5), []);

    chain.run().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retry_options_can_narrow_the_predicate() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let mut chain = Chain::new()
        .step(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(Error::new("permanent")) }
        })
        .retry(
            5,
            Duration::from_millis(1),
            [RetryOption::RetryIf(Arc::new(|e: &Error| e.is_retryable()))],
        );

    assert!(chain.run().await.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retry_options_observer_runs_alongside_logging() {
    let observed = Arc::new(AtomicU32::new(0));
    let seen = Arc::clone(&observed);
    let mut chain = Chain::new()
        .step(|| async { Err::<(), _>(Error::new("boom")) })
        .retry(
            3,
            Duration::from_millis(1),
            [RetryOption::OnRetry(Arc::new(move |_: u32, _: &Error| {
                seen.fetch_add(1, Ordering::SeqCst);
            }))],
        );

    assert!(chain.run().await.is_err());
    assert_eq!(observed.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn unbounded_chain_timeout_means_no_deadline() {
    let journal = Journal::default();
    let mut chain = Chain::new()
        .with_timeout(Duration::MAX)
        .step(record(&journal, 1))
        .step(fail(&journal, 2, "late"))
        .optional();

    chain.run().await.unwrap();
    assert!(chain.run_all().await.is_some());
    assert_eq!(executed(&journal), vec![1, 2, 1, 2]);
}

#[tokio::test]
async fn chain_timeout_aborts_the_running_step() {
    let journal = Journal::default();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let mut chain = Chain::new()
        .with_timeout(Duration::from_millis(10))
        .step(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Err::<(), _>(Error::new("too slow"))
            }
        })
        .retry(3, Duration::from_millis(5), [])
        .step(record(&journal, 2));

    let err = chain.run().await.unwrap_err();

    assert!(chain::is(&err, &DeadlineExceeded));
    assert!(chain::is_timeout(&err));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(executed(&journal).is_empty());
}

#[tokio::test]
async fn step_timeout_fails_the_step() {
    let mut chain = Chain::new()
        .step(|| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, Error>(())
        })
        .timeout(Duration::from_millis(10));

    let err = chain.run().await.unwrap_err();

    assert!(err.is_timeout() || chain::is_timeout(&err));
    assert!(chain::is(&err, &DeadlineExceeded));
    assert!(err.has_stack());
}

#[tokio::test]
async fn cancellation_aborts_the_chain() {
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        canceller.cancel();
    });

    let journal = Journal::default();
    let mut chain = Chain::new()
        .with_cancellation(token)
        .step(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, Error>(())
        })
        .optional()
        .step(record(&journal, 2));

    let err = chain.run().await.unwrap_err();

    assert!(chain::is(&err, &Cancelled));
    assert!(executed(&journal).is_empty());
}

// =============================================================================
// RunAll
// =============================================================================

#[tokio::test]
async fn run_all_collects_every_failure() {
    let journal = Journal::default();
    let mut chain = Chain::new()
        .step(fail(&journal, 1, "first"))
        .step(record(&journal, 2))
        .step(fail(&journal, 3, "third"));

    let errors = chain.run_all().await.unwrap();

    assert_eq!(executed(&journal), vec![1, 2, 3]);
    assert_eq!(errors.count(), 2);
    assert_eq!(errors.to_string(), "errors(2): first; third");
}

#[tokio::test]
async fn run_all_respects_max_errors() {
    let journal = Journal::default();
    let mut chain = Chain::new()
        .with_max_errors(2)
        .step(fail(&journal, 1, "one"))
        .step(fail(&journal, 2, "two"))
        .step(fail(&journal, 3, "three"));

    let errors = chain.run_all().await.unwrap();

    assert_eq!(errors.count(), 2);
    assert_eq!(executed(&journal), vec![1, 2]);
}

#[tokio::test]
async fn run_all_without_failures_is_none() {
    let journal = Journal::default();
    let mut chain = Chain::new()
        .step(record(&journal, 1))
        .step(record(&journal, 2));

    assert!(chain.run_all().await.is_none());
    assert!(!chain.has_errors());
}

#[tokio::test]
async fn reset_clears_steps_and_errors() {
    let journal = Journal::default();
    let mut chain = Chain::new().step(fail(&journal, 1, "x"));
    let _ = chain.run().await;
    assert!(chain.has_errors());

    chain.reset();
    assert!(chain.is_empty());
    assert!(!chain.has_errors());
    assert!(chain.last_error().is_none());
    assert!(chain.run().await.is_ok());
}

// =============================================================================
// Logging
// =============================================================================

mod logs {
    use super::*;

    use std::io::Write;

    use pretty_assertions::assert_eq;

    use tracing::subscriber::DefaultGuard;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Capture {
        fn install(&self) -> DefaultGuard {
            let sink = self.clone();
            let subscriber = tracing_subscriber::fmt()
                .with_writer(move || sink.clone())
                .with_ansi(false)
                .with_max_level(tracing::Level::WARN)
                .finish();
            tracing::subscriber::set_default(subscriber)
        }

        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn step_retries_are_logged() {
        let capture = Capture::default();
        let _guard = capture.install();

        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let mut chain = Chain::new()
            .step(move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(Error::new("flaky"))
                    } else {
                        Ok(())
                    }
                }
            })
            .retry(3, Duration::from_millis(1), []);

        chain.run().await.unwrap();

        let text = capture.text();
        assert!(text.contains("Retrying step (attempt 1/3)"), "{text}");
        assert!(text.contains("attempt=1 max_attempts=3"), "{text}");
        assert!(text.contains("Retrying step (attempt 2/3)"), "{text}");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn stopping_failure_is_logged_with_metadata() {
        let capture = Capture::default();
        let _guard = capture.install();

        let journal = Journal::default();
        let mut chain = Chain::new()
            .step(fail(&journal, 1, "test error"))
            .with("key", "value")
            .tag("test_cat")
            .code(500)
            .log_on_fail();

        let _ = chain.run().await;

        let text = capture.text();
        assert!(text.contains("Chain stopped due to error in step"), "{text}");
        assert!(text.contains("error=test error"), "{text}");
        assert!(text.contains("category=test_cat"), "{text}");
        assert!(text.contains("code=500"), "{text}");
        assert!(text.contains("context=key=value"), "{text}");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn optional_failure_is_logged_when_asked() {
        let capture = Capture::default();
        let _guard = capture.install();

        let journal = Journal::default();
        let mut chain = Chain::new()
            .step(fail(&journal, 1, "soft failure"))
            .optional()
            .log_on_fail();

        chain.run().await.unwrap();

        let text = capture.text();
        assert!(text.contains("Optional step failed"), "{text}");
        assert!(text.contains("soft failure"), "{text}");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn silent_optional_failure_logs_nothing() {
        let capture = Capture::default();
        let _guard = capture.install();

        let journal = Journal::default();
        let mut chain = Chain::new()
            .step(fail(&journal, 1, "quiet"))
            .optional();

        chain.run().await.unwrap();

        assert_eq!(capture.text(), "");
    }
}
