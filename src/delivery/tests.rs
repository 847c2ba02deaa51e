use super::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tokio::time::Instant;

/// Transport that fails a fixed number of times before succeeding.
struct FlakyTransport {
    failures: u32,
    calls: AtomicU32,
    attempted_at: Mutex<Vec<Instant>>,
}

impl FlakyTransport {
    fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
            attempted_at: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn gaps(&self) -> Vec<Duration> {
        let times = self.attempted_at.lock().unwrap();
        times.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

#[async_trait]
impl Transport for FlakyTransport {
    async fn send(&self, _queue: &str, _payload: &[u8]) -> Result<()> {
        self.attempted_at.lock().unwrap().push(Instant::now());
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            anyhow::bail!("broker unavailable (call {})", call + 1);
        }
        Ok(())
    }
}

#[test]
fn test_backoff_is_linear() {
    let policy = RetryPolicy::default();
    let delays: Vec<Duration> = policy.backoff().collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_millis(200),
            Duration::from_millis(400),
            Duration::from_millis(600),
        ]
    );
}

#[test]
fn test_backoff_counts_attempts() {
    let mut backoff = RetryPolicy {
        max_retries: 1,
        step: Duration::from_millis(10),
    }
    .backoff();

    assert_eq!(backoff.attempts(), 0);
    assert_eq!(backoff.next_delay(), Some(Duration::from_millis(10)));
    assert_eq!(backoff.attempts(), 1);
    assert_eq!(backoff.next_delay(), None);
    assert_eq!(backoff.attempts(), 2);
}

#[test]
fn test_zero_retries_has_no_delays() {
    let policy = RetryPolicy {
        max_retries: 0,
        step: Duration::from_millis(200),
    };
    assert_eq!(policy.backoff().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_first_attempt_succeeds() {
    let transport = FlakyTransport::new(0);
    let attempts = publish_with_retry(&transport, "q", b"{}", RetryPolicy::default())
        .await
        .unwrap();

    assert_eq!(attempts, 1);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_recovers_after_transient_failures() {
    let policy = RetryPolicy::default();

    for failures in 1..=policy.max_retries {
        let transport = FlakyTransport::new(failures);
        let attempts = publish_with_retry(&transport, "q", b"{}", policy)
            .await
            .unwrap();

        assert_eq!(attempts, failures + 1);
        assert_eq!(transport.calls(), failures + 1);

        let gaps = transport.gaps();
        assert_eq!(gaps.len() as u32, failures);
        for pair in gaps.windows(2) {
            assert!(pair[1] > pair[0], "waits must grow: {:?}", gaps);
        }
        assert!(gaps[0] >= Duration::from_millis(200));
    }
}

#[tokio::test(start_paused = true)]
async fn test_exhausts_retries() {
    let transport = FlakyTransport::new(u32::MAX);
    let policy = RetryPolicy::default();

    let err = publish_with_retry(&transport, "telemetry", b"{}", policy)
        .await
        .unwrap_err();

    assert_eq!(transport.calls(), policy.max_retries + 1);
    match &err {
        DeliveryError::RetriesExhausted {
            queue,
            attempts,
            last_error,
        } => {
            assert_eq!(queue, "telemetry");
            assert_eq!(*attempts, policy.max_retries + 1);
            assert!(last_error.contains("broker unavailable"));
        }
    }
    assert!(err.to_string().contains("retries exhausted"));
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_waits_full_schedule() {
    let transport = FlakyTransport::new(u32::MAX);
    let start = Instant::now();

    let _ = publish_with_retry(&transport, "q", b"{}", RetryPolicy::default()).await;

    // 200 + 400 + 600 ms of backoff, no wait after the final attempt
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(1200), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(1300), "{:?}", elapsed);
}
