use adu_agent::engine::backoff::{connect_with_backoff, BackoffPolicy, ConnectError};
use std::cell::RefCell;
use std::time::Duration;
use tokio::time::Instant;

fn attempt_times(policy: &BackoffPolicy) -> (Result<(), ConnectError>, Vec<Instant>) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap();

    runtime.block_on(async {
        let times = RefCell::new(Vec::new());
        let result = connect_with_backoff(
            |_attempt| {
                times.borrow_mut().push(Instant::now());
                async { Err::<(), _>("connection refused") }
            },
            policy,
        )
        .await;
        (result, times.into_inner())
    })
}

#[test]
fn test_retries_exhausted_after_max_attempts() {
    let policy = BackoffPolicy {
        base_delay_ms: 100,
        max_delay_ms: 10_000,
        max_attempts: 3,
    };
    let (result, times) = attempt_times(&policy);

    assert_eq!(
        result,
        Err(ConnectError::RetriesExhausted {
            attempts: 3,
            last_error: "connection refused".to_string(),
        })
    );
    assert_eq!(times.len(), 3);

    let delays: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    assert!(delays[0] >= Duration::from_millis(50) && delays[0] < Duration::from_millis(100));
    assert!(delays[1] >= Duration::from_millis(100) && delays[1] < Duration::from_millis(200));
    assert!(delays[0] < delays[1]);
}

#[test]
fn test_delays_capped_at_max() {
    let policy = BackoffPolicy {
        base_delay_ms: 100,
        max_delay_ms: 300,
        max_attempts: 8,
    };
    let (result, times) = attempt_times(&policy);

    assert!(matches!(result, Err(ConnectError::RetriesExhausted { attempts: 8, .. })));
    let delays: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(delays.len(), 7);
    for pair in delays[..2].windows(2) {
        assert!(pair[0] < pair[1], "{delays:?}");
    }
    assert!(delays.iter().all(|d| *d < Duration::from_millis(300)), "{delays:?}");
}

#[test]
fn test_single_attempt_policy() {
    let policy = BackoffPolicy {
        base_delay_ms: 100,
        max_delay_ms: 1000,
        max_attempts: 1,
    };
    let (result, times) = attempt_times(&policy);
    assert!(matches!(result, Err(ConnectError::RetriesExhausted { attempts: 1, .. })));
    assert_eq!(times.len(), 1);
}
