// Unit tests for retry module

use super::*;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicU32, Ordering};

fn policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1000),
        max_delay: Duration::from_millis(5000),
        jitter: false,
        non_retryable: Vec::new(),
    }
}

#[test]
fn test_exponential_delay_for_network_and_rate_limit() {
    let p = policy();
    assert_eq!(p.delay_for(ErrorCategory::Network, 1), Duration::from_millis(1000));
    assert_eq!(p.delay_for(ErrorCategory::Network, 2), Duration::from_millis(2000));
    assert_eq!(p.delay_for(ErrorCategory::RateLimit, 3), Duration::from_millis(4000));
    // Capped
    assert_eq!(p.delay_for(ErrorCategory::Network, 6), Duration::from_millis(5000));
}

#[test]
fn test_linear_delay_for_other_categories() {
    let p = policy();
    assert_eq!(p.delay_for(ErrorCategory::Browser, 1), Duration::from_millis(1000));
    assert_eq!(p.delay_for(ErrorCategory::Browser, 2), Duration::from_millis(2000));
    assert_eq!(p.delay_for(ErrorCategory::Unknown, 3), Duration::from_millis(3000));
}

#[test]
fn test_jitter_stays_within_ten_percent() {
    let p = RetryPolicy {
        jitter: true,
        ..policy()
    };
    for _ in 0..50 {
        let delay = p.delay_for(ErrorCategory::Timeout, 2).as_millis();
        assert!((1800..=2200).contains(&delay), "delay {delay}");
    }
}

#[test]
fn test_should_retry() {
    let p = policy();
    let browser = ScrapeError::Browser("chromedriver crashed".into());
    assert!(p.should_retry(&browser, 1));
    assert!(p.should_retry(&browser, 2));
    assert!(!p.should_retry(&browser, 3));

    let limited = ScrapeError::Analysis {
        category: ErrorCategory::RateLimit,
        message: "429".into(),
    };
    assert!(!p.should_retry(&limited, 1));
    assert!(!p.should_retry(&ScrapeError::Cancelled, 1));

    let strict = policy().with_non_retryable(&[ErrorCategory::Browser]);
    assert!(!strict.should_retry(&browser, 1));
}

#[test]
fn test_from_config_never_allows_zero_attempts() {
    let p = RetryPolicy::from_config(&RetryConfig {
        max_attempts: 0,
        base_delay: 10,
        max_delay: 20,
    });
    assert_eq!(p.max_attempts, 1);
    assert_eq!(p.base_delay, Duration::from_millis(10));
}

#[tokio::test(start_paused = true)]
async fn test_run_stops_after_max_attempts() {
    let calls = AtomicU32::new(0);
    let mut retries = Vec::new();
    let (result, attempts) = policy()
        .run(
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ScrapeError::Timeout("navigation".into())) }
            },
            |attempt, delay, category| retries.push((attempt, delay, category)),
        )
        .await;

    assert!(matches!(result, Err(ScrapeError::Timeout(_))));
    assert_eq!(attempts, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        retries,
        vec![
            (1, Duration::from_millis(1000), ErrorCategory::Timeout),
            (2, Duration::from_millis(2000), ErrorCategory::Timeout),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_run_non_retryable_makes_one_attempt() {
    let (result, attempts) = policy()
        .run(
            |_| async {
                Err::<(), _>(ScrapeError::Analysis {
                    category: ErrorCategory::RateLimit,
                    message: "too many requests".into(),
                })
            },
            |_, _, _| panic!("must not retry"),
        )
        .await;
    assert!(result.is_err());
    assert_eq!(attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_recovers() {
    let (result, attempts) = policy()
        .run(
            |attempt| async move {
                if attempt < 2 {
                    Err(ScrapeError::Browser("session not created".into()))
                } else {
                    Ok(attempt)
                }
            },
            |_, _, _| {},
        )
        .await;
    assert_eq!(result.unwrap(), 2);
    assert_eq!(attempts, 2);
}
