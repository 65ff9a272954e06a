//! End-to-end governor scenarios on a paused clock.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use backoff_governor::{BackoffGovernor, Category, GovernorConfig};

#[tokio::test(start_paused = true)]
async fn three_generic_errors_back_to_back() {
    let governor = BackoffGovernor::default();
    let start = Instant::now();

    let mut penalties = Vec::new();
    for _ in 0..3 {
        penalties.push(governor.current_penalty(Category::Generic));
        governor.add_generic_error();
    }

    assert_eq!(
        penalties,
        vec![
            Duration::from_millis(30_000),
            Duration::from_millis(60_000),
            Duration::from_millis(120_000)
        ]
    );
    assert_eq!(
        governor.resume_after(),
        Some(start + Duration::from_millis(120_000))
    );

    sleep(Duration::from_millis(119_999)).await;
    assert!(governor.is_timeout());
    assert_eq!(governor.get_timeout(), Duration::from_millis(1));

    sleep(Duration::from_millis(1)).await;
    assert!(!governor.is_timeout());
    assert_eq!(governor.get_timeout(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn penalty_returns_to_baseline_after_silence() {
    let governor = BackoffGovernor::default();

    governor.add_generic_error();
    assert_eq!(
        governor.current_penalty(Category::Generic),
        Duration::from_millis(60_000)
    );

    sleep(Duration::from_millis(60_000 + 60_000 + 1)).await;

    assert_eq!(
        governor.current_penalty(Category::Generic),
        Duration::from_millis(30_000)
    );
}

#[tokio::test(start_paused = true)]
async fn rate_limit_then_abort_takes_the_later_resume() {
    let governor = BackoffGovernor::default();
    let start = Instant::now();

    // Prime the abort curve so it imposes a penalty of its own.
    for _ in 0..3 {
        governor.add_abort();
    }
    let abort_penalty = governor.current_penalty(Category::Abort);
    let rate_limit_penalty = governor.current_penalty(Category::RateLimit);

    governor.add_rate_limit(true, None);
    governor.add_abort();

    let expected = start + rate_limit_penalty.max(abort_penalty);
    assert_eq!(governor.resume_after(), Some(expected));
    assert!(governor.is_global_outage());
}

#[tokio::test(start_paused = true)]
async fn reset_hint_of_five_seconds_is_six_thousand_ms() {
    let governor = BackoffGovernor::default();

    governor.add_rate_limit(false, Some(5.0));

    assert_eq!(governor.get_timeout(), Duration::from_millis(6000));
}

#[tokio::test(start_paused = true)]
async fn resume_time_never_moves_earlier() {
    let governor = BackoffGovernor::default();
    let mut last = None;

    for step in 0..40u32 {
        match step % 4 {
            0 => governor.add_abort(),
            1 => governor.add_generic_error(),
            2 => governor.add_http_error(),
            _ => governor.add_rate_limit(step % 8 == 3, Some(f64::from(step % 5))),
        }
        let resume = governor.resume_after();
        assert!(resume >= last, "resume moved earlier at step {}", step);
        last = resume;
        sleep(Duration::from_secs(7)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn budget_decrements_by_step_down_to_floor() {
    let config = GovernorConfig {
        budget_step: 0.1,
        budget_floor: 0.25,
        ..GovernorConfig::default()
    };
    let governor = BackoffGovernor::new(&config);

    let mut seen = Vec::new();
    for _ in 0..10 {
        governor.add_rate_limit(false, None);
        seen.push(governor.request_budget_fraction());
    }

    assert_eq!(&seen[..3], &[0.9, 0.8, 0.7]);
    assert!(seen.iter().all(|fraction| *fraction >= 0.25));
    assert_eq!(*seen.last().unwrap(), 0.25);
}

#[tokio::test(start_paused = true)]
async fn rolling_counts_and_restores_are_independent() {
    let governor = BackoffGovernor::default();
    let generic = governor.accumulator(Category::Generic);

    governor.add_generic_error();
    governor.add_generic_error(); // pending 120s, restore at +180s

    sleep(Duration::from_secs(61)).await;
    assert_eq!(generic.count_last_minute(), 0);
    assert_eq!(generic.current_penalty(), Duration::from_secs(120));

    sleep(Duration::from_secs(120)).await;
    assert_eq!(generic.current_penalty(), Duration::from_secs(30));
    assert_eq!(generic.count_total(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reports_keep_counters_consistent() {
    let governor = Arc::new(BackoffGovernor::default());

    let tasks: Vec<_> = (0..8)
        .map(|worker| {
            let governor = governor.clone();
            tokio::spawn(async move {
                for _ in 0..25 {
                    if worker % 2 == 0 {
                        governor.add_http_error();
                    } else {
                        governor.add_rate_limit(false, Some(1.0));
                    }
                }
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(governor.accumulator(Category::Http).count_total(), 100);
    assert_eq!(governor.accumulator(Category::RateLimit).count_total(), 100);
    assert_eq!(governor.accumulator(Category::Http).count_last_minute(), 100);
    assert_eq!(governor.request_budget_fraction(), 0.05);
    assert!(governor.is_timeout());
}

#[tokio::test(start_paused = true)]
async fn reports_from_plain_threads_still_decay() {
    let governor = Arc::new(BackoffGovernor::default());
    let start = Instant::now();

    let reporter = governor.clone();
    std::thread::spawn(move || reporter.add_generic_error())
        .join()
        .unwrap();

    let generic = governor.accumulator(Category::Generic);
    assert_eq!(generic.count_last_minute(), 1);
    assert_eq!(generic.current_penalty(), Duration::from_secs(60));
    assert_eq!(
        governor.resume_after(),
        Some(start + Duration::from_secs(30))
    );

    sleep(Duration::from_secs(61)).await;
    assert_eq!(generic.count_last_minute(), 0);
    assert!(!governor.is_timeout());

    sleep(Duration::from_secs(600)).await;
    assert_eq!(generic.current_penalty(), Duration::from_secs(30));
}

#[test]
fn governor_built_off_runtime_uses_given_handle() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap();
    let governor =
        BackoffGovernor::with_runtime(&GovernorConfig::default(), runtime.handle().clone());

    governor.add_http_error();
    assert_eq!(governor.get_timeout(), Duration::from_secs(30));

    runtime.block_on(async { sleep(Duration::from_secs(121)).await });
    assert!(!governor.is_timeout());
    assert_eq!(
        governor.current_penalty(Category::Http),
        Duration::from_secs(30)
    );
}
