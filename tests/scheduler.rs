//! End-to-end tests for the scheduler facade.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tickwheel::test_utils::init_test_logging;
use tickwheel::{SchedulerConfig, TimeUnit, TimerError, WheelScheduler, WheelTimer};

fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

fn fast_scheduler() -> WheelScheduler {
    WheelScheduler::new(WheelTimer::new(Duration::from_millis(10), 8).unwrap())
}

#[test]
fn builds_from_default_config() {
    init_test_logging();
    let config = SchedulerConfig::default();
    let scheduler = WheelScheduler::from_config(&config).unwrap();

    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    scheduler
        .schedule(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_millis(50),
        )
        .unwrap();

    // Default tick is 100ms, so one tick is the floor here.
    assert!(wait_until(Duration::from_secs(3), || ran.load(Ordering::SeqCst) == 1));
    scheduler.shutdown();
}

#[test]
fn invalid_config_fails_construction() {
    init_test_logging();
    let config = SchedulerConfig {
        tick_duration: 0,
        time_unit: TimeUnit::Milliseconds,
        ticks_per_wheel: 512,
    };
    assert!(matches!(
        WheelScheduler::from_config(&config),
        Err(TimerError::Config(_))
    ));
}

#[test]
fn fixed_rate_runs_at_roughly_the_period() {
    init_test_logging();
    let scheduler = fast_scheduler();
    let runs = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&runs);
    let t0 = Instant::now();
    let id = scheduler
        .schedule_at_fixed_rate(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_millis(30),
            Duration::from_millis(30),
        )
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || runs.load(Ordering::SeqCst) >= 4));
    // Four runs spaced 30ms apart cannot complete faster than the periods.
    assert!(t0.elapsed() >= Duration::from_millis(4 * 30));

    assert!(scheduler.cancel(&id));
    scheduler.shutdown();
}

#[test]
fn cancel_between_runs_stops_a_fixed_rate_job() {
    init_test_logging();
    let scheduler = fast_scheduler();
    let runs = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&runs);
    let id = scheduler
        .schedule_at_fixed_rate(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_millis(20),
            Duration::from_millis(20),
        )
        .unwrap();

    assert!(wait_until(Duration::from_secs(3), || runs.load(Ordering::SeqCst) >= 1));
    assert!(scheduler.cancel(&id));
    assert!(!scheduler.cancel(&id));

    let snapshot = runs.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(250));
    assert!(
        runs.load(Ordering::SeqCst) <= snapshot + 1,
        "job kept running after cancel"
    );
    assert_eq!(scheduler.active_jobs(), 0);
    scheduler.shutdown();
}

#[test]
fn shutdown_drops_unrun_jobs_silently() {
    init_test_logging();
    let scheduler = fast_scheduler();
    let ran = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&ran);
    scheduler
        .schedule(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_millis(200),
        )
        .unwrap();
    scheduler.shutdown();

    std::thread::sleep(Duration::from_millis(400));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.active_jobs(), 0);
    assert!(!scheduler.is_running());
}

#[test]
fn ids_keep_increasing_across_job_kinds() {
    init_test_logging();
    let scheduler = fast_scheduler();
    let a = scheduler.schedule(|| {}, Duration::from_secs(60)).unwrap();
    let b = scheduler
        .schedule_at_fixed_rate(|| {}, Duration::from_secs(60), Duration::from_secs(60))
        .unwrap();
    let c = scheduler.schedule(|| {}, Duration::from_secs(60)).unwrap();
    assert_eq!((a.as_str(), b.as_str(), c.as_str()), ("task-1", "task-2", "task-3"));
    scheduler.shutdown();
}
