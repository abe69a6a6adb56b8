use parley::{Error, WorkerPool};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn wait_for(pred: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !pred() {
        assert!(Instant::now() < deadline, "timed out");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn submit_before_initialize_is_rejected() {
    let pool = WorkerPool::new(2);
    let result = pool.submit(Box::new(|| {}));
    assert!(matches!(result, Err(Error::NotReady)));
}

#[test]
fn double_initialize_is_rejected() {
    let pool = WorkerPool::new(1);
    pool.initialize().expect("first init");
    assert!(pool.initialize().is_err());
    pool.shutdown();
}

#[test]
fn tasks_submitted_right_after_initialize_run() {
    let pool = WorkerPool::new(4);
    pool.initialize().expect("init");

    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..32 {
        let counter = counter.clone();
        pool.submit(Box::new(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        }))
        .expect("submit");
    }

    wait_for(|| counter.load(Ordering::Relaxed) == 32);
    pool.shutdown();
}

#[test]
fn submissions_after_shutdown_are_dropped_silently() {
    let pool = WorkerPool::new(2);
    pool.initialize().expect("init");
    pool.shutdown();

    let counter = Arc::new(AtomicUsize::new(0));
    let probe = counter.clone();
    // no error, no execution
    pool.submit(Box::new(move || {
        probe.fetch_add(1, Ordering::Relaxed);
    }))
    .expect("submit after shutdown");
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(counter.load(Ordering::Relaxed), 0);
}

#[test]
fn panicking_task_does_not_kill_the_worker() {
    let pool = WorkerPool::new(1);
    pool.initialize().expect("init");

    pool.submit(Box::new(|| panic!("boom"))).expect("submit");

    let counter = Arc::new(AtomicUsize::new(0));
    let probe = counter.clone();
    pool.submit(Box::new(move || {
        probe.fetch_add(1, Ordering::Relaxed);
    }))
    .expect("submit");

    wait_for(|| counter.load(Ordering::Relaxed) == 1);
    pool.shutdown();
}

#[test]
fn tasks_run_in_submission_order_on_a_single_worker() {
    let pool = WorkerPool::new(1);
    pool.initialize().expect("init");

    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    for i in 0..8 {
        let order = order.clone();
        pool.submit(Box::new(move || order.lock().push(i)))
            .expect("submit");
    }

    wait_for(|| order.lock().len() == 8);
    assert_eq!(*order.lock(), (0..8).collect::<Vec<_>>());
    pool.shutdown();
}
