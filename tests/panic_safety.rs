use fiberdispatch::{Dispatcher, DispatcherConfig, JobDesc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

fn dispatcher(workers: u8) -> Dispatcher {
    let _ = env_logger::builder().is_test(true).try_init();
    let dispatcher = Dispatcher::new();
    dispatcher
        .init(DispatcherConfig::with_pools(16, 64, 4, 128).worker_threads(workers))
        .unwrap();
    dispatcher
}

#[test]
fn test_panic_safety_counter_decrement() {
    let dispatcher = dispatcher(1);

    let handle = dispatcher
        .dispatch_small([JobDesc::normal(|_| panic!("Intentional panic for testing"))])
        .unwrap();

    // Counter must still drain, otherwise this wait never returns
    dispatcher.wait(handle).unwrap();

    let metrics = dispatcher.metrics().unwrap();
    assert_eq!(metrics.job_panics, 1);
    assert_eq!(metrics.jobs_completed, 1);
    dispatcher.shutdown().unwrap();
}

#[test]
fn test_worker_recovery_after_panic() {
    let dispatcher = dispatcher(1);

    let handle = dispatcher
        .dispatch_small([JobDesc::normal(|_| panic!("Boom"))])
        .unwrap();
    dispatcher.wait(handle).unwrap();

    let success = Arc::new(AtomicBool::new(false));
    let success_clone = success.clone();
    let handle = dispatcher
        .dispatch_small([JobDesc::normal(move |_| {
            success_clone.store(true, Ordering::SeqCst);
        })])
        .unwrap();
    dispatcher.wait(handle).unwrap();

    assert!(success.load(Ordering::SeqCst), "Dispatcher should keep running after a panic");
    dispatcher.shutdown().expect("No worker thread may die from a job panic");
}

#[test]
fn test_panicking_child_does_not_block_parent() {
    let dispatcher = dispatcher(2);
    let survivors = Arc::new(AtomicUsize::new(0));
    let survivors_clone = survivors.clone();

    let handle = dispatcher
        .dispatch_big([JobDesc::normal(move |ctx| {
            let children = (0..6).map(|i| {
                let survivors = survivors_clone.clone();
                JobDesc::normal(move |_| {
                    if i % 2 == 0 {
                        panic!("child {i} failed");
                    }
                    survivors.fetch_add(1, Ordering::SeqCst);
                })
            });
            let inner = ctx.dispatch_small(children).unwrap();
            ctx.wait(inner).unwrap();
        })])
        .unwrap();
    dispatcher.wait(handle).unwrap();

    assert_eq!(survivors.load(Ordering::SeqCst), 3);
    assert_eq!(dispatcher.metrics().unwrap().job_panics, 3);
    dispatcher.shutdown().unwrap();
}
