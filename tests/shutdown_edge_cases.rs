use fiberdispatch::{DispatchError, Dispatcher, DispatcherConfig, JobDesc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn config(workers: u8) -> DispatcherConfig {
    DispatcherConfig::with_pools(16, 64, 4, 128).worker_threads(workers)
}

#[test]
fn test_shutdown_during_job_execution() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dispatcher = Dispatcher::new();
    dispatcher.init(config(2)).unwrap();

    let started = Arc::new(AtomicUsize::new(0));
    let jobs = (0..10).map(|_| {
        let started = started.clone();
        JobDesc::normal(move |_| {
            started.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(10));
        })
    });
    let _handle = dispatcher.dispatch_small(jobs).unwrap();

    // Running jobs finish, listed ones are dropped
    let start = Instant::now();
    let result = dispatcher.shutdown();
    assert!(result.is_ok(), "Shutdown should succeed after running jobs complete");
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(started.load(Ordering::SeqCst) <= 10);
}

#[test]
fn test_idle_shutdown_is_prompt() {
    let dispatcher = Dispatcher::new();
    dispatcher.init(config(4)).unwrap();
    std::thread::sleep(Duration::from_millis(20));

    let start = Instant::now();
    dispatcher.shutdown().unwrap();
    assert!(
        start.elapsed() < Duration::from_secs(2),
        "Parked workers must wake on shutdown"
    );
}

#[test]
fn test_init_twice() {
    let dispatcher = Dispatcher::new();
    dispatcher.init(config(1)).unwrap();
    assert!(matches!(
        dispatcher.init(config(1)),
        Err(DispatchError::AlreadyInitialized)
    ));
    assert_eq!(dispatcher.num_workers(), 1);
    dispatcher.shutdown().unwrap();
}

#[test]
fn test_use_before_init_and_after_shutdown() {
    let dispatcher = Dispatcher::new();
    assert!(matches!(
        dispatcher.dispatch_small([JobDesc::normal(|_| {})]),
        Err(DispatchError::NotInitialized)
    ));
    assert!(matches!(dispatcher.shutdown(), Err(DispatchError::NotInitialized)));
    assert!(dispatcher.metrics().is_none());

    dispatcher.init(config(1)).unwrap();
    dispatcher.shutdown().unwrap();

    assert!(matches!(
        dispatcher.dispatch_big([JobDesc::normal(|_| {})]),
        Err(DispatchError::NotInitialized)
    ));
    assert!(matches!(dispatcher.shutdown(), Err(DispatchError::NotInitialized)));
}

#[test]
fn test_reinit_after_shutdown() {
    let dispatcher = Dispatcher::new();
    let total = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        dispatcher.init(config(2)).unwrap();
        let jobs = (0..5).map(|_| {
            let total = total.clone();
            JobDesc::normal(move |_| {
                total.fetch_add(1, Ordering::SeqCst);
            })
        });
        let handle = dispatcher.dispatch_small(jobs).unwrap();
        dispatcher.wait(handle).unwrap();
        dispatcher.shutdown().unwrap();
    }

    assert_eq!(total.load(Ordering::SeqCst), 15);
}

#[test]
fn test_drop_shuts_down() {
    let total = Arc::new(AtomicUsize::new(0));
    {
        let dispatcher = Dispatcher::new();
        dispatcher.init(config(2)).unwrap();
        let total = total.clone();
        let handle = dispatcher
            .dispatch_small([JobDesc::normal(move |_| {
                total.fetch_add(1, Ordering::SeqCst);
            })])
            .unwrap();
        dispatcher.wait(handle).unwrap();
    }
    assert_eq!(total.load(Ordering::SeqCst), 1);
}

#[test]
fn test_shutdown_releases_nested_wait() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dispatcher = Dispatcher::new();
    dispatcher.init(config(1)).unwrap();

    let waiting = Arc::new(AtomicBool::new(false));
    let saw_shutdown = Arc::new(Mutex::new(None));
    let parent = {
        let waiting = waiting.clone();
        let saw_shutdown = saw_shutdown.clone();
        JobDesc::normal(move |ctx| {
            let children = (0..3).map(|_| {
                JobDesc::normal(|_| std::thread::sleep(Duration::from_millis(100)))
            });
            let handle = ctx.dispatch_small(children).unwrap();
            waiting.store(true, Ordering::SeqCst);
            let result = ctx.wait(handle);
            *saw_shutdown.lock().unwrap() = Some(matches!(result, Err(DispatchError::ShutDown)));
        })
    };
    let _handle = dispatcher.dispatch_small([parent]).unwrap();

    while !waiting.load(Ordering::SeqCst) {
        std::thread::yield_now();
    }
    std::thread::sleep(Duration::from_millis(20));

    let start = Instant::now();
    assert!(dispatcher.shutdown().is_ok());
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(*saw_shutdown.lock().unwrap(), Some(true));
}

#[test]
fn test_handle_from_previous_init_is_invalid() {
    let dispatcher = Dispatcher::new();

    dispatcher.init(config(0)).unwrap();
    let stale = dispatcher.dispatch_small([JobDesc::normal(|_| {})]).unwrap();
    dispatcher.shutdown().unwrap();

    dispatcher.init(config(0)).unwrap();
    let fresh = dispatcher.dispatch_small([JobDesc::normal(|_| {})]).unwrap();
    assert_eq!(stale.index(), fresh.index());
    assert!(matches!(dispatcher.wait(stale), Err(DispatchError::InvalidHandle)));
    dispatcher.wait(fresh).unwrap();
    dispatcher.shutdown().unwrap();
}

#[test]
fn test_handle_from_other_dispatcher_is_invalid() {
    let first = Dispatcher::new();
    let second = Dispatcher::new();
    first.init(config(1)).unwrap();
    second.init(config(1)).unwrap();

    let ours = second.dispatch_small([JobDesc::normal(|_| {})]).unwrap();
    let theirs = first.dispatch_small([JobDesc::normal(|_| {})]).unwrap();
    assert!(matches!(second.wait(theirs), Err(DispatchError::InvalidHandle)));
    second.wait(ours).unwrap();
    first.wait(theirs).unwrap();

    first.shutdown().unwrap();
    second.shutdown().unwrap();
}

#[test]
fn test_shutdown_of_unused_dispatcher() {
    let dispatcher = Dispatcher::new();
    dispatcher.init(config(0)).unwrap();
    dispatcher.shutdown().unwrap();
}
