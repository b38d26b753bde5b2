use fiberdispatch::{Dispatcher, DispatcherConfig, JobDesc, JobPriority};
use log::{error, info};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::args().nth(1) {
        Some(path) => match DispatcherConfig::from_file(&path) {
            Ok(config) => config,
            Err(err) => {
                error!("Failed to load config from {path}: {err}");
                std::process::exit(1);
            }
        },
        None => DispatcherConfig::default(),
    };

    let dispatcher = Dispatcher::new();
    if let Err(err) = dispatcher.init(config) {
        error!("Failed to initialize dispatcher: {err}");
        std::process::exit(1);
    }
    info!("Initialized dispatcher with {} worker threads", dispatcher.num_workers());

    // Example 1: three jobs bumping one counter
    let total = Arc::new(AtomicUsize::new(0));
    let jobs = (0..3).map(|_| {
        let total = total.clone();
        JobDesc::normal(move |_| {
            total.fetch_add(1, Ordering::SeqCst);
        })
    });
    match dispatcher.dispatch_small(jobs).and_then(|handle| dispatcher.wait(handle)) {
        Ok(()) => info!("Example 1: total = {}", total.load(Ordering::SeqCst)),
        Err(err) => error!("Example 1 failed: {err}"),
    }

    // Example 2: fan-out with nested waits on big-stack fibers
    let leaves = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let parents = (0..8).map(|_| {
        let leaves = leaves.clone();
        JobDesc::new(JobPriority::High, move |ctx| {
            let children = (0..8).map(|_| {
                let leaves = leaves.clone();
                JobDesc::normal(move |_| {
                    leaves.fetch_add(1, Ordering::Relaxed);
                })
            });
            match ctx.dispatch_small(children).and_then(|inner| ctx.wait(inner)) {
                Ok(()) => {}
                Err(err) => error!("Parent job {} failed: {err}", ctx.index()),
            }
        })
    });
    match dispatcher.dispatch_big(parents).and_then(|handle| dispatcher.wait(handle)) {
        Ok(()) => info!(
            "Example 2: {} leaf jobs in {:?}",
            leaves.load(Ordering::Relaxed),
            start.elapsed()
        ),
        Err(err) => error!("Example 2 failed: {err}"),
    }

    // Example 3: throughput in pool-sized batches
    let batches = 100;
    let start = Instant::now();
    for _ in 0..batches {
        let jobs = (0..64).map(|_| JobDesc::new(JobPriority::Low, |_| std::hint::black_box(())));
        if let Err(err) = dispatcher.dispatch_small(jobs).and_then(|handle| dispatcher.wait(handle)) {
            error!("Example 3 failed: {err}");
            break;
        }
    }
    let duration = start.elapsed();
    info!("Example 3: {} batches in {:?}", batches, duration);

    if let Some(metrics) = dispatcher.metrics() {
        info!(
            "Completed {} jobs ({:.2} jobs/second), {} rejected, {} suspended waits",
            metrics.jobs_completed,
            metrics.jobs_per_second(),
            metrics.jobs_rejected,
            metrics.waits_suspended
        );
    }

    if let Err(err) = dispatcher.shutdown() {
        error!("Shutdown error: {err}");
    }
}
