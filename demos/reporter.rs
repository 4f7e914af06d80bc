//! This example demonstrates how to ship metrics recorded through the `metrics` facade to a
//! Logstash UDP input.
//!
//! The MetricsRecorder routes `counter!`, `gauge!` and `histogram!` calls into the global
//! registry, and the Reporter flushes that registry every two seconds, one JSON datagram per
//! metric. Point `LOGSTASH_ADDR` at a collector, or watch the datagrams with `nc -ul 5000`.

use metrics::{Unit, counter, describe_histogram, gauge, histogram};
use metrics_udp_reporter::{MetricsRecorder, MetricsRegistry, ReporterBuilder};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

#[cfg(not(feature = "tokio"))]
fn main() {
    env_logger::init();

    if let Err(e) = MetricsRecorder::default().install() {
        eprintln!("Failed to install metrics recorder: {}", e);
        return;
    }

    let address = std::env::var("LOGSTASH_ADDR").unwrap_or_else(|_| "127.0.0.1:5000".into());
    let reporter = match ReporterBuilder::default()
        .address(&address)
        .default_value("client", "demo")
        .build()
    {
        Ok(reporter) => reporter,
        Err(e) => {
            eprintln!("Failed to create reporter: {}", e);
            return;
        }
    };
    let handle = reporter.spawn(Duration::from_secs(2));

    // Metrics can also be registered directly on the registry.
    let uptime = MetricsRegistry::global()
        .get_or_register_gauge("demo.uptime_secs")
        .expect("uptime gauge");
    describe_histogram!("demo.work", Unit::Milliseconds, "time spent working");

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    // Handle Ctrl+C to exit gracefully.
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl-C handler");

    println!("Reporting metrics to {address}. Press Ctrl+C to exit.");

    let started = Instant::now();
    while running.load(Ordering::SeqCst) {
        let work = Instant::now();
        std::thread::sleep(Duration::from_millis(250));
        histogram!("demo.work").record(work.elapsed().as_secs_f64() * 1000.0);
        histogram!("demo.payload_bytes").record(512.0);
        counter!("demo.loops").increment(1);
        gauge!("demo.load").set(0.42);
        uptime.update(i64::try_from(started.elapsed().as_secs()).unwrap_or(i64::MAX));
    }

    handle.stop();
    println!("Shutting down metrics reporter.");
}

#[cfg(feature = "tokio")]
#[tokio::main]
async fn main() {
    env_logger::init();

    if let Err(e) = MetricsRecorder::default().install() {
        eprintln!("Failed to install metrics recorder: {}", e);
        return;
    }

    let address = std::env::var("LOGSTASH_ADDR").unwrap_or_else(|_| "127.0.0.1:5000".into());
    let reporter = match ReporterBuilder::default()
        .address(&address)
        .default_value("client", "demo")
        .build()
    {
        Ok(reporter) => reporter,
        Err(e) => {
            eprintln!("Failed to create reporter: {}", e);
            return;
        }
    };
    let handle = reporter.spawn(Duration::from_secs(2));

    let uptime = MetricsRegistry::global()
        .get_or_register_gauge("demo.uptime_secs")
        .expect("uptime gauge");
    describe_histogram!("demo.work", Unit::Milliseconds, "time spent working");

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl-C handler");

    println!("Reporting metrics to {address}. Press Ctrl+C to exit.");

    let started = Instant::now();
    while running.load(Ordering::SeqCst) {
        let work = Instant::now();
        tokio::time::sleep(Duration::from_millis(250)).await;
        histogram!("demo.work").record(work.elapsed().as_secs_f64() * 1000.0);
        counter!("demo.loops").increment(1);
        gauge!("demo.load").set(0.42);
        uptime.update(i64::try_from(started.elapsed().as_secs()).unwrap_or(i64::MAX));
    }

    handle.stop().await;
    println!("Shutting down metrics reporter.");
}
