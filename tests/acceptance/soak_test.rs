//! Long-run tests.
//!
//! These tests push the probe through enough triggers to wrap the 16-bit
//! sequence counter, and through a live-clock run driven by a pulse thread
//! the way the daemon runs.
//!
//! # Acceptance Criteria
//!
//! - The counter wraps silently and the collector sees no loss across it
//! - No buffer is leaked on either node
//! - Every generated edge becomes exactly one collected probe

use super::common::{wait_until, AcceptanceCriteria, Harness};
use probe_common::ProbeConfig;
use probe_stack::NetworkClock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Probes per batch; stays within the default buffer pool.
const BATCH: u32 = 10;

#[test]
fn test_counter_wraps_across_long_run() {
    let mut h = Harness::manual(&ProbeConfig::default());

    let total = 65_536 + 4;
    let collected = h.probe_batches(total, BATCH);
    assert_eq!(collected, total as usize);

    let report = h.net.report();
    assert_eq!(report.sender.sent, u64::from(total));
    assert_eq!(report.collector.received, u64::from(total));
    assert_eq!(report.collector.lost, 0);
    assert_eq!(report.collector.duplicates, 0);
    assert_eq!(h.net.collector().last_sequence(), Some(3));
    assert_eq!(h.net.sender.probe.counter(), 4);

    assert_eq!(report.sender_pool.in_use, 0);
    assert_eq!(report.root_pool.in_use, 0);
    assert_eq!(report.sender_pool.acquired, report.sender_pool.released);
}

#[test]
fn test_live_clock_pulse_train() {
    run_live_pulse_train(50, Duration::from_millis(2));
}

#[test]
#[ignore = "Long running (about 1 min)"]
fn test_live_clock_soak() {
    run_live_pulse_train(6_000, Duration::from_millis(10));
}

/// Drive `pulses` edges from a separate thread against a live clock, with
/// the scheduler loop collecting between tasks.
fn run_live_pulse_train(pulses: u32, interval: Duration) {
    let config = ProbeConfig::default();
    let clock = Arc::new(NetworkClock::live(
        config.stack.timer_hz,
        config.stack.slot_duration,
        Instant::now(),
    ));
    let mut h = Harness::with_clock(&config, clock);

    let done = Arc::new(AtomicBool::new(false));
    let generator = {
        let line = Arc::clone(&h.line);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            for _ in 0..pulses {
                line.pulse();
                thread::sleep(interval);
            }
            done.store(true, Ordering::Release);
        })
    };

    let running = AtomicBool::new(true);
    let deadline = Instant::now() + interval * pulses + Duration::from_secs(10);
    let mut collected = 0usize;
    h.scheduler.run(&mut h.net, &running, |scheduler, net| {
        collected += net.propagate();
        let drained = scheduler.stats().pending == 0 && net.sender.stack.udp().in_flight() == 0;
        if (done.load(Ordering::Acquire) && drained) || Instant::now() > deadline {
            running.store(false, Ordering::Release);
        }
        false
    });
    generator.join().unwrap();

    let expected = u64::from(pulses);
    let report = h.net.report();
    assert_eq!(h.line.stats().edges, expected);
    assert_eq!(h.scheduler.stats().dropped_full, 0);
    assert_eq!(collected as u64, expected);
    assert_eq!(report.sender.sent, expected);
    assert_eq!(report.sender_pool.in_use, 0);
    assert_eq!(report.root_pool.in_use, 0);

    let criteria = AcceptanceCriteria {
        min_received: expected,
        max_lost: 0,
        max_latency_ns: 1_000_000_000,
    };
    assert!(criteria.check(&report.collector), "{report:?}");
    assert!(wait_until(Duration::from_millis(10), || !h.line.is_pending()));
}
