//! Periodic trigger pulse generator.
//!
//! Drives the trigger line with a train of low-high-low pulses from its own
//! thread, the way an external signal generator would.

use probe_stack::TriggerLine;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Pulse train running on a background thread.
#[derive(Debug)]
pub struct PulseGenerator {
    emitted: Arc<AtomicU32>,
    finished: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PulseGenerator {
    /// Emit `count` pulses on `line`, one every `interval`.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn(line: Arc<TriggerLine>, count: u32, interval: Duration) -> std::io::Result<Self> {
        let emitted = Arc::new(AtomicU32::new(0));
        let finished = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));

        let thread = {
            let emitted = Arc::clone(&emitted);
            let finished = Arc::clone(&finished);
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name("pulse-gen".into())
                .spawn(move || {
                    info!(count, interval_ms = interval.as_millis(), "pulse generator started");
                    let mut next = Instant::now() + interval;
                    for _ in 0..count {
                        if !sleep_until(next, &stop) {
                            break;
                        }
                        line.pulse();
                        let n = emitted.fetch_add(1, Ordering::AcqRel) + 1;
                        debug!(pulse = n, "trigger pulse");
                        next += interval;
                    }
                    finished.store(true, Ordering::Release);
                    info!(emitted = emitted.load(Ordering::Acquire), "pulse generator finished");
                })?
        };

        Ok(Self {
            emitted,
            finished,
            stop,
            thread: Some(thread),
        })
    }

    /// Pulses emitted so far.
    pub fn emitted(&self) -> u32 {
        self.emitted.load(Ordering::Acquire)
    }

    /// Whether the train is complete or was stopped.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Stop early and wait for the thread.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for PulseGenerator {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sleep in short steps until `deadline`. Returns `false` if stopped.
fn sleep_until(deadline: Instant, stop: &AtomicBool) -> bool {
    const STEP: Duration = Duration::from_millis(20);
    loop {
        if stop.load(Ordering::Acquire) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(STEP));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use probe_stack::Edge;

    fn wait_finished(generator: &PulseGenerator) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !generator.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_emits_requested_pulses() {
        let line = Arc::new(TriggerLine::new(1));
        line.set_edge(Edge::Rising);

        let generator = PulseGenerator::spawn(Arc::clone(&line), 5, Duration::from_millis(1)).unwrap();
        wait_finished(&generator);

        assert!(generator.is_finished());
        assert_eq!(generator.emitted(), 5);
        assert_eq!(line.stats().edges, 5);
    }

    #[test]
    fn test_stop_interrupts_train() {
        let line = Arc::new(TriggerLine::new(1));
        let mut generator = PulseGenerator::spawn(line, 100, Duration::from_secs(10)).unwrap();
        generator.stop();
        assert!(generator.is_finished());
        assert_eq!(generator.emitted(), 0);
    }
}
