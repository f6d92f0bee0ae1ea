//! Two-node simulated network: a sender running the probe and the root
//! collecting it.
//!
//! Both nodes share one [`NetworkClock`]. [`SimulatedNetwork::propagate`]
//! completes the sender's transmissions, carries the resulting frames to
//! the root, lets the root bridge them and hands the bridged packets to
//! the [`ProbeCollector`].

use crate::collector::{CollectorReport, ProbeCollector, ProbeSample};
use crate::node::{Node, ProbeContext};
use crate::probe::ProbeStats;
use probe_common::{ProbeConfig, ProbeResult};
use probe_stack::{NetworkClock, PoolStats, SimulatedStack, UdpStats};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Summary of a network run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkReport {
    /// Sender probe counters.
    pub sender: ProbeStats,
    /// Root probe counters.
    pub root: ProbeStats,
    /// Sender buffer pool.
    pub sender_pool: PoolStats,
    /// Root buffer pool.
    pub root_pool: PoolStats,
    /// Sender transport.
    pub sender_udp: UdpStats,
    /// Collected probes.
    pub collector: CollectorReport,
}

/// Sender and root on a shared clock.
#[derive(Debug)]
pub struct SimulatedNetwork {
    clock: Arc<NetworkClock>,
    /// Node running the probe.
    pub sender: Node<SimulatedStack>,
    /// Network root; bridges what it receives.
    pub root: Node<SimulatedStack>,
    collector: ProbeCollector,
    samples: Vec<ProbeSample>,
    dropped_frames: u64,
}

impl SimulatedNetwork {
    /// Build both nodes from `config` on `clock`.
    ///
    /// The sender starts with the configured synchronization state; the root
    /// is always synchronized.
    ///
    /// # Errors
    ///
    /// Returns an error if a probe cannot register its port.
    pub fn new(config: &ProbeConfig, clock: Arc<NetworkClock>) -> ProbeResult<Self> {
        let sender_stack = SimulatedStack::new(&config.stack, Arc::clone(&clock));
        let mut root_stack = SimulatedStack::new(&config.stack, Arc::clone(&clock));
        root_stack.set_synchronized(true);
        root_stack.set_root(true);

        let sender = Node::new(&config.probe, sender_stack)?;
        let root = Node::new(&config.probe, root_stack)?;
        let collector = ProbeCollector::new(clock.timer_hz(), clock.slot_duration(), &config.metrics);
        info!(
            timer_hz = clock.timer_hz(),
            slot_ms = clock.slot_duration().as_millis(),
            "simulated network ready"
        );

        Ok(Self {
            clock,
            sender,
            root,
            collector,
            samples: Vec::new(),
            dropped_frames: 0,
        })
    }

    /// Shared clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<NetworkClock> {
        &self.clock
    }

    /// Move traffic from the sender to the collector.
    ///
    /// Returns the number of probes collected.
    pub fn propagate(&mut self) -> usize {
        self.sender.dispatch_transport();

        for frame in self.sender.stack.take_air_frames() {
            if let Err(error) = self.root.stack.inject_rx(&frame) {
                self.dropped_frames += 1;
                debug!(%error, "root dropped frame");
            }
        }
        self.root.dispatch_transport();

        let mut collected = 0;
        for packet in self.root.stack.bridge().drain() {
            if let Ok(sample) = self.collector.ingest(&packet) {
                self.samples.push(sample);
                collected += 1;
            }
        }
        collected
    }

    /// Take the samples collected since the last call.
    pub fn drain_samples(&mut self) -> Vec<ProbeSample> {
        std::mem::take(&mut self.samples)
    }

    /// The collector.
    #[must_use]
    pub fn collector(&self) -> &ProbeCollector {
        &self.collector
    }

    /// Frames the root could not accept.
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// Summary of both nodes and the collector.
    #[must_use]
    pub fn report(&self) -> NetworkReport {
        NetworkReport {
            sender: self.sender.probe.stats(),
            root: self.root.probe.stats(),
            sender_pool: self.sender.stack.pool_stats(),
            root_pool: self.root.stack.pool_stats(),
            sender_udp: self.sender.stack.udp().stats(),
            collector: self.collector.report(),
        }
    }

    /// Unregister both probes.
    ///
    /// # Errors
    ///
    /// Returns the first unregistration error.
    pub fn shutdown(&mut self) -> ProbeResult<()> {
        self.sender.shutdown()?;
        self.root.shutdown()
    }
}

impl ProbeContext for SimulatedNetwork {
    type Stack = SimulatedStack;

    fn node(&mut self) -> &mut Node<SimulatedStack> {
        &mut self.sender
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::probe_task;
    use crate::scheduler::{Scheduler, TaskPriority};
    use std::time::Duration;

    fn network() -> SimulatedNetwork {
        let clock = Arc::new(NetworkClock::manual(32_768, Duration::from_millis(15)));
        SimulatedNetwork::new(&ProbeConfig::default(), clock).unwrap()
    }

    #[test]
    fn test_probe_reaches_collector() {
        let mut net = network();
        let mut sched: Scheduler<SimulatedNetwork> = Scheduler::with_defaults();

        net.clock().advance_slots(10);
        sched.push_task(probe_task, TaskPriority::Coap).unwrap();
        sched.run_until_idle(&mut net);
        net.clock().advance_slots(2);
        assert_eq!(net.propagate(), 1);

        let samples = net.drain_samples();
        assert_eq!(samples[0].sequence, 0);
        assert_eq!(samples[0].tx_asn, 10);
        assert_eq!(samples[0].rx_asn, 12);
        assert_eq!(samples[0].latency_ns, 30_000_000);
        assert!(net.drain_samples().is_empty());

        let report = net.report();
        assert_eq!(report.sender.completed_ok, 1);
        assert_eq!(report.root.received, 1);
        assert_eq!(report.sender_pool.in_use, 0);
        assert_eq!(report.root_pool.in_use, 0);
    }

    #[test]
    fn test_root_never_sends() {
        let mut net = network();
        net.root.run_probe();
        assert_eq!(net.root.probe.stats().root, 1);
        assert_eq!(net.root.stack.pool_stats().acquired, 0);
    }

    #[test]
    fn test_shutdown_unregisters_both() {
        let mut net = network();
        net.shutdown().unwrap();
        assert!(net.sender.probe.registration().is_none());
        assert!(net.root.probe.registration().is_none());
    }
}
