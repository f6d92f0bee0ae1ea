//! End-of-run summary.

use probe_common::LatencySnapshot;
use probe_runtime::{NetworkReport, SchedulerStats};
use probe_stack::LineStats;
use serde::Serialize;
use std::time::Duration;

/// Everything the daemon reports when it exits.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Wall-clock run time in milliseconds.
    pub uptime_ms: u64,
    /// Generated pulses.
    pub pulses: u32,
    /// SIGUSR1 triggers.
    pub signal_triggers: u32,
    /// Trigger line interrupt counters.
    pub trigger_line: LineStats,
    /// Scheduler counters.
    pub scheduler: SchedulerStats,
    /// Interrupt-to-task dispatch latency.
    pub dispatch: LatencySnapshot,
    /// Frames the root could not accept.
    pub dropped_frames: u64,
    /// Node and collector counters.
    pub network: NetworkReport,
}

impl RunSummary {
    /// Pretty JSON rendering.
    ///
    /// # Errors
    ///
    /// Returns the serializer error.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Probes triggered but never collected.
    pub fn missing(&self) -> u64 {
        self.network
            .sender
            .sent
            .saturating_sub(self.network.collector.received)
    }
}

/// Whole milliseconds, saturating.
pub fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use probe_common::ProbeConfig;
    use probe_runtime::SimulatedNetwork;
    use probe_stack::NetworkClock;
    use std::sync::Arc;

    fn summary() -> RunSummary {
        let clock = Arc::new(NetworkClock::manual(32_768, Duration::from_millis(15)));
        let net = SimulatedNetwork::new(&ProbeConfig::default(), clock).unwrap();
        RunSummary {
            uptime_ms: millis(Duration::from_secs(2)),
            pulses: 0,
            signal_triggers: 0,
            trigger_line: LineStats::default(),
            scheduler: SchedulerStats::default(),
            dispatch: probe_common::LatencyMetrics::new(8, Duration::from_millis(1)).snapshot(),
            dropped_frames: 0,
            network: net.report(),
        }
    }

    #[test]
    fn test_summary_json_fields() {
        let json = summary().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["uptime_ms"], 2000);
        assert_eq!(value["network"]["collector"]["received"], 0);
        assert!(value["scheduler"]["dropped_full"].is_number());
    }

    #[test]
    fn test_missing_probes() {
        let mut s = summary();
        s.network.sender.sent = 5;
        s.network.collector.received = 3;
        assert_eq!(s.missing(), 2);
    }
}
