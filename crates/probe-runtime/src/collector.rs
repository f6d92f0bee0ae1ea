//! Root-side collection of probe datagrams.
//!
//! The root bridges every probe datagram to the host along with the slot
//! number and timer values at arrival. The collector decodes them, tracks
//! the sender's sequence counter and derives the trigger-to-reception
//! latency:
//!
//! ```text
//! latency = (rx_asn - tx_asn) * slot_duration
//!         + (rx_timer - rx_slot_reference)
//!         - (tx_timer - tx_slot_reference)
//! ```
//!
//! Both in-slot offsets are measured against each node's own slot start,
//! so the result does not depend on the two nodes sharing a timer.
//!
//! The timer and slot reference are read separately on each node, so a read
//! that crosses a slot boundary leaves an offset outside `0..=slot_ticks`.
//! Such datagrams still advance sequence tracking but produce no sample.

use crate::wire::ProbeDatagram;
use probe_common::{LatencyMetrics, LatencySnapshot, MetricsConfig, ProbeError, ProbeResult};
use probe_stack::{Asn, BridgedPacket};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Sequence distances below this count as forward progress.
const FORWARD_WINDOW: u16 = 0x8000;

/// One decoded probe with its measured latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProbeSample {
    /// Sender sequence number.
    pub sequence: u16,
    /// Slot in which the sender handled the trigger.
    pub tx_asn: u64,
    /// Slot in which the root bridged the datagram.
    pub rx_asn: u64,
    /// Sender timer at the trigger.
    pub tx_timer: u32,
    /// Root timer at arrival.
    pub rx_timer: u32,
    /// Whole slots between trigger and arrival.
    pub slots: u64,
    /// Trigger-to-reception latency.
    pub latency_ns: u64,
    /// Datagrams missing just before this one.
    pub gap: u16,
}

/// Collector counters and latency summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectorReport {
    /// Probe datagrams accepted.
    pub received: u64,
    /// Datagrams inferred lost from sequence gaps.
    pub lost: u64,
    /// Datagrams whose sequence number was not ahead of the last one.
    pub duplicates: u64,
    /// Bridged payloads that were not probe datagrams.
    pub malformed: u64,
    /// Datagrams whose timer and slot reference disagree on either node.
    pub inconsistent: u64,
    /// Latency summary.
    pub latency: LatencySnapshot,
    /// Requested percentiles as `(percentile, nanoseconds)`.
    pub percentiles: Vec<(f64, u64)>,
}

/// Decodes bridged probes and measures their latency.
#[derive(Debug)]
pub struct ProbeCollector {
    timer_hz: u32,
    slot_duration: Duration,
    percentiles: Vec<f64>,
    last_sequence: Option<u16>,
    metrics: LatencyMetrics,
    received: u64,
    lost: u64,
    duplicates: u64,
    malformed: u64,
    inconsistent: u64,
}

impl ProbeCollector {
    /// Create a collector for a network with the given timing.
    #[must_use]
    pub fn new(timer_hz: u32, slot_duration: Duration, metrics: &MetricsConfig) -> Self {
        Self {
            timer_hz: timer_hz.max(1),
            slot_duration,
            percentiles: metrics.percentiles.clone(),
            last_sequence: None,
            metrics: LatencyMetrics::new(metrics.histogram_size, metrics.latency_budget),
            received: 0,
            lost: 0,
            duplicates: 0,
            malformed: 0,
            inconsistent: 0,
        }
    }

    /// Decode a bridged packet and record its latency.
    ///
    /// # Errors
    ///
    /// Returns [`probe_common::ProbeError::Malformed`] if the payload is not
    /// a probe datagram, and [`ProbeError::InconsistentTiming`] if either
    /// timer offset falls outside its slot. Both are counted and otherwise
    /// ignored.
    pub fn ingest(&mut self, packet: &BridgedPacket) -> ProbeResult<ProbeSample> {
        let datagram = match ProbeDatagram::decode(&packet.payload) {
            Ok(datagram) => datagram,
            Err(error) => {
                self.malformed += 1;
                warn!(%error, port = packet.source_port, "ignoring bridged payload");
                return Err(error);
            }
        };

        let gap = self.track_sequence(datagram.sequence);
        let tx_asn = Asn::from_bytes(datagram.asn);
        let slots = packet.rx_asn.slots_since(tx_asn);
        let latency_ns = match self.latency_ns(&datagram, packet, slots) {
            Ok(latency_ns) => latency_ns,
            Err(error) => {
                self.inconsistent += 1;
                warn!(%error, sequence = datagram.sequence, "discarding latency sample");
                return Err(error);
            }
        };
        self.metrics.record_ns(latency_ns);
        self.received += 1;

        debug!(
            sequence = datagram.sequence,
            slots,
            latency_us = latency_ns / 1_000,
            "probe collected"
        );
        Ok(ProbeSample {
            sequence: datagram.sequence,
            tx_asn: tx_asn.value(),
            rx_asn: packet.rx_asn.value(),
            tx_timer: datagram.timer,
            rx_timer: packet.rx_timer,
            slots,
            latency_ns,
            gap,
        })
    }

    /// Returns the number of sequence numbers skipped before `sequence`.
    fn track_sequence(&mut self, sequence: u16) -> u16 {
        let Some(last) = self.last_sequence else {
            self.last_sequence = Some(sequence);
            return 0;
        };
        let distance = sequence.wrapping_sub(last);
        if distance == 0 || distance >= FORWARD_WINDOW {
            self.duplicates += 1;
            return 0;
        }
        self.last_sequence = Some(sequence);
        let gap = distance - 1;
        self.lost += u64::from(gap);
        gap
    }

    fn latency_ns(
        &self,
        datagram: &ProbeDatagram,
        packet: &BridgedPacket,
        slots: u64,
    ) -> ProbeResult<u64> {
        let ticks_ns = |ticks: u32| i128::from(ticks) * 1_000_000_000 / i128::from(self.timer_hz);
        let slot_ns = i128::try_from(self.slot_duration.as_nanos()).unwrap_or(i128::MAX);
        let tx_offset = self.in_slot(datagram.timer, datagram.slot_reference)?;
        let rx_offset = self.in_slot(packet.rx_timer, packet.rx_slot_reference)?;

        let total = i128::from(slots).saturating_mul(slot_ns) + ticks_ns(rx_offset)
            - ticks_ns(tx_offset);
        Ok(u64::try_from(total.max(0)).unwrap_or(u64::MAX))
    }

    /// Ticks from the slot start to `timer`, rejected past the slot end.
    fn in_slot(&self, timer: u32, slot_reference: u32) -> ProbeResult<u32> {
        let offset = timer.wrapping_sub(slot_reference);
        let slot_ticks = self.slot_ticks();
        if offset > slot_ticks {
            return Err(ProbeError::InconsistentTiming { offset, slot_ticks });
        }
        Ok(offset)
    }

    /// Timer ticks per slot, rounded up.
    fn slot_ticks(&self) -> u32 {
        let ticks = (self.slot_duration.as_nanos() * u128::from(self.timer_hz))
            .div_ceil(1_000_000_000);
        u32::try_from(ticks).unwrap_or(u32::MAX)
    }

    /// Latency samples.
    #[must_use]
    pub fn metrics(&self) -> &LatencyMetrics {
        &self.metrics
    }

    /// Sequence number of the newest datagram.
    #[must_use]
    pub fn last_sequence(&self) -> Option<u16> {
        self.last_sequence
    }

    /// Counters and latency summary.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn report(&self) -> CollectorReport {
        CollectorReport {
            received: self.received,
            lost: self.lost,
            duplicates: self.duplicates,
            malformed: self.malformed,
            inconsistent: self.inconsistent,
            latency: self.metrics.snapshot(),
            percentiles: self
                .metrics
                .percentiles(&self.percentiles)
                .into_iter()
                .map(|(p, d)| (p, d.as_nanos() as u64))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::TimingSnapshot;

    const HZ: u32 = 32_768;
    const SLOT: Duration = Duration::from_millis(15);

    fn collector() -> ProbeCollector {
        ProbeCollector::new(HZ, SLOT, &MetricsConfig::default())
    }

    fn packet(sequence: u16, tx_asn: u64, rx_asn: u64) -> BridgedPacket {
        let datagram = ProbeDatagram::new(
            sequence,
            Asn::new(tx_asn).to_bytes(),
            TimingSnapshot {
                timer: 1_000,
                slot_reference: 1_000,
            },
        );
        BridgedPacket {
            source_port: probe_common::WKP_UDP_INJECT,
            destination_port: probe_common::WKP_UDP_INJECT,
            payload: datagram.encode().to_vec(),
            rx_asn: Asn::new(rx_asn),
            rx_timer: 50_000,
            rx_slot_reference: 50_000,
        }
    }

    #[test]
    fn test_latency_from_slot_distance() {
        let mut c = collector();
        let sample = c.ingest(&packet(0, 10, 14)).unwrap();
        assert_eq!(sample.slots, 4);
        assert_eq!(sample.latency_ns, 60_000_000);
        assert_eq!(c.metrics().total(), 1);
    }

    #[test]
    fn test_latency_includes_in_slot_offsets() {
        let mut c = collector();
        let mut p = packet(0, 10, 11);
        // 328 ticks into the receive slot, about 10ms.
        p.rx_timer = p.rx_slot_reference + 328;
        let sample = c.ingest(&p).unwrap();
        let expected = 15_000_000 + 328 * 1_000_000_000 / u64::from(HZ);
        assert_eq!(sample.latency_ns, expected);
    }

    #[test]
    fn test_gap_and_duplicate_detection() {
        let mut c = collector();
        c.ingest(&packet(0, 0, 1)).unwrap();
        c.ingest(&packet(1, 0, 1)).unwrap();
        let sample = c.ingest(&packet(4, 0, 1)).unwrap();
        assert_eq!(sample.gap, 2);
        c.ingest(&packet(4, 0, 1)).unwrap();
        c.ingest(&packet(3, 0, 1)).unwrap();

        let report = c.report();
        assert_eq!(report.received, 5);
        assert_eq!(report.lost, 2);
        assert_eq!(report.duplicates, 2);
        assert_eq!(c.last_sequence(), Some(4));
    }

    #[test]
    fn test_sequence_wraps() {
        let mut c = collector();
        c.ingest(&packet(u16::MAX - 1, 0, 1)).unwrap();
        c.ingest(&packet(u16::MAX, 0, 1)).unwrap();
        let sample = c.ingest(&packet(0, 0, 1)).unwrap();
        assert_eq!(sample.gap, 0);
        assert_eq!(c.report().lost, 0);
        assert_eq!(c.report().duplicates, 0);
    }

    #[test]
    fn test_malformed_counted() {
        let mut c = collector();
        let mut p = packet(0, 0, 1);
        p.payload.truncate(10);
        assert!(c.ingest(&p).is_err());
        assert_eq!(c.report().malformed, 1);
        assert_eq!(c.report().received, 0);
    }

    #[test]
    fn test_receive_read_across_slot_boundary_discarded() {
        let mut c = collector();
        c.ingest(&packet(0, 10, 20)).unwrap();

        // Trigger 10 ticks into slot 10; the root read its timer just before
        // the slot boundary and the slot reference just after it.
        let mut p = packet(1, 10, 20);
        let mut datagram = ProbeDatagram::decode(&p.payload).unwrap();
        datagram.timer = 4_925;
        datagram.slot_reference = 4_915;
        p.payload = datagram.encode().to_vec();
        p.rx_timer = 10_320;
        p.rx_slot_reference = 10_321;

        let err = c.ingest(&p).unwrap_err();
        assert!(matches!(err, ProbeError::InconsistentTiming { offset: u32::MAX, .. }));
        c.ingest(&packet(2, 10, 20)).unwrap();

        let report = c.report();
        assert_eq!(report.received, 2);
        assert_eq!(report.inconsistent, 1);
        assert_eq!(report.lost, 0);
        assert_eq!(report.latency.max_ns, Some(150_000_000));
        assert_eq!(c.last_sequence(), Some(2));
    }

    #[test]
    fn test_trigger_read_across_slot_boundary_discarded() {
        let mut c = collector();
        let mut p = packet(0, 10, 12);
        let mut datagram = ProbeDatagram::decode(&p.payload).unwrap();
        // Slot reference taken after the timer, from the following slot.
        datagram.timer = 5_406;
        datagram.slot_reference = 5_407;
        p.payload = datagram.encode().to_vec();

        assert!(c.ingest(&p).is_err());
        let report = c.report();
        assert_eq!(report.inconsistent, 1);
        assert_eq!(report.received, 0);
        assert_eq!(report.latency.min_ns, None);
        assert_eq!(c.metrics().total(), 0);
    }

    #[test]
    fn test_offset_at_slot_end_accepted() {
        let mut c = collector();
        let mut p = packet(0, 10, 11);
        // 15 ms at 32768 Hz is 491.52 ticks.
        p.rx_timer = p.rx_slot_reference + 492;
        assert!(c.ingest(&p).is_ok());
        p.rx_timer = p.rx_slot_reference + 493;
        assert!(c.ingest(&packet(1, 10, 11)).is_ok());
        assert!(c.ingest(&p).is_err());
        assert_eq!(c.report().inconsistent, 1);
    }

    #[test]
    fn test_report_percentiles() {
        let mut c = collector();
        for seq in 0..10u16 {
            c.ingest(&packet(seq, 0, u64::from(seq) + 1)).unwrap();
        }
        let report = c.report();
        assert_eq!(report.percentiles.len(), 3);
        assert_eq!(report.latency.min_ns, Some(15_000_000));
        assert_eq!(report.latency.max_ns, Some(150_000_000));
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"lost\":0"));
    }
}
