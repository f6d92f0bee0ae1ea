//! Bridge towards the host: inbound packets leave the mesh here.

use crate::clock::Asn;
use serde::Serialize;
use std::collections::VecDeque;

/// A packet handed to the bridge, with the arrival time references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgedPacket {
    /// UDP source port.
    pub source_port: u16,
    /// UDP destination port.
    pub destination_port: u16,
    /// UDP payload.
    pub payload: Vec<u8>,
    /// Slot in which the packet reached the bridge.
    pub rx_asn: Asn,
    /// Free-running timer value at arrival.
    pub rx_timer: u32,
    /// Slot reference at arrival.
    pub rx_slot_reference: u32,
}

/// Queue of bridged packets waiting for the host side to pick them up.
#[derive(Debug, Default)]
pub struct BridgeLog {
    pending: VecDeque<BridgedPacket>,
    forwarded: u64,
}

impl BridgeLog {
    /// Create an empty bridge.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a packet for the host.
    pub fn push(&mut self, packet: BridgedPacket) {
        self.forwarded += 1;
        self.pending.push_back(packet);
    }

    /// Take every queued packet.
    pub fn drain(&mut self) -> Vec<BridgedPacket> {
        self.pending.drain(..).collect()
    }

    /// Packets ever forwarded.
    #[must_use]
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }
}
