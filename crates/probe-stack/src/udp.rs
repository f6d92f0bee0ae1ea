//! UDP transport: port registration, send path and completion events.
//!
//! [`SimulatedUdp`] keeps accepted packets in flight until the stack is
//! polled, then reports a [`UdpEvent::SendDone`] whose status comes from the
//! configured [`LinkConfig`]. Successfully delivered packets leave as
//! [`AirFrame`]s carrying the UDP header and payload.

use crate::clock::Asn;
use crate::queue::PacketBuffer;
use probe_common::{ComponentId, L3Address, LinkConfig, ProbeError, ProbeResult, IANA_UDP};
use serde::Serialize;
use std::collections::VecDeque;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Length of the UDP header.
pub const UDP_HEADER_LEN: usize = 8;

/// What a resource asks for when it registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpResourceDesc {
    /// Port to bind.
    pub port: u16,
    /// Owning component.
    pub component: ComponentId,
}

/// Handle to a bound port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Registration {
    /// Bound port.
    pub port: u16,
    /// Owning component.
    pub component: ComponentId,
}

/// Final outcome of an accepted send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SendStatus {
    /// The packet left the node.
    Success,
    /// The lower layers gave up on the packet.
    Fail,
}

/// A packet the transport refused, handed back to the caller.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct Rejected {
    /// The refused buffer; the caller still owns it.
    pub buffer: PacketBuffer,
    /// Why it was refused.
    #[source]
    pub error: ProbeError,
}

impl Rejected {
    /// Take the buffer back.
    #[must_use]
    pub fn into_buffer(self) -> PacketBuffer {
        self.buffer
    }
}

/// Asynchronous notification from the transport.
#[derive(Debug)]
pub enum UdpEvent {
    /// An accepted send finished.
    SendDone {
        /// Source port of the sent packet.
        port: u16,
        /// The sent buffer, returned for release.
        buffer: PacketBuffer,
        /// Final outcome.
        status: SendStatus,
    },
    /// A packet arrived for a registered port.
    Received {
        /// Destination port.
        port: u16,
        /// The received buffer; the handler owns it now.
        buffer: PacketBuffer,
    },
}

/// A datagram as it travels between nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AirFrame {
    /// Network destination.
    #[serde(skip)]
    pub destination: L3Address,
    /// UDP header followed by the payload.
    pub datagram: Vec<u8>,
    /// Slot in which the frame was transmitted.
    pub tx_asn: Asn,
}

/// Build a UDP header (checksum left zero).
#[must_use]
pub fn encode_udp_header(source: u16, destination: u16, payload_len: usize) -> [u8; UDP_HEADER_LEN] {
    let len = u16::try_from(payload_len + UDP_HEADER_LEN).unwrap_or(u16::MAX);
    let mut header = [0u8; UDP_HEADER_LEN];
    header[0..2].copy_from_slice(&source.to_be_bytes());
    header[2..4].copy_from_slice(&destination.to_be_bytes());
    header[4..6].copy_from_slice(&len.to_be_bytes());
    header
}

/// Parse a UDP header, returning `(source, destination, payload_len)`.
///
/// # Errors
///
/// Returns [`ProbeError::Malformed`] if the datagram is shorter than its
/// header or than the length the header claims.
pub fn parse_udp_header(datagram: &[u8]) -> ProbeResult<(u16, u16, usize)> {
    if datagram.len() < UDP_HEADER_LEN {
        return Err(ProbeError::Malformed(format!(
            "UDP datagram of {} bytes is shorter than its header",
            datagram.len()
        )));
    }
    let source = u16::from_be_bytes([datagram[0], datagram[1]]);
    let destination = u16::from_be_bytes([datagram[2], datagram[3]]);
    let len = usize::from(u16::from_be_bytes([datagram[4], datagram[5]]));
    if len < UDP_HEADER_LEN || len > datagram.len() {
        return Err(ProbeError::Malformed(format!(
            "UDP length {len} does not fit a {}-byte datagram",
            datagram.len()
        )));
    }
    Ok((source, destination, len - UDP_HEADER_LEN))
}

/// Transport counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UdpStats {
    /// Sends accepted.
    pub accepted: u64,
    /// Sends rejected synchronously.
    pub rejected: u64,
    /// Completions reported as success.
    pub completed_ok: u64,
    /// Completions reported as failure.
    pub completed_fail: u64,
    /// Packets delivered to a registered port.
    pub received: u64,
}

/// In-memory UDP transport.
#[derive(Debug)]
pub struct SimulatedUdp {
    resources: Vec<Registration>,
    in_flight: VecDeque<PacketBuffer>,
    received: VecDeque<PacketBuffer>,
    link: LinkConfig,
    /// Completions issued, drives the lossy link.
    completions: u64,
    forced_rejections: u32,
    stats: UdpStats,
}

impl SimulatedUdp {
    /// Create a transport with the given link model.
    #[must_use]
    pub fn new(link: LinkConfig) -> Self {
        Self {
            resources: Vec::new(),
            in_flight: VecDeque::new(),
            received: VecDeque::new(),
            link,
            completions: 0,
            forced_rejections: 0,
            stats: UdpStats::default(),
        }
    }

    /// Counters.
    #[must_use]
    pub fn stats(&self) -> UdpStats {
        self.stats
    }

    /// Packets accepted but not yet completed.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether `port` has a registered resource.
    #[must_use]
    pub fn is_registered(&self, port: u16) -> bool {
        self.resources.iter().any(|r| r.port == port)
    }

    /// Refuse the next `count` sends synchronously.
    pub fn reject_next(&mut self, count: u32) {
        self.forced_rejections = count;
    }

    /// Bind a resource to its port.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::PortInUse`] if the port is taken.
    pub fn register(&mut self, desc: UdpResourceDesc) -> ProbeResult<Registration> {
        if self.is_registered(desc.port) {
            return Err(ProbeError::PortInUse(desc.port));
        }
        let registration = Registration {
            port: desc.port,
            component: desc.component,
        };
        self.resources.push(registration);
        debug!(port = desc.port, component = %desc.component, "UDP resource registered");
        Ok(registration)
    }

    /// Unbind a resource.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::UnknownPort`] if nothing matching is bound.
    pub fn unregister(&mut self, registration: &Registration) -> ProbeResult<()> {
        let before = self.resources.len();
        self.resources.retain(|r| r != registration);
        if self.resources.len() == before {
            return Err(ProbeError::UnknownPort(registration.port));
        }
        debug!(port = registration.port, "UDP resource unregistered");
        Ok(())
    }

    /// Accept a packet for transmission or hand it back.
    ///
    /// # Errors
    ///
    /// Returns the buffer inside [`Rejected`] if sends are being forced to
    /// fail, the protocol is not UDP, the source port is not registered, or
    /// the header does not fit in the headroom.
    pub fn send(&mut self, mut buffer: PacketBuffer) -> Result<(), Rejected> {
        let refuse = |buffer: PacketBuffer, error: ProbeError| -> Result<(), Rejected> {
            warn!(%error, "UDP send rejected");
            Err(Rejected { buffer, error })
        };

        if self.forced_rejections > 0 {
            self.forced_rejections -= 1;
            self.stats.rejected += 1;
            return refuse(buffer, ProbeError::SendRejected("transmit queue full".into()));
        }
        if buffer.l4_protocol != IANA_UDP {
            self.stats.rejected += 1;
            let error = ProbeError::SendRejected(format!(
                "protocol {} is not UDP",
                buffer.l4_protocol
            ));
            return refuse(buffer, error);
        }
        if !self.is_registered(buffer.l4_source_port) {
            self.stats.rejected += 1;
            let error = ProbeError::UnknownPort(buffer.l4_source_port);
            return refuse(buffer, error);
        }

        let header = encode_udp_header(
            buffer.l4_source_port,
            buffer.l4_destination_port,
            buffer.len(),
        );
        if let Err(error) = buffer.push_front(&header) {
            self.stats.rejected += 1;
            return refuse(buffer, error);
        }

        buffer.owner = ComponentId::OpenUdp;
        self.stats.accepted += 1;
        trace!(slot = buffer.slot(), len = buffer.len(), "UDP packet accepted");
        self.in_flight.push_back(buffer);
        Ok(())
    }

    /// Queue a datagram arriving from below for its registered port.
    ///
    /// The buffer's payload must start with the UDP header; it is stripped.
    ///
    /// # Errors
    ///
    /// Returns the buffer inside [`Rejected`] if the header is malformed or
    /// the destination port has no resource.
    pub fn deliver(&mut self, mut buffer: PacketBuffer) -> Result<(), Rejected> {
        let (source, destination, payload_len) = match parse_udp_header(buffer.payload()) {
            Ok(parsed) => parsed,
            Err(error) => return Err(Rejected { buffer, error }),
        };
        if !self.is_registered(destination) {
            return Err(Rejected {
                buffer,
                error: ProbeError::UnknownPort(destination),
            });
        }
        if let Err(error) = buffer.pop_front(UDP_HEADER_LEN) {
            return Err(Rejected { buffer, error });
        }
        let trailing = buffer.len() - payload_len;
        if trailing > 0 {
            trace!(trailing, "ignoring bytes beyond the UDP length");
        }

        buffer.l4_protocol = IANA_UDP;
        buffer.l4_source_port = source;
        buffer.l4_destination_port = destination;
        self.stats.received += 1;
        self.received.push_back(buffer);
        Ok(())
    }

    /// Complete the oldest in-flight send, or hand out the oldest reception.
    ///
    /// A successful completion also yields the frame that went on the air.
    pub fn poll(&mut self, asn: Asn) -> Option<(UdpEvent, Option<AirFrame>)> {
        if let Some(buffer) = self.in_flight.pop_front() {
            self.completions += 1;
            let status = match self.link {
                LinkConfig::Lossy { fail_every } if fail_every > 0
                    && self.completions % u64::from(fail_every) == 0 =>
                {
                    SendStatus::Fail
                }
                _ => SendStatus::Success,
            };

            let frame = match status {
                SendStatus::Success => {
                    self.stats.completed_ok += 1;
                    Some(AirFrame {
                        destination: buffer.l3_destination,
                        datagram: buffer.payload().to_vec(),
                        tx_asn: asn,
                    })
                }
                SendStatus::Fail => {
                    self.stats.completed_fail += 1;
                    None
                }
            };

            let port = buffer.l4_source_port;
            return Some((UdpEvent::SendDone { port, buffer, status }, frame));
        }

        self.received.pop_front().map(|buffer| {
            let port = buffer.l4_destination_port;
            (UdpEvent::Received { port, buffer }, None)
        })
    }
}
