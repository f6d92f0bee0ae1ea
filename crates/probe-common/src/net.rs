//! Network-stack identifiers shared by the probe and its host stack.
//!
//! Component tags, error codes reported over the serial error channel,
//! transport constants and the fixed collector address.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv6Addr;

/// IANA protocol number for UDP.
pub const IANA_UDP: u8 = 17;

/// IANA protocol number for ICMPv6.
pub const IANA_ICMPV6: u8 = 58;

/// Well-known UDP port used for injected application traffic.
pub const WKP_UDP_INJECT: u16 = 61618;

/// Address of the collector mote. The last four bytes identify the receiving mote.
pub const LLATENCY_DST_ADDR: [u8; 16] = [
    0xbb, 0xbb, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x12, 0x4b, 0x00, 0x03, 0xa5, 0x90, 0xd5,
];

/// Stack component that owns or created a packet buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ComponentId {
    /// Unowned buffer sitting in the pool.
    Null = 0x00,
    /// Packet buffer pool.
    OpenQueue = 0x02,
    /// TSCH MAC layer.
    Ieee154e = 0x0a,
    /// Serial bridge towards the host.
    OpenBridge = 0x19,
    /// UDP transport.
    OpenUdp = 0x1e,
    /// Latency probe application.
    Llatency = 0x2b,
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "NULL",
            Self::OpenQueue => "OPENQUEUE",
            Self::Ieee154e => "IEEE802154E",
            Self::OpenBridge => "OPENBRIDGE",
            Self::OpenUdp => "OPENUDP",
            Self::Llatency => "LLATENCY",
        };
        f.write_str(name)
    }
}

/// Error codes carried by serial error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ErrorCode {
    /// The packet pool had no free buffer.
    NoFreePacketBuffer = 0x1b,
    /// A packet reached the transport with a foreign protocol number.
    WrongTransportProtocol = 0x1c,
    /// No resource is registered for the packet's port.
    UnknownPort = 0x1d,
    /// A payload did not fit in the remaining buffer headroom.
    PayloadOverflow = 0x1e,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoFreePacketBuffer => "no free packet buffer",
            Self::WrongTransportProtocol => "wrong transport protocol",
            Self::UnknownPort => "unknown port",
            Self::PayloadOverflow => "payload overflow",
        };
        f.write_str(name)
    }
}

/// Layer-3 destination of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum L3Address {
    /// No address assigned yet.
    #[default]
    None,
    /// Full 128-bit IPv6 address.
    Addr128([u8; 16]),
}

impl L3Address {
    /// The 128-bit address bytes, if one is set.
    #[must_use]
    pub fn as_128b(&self) -> Option<&[u8; 16]> {
        match self {
            Self::None => None,
            Self::Addr128(bytes) => Some(bytes),
        }
    }
}

impl From<Ipv6Addr> for L3Address {
    fn from(addr: Ipv6Addr) -> Self {
        Self::Addr128(addr.octets())
    }
}

impl fmt::Display for L3Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Addr128(bytes) => write!(f, "{}", Ipv6Addr::from(*bytes)),
        }
    }
}

/// Default collector address as an [`Ipv6Addr`].
#[must_use]
pub fn default_destination() -> Ipv6Addr {
    Ipv6Addr::from(LLATENCY_DST_ADDR)
}
