use crate::net::ComponentId;
use thiserror::Error;

/// Probe error types covering configuration, stack resources and wire decoding.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProbeError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The packet pool has no free buffer.
    #[error("no free packet buffer (requested by {component})")]
    NoFreeBuffer {
        /// Component that asked for the buffer.
        component: ComponentId,
    },

    /// The scheduler task queue is full.
    #[error("task queue full ({depth} entries)")]
    QueueFull {
        /// Configured queue depth.
        depth: usize,
    },

    /// The transport refused a packet synchronously.
    #[error("send rejected: {0}")]
    SendRejected(String),

    /// A resource is already registered on this port.
    #[error("port {0} already registered")]
    PortInUse(u16),

    /// No resource is registered on this port.
    #[error("no resource registered on port {0}")]
    UnknownPort(u16),

    /// A payload does not fit in the buffer.
    #[error("payload of {len} bytes exceeds {available} bytes of headroom")]
    PayloadTooLarge {
        /// Requested length.
        len: usize,
        /// Space left in front of the current payload.
        available: usize,
    },

    /// A received payload is not a well-formed probe datagram.
    #[error("malformed datagram: {0}")]
    Malformed(String),

    /// A timer snapshot lies outside the slot it was paired with.
    #[error("timer offset {offset} ticks exceeds the {slot_ticks}-tick slot")]
    InconsistentTiming {
        /// Timer minus slot reference, modulo 2^32.
        offset: u32,
        /// Timer ticks per slot.
        slot_ticks: u32,
    },

    /// Invalid GPIO pin configuration.
    #[error("pin configuration error: {0}")]
    Pin(String),
}

/// Convenience type alias for probe operations.
pub type ProbeResult<T> = Result<T, ProbeError>;
