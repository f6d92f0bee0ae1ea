//! Host network stack abstractions for the latency probe.
//!
//! This crate provides:
//! - collaborator traits the probe core talks to ([`BufferProvider`],
//!   [`UdpTransport`], [`TimeOracle`], [`IdentityOracle`], [`ErrorReporter`],
//!   [`Bridge`], [`DebugPins`]) and the umbrella [`HostStack`]
//! - [`queue`] with the fixed-size packet buffer pool
//! - [`udp`] with the port registration table and the simulated transport
//! - [`clock`] with the TSCH absolute slot number and network clock
//! - [`gpio`] with the interrupt-capable trigger line
//! - [`sim`] with [`SimulatedStack`], an in-memory stack for tests and the daemon

pub mod bridge;
pub mod clock;
pub mod gpio;
pub mod queue;
pub mod serial;
#[cfg(feature = "simulated")]
pub mod sim;
pub mod udp;

pub use bridge::*;
pub use clock::*;
pub use gpio::*;
pub use queue::*;
pub use serial::*;
#[cfg(feature = "simulated")]
pub use sim::*;
pub use udp::*;

use probe_common::{ComponentId, ErrorCode, ProbeResult};

/// Allocation of fixed-size packet buffers.
pub trait BufferProvider {
    /// Take a free buffer, tagging it with the requesting component.
    fn acquire(&mut self, component: ComponentId) -> Option<PacketBuffer>;

    /// Return a buffer to the pool.
    fn release(&mut self, buffer: PacketBuffer);
}

/// UDP transport layer.
pub trait UdpTransport {
    /// Bind a resource to a port.
    ///
    /// # Errors
    ///
    /// Returns [`probe_common::ProbeError::PortInUse`] if the port is taken.
    fn register(&mut self, desc: UdpResourceDesc) -> ProbeResult<Registration>;

    /// Remove a previously registered resource.
    ///
    /// # Errors
    ///
    /// Returns [`probe_common::ProbeError::UnknownPort`] if nothing is bound.
    fn unregister(&mut self, registration: &Registration) -> ProbeResult<()>;

    /// Hand a packet to the transport.
    ///
    /// On success the transport owns the buffer until it reports a
    /// [`UdpEvent::SendDone`]. On synchronous rejection the buffer comes
    /// straight back inside [`Rejected`] and no completion follows.
    ///
    /// # Errors
    ///
    /// Returns the rejected buffer together with the reason.
    fn send(&mut self, buffer: PacketBuffer) -> Result<(), Rejected>;

    /// Next pending completion or reception, if any.
    fn poll_event(&mut self) -> Option<UdpEvent>;
}

/// Timing references maintained by the MAC layer.
pub trait TimeOracle {
    /// Current value of the free-running timer.
    fn timer_value(&self) -> u32;

    /// Timer value captured at the start of the current slot.
    fn slot_reference(&self) -> u32;

    /// Absolute slot number, five bytes in MAC order.
    fn asn_bytes(&self) -> [u8; ASN_LEN];
}

/// Network role and synchronization state.
pub trait IdentityOracle {
    /// Whether the node is synchronized to the network.
    fn is_synchronized(&self) -> bool;

    /// Whether the node is the network root.
    fn is_root(&self) -> bool;
}

/// Serial error channel.
pub trait ErrorReporter {
    /// Report an error with two numeric parameters.
    fn print_error(&mut self, component: ComponentId, code: ErrorCode, arg1: u16, arg2: u16);
}

/// Onward delivery of inbound packets towards the host.
pub trait Bridge {
    /// Take ownership of a received packet.
    fn bridge_receive(&mut self, buffer: PacketBuffer);
}

/// Debug pins toggled for external timing capture.
pub trait DebugPins {
    /// Toggle the packet-creation pin.
    fn toggle_pkt(&mut self);

    /// Toggle the reception pin.
    fn toggle_exp(&mut self);
}

/// Every collaborator the probe core needs, in one bound.
pub trait HostStack:
    BufferProvider + UdpTransport + TimeOracle + IdentityOracle + ErrorReporter + Bridge + DebugPins
{
}

impl<T> HostStack for T where
    T: BufferProvider
        + UdpTransport
        + TimeOracle
        + IdentityOracle
        + ErrorReporter
        + Bridge
        + DebugPins
{
}
