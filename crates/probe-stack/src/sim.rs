//! In-memory host stack.
//!
//! [`SimulatedStack`] wires a packet pool, the simulated UDP transport, a
//! shared [`NetworkClock`], the serial error log, the bridge and the debug
//! pins into one value implementing every collaborator trait.

use crate::bridge::{BridgeLog, BridgedPacket};
use crate::clock::{NetworkClock, ASN_LEN};
use crate::gpio::DebugPinState;
use crate::queue::{PacketBuffer, PacketPool, PoolStats};
use crate::serial::SerialLog;
use crate::udp::{AirFrame, Registration, Rejected, SimulatedUdp, UdpEvent, UdpResourceDesc};
use crate::{
    Bridge, BufferProvider, DebugPins, ErrorReporter, IdentityOracle, TimeOracle, UdpTransport,
};
use probe_common::{ComponentId, ErrorCode, ProbeError, ProbeResult, StackConfig};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info};

/// Simulated node stack.
#[derive(Debug)]
pub struct SimulatedStack {
    pool: PacketPool,
    udp: SimulatedUdp,
    clock: Arc<NetworkClock>,
    synchronized: bool,
    root: bool,
    serial: SerialLog,
    bridge: BridgeLog,
    pins: DebugPinState,
    air: VecDeque<AirFrame>,
}

impl SimulatedStack {
    /// Build a stack from configuration, sharing `clock` with other nodes.
    #[must_use]
    pub fn new(config: &StackConfig, clock: Arc<NetworkClock>) -> Self {
        info!(
            buffers = config.buffer_count,
            buffer_size = config.buffer_size,
            link = ?config.link,
            "simulated stack created"
        );
        Self {
            pool: PacketPool::new(config.buffer_count, config.buffer_size),
            udp: SimulatedUdp::new(config.link),
            clock,
            synchronized: config.synchronized,
            root: false,
            serial: SerialLog::new(),
            bridge: BridgeLog::new(),
            pins: DebugPinState::default(),
            air: VecDeque::new(),
        }
    }

    /// Shared clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<NetworkClock> {
        &self.clock
    }

    /// Mark the node as (de)synchronized.
    pub fn set_synchronized(&mut self, synchronized: bool) {
        debug!(synchronized, "synchronization state changed");
        self.synchronized = synchronized;
    }

    /// Mark the node as network root.
    pub fn set_root(&mut self, root: bool) {
        self.root = root;
    }

    /// Pool counters.
    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Transport.
    #[must_use]
    pub fn udp(&self) -> &SimulatedUdp {
        &self.udp
    }

    /// Mutable transport, for fault injection.
    pub fn udp_mut(&mut self) -> &mut SimulatedUdp {
        &mut self.udp
    }

    /// Serial error log.
    #[must_use]
    pub fn serial(&self) -> &SerialLog {
        &self.serial
    }

    /// Bridge towards the host.
    pub fn bridge(&mut self) -> &mut BridgeLog {
        &mut self.bridge
    }

    /// Debug pin state.
    #[must_use]
    pub fn pins(&self) -> DebugPinState {
        self.pins
    }

    /// Frames that went on the air, oldest first.
    pub fn take_air_frames(&mut self) -> Vec<AirFrame> {
        self.air.drain(..).collect()
    }

    /// Hand a frame received over the air to the transport.
    ///
    /// The frame is copied into a fresh buffer. If that fails, or the
    /// transport refuses it, the buffer is released and the error reported
    /// on the serial channel.
    ///
    /// # Errors
    ///
    /// Returns the reason the frame was dropped.
    pub fn inject_rx(&mut self, frame: &AirFrame) -> ProbeResult<()> {
        let Some(mut buffer) = self.pool.acquire(ComponentId::OpenUdp) else {
            self.serial
                .print_error(ComponentId::OpenUdp, ErrorCode::NoFreePacketBuffer, 0, 0);
            return Err(ProbeError::NoFreeBuffer {
                component: ComponentId::OpenUdp,
            });
        };
        buffer.l3_destination = frame.destination;

        if let Err(error) = buffer.set_payload(&frame.datagram) {
            self.pool.release(buffer);
            self.serial.print_error(
                ComponentId::OpenUdp,
                ErrorCode::PayloadOverflow,
                u16::try_from(frame.datagram.len()).unwrap_or(u16::MAX),
                0,
            );
            return Err(error);
        }

        self.udp.deliver(buffer).map_err(|Rejected { buffer, error }| {
            let port = buffer.l4_destination_port;
            self.pool.release(buffer);
            if let ProbeError::UnknownPort(port) = error {
                self.serial
                    .print_error(ComponentId::OpenUdp, ErrorCode::UnknownPort, port, 0);
            } else {
                debug!(%error, port, "dropping malformed frame");
            }
            error
        })
    }
}

impl BufferProvider for SimulatedStack {
    fn acquire(&mut self, component: ComponentId) -> Option<PacketBuffer> {
        self.pool.acquire(component)
    }

    fn release(&mut self, buffer: PacketBuffer) {
        self.pool.release(buffer);
    }
}

impl UdpTransport for SimulatedStack {
    fn register(&mut self, desc: UdpResourceDesc) -> ProbeResult<Registration> {
        self.udp.register(desc)
    }

    fn unregister(&mut self, registration: &Registration) -> ProbeResult<()> {
        self.udp.unregister(registration)
    }

    fn send(&mut self, buffer: PacketBuffer) -> Result<(), Rejected> {
        self.udp.send(buffer)
    }

    fn poll_event(&mut self) -> Option<UdpEvent> {
        let (event, frame) = self.udp.poll(self.clock.asn())?;
        if let Some(frame) = frame {
            self.air.push_back(frame);
        }
        Some(event)
    }
}

impl TimeOracle for SimulatedStack {
    fn timer_value(&self) -> u32 {
        self.clock.timer_value()
    }

    fn slot_reference(&self) -> u32 {
        self.clock.slot_reference()
    }

    fn asn_bytes(&self) -> [u8; ASN_LEN] {
        self.clock.asn().to_bytes()
    }
}

impl IdentityOracle for SimulatedStack {
    fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    fn is_root(&self) -> bool {
        self.root
    }
}

impl ErrorReporter for SimulatedStack {
    fn print_error(&mut self, component: ComponentId, code: ErrorCode, arg1: u16, arg2: u16) {
        self.serial.print_error(component, code, arg1, arg2);
    }
}

impl Bridge for SimulatedStack {
    fn bridge_receive(&mut self, buffer: PacketBuffer) {
        self.bridge.push(BridgedPacket {
            source_port: buffer.l4_source_port,
            destination_port: buffer.l4_destination_port,
            payload: buffer.payload().to_vec(),
            rx_asn: self.clock.asn(),
            rx_timer: self.clock.timer_value(),
            rx_slot_reference: self.clock.slot_reference(),
        });
        self.pool.release(buffer);
    }
}

impl DebugPins for SimulatedStack {
    fn toggle_pkt(&mut self) {
        self.pins.toggle_pkt();
    }

    fn toggle_exp(&mut self) {
        self.pins.toggle_exp();
    }
}
