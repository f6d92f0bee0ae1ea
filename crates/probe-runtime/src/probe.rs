//! Latency probe core.
//!
//! A rising edge on the trigger line runs [`ProbeInterrupt::on_edge`], which
//! clears the latch and queues the probe task. The task later calls
//! [`LatencyProbe::run_task`]:
//!
//! 1. gate on synchronization, then on the node not being the root
//! 2. read the timer, then the slot reference
//! 3. take a packet buffer, or report exhaustion and give up
//! 4. fill in UDP metadata and the collector address
//! 5. write the datagram, consume a sequence number, hand it to UDP
//!
//! Every buffer taken in step 3 is released exactly once: right away when
//! assembly fails or the transport refuses it, otherwise by
//! [`LatencyProbe::send_done`] when the transport reports completion.

use crate::scheduler::{SchedulerHandle, TaskCallback, TaskPriority};
use crate::wire::{ProbeDatagram, TimingSnapshot};
use probe_common::{ComponentId, ErrorCode, L3Address, ProbeResult, ProbeSettings, IANA_UDP};
use probe_stack::{
    Bridge, BufferProvider, DebugPins, Edge, EdgeHandler, HostStack, PacketBuffer, Registration,
    SendStatus, TimeOracle, TriggerLine, UdpResourceDesc, UdpTransport,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Why a probe task ended without sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Suppression {
    /// The node is not synchronized to the network.
    NotSynchronized,
    /// The node is the network root.
    Root,
}

/// What one probe task did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// A gate failed; nothing was touched.
    Suppressed {
        /// Failing gate.
        reason: Suppression,
    },
    /// The pool had no free buffer.
    NoBuffer,
    /// The datagram did not fit in the buffer.
    AssemblyFailed,
    /// The transport accepted the datagram.
    Sent {
        /// Sequence number carried.
        sequence: u16,
    },
    /// The transport refused the datagram; its buffer was released.
    Rejected {
        /// Sequence number consumed.
        sequence: u16,
    },
}

/// Probe counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProbeStats {
    /// Task runs.
    pub triggers: u64,
    /// Runs stopped because the node was not synchronized.
    pub not_synchronized: u64,
    /// Runs stopped because the node is the root.
    pub root: u64,
    /// Runs that found no free buffer.
    pub no_buffer: u64,
    /// Datagrams that did not fit their buffer.
    pub assembly_failed: u64,
    /// Datagrams accepted by the transport.
    pub sent: u64,
    /// Datagrams refused synchronously.
    pub rejected: u64,
    /// Completions reported as delivered.
    pub completed_ok: u64,
    /// Completions reported as failed.
    pub completed_fail: u64,
    /// Datagrams received on the probe port.
    pub received: u64,
}

/// Probe state: the sequence counter and the port registration.
#[derive(Debug)]
pub struct LatencyProbe {
    port: u16,
    destination: L3Address,
    priority: TaskPriority,
    counter: u16,
    registration: Option<Registration>,
    stats: ProbeStats,
}

impl LatencyProbe {
    /// Register the probe port with the transport.
    ///
    /// # Errors
    ///
    /// Returns [`probe_common::ProbeError::PortInUse`] if the port is taken.
    pub fn init<S: UdpTransport + ?Sized>(
        settings: &ProbeSettings,
        stack: &mut S,
    ) -> ProbeResult<Self> {
        let registration = stack.register(UdpResourceDesc {
            port: settings.port,
            component: ComponentId::Llatency,
        })?;
        info!(
            port = settings.port,
            destination = %settings.destination,
            priority = %settings.priority,
            "latency probe registered"
        );
        Ok(Self {
            port: settings.port,
            destination: L3Address::from(settings.destination),
            priority: settings.priority,
            counter: 0,
            registration: Some(registration),
            stats: ProbeStats::default(),
        })
    }

    /// Unregister the probe port. Further calls do nothing.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the registration was already gone.
    pub fn shutdown<S: UdpTransport + ?Sized>(&mut self, stack: &mut S) -> ProbeResult<()> {
        if let Some(registration) = self.registration.take() {
            stack.unregister(&registration)?;
            info!(port = registration.port, "latency probe unregistered");
        }
        Ok(())
    }

    /// Sequence number the next datagram will carry.
    #[must_use]
    pub fn counter(&self) -> u16 {
        self.counter
    }

    /// Current port registration.
    #[must_use]
    pub fn registration(&self) -> Option<&Registration> {
        self.registration.as_ref()
    }

    /// Priority class of the probe task.
    #[must_use]
    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    /// Counters.
    #[must_use]
    pub fn stats(&self) -> ProbeStats {
        self.stats
    }

    /// Body of the probe task.
    pub fn run_task<S: HostStack + ?Sized>(&mut self, stack: &mut S) -> ProbeOutcome {
        self.stats.triggers += 1;
        stack.toggle_pkt();

        if !stack.is_synchronized() {
            self.stats.not_synchronized += 1;
            debug!("probe suppressed: not synchronized");
            return ProbeOutcome::Suppressed {
                reason: Suppression::NotSynchronized,
            };
        }
        if stack.is_root() {
            self.stats.root += 1;
            debug!("probe suppressed: node is root");
            return ProbeOutcome::Suppressed {
                reason: Suppression::Root,
            };
        }

        let snapshot = TimingSnapshot {
            timer: stack.timer_value(),
            slot_reference: stack.slot_reference(),
        };

        let Some(mut buffer) = stack.acquire(ComponentId::Llatency) else {
            self.stats.no_buffer += 1;
            stack.print_error(ComponentId::Llatency, ErrorCode::NoFreePacketBuffer, 0, 0);
            return ProbeOutcome::NoBuffer;
        };

        buffer.owner = ComponentId::Llatency;
        buffer.creator = ComponentId::Llatency;
        buffer.l4_protocol = IANA_UDP;
        buffer.l4_source_port = self.port;
        buffer.l4_destination_port = self.port;
        buffer.l3_destination = self.destination;

        let datagram = ProbeDatagram::new(self.counter, stack.asn_bytes(), snapshot);
        if let Err(error) = datagram.write_to(&mut buffer) {
            self.stats.assembly_failed += 1;
            warn!(%error, "probe datagram does not fit its buffer");
            let capacity = u16::try_from(buffer.capacity()).unwrap_or(u16::MAX);
            stack.release(buffer);
            stack.print_error(ComponentId::Llatency, ErrorCode::PayloadOverflow, capacity, 0);
            return ProbeOutcome::AssemblyFailed;
        }

        let sequence = self.counter;
        self.counter = self.counter.wrapping_add(1);

        match stack.send(buffer) {
            Ok(()) => {
                self.stats.sent += 1;
                trace!(
                    sequence,
                    timer = snapshot.timer,
                    slot_reference = snapshot.slot_reference,
                    "probe sent"
                );
                ProbeOutcome::Sent { sequence }
            }
            Err(rejected) => {
                self.stats.rejected += 1;
                warn!(sequence, error = %rejected.error, "probe send rejected");
                stack.release(rejected.into_buffer());
                ProbeOutcome::Rejected { sequence }
            }
        }
    }

    /// Completion of an accepted send: release the buffer, whatever the status.
    pub fn send_done<S: BufferProvider + ?Sized>(
        &mut self,
        stack: &mut S,
        buffer: PacketBuffer,
        status: SendStatus,
    ) {
        match status {
            SendStatus::Success => self.stats.completed_ok += 1,
            SendStatus::Fail => {
                self.stats.completed_fail += 1;
                debug!(slot = buffer.slot(), "probe datagram was not delivered");
            }
        }
        stack.release(buffer);
    }

    /// A datagram arrived on the probe port: toggle the reception pin and
    /// hand it to the bridge, which takes ownership.
    pub fn receive<S: DebugPins + Bridge + ?Sized>(&mut self, stack: &mut S, buffer: PacketBuffer) {
        self.stats.received += 1;
        stack.toggle_exp();
        stack.bridge_receive(buffer);
    }

    /// Current timer and slot reference, ungated.
    #[must_use]
    pub fn get_values<S: TimeOracle + ?Sized>(&self, stack: &S) -> TimingSnapshot {
        TimingSnapshot {
            timer: stack.timer_value(),
            slot_reference: stack.slot_reference(),
        }
    }
}

/// Edge handler that defers the probe to the scheduler.
pub struct ProbeInterrupt<C> {
    handle: SchedulerHandle<C>,
    task: TaskCallback<C>,
    priority: TaskPriority,
}

impl<C> std::fmt::Debug for ProbeInterrupt<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeInterrupt")
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

impl<C: 'static> ProbeInterrupt<C> {
    /// Create a handler posting `task` at `priority`.
    #[must_use]
    pub fn new(handle: SchedulerHandle<C>, task: TaskCallback<C>, priority: TaskPriority) -> Self {
        Self {
            handle,
            task,
            priority,
        }
    }

    /// Configure `line` for rising edges, attach this handler and unmask it.
    ///
    /// # Errors
    ///
    /// Returns [`probe_common::ProbeError::Pin`] if the line is already live.
    pub fn install(self, line: &TriggerLine) -> ProbeResult<Arc<Self>> {
        let handler = Arc::new(self);
        line.set_edge(Edge::Rising);
        line.attach(handler.clone())?;
        line.enable_interrupt()?;
        info!(pin = line.pin(), priority = %handler.priority, "probe trigger armed");
        Ok(handler)
    }
}

impl<C: 'static> EdgeHandler for ProbeInterrupt<C> {
    fn on_edge(&self, line: &TriggerLine) {
        line.clear_interrupt();
        // Overflow is counted by the scheduler.
        let _ = self.handle.push_task(self.task, self.priority);
        self.handle.wakeup();
    }
}
