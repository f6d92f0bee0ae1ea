//! A node: the probe plus the host stack it runs on.

use crate::probe::{LatencyProbe, ProbeOutcome};
use crate::wire::TimingSnapshot;
use probe_common::{ComponentId, ErrorCode, ProbeResult, ProbeSettings};
use probe_stack::{HostStack, UdpEvent};
use tracing::warn;

/// Probe state and host stack, the context tasks run against.
#[derive(Debug)]
pub struct Node<S> {
    /// Probe state.
    pub probe: LatencyProbe,
    /// Host stack.
    pub stack: S,
}

impl<S: HostStack> Node<S> {
    /// Register the probe on `stack`.
    ///
    /// # Errors
    ///
    /// Returns the registration error from the transport.
    pub fn new(settings: &ProbeSettings, mut stack: S) -> ProbeResult<Self> {
        let probe = LatencyProbe::init(settings, &mut stack)?;
        Ok(Self { probe, stack })
    }

    /// Run the probe task body.
    pub fn run_probe(&mut self) -> ProbeOutcome {
        self.probe.run_task(&mut self.stack)
    }

    /// Ungated timing snapshot.
    #[must_use]
    pub fn get_values(&self) -> TimingSnapshot {
        self.probe.get_values(&self.stack)
    }

    /// Route every pending transport event to its handler.
    ///
    /// Events for ports the probe does not own are released here. Returns
    /// the number of events handled.
    pub fn dispatch_transport(&mut self) -> usize {
        let port = self.probe.registration().map(|r| r.port);
        let mut handled = 0;

        while let Some(event) = self.stack.poll_event() {
            handled += 1;
            match event {
                UdpEvent::SendDone {
                    port: p,
                    buffer,
                    status,
                } if Some(p) == port => self.probe.send_done(&mut self.stack, buffer, status),
                UdpEvent::Received { port: p, buffer } if Some(p) == port => {
                    self.probe.receive(&mut self.stack, buffer);
                }
                UdpEvent::SendDone { port: p, buffer, .. } => {
                    warn!(port = p, "completion for a port without a handler");
                    self.stack.release(buffer);
                }
                UdpEvent::Received { port: p, buffer } => {
                    self.stack
                        .print_error(ComponentId::OpenUdp, ErrorCode::UnknownPort, p, 0);
                    self.stack.release(buffer);
                }
            }
        }
        handled
    }

    /// Unregister the probe.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the registration was already gone.
    pub fn shutdown(&mut self) -> ProbeResult<()> {
        self.probe.shutdown(&mut self.stack)
    }
}

/// A task context that contains a probe node.
pub trait ProbeContext {
    /// Host stack of the node.
    type Stack: HostStack;

    /// The node the probe runs on.
    fn node(&mut self) -> &mut Node<Self::Stack>;
}

impl<S: HostStack> ProbeContext for Node<S> {
    type Stack = S;

    fn node(&mut self) -> &mut Node<S> {
        self
    }
}

/// Scheduler entry point of the probe.
pub fn probe_task<C: ProbeContext>(ctx: &mut C) {
    ctx.node().run_probe();
}

/// Scheduler entry point delivering transport events.
pub fn transport_task<C: ProbeContext>(ctx: &mut C) {
    ctx.node().dispatch_transport();
}
