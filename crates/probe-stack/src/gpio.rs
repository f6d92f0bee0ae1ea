//! GPIO trigger line with a latched edge interrupt.
//!
//! The line models one input pin: level changes are run through an edge
//! detector, a matching edge latches the interrupt flag, and if the
//! interrupt is enabled the attached [`EdgeHandler`] runs immediately on
//! the caller's thread, which plays the role of interrupt context.
//!
//! Delivery does not nest. An edge latched while the handler runs, from
//! any thread, is delivered again once the running handler returns.
//!
//! The handler must clear the latch before returning. A latch still set
//! after the handler returns, with no new edge since it was called, is
//! counted as a storm and is not re-delivered until the interrupt is
//! re-enabled.

use probe_common::{ProbeError, ProbeResult};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace, warn};

/// Edge that raises the interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum Edge {
    /// Low to high.
    Rising = 1,
    /// High to low.
    Falling = 2,
    /// Either transition.
    Both = 3,
}

impl Edge {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Rising),
            2 => Some(Self::Falling),
            3 => Some(Self::Both),
            _ => None,
        }
    }

    fn matches(self, rising: bool) -> bool {
        match self {
            Self::Rising => rising,
            Self::Falling => !rising,
            Self::Both => true,
        }
    }
}

/// Code run in interrupt context when the line fires.
pub trait EdgeHandler: Send + Sync {
    /// Called with the line whose latch is set.
    fn on_edge(&self, line: &TriggerLine);
}

/// Interrupt counters for a trigger line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LineStats {
    /// Matching edges seen.
    pub edges: u64,
    /// Handler invocations.
    pub delivered: u64,
    /// Handler returned with the latch still set.
    pub storms: u64,
}

/// An interrupt-capable GPIO input.
pub struct TriggerLine {
    pin: u8,
    /// Configured edge; 0 while the pin is not an interrupt input.
    edge: AtomicU8,
    /// Previous sampled level.
    level: AtomicBool,
    pending: AtomicBool,
    enabled: AtomicBool,
    /// Bumped on every latched edge.
    epoch: AtomicU64,
    /// Set while a handler runs.
    in_service: AtomicBool,
    handler: Mutex<Option<Arc<dyn EdgeHandler>>>,
    edges: AtomicU64,
    delivered: AtomicU64,
    storms: AtomicU64,
}

impl std::fmt::Debug for TriggerLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerLine")
            .field("pin", &self.pin)
            .field("edge", &self.edge())
            .field("pending", &self.is_pending())
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

impl TriggerLine {
    /// Create an unconfigured line for `pin`.
    #[must_use]
    pub fn new(pin: u8) -> Self {
        Self {
            pin,
            edge: AtomicU8::new(0),
            level: AtomicBool::new(false),
            pending: AtomicBool::new(false),
            enabled: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            in_service: AtomicBool::new(false),
            handler: Mutex::new(None),
            edges: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            storms: AtomicU64::new(0),
        }
    }

    /// Pin number.
    #[must_use]
    pub fn pin(&self) -> u8 {
        self.pin
    }

    /// Configured interrupt edge.
    #[must_use]
    pub fn edge(&self) -> Option<Edge> {
        Edge::from_u8(self.edge.load(Ordering::Acquire))
    }

    /// Make the pin an interrupt input on `edge`. Leaves the interrupt disabled.
    pub fn set_edge(&self, edge: Edge) {
        self.edge.store(edge as u8, Ordering::Release);
    }

    /// Attach the handler, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Pin`] if the interrupt is enabled, since the
    /// handler must not change under a live interrupt.
    pub fn attach(&self, handler: Arc<dyn EdgeHandler>) -> ProbeResult<()> {
        if self.is_enabled() {
            return Err(ProbeError::Pin(format!(
                "pin {} interrupt must be disabled before attaching a handler",
                self.pin
            )));
        }
        *self.handler.lock().unwrap_or_else(|e| e.into_inner()) = Some(handler);
        Ok(())
    }

    /// Remove the handler and disable the interrupt.
    pub fn detach(&self) {
        self.disable_interrupt();
        *self.handler.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Unmask the interrupt. An edge latched while masked is delivered now.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Pin`] if no edge is configured.
    pub fn enable_interrupt(&self) -> ProbeResult<()> {
        if self.edge().is_none() {
            return Err(ProbeError::Pin(format!(
                "pin {} has no interrupt edge configured",
                self.pin
            )));
        }
        self.enabled.store(true, Ordering::Release);
        debug!(pin = self.pin, "trigger interrupt enabled");
        if self.is_pending() {
            self.deliver();
        }
        Ok(())
    }

    /// Mask the interrupt. Edges still latch.
    pub fn disable_interrupt(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    /// Whether the interrupt is unmasked.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Clear the latched interrupt condition.
    pub fn clear_interrupt(&self) {
        self.pending.store(false, Ordering::Release);
    }

    /// Whether an edge is latched.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Drive the input level. Returns `true` if a configured edge was detected.
    pub fn set_level(&self, high: bool) -> bool {
        let prev = self.level.swap(high, Ordering::AcqRel);
        if prev == high {
            return false;
        }
        let Some(edge) = self.edge() else {
            return false;
        };
        if !edge.matches(high) {
            return false;
        }

        self.edges.fetch_add(1, Ordering::Relaxed);
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.pending.store(true, Ordering::Release);
        trace!(pin = self.pin, rising = high, "trigger edge latched");

        if self.is_enabled() {
            self.deliver();
        }
        true
    }

    /// Drive a full low-high-low pulse.
    pub fn pulse(&self) -> bool {
        let fired = self.set_level(true);
        self.set_level(false) || fired
    }

    /// Interrupt counters.
    #[must_use]
    pub fn stats(&self) -> LineStats {
        LineStats {
            edges: self.edges.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            storms: self.storms.load(Ordering::Relaxed),
        }
    }

    fn deliver(&self) {
        while self
            .in_service
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.service();
            self.in_service.store(false, Ordering::Release);

            // An edge latched between the last check and the release above
            // found the line in service and is ours to deliver.
            if !(self.is_enabled() && self.is_pending()) {
                return;
            }
        }
    }

    /// Run the handler until the latch stays clear. Caller holds `in_service`.
    fn service(&self) {
        let handler = self
            .handler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let Some(handler) = handler else {
            return;
        };

        while self.is_enabled() && self.is_pending() {
            let epoch = self.epoch.load(Ordering::Acquire);
            self.delivered.fetch_add(1, Ordering::Relaxed);
            handler.on_edge(self);

            if !self.is_pending() {
                return;
            }
            if self.epoch.load(Ordering::Acquire) == epoch {
                self.storms.fetch_add(1, Ordering::Relaxed);
                self.disable_interrupt();
                warn!(pin = self.pin, "handler left interrupt latched, masking line");
                return;
            }
            trace!(pin = self.pin, "edge latched during handler, re-delivering");
        }
    }
}

/// Levels and toggle counts of the two debug pins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DebugPinState {
    /// Packet-creation pin level.
    pub pkt_level: bool,
    /// Packet-creation pin toggles.
    pub pkt_toggles: u64,
    /// Reception pin level.
    pub exp_level: bool,
    /// Reception pin toggles.
    pub exp_toggles: u64,
}

impl DebugPinState {
    /// Toggle the packet-creation pin.
    pub fn toggle_pkt(&mut self) {
        self.pkt_level = !self.pkt_level;
        self.pkt_toggles += 1;
    }

    /// Toggle the reception pin.
    pub fn toggle_exp(&mut self) {
        self.exp_level = !self.exp_level;
        self.exp_toggles += 1;
    }
}
