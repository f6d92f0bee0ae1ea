//! TSCH network time.
//!
//! Provides:
//! - [`Asn`], the 40-bit absolute slot number shared by the whole network
//! - [`NetworkClock`], the free-running timer and slot bookkeeping, either
//!   derived from a monotonic epoch (live) or driven by hand (manual)

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Length of an encoded [`Asn`].
pub const ASN_LEN: usize = 5;

const ASN_MASK: u64 = (1 << 40) - 1;
const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Absolute slot number: slots elapsed since the network started.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Asn(u64);

impl Asn {
    /// Largest representable value.
    pub const MAX: Asn = Asn(ASN_MASK);

    /// Create an ASN, keeping the low 40 bits.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value & ASN_MASK)
    }

    /// Raw slot count.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// MAC byte order: the low 16-bit word, the middle 16-bit word (each
    /// least significant byte first), then the top byte.
    #[must_use]
    pub fn to_bytes(self) -> [u8; ASN_LEN] {
        let b = self.0.to_le_bytes();
        [b[0], b[1], b[2], b[3], b[4]]
    }

    /// Inverse of [`Asn::to_bytes`].
    #[must_use]
    pub fn from_bytes(bytes: [u8; ASN_LEN]) -> Self {
        let mut b = [0u8; 8];
        b[..ASN_LEN].copy_from_slice(&bytes);
        Self(u64::from_le_bytes(b))
    }

    /// Slots from `earlier` to `self`, modulo 2^40.
    #[must_use]
    pub fn slots_since(self, earlier: Asn) -> u64 {
        self.0.wrapping_sub(earlier.0) & ASN_MASK
    }

    /// Advance by `slots`, wrapping at 2^40.
    #[must_use]
    pub fn add_slots(self, slots: u64) -> Self {
        Self::new(self.0.wrapping_add(slots))
    }
}

#[derive(Debug)]
enum ClockMode {
    Live { epoch: Instant },
    Manual(ManualTime),
}

#[derive(Debug, Default)]
struct ManualTime {
    timer: AtomicU32,
    slot_reference: AtomicU32,
    asn: AtomicU64,
}

/// Free-running timer plus TSCH slot bookkeeping, shared between nodes.
#[derive(Debug)]
pub struct NetworkClock {
    timer_hz: u32,
    slot_duration: Duration,
    mode: ClockMode,
}

impl NetworkClock {
    /// Clock derived from the time elapsed since `epoch`.
    #[must_use]
    pub fn live(timer_hz: u32, slot_duration: Duration, epoch: Instant) -> Self {
        Self {
            timer_hz,
            slot_duration,
            mode: ClockMode::Live { epoch },
        }
    }

    /// Clock starting at zero that only moves when told to.
    #[must_use]
    pub fn manual(timer_hz: u32, slot_duration: Duration) -> Self {
        Self {
            timer_hz,
            slot_duration,
            mode: ClockMode::Manual(ManualTime::default()),
        }
    }

    /// Timer frequency.
    #[must_use]
    pub fn timer_hz(&self) -> u32 {
        self.timer_hz
    }

    /// Slot duration.
    #[must_use]
    pub fn slot_duration(&self) -> Duration {
        self.slot_duration
    }

    /// Timer ticks per slot.
    #[must_use]
    pub fn slot_ticks(&self) -> u32 {
        self.ticks_for(self.slot_duration)
    }

    /// Timer ticks covering `duration`, truncated to 32 bits.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn ticks_for(&self, duration: Duration) -> u32 {
        (duration.as_nanos() * u128::from(self.timer_hz) / NANOS_PER_SEC) as u32
    }

    /// Duration of `ticks` timer ticks.
    #[must_use]
    pub fn ticks_to_duration(&self, ticks: u32) -> Duration {
        let nanos = u128::from(ticks) * NANOS_PER_SEC / u128::from(self.timer_hz.max(1));
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Current free-running timer value.
    #[must_use]
    pub fn timer_value(&self) -> u32 {
        match &self.mode {
            ClockMode::Live { epoch } => self.ticks_for(epoch.elapsed()),
            ClockMode::Manual(t) => t.timer.load(Ordering::Acquire),
        }
    }

    /// Current absolute slot number.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn asn(&self) -> Asn {
        match &self.mode {
            ClockMode::Live { epoch } => {
                let slot_ns = self.slot_duration.as_nanos().max(1);
                Asn::new((epoch.elapsed().as_nanos() / slot_ns) as u64)
            }
            ClockMode::Manual(t) => Asn::new(t.asn.load(Ordering::Acquire)),
        }
    }

    /// Timer value at the start of the current slot.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn slot_reference(&self) -> u32 {
        match &self.mode {
            ClockMode::Live { .. } => {
                let start = u128::from(self.asn().value()) * self.slot_duration.as_nanos();
                (start * u128::from(self.timer_hz) / NANOS_PER_SEC) as u32
            }
            ClockMode::Manual(t) => t.slot_reference.load(Ordering::Acquire),
        }
    }

    /// Set the timer value. No effect on a live clock.
    pub fn set_timer(&self, value: u32) {
        if let ClockMode::Manual(t) = &self.mode {
            t.timer.store(value, Ordering::Release);
        }
    }

    /// Set the slot reference. No effect on a live clock.
    pub fn set_slot_reference(&self, value: u32) {
        if let ClockMode::Manual(t) = &self.mode {
            t.slot_reference.store(value, Ordering::Release);
        }
    }

    /// Set the absolute slot number. No effect on a live clock.
    pub fn set_asn(&self, asn: Asn) {
        if let ClockMode::Manual(t) = &self.mode {
            t.asn.store(asn.value(), Ordering::Release);
        }
    }

    /// Move a manual clock forward by whole slots, keeping the timer and
    /// slot reference aligned to the new slot start.
    pub fn advance_slots(&self, slots: u32) {
        if let ClockMode::Manual(t) = &self.mode {
            let ticks = self.slot_ticks().wrapping_mul(slots);
            let asn = Asn::new(t.asn.load(Ordering::Acquire)).add_slots(u64::from(slots));
            t.asn.store(asn.value(), Ordering::Release);
            let start = t.slot_reference.load(Ordering::Acquire).wrapping_add(ticks);
            t.slot_reference.store(start, Ordering::Release);
            t.timer.store(start, Ordering::Release);
        }
    }

    /// Move a manual clock's timer forward within the current slot.
    pub fn advance_ticks(&self, ticks: u32) {
        if let ClockMode::Manual(t) = &self.mode {
            let now = t.timer.load(Ordering::Acquire);
            t.timer.store(now.wrapping_add(ticks), Ordering::Release);
        }
    }
}
