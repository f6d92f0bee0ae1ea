//! Fixed-size packet buffer pool.
//!
//! Buffers are pre-allocated once. A buffer is lent out by value on
//! [`PacketPool::acquire`] and must come back through
//! [`PacketPool::release`]; the pool tracks which slots are lent so
//! leaks show up in [`PoolStats::in_use`].
//!
//! The payload grows towards the front of the buffer: a fresh buffer has
//! all of its bytes as headroom, so every layer can prepend its header
//! without moving the bytes already written.

use probe_common::{ComponentId, L3Address, ProbeError, ProbeResult};
use serde::Serialize;
use tracing::{trace, warn};

/// One packet buffer and its per-layer metadata.
#[derive(Debug)]
pub struct PacketBuffer {
    /// Pool slot this buffer belongs to.
    slot: usize,
    /// Component currently responsible for the buffer.
    pub owner: ComponentId,
    /// Component that allocated the buffer.
    pub creator: ComponentId,
    /// Transport protocol number (IANA).
    pub l4_protocol: u8,
    /// Transport destination port.
    pub l4_destination_port: u16,
    /// Transport source port.
    pub l4_source_port: u16,
    /// Network-layer destination.
    pub l3_destination: L3Address,
    data: Box<[u8]>,
    /// Start of the payload in `data`.
    head: usize,
}

impl PacketBuffer {
    fn new(slot: usize, size: usize) -> Self {
        Self {
            slot,
            owner: ComponentId::Null,
            creator: ComponentId::Null,
            l4_protocol: 0,
            l4_destination_port: 0,
            l4_source_port: 0,
            l3_destination: L3Address::None,
            data: vec![0u8; size].into_boxed_slice(),
            head: size,
        }
    }

    fn reset(&mut self) {
        self.owner = ComponentId::Null;
        self.creator = ComponentId::Null;
        self.l4_protocol = 0;
        self.l4_destination_port = 0;
        self.l4_source_port = 0;
        self.l3_destination = L3Address::None;
        self.data.fill(0);
        self.head = self.data.len();
    }

    /// Pool slot index.
    #[must_use]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Total size of the buffer.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes still free in front of the payload.
    #[must_use]
    pub fn headroom(&self) -> usize {
        self.head
    }

    /// Current payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.data[self.head..]
    }

    /// Payload length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len() - self.head
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grow the payload by `len` bytes at its front and return the new region.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::PayloadTooLarge`] if the headroom is too small.
    pub fn reserve_header(&mut self, len: usize) -> ProbeResult<&mut [u8]> {
        if len > self.head {
            return Err(ProbeError::PayloadTooLarge {
                len,
                available: self.head,
            });
        }
        self.head -= len;
        Ok(&mut self.data[self.head..self.head + len])
    }

    /// Prepend `bytes` to the payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::PayloadTooLarge`] if the headroom is too small.
    pub fn push_front(&mut self, bytes: &[u8]) -> ProbeResult<()> {
        self.reserve_header(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Strip `len` bytes from the front of the payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Malformed`] if the payload is shorter than `len`.
    pub fn pop_front(&mut self, len: usize) -> ProbeResult<()> {
        if len > self.len() {
            return Err(ProbeError::Malformed(format!(
                "cannot strip {len} bytes from a {}-byte payload",
                self.len()
            )));
        }
        self.head += len;
        Ok(())
    }

    /// Replace the payload with `bytes`, written at the tail of the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::PayloadTooLarge`] if `bytes` exceeds the capacity.
    pub fn set_payload(&mut self, bytes: &[u8]) -> ProbeResult<()> {
        if bytes.len() > self.data.len() {
            return Err(ProbeError::PayloadTooLarge {
                len: bytes.len(),
                available: self.data.len(),
            });
        }
        self.head = self.data.len();
        self.push_front(bytes)
    }
}

/// Pool usage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Number of buffers in the pool.
    pub capacity: usize,
    /// Buffers currently lent out.
    pub in_use: usize,
    /// Highest simultaneous `in_use`.
    pub high_water: usize,
    /// Successful acquisitions.
    pub acquired: u64,
    /// Releases.
    pub released: u64,
    /// Acquisitions that found the pool empty.
    pub exhausted: u64,
}

/// Pool of pre-allocated packet buffers.
#[derive(Debug)]
pub struct PacketPool {
    /// `Some` while the slot's buffer is free.
    slots: Vec<Option<PacketBuffer>>,
    buffer_size: usize,
    stats: PoolStats,
}

impl PacketPool {
    /// Create a pool of `count` buffers of `buffer_size` bytes each.
    #[must_use]
    pub fn new(count: usize, buffer_size: usize) -> Self {
        Self {
            slots: (0..count)
                .map(|slot| Some(PacketBuffer::new(slot, buffer_size)))
                .collect(),
            buffer_size,
            stats: PoolStats {
                capacity: count,
                ..PoolStats::default()
            },
        }
    }

    /// Size of each buffer.
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Usage counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    /// Buffers currently lent out.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.stats.in_use
    }

    /// Take the first free buffer, tagging owner and creator.
    pub fn acquire(&mut self, component: ComponentId) -> Option<PacketBuffer> {
        let Some(mut buffer) = self.slots.iter_mut().find_map(Option::take) else {
            self.stats.exhausted += 1;
            trace!(%component, "packet pool exhausted");
            return None;
        };
        buffer.owner = component;
        buffer.creator = component;

        self.stats.acquired += 1;
        self.stats.in_use += 1;
        self.stats.high_water = self.stats.high_water.max(self.stats.in_use);
        trace!(slot = buffer.slot, %component, "packet buffer acquired");
        Some(buffer)
    }

    /// Return a buffer to its slot.
    ///
    /// Buffers that do not belong to this pool are dropped with a warning.
    pub fn release(&mut self, mut buffer: PacketBuffer) {
        let slot = buffer.slot;
        match self.slots.get_mut(slot) {
            Some(entry @ None) if buffer.capacity() == self.buffer_size => {
                buffer.reset();
                *entry = Some(buffer);
                self.stats.released += 1;
                self.stats.in_use -= 1;
                trace!(slot, "packet buffer released");
            }
            _ => warn!(slot, "dropping packet buffer that does not belong to this pool"),
        }
    }
}
