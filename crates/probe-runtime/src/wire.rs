//! Probe datagram layout.
//!
//! ```text
//! offset  len  field
//!      0    8  tag "llatency"
//!      8    2  sequence counter, little-endian
//!     10    5  absolute slot number, MAC byte order
//!     15    4  free-running timer snapshot, little-endian
//!     19    4  slot reference snapshot, little-endian
//! ```
//!
//! The payload is encoded in one pass into a fixed array and copied into the
//! packet buffer, so the bytes on the air never depend on header headroom.

use probe_common::{ProbeError, ProbeResult, MIN_BUFFER_SIZE};
use probe_stack::{PacketBuffer, ASN_LEN};
use serde::Serialize;
use static_assertions::const_assert;

/// Tag identifying probe datagrams.
pub const PROBE_TAG: &[u8; 8] = b"llatency";

/// Encoded payload length.
pub const PROBE_PAYLOAD_LEN: usize = PROBE_TAG.len() + 2 + ASN_LEN + 4 + 4;

const SEQUENCE_AT: usize = PROBE_TAG.len();
const ASN_AT: usize = SEQUENCE_AT + 2;
const TIMER_AT: usize = ASN_AT + ASN_LEN;
const SLOT_AT: usize = TIMER_AT + 4;

const_assert!(PROBE_PAYLOAD_LEN == 23);
const_assert!(PROBE_PAYLOAD_LEN <= MIN_BUFFER_SIZE);

/// Timer and slot reference read together by one task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TimingSnapshot {
    /// Free-running timer value.
    pub timer: u32,
    /// Timer value at the start of the current slot.
    pub slot_reference: u32,
}

/// Decoded probe payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProbeDatagram {
    /// Sequence counter of the sender.
    pub sequence: u16,
    /// Absolute slot number when the trigger was handled.
    pub asn: [u8; ASN_LEN],
    /// Free-running timer when the trigger was handled.
    pub timer: u32,
    /// Slot reference when the trigger was handled.
    pub slot_reference: u32,
}

impl ProbeDatagram {
    /// Build a datagram from a snapshot.
    #[must_use]
    pub fn new(sequence: u16, asn: [u8; ASN_LEN], snapshot: TimingSnapshot) -> Self {
        Self {
            sequence,
            asn,
            timer: snapshot.timer,
            slot_reference: snapshot.slot_reference,
        }
    }

    /// Timing pair carried by the datagram.
    #[must_use]
    pub fn snapshot(&self) -> TimingSnapshot {
        TimingSnapshot {
            timer: self.timer,
            slot_reference: self.slot_reference,
        }
    }

    /// Encode to wire bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; PROBE_PAYLOAD_LEN] {
        let mut out = [0u8; PROBE_PAYLOAD_LEN];
        out[..SEQUENCE_AT].copy_from_slice(PROBE_TAG);
        out[SEQUENCE_AT..ASN_AT].copy_from_slice(&self.sequence.to_le_bytes());
        out[ASN_AT..TIMER_AT].copy_from_slice(&self.asn);
        out[TIMER_AT..SLOT_AT].copy_from_slice(&self.timer.to_le_bytes());
        out[SLOT_AT..].copy_from_slice(&self.slot_reference.to_le_bytes());
        out
    }

    /// Replace the payload of `buffer` with the encoded datagram.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::PayloadTooLarge`] if the buffer is too small.
    pub fn write_to(&self, buffer: &mut PacketBuffer) -> ProbeResult<()> {
        buffer.set_payload(&self.encode())
    }

    /// Decode wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Malformed`] if the length or the tag is wrong.
    pub fn decode(bytes: &[u8]) -> ProbeResult<Self> {
        if bytes.len() != PROBE_PAYLOAD_LEN {
            return Err(ProbeError::Malformed(format!(
                "expected {PROBE_PAYLOAD_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        if &bytes[..SEQUENCE_AT] != PROBE_TAG {
            return Err(ProbeError::Malformed(format!(
                "unexpected tag {:02x?}",
                &bytes[..SEQUENCE_AT]
            )));
        }

        let mut asn = [0u8; ASN_LEN];
        asn.copy_from_slice(&bytes[ASN_AT..TIMER_AT]);
        Ok(Self {
            sequence: u16::from_le_bytes([bytes[SEQUENCE_AT], bytes[SEQUENCE_AT + 1]]),
            asn,
            timer: read_u32(&bytes[TIMER_AT..SLOT_AT]),
            slot_reference: read_u32(&bytes[SLOT_AT..]),
        })
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(bytes);
    u32::from_le_bytes(word)
}
