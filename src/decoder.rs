//! The consumed ETM decoder interface. The raw packet decoder itself — byte
//! stream to structured
//! CPU state-change events — is out of scope; this module only models the
//! shape of its callbacks so the core can be driven and tested without it.

use bitflags::bitflags;

bitflags! {
    /// Which fields of [`CpuState`] changed since the previous event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StateChangedFlags: u8 {
        const EV_CH_ADDRESS  = 0b0001;
        const EV_CH_ENATOMS  = 0b0010;
        const EV_CH_EX_ENTRY = 0b0100;
        const EV_CH_EX_EXIT  = 0b1000;
    }
}

/// CPU state as surfaced by the decoder at each callback. `eatoms`/`natoms`
/// are the taken/not-taken atom counts for the current packet; `disposition`
/// is their taken/not-taken bitmask (LSB = next instruction); `addr` is an
/// exact address from the trace (e.g. a branch target);
/// `instruction_count` is the free-running instruction counter used as the
/// Edge timestamp.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuState {
    pub addr: u32,
    pub eatoms: u32,
    pub natoms: u32,
    pub disposition: u32,
    pub instruction_count: u64,
}

/// One decoder callback invocation.
#[derive(Debug, Clone, Copy)]
pub struct DecoderEvent {
    pub state_changed: StateChangedFlags,
    pub cpu: CpuState,
}

/// The `pump(bytes, len, callback, user_data)` shape the decoder exposes, modeled
/// as a trait so a real packet decoder and an in-memory test fixture can
/// both drive the core identically.
pub trait EtmEventSource {
    /// Feeds `bytes` to the decoder, invoking `on_event` once per recognized
    /// state change. Returns the number of bytes actually consumed.
    fn pump(&mut self, bytes: &[u8], on_event: &mut dyn FnMut(&DecoderEvent)) -> usize;
}

/// A fixed, in-memory sequence of events, for driving the recorder in tests
/// without a real hardware trace stream or byte-level framing.
#[derive(Debug, Default)]
pub struct ScriptedEventSource {
    events: std::collections::VecDeque<DecoderEvent>,
}

impl ScriptedEventSource {
    pub fn new(events: Vec<DecoderEvent>) -> Self {
        Self {
            events: events.into(),
        }
    }
}

impl EtmEventSource for ScriptedEventSource {
    fn pump(&mut self, bytes: &[u8], on_event: &mut dyn FnMut(&DecoderEvent)) -> usize {
        // The scripted source ignores byte framing entirely and drains one
        // event per call; this is enough to drive deterministic tests.
        if let Some(event) = self.events.pop_front() {
            on_event(&event);
        }
        bytes.len()
    }
}

const RECORD_LEN: usize = 25;

/// The actual raw ETM packet decoder — the bitstream sync/atom state
/// machine — is an out-of-scope external collaborator; this
/// reads a fixed-layout binary record framing of [`DecoderEvent`] instead,
/// which is what this binary's trace source (file or socket) is expected
/// to carry. A real deployment would replace this with a linked decoder
/// that speaks the hardware trace protocol and calls back through the same
/// [`EtmEventSource`] seam.
///
/// Record layout, all integers little-endian:
/// `state_changed: u8, addr: u32, eatoms: u32, natoms: u32, disposition: u32,
/// instruction_count: u64` (25 bytes).
#[derive(Debug, Default)]
pub struct FramedEventSource {
    carry: Vec<u8>,
}

impl FramedEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn decode_record(record: &[u8; RECORD_LEN]) -> DecoderEvent {
        let addr = u32::from_le_bytes(record[1..5].try_into().unwrap());
        let eatoms = u32::from_le_bytes(record[5..9].try_into().unwrap());
        let natoms = u32::from_le_bytes(record[9..13].try_into().unwrap());
        let disposition = u32::from_le_bytes(record[13..17].try_into().unwrap());
        let instruction_count = u64::from_le_bytes(record[17..25].try_into().unwrap());
        DecoderEvent {
            state_changed: StateChangedFlags::from_bits_truncate(record[0]),
            cpu: CpuState {
                addr,
                eatoms,
                natoms,
                disposition,
                instruction_count,
            },
        }
    }
}

impl EtmEventSource for FramedEventSource {
    fn pump(&mut self, bytes: &[u8], on_event: &mut dyn FnMut(&DecoderEvent)) -> usize {
        self.carry.extend_from_slice(bytes);

        let mut offset = 0;
        while self.carry.len() - offset >= RECORD_LEN {
            let record: [u8; RECORD_LEN] = self.carry[offset..offset + RECORD_LEN]
                .try_into()
                .unwrap();
            on_event(&Self::decode_record(&record));
            offset += RECORD_LEN;
        }
        self.carry.drain(..offset);

        bytes.len()
    }
}

#[cfg(test)]
mod framed_tests {
    use super::*;

    fn record_bytes(state_changed: u8, addr: u32, eatoms: u32, count: u64) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RECORD_LEN);
        buf.push(state_changed);
        buf.extend_from_slice(&addr.to_le_bytes());
        buf.extend_from_slice(&eatoms.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&count.to_le_bytes());
        buf
    }

    #[test]
    fn decodes_one_record_per_pump() {
        let mut source = FramedEventSource::new();
        let bytes = record_bytes(0b0011, 0x1000, 2, 42);
        let mut seen = Vec::new();
        source.pump(&bytes, &mut |e| seen.push(*e));
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].cpu.addr, 0x1000);
        assert_eq!(seen[0].cpu.eatoms, 2);
        assert_eq!(seen[0].cpu.instruction_count, 42);
        assert!(seen[0].state_changed.contains(StateChangedFlags::EV_CH_ADDRESS));
    }

    #[test]
    fn reassembles_a_record_split_across_two_pumps() {
        let mut source = FramedEventSource::new();
        let bytes = record_bytes(0b0001, 0x2000, 1, 7);
        let mut seen = Vec::new();
        source.pump(&bytes[..10], &mut |e| seen.push(*e));
        assert!(seen.is_empty());
        source.pump(&bytes[10..], &mut |e| seen.push(*e));
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].cpu.addr, 0x2000);
    }
}
