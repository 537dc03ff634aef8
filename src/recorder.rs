//! Transition Recorder: consumes per-instruction ETM decoder events and
//! linearizes them into an append-only sequence of function-boundary
//! crossings ([`Edge`]s).

use std::rc::Rc;

use log::{debug, trace};

use crate::decoder::{CpuState, DecoderEvent, StateChangedFlags};
use crate::name::SymbolResolver;

/// A single observed transition between functions. `is_entry` is true for a
/// call-in (the previous instruction was a taken branch crossing a function
/// boundary) and false for a call-out (fall-through crossing a boundary,
/// interpreted as a return).
#[derive(Debug, Clone)]
pub struct Edge {
    pub timestamp: u64,
    pub src_addr: u32,
    pub dst_addr: u32,
    pub src_file: Rc<str>,
    pub src_fn: Rc<str>,
    pub dst_file: Rc<str>,
    pub dst_fn: Rc<str>,
    pub is_entry: bool,
}

/// Cursor state carried between decoder callbacks.
struct Cursor {
    current_file: Option<Rc<str>>,
    current_function: Option<Rc<str>>,
    working_addr: u32,
    last_addr: u32,
    last_was_jump: bool,
}

impl Cursor {
    fn new() -> Self {
        Cursor {
            current_file: None,
            current_function: None,
            working_addr: 0,
            last_addr: 0,
            last_was_jump: false,
        }
    }
}

/// Consumes [`DecoderEvent`]s and builds the edge sequence for a sampling
/// window. Owns the cursor state; the edge sequence only ever grows.
pub struct TransitionRecorder {
    cursor: Cursor,
    edges: Vec<Edge>,
    entry_sentinel: Rc<str>,
    interrupt_name: Rc<str>,
}

impl TransitionRecorder {
    pub fn new() -> Self {
        TransitionRecorder {
            cursor: Cursor::new(),
            edges: Vec::new(),
            entry_sentinel: Rc::from("Entry"),
            interrupt_name: Rc::from("INTERRUPT"),
        }
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Processes one decoder callback, appending zero or more edges.
    ///
    /// Symbol resolution here bypasses the Name Cache: the
    /// per-atom lookup is on the hot path and correctness does not require
    /// caching it, only the emitters do. The very first function observed
    /// still counts as a transition (the cursor starts out null, which never
    /// compares equal to a resolved record), so it produces an edge sourced
    /// from the `Entry` sentinel, since the true caller before trace start
    /// is unknowable. `is_entry` on that edge is whatever `last_was_jump`
    /// happened to be (false unless an exception entry primed it), so it
    /// typically reads as a stray leading close for the Tree Walker to skip.
    pub fn on_event(
        &mut self,
        event: &DecoderEvent,
        resolver: &mut dyn SymbolResolver,
        strip_prefix: &str,
    ) {
        let DecoderEvent { state_changed, cpu } = *event;

        if state_changed.contains(StateChangedFlags::EV_CH_ADDRESS) {
            self.cursor.working_addr = cpu.addr;
        }

        if state_changed.contains(StateChangedFlags::EV_CH_EX_ENTRY) {
            trace!("exception entry at 0x{:08x}", self.cursor.working_addr);
            self.cursor.current_file = Some(self.interrupt_name.clone());
            self.cursor.current_function = Some(self.interrupt_name.clone());
            self.cursor.last_was_jump = true;
        }

        if state_changed.contains(StateChangedFlags::EV_CH_EX_EXIT) {
            // The original firmware's handler is empty here.
            // Modeling a return-from-interrupt as a call-out is deferred
            // until trace corpora exercising exceptions are available.
            debug!("exception exit observed, no state change applied");
        }

        if !state_changed.contains(StateChangedFlags::EV_CH_ENATOMS) {
            return;
        }

        let n = cpu.eatoms + cpu.natoms;
        let mut disposition = cpu.disposition;

        for _ in 0..n {
            let addr = self.cursor.working_addr;
            // Bypassing the Name Cache here is intentional: the
            // cache exists to avoid repeated lookups for the emitters, not
            // to short-circuit per-atom classification.
            let record = resolver.lookup(addr, strip_prefix);

            let mut jump_target = None;
            let mut is_four_byte = false;
            let mut has_instruction = false;

            if let Some(record) = &record {
                let changed = match (&self.cursor.current_file, &self.cursor.current_function) {
                    (Some(cf), Some(cfn)) => {
                        !Rc::ptr_eq(cf, &record.file) || !Rc::ptr_eq(cfn, &record.function)
                    }
                    // No cursor residency yet (the very first atom observed,
                    // or the first since the cursor was reset): per §4.2,
                    // `cursor.current` being null still compares unequal to
                    // `record`, so this is itself a transition to append.
                    _ => true,
                };

                if changed {
                    // Residency before the very first observed transition is
                    // unknowable (the trace can start mid-function), so that
                    // transition's src is the Entry sentinel rather than
                    // whatever the cursor happened to hold.
                    let (src_file, src_fn) = match (&self.cursor.current_file, &self.cursor.current_function)
                    {
                        (Some(cf), Some(cfn)) => (cf.clone(), cfn.clone()),
                        _ => (self.entry_sentinel.clone(), self.entry_sentinel.clone()),
                    };

                    self.edges.push(Edge {
                        timestamp: cpu.instruction_count,
                        src_addr: self.cursor.last_addr,
                        dst_addr: addr,
                        src_file,
                        src_fn,
                        dst_file: record.file.clone(),
                        dst_fn: record.function.clone(),
                        is_entry: self.cursor.last_was_jump,
                    });

                    self.cursor.current_file = Some(record.file.clone());
                    self.cursor.current_function = Some(record.function.clone());
                }

                if let Some(insn) = record.instruction_at(addr) {
                    has_instruction = true;
                    is_four_byte = insn.is_four_byte;
                    if insn.is_jump {
                        jump_target = Some(insn.jump_target);
                    }
                }
            }
            // Address with no symbol at all: treated as "no
            // function change" and falls through to the conservative
            // 2-byte advance below, same as "no disassembly".

            self.cursor.last_was_jump = false;
            self.cursor.last_addr = addr;

            if has_instruction {
                if let Some(target) = jump_target {
                    let taken = disposition & 1 != 0;
                    if taken {
                        self.cursor.working_addr = target;
                        self.cursor.last_was_jump = true;
                    } else {
                        self.cursor.working_addr += if is_four_byte { 4 } else { 2 };
                    }
                } else {
                    self.cursor.working_addr += if is_four_byte { 4 } else { 2 };
                }
            } else {
                self.cursor.working_addr += 2;
            }

            disposition >>= 1;
        }
    }
}

impl Default for TransitionRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::{Instruction, NameRecord};
    use std::collections::HashMap;

    struct MapResolver {
        records: HashMap<u32, NameRecord>,
    }

    impl SymbolResolver for MapResolver {
        fn lookup(&mut self, addr: u32, _strip_prefix: &str) -> Option<NameRecord> {
            // Find the record whose instruction range covers `addr`.
            self.records
                .values()
                .find(|r| r.instruction_at(addr).is_some())
                .cloned()
        }
    }

    fn straight_line(file: &str, function: &str, start: u32, len: u32) -> NameRecord {
        let assembly = (0..len)
            .map(|i| Instruction {
                addr: start + i * 2,
                is_jump: false,
                jump_target: 0,
                is_four_byte: false,
            })
            .collect();
        NameRecord {
            address: start,
            file: Rc::from(file),
            function: Rc::from(function),
            line: 1,
            assembly,
        }
    }

    fn call_at(file: &str, function: &str, start: u32, target: u32) -> NameRecord {
        NameRecord {
            address: start,
            file: Rc::from(file),
            function: Rc::from(function),
            line: 1,
            assembly: vec![Instruction {
                addr: start,
                is_jump: true,
                jump_target: target,
                is_four_byte: false,
            }],
        }
    }

    fn event(addr: u32, n: u32, disposition: u32, count: u64) -> DecoderEvent {
        DecoderEvent {
            state_changed: StateChangedFlags::EV_CH_ADDRESS | StateChangedFlags::EV_CH_ENATOMS,
            cpu: CpuState {
                addr,
                eatoms: n,
                natoms: 0,
                disposition,
                instruction_count: count,
            },
        }
    }

    #[test]
    fn first_atom_emits_a_stray_entry_edge() {
        let mut records = HashMap::new();
        records.insert(0x100, call_at("a.c", "A", 0x100, 0x200));
        records.insert(0x200, straight_line("b.c", "B", 0x200, 4));
        let mut resolver = MapResolver { records };
        let mut recorder = TransitionRecorder::new();

        // One atom at 0x100 (a taken jump into B).
        recorder.on_event(&event(0x100, 1, 1, 100), &mut resolver, "");
        // One atom at 0x200 (first instruction of B).
        recorder.on_event(&event(0x200, 1, 0, 100), &mut resolver, "");

        // The cursor starts null, so the very first atom (A) is itself a
        // transition: Entry -> A, is_entry=false (nothing was a jump yet).
        // Then A -> B, is_entry=true, once the taken jump is replayed.
        assert_eq!(recorder.edges().len(), 2);
        let first = &recorder.edges()[0];
        assert!(!first.is_entry);
        assert_eq!(&*first.src_fn, "Entry");
        assert_eq!(&*first.dst_fn, "A");

        let second = &recorder.edges()[1];
        assert!(second.is_entry);
        assert_eq!(&*second.src_fn, "A");
        assert_eq!(&*second.dst_fn, "B");
    }

    #[test]
    fn unresolved_address_does_not_emit_edge() {
        let mut resolver = MapResolver {
            records: HashMap::new(),
        };
        let mut recorder = TransitionRecorder::new();
        recorder.on_event(&event(0xdead, 3, 0, 10), &mut resolver, "");
        assert!(recorder.edges().is_empty());
    }
}
