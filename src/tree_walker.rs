//! Tree Walker: reconstructs caller/callee nesting from the linear edge
//! sequence and materializes the [`SubCall`] list with inclusive/exclusive
//! cost attribution.
//!
//! Implemented as an iterative stack machine rather than a recursive
//! descent, so call depth doesn't bound Rust's own stack; hand-verified to
//! reproduce the same parenthesization semantics a recursive walk would
//! (single call, nested call, sibling calls, truncated trace).

use log::warn;

use crate::recorder::Edge;

/// An aggregated caller→callee fact. `exclusive <= inclusive` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubCall {
    pub caller_addr: u32,
    pub callee_addr: u32,
    pub inclusive: u64,
    pub exclusive: u64,
}

struct OpenFrame {
    start: usize,
    child_total: u64,
}

/// Walks `edges` once and returns the SubCall list in the same order the
/// corresponding call-outs appear in the edge sequence.
///
/// A call-in that is never closed (decoder truncation) is silently
/// discarded. A call-out with no matching open at depth 0 is a
/// stray leading close and is skipped; this
/// implementation drains *every* such stray close, not just one at a time,
/// since nothing distinguishes "the first" stray close from a later one
/// once the stack is empty (see DESIGN.md).
pub fn reconstruct(edges: &[Edge]) -> Vec<SubCall> {
    let mut subcalls = Vec::new();
    let mut stack: Vec<OpenFrame> = Vec::new();
    let mut psn = 0usize;

    while psn < edges.len() {
        let edge = &edges[psn];

        if edge.is_entry {
            stack.push(OpenFrame {
                start: psn,
                child_total: 0,
            });
            psn += 1;
            continue;
        }

        match stack.pop() {
            None => {
                warn!("stray unmatched call-out edge at position {psn}, skipping");
                psn += 1;
            }
            Some(frame) => {
                let inclusive = edge.timestamp.saturating_sub(edges[frame.start].timestamp);
                let exclusive = inclusive.saturating_sub(frame.child_total);
                subcalls.push(SubCall {
                    caller_addr: edge.dst_addr,
                    callee_addr: edge.src_addr,
                    inclusive,
                    exclusive,
                });
                if let Some(parent) = stack.last_mut() {
                    parent.child_total += inclusive;
                }
                psn += 1;
            }
        }
    }

    if !stack.is_empty() {
        warn!(
            "{} unmatched call-in edge(s) at end of window, discarding partial children",
            stack.len()
        );
    }

    subcalls
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn edge(t: u64, src: &str, dst: &str, src_addr: u32, dst_addr: u32, is_entry: bool) -> Edge {
        Edge {
            timestamp: t,
            src_addr,
            dst_addr,
            src_file: Rc::from("f.c"),
            src_fn: Rc::from(src),
            dst_file: Rc::from("f.c"),
            dst_fn: Rc::from(dst),
            is_entry,
        }
    }

    #[test]
    fn s1_single_call_single_return() {
        let edges = vec![
            edge(100, "A", "B", 0xA, 0xB, true),
            edge(200, "B", "A", 0xB, 0xA, false),
        ];
        let subcalls = reconstruct(&edges);
        assert_eq!(
            subcalls,
            vec![SubCall {
                caller_addr: 0xA,
                callee_addr: 0xB,
                inclusive: 100,
                exclusive: 100,
            }]
        );
    }

    #[test]
    fn s2_nested_call() {
        let edges = vec![
            edge(0, "A", "B", 0xA, 0xB, true),
            edge(10, "B", "C", 0xB, 0xC, true),
            edge(30, "C", "B", 0xC, 0xB, false),
            edge(40, "B", "A", 0xB, 0xA, false),
        ];
        let subcalls = reconstruct(&edges);
        assert_eq!(
            subcalls,
            vec![
                SubCall {
                    caller_addr: 0xB,
                    callee_addr: 0xC,
                    inclusive: 20,
                    exclusive: 20,
                },
                SubCall {
                    caller_addr: 0xA,
                    callee_addr: 0xB,
                    inclusive: 40,
                    exclusive: 20,
                },
            ]
        );
    }

    #[test]
    fn s3_two_siblings() {
        let edges = vec![
            edge(0, "A", "B", 0xA, 0xB, true),
            edge(5, "B", "A", 0xB, 0xA, false),
            edge(6, "A", "C", 0xA, 0xC, true),
            edge(11, "C", "A", 0xC, 0xA, false),
        ];
        let subcalls = reconstruct(&edges);
        assert_eq!(
            subcalls,
            vec![
                SubCall {
                    caller_addr: 0xA,
                    callee_addr: 0xB,
                    inclusive: 5,
                    exclusive: 5,
                },
                SubCall {
                    caller_addr: 0xA,
                    callee_addr: 0xC,
                    inclusive: 5,
                    exclusive: 5,
                },
            ]
        );
    }

    #[test]
    fn s3_leading_stray_close_is_skipped() {
        let mut edges = vec![edge(0, "X", "A", 0xF, 0xA, false)];
        edges.extend(vec![
            edge(0, "A", "B", 0xA, 0xB, true),
            edge(5, "B", "A", 0xB, 0xA, false),
        ]);
        let subcalls = reconstruct(&edges);
        assert_eq!(subcalls.len(), 1);
        assert_eq!(subcalls[0].callee_addr, 0xB);
    }

    #[test]
    fn s6_truncation_yields_no_subcalls() {
        let edges = vec![
            edge(0, "A", "B", 0xA, 0xB, true),
            edge(1, "B", "C", 0xB, 0xC, true),
        ];
        let subcalls = reconstruct(&edges);
        assert!(subcalls.is_empty());
    }

    #[test]
    fn exclusive_never_exceeds_inclusive() {
        let edges = vec![
            edge(0, "A", "B", 0xA, 0xB, true),
            edge(10, "B", "C", 0xB, 0xC, true),
            edge(15, "C", "B", 0xC, 0xB, false),
            edge(20, "B", "D", 0xB, 0xD, true),
            edge(35, "D", "B", 0xD, 0xB, false),
            edge(50, "B", "A", 0xB, 0xA, false),
        ];
        for s in reconstruct(&edges) {
            assert!(s.exclusive <= s.inclusive);
        }
    }
}
