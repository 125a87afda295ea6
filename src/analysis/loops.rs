//! Natural loop detection.
//!
//! A back edge is an edge `latch -> header` where the header dominates the
//! latch. The natural loop of a header is the header plus every block that
//! reaches a latch without passing through the header. Back edges whose
//! target does not dominate their source (irreducible control flow) are
//! ignored; consumers of this analysis only use loops to order work, never
//! for correctness.

use std::collections::HashSet;

use crate::flowgraph::{BlockId, FlowGraph};

use super::dominators::DominatorTree;

/// One natural loop.
#[derive(Debug, Clone)]
pub struct NaturalLoop {
    /// The loop header.
    pub header: BlockId,
    /// Sources of back edges into the header.
    pub latches: Vec<BlockId>,
    /// All blocks of the loop, header included.
    pub body: HashSet<BlockId>,
}

impl NaturalLoop {
    /// Returns `true` if `block` belongs to this loop.
    #[must_use]
    pub fn contains(&self, block: BlockId) -> bool {
        self.body.contains(&block)
    }
}

/// Detects the natural loops of `graph`, one entry per header.
///
/// Loops sharing a header (multiple back edges) are merged.
#[must_use]
pub fn detect_loops(graph: &FlowGraph, domtree: &DominatorTree) -> Vec<NaturalLoop> {
    let mut loops: Vec<NaturalLoop> = Vec::new();

    for &b in domtree.reverse_postorder() {
        for succ in graph.successors(b) {
            if !domtree.dominates(succ, b) {
                continue;
            }
            // Back edge b -> succ.
            match loops.iter_mut().find(|l| l.header == succ) {
                Some(existing) => {
                    existing.latches.push(b);
                    collect_body(graph, succ, b, &mut existing.body);
                }
                None => {
                    let mut body = HashSet::new();
                    body.insert(succ);
                    collect_body(graph, succ, b, &mut body);
                    loops.push(NaturalLoop {
                        header: succ,
                        latches: vec![b],
                        body,
                    });
                }
            }
        }
    }

    loops
}

/// Adds every block that reaches `latch` without passing `header`.
fn collect_body(graph: &FlowGraph, header: BlockId, latch: BlockId, body: &mut HashSet<BlockId>) {
    if body.contains(&latch) {
        return;
    }
    let mut stack = vec![latch];
    body.insert(latch);
    while let Some(b) = stack.pop() {
        for &p in graph.block(b).preds() {
            if p != header && body.insert(p) {
                stack.push(p);
            }
        }
    }
    body.insert(header);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flowgraph::FlowGraphBuilder;

    #[test]
    fn test_simple_loop() {
        // 0 -> 1(header) -> 2 -> 1, 2 -> 3
        let g = FlowGraphBuilder::new(4, 0).build_with(|f| {
            f.block(0, |b| {
                b.goto(1);
            });
            f.block(1, |b| {
                b.goto(2);
            });
            f.block(2, |b| {
                let c = b.const_bool(true);
                b.branch(c, 1, 3);
            });
            f.block(3, |b| {
                b.ret();
            });
        });
        let dom = DominatorTree::compute(&g);
        let loops = detect_loops(&g, &dom);
        assert_eq!(loops.len(), 1);
        let l = &loops[0];
        assert_eq!(l.header, BlockId::new(1));
        assert_eq!(l.latches, vec![BlockId::new(2)]);
        assert!(l.contains(BlockId::new(1)));
        assert!(l.contains(BlockId::new(2)));
        assert!(!l.contains(BlockId::new(0)));
        assert!(!l.contains(BlockId::new(3)));
    }

    #[test]
    fn test_nested_loops() {
        // 0 -> 1 -> 2 -> 3 -> 2 (inner), 3 -> 4 -> 1 (outer), 4 -> 5
        let g = FlowGraphBuilder::new(6, 0).build_with(|f| {
            f.block(0, |b| {
                b.goto(1);
            });
            f.block(1, |b| {
                b.goto(2);
            });
            f.block(2, |b| {
                b.goto(3);
            });
            f.block(3, |b| {
                let c = b.const_bool(true);
                b.branch(c, 2, 4);
            });
            f.block(4, |b| {
                let c = b.const_bool(false);
                b.branch(c, 1, 5);
            });
            f.block(5, |b| {
                b.ret();
            });
        });
        let dom = DominatorTree::compute(&g);
        let loops = detect_loops(&g, &dom);
        assert_eq!(loops.len(), 2);

        let inner = loops.iter().find(|l| l.header == BlockId::new(2)).unwrap();
        let outer = loops.iter().find(|l| l.header == BlockId::new(1)).unwrap();
        assert_eq!(inner.body.len(), 2);
        assert!(outer.contains(BlockId::new(4)));
        assert!(outer.contains(BlockId::new(2)));
        assert!(!outer.contains(BlockId::new(5)));
    }

    #[test]
    fn test_no_loops() {
        let g = FlowGraphBuilder::new(2, 0).build_with(|f| {
            f.block(0, |b| {
                b.goto(1);
            });
            f.block(1, |b| {
                b.ret();
            });
        });
        let dom = DominatorTree::compute(&g);
        assert!(detect_loops(&g, &dom).is_empty());
    }
}
