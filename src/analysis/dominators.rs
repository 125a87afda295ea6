//! Dominator tree construction and queries.
//!
//! Uses the iterative reverse-postorder scheme of Cooper, Harvey and
//! Kennedy: intersect the dominator sets of processed predecessors along
//! the immediate-dominator chains until a fixed point. Simple, and fast
//! enough for per-function graphs.
//!
//! Exceptional edges are ordinary edges here: a catch entry is dominated
//! by whatever dominates every block of its try region.

use crate::flowgraph::{BlockId, FlowGraph};

/// The dominator tree of a flow graph.
///
/// Unreachable blocks are not part of the tree; queries involving them
/// return `false`/`None`.
pub struct DominatorTree {
    /// Reachable blocks in reverse postorder; `rpo[0]` is the entry.
    rpo: Vec<BlockId>,
    /// RPO number per block, `None` for unreachable blocks.
    rpo_number: Vec<Option<usize>>,
    /// Immediate dominator per block. The entry maps to itself.
    idom: Vec<Option<BlockId>>,
    /// Dominator-tree children per block.
    children: Vec<Vec<BlockId>>,
}

impl DominatorTree {
    /// Computes the dominator tree of `graph`.
    #[must_use]
    pub fn compute(graph: &FlowGraph) -> Self {
        let n = graph.block_count();
        let rpo = reverse_postorder(graph);
        let mut rpo_number = vec![None; n];
        for (i, &b) in rpo.iter().enumerate() {
            rpo_number[b.index()] = Some(i);
        }

        let mut idom: Vec<Option<BlockId>> = vec![None; n];
        if let Some(&entry) = rpo.first() {
            idom[entry.index()] = Some(entry);
        }

        let mut changed = true;
        while changed {
            changed = false;
            for &b in rpo.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for &p in graph.block(b).preds() {
                    if idom[p.index()].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(current) => intersect(&idom, &rpo_number, p, current),
                    });
                }
                if new_idom.is_some() && idom[b.index()] != new_idom {
                    idom[b.index()] = new_idom;
                    changed = true;
                }
            }
        }

        let mut children: Vec<Vec<BlockId>> = vec![Vec::new(); n];
        for &b in rpo.iter().skip(1) {
            if let Some(parent) = idom[b.index()] {
                children[parent.index()].push(b);
            }
        }

        Self {
            rpo,
            rpo_number,
            idom,
            children,
        }
    }

    /// Reachable blocks in reverse postorder.
    #[must_use]
    pub fn reverse_postorder(&self) -> &[BlockId] {
        &self.rpo
    }

    /// Returns `true` if `block` is reachable from the entry.
    #[must_use]
    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.rpo_number[block.index()].is_some()
    }

    /// The immediate dominator of `block`, `None` for the entry and for
    /// unreachable blocks.
    #[must_use]
    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        match self.idom[block.index()] {
            Some(d) if d != block => Some(d),
            _ => None,
        }
    }

    /// Returns `true` if `a` dominates `b` (reflexively).
    #[must_use]
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let (Some(num_a), Some(_)) = (self.rpo_number[a.index()], self.rpo_number[b.index()]) else {
            return false;
        };
        let mut cur = b;
        while self.rpo_number[cur.index()].map_or(false, |n| n > num_a) {
            match self.idom[cur.index()] {
                Some(d) => cur = d,
                None => return false,
            }
        }
        cur == a
    }

    /// Dominator-tree children of `block`.
    #[must_use]
    pub fn children(&self, block: BlockId) -> &[BlockId] {
        &self.children[block.index()]
    }
}

fn intersect(
    idom: &[Option<BlockId>],
    rpo_number: &[Option<usize>],
    mut a: BlockId,
    mut b: BlockId,
) -> BlockId {
    let num = |x: BlockId| rpo_number[x.index()].unwrap_or(usize::MAX);
    while a != b {
        while num(a) > num(b) {
            a = idom[a.index()].unwrap_or(a);
        }
        while num(b) > num(a) {
            b = idom[b.index()].unwrap_or(b);
        }
    }
    a
}

fn reverse_postorder(graph: &FlowGraph) -> Vec<BlockId> {
    let n = graph.block_count();
    let mut visited = vec![false; n];
    let mut postorder = Vec::with_capacity(n);
    // Entry with an explicit DFS stack: (block, next successor index).
    let mut stack: Vec<(BlockId, usize)> = Vec::new();
    if n > 0 {
        visited[graph.entry().index()] = true;
        stack.push((graph.entry(), 0));
    }
    while let Some(top) = stack.last_mut() {
        let b = top.0;
        let succs = graph.successors(b);
        if top.1 < succs.len() {
            let s = succs[top.1];
            top.1 += 1;
            if !visited[s.index()] {
                visited[s.index()] = true;
                stack.push((s, 0));
            }
        } else {
            postorder.push(b);
            stack.pop();
        }
    }
    postorder.reverse();
    postorder
}
