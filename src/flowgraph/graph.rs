//! The instruction arena and flow graph.
//!
//! Instructions live in a single arena ([`FlowGraph::instrs`]) and are
//! addressed by stable [`InstrId`] indices. Blocks are doubly-linked spans
//! over the arena: unlinking an instruction splices it out of its block in
//! constant time without invalidating any identifier. Every definition
//! carries its full use list, so replacing all uses of a value is a drain
//! over that list rather than a scan of the function.

use std::fmt;

use super::block::{Block, CatchEntry, TryIndex, TryRegion};
use super::instruction::Op;
use super::value::ConstValue;
use crate::Result;

/// Stable identifier of an instruction in a [`FlowGraph`] arena.
///
/// Identifiers are never reused; an unlinked instruction keeps its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub(crate) usize);

impl InstrId {
    /// Creates an identifier from a raw arena index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the raw arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Stable identifier of a basic block in a [`FlowGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) usize);

impl BlockId {
    /// Creates an identifier from a raw block index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the raw block index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// One recorded use of a definition: which instruction, which operand slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UseRef {
    /// The instruction using the value.
    pub user: InstrId,
    /// Index into the user's operand list.
    pub operand: usize,
}

/// An arena node: the operation plus its linkage and use list.
#[derive(Debug, Clone)]
pub(crate) struct InstrNode {
    pub(crate) op: Op,
    /// Containing block; `None` once unlinked.
    pub(crate) block: Option<BlockId>,
    pub(crate) prev: Option<InstrId>,
    pub(crate) next: Option<InstrId>,
    /// Instructions using this one as an operand.
    pub(crate) uses: Vec<UseRef>,
}

/// A function body in SSA form.
pub struct FlowGraph {
    instrs: Vec<InstrNode>,
    blocks: Vec<Block>,
    try_regions: Vec<TryRegion>,
    env_len: usize,
    constant_null: Option<InstrId>,
}

impl FlowGraph {
    /// Creates an empty graph with `num_blocks` blocks and a flattened
    /// environment of `env_len` slots. Block 0 is the entry.
    #[must_use]
    pub fn new(num_blocks: usize, env_len: usize) -> Self {
        Self {
            instrs: Vec::new(),
            blocks: vec![Block::default(); num_blocks],
            try_regions: Vec::new(),
            env_len,
            constant_null: None,
        }
    }

    /// Number of flattened environment slots.
    #[must_use]
    pub fn env_len(&self) -> usize {
        self.env_len
    }

    /// Number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Number of arena slots (including unlinked instructions).
    #[must_use]
    pub fn instr_count(&self) -> usize {
        self.instrs.len()
    }

    /// The entry block.
    #[must_use]
    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    /// Iterator over all block identifiers.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len()).map(BlockId)
    }

    /// The block with the given identifier.
    ///
    /// # Panics
    ///
    /// Panics if `id` is out of range; block identifiers only come from
    /// this graph.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }

    pub(crate) fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0]
    }

    /// The operation of the given instruction.
    #[must_use]
    pub fn op(&self, id: InstrId) -> &Op {
        &self.instrs[id.0].op
    }

    /// The block containing `id`, or `None` if it has been unlinked.
    #[must_use]
    pub fn block_of(&self, id: InstrId) -> Option<BlockId> {
        self.instrs[id.0].block
    }

    /// Returns `true` while `id` is part of a block.
    #[must_use]
    pub fn is_linked(&self, id: InstrId) -> bool {
        self.instrs[id.0].block.is_some()
    }

    /// The recorded uses of `id`.
    #[must_use]
    pub fn uses(&self, id: InstrId) -> &[UseRef] {
        &self.instrs[id.0].uses
    }

    /// Appends `op` at the tail of `block` and records its operand uses.
    pub fn append(&mut self, block: BlockId, op: Op) -> InstrId {
        let id = self.alloc(op, block);
        match self.blocks[block.0].tail {
            Some(tail) => {
                self.instrs[tail.0].next = Some(id);
                self.instrs[id.0].prev = Some(tail);
                self.blocks[block.0].tail = Some(id);
            }
            None => {
                self.blocks[block.0].head = Some(id);
                self.blocks[block.0].tail = Some(id);
            }
        }
        id
    }

    /// Inserts `op` at the head of `block` and records its operand uses.
    pub fn prepend(&mut self, block: BlockId, op: Op) -> InstrId {
        let id = self.alloc(op, block);
        match self.blocks[block.0].head {
            Some(head) => {
                self.instrs[head.0].prev = Some(id);
                self.instrs[id.0].next = Some(head);
                self.blocks[block.0].head = Some(id);
            }
            None => {
                self.blocks[block.0].head = Some(id);
                self.blocks[block.0].tail = Some(id);
            }
        }
        id
    }

    fn alloc(&mut self, op: Op, block: BlockId) -> InstrId {
        let id = InstrId(self.instrs.len());
        self.instrs.push(InstrNode {
            op,
            block: Some(block),
            prev: None,
            next: None,
            uses: Vec::new(),
        });
        let operands = self.instrs[id.0].op.operands();
        for (slot, operand) in operands.into_iter().enumerate() {
            self.instrs[operand.0].uses.push(UseRef { user: id, operand: slot });
        }
        id
    }

    /// The graph-owned null constant, materialized at the entry head on
    /// first request.
    pub fn constant_null(&mut self) -> InstrId {
        if let Some(id) = self.constant_null {
            return id;
        }
        let entry = self.entry();
        let id = self.prepend(entry, Op::Constant { value: ConstValue::Null });
        self.constant_null = Some(id);
        id
    }

    /// Rewrites every use of `old` to reference `new` instead.
    ///
    /// Use lists stay consistent throughout: each use is repointed and
    /// re-registered in one step, so the graph never holds a dangling
    /// reference. Returns the number of uses rewritten.
    pub fn replace_all_uses(&mut self, old: InstrId, new: InstrId) -> usize {
        if old == new {
            return 0;
        }
        let uses = std::mem::take(&mut self.instrs[old.0].uses);
        let count = uses.len();
        for use_ref in uses {
            let mut slots = self.instrs[use_ref.user.0].op.operand_slots();
            *slots[use_ref.operand] = new;
            self.instrs[new.0].uses.push(use_ref);
        }
        count
    }

    /// Splices `id` out of its block and releases its operand uses.
    ///
    /// Unlinking a definition that is still referenced would leave dangling
    /// operands, so it is a fatal invariant violation.
    pub fn unlink(&mut self, id: InstrId) -> Result<()> {
        if !self.instrs[id.0].uses.is_empty() {
            return Err(invariant_error!(
                "cannot unlink {id}: still referenced by {} instruction(s)",
                self.instrs[id.0].uses.len()
            ));
        }
        let Some(block) = self.instrs[id.0].block else {
            return Err(invariant_error!("{id} is already unlinked"));
        };

        let prev = self.instrs[id.0].prev;
        let next = self.instrs[id.0].next;
        match prev {
            Some(p) => self.instrs[p.0].next = next,
            None => self.blocks[block.0].head = next,
        }
        match next {
            Some(n) => self.instrs[n.0].prev = prev,
            None => self.blocks[block.0].tail = prev,
        }
        self.instrs[id.0].prev = None;
        self.instrs[id.0].next = None;
        self.instrs[id.0].block = None;

        // Release the operand uses this instruction held.
        let operands = self.instrs[id.0].op.operands();
        for operand in operands {
            self.instrs[operand.0].uses.retain(|u| u.user != id);
        }
        Ok(())
    }

    /// Iterator over the instructions of `block`, head to tail.
    pub fn instructions(&self, block: BlockId) -> BlockInstrs<'_> {
        BlockInstrs {
            graph: self,
            cursor: self.blocks[block.0].head,
        }
    }

    /// Collects the instruction identifiers of `block`.
    ///
    /// Convenient for passes that unlink while walking.
    #[must_use]
    pub fn instr_ids(&self, block: BlockId) -> Vec<InstrId> {
        self.instructions(block).map(|(id, _)| id).collect()
    }

    /// Registers a try region handled by `catch_block` and returns its index.
    pub fn add_try_region(&mut self, catch_block: BlockId) -> TryIndex {
        self.try_regions.push(TryRegion { catch_block });
        self.try_regions.len() - 1
    }

    /// All try regions.
    #[must_use]
    pub fn try_regions(&self) -> &[TryRegion] {
        &self.try_regions
    }

    /// Marks `block` as covered by try region `try_index`.
    pub fn cover_block(&mut self, block: BlockId, try_index: TryIndex) {
        self.blocks[block.0].try_index = Some(try_index);
    }

    /// Installs the catch-entry payload on `block`.
    pub fn set_catch_entry(&mut self, block: BlockId, entry: CatchEntry) {
        self.blocks[block.0].catch = Some(entry);
    }

    pub(crate) fn catch_entry_mut(&mut self, block: BlockId) -> Option<&mut CatchEntry> {
        self.blocks[block.0].catch.as_mut()
    }

    /// Successors of `block`: the terminator's targets plus the exceptional
    /// edge to the covering catch entry, if any.
    #[must_use]
    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        let mut succs = match self.blocks[block.0].tail {
            Some(tail) => self.instrs[tail.0].op.branch_targets(),
            None => Vec::new(),
        };
        if let Some(t) = self.blocks[block.0].try_index {
            let catch = self.try_regions[t].catch_block;
            if !succs.contains(&catch) {
                succs.push(catch);
            }
        }
        succs
    }

    /// Recomputes every block's predecessor list from the successor
    /// relation. Call after construction and after any edge change.
    pub fn recompute_preds(&mut self) {
        for block in &mut self.blocks {
            block.preds.clear();
        }
        for b in 0..self.blocks.len() {
            for succ in self.successors(BlockId(b)) {
                self.blocks[succ.0].preds.push(BlockId(b));
            }
        }
    }

    /// Checks the structural invariants analyses rely on.
    ///
    /// Every block with instructions must end in a terminator, operands
    /// must reference arena slots, and use lists must agree with operand
    /// lists in both directions.
    pub fn validate(&self) -> Result<()> {
        for b in self.block_ids() {
            if let Some(tail) = self.blocks[b.0].tail {
                if !self.instrs[tail.0].op.is_terminator() {
                    return Err(crate::Error::MissingTerminator(b));
                }
            }
            for (id, op) in self.instructions(b) {
                for (slot, operand) in op.operands().into_iter().enumerate() {
                    if operand.0 >= self.instrs.len() {
                        return Err(crate::Error::UnknownInstruction(operand));
                    }
                    let registered = self.instrs[operand.0]
                        .uses
                        .iter()
                        .any(|u| u.user == id && u.operand == slot);
                    if !registered {
                        return Err(invariant_error!(
                            "use list of {operand} is missing operand {slot} of {id}"
                        ));
                    }
                }
            }
        }
        for (index, node) in self.instrs.iter().enumerate() {
            let id = InstrId(index);
            for use_ref in &node.uses {
                let operands = self.instrs[use_ref.user.0].op.operands();
                if operands.get(use_ref.operand) != Some(&id) {
                    return Err(invariant_error!(
                        "use list of {id} names {} operand {}, which does not match",
                        use_ref.user,
                        use_ref.operand
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Iterator over the linked instructions of one block.
pub struct BlockInstrs<'a> {
    graph: &'a FlowGraph,
    cursor: Option<InstrId>,
}

impl<'a> Iterator for BlockInstrs<'a> {
    type Item = (InstrId, &'a Op);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        self.cursor = self.graph.instrs[id.0].next;
        Some((id, &self.graph.instrs[id.0].op))
    }
}

impl fmt::Display for FlowGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.block_ids() {
            write!(f, "{b}:")?;
            if let Some(t) = self.blocks[b.0].try_index {
                write!(f, " (try {t})")?;
            }
            if self.blocks[b.0].catch.is_some() {
                write!(f, " (catch)")?;
            }
            writeln!(f)?;
            for (id, op) in self.instructions(b) {
                if op.is_definition() {
                    writeln!(f, "  {id} = {op}")?;
                } else {
                    writeln!(f, "  {op}")?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flowgraph::instruction::BinaryOp;

    fn two_const_graph() -> (FlowGraph, InstrId, InstrId) {
        let mut g = FlowGraph::new(1, 0);
        let a = g.append(BlockId(0), Op::Constant { value: ConstValue::Int(1) });
        let b = g.append(BlockId(0), Op::Constant { value: ConstValue::Int(2) });
        (g, a, b)
    }

    #[test]
    fn test_append_links() {
        let (mut g, a, b) = two_const_graph();
        let sum = g.append(
            BlockId(0),
            Op::Binary {
                op: BinaryOp::Add,
                left: a,
                right: b,
            },
        );
        g.append(BlockId(0), Op::Return { value: Some(sum) });

        let ids: Vec<_> = g.instructions(BlockId(0)).map(|(id, _)| id).collect();
        assert_eq!(ids.len(), 4);
        assert_eq!(ids[0], a);
        assert_eq!(ids[2], sum);
        assert_eq!(g.uses(a), &[UseRef { user: sum, operand: 0 }]);
        assert_eq!(g.uses(b), &[UseRef { user: sum, operand: 1 }]);
        assert_eq!(g.uses(sum).len(), 1);
        assert!(g.validate().is_ok());
    }

    #[test]
    fn test_replace_all_uses() {
        let (mut g, a, b) = two_const_graph();
        let s1 = g.append(
            BlockId(0),
            Op::Binary {
                op: BinaryOp::Add,
                left: a,
                right: b,
            },
        );
        let s2 = g.append(
            BlockId(0),
            Op::Binary {
                op: BinaryOp::Mul,
                left: s1,
                right: s1,
            },
        );
        g.append(BlockId(0), Op::Return { value: Some(s2) });
        let replaced = g.replace_all_uses(s1, a);
        assert_eq!(replaced, 2);
        assert!(g.uses(s1).is_empty());
        match g.op(s2) {
            Op::Binary { left, right, .. } => {
                assert_eq!(*left, a);
                assert_eq!(*right, a);
            }
            other => panic!("unexpected op {other}"),
        }
        assert!(g.validate().is_ok());
    }

    #[test]
    fn test_unlink_rejects_live_uses() {
        let (mut g, a, b) = two_const_graph();
        let sum = g.append(
            BlockId(0),
            Op::Binary {
                op: BinaryOp::Add,
                left: a,
                right: b,
            },
        );
        assert!(g.unlink(a).is_err());

        // After dropping the use it unlinks fine.
        g.replace_all_uses(sum, a);
        g.unlink(sum).unwrap();
        assert!(!g.is_linked(sum));
        assert!(g.uses(a).iter().all(|u| u.user != sum));
    }

    #[test]
    fn test_unlink_splices_block() {
        let (mut g, a, b) = two_const_graph();
        g.replace_all_uses(a, b); // no uses to move, a simply becomes dead
        g.unlink(a).unwrap();
        let ids: Vec<_> = g.instructions(BlockId(0)).map(|(id, _)| id).collect();
        assert_eq!(ids, vec![b]);
        assert_eq!(g.block(BlockId(0)).head(), Some(b));
        assert_eq!(g.block(BlockId(0)).tail(), Some(b));
    }

    #[test]
    fn test_constant_null_is_shared_and_at_entry_head() {
        let (mut g, a, _) = two_const_graph();
        let n1 = g.constant_null();
        let n2 = g.constant_null();
        assert_eq!(n1, n2);
        let first = g.instructions(BlockId(0)).next().map(|(id, _)| id);
        assert_eq!(first, Some(n1));
        assert_ne!(first, Some(a));
    }

    #[test]
    fn test_successors_include_exceptional_edge() {
        let mut g = FlowGraph::new(3, 0);
        g.append(BlockId(0), Op::Goto { target: BlockId(1) });
        g.append(BlockId(1), Op::Return { value: None });
        g.append(BlockId(2), Op::Return { value: None });
        let t = g.add_try_region(BlockId(2));
        g.cover_block(BlockId(1), t);
        g.set_catch_entry(BlockId(2), CatchEntry::default());
        g.recompute_preds();

        assert_eq!(g.successors(BlockId(0)), vec![BlockId(1)]);
        assert_eq!(g.successors(BlockId(1)), vec![BlockId(2)]);
        assert_eq!(g.block(BlockId(2)).preds(), &[BlockId(1)]);
        assert!(g.block(BlockId(2)).is_catch_entry());
    }

    #[test]
    fn test_validate_missing_terminator() {
        let (g, _, _) = two_const_graph();
        assert!(matches!(g.validate(), Err(crate::Error::MissingTerminator(_))));
    }
}
