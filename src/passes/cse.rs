//! Dominator-based common subexpression elimination.
//!
//! Walks the dominator tree in preorder carrying a scoped table of
//! available pure expressions. An expression found in the table was
//! computed in a block dominating the current one (or earlier in the same
//! block), so the recomputation can be replaced outright and unlinked.
//! Leaving a subtree pops everything it added, which is exactly what keeps
//! hits dominance-correct: siblings never see each other's expressions.
//!
//! Commutative operands are normalized before hashing, so `add v1, v0`
//! hits an earlier `add v0, v1`.

use std::collections::HashMap;

use crate::analysis::DominatorTree;
use crate::flowgraph::{BinaryOp, BlockId, ConstValue, FlowGraph, InstrId, Op, UnaryOp};
use crate::Result;

use super::events::{EventKind, EventLog};

/// A hashable key representing a pure expression.
///
/// Captures the operation and operands but not the instruction itself:
/// two instructions with the same key compute the same value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ExprKey {
    Const(ConstValue),
    Binary(BinaryOp, InstrId, InstrId),
    Unary(UnaryOp, InstrId),
}

impl ExprKey {
    /// Creates a normalized key, or `None` for operations that must not be
    /// value-numbered (anything impure, plus allocations, which produce a
    /// distinct object per execution).
    ///
    /// Constants key on their value, so duplicate materializations merge
    /// first and expressions over them become operand-identical.
    fn from_op(op: &Op) -> Option<Self> {
        if !op.is_pure_expression() {
            return None;
        }
        match op {
            Op::Constant { value } => Some(ExprKey::Const(*value)),
            Op::Binary { op: kind, left, right } => {
                let (left, right) = if kind.is_commutative() && right < left {
                    (*right, *left)
                } else {
                    (*left, *right)
                };
                Some(ExprKey::Binary(*kind, left, right))
            }
            Op::Unary { op: kind, operand } => Some(ExprKey::Unary(*kind, *operand)),
            _ => None,
        }
    }
}

/// Expression table with scope push/pop following the dominator walk.
#[derive(Default)]
struct ScopedTable {
    map: HashMap<ExprKey, InstrId>,
    undo: Vec<(ExprKey, Option<InstrId>)>,
    marks: Vec<usize>,
}

impl ScopedTable {
    fn enter_scope(&mut self) {
        self.marks.push(self.undo.len());
    }

    fn leave_scope(&mut self) {
        let mark = self.marks.pop().unwrap_or(0);
        while self.undo.len() > mark {
            if let Some((key, previous)) = self.undo.pop() {
                match previous {
                    Some(value) => {
                        self.map.insert(key, value);
                    }
                    None => {
                        self.map.remove(&key);
                    }
                }
            }
        }
    }

    fn get(&self, key: &ExprKey) -> Option<InstrId> {
        self.map.get(key).copied()
    }

    fn insert(&mut self, key: ExprKey, value: InstrId) {
        let previous = self.map.insert(key.clone(), value);
        self.undo.push((key, previous));
    }
}

/// Eliminates redundant pure expressions across the dominator tree.
///
/// Returns the number of instructions removed.
pub fn eliminate_common_subexpressions(
    graph: &mut FlowGraph,
    domtree: &DominatorTree,
    log: &mut EventLog,
) -> Result<usize> {
    enum Visit {
        Enter(BlockId),
        Exit,
    }

    let mut table = ScopedTable::default();
    let mut eliminated = 0;

    let Some(&entry) = domtree.reverse_postorder().first() else {
        return Ok(0);
    };
    let mut stack = vec![Visit::Enter(entry)];
    while let Some(visit) = stack.pop() {
        match visit {
            Visit::Enter(block) => {
                table.enter_scope();
                for id in graph.instr_ids(block) {
                    let Some(key) = ExprKey::from_op(graph.op(id)) else {
                        continue;
                    };
                    match table.get(&key) {
                        Some(prior) => {
                            // Operand rewrites already happened: operand
                            // definitions dominate this instruction, so
                            // their blocks were visited first.
                            let replaced = graph.replace_all_uses(id, prior);
                            graph.unlink(id)?;
                            log.record(EventKind::ExpressionEliminated)
                                .message(format!("{id} -> {prior} ({replaced} uses)"));
                            eliminated += 1;
                        }
                        None => table.insert(key, id),
                    }
                }
                stack.push(Visit::Exit);
                for &child in domtree.children(block).iter().rev() {
                    stack.push(Visit::Enter(child));
                }
            }
            Visit::Exit => table.leave_scope(),
        }
    }

    Ok(eliminated)
}
