//! Closure-based graph construction DSL.
//!
//! Used heavily by tests and by front ends that assemble small graphs by
//! hand:
//!
//! ```rust
//! use ssaopt::flowgraph::FlowGraphBuilder;
//!
//! let graph = FlowGraphBuilder::new(2, 0).build_with(|f| {
//!     f.block(0, |b| {
//!         let v0 = b.const_int(1);
//!         let v1 = b.const_int(2);
//!         let v2 = b.add(v0, v1);
//!         b.goto(1);
//!         let _ = v2;
//!     });
//!     f.block(1, |b| {
//!         b.ret();
//!     });
//! });
//! assert_eq!(graph.block_count(), 2);
//! ```

use super::block::CatchEntry;
use super::graph::{BlockId, FlowGraph, InstrId};
use super::instruction::{BinaryOp, Op, UnaryOp};
use super::slot::FieldId;
use super::value::{ClassId, ConstValue, FuncId};

/// Builds a [`FlowGraph`] with a fixed block count.
pub struct FlowGraphBuilder {
    graph: FlowGraph,
}

impl FlowGraphBuilder {
    /// Starts a graph with `num_blocks` blocks (block 0 is the entry) and
    /// `env_len` environment slots.
    #[must_use]
    pub fn new(num_blocks: usize, env_len: usize) -> Self {
        Self {
            graph: FlowGraph::new(num_blocks, env_len),
        }
    }

    /// Runs `build` against a [`FunctionBuilder`], then finalizes
    /// predecessor lists and returns the graph.
    #[must_use]
    pub fn build_with(mut self, build: impl FnOnce(&mut FunctionBuilder)) -> FlowGraph {
        {
            let mut f = FunctionBuilder { graph: &mut self.graph };
            build(&mut f);
        }
        self.graph.recompute_preds();
        self.graph
    }
}

/// Per-function construction handle.
pub struct FunctionBuilder<'g> {
    graph: &'g mut FlowGraph,
}

impl FunctionBuilder<'_> {
    /// Registers a try region handled by the catch entry at block
    /// `catch_index` and returns the region index.
    pub fn try_region(&mut self, catch_index: usize) -> usize {
        self.graph.add_try_region(BlockId::new(catch_index))
    }

    /// Fills block `index` with instructions.
    pub fn block(&mut self, index: usize, fill: impl FnOnce(&mut BlockBuilder)) {
        let mut b = BlockBuilder {
            graph: self.graph,
            block: BlockId::new(index),
            initial_defs: Vec::new(),
        };
        fill(&mut b);
    }

    /// Fills block `index` as part of try region `try_index`.
    pub fn covered_block(&mut self, index: usize, try_index: usize, fill: impl FnOnce(&mut BlockBuilder)) {
        self.graph.cover_block(BlockId::new(index), try_index);
        self.block(index, fill);
    }

    /// Fills block `index` as a catch entry.
    ///
    /// One `Parameter` initial definition is materialized per entry of
    /// `env_indices` before `fill` runs; `fill` can retrieve them through
    /// [`BlockBuilder::initial_def`].
    pub fn catch_block(&mut self, index: usize, env_indices: &[usize], fill: impl FnOnce(&mut BlockBuilder)) {
        let block = BlockId::new(index);
        let mut initial_defs = Vec::with_capacity(env_indices.len());
        for &env_index in env_indices {
            initial_defs.push(self.graph.append(block, Op::Parameter { env_index }));
        }
        self.graph.set_catch_entry(
            block,
            CatchEntry {
                initial_defs: initial_defs.clone(),
                synchronized: Vec::new(),
            },
        );
        let mut b = BlockBuilder {
            graph: self.graph,
            block,
            initial_defs,
        };
        fill(&mut b);
    }
}

/// Appends instructions to one block.
pub struct BlockBuilder<'g> {
    graph: &'g mut FlowGraph,
    block: BlockId,
    initial_defs: Vec<InstrId>,
}

impl BlockBuilder<'_> {
    fn push(&mut self, op: Op) -> InstrId {
        self.graph.append(self.block, op)
    }

    /// The `k`-th catch-entry initial definition of this block.
    #[must_use]
    pub fn initial_def(&self, k: usize) -> InstrId {
        self.initial_defs[k]
    }

    /// `const null`
    pub fn const_null(&mut self) -> InstrId {
        self.push(Op::Constant { value: ConstValue::Null })
    }

    /// `const <int>`
    pub fn const_int(&mut self, value: i64) -> InstrId {
        self.push(Op::Constant {
            value: ConstValue::Int(value),
        })
    }

    /// `const <bool>`
    pub fn const_bool(&mut self, value: bool) -> InstrId {
        self.push(Op::Constant {
            value: ConstValue::Bool(value),
        })
    }

    /// `param env[i]`
    pub fn param(&mut self, env_index: usize) -> InstrId {
        self.push(Op::Parameter { env_index })
    }

    /// `alloc class#<class>`
    pub fn alloc(&mut self, class: u32) -> InstrId {
        self.push(Op::AllocateObject { class: ClassId(class) })
    }

    /// `alloc_array <length>`
    pub fn alloc_array(&mut self, length: InstrId) -> InstrId {
        self.push(Op::AllocateArray { length })
    }

    /// `load <object>.field#<field>`
    pub fn load_field(&mut self, object: InstrId, field: u32) -> InstrId {
        self.push(Op::LoadField {
            object,
            field: FieldId(field),
        })
    }

    /// `store <object>.field#<field> <- <value>`
    pub fn store_field(&mut self, object: InstrId, field: u32, value: InstrId) -> InstrId {
        self.push(Op::StoreField {
            object,
            field: FieldId(field),
            value,
        })
    }

    /// `load <array>[<index>]`
    pub fn load_indexed(&mut self, array: InstrId, index: InstrId) -> InstrId {
        self.push(Op::LoadIndexed { array, index })
    }

    /// `store <array>[<index>] <- <value>`
    pub fn store_indexed(&mut self, array: InstrId, index: InstrId, value: InstrId) -> InstrId {
        self.push(Op::StoreIndexed { array, index, value })
    }

    /// `load_local env[i]`
    pub fn load_local(&mut self, env_index: usize) -> InstrId {
        self.push(Op::LoadLocal { env_index })
    }

    /// `store_local env[i] <- <value>`
    pub fn store_local(&mut self, env_index: usize, value: InstrId) -> InstrId {
        self.push(Op::StoreLocal { env_index, value })
    }

    /// `redef <value>`
    pub fn redef(&mut self, value: InstrId) -> InstrId {
        self.push(Op::Redefinition { value })
    }

    /// `check_null <value>`
    pub fn check_null(&mut self, value: InstrId) -> InstrId {
        self.push(Op::CheckNull { value })
    }

    /// `assert <value> is class#<class>`
    pub fn assert_assignable(&mut self, value: InstrId, class: u32) -> InstrId {
        self.push(Op::AssertAssignable {
            value,
            class: ClassId(class),
        })
    }

    /// Any binary operation.
    pub fn binary(&mut self, op: BinaryOp, left: InstrId, right: InstrId) -> InstrId {
        self.push(Op::Binary { op, left, right })
    }

    /// `add <left>, <right>`
    pub fn add(&mut self, left: InstrId, right: InstrId) -> InstrId {
        self.binary(BinaryOp::Add, left, right)
    }

    /// `sub <left>, <right>`
    pub fn sub(&mut self, left: InstrId, right: InstrId) -> InstrId {
        self.binary(BinaryOp::Sub, left, right)
    }

    /// `mul <left>, <right>`
    pub fn mul(&mut self, left: InstrId, right: InstrId) -> InstrId {
        self.binary(BinaryOp::Mul, left, right)
    }

    /// Any unary operation.
    pub fn unary(&mut self, op: UnaryOp, operand: InstrId) -> InstrId {
        self.push(Op::Unary { op, operand })
    }

    /// `neg <operand>`
    pub fn neg(&mut self, operand: InstrId) -> InstrId {
        self.unary(UnaryOp::Neg, operand)
    }

    /// `call fn#<function>(<args>..)`
    pub fn call(&mut self, function: u32, args: &[InstrId]) -> InstrId {
        self.push(Op::StaticCall {
            function: FuncId(function),
            args: args.to_vec(),
        })
    }

    /// `return <value>`
    pub fn ret_val(&mut self, value: InstrId) -> InstrId {
        self.push(Op::Return { value: Some(value) })
    }

    /// `return`
    pub fn ret(&mut self) -> InstrId {
        self.push(Op::Return { value: None })
    }

    /// `goto B<target>`
    pub fn goto(&mut self, target: usize) -> InstrId {
        self.push(Op::Goto {
            target: BlockId::new(target),
        })
    }

    /// `branch <condition> ? B<t> : B<f>`
    pub fn branch(&mut self, condition: InstrId, true_target: usize, false_target: usize) -> InstrId {
        self.push(Op::Branch {
            condition,
            true_target: BlockId::new(true_target),
            false_target: BlockId::new(false_target),
        })
    }

    /// `throw <exception>`
    pub fn throw(&mut self, exception: InstrId) -> InstrId {
        self.push(Op::Throw { exception })
    }

    /// `phi(<inputs>..)`, one input per predecessor in predecessor order.
    pub fn phi(&mut self, inputs: &[InstrId]) -> InstrId {
        self.push(Op::Phi {
            inputs: inputs.to_vec(),
        })
    }
}
