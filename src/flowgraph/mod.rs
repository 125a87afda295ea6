//! The SSA flow graph IR.
//!
//! # Architecture
//!
//! - [`graph`] - the instruction arena, blocks as linked spans, use lists
//! - [`instruction`] - the closed [`Op`] set and its effect summaries
//! - [`block`] - basic blocks, try regions, catch entries
//! - [`slot`] - heap locations ([`Slot`], [`FieldId`])
//! - [`value`] - constants and opaque external references
//! - [`scope`] - lexical scopes and environment flattening
//! - [`builder`] - closure DSL for assembling graphs
//!
//! # Key invariants
//!
//! - Instruction identifiers are stable: unlinking never invalidates an
//!   [`InstrId`].
//! - Use lists and operand lists agree in both directions at all times
//!   ([`FlowGraph::validate`] checks this).
//! - A definition can only be unlinked once nothing references it.

pub mod block;
pub mod builder;
pub mod graph;
pub mod instruction;
pub mod scope;
pub mod slot;
pub mod value;

pub use block::{Block, CatchEntry, TryIndex, TryRegion};
pub use builder::{BlockBuilder, FlowGraphBuilder, FunctionBuilder};
pub use graph::{BlockId, FlowGraph, InstrId, UseRef};
pub use instruction::{BinaryOp, Effects, Op, UnaryOp};
pub use scope::{Environment, ScopeId, ScopeTree, ScopeVariable};
pub use slot::{FieldId, Slot};
pub use value::{ClassId, ConstValue, FuncId};
