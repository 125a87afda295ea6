//! # ssaopt Prelude
//!
//! Curated re-exports of the types and functions most callers need, so a
//! single glob import covers graph construction, analysis and the
//! optimization pipeline.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The error type for all ssaopt operations
pub use crate::Error;

/// The result type used throughout ssaopt
pub use crate::Result;

// ================================================================================================
// Flow Graph
// ================================================================================================

/// The SSA function body and its identifiers
pub use crate::flowgraph::{BlockId, FlowGraph, InstrId, UseRef};

/// Graph construction
pub use crate::flowgraph::{BlockBuilder, FlowGraphBuilder, FunctionBuilder};

/// Instructions and their effect summaries
pub use crate::flowgraph::{BinaryOp, Effects, Op, UnaryOp};

/// Blocks, try regions and catch entries
pub use crate::flowgraph::{Block, CatchEntry, TryIndex, TryRegion};

/// Values, classes and slots
pub use crate::flowgraph::{ClassId, ConstValue, FieldId, FuncId, Slot};

/// Lexical scopes and the flattened environment
pub use crate::flowgraph::{Environment, ScopeId, ScopeTree, ScopeVariable};

// ================================================================================================
// Analyses
// ================================================================================================

/// Dominators, loops and alias classification
pub use crate::analysis::{detect_loops, AliasAnalysis, AliasIdentity, DominatorTree, NaturalLoop};

// ================================================================================================
// Passes and Pipeline
// ================================================================================================

/// Change reporting
pub use crate::passes::{Event, EventKind, EventLog};

/// Individual passes
pub use crate::passes::{
    eliminate_common_subexpressions, forward_loads_and_stores, synchronize_catch_entries,
};

/// Pipeline drivers
pub use crate::passes::{
    eliminate_redundancies, optimize_all, optimize_catch_entries, optimize_function, FunctionUnit,
};
