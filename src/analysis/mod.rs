//! Flow graph analyses.
//!
//! Everything here is read-only over a [`crate::flowgraph::FlowGraph`]:
//! dominators, natural loops and alias classification. Passes consume
//! these results; none of the analyses mutates the graph.

pub mod alias;
pub mod dominators;
pub mod loops;

pub use alias::{AliasAnalysis, AliasIdentity};
pub use dominators::DominatorTree;
pub use loops::{detect_loops, NaturalLoop};
