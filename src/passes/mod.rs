//! Optimization passes and pipeline drivers.
//!
//! Each pass takes a mutable [`FlowGraph`], the analyses it depends on and
//! an [`EventLog`] to report changes into. The drivers below wire them
//! together in the only order that is sound: alias classification runs to
//! completion before the first forwarding decision, forwarding runs before
//! expression elimination so forwarded loads become CSE operands, and the
//! catch-entry synchronizer is independent of both.

pub mod catch_sync;
pub mod cse;
pub mod events;
pub mod forwarding;

use rayon::prelude::*;

use crate::analysis::{AliasAnalysis, DominatorTree};
use crate::flowgraph::{Environment, FlowGraph};
use crate::Result;

pub use catch_sync::synchronize_catch_entries;
pub use cse::eliminate_common_subexpressions;
pub use events::{Event, EventKind, EventLog};
pub use forwarding::forward_loads_and_stores;

/// Runs the redundancy-elimination pipeline on one graph.
///
/// Returns `true` if any instruction was removed. The dominator tree is
/// computed once: none of the passes adds or removes control-flow edges,
/// so it stays valid throughout.
pub fn eliminate_redundancies(graph: &mut FlowGraph, log: &mut EventLog) -> Result<bool> {
    graph.validate()?;
    let domtree = DominatorTree::compute(graph);
    let aliases = AliasAnalysis::classify(graph)?;

    let mut removed = forward_loads_and_stores(graph, &domtree, &aliases, log)?;
    removed += eliminate_common_subexpressions(graph, &domtree, log)?;
    Ok(removed > 0)
}

/// Runs the catch-entry synchronizer on one graph.
///
/// Returns `true` if any initial definition was pruned.
pub fn optimize_catch_entries(
    graph: &mut FlowGraph,
    env: &Environment,
    log: &mut EventLog,
) -> Result<bool> {
    graph.validate()?;
    Ok(synchronize_catch_entries(graph, env, log)? > 0)
}

/// One function awaiting optimization: its graph and flattened environment.
pub struct FunctionUnit {
    /// The SSA body.
    pub graph: FlowGraph,
    /// The flattened local environment the body addresses.
    pub env: Environment,
}

/// Runs the full pipeline on one function.
pub fn optimize_function(unit: &mut FunctionUnit, log: &mut EventLog) -> Result<bool> {
    let redundancies = eliminate_redundancies(&mut unit.graph, log)?;
    let pruned = optimize_catch_entries(&mut unit.graph, &unit.env, log)?;
    Ok(redundancies || pruned)
}

/// Optimizes every function in parallel, merging the per-function logs.
///
/// Functions are independent, so failures do not poison each other; the
/// first error encountered is returned.
pub fn optimize_all(units: &mut [FunctionUnit]) -> Result<EventLog> {
    units
        .par_iter_mut()
        .map(|unit| {
            let mut log = EventLog::new();
            optimize_function(unit, &mut log)?;
            Ok(log)
        })
        .try_reduce(EventLog::new, |mut acc, log| {
            acc.merge(log);
            Ok(acc)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flowgraph::FlowGraphBuilder;

    fn unit(graph: FlowGraph) -> FunctionUnit {
        let env = Environment::untracked(graph.env_len());
        FunctionUnit { graph, env }
    }

    #[test]
    fn test_pipeline_forwards_then_eliminates() {
        // The two adds only become redundant once both loads are forwarded
        // to the stored value.
        let mut g = FlowGraphBuilder::new(1, 0).build_with(|f| {
            f.block(0, |b| {
                let host = b.alloc(0);
                let v = b.const_int(5);
                b.store_field(host, 0, v);
                let l1 = b.load_field(host, 0);
                let l2 = b.load_field(host, 0);
                let a1 = b.add(l1, v);
                let a2 = b.add(l2, v);
                let s = b.add(a1, a2);
                b.ret_val(s);
            });
        });

        let mut log = EventLog::new();
        let changed = eliminate_redundancies(&mut g, &mut log).unwrap();
        assert!(changed);
        assert_eq!(log.count(EventKind::LoadForwarded), 2);
        assert_eq!(log.count(EventKind::ExpressionEliminated), 1);
        assert!(g.validate().is_ok());
    }

    #[test]
    fn test_pipeline_no_changes() {
        let mut g = FlowGraphBuilder::new(1, 0).build_with(|f| {
            f.block(0, |b| {
                let v = b.const_int(1);
                b.ret_val(v);
            });
        });

        let mut log = EventLog::new();
        let changed = eliminate_redundancies(&mut g, &mut log).unwrap();
        assert!(!changed);
        assert!(log.is_empty());
    }

    #[test]
    fn test_optimize_all_merges_logs() {
        let make = || {
            FlowGraphBuilder::new(1, 0).build_with(|f| {
                f.block(0, |b| {
                    let v0 = b.const_int(1);
                    let v1 = b.const_int(2);
                    let a = b.add(v0, v1);
                    let c = b.add(v0, v1);
                    let s = b.mul(a, c);
                    b.ret_val(s);
                });
            })
        };
        let mut units = vec![unit(make()), unit(make()), unit(make())];

        let log = optimize_all(&mut units).unwrap();
        assert_eq!(log.count(EventKind::ExpressionEliminated), 3);
    }

    #[test]
    fn test_optimize_function_covers_catch_entries() {
        let mut g = FlowGraphBuilder::new(3, 1).build_with(|f| {
            let t = f.try_region(2);
            f.block(0, |b| {
                let v = b.const_int(1);
                b.store_local(0, v);
                b.goto(1);
            });
            f.covered_block(1, t, |b| {
                b.call(0, &[]);
                b.ret();
            });
            f.catch_block(2, &[0], |b| {
                b.ret();
            });
        });
        let mut u = unit(g);

        let mut log = EventLog::new();
        let changed = optimize_function(&mut u, &mut log).unwrap();
        assert!(changed);
        assert_eq!(log.count(EventKind::CatchEntrySynchronized), 1);
    }
}
