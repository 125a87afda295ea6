//! Catch-entry environment synchronization.
//!
//! An exception can transfer control from any instruction of a try region
//! to the region's catch entry, so the runtime must keep some environment
//! slots materialized while the region executes. This pass computes, per
//! catch entry, the minimal set of slots the handler can actually observe,
//! records it on the entry, and prunes the entry's unused initial
//! definitions.
//!
//! The computation is environment-slot liveness with one twist: the
//! exceptional edge leaves a covered block *mid-block*, so slots live into
//! the handler must survive the covered block even when the block itself
//! overwrites them. The transfer function is
//!
//! ```text
//! live_in(B) = gen(B) ∪ (live_out(B) − kill(B)) ∪ live_in(catch(B))
//! ```
//!
//! where the last term applies only to covered blocks and deliberately
//! bypasses the kill set. A catch entry's used initial definitions count
//! as reads of their slot. Captured and unclaimed slots live elsewhere
//! and are excluded from the synchronized set.

use std::collections::{HashSet, VecDeque};

use crate::analysis::{detect_loops, DominatorTree};
use crate::flowgraph::{BlockId, Environment, FlowGraph, Op};
use crate::{Error, Result};

use super::events::{EventKind, EventLog};

/// Per-block liveness summary over environment slot indices.
struct Summary {
    /// Slots read before any write in the block, plus slots read by the
    /// block's used catch-entry initial definitions.
    gen: HashSet<usize>,
    /// Slots written anywhere in the block.
    kill: HashSet<usize>,
}

fn summarize(graph: &FlowGraph, block: BlockId) -> Summary {
    let mut gen = HashSet::new();
    let mut kill = HashSet::new();
    if let Some(entry) = graph.block(block).catch() {
        for &def in &entry.initial_defs {
            if graph.uses(def).is_empty() {
                continue;
            }
            if let Op::Parameter { env_index } = graph.op(def) {
                gen.insert(*env_index);
            }
        }
    }
    for (_, op) in graph.instructions(block) {
        match op {
            Op::LoadLocal { env_index } => {
                if !kill.contains(env_index) {
                    gen.insert(*env_index);
                }
            }
            Op::StoreLocal { env_index, .. } => {
                kill.insert(*env_index);
            }
            _ => {}
        }
    }
    Summary { gen, kill }
}

/// Successors via the terminator only; exceptional edges are handled by
/// the covering-catch term of the transfer function instead.
fn normal_successors(graph: &FlowGraph, block: BlockId) -> Vec<BlockId> {
    match graph.block(block).tail() {
        Some(tail) => graph.op(tail).branch_targets(),
        None => Vec::new(),
    }
}

fn validate_env_indices(graph: &FlowGraph, env: &Environment) -> Result<()> {
    for b in graph.block_ids() {
        for (_, op) in graph.instructions(b) {
            let index = match op {
                Op::Parameter { env_index }
                | Op::LoadLocal { env_index }
                | Op::StoreLocal { env_index, .. } => *env_index,
                _ => continue,
            };
            if index >= env.len() {
                return Err(Error::EnvIndexOutOfRange { index, len: env.len() });
            }
        }
    }
    Ok(())
}

/// Computes and records the synchronized slot set of every catch entry,
/// pruning initial definitions that turned out dead.
///
/// Returns the number of pruned initial definitions.
pub fn synchronize_catch_entries(
    graph: &mut FlowGraph,
    env: &Environment,
    log: &mut EventLog,
) -> Result<usize> {
    validate_env_indices(graph, env)?;

    let catch_blocks: Vec<BlockId> = graph
        .block_ids()
        .filter(|&b| graph.block(b).is_catch_entry())
        .collect();
    if catch_blocks.is_empty() {
        return Ok(0);
    }

    let domtree = DominatorTree::compute(graph);
    let summaries: Vec<Summary> = graph.block_ids().map(|b| summarize(graph, b)).collect();
    let covering: Vec<Option<BlockId>> = graph
        .block_ids()
        .map(|b| {
            graph
                .block(b)
                .try_index()
                .map(|t| graph.try_regions()[t].catch_block)
        })
        .collect();

    // Backward worklist seeded in postorder, with loop bodies queued a
    // second time so cyclic regions settle without extra global rounds.
    let mut live_in: Vec<HashSet<usize>> = vec![HashSet::new(); graph.block_count()];
    let mut work: VecDeque<BlockId> = domtree.reverse_postorder().iter().rev().copied().collect();
    for l in detect_loops(graph, &domtree) {
        for &b in domtree.reverse_postorder().iter().rev() {
            if l.contains(b) {
                work.push_back(b);
            }
        }
    }

    while let Some(b) = work.pop_front() {
        let mut new_in: HashSet<usize> = HashSet::new();
        for s in normal_successors(graph, b) {
            new_in.extend(live_in[s.index()].iter().copied());
        }
        let summary = &summaries[b.index()];
        for k in &summary.kill {
            new_in.remove(k);
        }
        new_in.extend(summary.gen.iter().copied());
        // The exceptional edge may fire before any kill of this block.
        if let Some(catch) = covering[b.index()] {
            new_in.extend(live_in[catch.index()].iter().copied());
        }
        if new_in != live_in[b.index()] {
            live_in[b.index()] = new_in;
            // Predecessors include the covered blocks of a catch entry.
            for &p in graph.block(b).preds() {
                work.push_back(p);
            }
        }
    }

    let mut pruned = 0;
    for &c in &catch_blocks {
        let mut synchronized: Vec<usize> = live_in[c.index()]
            .iter()
            .copied()
            .filter(|&i| !env.excluded_from_sync(i))
            .collect();
        synchronized.sort_unstable();

        // An initial definition of a dead slot is itself use-free: any use
        // would have put the slot in gen and hence in live_in.
        let defs = graph
            .block(c)
            .catch()
            .map(|e| e.initial_defs.clone())
            .unwrap_or_default();
        let mut kept = Vec::with_capacity(defs.len());
        for def in defs {
            let live = match graph.op(def) {
                Op::Parameter { env_index } => live_in[c.index()].contains(env_index),
                _ => true,
            };
            if live {
                kept.push(def);
            } else {
                graph.unlink(def)?;
                pruned += 1;
            }
        }
        if let Some(entry) = graph.catch_entry_mut(c) {
            entry.initial_defs = kept;
            entry.synchronized = synchronized.clone();
        }
        log.record(EventKind::CatchEntrySynchronized)
            .message(format!("{c}: {synchronized:?}"));
    }

    Ok(pruned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flowgraph::{FlowGraphBuilder, InstrId, ScopeTree};

    fn synchronized_of(graph: &FlowGraph, block: usize) -> Vec<usize> {
        graph
            .block(BlockId::new(block))
            .catch()
            .map(|e| e.synchronized.clone())
            .unwrap_or_default()
    }

    #[test]
    fn test_unobserved_slot_not_synchronized() {
        let env = Environment::untracked(1);
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

        let mut log = EventLog::new();
        let pruned = synchronize_catch_entries(&mut g, &env, &mut log).unwrap();
        assert_eq!(synchronized_of(&g, 2), Vec::<usize>::new());
        assert_eq!(pruned, 1);
        assert!(g.block(BlockId::new(2)).catch().unwrap().initial_defs.is_empty());
        assert_eq!(log.count(EventKind::CatchEntrySynchronized), 1);
    }

    #[test]
    fn test_handler_read_survives_covered_kill() {
        // The covered block overwrites slot 0, but the exception may fire
        // before the overwrite, so the handler's read keeps it live.
        let env = Environment::untracked(1);
        let mut g = FlowGraphBuilder::new(3, 1).build_with(|f| {
            let t = f.try_region(2);
            f.block(0, |b| {
                let v = b.const_int(1);
                b.store_local(0, v);
                b.goto(1);
            });
            f.covered_block(1, t, |b| {
                b.call(0, &[]);
                let w = b.const_int(2);
                b.store_local(0, w);
                b.ret();
            });
            f.catch_block(2, &[], |b| {
                let ld = b.load_local(0);
                b.ret_val(ld);
            });
        });

        let mut log = EventLog::new();
        synchronize_catch_entries(&mut g, &env, &mut log).unwrap();
        assert_eq!(synchronized_of(&g, 2), vec![0]);
    }

    #[test]
    fn test_loop_carried_slots_synchronized() {
        // Accumulator in slot 0, counter in slot 1, both read by the
        // handler of a try region inside the loop.
        let env = Environment::untracked(2);
        let mut g = FlowGraphBuilder::new(5, 2).build_with(|f| {
            let t = f.try_region(3);
            f.block(0, |b| {
                let a = b.const_int(0);
                b.store_local(0, a);
                let i = b.const_int(0);
                b.store_local(1, i);
                b.goto(1);
            });
            f.block(1, |b| {
                let _ = b.load_local(1);
                let c = b.const_bool(true);
                b.branch(c, 2, 4);
            });
            f.covered_block(2, t, |b| {
                b.call(0, &[]);
                let i = b.load_local(1);
                let one = b.const_int(1);
                let next = b.add(i, one);
                b.store_local(1, next);
                b.goto(1);
            });
            f.catch_block(3, &[], |b| {
                let a = b.load_local(0);
                let i = b.load_local(1);
                let s = b.add(a, i);
                b.ret_val(s);
            });
            f.block(4, |b| {
                b.ret();
            });
        });

        let mut log = EventLog::new();
        synchronize_catch_entries(&mut g, &env, &mut log).unwrap();
        assert_eq!(synchronized_of(&g, 3), vec![0, 1]);
    }

    #[test]
    fn test_loop_body_store_before_throwing_call_stays_live() {
        // Slot 1 is written inside the covered block before the call that
        // can throw, but the exception may also arrive on a later
        // iteration after the handler-visible value changed; the bypassed
        // kill keeps it synchronized alongside the loop-carried slots.
        let env = Environment::untracked(3);
        let mut g = FlowGraphBuilder::new(5, 3).build_with(|f| {
            let t = f.try_region(3);
            f.block(0, |b| {
                let zero = b.const_int(0);
                b.store_local(0, zero);
                b.store_local(2, zero);
                b.goto(1);
            });
            f.block(1, |b| {
                let _ = b.load_local(2);
                let c = b.const_bool(true);
                b.branch(c, 2, 4);
            });
            f.covered_block(2, t, |b| {
                let x = b.const_int(7);
                b.store_local(1, x);
                b.call(0, &[]);
                let i = b.load_local(2);
                let one = b.const_int(1);
                let next = b.add(i, one);
                b.store_local(2, next);
                b.goto(1);
            });
            f.catch_block(3, &[], |b| {
                let a = b.load_local(0);
                let v = b.load_local(1);
                let i = b.load_local(2);
                let s1 = b.add(a, v);
                let s2 = b.add(s1, i);
                b.ret_val(s2);
            });
            f.block(4, |b| {
                b.ret();
            });
        });

        let mut log = EventLog::new();
        synchronize_catch_entries(&mut g, &env, &mut log).unwrap();
        assert_eq!(synchronized_of(&g, 3), vec![0, 1, 2]);
    }

    #[test]
    fn test_slot_redefined_each_iteration_not_synchronized() {
        // Slot 2 is rewritten at the top of every iteration before the try
        // region can observe it, and the empty handler falls back into the
        // loop where it is rewritten again. The accumulator and counter
        // stay synchronized; slot 2 does not, and its initial definition
        // is pruned.
        let env = Environment::untracked(3);
        let mut g = FlowGraphBuilder::new(5, 3).build_with(|f| {
            let t = f.try_region(4);
            f.block(0, |b| {
                let zero = b.const_int(0);
                b.store_local(0, zero);
                b.store_local(1, zero);
                b.goto(1);
            });
            f.block(1, |b| {
                let vb = b.const_int(7);
                b.store_local(2, vb);
                b.goto(2);
            });
            f.covered_block(2, t, |b| {
                let vb = b.load_local(2);
                let i = b.load_local(1);
                b.call(0, &[vb]);
                let s = b.add(i, vb);
                b.store_local(1, s);
                let c = b.const_bool(true);
                b.branch(c, 1, 3);
            });
            f.block(3, |b| {
                let a = b.load_local(0);
                b.ret_val(a);
            });
            f.catch_block(4, &[0, 1, 2], |b| {
                b.goto(1);
            });
        });

        let mut log = EventLog::new();
        let pruned = synchronize_catch_entries(&mut g, &env, &mut log).unwrap();
        assert_eq!(synchronized_of(&g, 4), vec![0, 1]);
        assert_eq!(pruned, 1);
        assert_eq!(g.block(BlockId::new(4)).catch().unwrap().initial_defs.len(), 2);
    }

    #[test]
    fn test_used_initial_def_kept() {
        let env = Environment::untracked(1);
        let mut param = InstrId::new(0);
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
                param = b.initial_def(0);
                b.ret_val(param);
            });
        });

        let mut log = EventLog::new();
        let pruned = synchronize_catch_entries(&mut g, &env, &mut log).unwrap();
        assert_eq!(pruned, 0);
        assert_eq!(synchronized_of(&g, 2), vec![0]);
        assert_eq!(
            g.block(BlockId::new(2)).catch().unwrap().initial_defs,
            vec![param]
        );
        assert!(g.is_linked(param));
    }

    #[test]
    fn test_unclaimed_slot_excluded() {
        // Slot 1 belongs to a captured variable and was never claimed in
        // the flattened environment; the handler's read does not force it
        // into the synchronized set.
        let mut tree = ScopeTree::new();
        tree.declare(tree.root(), "a", 0, false);
        tree.declare(tree.root(), "ctx", 1, true);
        tree.declare(tree.root(), "b", 2, false);
        let env = tree.flatten();

        let mut g = FlowGraphBuilder::new(3, 3).build_with(|f| {
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
            f.catch_block(2, &[], |b| {
                let a = b.load_local(0);
                let x = b.load_local(1);
                let s = b.add(a, x);
                b.ret_val(s);
            });
        });

        let mut log = EventLog::new();
        synchronize_catch_entries(&mut g, &env, &mut log).unwrap();
        assert_eq!(synchronized_of(&g, 2), vec![0]);
    }

    #[test]
    fn test_env_index_out_of_range() {
        let env = Environment::untracked(1);
        let mut g = FlowGraphBuilder::new(1, 1).build_with(|f| {
            f.block(0, |b| {
                let ld = b.load_local(3);
                b.ret_val(ld);
            });
        });

        let mut log = EventLog::new();
        let err = synchronize_catch_entries(&mut g, &env, &mut log).unwrap_err();
        assert!(matches!(err, Error::EnvIndexOutOfRange { index: 3, len: 1 }));
    }
}
