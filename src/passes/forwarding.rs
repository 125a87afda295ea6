//! Load/store forwarding and dead store elimination.
//!
//! Tracks, per program point, which heap locations hold a known SSA value.
//! A location is a (canonical host root, exact slot) pair; array elements
//! are only "exact" when keyed by the identical index definition. The
//! availability states are solved as a forward dataflow problem over the
//! CFG with intersection at joins, so a fact survives into a block only
//! when every path in agrees on it - including loop back edges, which is
//! what makes facts established before a loop die when the loop body
//! invalidates them.
//!
//! Alias classification must be complete before this pass looks at a
//! single load: every interference decision below consults the verdicts.
//!
//! With the solved states, one rewrite sweep per block:
//!
//! - a load whose location has a known value is replaced by that value;
//! - a load from a *fresh* allocation (no store to that slot since the
//!   allocation, on any path) is replaced by the graph's null constant;
//! - a store overwritten in the same block before anything could observe
//!   the location is unlinked;
//! - finally, stores into non-aliased allocations whose slot is never
//!   loaded anywhere in the function are unlinked.
//!
//! Catch entries start from the empty state: an exception may arrive from
//! any point of the try region, so nothing established inside it is
//! trustworthy on the exceptional path.

use std::collections::{HashMap, HashSet};

use crate::analysis::{AliasAnalysis, AliasIdentity, DominatorTree};
use crate::flowgraph::{BlockId, Effects, FieldId, FlowGraph, InstrId, Op, Slot};
use crate::Result;

use super::events::{EventKind, EventLog};

/// An exact slot: fields by identity, elements by index *definition*.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SlotKey {
    Field(FieldId),
    Element(InstrId),
}

impl SlotKey {
    fn family(self) -> Slot {
        match self {
            SlotKey::Field(f) => Slot::Field(f),
            SlotKey::Element(_) => Slot::ArrayElement,
        }
    }
}

/// An exact heap location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Location {
    root: InstrId,
    slot: SlotKey,
}

/// Availability facts at one program point.
#[derive(Debug, Clone, PartialEq, Default)]
struct AvailState {
    /// Known content per exact location.
    values: HashMap<Location, InstrId>,
    /// Allocations with no store into them yet: every slot reads as null.
    fresh: HashSet<InstrId>,
}

impl AvailState {
    /// Intersection: keep only facts both states agree on.
    fn meet(mut self, other: &AvailState) -> AvailState {
        self.values.retain(|loc, v| other.values.get(loc) == Some(v));
        self.fresh.retain(|f| other.fresh.contains(f));
        self
    }
}

/// What the rewrite sweep should do with a load.
enum Action {
    None,
    ForwardTo(InstrId),
    ForwardNull,
}

/// Advances `state` across one instruction. Identical in the solve and
/// rewrite phases; only the rewrite phase acts on the returned [`Action`].
fn step(graph: &FlowGraph, aliases: &AliasAnalysis, state: &mut AvailState, id: InstrId, op: &Op) -> Action {
    match op {
        Op::AllocateObject { .. } | Op::AllocateArray { .. } => {
            state.fresh.insert(id);
            Action::None
        }
        Op::LoadField { object, field } => {
            load_step(state, AliasAnalysis::canonical_root(graph, *object), SlotKey::Field(*field), id)
        }
        Op::LoadIndexed { array, index } => {
            load_step(state, AliasAnalysis::canonical_root(graph, *array), SlotKey::Element(*index), id)
        }
        Op::StoreField { object, field, value } => {
            store_step(
                graph,
                aliases,
                state,
                AliasAnalysis::canonical_root(graph, *object),
                SlotKey::Field(*field),
                *value,
            );
            Action::None
        }
        Op::StoreIndexed { array, index, value } => {
            store_step(
                graph,
                aliases,
                state,
                AliasAnalysis::canonical_root(graph, *array),
                SlotKey::Element(*index),
                *value,
            );
            Action::None
        }
        Op::StaticCall { .. } => {
            // The callee can only touch what escapes this function. A
            // `NotAliased` allocation never does, even when stored into
            // another `NotAliased` host: containment would have aliased it
            // if the host were reachable from the call.
            state
                .values
                .retain(|loc, _| aliases.identity(loc.root) == AliasIdentity::NotAliased);
            state
                .fresh
                .retain(|&f| aliases.identity(f) == AliasIdentity::NotAliased);
            Action::None
        }
        _ => Action::None,
    }
}

fn load_step(state: &mut AvailState, root: InstrId, slot: SlotKey, id: InstrId) -> Action {
    let loc = Location { root, slot };
    if let Some(&known) = state.values.get(&loc) {
        return Action::ForwardTo(known);
    }
    if state.fresh.contains(&root) {
        return Action::ForwardNull;
    }
    // The load itself makes the location's content available.
    state.values.insert(loc, id);
    Action::None
}

fn store_step(
    graph: &FlowGraph,
    aliases: &AliasAnalysis,
    state: &mut AvailState,
    root: InstrId,
    slot: SlotKey,
    value: InstrId,
) {
    let family = slot.family();
    state.values.retain(|loc, _| {
        !(aliases.may_alias(graph, root, loc.root) && loc.slot.family().may_overlap(&family))
    });
    // Once anything is stored into an allocation it is no longer fresh:
    // joins may drop the stored value from `values` while keeping the
    // allocation in `fresh`, and a null forward would then be wrong.
    state.fresh.retain(|&f| !aliases.may_alias(graph, root, f));
    state.values.insert(Location { root, slot }, value);
}

/// Input state of `block`: empty at the entry and at catch entries, meet
/// of the available predecessor outputs otherwise. `None` while no
/// predecessor has been solved (unreached in the current round).
fn in_state(
    graph: &FlowGraph,
    outs: &HashMap<BlockId, AvailState>,
    entry: BlockId,
    block: BlockId,
) -> Option<AvailState> {
    if block == entry || graph.block(block).is_catch_entry() {
        return Some(AvailState::default());
    }
    let mut acc: Option<AvailState> = None;
    for &pred in graph.block(block).preds() {
        let Some(out) = outs.get(&pred) else { continue };
        acc = Some(match acc {
            None => out.clone(),
            Some(a) => a.meet(out),
        });
    }
    acc
}

/// Forwards redundant loads and removes dead stores.
///
/// Returns the number of instructions removed.
pub fn forward_loads_and_stores(
    graph: &mut FlowGraph,
    domtree: &DominatorTree,
    aliases: &AliasAnalysis,
    log: &mut EventLog,
) -> Result<usize> {
    let rpo: Vec<BlockId> = domtree.reverse_postorder().to_vec();
    let Some(&entry) = rpo.first() else {
        return Ok(0);
    };

    // Solve availability to a fixed point.
    let mut outs: HashMap<BlockId, AvailState> = HashMap::new();
    let mut changed = true;
    while changed {
        changed = false;
        for &b in &rpo {
            let Some(mut state) = in_state(graph, &outs, entry, b) else {
                continue;
            };
            for (id, op) in graph.instructions(b) {
                let _ = step(graph, aliases, &mut state, id, op);
            }
            if outs.get(&b) != Some(&state) {
                outs.insert(b, state);
                changed = true;
            }
        }
    }

    // Rewrite sweep: replay each block from its solved input state,
    // collecting load rewrites and same-block overwritten stores.
    let mut forwards: Vec<(InstrId, Option<InstrId>)> = Vec::new();
    let mut dead_stores: Vec<InstrId> = Vec::new();
    for &b in &rpo {
        let Some(mut state) = in_state(graph, &outs, entry, b) else {
            continue;
        };
        let in_try = graph.block(b).try_index().is_some();
        // Stores not yet observable by anything; an exact overwrite while
        // still pending makes the earlier store dead.
        let mut pending: HashMap<Location, InstrId> = HashMap::new();

        for (id, op) in graph.instructions(b) {
            match op {
                Op::LoadField { object, field } => {
                    let root = AliasAnalysis::canonical_root(graph, *object);
                    expire_observed(graph, aliases, &mut pending, root, Slot::Field(*field));
                }
                Op::LoadIndexed { array, .. } => {
                    let root = AliasAnalysis::canonical_root(graph, *array);
                    expire_observed(graph, aliases, &mut pending, root, Slot::ArrayElement);
                }
                Op::StoreField { object, field, .. } => {
                    let root = AliasAnalysis::canonical_root(graph, *object);
                    note_store(&mut pending, &mut dead_stores, root, SlotKey::Field(*field), id);
                }
                Op::StoreIndexed { array, index, .. } => {
                    let root = AliasAnalysis::canonical_root(graph, *array);
                    note_store(&mut pending, &mut dead_stores, root, SlotKey::Element(*index), id);
                }
                _ => {}
            }
            if op.effects().intersects(Effects::THROWS | Effects::EXTERNAL) {
                if in_try {
                    // The handler can re-read any location through any
                    // function-local name.
                    pending.clear();
                } else {
                    // Unwinding leaves the function; only locations no one
                    // outside can reach stay unobserved.
                    pending
                        .retain(|loc, _| aliases.identity(loc.root) == AliasIdentity::NotAliased);
                }
            }

            match step(graph, aliases, &mut state, id, op) {
                Action::None => {}
                Action::ForwardTo(known) => forwards.push((id, Some(known))),
                Action::ForwardNull => forwards.push((id, None)),
            }
        }
    }

    let mut removed = 0;
    for (load, replacement) in forwards {
        let target = match replacement {
            Some(v) => v,
            None => graph.constant_null(),
        };
        let replaced = graph.replace_all_uses(load, target);
        graph.unlink(load)?;
        log.record(EventKind::LoadForwarded)
            .message(format!("{load} -> {target} ({replaced} uses)"));
        removed += 1;
    }
    for store in dead_stores {
        if graph.is_linked(store) {
            graph.unlink(store)?;
            log.record(EventKind::StoreEliminated)
                .message(format!("{store} overwritten before any observation"));
            removed += 1;
        }
    }

    removed += sweep_unread_slots(graph, aliases, log)?;
    Ok(removed)
}

/// Drops pending stores whose location the given access may observe.
fn expire_observed(
    graph: &FlowGraph,
    aliases: &AliasAnalysis,
    pending: &mut HashMap<Location, InstrId>,
    root: InstrId,
    family: Slot,
) {
    pending.retain(|loc, _| {
        !(aliases.may_alias(graph, loc.root, root) && loc.slot.family().may_overlap(&family))
    });
}

/// Records a store as pending; an exact pending predecessor is dead.
fn note_store(
    pending: &mut HashMap<Location, InstrId>,
    dead_stores: &mut Vec<InstrId>,
    root: InstrId,
    slot: SlotKey,
    id: InstrId,
) {
    if let Some(previous) = pending.insert(Location { root, slot }, id) {
        dead_stores.push(previous);
    }
}

/// Whole-function sweep: a store directly into a non-aliased allocation is
/// dead when no load anywhere in the function can read that allocation's
/// slot family.
fn sweep_unread_slots(graph: &mut FlowGraph, aliases: &AliasAnalysis, log: &mut EventLog) -> Result<usize> {
    let mut read: HashSet<(InstrId, Slot)> = HashSet::new();
    let mut candidates: Vec<(InstrId, InstrId, Slot)> = Vec::new();

    for b in graph.block_ids() {
        for (id, op) in graph.instructions(b) {
            match op {
                Op::LoadField { object, field } => {
                    mark_read(graph, aliases, &mut read, *object, Slot::Field(*field));
                }
                Op::LoadIndexed { array, .. } => {
                    mark_read(graph, aliases, &mut read, *array, Slot::ArrayElement);
                }
                Op::StoreField { object, field, .. } => {
                    let root = AliasAnalysis::canonical_root(graph, *object);
                    candidates.push((id, root, Slot::Field(*field)));
                }
                Op::StoreIndexed { array, .. } => {
                    let root = AliasAnalysis::canonical_root(graph, *array);
                    candidates.push((id, root, Slot::ArrayElement));
                }
                _ => {}
            }
        }
    }

    let mut removed = 0;
    for (store, root, family) in candidates {
        if aliases.identity(root) != AliasIdentity::NotAliased {
            continue;
        }
        let observed = read
            .iter()
            .any(|(alloc, slot)| *alloc == root && slot.may_overlap(&family));
        if observed {
            continue;
        }
        graph.unlink(store)?;
        log.record(EventKind::StoreEliminated)
            .message(format!("{store}: {root}.{family} is never loaded"));
        removed += 1;
    }
    Ok(removed)
}

/// Marks the slot family as read for every allocation `host` may denote.
fn mark_read(
    graph: &FlowGraph,
    aliases: &AliasAnalysis,
    read: &mut HashSet<(InstrId, Slot)>,
    host: InstrId,
    family: Slot,
) {
    let root = AliasAnalysis::canonical_root(graph, host);
    read.insert((root, family));
    for alloc in aliases.possible_allocations(host) {
        read.insert((alloc, family));
    }
}
