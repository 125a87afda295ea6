//! Alias classification for allocations.
//!
//! Decides, per allocation, whether any access through a different name
//! could observe or mutate it. The verdict drives every forwarding
//! decision: loads and stores through a `NotAliased` allocation can only
//! interfere with accesses through that same allocation.
//!
//! # The three-state verdict
//!
//! [`AliasIdentity`] is monotone: `Unknown` until classification finishes,
//! then exactly one of `NotAliased` / `Aliased`. A verdict never weakens -
//! an attempt to turn `Aliased` back into `NotAliased` is a fatal
//! invariant violation, not a recoverable state.
//!
//! # How a value escapes
//!
//! The classifier tracks, for every SSA value, the set of allocations the
//! value *may be* (its names). Names flow through the identity-preserving
//! wrappers (`Redefinition`, `CheckNull`, `AssertAssignable`), through
//! phis, and through loads of slots a tracked allocation was stored into.
//! An allocation becomes aliased when one of its names:
//!
//! - is passed to a call, returned, or thrown, or
//! - is stored into a host that is not itself a tracked allocation, or
//! - is stored into a host that ends up aliased (containment: whoever can
//!   reach the host can reach the content).
//!
//! Everything else stays `NotAliased`.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::flowgraph::{FlowGraph, InstrId, Op, Slot};
use crate::Result;

/// Aliasing verdict for an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasIdentity {
    /// Not classified yet.
    Unknown,
    /// All accesses to the object go through this allocation's names.
    NotAliased,
    /// The object may be reachable under other names.
    Aliased,
}

/// Result of alias classification over one flow graph.
pub struct AliasAnalysis {
    identity: HashMap<InstrId, AliasIdentity>,
    stored: HashSet<InstrId>,
    /// Allocations that flowed into a phi: reachable under a second SSA
    /// name even when never stored.
    merged: HashSet<InstrId>,
    names: HashMap<InstrId, BTreeSet<InstrId>>,
}

impl AliasAnalysis {
    /// Classifies every allocation of `graph`, running the name
    /// propagation to a fixed point before any verdict is assigned.
    pub fn classify(graph: &FlowGraph) -> Result<Self> {
        let mut analysis = Self {
            identity: HashMap::new(),
            stored: HashSet::new(),
            merged: HashSet::new(),
            names: HashMap::new(),
        };

        // Seed: every allocation names itself.
        for b in graph.block_ids() {
            for (id, op) in graph.instructions(b) {
                if matches!(op, Op::AllocateObject { .. } | Op::AllocateArray { .. }) {
                    analysis.identity.insert(id, AliasIdentity::Unknown);
                    analysis.names.insert(id, BTreeSet::from([id]));
                }
            }
        }

        // What was stored where: (host allocation, slot) -> allocations the
        // stored value may be. And per host, everything stored into it.
        let mut stored_at: HashMap<(InstrId, Slot), BTreeSet<InstrId>> = HashMap::new();
        let mut contents: HashMap<InstrId, BTreeSet<InstrId>> = HashMap::new();
        let mut escaped: HashSet<InstrId> = HashSet::new();

        // Name propagation to a fixed point. All sets only grow, so this
        // terminates; graphs are small enough that sweep-until-stable is
        // cheaper than maintaining a precise dependency worklist.
        let mut changed = true;
        while changed {
            changed = false;
            for b in graph.block_ids() {
                for (id, op) in graph.instructions(b) {
                    match op {
                        Op::Redefinition { value }
                        | Op::CheckNull { value }
                        | Op::AssertAssignable { value, .. } => {
                            changed |= analysis.flow_names(*value, id);
                        }
                        Op::Phi { inputs } => {
                            for &input in inputs {
                                changed |= analysis.flow_names(input, id);
                                if let Some(set) = analysis.names.get(&input).cloned() {
                                    for a in set {
                                        changed |= analysis.merged.insert(a);
                                    }
                                }
                            }
                        }
                        // Environment slots are not tracked: a value parked
                        // in one can come back out under a name the
                        // classifier never sees, so it escapes.
                        Op::StoreLocal { value, .. } => {
                            changed |= analysis.escape_names(*value, &mut escaped);
                        }
                        Op::LoadField { object, field } => {
                            changed |=
                                analysis.flow_loaded(graph, *object, Slot::Field(*field), &stored_at, id);
                        }
                        Op::LoadIndexed { array, .. } => {
                            changed |=
                                analysis.flow_loaded(graph, *array, Slot::ArrayElement, &stored_at, id);
                        }
                        Op::StoreField { object, value, .. } | Op::StoreIndexed { array: object, value, .. } => {
                            let value_names = match analysis.names.get(value) {
                                Some(set) if !set.is_empty() => set.clone(),
                                _ => continue,
                            };
                            for &a in &value_names {
                                changed |= analysis.stored.insert(a);
                            }
                            let host = Self::canonical_root(graph, *object);
                            if analysis.identity.contains_key(&host) {
                                let slot = op.slot().unwrap_or(Slot::ArrayElement);
                                let at = stored_at.entry((host, slot)).or_default();
                                for &a in &value_names {
                                    changed |= at.insert(a);
                                }
                                let held = contents.entry(host).or_default();
                                for &a in &value_names {
                                    changed |= held.insert(a);
                                }
                            } else {
                                // Stored into something we cannot track.
                                for &a in &value_names {
                                    changed |= escaped.insert(a);
                                }
                            }
                        }
                        Op::StaticCall { args, .. } => {
                            for arg in args {
                                changed |= analysis.escape_names(*arg, &mut escaped);
                            }
                        }
                        Op::Return { value: Some(v) } => {
                            changed |= analysis.escape_names(*v, &mut escaped);
                        }
                        Op::Throw { exception } => {
                            changed |= analysis.escape_names(*exception, &mut escaped);
                        }
                        _ => {}
                    }
                }
            }
        }

        // Containment closure: an aliased host aliases its contents.
        let mut worklist: Vec<InstrId> = escaped.iter().copied().collect();
        while let Some(host) = worklist.pop() {
            if let Some(held) = contents.get(&host) {
                for &contained in held.clone().iter() {
                    if escaped.insert(contained) {
                        worklist.push(contained);
                    }
                }
            }
        }

        // Assign final verdicts, monotonically.
        let allocs: Vec<InstrId> = analysis.identity.keys().copied().collect();
        for alloc in allocs {
            let verdict = if escaped.contains(&alloc) {
                AliasIdentity::Aliased
            } else {
                AliasIdentity::NotAliased
            };
            analysis.set_identity(alloc, verdict)?;
        }

        Ok(analysis)
    }

    /// The verdict for `id`. `Unknown` for anything that is not a tracked
    /// allocation.
    #[must_use]
    pub fn identity(&self, id: InstrId) -> AliasIdentity {
        self.identity.get(&id).copied().unwrap_or(AliasIdentity::Unknown)
    }

    /// Returns `true` if `alloc` was stored into anything, anywhere.
    #[must_use]
    pub fn stored_anywhere(&self, alloc: InstrId) -> bool {
        self.stored.contains(&alloc)
    }

    /// Strips identity-preserving wrappers down to the defining value.
    ///
    /// Phis are *not* stripped: a phi merges distinct values and has no
    /// single root.
    #[must_use]
    pub fn canonical_root(graph: &FlowGraph, mut value: InstrId) -> InstrId {
        loop {
            match graph.op(value) {
                Op::Redefinition { value: inner }
                | Op::CheckNull { value: inner }
                | Op::AssertAssignable { value: inner, .. } => value = *inner,
                _ => return value,
            }
        }
    }

    /// Whether accesses rooted at `a` and `b` may touch the same object.
    ///
    /// Both arguments must already be canonical roots. Two distinct
    /// allocations never alias. A `NotAliased` allocation that was never
    /// stored anywhere and never merged through a phi cannot be reached
    /// through an unknown root either.
    #[must_use]
    pub fn may_alias(&self, graph: &FlowGraph, a: InstrId, b: InstrId) -> bool {
        if a == b {
            return true;
        }
        let a_alloc = matches!(graph.op(a), Op::AllocateObject { .. } | Op::AllocateArray { .. });
        let b_alloc = matches!(graph.op(b), Op::AllocateObject { .. } | Op::AllocateArray { .. });
        match (a_alloc, b_alloc) {
            (true, true) => false,
            (true, false) => self.reachable_through_other_names(a),
            (false, true) => self.reachable_through_other_names(b),
            (false, false) => true,
        }
    }

    /// An unknown root (parameter, load result, phi) can only denote this
    /// allocation if some second name for it exists: it escaped, was
    /// stored somewhere, or was merged through a phi.
    fn reachable_through_other_names(&self, alloc: InstrId) -> bool {
        self.identity(alloc) != AliasIdentity::NotAliased
            || self.stored_anywhere(alloc)
            || self.merged.contains(&alloc)
    }

    /// The tracked allocations `value` may denote.
    #[must_use]
    pub fn possible_allocations(&self, value: InstrId) -> Vec<InstrId> {
        self.names
            .get(&value)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Names flowing out of a load: everything stored into the matching
    /// slot of *every* allocation the host may denote. The host can be a
    /// phi or carry names merged from several allocations, so the canonical
    /// root alone is not enough.
    fn flow_loaded(
        &mut self,
        graph: &FlowGraph,
        host: InstrId,
        slot: Slot,
        stored_at: &HashMap<(InstrId, Slot), BTreeSet<InstrId>>,
        load: InstrId,
    ) -> bool {
        let mut hosts = BTreeSet::new();
        let root = Self::canonical_root(graph, host);
        if self.identity.contains_key(&root) {
            hosts.insert(root);
        }
        if let Some(names) = self.names.get(&host) {
            hosts.extend(names.iter().copied());
        }
        let mut changed = false;
        for h in hosts {
            if let Some(values) = stored_at.get(&(h, slot)) {
                changed |= self.add_names(load, values.clone());
            }
        }
        changed
    }

    fn flow_names(&mut self, from: InstrId, to: InstrId) -> bool {
        let Some(src) = self.names.get(&from).cloned() else {
            return false;
        };
        self.add_names(to, src)
    }

    fn add_names(&mut self, to: InstrId, values: BTreeSet<InstrId>) -> bool {
        if values.is_empty() {
            return false;
        }
        let dst = self.names.entry(to).or_default();
        let before = dst.len();
        dst.extend(values);
        dst.len() != before
    }

    fn escape_names(&self, value: InstrId, escaped: &mut HashSet<InstrId>) -> bool {
        let mut changed = false;
        if let Some(set) = self.names.get(&value) {
            for &a in set {
                changed |= escaped.insert(a);
            }
        }
        changed
    }

    fn set_identity(&mut self, alloc: InstrId, verdict: AliasIdentity) -> Result<()> {
        let current = self.identity(alloc);
        match (current, verdict) {
            (AliasIdentity::Unknown, _) | (AliasIdentity::NotAliased, AliasIdentity::Aliased) => {
                self.identity.insert(alloc, verdict);
                Ok(())
            }
            (a, b) if a == b => Ok(()),
            (AliasIdentity::Aliased, AliasIdentity::NotAliased) | (_, AliasIdentity::Unknown) => {
                Err(invariant_error!(
                    "alias verdict for {alloc} cannot move from {current:?} to {verdict:?}"
                ))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flowgraph::FlowGraphBuilder;

    #[test]
    fn test_local_allocation_not_aliased() {
        let mut alloc = InstrId::new(0);
        let g = FlowGraphBuilder::new(1, 0).build_with(|f| {
            f.block(0, |b| {
                let v0 = b.alloc(0);
                alloc = v0;
                let v1 = b.check_null(v0);
                let v2 = b.load_field(v1, 0);
                b.ret_val(v2);
            });
        });
        let aa = AliasAnalysis::classify(&g).unwrap();
        assert_eq!(aa.identity(alloc), AliasIdentity::NotAliased);
        assert!(!aa.stored_anywhere(alloc));
    }

    #[test]
    fn test_escape_via_wrapped_call_argument() {
        let mut alloc = InstrId::new(0);
        let g = FlowGraphBuilder::new(1, 0).build_with(|f| {
            f.block(0, |b| {
                let v0 = b.alloc(0);
                alloc = v0;
                let v1 = b.redef(v0);
                let v2 = b.assert_assignable(v1, 1);
                b.call(0, &[v2]);
                b.ret();
            });
        });
        let aa = AliasAnalysis::classify(&g).unwrap();
        assert_eq!(aa.identity(alloc), AliasIdentity::Aliased);
    }

    #[test]
    fn test_escape_via_return() {
        let mut alloc = InstrId::new(0);
        let g = FlowGraphBuilder::new(1, 0).build_with(|f| {
            f.block(0, |b| {
                let v0 = b.alloc(0);
                alloc = v0;
                b.ret_val(v0);
            });
        });
        let aa = AliasAnalysis::classify(&g).unwrap();
        assert_eq!(aa.identity(alloc), AliasIdentity::Aliased);
    }

    #[test]
    fn test_store_into_unknown_host_escapes() {
        let mut alloc = InstrId::new(0);
        let g = FlowGraphBuilder::new(1, 1).build_with(|f| {
            f.block(0, |b| {
                let v0 = b.alloc(0);
                alloc = v0;
                let host = b.load_local(0);
                b.store_field(host, 0, v0);
                b.ret();
            });
        });
        let aa = AliasAnalysis::classify(&g).unwrap();
        assert_eq!(aa.identity(alloc), AliasIdentity::Aliased);
        assert!(aa.stored_anywhere(alloc));
    }

    #[test]
    fn test_store_into_local_host_stays_unaliased() {
        let mut inner = InstrId::new(0);
        let mut host = InstrId::new(0);
        let g = FlowGraphBuilder::new(1, 0).build_with(|f| {
            f.block(0, |b| {
                let v0 = b.alloc(0);
                let v5 = b.alloc(1);
                inner = v0;
                host = v5;
                b.store_field(v5, 0, v0);
                let v1 = b.load_field(v5, 0);
                b.ret_val(v1);
            });
        });
        let aa = AliasAnalysis::classify(&g).unwrap();
        // The load result is a name of the inner allocation, and it is
        // returned, so the inner allocation escapes. The host does not.
        assert_eq!(aa.identity(inner), AliasIdentity::Aliased);
        assert_eq!(aa.identity(host), AliasIdentity::NotAliased);
        assert!(aa.stored_anywhere(inner));
        assert!(!aa.stored_anywhere(host));
        let loaded = g.instructions(g.entry()).nth(3).map(|(id, _)| id).unwrap();
        assert_eq!(aa.possible_allocations(loaded), vec![inner]);
    }

    #[test]
    fn test_escape_via_loaded_value() {
        let mut inner = InstrId::new(0);
        let mut host = InstrId::new(0);
        let g = FlowGraphBuilder::new(1, 0).build_with(|f| {
            f.block(0, |b| {
                let v0 = b.alloc(0);
                let v5 = b.alloc(1);
                inner = v0;
                host = v5;
                b.store_field(v5, 0, v0);
                let v1 = b.load_field(v5, 0);
                b.call(0, &[v1]);
                b.ret();
            });
        });
        let aa = AliasAnalysis::classify(&g).unwrap();
        assert_eq!(aa.identity(inner), AliasIdentity::Aliased);
        assert_eq!(aa.identity(host), AliasIdentity::NotAliased);
    }

    #[test]
    fn test_containment_aliases_contents_of_escaped_host() {
        let mut inner = InstrId::new(0);
        let mut host = InstrId::new(0);
        let g = FlowGraphBuilder::new(1, 0).build_with(|f| {
            f.block(0, |b| {
                let v0 = b.alloc(0);
                let v5 = b.alloc(1);
                inner = v0;
                host = v5;
                b.store_field(v5, 0, v0);
                b.call(0, &[v5]);
                b.ret();
            });
        });
        let aa = AliasAnalysis::classify(&g).unwrap();
        assert_eq!(aa.identity(host), AliasIdentity::Aliased);
        // The callee can load v0 back out of the host.
        assert_eq!(aa.identity(inner), AliasIdentity::Aliased);
    }

    #[test]
    fn test_phi_preserves_identity() {
        let mut alloc = InstrId::new(0);
        let g = FlowGraphBuilder::new(4, 0).build_with(|f| {
            f.block(0, |b| {
                let v0 = b.alloc(0);
                alloc = v0;
                let c = b.const_bool(true);
                b.branch(c, 1, 2);
            });
            f.block(1, |b| {
                b.goto(3);
            });
            f.block(2, |b| {
                b.goto(3);
            });
            f.block(3, |b| {
                let p = b.phi(&[alloc, alloc]);
                let v = b.load_field(p, 0);
                b.ret_val(v);
            });
        });
        let aa = AliasAnalysis::classify(&g).unwrap();
        assert_eq!(aa.identity(alloc), AliasIdentity::NotAliased);
    }

    #[test]
    fn test_phi_then_call_escapes() {
        let mut alloc = InstrId::new(0);
        let g = FlowGraphBuilder::new(4, 0).build_with(|f| {
            f.block(0, |b| {
                let v0 = b.alloc(0);
                alloc = v0;
                let c = b.const_bool(true);
                b.branch(c, 1, 2);
            });
            f.block(1, |b| {
                b.goto(3);
            });
            f.block(2, |b| {
                b.goto(3);
            });
            f.block(3, |b| {
                let p = b.phi(&[alloc, alloc]);
                b.call(0, &[p]);
                b.ret();
            });
        });
        let aa = AliasAnalysis::classify(&g).unwrap();
        assert_eq!(aa.identity(alloc), AliasIdentity::Aliased);
    }

    #[test]
    fn test_load_through_phi_of_host_escapes_contents() {
        // The stored value must escape even when the host is only reached
        // through a phi: the load picks up the contents of every
        // allocation the phi may denote.
        let mut inner = InstrId::new(0);
        let mut g_host = InstrId::new(0);
        let g = FlowGraphBuilder::new(4, 0).build_with(|f| {
            f.block(0, |b| {
                let v0 = b.alloc(0);
                let h = b.alloc(1);
                inner = v0;
                g_host = h;
                b.store_field(h, 0, v0);
                let c = b.const_bool(true);
                b.branch(c, 1, 2);
            });
            f.block(1, |b| {
                b.goto(3);
            });
            f.block(2, |b| {
                b.goto(3);
            });
            f.block(3, |b| {
                let p = b.phi(&[g_host, g_host]);
                let v = b.load_field(p, 0);
                b.call(0, &[v]);
                b.ret();
            });
        });
        let aa = AliasAnalysis::classify(&g).unwrap();
        assert_eq!(aa.identity(inner), AliasIdentity::Aliased);
        // Only the loaded value escaped, not the host itself.
        assert_eq!(aa.identity(g_host), AliasIdentity::NotAliased);
    }

    #[test]
    fn test_may_alias_rules() {
        let mut a = InstrId::new(0);
        let mut b_alloc = InstrId::new(0);
        let mut unknown = InstrId::new(0);
        let g = FlowGraphBuilder::new(1, 1).build_with(|f| {
            f.block(0, |b| {
                let v0 = b.alloc(0);
                let v1 = b.alloc(1);
                let p = b.load_local(0);
                a = v0;
                b_alloc = v1;
                unknown = p;
                b.ret();
            });
        });
        let aa = AliasAnalysis::classify(&g).unwrap();
        assert!(!aa.may_alias(&g, a, b_alloc));
        assert!(aa.may_alias(&g, a, a));
        // A never-stored local allocation cannot hide behind an unknown root.
        assert!(!aa.may_alias(&g, a, unknown));
        assert!(aa.may_alias(&g, unknown, unknown));
    }
}
