//! Lexical scopes and environment flattening.
//!
//! Front ends describe locals as a tree of nested scopes. The optimizers
//! work on a *flattened environment*: a flat, index-addressed array of
//! slots, one per non-captured variable. Flattening walks the scope tree
//! with an explicit stack and places each variable at its pre-assigned
//! environment index, growing the array as needed. Captured variables live
//! in a context object on the heap instead and never receive a slot.

use std::fmt;

/// Identifier of a scope in a [`ScopeTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope#{}", self.0)
    }
}

/// A variable declared in some scope.
#[derive(Debug, Clone)]
pub struct ScopeVariable {
    /// Source-level name.
    pub name: String,
    /// Assigned flat environment index.
    pub env_index: usize,
    /// Captured variables live in a heap context, not the environment.
    pub captured: bool,
}

#[derive(Debug, Clone)]
struct Scope {
    first_child: Option<ScopeId>,
    sibling: Option<ScopeId>,
    variables: Vec<ScopeVariable>,
}

/// A tree of lexical scopes.
#[derive(Debug, Clone, Default)]
pub struct ScopeTree {
    scopes: Vec<Scope>,
}

impl ScopeTree {
    /// Creates a tree containing only an empty root scope.
    #[must_use]
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope {
                first_child: None,
                sibling: None,
                variables: Vec::new(),
            }],
        }
    }

    /// The root scope.
    #[must_use]
    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    /// Adds a child scope under `parent`.
    pub fn add_child(&mut self, parent: ScopeId) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(Scope {
            first_child: None,
            sibling: self.scopes[parent.0].first_child,
            variables: Vec::new(),
        });
        self.scopes[parent.0].first_child = Some(id);
        id
    }

    /// Declares a variable in `scope` at the given environment index.
    pub fn declare(&mut self, scope: ScopeId, name: impl Into<String>, env_index: usize, captured: bool) {
        self.scopes[scope.0].variables.push(ScopeVariable {
            name: name.into(),
            env_index,
            captured,
        });
    }

    /// Flattens the tree into an index-addressed environment.
    ///
    /// Each slot holds the variable placed there, or `None` for indices no
    /// variable claimed. Captured variables are skipped. Iterative: scopes
    /// are visited with an explicit stack, so arbitrarily deep nesting
    /// cannot overflow the call stack.
    #[must_use]
    pub fn flatten(&self) -> Environment {
        let mut slots: Vec<Option<ScopeVariable>> = Vec::new();
        let mut stack = vec![self.root()];
        while let Some(scope) = stack.pop() {
            for var in &self.scopes[scope.0].variables {
                if var.captured {
                    continue;
                }
                if var.env_index >= slots.len() {
                    slots.resize_with(var.env_index + 1, || None);
                }
                slots[var.env_index] = Some(var.clone());
            }
            let mut child = self.scopes[scope.0].first_child;
            while let Some(c) = child {
                stack.push(c);
                child = self.scopes[c.0].sibling;
            }
        }
        Environment { slots }
    }
}

/// The flattened, index-addressed local environment.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    slots: Vec<Option<ScopeVariable>>,
}

impl Environment {
    /// An environment of `len` anonymous, non-captured slots.
    ///
    /// Handy when building graphs directly without a scope tree.
    #[must_use]
    pub fn untracked(len: usize) -> Self {
        Self {
            slots: (0..len)
                .map(|i| {
                    Some(ScopeVariable {
                        name: format!("t{i}"),
                        env_index: i,
                        captured: false,
                    })
                })
                .collect(),
        }
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` when the environment has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The variable occupying `index`, if any.
    #[must_use]
    pub fn slot(&self, index: usize) -> Option<&ScopeVariable> {
        self.slots.get(index).and_then(|s| s.as_ref())
    }

    /// Returns `true` if `index` holds a captured or unclaimed slot.
    ///
    /// Such slots are never synchronized at catch entries.
    #[must_use]
    pub fn excluded_from_sync(&self, index: usize) -> bool {
        match self.slots.get(index) {
            Some(Some(var)) => var.captured,
            _ => true,
        }
    }
}
