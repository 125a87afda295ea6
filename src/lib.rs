// Copyright 2025 The ssaopt developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![allow(dead_code)]

//! # ssaopt
//!
//! Dominator-based redundancy elimination for SSA flow graphs.
//!
//! `ssaopt` takes a function body in SSA form and removes the work the
//! program provably repeats: loads whose value is already known, stores
//! nothing can observe, and pure expressions computed twice on the same
//! path. It also computes, per exception handler, the minimal set of
//! local-environment slots the runtime must keep synchronized while the
//! handler's try region executes.
//!
//! ## Pipeline
//!
//! - **Alias classification** ([`analysis::AliasAnalysis`]) decides which
//!   allocations stay private to the function. It runs to a fixed point
//!   before any rewriting; every interference question the passes ask is
//!   answered from its verdicts.
//! - **Load/store forwarding** ([`passes::forwarding`]) propagates known
//!   heap contents forward through the graph and drops dead stores.
//! - **Common subexpression elimination** ([`passes::cse`]) removes pure
//!   expressions recomputed under a dominating occurrence.
//! - **Catch-entry synchronization** ([`passes::catch_sync`]) shrinks the
//!   state exception handlers force the runtime to materialize.
//!
//! Missing information is never an error: an analysis that cannot prove a
//! fact falls back to the conservative answer and the passes simply do
//! less. Errors are reserved for malformed graphs.
//!
//! ## Quick Start
//!
//! ```rust
//! use ssaopt::prelude::*;
//!
//! let mut graph = FlowGraphBuilder::new(1, 0).build_with(|f| {
//!     f.block(0, |b| {
//!         let x = b.const_int(2);
//!         let y = b.const_int(3);
//!         let first = b.add(x, y);
//!         let again = b.add(x, y);
//!         let product = b.mul(first, again);
//!         b.ret_val(product);
//!     });
//! });
//!
//! let mut log = EventLog::new();
//! let changed = eliminate_redundancies(&mut graph, &mut log)?;
//! assert!(changed);
//! assert_eq!(log.count(EventKind::ExpressionEliminated), 1);
//! # Ok::<(), ssaopt::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`flowgraph`] - the instruction arena, blocks, try regions, scopes
//!   and the test-oriented graph builder
//! - [`analysis`] - dominators, natural loops and alias classification
//! - [`passes`] - the rewriting passes and pipeline drivers
//! - [`Error`] and [`Result`] - error handling

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types and functions.
///
/// ```rust,no_run
/// use ssaopt::prelude::*;
///
/// let graph = FlowGraphBuilder::new(1, 0).build_with(|f| {
///     f.block(0, |b| {
///         b.ret();
///     });
/// });
/// # let _ = graph;
/// ```
pub mod prelude;

/// The SSA program representation.
///
/// Instructions live in an arena addressed by stable [`flowgraph::InstrId`]
/// indices; blocks are doubly-linked spans over it and every definition
/// carries its use list. [`flowgraph::FlowGraphBuilder`] assembles graphs
/// for tests and front ends, and [`flowgraph::ScopeTree`] flattens lexical
/// scopes into the index-addressed environment the local operations use.
pub mod flowgraph;

/// Read-only analyses over a flow graph: dominator trees, natural loops
/// and the alias classifier.
pub mod analysis;

/// The rewriting passes and the drivers combining them.
///
/// See [`passes::eliminate_redundancies`] for the single-function pipeline
/// and [`passes::optimize_all`] for the parallel whole-program driver.
pub mod passes;

pub use error::Error;
pub use passes::{
    eliminate_redundancies, optimize_all, optimize_catch_entries, optimize_function, FunctionUnit,
};

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
