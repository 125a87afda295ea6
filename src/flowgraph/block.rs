//! Basic blocks, try regions and catch entries.

use super::graph::InstrId;

/// Identifies the try region a block belongs to.
///
/// Blocks covered by the same exception handler share one region index.
pub type TryIndex = usize;

/// A try region and the catch entry handling it.
#[derive(Debug, Clone)]
pub struct TryRegion {
    /// Block index of the catch entry that handles throws from this region.
    pub catch_block: super::graph::BlockId,
}

/// Payload carried by a block that is a catch entry.
#[derive(Debug, Clone, Default)]
pub struct CatchEntry {
    /// Initial definitions: one `Parameter` instruction per environment
    /// slot the handler re-materializes on entry. Pruned by the
    /// synchronizer down to the slots that actually need it.
    pub initial_defs: Vec<InstrId>,
    /// Environment indices the runtime must keep synchronized on the
    /// exceptional path, ascending. Empty until the synchronizer runs.
    pub synchronized: Vec<usize>,
}

/// A basic block: a doubly-linked span of instructions in the arena.
#[derive(Debug, Clone, Default)]
pub struct Block {
    /// First instruction, `None` for an empty block.
    pub(crate) head: Option<InstrId>,
    /// Last instruction (the terminator once the block is closed).
    pub(crate) tail: Option<InstrId>,
    /// Predecessor blocks, including exceptional edges into catch entries.
    pub(crate) preds: Vec<super::graph::BlockId>,
    /// Try region covering this block, if any.
    pub(crate) try_index: Option<TryIndex>,
    /// Set when this block is a catch entry.
    pub(crate) catch: Option<CatchEntry>,
}

impl Block {
    /// First instruction of the block.
    #[must_use]
    pub fn head(&self) -> Option<InstrId> {
        self.head
    }

    /// Last instruction of the block.
    #[must_use]
    pub fn tail(&self) -> Option<InstrId> {
        self.tail
    }

    /// Predecessors, including exceptional edges.
    #[must_use]
    pub fn preds(&self) -> &[super::graph::BlockId] {
        &self.preds
    }

    /// Try region covering this block.
    #[must_use]
    pub fn try_index(&self) -> Option<TryIndex> {
        self.try_index
    }

    /// Catch-entry payload, if this block is a catch entry.
    #[must_use]
    pub fn catch(&self) -> Option<&CatchEntry> {
        self.catch.as_ref()
    }

    /// Returns `true` if this block is a catch entry.
    #[must_use]
    pub fn is_catch_entry(&self) -> bool {
        self.catch.is_some()
    }
}
