//! A node's local view of the block tree.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use thiserror::Error;

use crate::{
    block::{Block, BlockId},
    tie_breaker::TieBreaker,
};

/// State of an item which a node has heard of.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry<T> {
    /// Announced by a peer, but not yet fetched.
    Placeholder,
    /// Fully received.
    Known(T),
}

impl<T> Entry<T> {
    #[inline]
    pub fn is_known(&self) -> bool {
        matches!(self, Entry::Known(_))
    }

    #[inline]
    pub fn known(&self) -> Option<&T> {
        match self {
            Entry::Known(item) => Some(item),
            Entry::Placeholder => None,
        }
    }
}

/// Violations of the head/forest invariants of a [`LocalChain`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChainError {
    #[error("head set mismatch: missing heads {missing:?}, stale heads {stale:?}")]
    HeadMismatch { missing: Vec<BlockId>, stale: Vec<BlockId> },
    #[error("block {0} is not reachable from any head")]
    Unreachable(BlockId),
}

/// Arena of blocks keyed by [`BlockId`], with parent links expressed as ID
/// lookups. Blocks whose parent is absent form the roots of a forest; orphaned
/// forks are never removed.
///
/// Iteration order over blocks is the order in which IDs were first seen, so
/// that every traversal is deterministic.
#[derive(Debug, Clone, Default)]
pub struct LocalChain {
    blocks: IndexMap<BlockId, Entry<Block>>,
    /// Map from a block ID to the IDs of all known blocks pointing to it. The
    /// parent itself may not be known yet.
    children: HashMap<BlockId, Vec<BlockId>>,
    /// Known blocks with no known child, in the order they became heads.
    heads: Vec<BlockId>,
}

impl LocalChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true iff `id` is present, either known or as a placeholder.
    #[inline]
    pub fn contains(&self, id: BlockId) -> bool {
        self.blocks.contains_key(&id)
    }

    #[inline]
    pub fn is_known(&self, id: BlockId) -> bool {
        self.blocks.get(&id).is_some_and(Entry::is_known)
    }

    #[inline]
    pub fn get(&self, id: BlockId) -> Option<&Entry<Block>> {
        self.blocks.get(&id)
    }

    /// Returns the fully received block with the given ID.
    #[inline]
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(&id).and_then(Entry::known)
    }

    /// IDs of all head blocks, in the order they became heads.
    #[inline]
    pub fn heads(&self) -> &[BlockId] {
        &self.heads
    }

    /// All entries in the order their IDs were first seen.
    pub fn entries(&self) -> impl Iterator<Item = (&BlockId, &Entry<Block>)> {
        self.blocks.iter()
    }

    /// All fully received blocks in the order their IDs were first seen.
    pub fn known_blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values().filter_map(Entry::known)
    }

    /// Number of entries, placeholders included.
    #[inline]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn num_known(&self) -> usize {
        self.known_blocks().count()
    }

    /// Records that `id` exists without its payload. Returns true iff `id`
    /// was previously unknown.
    pub fn mark_placeholder(&mut self, id: BlockId) -> bool {
        if self.blocks.contains_key(&id) {
            return false;
        }
        self.blocks.insert(id, Entry::Placeholder);

        true
    }

    /// Stores `block` and updates the head set. Returns false (and leaves the
    /// chain untouched) if the block was already known.
    pub fn insert(&mut self, block: Block) -> bool {
        if self.is_known(block.id) {
            return false;
        }

        let id = block.id;
        if let Some(prev) = block.prev_id {
            self.children.entry(prev).or_default().push(id);
            self.heads.retain(|&head| head != prev);
        }
        if self.children.get(&id).map_or(true, Vec::is_empty) {
            self.heads.push(id);
        }
        self.blocks.insert(id, Entry::Known(block));

        true
    }

    /// Returns the head with the greatest height, breaking ties between heads
    /// of equal height with `tie_breaker`.
    pub fn best_head(&self, tie_breaker: &TieBreaker) -> Option<&Block> {
        let max_height = self
            .heads
            .iter()
            .filter_map(|&id| self.block(id))
            .map(|b| b.height)
            .max()?;

        let tied: Vec<&Block> = self
            .heads
            .iter()
            .filter_map(|&id| self.block(id))
            .filter(|b| b.height == max_height)
            .collect();

        tie_breaker.choose(&tied)
    }

    /// Height of the tallest known block, or `None` for an empty chain.
    pub fn max_height(&self) -> Option<u64> {
        self.heads.iter().filter_map(|&id| self.block(id)).map(|b| b.height).max()
    }

    /// Returns the IDs of all known blocks on the path from `id` back to the
    /// root of its tree, in ascending order of height and including `id`.
    /// Empty if `id` is not known.
    pub fn ancestors_of(&self, id: BlockId) -> Vec<BlockId> {
        let mut ancestors = vec![];

        let mut curr = self.block(id);
        while let Some(block) = curr {
            ancestors.push(block.id);
            curr = block.prev_id.and_then(|prev| self.block(prev));
        }

        ancestors.reverse();
        ancestors
    }

    /// Returns the IDs of all blocks on the chain ending at
    /// [best_head](Self::best_head), from its root to its tip.
    pub fn longest_chain(&self, tie_breaker: &TieBreaker) -> Vec<BlockId> {
        self.best_head(tie_breaker)
            .map(|head| self.ancestors_of(head.id))
            .unwrap_or_default()
    }

    /// Checks that the head set equals exactly the known blocks with no known
    /// child, and that every known block lies below some head.
    pub fn verify(&self) -> Result<(), ChainError> {
        let parents: HashSet<BlockId> =
            self.known_blocks().filter_map(|b| b.prev_id).collect();
        let expected: HashSet<BlockId> = self
            .known_blocks()
            .map(|b| b.id)
            .filter(|id| !parents.contains(id))
            .collect();
        let actual: HashSet<BlockId> = self.heads.iter().copied().collect();

        if expected != actual || actual.len() != self.heads.len() {
            let mut missing: Vec<_> =
                expected.difference(&actual).copied().collect();
            let mut stale: Vec<_> =
                actual.difference(&expected).copied().collect();
            missing.sort();
            stale.sort();

            return Err(ChainError::HeadMismatch { missing, stale });
        }

        let mut reached = HashSet::new();
        for &head in &self.heads {
            let mut curr = self.block(head);
            while let Some(block) = curr {
                if !reached.insert(block.id) {
                    break;
                }
                curr = block.prev_id.and_then(|prev| self.block(prev));
            }
        }
        if let Some(block) = self.known_blocks().find(|b| !reached.contains(&b.id)) {
            return Err(ChainError::Unreachable(block.id));
        }

        Ok(())
    }
}
