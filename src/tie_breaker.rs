//! Utilities for describing tie-breaking behavior in fork choice.

use crate::{block::Block, node::NodeId};

/// Breaks ties between multiple head blocks of the same (maximal) height.
///
/// Candidates are always given in the order they became heads of the local
/// chain, so every variant is deterministic.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TieBreaker {
    /// Use the block which became a head first.
    #[default]
    EarliestReceived,
    /// Use the block which became a head most recently.
    LatestReceived,
    /// Use the earliest block created by the specified node, if such a block
    /// exists. Otherwise, use the block which became a head first.
    FavorCreator(NodeId),
}

impl TieBreaker {
    /// Returns the chosen block among `tied`, or `None` if `tied` is empty.
    pub fn choose<'a>(&self, tied: &[&'a Block]) -> Option<&'a Block> {
        match &self {
            Self::EarliestReceived => tied.first().copied(),
            Self::LatestReceived => tied.last().copied(),
            Self::FavorCreator(node) => tied
                .iter()
                .find(|b| b.creator == *node)
                .or_else(|| tied.first())
                .copied(),
        }
    }
}
