//! Implementation of the HONEST (or FRONTIER) mining strategy via the
//! [MiningStrategy] trait.

use crate::{
    block::{Block, BlockId},
    node::{Context, NodeState},
    simulation::SimulationError,
    tie_breaker::TieBreaker,
};

use super::{finish_block, store_block, MiningStrategy};

/// Publishes all blocks as soon as possible at the tip of the longest chain.
#[derive(Debug, Default, Clone)]
pub struct HonestMining {
    tie_breaker: TieBreaker,
}

impl HonestMining {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tie_breaker(tie_breaker: TieBreaker) -> Self {
        HonestMining { tie_breaker }
    }
}

impl MiningStrategy for HonestMining {
    fn name(&self) -> &'static str {
        "Honest"
    }

    fn tie_breaker(&self) -> TieBreaker {
        self.tie_breaker
    }

    fn generate_block(
        &mut self,
        node: &mut NodeState,
        ctx: &mut Context,
        prev: Option<BlockId>,
    ) -> Result<Option<BlockId>, SimulationError> {
        let id = node.next_block_id();
        let block = {
            let prev = match prev {
                Some(prev) => node.blockchain.block(prev).ok_or(
                    SimulationError::UnknownParent { node: node.id, block: prev },
                )?,
                None => self.choose_head(node)?,
            };
            Block::on_top_of(id, prev, node.id, node.timestamp)
        };

        let block = finish_block(node, ctx, block, false);
        store_block(node, ctx, block, true)?;

        Ok(Some(id))
    }

    fn receive_block(
        &mut self,
        node: &mut NodeState,
        ctx: &mut Context,
        block: Block,
        relay: bool,
        _shallow: bool,
    ) -> Result<(), SimulationError> {
        store_block(node, ctx, block, relay)?;
        Ok(())
    }
}
