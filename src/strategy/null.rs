//! A node which relays blocks but never mines.

use crate::{
    block::{Block, BlockId},
    node::{Context, NodeState},
    simulation::SimulationError,
};

use super::{store_block, MiningStrategy};

#[derive(Debug, Default, Clone, Copy)]
pub struct NullMining;

impl MiningStrategy for NullMining {
    fn name(&self) -> &'static str {
        "Null"
    }

    fn mines(&self) -> bool {
        false
    }

    fn generate_block(
        &mut self,
        _node: &mut NodeState,
        _ctx: &mut Context,
        _prev: Option<BlockId>,
    ) -> Result<Option<BlockId>, SimulationError> {
        Ok(None)
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

#[cfg(test)]
mod tests {
    use crate::{
        node::NodeId, strategy::StrategyKind, testing::Harness, tx_model::NullTx,
    };

    #[test]
    fn relays_without_mining() {
        let mut h =
            Harness::new(&[StrategyKind::Null, StrategyKind::Honest], Box::new(NullTx));
        let mined = h
            .with_ctx(0, |node, ctx| {
                node.strategy.generate_block(&mut node.state, ctx, None)
            })
            .unwrap();
        assert_eq!(mined, None);
        assert!(!h.nodes[0].strategy().mines());

        let id = h.mine(1).unwrap();
        let block = h.public_block(1, id);
        h.deliver(0, block, NodeId::from(2)).unwrap();

        assert_eq!(h.nodes[0].heads(), &[id]);
        assert_eq!(h.network.in_flight(), 2);
    }
}
