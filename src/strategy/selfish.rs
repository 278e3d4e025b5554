//! Implementation of selfish mining (Eyal and Sirer, 2014).

use crate::{
    block::{Block, BlockId},
    chain::LocalChain,
    events::SimEvent,
    node::{Context, NodeState},
    simulation::SimulationError,
    tie_breaker::TieBreaker,
};

use super::{finish_block, store_block, MiningStrategy};

/// Mines on a private chain and publishes only as much of it as needed to
/// override or tie the public chain.
#[derive(Debug, Default, Clone)]
pub struct SelfishMining {
    /// Public blocks as of the last reset, plus every block mined since.
    private_chain: LocalChain,
    /// Blocks mined since the last reset.
    private_branch_len: usize,
    tie_breaker: TieBreaker,
}

impl SelfishMining {
    pub fn new() -> Self {
        Self::default()
    }

    /// Height of the private head minus height of the public head.
    fn lead(
        &self,
        node: &NodeState,
        block: Option<BlockId>,
    ) -> Result<u64, SimulationError> {
        let no_head = || SimulationError::NoHead { node: node.id };
        let private_height = self.private_chain.max_height().ok_or_else(no_head)?;
        let public_height = node.blockchain.max_height().ok_or_else(no_head)?;

        private_height.checked_sub(public_height).ok_or(
            SimulationError::NegativeForkDelta {
                node: node.id,
                timestamp: node.timestamp,
                private_height,
                public_height,
                block,
            },
        )
    }

    fn reset(&mut self) {
        self.private_branch_len = 0;
    }

    /// Publishes the private head, if it is not public already.
    fn release_head(
        &mut self,
        node: &mut NodeState,
        ctx: &mut Context,
    ) -> Result<(), SimulationError> {
        let Some(head) = self.private_chain.best_head(&self.tie_breaker).cloned()
        else {
            return Ok(());
        };

        let id = head.id;
        if store_block(node, ctx, head, true)? {
            ctx.events.log(
                node.timestamp,
                node.id,
                SimEvent::PrivateChainReleased { blocks: 1, head: id },
            );
        }

        Ok(())
    }

    /// Publishes every private block which is not public yet, parents first.
    fn release_all(
        &mut self,
        node: &mut NodeState,
        ctx: &mut Context,
    ) -> Result<(), SimulationError> {
        let hidden: Vec<Block> = self
            .private_chain
            .known_blocks()
            .filter(|b| !node.blockchain.is_known(b.id))
            .cloned()
            .collect();
        let Some(head) = hidden.last().map(|b| b.id) else {
            return Ok(());
        };

        let blocks = hidden.len();
        for block in hidden {
            store_block(node, ctx, block, true)?;
        }
        ctx.events.log(
            node.timestamp,
            node.id,
            SimEvent::PrivateChainReleased { blocks, head },
        );

        Ok(())
    }
}

impl MiningStrategy for SelfishMining {
    fn name(&self) -> &'static str {
        "Selfish"
    }

    fn setup(&mut self, node: &NodeState) {
        self.private_chain = node.blockchain.clone();
        self.tie_breaker = TieBreaker::FavorCreator(node.id);
        self.reset();
    }

    fn tie_breaker(&self) -> TieBreaker {
        self.tie_breaker
    }

    fn private_chain(&self) -> Option<&LocalChain> {
        Some(&self.private_chain)
    }

    fn choose_head<'a>(
        &'a self,
        node: &'a NodeState,
    ) -> Result<&'a Block, SimulationError> {
        self.private_chain
            .best_head(&self.tie_breaker)
            .ok_or(SimulationError::NoHead { node: node.id })
    }

    fn generate_block(
        &mut self,
        node: &mut NodeState,
        ctx: &mut Context,
        prev: Option<BlockId>,
    ) -> Result<Option<BlockId>, SimulationError> {
        let lead_before = self.lead(node, None)?;

        let id = node.next_block_id();
        let block = {
            let prev = match prev {
                Some(prev) => self.private_chain.block(prev).ok_or(
                    SimulationError::UnknownParent { node: node.id, block: prev },
                )?,
                None => self.choose_head(node)?,
            };
            Block::on_top_of(id, prev, node.id, node.timestamp)
        };

        let block = finish_block(node, ctx, block, true);
        ctx.bookkeeper.save_block(node.id, id, node.timestamp);
        self.private_chain.insert(block);
        self.private_branch_len += 1;

        // Won a tie race: the new block puts the private chain one ahead.
        if lead_before == 0 && self.private_branch_len == 2 {
            self.release_all(node, ctx)?;
            self.reset();
        }

        Ok(Some(id))
    }

    fn receive_block(
        &mut self,
        node: &mut NodeState,
        ctx: &mut Context,
        block: Block,
        relay: bool,
        shallow: bool,
    ) -> Result<(), SimulationError> {
        if shallow {
            store_block(node, ctx, block, relay)?;
            return Ok(());
        }
        if node.blockchain.is_known(block.id) {
            return Ok(());
        }

        let lead = self.lead(node, Some(block.id))?;
        store_block(node, ctx, block, relay)?;

        match lead {
            0 => {
                self.private_chain = node.blockchain.clone();
                self.reset();
                ctx.events.log(
                    node.timestamp,
                    node.id,
                    SimEvent::PrivateChainAbandoned {
                        height: node.blockchain.max_height().unwrap_or_default(),
                    },
                );
            }
            1 => self.release_head(node, ctx)?,
            _ => {
                self.release_all(node, ctx)?;
                self.reset();
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        node::NodeId, strategy::StrategyKind, testing::Harness, tx_model::NullTx,
    };

    fn harness() -> Harness {
        Harness::new(&[StrategyKind::Selfish, StrategyKind::Honest], Box::new(NullTx))
    }

    fn private(h: &Harness) -> &LocalChain {
        h.nodes[0].strategy().private_chain().unwrap()
    }

    fn honest_block(h: &mut Harness) -> Block {
        let id = h.mine(1).unwrap();
        h.public_block(1, id)
    }

    #[test]
    fn withholds_first_block() {
        let mut h = harness();
        let id = h.mine(0).unwrap();

        assert!(!h.nodes[0].blockchain().is_known(id));
        assert!(private(&h).is_known(id));
        assert_eq!(h.network.in_flight(), 0);
        assert_eq!(h.bookkeeper.block_receipt_time(NodeId::from(1), id), Some(0));
    }

    #[test]
    fn concedes_when_not_ahead() {
        let mut h = harness();
        let theirs = honest_block(&mut h);
        h.deliver(0, theirs.clone(), NodeId::from(2)).unwrap();
        assert!(private(&h).is_known(theirs.id));

        // a fresh branch starts withheld again
        let mine = h.mine(0).unwrap();
        assert_eq!(private(&h).block(mine).unwrap().prev_id, Some(theirs.id));
        assert!(!h.nodes[0].blockchain().is_known(mine));
        assert!(h
            .events
            .events()
            .iter()
            .any(|(_, _, e)| matches!(e, SimEvent::PrivateChainAbandoned { height: 1 })));
    }

    #[test]
    fn lead_of_one_races_then_wins() {
        let mut h = harness();
        let first = h.mine(0).unwrap();
        let theirs = honest_block(&mut h);

        h.deliver(0, theirs, NodeId::from(2)).unwrap();
        assert!(h.nodes[0].blockchain().is_known(first));

        let second = h.mine(0).unwrap();
        let public = h.nodes[0].blockchain();
        assert!(public.is_known(second));
        assert_eq!(public.block(second).unwrap().prev_id, Some(first));

        // the race is over, so the next block is withheld
        let third = h.mine(0).unwrap();
        assert!(!h.nodes[0].blockchain().is_known(third));
    }

    #[test]
    fn lead_of_two_releases_everything() {
        let mut h = harness();
        let first = h.mine(0).unwrap();
        let second = h.mine(0).unwrap();
        assert_eq!(h.network.in_flight(), 0);

        let theirs = honest_block(&mut h);
        h.deliver(0, theirs, NodeId::from(2)).unwrap();

        let public = h.nodes[0].blockchain();
        assert!(public.is_known(first) && public.is_known(second));
        assert_eq!(public.best_head(&TieBreaker::default()).unwrap().id, second);
        assert!(h.events.events().iter().any(|(_, _, e)| matches!(
            e,
            SimEvent::PrivateChainReleased { blocks: 2, head } if *head == second
        )));
    }

    #[test]
    fn release_catches_public_up_to_private() {
        let mut h = harness();
        for _ in 0..3 {
            h.mine(0).unwrap();
        }

        let theirs = honest_block(&mut h);
        h.deliver(0, theirs, NodeId::from(2)).unwrap();

        assert_eq!(h.nodes[0].blockchain().max_height(), Some(3));
        assert_eq!(private(&h).max_height(), Some(3));
    }

    #[test]
    fn public_chain_ahead_is_an_error() {
        let mut h = harness();
        for _ in 0..2 {
            let theirs = honest_block(&mut h);
            h.nodes[0].state.blockchain.insert(theirs);
        }

        assert!(matches!(
            h.mine(0),
            Err(SimulationError::NegativeForkDelta {
                private_height: 0,
                public_height: 2,
                ..
            })
        ));
    }
}
