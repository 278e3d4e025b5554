//! Definitions of the mining behaviors a node can follow.

pub mod honest;
pub mod null;
pub mod selfish;

pub use honest::HonestMining;
pub use null::NullMining;
pub use selfish::SelfishMining;

use std::fmt::Debug;

use dyn_clone::DynClone;

use crate::{
    block::{Block, BlockId},
    chain::LocalChain,
    events::SimEvent,
    network::ItemId,
    node::{Context, NodeState},
    simulation::SimulationError,
    tie_breaker::TieBreaker,
};

/// Decides where a node mines and what it does with blocks it mines or
/// receives. Maintains internal state relating to unpublished blocks, if
/// necessary.
pub trait MiningStrategy: Debug + DynClone + Send + Sync {
    /// Returns the name of the strategy.
    fn name(&self) -> &'static str;

    /// Whether nodes using this strategy ever attempt to mine.
    fn mines(&self) -> bool {
        true
    }

    /// Called once the node holds the genesis block, and again whenever the
    /// strategy is swapped in.
    fn setup(&mut self, _node: &NodeState) {}

    fn tie_breaker(&self) -> TieBreaker {
        TieBreaker::default()
    }

    /// Blocks this strategy mines on without having published them, along
    /// with their public ancestors.
    fn private_chain(&self) -> Option<&LocalChain> {
        None
    }

    /// The block this strategy would mine on top of.
    fn choose_head<'a>(
        &'a self,
        node: &'a NodeState,
    ) -> Result<&'a Block, SimulationError> {
        node.blockchain
            .best_head(&self.tie_breaker())
            .ok_or(SimulationError::NoHead { node: node.id })
    }

    /// Mines a block on `prev`, or on [choose_head](Self::choose_head) if
    /// `prev` is `None`. Returns the ID of the new block.
    fn generate_block(
        &mut self,
        node: &mut NodeState,
        ctx: &mut Context,
        prev: Option<BlockId>,
    ) -> Result<Option<BlockId>, SimulationError>;

    /// Handles a block which is new to `node`. `relay` announces it to peers
    /// once stored. `shallow` stores it without any fork logic.
    fn receive_block(
        &mut self,
        node: &mut NodeState,
        ctx: &mut Context,
        block: Block,
        relay: bool,
        shallow: bool,
    ) -> Result<(), SimulationError>;
}

dyn_clone::clone_trait_object!(MiningStrategy);

/// Which [`MiningStrategy`] a node uses.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Null,
    #[default]
    Honest,
    Selfish,
}

impl StrategyKind {
    pub fn build(&self) -> Box<dyn MiningStrategy> {
        match self {
            StrategyKind::Null => Box::new(NullMining),
            StrategyKind::Honest => Box::new(HonestMining::new()),
            StrategyKind::Selfish => Box::new(SelfishMining::new()),
        }
    }
}

/// Adds `block` to the public chain of `node`, records its receipt, drops its
/// transactions from the mempool and optionally announces it. Returns false
/// if the block was already known.
pub(crate) fn store_block(
    node: &mut NodeState,
    ctx: &mut Context,
    block: Block,
    relay: bool,
) -> Result<bool, SimulationError> {
    let id = block.id;
    if node.blockchain.is_known(id) {
        return Ok(false);
    }

    ctx.tx_model.update_mempool(node, &block);
    node.blockchain.insert(block);
    ctx.bookkeeper.save_block(node.id, id, node.timestamp);
    if relay {
        node.publish(ctx, ItemId::Block(id))?;
    }

    Ok(true)
}

/// Fills a freshly created `block` through the tx model and attaches the
/// oracle's reward.
pub(crate) fn finish_block(
    node: &mut NodeState,
    ctx: &mut Context,
    mut block: Block,
    withheld: bool,
) -> Block {
    ctx.tx_model
        .fill_block(node, &mut block, ctx.rng, ctx.params.max_block_size);
    block.reward = Some(ctx.oracle.reward(&node.miner_info()));

    ctx.events.log(
        node.timestamp,
        node.id,
        SimEvent::BlockMined {
            block: block.id,
            prev: block.prev_id.unwrap_or(BlockId::GENESIS),
            height: block.height,
            withheld,
        },
    );

    block
}
