//! How transactions are created, propagated and packed into blocks.

use std::fmt::Debug;

use dyn_clone::DynClone;
use rand::{rngs::StdRng, Rng};
use rand_distr::StandardNormal;

use crate::{
    block::{Block, Transaction, TxId},
    mempool::Mempool,
    node::NodeState,
};

/// What a node should send after a [`TxModel`] handles a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Broadcast {
    Nothing,
    /// Send the full transaction to every peer.
    Direct(Transaction),
    /// Announce the transaction to every peer with an INV.
    Announce(TxId),
}

/// Transaction handling shared by every node of a simulation.
pub trait TxModel: Debug + DynClone + Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether nodes create transactions at all under this model.
    fn generates(&self) -> bool;

    /// Handles a transaction created by `node`.
    fn on_generated(&mut self, node: &mut NodeState, tx: Transaction) -> Broadcast;

    /// Handles a transaction `node` received from a peer for the first time.
    fn on_received(&mut self, node: &mut NodeState, tx: Transaction) -> Broadcast;

    /// Packs transactions into a block `node` is about to mine.
    fn fill_block(
        &mut self,
        node: &mut NodeState,
        block: &mut Block,
        rng: &mut StdRng,
        max_block_size: f64,
    );

    /// Drops transactions confirmed by `block` from the pool `node` draws from.
    fn update_mempool(&mut self, node: &mut NodeState, block: &Block);

    /// Size of the pool shared by every node, if this model has one.
    fn shared_pool_len(&self) -> Option<usize> {
        None
    }
}

dyn_clone::clone_trait_object!(TxModel);

/// Which [`TxModel`] a simulation uses.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TxModelKind {
    #[default]
    Null,
    Simple,
    Full,
}

impl TxModelKind {
    pub fn build(&self) -> Box<dyn TxModel> {
        match self {
            TxModelKind::Null => Box::new(NullTx),
            TxModelKind::Simple => Box::new(SimpleTx::new()),
            TxModelKind::Full => Box::new(FullTx),
        }
    }
}

#[inline]
fn gauss(rng: &mut StdRng, mean: f64, std_dev: f64) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    mean + std_dev * z
}

/// Draws a transaction from the size, fee and value distributions of 2021
/// Bitcoin mainnet traffic. Sizes are at least one byte; fees and values are
/// non-negative.
pub fn sample_transaction(id: TxId, created_at: u64, rng: &mut StdRng) -> Transaction {
    let size = gauss(rng, 509.23, 191.45).max(1.0);
    let fee = gauss(rng, 7.17e-5, 7.53e-5).max(0.0);
    let value = gauss(rng, 1.1186, 2.2918).max(0.0);

    Transaction::new(id, created_at, size, value, fee)
}

/// No transactions exist. Block contents are sampled instead: a transaction
/// count, and a size of that many average-sized transactions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTx;

impl TxModel for NullTx {
    fn name(&self) -> &'static str {
        "NullTx"
    }

    fn generates(&self) -> bool {
        false
    }

    fn on_generated(&mut self, _node: &mut NodeState, _tx: Transaction) -> Broadcast {
        Broadcast::Nothing
    }

    fn on_received(&mut self, _node: &mut NodeState, _tx: Transaction) -> Broadcast {
        Broadcast::Nothing
    }

    fn fill_block(
        &mut self,
        _node: &mut NodeState,
        block: &mut Block,
        rng: &mut StdRng,
        _max_block_size: f64,
    ) {
        let tx_count = gauss(rng, 2104.72, 236.63).max(0.0);
        let per_tx = gauss(rng, 615.32, 89.43).max(0.0);

        block.tx_count = tx_count;
        block.size += tx_count * per_tx;
    }

    fn update_mempool(&mut self, _node: &mut NodeState, _block: &Block) {}
}

/// One mempool shared by every node. Transactions enter it as soon as they
/// are created and are never gossiped.
#[derive(Debug, Default, Clone)]
pub struct SimpleTx {
    pool: Mempool,
}

impl SimpleTx {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pool(&self) -> &Mempool {
        &self.pool
    }
}

impl TxModel for SimpleTx {
    fn name(&self) -> &'static str {
        "SimpleTx"
    }

    fn generates(&self) -> bool {
        true
    }

    fn on_generated(&mut self, _node: &mut NodeState, tx: Transaction) -> Broadcast {
        self.pool.push(tx);
        Broadcast::Nothing
    }

    fn on_received(&mut self, _node: &mut NodeState, _tx: Transaction) -> Broadcast {
        Broadcast::Nothing
    }

    fn fill_block(
        &mut self,
        _node: &mut NodeState,
        block: &mut Block,
        _rng: &mut StdRng,
        max_block_size: f64,
    ) {
        self.pool.fill_block(block, max_block_size);
    }

    fn update_mempool(&mut self, _node: &mut NodeState, block: &Block) {
        self.pool.remove_confirmed(block);
    }

    fn shared_pool_len(&self) -> Option<usize> {
        Some(self.pool.len())
    }
}

/// Every node keeps its own mempool. New transactions are pushed to all
/// peers directly, then relayed onwards by INV.
#[derive(Debug, Default, Clone, Copy)]
pub struct FullTx;

impl TxModel for FullTx {
    fn name(&self) -> &'static str {
        "FullTx"
    }

    fn generates(&self) -> bool {
        true
    }

    fn on_generated(&mut self, node: &mut NodeState, tx: Transaction) -> Broadcast {
        node.mempool.push(tx.clone());
        Broadcast::Direct(tx)
    }

    fn on_received(&mut self, node: &mut NodeState, tx: Transaction) -> Broadcast {
        let id = tx.id;
        node.mempool.push(tx);
        Broadcast::Announce(id)
    }

    fn fill_block(
        &mut self,
        node: &mut NodeState,
        block: &mut Block,
        _rng: &mut StdRng,
        max_block_size: f64,
    ) {
        node.mempool.fill_block(block, max_block_size);
    }

    fn update_mempool(&mut self, node: &mut NodeState, block: &Block) {
        node.mempool.remove_confirmed(block);
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;
    use crate::{
        block::{BlockId, BLOCK_HEADER_SIZE},
        network::Region,
        node::NodeId,
    };

    fn node(id: usize) -> NodeState {
        NodeState::new(NodeId::from(id), format!("n{}", id), 1.0, Region::US, 0.1)
    }

    fn block_for(node: &NodeState) -> Block {
        Block::on_top_of(BlockId::new(node.id, 1), &Block::genesis(), node.id, 1)
    }

    #[test]
    fn sampled_transactions_are_well_formed() {
        let mut rng = StdRng::seed_from_u64(11);
        for seq in 0..10_000 {
            let tx = sample_transaction(TxId::new(NodeId::from(1), seq), 0, &mut rng);
            assert!(tx.size >= 1.0);
            assert!(tx.fee >= 0.0);
            assert!(tx.value >= 0.0);
        }
    }

    #[test]
    fn null_model_samples_block_contents() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut miner = node(1);
        let mut block = block_for(&miner);

        NullTx.fill_block(&mut miner, &mut block, &mut rng, 1e6);

        assert!(block.transactions.is_empty());
        assert!(block.tx_count > 1000.0);
        assert!(block.size > BLOCK_HEADER_SIZE);
    }

    #[test]
    fn simple_model_shares_one_pool() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut model = SimpleTx::new();
        let (mut a, mut b) = (node(1), node(2));

        for seq in 1..=3 {
            let tx = sample_transaction(TxId::new(a.id, seq), 0, &mut rng);
            assert_eq!(model.on_generated(&mut a, tx), Broadcast::Nothing);
        }
        assert_eq!(model.shared_pool_len(), Some(3));

        let mut block = block_for(&b);
        model.fill_block(&mut b, &mut block, &mut rng, 1e6);
        assert_eq!(block.transactions.len(), 3);
        assert_eq!(model.shared_pool_len(), Some(0));
    }

    #[test]
    fn full_model_pushes_then_relays() {
        let mut rng = StdRng::seed_from_u64(5);
        let (mut a, mut b) = (node(1), node(2));
        let tx = sample_transaction(TxId::new(a.id, 1), 0, &mut rng);

        assert_eq!(
            FullTx.on_generated(&mut a, tx.clone()),
            Broadcast::Direct(tx.clone())
        );
        assert_eq!(FullTx.on_received(&mut b, tx.clone()), Broadcast::Announce(tx.id));
        assert!(a.mempool.contains(tx.id));
        assert!(b.mempool.contains(tx.id));

        let mut block = block_for(&a);
        block.add_tx(tx.clone());
        FullTx.update_mempool(&mut b, &block);
        assert!(!b.mempool.contains(tx.id));
    }
}
