//! First-seen receipt tables and resource usage samples.

use std::collections::HashMap;

use crate::{
    block::{BlockId, TxId},
    node::NodeId,
};

/// A snapshot of simulation-wide resource usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageSample {
    pub iteration: u64,
    /// Packets sent but not yet delivered.
    pub in_flight_packets: usize,
    /// Transactions waiting in mempools, summed over all nodes (or the size of
    /// the shared pool).
    pub mempool_txs: usize,
    /// Fully received blocks, summed over all nodes.
    pub known_blocks: usize,
}

/// Records, for every node, the timestamp at which it first received each
/// block and transaction. Later receipts of the same item are ignored.
#[derive(Debug, Clone, Default)]
pub struct Bookkeeper {
    block_rcvs: HashMap<NodeId, HashMap<BlockId, u64>>,
    tx_rcvs: HashMap<NodeId, HashMap<TxId, u64>>,
    usage: Vec<UsageSample>,
}

impl Bookkeeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts empty receipt tables for `node`, discarding any existing ones.
    pub fn register_node(&mut self, node: NodeId) {
        self.block_rcvs.insert(node, HashMap::new());
        self.tx_rcvs.insert(node, HashMap::new());
    }

    /// Records that `node` received `block` at `timestamp`. Returns true iff
    /// this was the first receipt.
    pub fn save_block(&mut self, node: NodeId, block: BlockId, timestamp: u64) -> bool {
        let table = self.block_rcvs.entry(node).or_default();
        if table.contains_key(&block) {
            return false;
        }
        table.insert(block, timestamp);

        true
    }

    /// Records that `node` received `tx` at `timestamp`. Returns true iff this
    /// was the first receipt.
    pub fn save_tx(&mut self, node: NodeId, tx: TxId, timestamp: u64) -> bool {
        let table = self.tx_rcvs.entry(node).or_default();
        if table.contains_key(&tx) {
            return false;
        }
        table.insert(tx, timestamp);

        true
    }

    pub fn block_receipt_time(&self, node: NodeId, block: BlockId) -> Option<u64> {
        self.block_rcvs.get(&node)?.get(&block).copied()
    }

    pub fn tx_receipt_time(&self, node: NodeId, tx: TxId) -> Option<u64> {
        self.tx_rcvs.get(&node)?.get(&tx).copied()
    }

    /// All block receipts of `node`.
    pub fn block_receipts(&self, node: NodeId) -> Option<&HashMap<BlockId, u64>> {
        self.block_rcvs.get(&node)
    }

    /// All transaction receipts of `node`.
    pub fn tx_receipts(&self, node: NodeId) -> Option<&HashMap<TxId, u64>> {
        self.tx_rcvs.get(&node)
    }

    /// Number of distinct nodes which have received `block`.
    pub fn block_reach(&self, block: BlockId) -> usize {
        self.block_rcvs.values().filter(|t| t.contains_key(&block)).count()
    }

    pub fn record_usage(&mut self, sample: UsageSample) {
        self.usage.push(sample);
    }

    pub fn usage(&self) -> &[UsageSample] {
        &self.usage
    }
}
