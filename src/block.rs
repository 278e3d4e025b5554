use std::{cmp::Ordering, fmt::Display};

use crate::{consensus::Reward, node::NodeId};

/// Serialized size of a block with no transactions, in bytes.
pub const BLOCK_HEADER_SIZE: f64 = 80.0;

/// Representation of a mined block of transactions.
#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    /// The block this block was mined on top of. `None` only for genesis.
    pub prev_id: Option<BlockId>,
    /// Length of the path from this block to the genesis block.
    pub height: u64,
    /// The node which mined this block.
    pub creator: NodeId,
    /// Local timestamp of `creator` at the time this block was minted.
    pub created_at: u64,
    /// Size of the block in bytes.
    pub size: f64,
    /// Number of transactions in the block. Sampled directly (and possibly
    /// fractional) under [`NullTx`](crate::tx_model::NullTx).
    pub tx_count: f64,
    pub transactions: Vec<Transaction>,
    pub reward: Option<Reward>,
}

/// A unique identifier assigned to each [`Block`]: the block's creator along
/// with the creator's running count of minted blocks.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct BlockId {
    pub creator: NodeId,
    pub seq: u64,
}

impl BlockId {
    /// ID of the genesis block shared by every node.
    pub const GENESIS: BlockId = BlockId { creator: NodeId::GENESIS, seq: 0 };

    pub fn new(creator: NodeId, seq: u64) -> Self {
        Self { creator, seq }
    }
}

impl Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "B{}.{}", self.creator, self.seq)
    }
}

impl Block {
    /// Creates the genesis block: no parent, height 0, mined by
    /// [`NodeId::GENESIS`] at time 0.
    pub fn genesis() -> Self {
        Block {
            id: BlockId::GENESIS,
            prev_id: None,
            height: 0,
            creator: NodeId::GENESIS,
            created_at: 0,
            size: BLOCK_HEADER_SIZE,
            tx_count: 0.0,
            transactions: vec![],
            reward: None,
        }
    }

    /// Creates an empty block on top of `prev`.
    pub fn on_top_of(
        id: BlockId,
        prev: &Block,
        creator: NodeId,
        created_at: u64,
    ) -> Self {
        Block {
            id,
            prev_id: Some(prev.id),
            height: prev.height + 1,
            creator,
            created_at,
            size: BLOCK_HEADER_SIZE,
            tx_count: 0.0,
            transactions: vec![],
            reward: None,
        }
    }

    /// Appends `tx` to this block, growing the block's size and count.
    pub fn add_tx(&mut self, tx: Transaction) {
        self.size += tx.size;
        self.tx_count += 1.0;
        self.transactions.push(tx);
    }

    /// Returns true iff `tx` can be appended without exceeding `max_size`.
    #[inline]
    pub fn fits(&self, tx: &Transaction, max_size: f64) -> bool {
        self.size + tx.size <= max_size
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Block {}

impl Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.prev_id {
            Some(prev) => write!(f, "BLOCK (id: {}, prev: {})", self.id, prev),
            None => write!(f, "BLOCK (id: {}, genesis)", self.id),
        }
    }
}

/// Unique identifier of a [`Transaction`], built the same way as [`BlockId`].
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct TxId {
    pub origin: NodeId,
    pub seq: u64,
}

impl TxId {
    pub fn new(origin: NodeId, seq: u64) -> Self {
        Self { origin, seq }
    }
}

impl Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T{}.{}", self.origin, self.seq)
    }
}

/// A transaction waiting to be included in a block.
///
/// # Ordering
/// Transactions are ordered by feerate, highest first, with ties broken by
/// ascending [`TxId`]. The "smallest" transaction under [`Ord`] is therefore
/// the one a block builder should include next.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: TxId,
    pub origin: NodeId,
    pub created_at: u64,
    /// Size in bytes. Always positive.
    pub size: f64,
    pub value: f64,
    pub fee: f64,
}

impl Transaction {
    pub fn new(
        id: TxId,
        created_at: u64,
        size: f64,
        value: f64,
        fee: f64,
    ) -> Self {
        Transaction { id, origin: id.origin, created_at, size, value, fee }
    }

    /// Fee paid per byte.
    #[inline]
    pub fn feerate(&self) -> f64 {
        self.fee / self.size
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Transaction {}

impl PartialOrd for Transaction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Transaction {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .feerate()
            .total_cmp(&self.feerate())
            .then_with(|| self.id.cmp(&other.id))
    }
}
