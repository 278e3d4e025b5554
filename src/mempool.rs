//! Feerate-ordered pool of pending transactions.

use std::collections::{BTreeMap, HashMap};

use crate::block::{Block, Transaction, TxId};

/// Sort key of a pooled transaction: feerate descending, then ID ascending.
#[derive(Debug, Clone, Copy)]
struct Priority {
    feerate: f64,
    id: TxId,
}

impl PartialEq for Priority {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for Priority {}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .feerate
            .total_cmp(&self.feerate)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl From<&Transaction> for Priority {
    fn from(tx: &Transaction) -> Self {
        Priority { feerate: tx.feerate(), id: tx.id }
    }
}

/// Pending transactions, popped highest feerate first. Removal by ID is
/// supported for transactions confirmed by incoming blocks.
#[derive(Debug, Clone, Default)]
pub struct Mempool {
    queue: BTreeMap<Priority, Transaction>,
    index: HashMap<TxId, Priority>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `tx` to the pool. Returns false if a transaction with the same ID
    /// is already pooled.
    pub fn push(&mut self, tx: Transaction) -> bool {
        if self.index.contains_key(&tx.id) {
            return false;
        }

        let key = Priority::from(&tx);
        self.index.insert(tx.id, key);
        self.queue.insert(key, tx);

        true
    }

    #[inline]
    pub fn peek_best(&self) -> Option<&Transaction> {
        self.queue.values().next()
    }

    pub fn pop_best(&mut self) -> Option<Transaction> {
        let (_, tx) = self.queue.pop_first()?;
        self.index.remove(&tx.id);

        Some(tx)
    }

    pub fn remove(&mut self, id: TxId) -> Option<Transaction> {
        let key = self.index.remove(&id)?;
        self.queue.remove(&key)
    }

    #[inline]
    pub fn contains(&self, id: TxId) -> bool {
        self.index.contains_key(&id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Pooled transactions from best to worst.
    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.queue.values()
    }

    /// Moves transactions into `block` from best to worst until the next one
    /// would push the block past `max_block_size`. Returns the number of
    /// transactions added.
    pub fn fill_block(&mut self, block: &mut Block, max_block_size: f64) -> usize {
        let mut added = 0;
        while let Some(tx) = self.peek_best() {
            if !block.fits(tx, max_block_size) {
                break;
            }
            if let Some(tx) = self.pop_best() {
                block.add_tx(tx);
                added += 1;
            }
        }

        added
    }

    /// Drops every transaction included in `block`.
    pub fn remove_confirmed(&mut self, block: &Block) {
        for tx in &block.transactions {
            self.remove(tx.id);
        }
    }
}
