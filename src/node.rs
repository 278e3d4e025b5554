//! Simulated network participants

use std::{collections::HashMap, fmt::Display};

use log::info;
use rand::{rngs::StdRng, Rng};

use crate::{
    block::{Block, BlockId, Transaction, TxId},
    bookkeeper::Bookkeeper,
    chain::{Entry, LocalChain},
    consensus::ConsensusOracle,
    events::{EventSink, SimEvent},
    gossip,
    mempool::Mempool,
    network::{ItemId, Network, Payload, Region},
    simulation::SimulationError,
    strategy::MiningStrategy,
    tx_model::{self, Broadcast, TxModel},
};

/// Unique identifier of a [`Node`]. Corresponds to a [`usize`].
///
/// # Invariants
///
/// `NodeId(0)` is reserved for [`NodeId::GENESIS`], the creator of the
/// genesis block, and as such `NodeId(0)` cannot be instantiated outside of
/// this crate. Nodes added to a
/// [`SimulationBuilder`](crate::simulation::SimulationBuilder) are numbered
/// from 1 in order of addition.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Creator of the genesis block.
    pub const GENESIS: NodeId = NodeId(0);

    /// Returns the [`usize`] corresponding to this [`NodeId`].
    pub fn get(&self) -> usize {
        self.0
    }
}

impl From<usize> for NodeId {
    fn from(value: usize) -> Self {
        assert_ne!(value, 0, "newly made NodeId must be greater than 0");
        Self(value)
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Simulation-wide values every node reads during a step.
#[derive(Debug, Clone, PartialEq)]
pub struct Params {
    /// Maximum block size in bytes.
    pub max_block_size: f64,
    /// Expected number of transactions created by each node per iteration.
    pub tx_per_node_per_iter: f64,
}

/// Mutable access to everything outside a node's own state.
pub struct Context<'a> {
    pub network: &'a mut Network,
    pub bookkeeper: &'a mut Bookkeeper,
    pub oracle: &'a mut dyn ConsensusOracle,
    pub tx_model: &'a mut dyn TxModel,
    pub events: &'a mut dyn EventSink,
    pub rng: &'a mut StdRng,
    pub params: &'a Params,
}

/// The view of a miner given to a [`ConsensusOracle`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinerInfo {
    pub id: NodeId,
    pub timestamp: u64,
    pub mine_power: f64,
    pub mine_probability: f64,
}

/// State held by a single node, separate from its mining strategy.
#[derive(Debug, Clone)]
pub struct NodeState {
    pub id: NodeId,
    pub name: String,
    pub region: Region,
    pub mine_power: f64,
    /// Probability of finding a block in one step with a mining power of 1.
    pub difficulty: f64,
    pub mine_probability: f64,
    /// Real-world seconds represented by one iteration.
    pub iter_seconds: f64,
    /// Local step count.
    pub timestamp: u64,
    pub blockchain: LocalChain,
    /// Every transaction this node has heard of, placeholders included.
    pub tx_ids: HashMap<TxId, Entry<Transaction>>,
    pub mempool: Mempool,
    /// Peers this node sends to.
    pub outs: Vec<NodeId>,
    /// Peers which send to this node.
    pub ins: Vec<NodeId>,
    next_block_seq: u64,
    next_tx_seq: u64,
}

impl NodeState {
    pub fn new(
        id: NodeId,
        name: impl Into<String>,
        mine_power: f64,
        region: Region,
        iter_seconds: f64,
    ) -> Self {
        NodeState {
            id,
            name: name.into(),
            region,
            mine_power,
            difficulty: 0.0,
            mine_probability: 0.0,
            iter_seconds,
            timestamp: 0,
            blockchain: LocalChain::new(),
            tx_ids: HashMap::new(),
            mempool: Mempool::new(),
            outs: vec![],
            ins: vec![],
            next_block_seq: 0,
            next_tx_seq: 0,
        }
    }

    /// Sets mining difficulty, the probability of finding a block in one step
    /// with a mining power of 1.
    pub fn set_difficulty(&mut self, difficulty: f64) {
        self.difficulty = difficulty;
        self.mine_probability = self.mine_power * difficulty;
    }

    /// Adds an outgoing connection to `peer`. Wiring the reverse direction
    /// is up to the caller.
    pub fn connect_out(&mut self, peer: NodeId) {
        if peer != self.id && !self.outs.contains(&peer) {
            self.outs.push(peer);
        }
    }

    /// Records an incoming connection from `peer`.
    pub fn connect_in(&mut self, peer: NodeId) {
        if peer != self.id && !self.ins.contains(&peer) {
            self.ins.push(peer);
        }
    }

    pub fn miner_info(&self) -> MinerInfo {
        MinerInfo {
            id: self.id,
            timestamp: self.timestamp,
            mine_power: self.mine_power,
            mine_probability: self.mine_probability,
        }
    }

    /// Returns a fresh ID for a block mined by this node.
    pub fn next_block_id(&mut self) -> BlockId {
        self.next_block_seq += 1;
        BlockId::new(self.id, self.next_block_seq)
    }

    /// Returns a fresh ID for a transaction created by this node.
    pub fn next_tx_id(&mut self) -> TxId {
        self.next_tx_seq += 1;
        TxId::new(self.id, self.next_tx_seq)
    }

    /// Sends `payload` to `peer`.
    pub fn send_to(
        &self,
        ctx: &mut Context,
        peer: NodeId,
        payload: Payload,
    ) -> Result<(), SimulationError> {
        ctx.network.send(self.id, peer, payload, self.timestamp)?;
        Ok(())
    }

    /// Announces `item` to every outgoing peer with an INV message.
    pub fn publish(
        &self,
        ctx: &mut Context,
        item: ItemId,
    ) -> Result<(), SimulationError> {
        for &peer in &self.outs {
            self.send_to(ctx, peer, Payload::Inv { item, sender: self.id })?;
        }
        Ok(())
    }

    /// Carries out a [`Broadcast`] decided by the transaction model.
    pub fn dispatch(
        &self,
        ctx: &mut Context,
        broadcast: Broadcast,
    ) -> Result<(), SimulationError> {
        match broadcast {
            Broadcast::Nothing => Ok(()),
            Broadcast::Direct(tx) => self.broadcast(ctx, &Payload::Tx(tx)),
            Broadcast::Announce(id) => self.publish(ctx, ItemId::Tx(id)),
        }
    }

    /// Sends `payload` directly to every outgoing peer.
    pub fn broadcast(
        &self,
        ctx: &mut Context,
        payload: &Payload,
    ) -> Result<(), SimulationError> {
        for &peer in &self.outs {
            self.send_to(ctx, peer, payload.clone())?;
        }
        Ok(())
    }
}

/// A participant in the simulated network: its state plus the mining strategy
/// acting on it.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) state: NodeState,
    pub(crate) strategy: Box<dyn MiningStrategy>,
}

impl Node {
    pub fn new(state: NodeState, strategy: Box<dyn MiningStrategy>) -> Self {
        info!(
            "created node {} ({}) in {} with mining power {} using {}",
            state.id,
            state.name,
            state.region,
            state.mine_power,
            strategy.name()
        );
        Node { state, strategy }
    }

    #[inline]
    pub fn id(&self) -> NodeId {
        self.state.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.state.name
    }

    #[inline]
    pub fn state(&self) -> &NodeState {
        &self.state
    }

    #[inline]
    pub fn blockchain(&self) -> &LocalChain {
        &self.state.blockchain
    }

    #[inline]
    pub fn heads(&self) -> &[BlockId] {
        self.state.blockchain.heads()
    }

    #[inline]
    pub fn strategy(&self) -> &dyn MiningStrategy {
        self.strategy.as_ref()
    }

    pub fn set_difficulty(&mut self, difficulty: f64) {
        self.state.set_difficulty(difficulty);
    }

    /// Replaces this node's mining strategy. The new strategy is set up
    /// against the node's current chain.
    pub fn set_mining_strategy(&mut self, mut strategy: Box<dyn MiningStrategy>) {
        strategy.setup(&self.state);
        self.strategy = strategy;
    }

    /// Head of the chain this node would mine on.
    pub fn choose_head(&self) -> Result<&Block, SimulationError> {
        self.strategy.choose_head(&self.state)
    }

    /// Stores the genesis block without any fork logic or relaying, then sets
    /// up the mining strategy.
    pub(crate) fn inject_genesis(
        &mut self,
        ctx: &mut Context,
        genesis: Block,
    ) -> Result<(), SimulationError> {
        self.strategy
            .receive_block(&mut self.state, ctx, genesis, false, true)?;
        self.strategy.setup(&self.state);

        Ok(())
    }

    /// Advances the local clock and handles every packet revealed at the new
    /// timestamp.
    pub fn consume_pending(
        &mut self,
        ctx: &mut Context,
    ) -> Result<(), SimulationError> {
        self.state.timestamp += 1;
        for packet in ctx.network.deliver(self.state.id, self.state.timestamp) {
            gossip::handle(self, ctx, packet)?;
        }

        Ok(())
    }

    /// Creates this iteration's transactions and lets the oracle decide
    /// whether this node mined a block. Returns the ID of a mined block.
    pub fn try_mine(
        &mut self,
        ctx: &mut Context,
    ) -> Result<Option<BlockId>, SimulationError> {
        self.generate_transactions(ctx)?;

        if !self.strategy.mines() {
            return Ok(None);
        }
        let info = self.state.miner_info();
        if ctx.oracle.can_mine(&info, ctx.rng) {
            self.strategy.generate_block(&mut self.state, ctx, None)
        } else {
            Ok(None)
        }
    }

    /// [consume_pending](Self::consume_pending) followed by
    /// [try_mine](Self::try_mine).
    pub fn step(
        &mut self,
        ctx: &mut Context,
    ) -> Result<Option<BlockId>, SimulationError> {
        self.consume_pending(ctx)?;
        self.try_mine(ctx)
    }

    fn generate_transactions(
        &mut self,
        ctx: &mut Context,
    ) -> Result<(), SimulationError> {
        let rate = ctx.params.tx_per_node_per_iter;
        if rate <= 0.0 || !ctx.tx_model.generates() {
            return Ok(());
        }

        let mut count = rate.trunc() as u64;
        if ctx.rng.gen_bool(rate.fract()) {
            count += 1;
        }

        for _ in 0..count {
            let id = self.state.next_tx_id();
            let tx =
                tx_model::sample_transaction(id, self.state.timestamp, ctx.rng);

            self.state.tx_ids.insert(id, Entry::Known(tx.clone()));
            ctx.bookkeeper.save_tx(self.state.id, id, self.state.timestamp);
            ctx.events.log(
                self.state.timestamp,
                self.state.id,
                SimEvent::TxCreated { tx: id },
            );

            let broadcast = ctx.tx_model.on_generated(&mut self.state, tx);
            self.state.dispatch(ctx, broadcast)?;
        }

        Ok(())
    }
}
