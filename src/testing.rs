//! Hand-driven nodes for unit tests.

use rand::{rngs::StdRng, SeedableRng};

use crate::{
    block::{Block, BlockId},
    bookkeeper::Bookkeeper,
    consensus::PowOracle,
    events::RecordingSink,
    gossip,
    network::{DelayModel, Network, Packet, Payload, Region},
    node::{Context, Node, NodeId, NodeState, Params},
    simulation::SimulationError,
    strategy::StrategyKind,
    tx_model::TxModel,
};

/// Fully connected nodes in one region, with every step invoked by hand.
pub(crate) struct Harness {
    pub network: Network,
    pub bookkeeper: Bookkeeper,
    pub oracle: PowOracle,
    pub tx_model: Box<dyn TxModel>,
    pub events: RecordingSink,
    pub rng: StdRng,
    pub params: Params,
    pub nodes: Vec<Node>,
}

impl Harness {
    pub fn new(kinds: &[StrategyKind], tx_model: Box<dyn TxModel>) -> Self {
        let n = kinds.len();
        let mut harness = Harness {
            network: Network::new(DelayModel::bitcoin_2021(), 0.1, vec![Region::US; n]),
            bookkeeper: Bookkeeper::new(),
            oracle: PowOracle::new(100, n as f64, 1.0, false),
            tx_model,
            events: RecordingSink::new(),
            rng: StdRng::seed_from_u64(0),
            params: Params { max_block_size: 1e6, tx_per_node_per_iter: 0.0 },
            nodes: vec![],
        };

        for (i, kind) in kinds.iter().enumerate() {
            let id = NodeId::from(i + 1);
            let mut state = NodeState::new(id, format!("n{}", id), 1.0, Region::US, 0.1);
            for peer in (1..=n).map(NodeId::from).filter(|&p| p != id) {
                state.connect_out(peer);
                state.connect_in(peer);
            }
            harness.bookkeeper.register_node(id);
            harness.nodes.push(Node::new(state, kind.build()));
        }
        for i in 0..n {
            harness
                .with_ctx(i, |node, ctx| node.inject_genesis(ctx, Block::genesis()))
                .expect("genesis injection");
        }

        harness
    }

    pub fn with_ctx<T>(
        &mut self,
        i: usize,
        f: impl FnOnce(&mut Node, &mut Context) -> T,
    ) -> T {
        let mut ctx = Context {
            network: &mut self.network,
            bookkeeper: &mut self.bookkeeper,
            oracle: &mut self.oracle,
            tx_model: &mut *self.tx_model,
            events: &mut self.events,
            rng: &mut self.rng,
            params: &self.params,
        };
        f(&mut self.nodes[i], &mut ctx)
    }

    /// Makes node `i` mine a block on its preferred head.
    pub fn mine(&mut self, i: usize) -> Result<BlockId, SimulationError> {
        self.with_ctx(i, |node, ctx| {
            node.strategy.generate_block(&mut node.state, ctx, None)
        })
        .map(|id| id.expect("strategy mines"))
    }

    /// Hands `block` to node `i` as if it arrived from `from`.
    pub fn deliver(
        &mut self,
        i: usize,
        block: Block,
        from: NodeId,
    ) -> Result<(), SimulationError> {
        let packet = Packet {
            payload: Payload::Block(block),
            from,
            sent_at: 0,
            reveal_at: 0,
        };
        self.with_ctx(i, |node, ctx| gossip::handle(node, ctx, packet))
    }

    /// A block known publicly by node `i`.
    pub fn public_block(&self, i: usize, id: BlockId) -> Block {
        self.nodes[i].blockchain().block(id).cloned().expect("block is public")
    }
}
