use std::num::NonZeroU64;

use log::info;
use rand::{rngs::StdRng, SeedableRng};

use crate::{
    block::{Block, BLOCK_HEADER_SIZE},
    bookkeeper::Bookkeeper,
    consensus::{ConsensusOracle, FixedDifficultyOracle, OracleKind, PowOracle},
    events::{EventSink, NoOpSink},
    network::{DelayModel, NetworkConfigError, Region},
    node::{Context, Node, NodeId, NodeState, Params},
    strategy::{MiningStrategy, StrategyKind},
    tx_model::TxModelKind,
};

use super::{Simulation, SimulationError};

/// Describes one node to be added to a [`SimulationBuilder`].
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub name: String,
    pub mine_power: f64,
    pub region: Region,
    strategy: Option<Box<dyn MiningStrategy>>,
}

impl NodeConfig {
    /// An honest node with the given name, mining power and region.
    pub fn new(name: impl Into<String>, mine_power: f64, region: Region) -> Self {
        NodeConfig {
            name: name.into(),
            mine_power,
            region,
            strategy: None,
        }
    }

    pub fn strategy(mut self, kind: StrategyKind) -> Self {
        self.strategy = Some(kind.build());

        self
    }

    /// Uses a custom strategy instance, e.g. one with a specific tie breaker.
    pub fn with_strategy<S: MiningStrategy + 'static>(mut self, strategy: S) -> Self {
        self.strategy = Some(Box::new(strategy));

        self
    }
}

/// Builds a [Simulation].
#[derive(Debug)]
pub struct SimulationBuilder {
    pub iterations: Option<u64>,
    /// Real-world seconds represented by one iteration (default 0.1).
    pub iter_seconds: f64,
    /// Expected number of iterations between blocks (default 6000).
    pub block_interval: u64,
    /// Maximum block size in bytes (default 1,000,000).
    pub max_block_size: f64,
    pub block_reward: f64,
    pub consensus: OracleKind,
    pub tx_model: TxModelKind,
    pub tx_per_node_per_iter: f64,
    pub seed: u64,
    pub delay_model: DelayModel,
    pub usage_sample_interval: Option<u64>,
    pub verify_invariants: bool,
    event_sink: Box<dyn EventSink>,
    nodes: Vec<NodeConfig>,
    links: Vec<(NodeId, NodeId)>,
}

#[derive(Debug, thiserror::Error)]
pub enum SimulationBuildError {
    #[error("no nodes were added")]
    NoNodesGiven,
    #[error("number of simulation iterations must be greater than 0")]
    ZeroIterations,
    #[error("block interval must be greater than 0")]
    ZeroBlockInterval,
    #[error("seconds per iteration must be positive and finite, got {0}")]
    BadIterSeconds(f64),
    #[error("mining power of node {name} is {power}, must be non-negative")]
    BadMinePower { name: String, power: f64 },
    #[error("total mining power must be greater than 0")]
    ZeroTotalPower,
    #[error("node {0} was never added")]
    UnknownNode(NodeId),
    #[error("node {0} cannot be connected to itself")]
    SelfConnection(NodeId),
    #[error("transactions per node per iteration must be non-negative, got {0}")]
    BadTxRate(f64),
    #[error("maximum block size {0} leaves no room past the block header")]
    BadMaxBlockSize(f64),
    #[error("usage sample interval must be greater than 0")]
    ZeroSampleInterval,
    #[error(transparent)]
    Network(#[from] NetworkConfigError),
    #[error("genesis injection failed")]
    Genesis(#[from] SimulationError),
}

impl Default for SimulationBuilder {
    fn default() -> Self {
        SimulationBuilder {
            iterations: None,
            iter_seconds: 0.1,
            block_interval: 6000,
            max_block_size: 1e6,
            block_reward: 100.0,
            consensus: OracleKind::default(),
            tx_model: TxModelKind::default(),
            tx_per_node_per_iter: 0.0,
            seed: 0,
            delay_model: DelayModel::bitcoin_2021(),
            usage_sample_interval: None,
            verify_invariants: false,
            event_sink: Box::new(NoOpSink),
            nodes: vec![],
            links: vec![],
        }
    }
}

impl SimulationBuilder {
    /// Creates a new [SimulationBuilder].
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of iterations the simulation will last for (default 1).
    pub fn iterations(mut self, iterations: u64) -> Self {
        self.iterations = Some(iterations);

        self
    }

    pub fn iter_seconds(mut self, seconds: f64) -> Self {
        self.iter_seconds = seconds;

        self
    }

    pub fn block_interval(mut self, iterations: u64) -> Self {
        self.block_interval = iterations;

        self
    }

    pub fn max_block_size(mut self, bytes: f64) -> Self {
        self.max_block_size = bytes;

        self
    }

    pub fn block_reward(mut self, reward: f64) -> Self {
        self.block_reward = reward;

        self
    }

    pub fn consensus(mut self, kind: OracleKind) -> Self {
        self.consensus = kind;

        self
    }

    /// Shorthand for a proof-of-work oracle whose total power is either fixed
    /// or resampled every iteration.
    pub fn dynamic_difficulty(mut self, dynamic: bool) -> Self {
        self.consensus = OracleKind::Pow { dynamic };

        self
    }

    pub fn tx_model(mut self, kind: TxModelKind) -> Self {
        self.tx_model = kind;

        self
    }

    pub fn tx_per_node_per_iter(mut self, rate: f64) -> Self {
        self.tx_per_node_per_iter = rate;

        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;

        self
    }

    pub fn delay_model(mut self, model: DelayModel) -> Self {
        self.delay_model = model;

        self
    }

    pub fn event_sink<E: EventSink + 'static>(mut self, sink: E) -> Self {
        self.event_sink = Box::new(sink);

        self
    }

    /// Records a [`UsageSample`](crate::bookkeeper::UsageSample) every
    /// `iterations` iterations.
    pub fn usage_sample_interval(mut self, iterations: u64) -> Self {
        self.usage_sample_interval = Some(iterations);

        self
    }

    /// Checks chain invariants after every iteration instead of only at the
    /// end of a run.
    pub fn verify_invariants(mut self, verify: bool) -> Self {
        self.verify_invariants = verify;

        self
    }

    /// Adds a node and returns its ID. IDs are assigned from 1 in order of
    /// addition.
    pub fn add_node(&mut self, config: NodeConfig) -> NodeId {
        self.nodes.push(config);
        NodeId::from(self.nodes.len())
    }

    /// Connects `a` and `b` in both directions.
    pub fn connect(&mut self, a: NodeId, b: NodeId) -> &mut Self {
        self.links.push((a, b));

        self
    }

    /// Connects every pair of nodes added so far.
    pub fn connect_all(&mut self) -> &mut Self {
        let n = self.nodes.len();
        for a in 1..=n {
            for b in a + 1..=n {
                self.links.push((NodeId::from(a), NodeId::from(b)));
            }
        }

        self
    }

    /// Creates a [Simulation] from the specified parameters.
    pub fn build(self) -> Result<Simulation, SimulationBuildError> {
        use SimulationBuildError::*;

        let SimulationBuilder {
            iterations,
            iter_seconds,
            block_interval,
            max_block_size,
            block_reward,
            consensus,
            tx_model,
            tx_per_node_per_iter,
            seed,
            delay_model,
            usage_sample_interval,
            verify_invariants,
            mut event_sink,
            nodes,
            links,
        } = self;

        if nodes.is_empty() {
            return Err(NoNodesGiven);
        }
        let iterations = match iterations {
            Some(0) => return Err(ZeroIterations),
            Some(x) => x,
            None => 1,
        };
        if block_interval == 0 {
            return Err(ZeroBlockInterval);
        }
        if !(iter_seconds.is_finite() && iter_seconds > 0.0) {
            return Err(BadIterSeconds(iter_seconds));
        }
        if tx_per_node_per_iter.is_nan() || tx_per_node_per_iter < 0.0 {
            return Err(BadTxRate(tx_per_node_per_iter));
        }
        if max_block_size.is_nan() || max_block_size <= BLOCK_HEADER_SIZE {
            return Err(BadMaxBlockSize(max_block_size));
        }
        let usage_sample_interval = match usage_sample_interval {
            Some(x) => Some(NonZeroU64::new(x).ok_or(ZeroSampleInterval)?),
            None => None,
        };

        for node in &nodes {
            if node.mine_power.is_nan() || node.mine_power < 0.0 {
                return Err(BadMinePower {
                    name: node.name.clone(),
                    power: node.mine_power,
                });
            }
        }
        let total_power: f64 = nodes.iter().map(|n| n.mine_power).sum();
        if !(total_power > 0.0) {
            return Err(ZeroTotalPower);
        }

        let n = nodes.len();
        for &(a, b) in &links {
            for id in [a, b] {
                if id.get() == 0 || id.get() > n {
                    return Err(UnknownNode(id));
                }
            }
            if a == b {
                return Err(SelfConnection(a));
            }
        }

        let regions: Vec<Region> = nodes.iter().map(|n| n.region).collect();
        delay_model.validate(regions.iter().copied())?;

        // Probability of one unit of mining power finding a block in one step
        let difficulty = 1.0 / (block_interval as f64 * total_power);

        let mut states: Vec<NodeState> = nodes
            .iter()
            .enumerate()
            .map(|(i, config)| {
                let mut state = NodeState::new(
                    NodeId::from(i + 1),
                    config.name.clone(),
                    config.mine_power,
                    config.region,
                    iter_seconds,
                );
                state.set_difficulty(difficulty);
                state
            })
            .collect();
        for (a, b) in links {
            let (i, j) = (a.get() - 1, b.get() - 1);
            states[i].connect_out(b);
            states[j].connect_in(a);
            states[j].connect_out(a);
            states[i].connect_in(b);
        }

        let mut bookkeeper = Bookkeeper::new();
        let mut nodes: Vec<Node> = states
            .into_iter()
            .zip(nodes)
            .map(|(state, config)| {
                bookkeeper.register_node(state.id);
                let strategy =
                    config.strategy.unwrap_or_else(|| StrategyKind::Honest.build());
                Node::new(state, strategy)
            })
            .collect();

        let mut oracle: Box<dyn ConsensusOracle> = match consensus {
            OracleKind::Pow { dynamic } => Box::new(PowOracle::new(
                block_interval,
                total_power,
                block_reward,
                dynamic,
            )),
            OracleKind::FixedDifficulty => {
                Box::new(FixedDifficultyOracle::new(block_reward))
            }
        };
        let mut tx_model = tx_model.build();
        let mut network = crate::network::Network::new(delay_model, iter_seconds, regions);
        let mut rng = StdRng::seed_from_u64(seed);
        let params = Params { max_block_size, tx_per_node_per_iter };

        {
            let mut ctx = Context {
                network: &mut network,
                bookkeeper: &mut bookkeeper,
                oracle: &mut *oracle,
                tx_model: &mut *tx_model,
                events: &mut *event_sink,
                rng: &mut rng,
                params: &params,
            };
            for node in nodes.iter_mut() {
                node.inject_genesis(&mut ctx, Block::genesis())?;
            }
        }

        info!(
            "built simulation: {} nodes, {} links, total power {}, {} tx model",
            n,
            nodes.iter().map(|n| n.state().outs.len()).sum::<usize>() / 2,
            total_power,
            tx_model.name()
        );

        Ok(Simulation {
            nodes,
            network,
            bookkeeper,
            oracle,
            tx_model,
            events: event_sink,
            rng,
            seed,
            params,
            iteration: 0,
            iterations,
            usage_sample_interval,
            verify_invariants,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_node() -> SimulationBuilder {
        let mut builder = SimulationBuilder::new();
        builder.add_node(NodeConfig::new("solo", 1.0, Region::US));
        builder
    }

    #[test]
    fn example_build() {
        one_node().build().expect("valid simulation build");
    }

    #[test]
    fn genesis_is_injected_everywhere() {
        let mut builder = one_node();
        let b = builder.add_node(NodeConfig::new("b", 3.0, Region::RU));
        builder.connect(NodeId::from(1), b);
        let sim = builder.build().unwrap();

        for node in sim.nodes() {
            assert_eq!(node.heads(), &[crate::block::BlockId::GENESIS]);
            assert_eq!(
                sim.bookkeeper()
                    .block_receipt_time(node.id(), crate::block::BlockId::GENESIS),
                Some(0)
            );
            assert_eq!(node.state().difficulty, 1.0 / (6000.0 * 4.0));
            assert_eq!(node.state().outs.len(), 1);
            assert_eq!(node.state().ins.len(), 1);
        }
        assert_eq!(sim.network().in_flight(), 0);
    }

    #[test]
    fn invalid_configurations_are_rejected() {
        assert!(matches!(
            SimulationBuilder::new().build(),
            Err(SimulationBuildError::NoNodesGiven)
        ));
        assert!(matches!(
            one_node().iterations(0).build(),
            Err(SimulationBuildError::ZeroIterations)
        ));
        assert!(matches!(
            one_node().block_interval(0).build(),
            Err(SimulationBuildError::ZeroBlockInterval)
        ));
        assert!(matches!(
            one_node().iter_seconds(0.0).build(),
            Err(SimulationBuildError::BadIterSeconds(_))
        ));
        assert!(matches!(
            one_node().tx_per_node_per_iter(-1.0).build(),
            Err(SimulationBuildError::BadTxRate(_))
        ));
        assert!(matches!(
            one_node().max_block_size(10.0).build(),
            Err(SimulationBuildError::BadMaxBlockSize(_))
        ));
        assert!(matches!(
            one_node().usage_sample_interval(0).build(),
            Err(SimulationBuildError::ZeroSampleInterval)
        ));
    }

    #[test]
    fn bad_nodes_and_links_are_rejected() {
        let mut builder = SimulationBuilder::new();
        builder.add_node(NodeConfig::new("idle", 0.0, Region::US));
        assert!(matches!(builder.build(), Err(SimulationBuildError::ZeroTotalPower)));

        let mut builder = SimulationBuilder::new();
        builder.add_node(NodeConfig::new("neg", -1.0, Region::US));
        assert!(matches!(
            builder.build(),
            Err(SimulationBuildError::BadMinePower { .. })
        ));

        let mut builder = one_node();
        builder.connect(NodeId::from(1), NodeId::from(1));
        assert!(matches!(builder.build(), Err(SimulationBuildError::SelfConnection(_))));

        let mut builder = one_node();
        builder.connect(NodeId::from(1), NodeId::from(5));
        assert!(matches!(builder.build(), Err(SimulationBuildError::UnknownNode(_))));
    }

    #[test]
    fn incomplete_delay_model_is_rejected() {
        let mut builder = SimulationBuilder::new().delay_model(DelayModel::empty());
        builder.add_node(NodeConfig::new("a", 1.0, Region::KZ));

        assert!(matches!(
            builder.build(),
            Err(SimulationBuildError::Network(NetworkConfigError::MissingLatency(..)))
        ));
    }
}
