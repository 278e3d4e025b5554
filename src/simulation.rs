//! Building and running simulations

use std::num::NonZeroU64;

use log::{debug, info};
use rand::{rngs::StdRng, SeedableRng};
#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::{
    block::BlockId,
    bookkeeper::{Bookkeeper, UsageSample},
    chain::ChainError,
    consensus::ConsensusOracle,
    events::EventSink,
    network::{Network, NetworkConfigError},
    node::{Context, Node, NodeId, Params},
    tx_model::TxModel,
};

pub mod builder;

pub use builder::{NodeConfig, SimulationBuildError, SimulationBuilder};

/// A configured network of nodes, advanced one iteration at a time.
///
/// # Details
/// Each iteration has two phases. First every node, in order of addition,
/// consumes the packets revealed to it at the new timestamp. Then every node,
/// in the same order, creates transactions and tries to mine.
#[derive(Debug, Clone)]
pub struct Simulation {
    nodes: Vec<Node>,
    network: Network,
    bookkeeper: Bookkeeper,
    oracle: Box<dyn ConsensusOracle>,
    tx_model: Box<dyn TxModel>,
    events: Box<dyn EventSink>,
    rng: StdRng,
    seed: u64,
    params: Params,
    iteration: u64,
    iterations: u64,
    usage_sample_interval: Option<NonZeroU64>,
    verify_invariants: bool,
}

/// Contains the output data from a simulation.
#[derive(Debug, Clone)]
pub struct SimulationOutput {
    pub nodes: Vec<Node>,
    pub bookkeeper: Bookkeeper,
    pub iterations: u64,
    pub seed: u64,
}

impl SimulationOutput {
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id() == id)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SimulationError {
    #[error(
        "node {node} at t={timestamp}: private height {private_height} is \
         below public height {public_height} (block {block:?})"
    )]
    NegativeForkDelta {
        node: NodeId,
        timestamp: u64,
        private_height: u64,
        public_height: u64,
        block: Option<BlockId>,
    },
    #[error("node {node} at t={timestamp}: {source}")]
    ChainInvariant {
        node: NodeId,
        timestamp: u64,
        #[source]
        source: ChainError,
    },
    #[error("node {node} has no head block")]
    NoHead { node: NodeId },
    #[error("node {node} cannot mine on unknown block {block}")]
    UnknownParent { node: NodeId, block: BlockId },
    #[error(transparent)]
    Network(#[from] NetworkConfigError),
}

impl Simulation {
    pub fn builder() -> SimulationBuilder {
        SimulationBuilder::new()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.get().checked_sub(1)?)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.get().checked_sub(1)?)
    }

    pub fn bookkeeper(&self) -> &Bookkeeper {
        &self.bookkeeper
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Number of iterations performed so far, which is also the timestamp of
    /// the latest one.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Performs one iteration.
    pub fn step(&mut self) -> Result<(), SimulationError> {
        self.iteration += 1;

        let Simulation {
            nodes,
            network,
            bookkeeper,
            oracle,
            tx_model,
            events,
            rng,
            params,
            ..
        } = self;
        let mut ctx = Context {
            network,
            bookkeeper,
            oracle: &mut **oracle,
            tx_model: &mut **tx_model,
            events: &mut **events,
            rng,
            params,
        };

        for node in nodes.iter_mut() {
            node.consume_pending(&mut ctx)?;
        }
        for node in nodes.iter_mut() {
            node.try_mine(&mut ctx)?;
        }

        if let Some(interval) = self.usage_sample_interval {
            if self.iteration % interval.get() == 0 {
                self.sample_usage();
            }
        }
        if self.verify_invariants {
            self.check_invariants()?;
        }

        Ok(())
    }

    fn sample_usage(&mut self) {
        let mempool_txs = self
            .tx_model
            .shared_pool_len()
            .unwrap_or_else(|| self.nodes.iter().map(|n| n.state.mempool.len()).sum());

        self.bookkeeper.record_usage(UsageSample {
            iteration: self.iteration,
            in_flight_packets: self.network.in_flight(),
            mempool_txs,
            known_blocks: self.nodes.iter().map(|n| n.blockchain().num_known()).sum(),
        });
    }

    /// Checks the head invariants of every node's chain.
    pub fn check_invariants(&self) -> Result<(), SimulationError> {
        for node in &self.nodes {
            node.blockchain().verify().map_err(|source| {
                SimulationError::ChainInvariant {
                    node: node.id(),
                    timestamp: node.state.timestamp,
                    source,
                }
            })?;
        }

        Ok(())
    }

    /// Performs every remaining iteration.
    pub fn run(mut self) -> Result<SimulationOutput, SimulationError> {
        info!(
            "running {} iterations over {} nodes (seed {})",
            self.iterations - self.iteration,
            self.nodes.len(),
            self.seed
        );

        while self.iteration < self.iterations {
            self.step()?;
            if self.iteration % 100_000 == 0 {
                debug!("reached iteration {}", self.iteration);
            }
        }
        self.check_invariants()?;

        info!(
            "finished at iteration {} with {} packets in flight",
            self.iteration,
            self.network.in_flight()
        );
        Ok(SimulationOutput {
            nodes: self.nodes,
            bookkeeper: self.bookkeeper,
            iterations: self.iteration,
            seed: self.seed,
        })
    }

    /// Runs one independent copy of this simulation for each seed.
    pub fn run_replicas<I>(
        &self,
        seeds: I,
    ) -> Result<Vec<SimulationOutput>, SimulationError>
    where
        I: IntoIterator<Item = u64>,
    {
        let sims: Vec<Simulation> = seeds
            .into_iter()
            .map(|seed| {
                let mut sim = self.clone();
                sim.seed = seed;
                sim.rng = StdRng::seed_from_u64(seed);
                sim
            })
            .collect();

        #[cfg(feature = "rayon")]
        let outputs: Result<Vec<_>, _> =
            sims.into_par_iter().map(Simulation::run).collect();
        #[cfg(not(feature = "rayon"))]
        let outputs: Result<Vec<_>, _> =
            sims.into_iter().map(Simulation::run).collect();

        outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{network::Region, strategy::StrategyKind, tx_model::TxModelKind};

    fn two_honest(iterations: u64) -> Simulation {
        let mut builder = SimulationBuilder::new()
            .iterations(iterations)
            .block_interval(50)
            .seed(3)
            .verify_invariants(true);
        let a = builder.add_node(NodeConfig::new("a", 1.0, Region::US));
        let b = builder.add_node(NodeConfig::new("b", 1.0, Region::GE));
        builder.connect(a, b);

        builder.build().unwrap()
    }

    #[test]
    fn step_advances_every_node_clock() {
        let mut sim = two_honest(10);
        sim.step().unwrap();
        sim.step().unwrap();

        assert_eq!(sim.iteration(), 2);
        assert!(sim.nodes().iter().all(|n| n.state().timestamp == 2));
    }

    #[test]
    fn run_performs_configured_iterations() {
        let out = two_honest(500).run().unwrap();

        assert_eq!(out.iterations, 500);
        assert!(out.nodes.iter().all(|n| n.state().timestamp == 500));
    }

    #[test]
    fn same_seed_same_result() {
        let heads = |out: SimulationOutput| -> Vec<Vec<BlockId>> {
            out.nodes.iter().map(|n| n.heads().to_vec()).collect()
        };

        let sim = two_honest(2_000);
        let first = heads(sim.clone().run().unwrap());
        let second = heads(sim.run().unwrap());
        assert_eq!(first, second);
    }

    #[test]
    fn replicas_are_independent() {
        let sim = two_honest(1_000);
        let outputs = sim.run_replicas([1, 2, 1]).unwrap();

        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs[0].seed, 1);
        assert_eq!(
            outputs[0].nodes[0].heads(),
            outputs[2].nodes[0].heads()
        );
    }

    #[test]
    fn usage_is_sampled_on_schedule() {
        let mut builder = SimulationBuilder::new()
            .iterations(100)
            .block_interval(10)
            .tx_model(TxModelKind::Full)
            .tx_per_node_per_iter(0.5)
            .usage_sample_interval(25);
        let a = builder.add_node(NodeConfig::new("a", 1.0, Region::US));
        let b = builder.add_node(
            NodeConfig::new("b", 0.0, Region::CN).strategy(StrategyKind::Null),
        );
        builder.connect(a, b);

        let out = builder.build().unwrap().run().unwrap();
        let iterations: Vec<u64> =
            out.bookkeeper.usage().iter().map(|s| s.iteration).collect();
        assert_eq!(iterations, vec![25, 50, 75, 100]);
    }
}
