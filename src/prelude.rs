/*!
Re-export of common values and datatypes used for running and analyzing
simulations. Must be imported manually.

```
use gossip_mining_sim::prelude::*;
```
*/

use crate::{
    block, bookkeeper, chain, consensus, events, network, node, simulation,
    strategy, tie_breaker, tx_model,
};

pub use block::{Block, BlockId, Transaction, TxId};

pub use bookkeeper::{Bookkeeper, UsageSample};

pub use chain::{ChainError, Entry, LocalChain};

pub use consensus::{
    ConsensusOracle, FixedDifficultyOracle, OracleKind, PowOracle, Reward,
};

pub use events::{EventSink, LogSink, NoOpSink, RecordingSink, SimEvent};

pub use network::{
    BandwidthRule, DelayModel, LinkSpeed, NetworkConfigError, Region,
};

pub use node::{Node, NodeId};

pub use simulation::{
    NodeConfig, Simulation, SimulationBuildError, SimulationBuilder,
    SimulationError, SimulationOutput,
};

pub use strategy::{
    HonestMining, MiningStrategy, NullMining, SelfishMining, StrategyKind,
};

pub use tie_breaker::TieBreaker;

pub use tx_model::{FullTx, NullTx, SimpleTx, TxModel, TxModelKind};
