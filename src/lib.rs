/*!
Simulator for block propagation and adversarial mining over a geo-distributed
gossip network.

Nodes sit in one of several world regions, exchange blocks and transactions
through an INV/GETDATA protocol whose messages are delayed according to
regional latency and bandwidth, and mine under a proof-of-work oracle with
either an honest, selfish or non-mining strategy.
*/

pub mod block;
pub mod bookkeeper;
pub mod chain;
pub mod consensus;
pub mod events;
pub(crate) mod gossip;
pub mod mempool;
pub mod network;
pub mod node;
pub mod prelude;
pub mod simulation;
pub mod strategy;
pub mod tie_breaker;
pub mod tx_model;

#[cfg(test)]
pub(crate) mod testing;
