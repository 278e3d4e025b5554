//! Structured records of what happens inside a simulation.

use std::{
    fmt::Debug,
    sync::{Arc, Mutex},
};

use dyn_clone::DynClone;
use log::{debug, trace};

use crate::{
    block::{BlockId, TxId},
    network::ItemId,
    node::NodeId,
};

/// Something a node did or observed at a given timestamp.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    /// A block was mined. `withheld` is true if it went to a private chain.
    BlockMined { block: BlockId, prev: BlockId, height: u64, withheld: bool },
    /// A new block payload arrived from a peer.
    BlockReceived { block: BlockId, from: NodeId },
    /// A block payload arrived which was already known.
    DuplicateBlock { block: BlockId, from: NodeId },
    /// An INV arrived. `requested` is true if it triggered a GETDATA.
    InvReceived { item: ItemId, from: NodeId, requested: bool },
    /// A GETDATA was answered with the full payload.
    GetDataServed { item: ItemId, to: NodeId },
    /// A GETDATA asked for something this node does not hold.
    GetDataMiss { item: ItemId, from: NodeId },
    TxCreated { tx: TxId },
    TxReceived { tx: TxId, from: NodeId },
    /// Previously withheld blocks were made public.
    PrivateChainReleased { blocks: usize, head: BlockId },
    /// The private chain was replaced by the public one.
    PrivateChainAbandoned { height: u64 },
}

/// Receives every [`SimEvent`] emitted during a simulation.
pub trait EventSink: Debug + DynClone + Send + Sync {
    fn log(&mut self, timestamp: u64, node: NodeId, event: SimEvent);
}

dyn_clone::clone_trait_object!(EventSink);

/// Discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpSink;

impl EventSink for NoOpSink {
    #[inline]
    fn log(&mut self, _timestamp: u64, _node: NodeId, _event: SimEvent) {}
}

/// Forwards events to the [`log`] facade. Block-level events are logged at
/// `debug`, everything else at `trace`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn log(&mut self, timestamp: u64, node: NodeId, event: SimEvent) {
        match event {
            SimEvent::BlockMined { .. }
            | SimEvent::BlockReceived { .. }
            | SimEvent::PrivateChainReleased { .. }
            | SimEvent::PrivateChainAbandoned { .. } => {
                debug!("t={} node {}: {:?}", timestamp, node, event)
            }
            _ => trace!("t={} node {}: {:?}", timestamp, node, event),
        }
    }
}

/// Keeps every event in memory.
///
/// Clones share the same buffer, so a sink handed to a
/// [`SimulationBuilder`](crate::simulation::SimulationBuilder) can still be
/// read after the simulation runs.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<(u64, NodeId, SimEvent)>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all events recorded so far, in emission order.
    pub fn events(&self) -> Vec<(u64, NodeId, SimEvent)> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl EventSink for RecordingSink {
    fn log(&mut self, timestamp: u64, node: NodeId, event: SimEvent) {
        let mut events = match self.events.lock() {
            Ok(events) => events,
            Err(poisoned) => poisoned.into_inner(),
        };
        events.push((timestamp, node, event));
    }
}
