//! Time-bucketed message delivery between nodes

use std::collections::{BTreeMap, HashMap};

use crate::{
    block::{Block, BlockId, Transaction, TxId},
    node::NodeId,
};

pub mod delay;

pub use delay::{BandwidthRule, DelayModel, LinkSpeed, NetworkConfigError, Region};

/// Size in bytes of INV and GETDATA messages.
pub const CONTROL_MESSAGE_SIZE: f64 = 100.0;

/// Identifies a gossiped item along with its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemId {
    Block(BlockId),
    Tx(TxId),
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemId::Block(id) => write!(f, "block {}", id),
            ItemId::Tx(id) => write!(f, "tx {}", id),
        }
    }
}

/// Contents of a [`Packet`].
#[derive(Debug, Clone)]
pub enum Payload {
    Block(Block),
    Tx(Transaction),
    /// Announcement that `sender` holds `item`.
    Inv { item: ItemId, sender: NodeId },
    /// Request from `sender` for the payload of `item`.
    GetData { item: ItemId, sender: NodeId },
}

impl Payload {
    /// Size on the wire in bytes.
    pub fn size(&self) -> f64 {
        match self {
            Payload::Block(block) => block.size,
            Payload::Tx(tx) => tx.size,
            Payload::Inv { .. } | Payload::GetData { .. } => CONTROL_MESSAGE_SIZE,
        }
    }
}

/// A payload in transit.
#[derive(Debug, Clone)]
pub struct Packet {
    pub payload: Payload,
    pub from: NodeId,
    pub sent_at: u64,
    /// Timestamp at which the payload becomes visible to the receiver.
    pub reveal_at: u64,
}

/// Inboxes of every node in a simulation together with per-link transmission
/// state.
///
/// A send from `a` to `b` is revealed no earlier than the previous send from
/// `a` to `b`, so messages on a link never overtake each other and a link
/// carries one payload at a time.
#[derive(Debug, Clone)]
pub struct Network {
    delay_model: DelayModel,
    iter_seconds: f64,
    regions: Vec<Region>,
    /// One inbox per node: reveal timestamp -> packets in send order.
    inboxes: Vec<BTreeMap<u64, Vec<Packet>>>,
    last_reveal: HashMap<(NodeId, NodeId), u64>,
    in_flight: usize,
}

impl Network {
    /// Creates a network where node `NodeId(i + 1)` is located in
    /// `regions[i]`.
    pub fn new(
        delay_model: DelayModel,
        iter_seconds: f64,
        regions: Vec<Region>,
    ) -> Self {
        let inboxes = vec![BTreeMap::new(); regions.len()];

        Network {
            delay_model,
            iter_seconds,
            regions,
            inboxes,
            last_reveal: HashMap::new(),
            in_flight: 0,
        }
    }

    #[inline]
    fn slot(id: NodeId) -> usize {
        debug_assert!(id != NodeId::GENESIS, "the genesis node has no inbox");
        id.get() - 1
    }

    pub fn delay_model(&self) -> &DelayModel {
        &self.delay_model
    }

    pub fn region_of(&self, id: NodeId) -> Region {
        self.regions[Self::slot(id)]
    }

    /// Number of packets sent but not yet delivered.
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Queues `payload` for delivery from `from` to `to`, where `now` is the
    /// sender's current timestamp. Returns the reveal timestamp, which is
    /// always later than `now`.
    pub fn send(
        &mut self,
        from: NodeId,
        to: NodeId,
        payload: Payload,
        now: u64,
    ) -> Result<u64, NetworkConfigError> {
        let seconds = self.delay_model.delay(
            self.region_of(from),
            self.region_of(to),
            payload.size(),
        )?;
        let delay = seconds / self.iter_seconds;

        let link = self.last_reveal.entry((from, to)).or_insert(0);
        let start = now.max(*link) as f64;
        let reveal_at = ((start + delay).ceil() as u64).max(now + 1);
        *link = reveal_at;

        self.inboxes[Self::slot(to)]
            .entry(reveal_at)
            .or_default()
            .push(Packet { payload, from, sent_at: now, reveal_at });
        self.in_flight += 1;

        Ok(reveal_at)
    }

    /// Removes and returns all packets revealed to `node` at `timestamp`, in
    /// the order they were sent.
    pub fn deliver(&mut self, node: NodeId, timestamp: u64) -> Vec<Packet> {
        let packets = self.inboxes[Self::slot(node)]
            .remove(&timestamp)
            .unwrap_or_default();
        self.in_flight -= packets.len();

        packets
    }

    /// Returns the reveal timestamps of all packets pending for `node`.
    pub fn pending(&self, node: NodeId) -> impl Iterator<Item = u64> + '_ {
        self.inboxes[Self::slot(node)]
            .iter()
            .flat_map(|(&t, packets)| std::iter::repeat(t).take(packets.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inv(seq: u64, sender: NodeId) -> Payload {
        Payload::Inv { item: ItemId::Block(BlockId::new(sender, seq)), sender }
    }

    fn two_node_network(iter_seconds: f64) -> Network {
        Network::new(
            DelayModel::bitcoin_2021(),
            iter_seconds,
            vec![Region::US, Region::CN],
        )
    }

    #[test]
    fn reveal_is_ceiling_of_delay() {
        let mut net = two_node_network(0.01);
        let (a, b) = (NodeId::from(1), NodeId::from(2));

        let seconds = net
            .delay_model()
            .delay(Region::US, Region::CN, CONTROL_MESSAGE_SIZE)
            .unwrap();
        let expected = 10 + (seconds / 0.01).ceil() as u64;

        assert_eq!(net.send(a, b, inv(0, a), 10).unwrap(), expected);
    }

    #[test]
    fn same_link_messages_do_not_overtake() {
        let mut net = two_node_network(0.1);
        let (a, b) = (NodeId::from(1), NodeId::from(2));

        let mut big = Block::genesis();
        big.size = 5_000_000.0;
        let first = net.send(a, b, Payload::Block(big), 1).unwrap();
        let second = net.send(a, b, inv(1, a), 2).unwrap();

        assert!(first > 2);
        assert!(second > first);
    }

    #[test]
    fn never_revealed_in_the_sending_iteration() {
        let model = DelayModel::empty()
            .with_latency(Region::US, Region::US, 0.0)
            .with_speed(Region::US, LinkSpeed { up: f64::INFINITY, down: f64::INFINITY });
        let mut net = Network::new(model, 0.1, vec![Region::US, Region::US]);
        let (a, b) = (NodeId::from(1), NodeId::from(2));

        assert_eq!(net.send(a, b, inv(0, a), 7).unwrap(), 8);
    }

    #[test]
    fn deliver_preserves_send_order() {
        let mut net = two_node_network(1.0);
        let (a, b) = (NodeId::from(1), NodeId::from(2));

        let t1 = net.send(a, b, inv(0, a), 0).unwrap();
        let t2 = net.send(b, a, inv(0, b), 0).unwrap();
        let t3 = net.send(a, b, inv(1, a), 0).unwrap();
        assert_eq!(t1, 1);
        assert_eq!(t3, 2);
        assert_eq!(t2, 1);
        assert_eq!(net.in_flight(), 3);

        assert!(net.deliver(b, 0).is_empty());
        let at_b: Vec<_> = net.deliver(b, 1).into_iter().map(|p| p.from).collect();
        assert_eq!(at_b, vec![a]);
        assert_eq!(net.pending(b).collect::<Vec<_>>(), vec![2]);
        assert_eq!(net.in_flight(), 2);
    }
}
