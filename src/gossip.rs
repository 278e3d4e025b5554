//! INV/GETDATA dissemination of blocks and transactions.
//!
//! A node which learns of a new item announces it to its peers with an INV.
//! A peer which has never heard of the item records a placeholder and answers
//! with a GETDATA; the announcer then sends the full payload. Placeholders
//! make every item requested at most once per node.

use crate::{
    block::{Block, Transaction},
    chain::Entry,
    events::SimEvent,
    network::{ItemId, Packet, Payload},
    node::{Context, Node, NodeId},
    simulation::SimulationError,
};

/// Handles one delivered packet.
pub(crate) fn handle(
    node: &mut Node,
    ctx: &mut Context,
    packet: Packet,
) -> Result<(), SimulationError> {
    match packet.payload {
        Payload::Block(block) => on_block(node, ctx, block, packet.from),
        Payload::Tx(tx) => on_tx(node, ctx, tx, packet.from),
        Payload::Inv { item, sender } => on_inv(node, ctx, item, sender),
        Payload::GetData { item, sender } => on_get_data(node, ctx, item, sender),
    }
}

fn on_block(
    node: &mut Node,
    ctx: &mut Context,
    block: Block,
    from: NodeId,
) -> Result<(), SimulationError> {
    let (now, id) = (node.state.timestamp, node.state.id);
    if node.state.blockchain.is_known(block.id) {
        ctx.events
            .log(now, id, SimEvent::DuplicateBlock { block: block.id, from });
        return Ok(());
    }

    ctx.events.log(now, id, SimEvent::BlockReceived { block: block.id, from });
    node.strategy
        .receive_block(&mut node.state, ctx, block, true, false)
}

fn on_tx(
    node: &mut Node,
    ctx: &mut Context,
    tx: Transaction,
    from: NodeId,
) -> Result<(), SimulationError> {
    let state = &mut node.state;
    if state.tx_ids.get(&tx.id).is_some_and(Entry::is_known) {
        return Ok(());
    }

    state.tx_ids.insert(tx.id, Entry::Known(tx.clone()));
    ctx.bookkeeper.save_tx(state.id, tx.id, state.timestamp);
    ctx.events
        .log(state.timestamp, state.id, SimEvent::TxReceived { tx: tx.id, from });

    let broadcast = ctx.tx_model.on_received(state, tx);
    state.dispatch(ctx, broadcast)
}

fn on_inv(
    node: &mut Node,
    ctx: &mut Context,
    item: ItemId,
    sender: NodeId,
) -> Result<(), SimulationError> {
    let state = &mut node.state;
    let unseen = match item {
        ItemId::Block(id) => state.blockchain.mark_placeholder(id),
        ItemId::Tx(id) => {
            if state.tx_ids.contains_key(&id) {
                false
            } else {
                state.tx_ids.insert(id, Entry::Placeholder);
                true
            }
        }
    };

    ctx.events.log(
        state.timestamp,
        state.id,
        SimEvent::InvReceived { item, from: sender, requested: unseen },
    );
    if unseen {
        let request = Payload::GetData { item, sender: state.id };
        state.send_to(ctx, sender, request)?;
    }

    Ok(())
}

fn on_get_data(
    node: &mut Node,
    ctx: &mut Context,
    item: ItemId,
    sender: NodeId,
) -> Result<(), SimulationError> {
    let state = &node.state;
    let payload = match item {
        ItemId::Block(id) => state.blockchain.block(id).cloned().map(Payload::Block),
        ItemId::Tx(id) => state
            .tx_ids
            .get(&id)
            .and_then(Entry::known)
            .cloned()
            .map(Payload::Tx),
    };

    match payload {
        Some(payload) => {
            state.send_to(ctx, sender, payload)?;
            ctx.events
                .log(state.timestamp, state.id, SimEvent::GetDataServed { item, to: sender });
        }
        None => ctx
            .events
            .log(state.timestamp, state.id, SimEvent::GetDataMiss { item, from: sender }),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        block::BlockId, strategy::StrategyKind, testing::Harness, tx_model::FullTx,
    };

    fn harness() -> Harness {
        Harness::new(&[StrategyKind::Honest, StrategyKind::Honest], Box::new(FullTx))
    }

    fn inv_from_peer(item: ItemId) -> Packet {
        Packet {
            payload: Payload::Inv { item, sender: NodeId::from(2) },
            from: NodeId::from(2),
            sent_at: 0,
            reveal_at: 1,
        }
    }

    #[test]
    fn repeated_inv_requests_once() {
        let mut h = harness();
        let id = BlockId::new(NodeId::from(2), 1);

        h.with_ctx(0, |node, ctx| {
            handle(node, ctx, inv_from_peer(ItemId::Block(id)))?;
            handle(node, ctx, inv_from_peer(ItemId::Block(id)))
        })
        .unwrap();

        assert_eq!(h.network.in_flight(), 1);
        assert!(h.nodes[0].blockchain().contains(id));
        assert!(!h.nodes[0].blockchain().is_known(id));

        let requested: Vec<bool> = h
            .events
            .events()
            .into_iter()
            .filter_map(|(_, _, e)| match e {
                SimEvent::InvReceived { requested, .. } => Some(requested),
                _ => None,
            })
            .collect();
        assert_eq!(requested, vec![true, false]);
    }

    #[test]
    fn get_data_for_unknown_item_is_ignored() {
        let mut h = harness();
        let item = ItemId::Block(BlockId::new(NodeId::from(1), 9));

        h.with_ctx(0, |node, ctx| on_get_data(node, ctx, item, NodeId::from(2)))
            .unwrap();

        assert_eq!(h.network.in_flight(), 0);
        assert!(h
            .events
            .events()
            .iter()
            .any(|(_, _, e)| matches!(e, SimEvent::GetDataMiss { .. })));
    }

    #[test]
    fn get_data_for_known_block_sends_it() {
        let mut h = harness();
        let item = ItemId::Block(BlockId::GENESIS);

        h.with_ctx(0, |node, ctx| on_get_data(node, ctx, item, NodeId::from(2)))
            .unwrap();

        assert_eq!(h.network.in_flight(), 1);
    }

    #[test]
    fn duplicate_block_is_neither_stored_nor_relayed() {
        let mut h = harness();

        h.deliver(0, Block::genesis(), NodeId::from(2)).unwrap();

        assert_eq!(h.nodes[0].blockchain().len(), 1);
        assert_eq!(h.network.in_flight(), 0);
    }

    #[test]
    fn new_block_is_stored_and_announced() {
        let mut h = harness();
        let id = h.mine(1).unwrap();
        let block = h.public_block(1, id);
        let in_flight = h.network.in_flight();

        h.deliver(0, block, NodeId::from(2)).unwrap();

        assert!(h.nodes[0].blockchain().is_known(id));
        assert_eq!(h.nodes[0].heads(), &[id]);
        assert!(h.bookkeeper.block_receipt_time(NodeId::from(1), id).is_some());
        assert_eq!(h.network.in_flight(), in_flight + 1);
    }

    #[test]
    fn transactions_are_stored_pooled_and_announced() {
        let mut h = harness();
        let tx = crate::block::Transaction::new(
            crate::block::TxId::new(NodeId::from(2), 1),
            0,
            250.0,
            1.0,
            0.001,
        );
        let packet = Packet {
            payload: Payload::Tx(tx.clone()),
            from: NodeId::from(2),
            sent_at: 0,
            reveal_at: 1,
        };

        h.with_ctx(0, |node, ctx| handle(node, ctx, packet.clone())).unwrap();
        h.with_ctx(0, |node, ctx| handle(node, ctx, packet)).unwrap();

        assert!(h.nodes[0].state().mempool.contains(tx.id));
        assert_eq!(h.bookkeeper.tx_receipt_time(NodeId::from(1), tx.id), Some(0));
        assert_eq!(h.network.in_flight(), 1);
    }
}
