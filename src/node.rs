//! Node actor: the per-node state machine running the OM(m)
//! recursive Byzantine agreement algorithm.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, trace, warn};

use crate::clock::SimClock;
use crate::tree::ResultTree;
use crate::types::{
    AwaitingEntry, Chain, ConsensusMessage, ConsensusResultMessage, Inbound, Majority, NodeId,
    Outbound,
};

/// Per-round scratch state, cleared at the start of every consensus round.
struct RoundState<V> {
    commander: NodeId,
    start_ms: u64,
    awaiting: Vec<AwaitingEntry>,
    pending: Vec<ConsensusMessage<V>>,
    tree: Option<ResultTree<V>>,
    emitted: bool,
}

/// One node's state machine. Owns its inbound channel and a sender half of
/// its outbound channel; everything else is private to the actor loop.
pub struct NodeActor<V> {
    id: NodeId,
    total_nodes: usize,
    default_value: V,
    sleep_ms: f64,
    max_latency_ms: u64,
    clock: Arc<SimClock>,
    inbound: mpsc::UnboundedReceiver<Inbound<V>>,
    outbound: mpsc::UnboundedSender<Outbound<V>>,
    m_values: Vec<usize>,
    round: Option<RoundState<V>>,
}

/// The fabric-facing handle returned by [`spawn`]: the sender half of a
/// node's inbound channel and the receiver half of its outbound channel.
pub struct NodeHandle<V> {
    pub id: NodeId,
    pub inbound_tx: mpsc::UnboundedSender<Inbound<V>>,
    pub outbound_rx: mpsc::UnboundedReceiver<Outbound<V>>,
}

/// Spawn a node actor as its own task, returning a handle the fabric drives
/// and the task's `JoinHandle` for shutdown synchronization.
pub fn spawn<V: Majority>(
    id: NodeId,
    total_nodes: usize,
    default_value: V,
    sleep_ms: f64,
    max_latency_ms: u64,
    m_values: Vec<usize>,
    clock: Arc<SimClock>,
) -> (NodeHandle<V>, tokio::task::JoinHandle<()>) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let actor = NodeActor {
        id,
        total_nodes,
        default_value,
        sleep_ms,
        max_latency_ms,
        clock,
        inbound: inbound_rx,
        outbound: outbound_tx,
        m_values,
        round: None,
    };
    let join = tokio::spawn(actor.run());
    (
        NodeHandle {
            id,
            inbound_tx,
            outbound_rx,
        },
        join,
    )
}

impl<V: Majority> NodeActor<V> {
    /// The actor loop: sleep, reap timeouts, rescan pending messages, then
    /// consume at most one inbound message without blocking the tick.
    pub async fn run(mut self) {
        loop {
            if self.sleep_ms > 0.0 {
                tokio::time::sleep(Duration::from_secs_f64(self.sleep_ms / 1000.0)).await;
            } else {
                // Still yield cooperatively so a zero-sleep configuration
                // doesn't starve other tasks sharing this runtime thread.
                tokio::task::yield_now().await;
            }

            self.reap_timeouts();
            self.rescan_pending();

            match self.inbound.try_recv() {
                Ok(Inbound::Shutdown) => {
                    debug!(node = %self.id, "node actor shutting down");
                    return;
                }
                Ok(Inbound::SetMValues(values)) => {
                    debug!(node = %self.id, ?values, "node tolerance updated");
                    self.m_values = values;
                }
                Ok(Inbound::ConsensusStart { commander }) => {
                    self.start_round(commander);
                }
                Ok(Inbound::TriggerCommander { decision }) => {
                    self.trigger_commander(decision);
                }
                Ok(Inbound::Consensus(msg)) => {
                    self.handle_consensus(msg);
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    debug!(node = %self.id, "inbound channel closed, shutting down");
                    return;
                }
            }
        }
    }

    fn active_m(&self) -> usize {
        self.m_values.first().copied().unwrap_or(0)
    }

    fn start_round(&mut self, commander: NodeId) {
        let now = self.clock.now_ms();
        self.round = Some(RoundState {
            commander,
            start_ms: now,
            awaiting: vec![AwaitingEntry {
                deadline_ms: now + self.max_latency_ms,
                expected_chain: vec![commander],
            }],
            pending: Vec::new(),
            tree: None,
            emitted: false,
        });
        trace!(node = %self.id, commander = %commander, "round started, awaiting commander value");
    }

    fn trigger_commander(&mut self, decision: V) {
        let m = self.active_m();
        self.round = Some(RoundState {
            commander: self.id,
            start_ms: self.clock.now_ms(),
            awaiting: Vec::new(),
            pending: Vec::new(),
            tree: Some(ResultTree::new(m, self.total_nodes, self.id, decision.clone())),
            emitted: true,
        });

        for peer in 0..self.total_nodes as u32 {
            let peer_id = NodeId(peer);
            if peer_id == self.id {
                continue;
            }
            match ConsensusMessage::new(peer_id, decision.clone(), vec![self.id]) {
                Ok(msg) => {
                    let _ = self.outbound.send(Outbound::Consensus(msg));
                }
                Err(err) => warn!(node = %self.id, %err, "failed to build commander broadcast"),
            }
        }

        debug!(node = %self.id, m, "commander emitting immediate local result");
        let _ = self.outbound.send(Outbound::Result(ConsensusResultMessage {
            m,
            latency_ms: 0,
            value: decision,
        }));
    }

    /// A consensus message from another general, mid-recursion.
    fn handle_consensus(&mut self, msg: ConsensusMessage<V>) {
        if self.round.is_none() {
            warn!(node = %self.id, chain = ?msg.chain, "consensus message outside an active round, dropping");
            return;
        }
        if self.round.as_ref().is_some_and(|r| r.emitted) {
            warn!(node = %self.id, chain = ?msg.chain, "late consensus message after result already emitted, dropping");
            return;
        }

        if self.try_consume_awaiting(&msg.chain) {
            self.deliver_value(msg.chain, msg.value);
        } else if let Some(round) = &mut self.round {
            round.pending.push(msg);
        }
    }

    /// Any entry whose deadline has passed is treated exactly as if
    /// `default_value` had arrived along its expected chain.
    fn reap_timeouts(&mut self) {
        let now = self.clock.now_ms();
        let expired: Vec<Chain> = match &mut self.round {
            Some(round) => {
                let mut expired = Vec::new();
                round.awaiting.retain(|entry| {
                    if entry.deadline_ms < now {
                        expired.push(entry.expected_chain.clone());
                        false
                    } else {
                        true
                    }
                });
                expired
            }
            None => Vec::new(),
        };
        for chain in expired {
            warn!(node = %self.id, ?chain, "awaiting entry timed out, substituting default value");
            let default = self.default_value.clone();
            self.deliver_value(chain, default);
        }
    }

    /// Messages that didn't match any awaiting entry when first received may
    /// match now that new entries have been added by later forwarding.
    fn rescan_pending(&mut self) {
        let pending = match &mut self.round {
            Some(round) => std::mem::take(&mut round.pending),
            None => return,
        };
        for msg in pending {
            if self.try_consume_awaiting(&msg.chain) {
                self.deliver_value(msg.chain, msg.value);
            } else if let Some(round) = &mut self.round {
                round.pending.push(msg);
            }
        }
    }

    fn try_consume_awaiting(&mut self, chain: &Chain) -> bool {
        if let Some(round) = &mut self.round {
            if let Some(pos) = round.awaiting.iter().position(|e| &e.expected_chain == chain) {
                round.awaiting.remove(pos);
                return true;
            }
        }
        false
    }

    /// Insert `value` at `chain` into the result tree, then either recurse
    /// (forward to every node not already in the chain) or, if the chain has
    /// reached its recursion bound, check whether the tree is complete and
    /// emit the round's result.
    fn deliver_value(&mut self, chain: Chain, value: V) {
        trace!(node = %self.id, ?chain, "delivering value into result tree");
        let m = self.active_m();
        let total_nodes = self.total_nodes;
        let id = self.id;

        let commander = match &self.round {
            Some(round) => round.commander,
            None => return,
        };

        if let Some(round) = &mut self.round {
            let tree = round
                .tree
                .get_or_insert_with(|| ResultTree::new(m, total_nodes, commander, value.clone()));
            if let Err(err) = tree.insert(&chain, value.clone()) {
                warn!(node = %id, ?chain, %err, "protocol anomaly inserting into result tree, dropping");
                return;
            }
        }

        if chain.len() > m {
            self.maybe_emit_result(m);
            return;
        }

        let mut forwarded_chain = chain.clone();
        forwarded_chain.push(id);
        let now = self.clock.now_ms();
        let deadline = now + self.max_latency_ms;

        for peer in 0..total_nodes as u32 {
            let peer_id = NodeId(peer);
            if peer_id == id || chain.contains(&peer_id) {
                continue;
            }
            match ConsensusMessage::new(peer_id, value.clone(), forwarded_chain.clone()) {
                Ok(out_msg) => {
                    let _ = self.outbound.send(Outbound::Consensus(out_msg));
                }
                Err(err) => warn!(node = %id, %err, "failed to build forwarded consensus message"),
            }
            // `peer_id` received the same parent chain `chain` this node did,
            // so its own relay back carries `chain ++ [peer_id]` — not this
            // node's forwarded chain with `peer_id` appended on top of it.
            let mut expected = chain.clone();
            expected.push(peer_id);
            if let Some(round) = &mut self.round {
                round.awaiting.push(AwaitingEntry {
                    deadline_ms: deadline,
                    expected_chain: expected,
                });
            }
        }
    }

    fn maybe_emit_result(&mut self, m: usize) {
        let now = self.clock.now_ms();
        let ready = match &self.round {
            Some(round) => {
                !round.emitted && round.tree.as_ref().map(|t| t.is_complete()).unwrap_or(false)
            }
            None => false,
        };
        if !ready {
            return;
        }
        let default = self.default_value.clone();
        if let Some(round) = &mut self.round {
            round.emitted = true;
            let folded = round
                .tree
                .as_ref()
                .map(|t| t.fold(default))
                .expect("completeness check guarantees a populated tree");
            let latency_ms = now.saturating_sub(round.start_ms);
            debug!(node = %self.id, m, latency_ms, "emitting consensus result");
            let _ = self.outbound.send(Outbound::Result(ConsensusResultMessage {
                m,
                latency_ms,
                value: folded,
            }));
        }
    }
}
