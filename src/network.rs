//! Network fabric: priority-queued delayed delivery plus fault
//! injection for designated Byzantine nodes.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{info, trace};

use crate::clock::{LatencyModel, SimClock};
use crate::node::NodeHandle;
use crate::types::{Chain, Corruptible, ConsensusMessage, ConsensusResultMessage, Inbound, Majority, NodeId, Outbound};

/// One item waiting in a destination's delayed-delivery queue, ordered so a
/// `BinaryHeap` pops the earliest `delivery_time` first, ties broken by
/// insertion order via the monotonic `seq` counter.
struct PendingItem<V> {
    delivery_time: u64,
    seq: u64,
    payload: ConsensusMessage<V>,
}

impl<V> PartialEq for PendingItem<V> {
    fn eq(&self, other: &Self) -> bool {
        self.delivery_time == other.delivery_time && self.seq == other.seq
    }
}
impl<V> Eq for PendingItem<V> {}

impl<V> PartialOrd for PendingItem<V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<V> Ord for PendingItem<V> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .delivery_time
            .cmp(&self.delivery_time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Outcome of one call to [`NetworkFabric::start_round_and_collect`].
pub struct RoundReport<V> {
    pub commander: NodeId,
    pub faulty_nodes: HashSet<NodeId>,
    pub results_by_node: HashMap<NodeId, ConsensusResultMessage<V>>,
}

/// Owns every node's channel endpoints and the per-destination delayed
/// delivery queues. Assumes `handles[i].id == NodeId(i)` (dense, in order),
/// an invariant established by the experiment driver at construction.
pub struct NetworkFabric<V> {
    handles: Vec<NodeHandle<V>>,
    total_nodes: usize,
    pending: Vec<BinaryHeap<PendingItem<V>>>,
    clock: Arc<SimClock>,
    latency: LatencyModel,
    percent_drop_message: f64,
    fabric_tick_ms: f64,
    rng: StdRng,
    current_faulty: HashSet<NodeId>,
    faulty_count: usize,
    seq_counter: u64,
}

impl<V: Majority + Corruptible> NetworkFabric<V> {
    pub fn new(
        handles: Vec<NodeHandle<V>>,
        clock: Arc<SimClock>,
        latency: LatencyModel,
        percent_drop_message: f64,
        fabric_tick_ms: f64,
        seed: u64,
    ) -> Self {
        let total_nodes = handles.len();
        Self {
            handles,
            total_nodes,
            pending: (0..total_nodes).map(|_| BinaryHeap::new()).collect(),
            clock,
            latency,
            percent_drop_message,
            fabric_tick_ms,
            rng: StdRng::seed_from_u64(seed),
            current_faulty: HashSet::new(),
            faulty_count: 0,
            seq_counter: 0,
        }
    }

    /// Set the faulty-node count the scenario tape wants in effect starting
    /// this round; the concrete set of faulty nodes is resampled every round
    /// regardless of whether this count changed.
    pub fn set_faulty_count(&mut self, count: usize) {
        self.faulty_count = count.min(self.total_nodes);
    }

    fn resample_faulty_nodes(&mut self) {
        let mut ids: Vec<NodeId> = (0..self.total_nodes as u32).map(NodeId).collect();
        ids.shuffle(&mut self.rng);
        self.current_faulty = ids.into_iter().take(self.faulty_count).collect();
        info!(faulty = ?self.current_faulty, "resampled faulty node set for round");
    }

    /// Broadcast a new set of tolerated `m` values to every node, per the
    /// MAB's period-boundary decision.
    pub async fn broadcast_m_values(&mut self, m_values: Vec<usize>) {
        for handle in &self.handles {
            let _ = handle.inbound_tx.send(Inbound::SetMValues(m_values.clone()));
        }
        tokio::task::yield_now().await;
    }

    /// Broadcast shutdown to every node. The driver is responsible for
    /// awaiting each node's task join handle afterward.
    pub fn shutdown(&self) {
        for handle in &self.handles {
            let _ = handle.inbound_tx.send(Inbound::Shutdown);
        }
    }

    /// Run one full consensus round to completion: select a commander,
    /// resample the faulty set, deliver `true_value`, and collect every
    /// node's final decision.
    pub async fn start_round_and_collect(&mut self, true_value: V) -> RoundReport<V> {
        self.resample_faulty_nodes();
        let commander = NodeId(self.rng.gen_range(0..self.total_nodes as u32));

        for handle in &self.handles {
            if handle.id != commander {
                let _ = handle.inbound_tx.send(Inbound::ConsensusStart { commander });
            }
        }
        tokio::task::yield_now().await;

        if let Some(commander_handle) = self.handles.iter().find(|h| h.id == commander) {
            let _ = commander_handle
                .inbound_tx
                .send(Inbound::TriggerCommander { decision: true_value });
        }

        let mut results_by_node: HashMap<NodeId, ConsensusResultMessage<V>> = HashMap::new();
        while results_by_node.len() < self.total_nodes {
            self.drain_outbound(&mut results_by_node);
            self.deliver_ready();
            if results_by_node.len() < self.total_nodes {
                self.tick().await;
            }
        }

        RoundReport {
            commander,
            faulty_nodes: self.current_faulty.clone(),
            results_by_node,
        }
    }

    async fn tick(&self) {
        if self.fabric_tick_ms > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(self.fabric_tick_ms / 1000.0)).await;
        } else {
            tokio::task::yield_now().await;
        }
    }

    fn drain_outbound(&mut self, results: &mut HashMap<NodeId, ConsensusResultMessage<V>>) {
        for i in 0..self.handles.len() {
            loop {
                let received = self.handles[i].outbound_rx.try_recv();
                match received {
                    Ok(Outbound::Consensus(msg)) => {
                        let sender = self.handles[i].id;
                        self.enqueue_delayed(msg, sender);
                    }
                    Ok(Outbound::Result(r)) => {
                        let sender = self.handles[i].id;
                        results.insert(sender, r);
                    }
                    Ok(Outbound::DistributedResult(_)) => {
                        // Decentralized variant stub; the current node actor
                        // never emits this.
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }
        }
    }

    /// Deep-copies the payload, possibly corrupts or drops it if the sender
    /// is currently faulty, then schedules delivery after a sampled delay.
    fn enqueue_delayed(&mut self, msg: ConsensusMessage<V>, sender: NodeId) {
        let ConsensusMessage { dest, value, chain, .. }: ConsensusMessage<V> = msg;
        let mut payload = value;

        if self.current_faulty.contains(&sender) {
            if self.rng.gen::<f64>() < self.percent_drop_message {
                trace!(%sender, %dest, "faulty sender's message dropped");
                return;
            }
            payload = V::random_value(&mut self.rng);
            trace!(%sender, %dest, "faulty sender's message corrupted");
        }

        let now = self.clock.now_ms();
        let delay = self.latency.sample(&mut self.rng);
        self.seq_counter += 1;

        let dest_idx = dest.as_u32() as usize;
        self.pending[dest_idx].push(PendingItem {
            delivery_time: now + delay,
            seq: self.seq_counter,
            payload: ConsensusMessage {
                source: sender,
                dest,
                value: payload,
                chain: rebuild_chain(chain, sender),
            },
        });
    }

    fn deliver_ready(&mut self) {
        let now = self.clock.now_ms();
        for idx in 0..self.pending.len() {
            while matches!(self.pending[idx].peek(), Some(item) if item.delivery_time <= now) {
                if let Some(item) = self.pending[idx].pop() {
                    let _ = self.handles[idx]
                        .inbound_tx
                        .send(Inbound::Consensus(item.payload));
                }
            }
        }
    }
}

/// The chain already ends with `sender` (a node only emits a message whose
/// chain's last entry is itself); this is a defensive no-op pass-through
/// kept as a seam so corruption/relabeling of the chain itself could be
/// introduced here without touching call sites.
fn rebuild_chain(chain: Chain, _sender: NodeId) -> Chain {
    chain
}
