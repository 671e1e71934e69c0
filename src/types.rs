//! Core types for the OM(m) consensus protocol: node identifiers, the
//! commander chain, wire messages, and the value/majority abstraction.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ConsensusError, Result};

/// Dense integer identifier for a node, in `[0, N)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

/// Ordered sequence of distinct node ids recording the path of commanders
/// that led to a given OM sub-invocation. Length 1 means the message came
/// directly from the original commander.
pub type Chain = Vec<NodeId>;

/// A value totally ordered enough to have a majority function and a
/// tie-breaker default. The current model only ever instantiates this with
/// `bool` (non-boolean consensus values are out of scope), but the trait is
/// kept generic so the tree/fold machinery doesn't need to know about
/// booleans specifically.
pub trait ConsensusValue: Clone + PartialEq + Eq + fmt::Debug + Send + Sync + 'static {}

impl ConsensusValue for bool {}

/// Strict-majority-with-tie-breaker reduction over a set of values.
pub trait Majority: ConsensusValue {
    /// Fold a non-empty slice of values (a node's own value followed by its
    /// children's folded values) into a single majority value, falling back
    /// to `default` on a tie.
    fn majority(values: &[Self], default: Self) -> Self;
}

impl Majority for bool {
    fn majority(values: &[Self], default: Self) -> Self {
        let trues = values.iter().filter(|v| **v).count();
        let falses = values.len() - trues;
        match trues.cmp(&falses) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => default,
        }
    }
}

/// A value the fabric knows how to corrupt in place of a faulty sender's
/// real payload: for booleans, corruption flips to a fresh uniform random
/// bit.
pub trait Corruptible: ConsensusValue {
    /// Draw a fresh, uniformly random replacement value.
    fn random_value(rng: &mut impl Rng) -> Self;
}

impl Corruptible for bool {
    fn random_value(rng: &mut impl rand::Rng) -> Self {
        rng.gen::<bool>()
    }
}

/// Message passed from general to general in the OM(m) recursion.
///
/// Invariant: `chain` contains distinct node ids, `chain.len() <= m + 1`,
/// and `source == *chain.last().unwrap()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusMessage<V> {
    pub source: NodeId,
    pub dest: NodeId,
    pub value: V,
    pub chain: Chain,
}

impl<V: ConsensusValue> ConsensusMessage<V> {
    /// Construct a message, validating the chain/source invariant.
    pub fn new(dest: NodeId, value: V, chain: Chain) -> Result<Self> {
        let mut seen = std::collections::HashSet::with_capacity(chain.len());
        for id in &chain {
            if !seen.insert(*id) {
                return Err(ConsensusError::ProtocolAnomaly(format!(
                    "commander chain contains duplicate id {id}"
                )));
            }
        }
        let source = *chain.last().ok_or_else(|| {
            ConsensusError::ProtocolAnomaly("commander chain must not be empty".to_string())
        })?;
        Ok(Self {
            source,
            dest,
            value,
            chain,
        })
    }
}

/// Result of a node's OM(m) run for a single m-value, emitted to the fabric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResultMessage<V> {
    pub m: usize,
    pub latency_ms: u64,
    pub value: V,
}

/// One outstanding "expect a message along this chain by this deadline"
/// entry. A timed-out entry is processed identically to a message received
/// carrying the node's configured default value.
#[derive(Debug, Clone, PartialEq)]
pub struct AwaitingEntry {
    pub deadline_ms: u64,
    pub expected_chain: Chain,
}

/// Messages the fabric delivers to a node's inbound queue.
#[derive(Debug, Clone)]
pub enum Inbound<V> {
    /// Stop the actor loop.
    Shutdown,
    /// Replace the set of m-values this node should evaluate per round.
    SetMValues(Vec<usize>),
    /// Begin a non-commander round: `commander` is who will send the value.
    ConsensusStart { commander: NodeId },
    /// Begin as commander: send `decision` to every other node.
    TriggerCommander { decision: V },
    /// An OM(m) recursion message from another general.
    Consensus(ConsensusMessage<V>),
}

/// Messages a node sends to the fabric.
#[derive(Debug, Clone)]
pub enum Outbound<V> {
    /// An OM(m) recursion message destined for another general.
    Consensus(ConsensusMessage<V>),
    /// This node's final decision for the currently active m-value.
    Result(ConsensusResultMessage<V>),
    /// This node's final decisions across every m-value it evaluated this
    /// round (decentralized-MAB path).
    DistributedResult(Vec<ConsensusResultMessage<V>>),
}
