//! The per-node result tree: accumulates values received along every
//! commander chain during one OM(m) run and folds them bottom-up into the
//! node's final decision.

use std::collections::HashMap;

use crate::error::{ConsensusError, Result};
use crate::types::{Chain, Majority, NodeId};

#[derive(Debug, Clone)]
struct TreeNode<V> {
    chain: Chain,
    value: Option<V>,
    children: HashMap<NodeId, TreeNode<V>>,
}

impl<V> TreeNode<V> {
    fn empty(chain: Chain) -> Self {
        Self {
            chain,
            value: None,
            children: HashMap::new(),
        }
    }
}

/// Accumulates the values a node observes along every commander chain of an
/// OM(m) run, and folds them into a single decision once the tree reaches
/// its expected shape.
///
/// `m` and `total_nodes` determine the expected branching factor at each
/// depth: a node whose chain has length `l` forwards to every node not in
/// that chain and not itself when `l <= m`, so it expects `total_nodes - l
/// - 1` children; once `l > m` it is a leaf and expects none.
#[derive(Debug, Clone)]
pub struct ResultTree<V> {
    m: usize,
    total_nodes: usize,
    root: TreeNode<V>,
}

impl<V: Majority> ResultTree<V> {
    /// Start a new tree for the value this node received directly from the
    /// commander (chain length 1).
    pub fn new(m: usize, total_nodes: usize, commander: NodeId, value: V) -> Self {
        Self {
            m,
            total_nodes,
            root: TreeNode {
                chain: vec![commander],
                value: Some(value),
                children: HashMap::new(),
            },
        }
    }

    /// Record a value received along `chain`. `chain[0]` must match the
    /// root's commander; `chain[1..]` is the path of relays leading to this
    /// value. Every ancestor up to (but not including) the final entry must
    /// already exist in the tree — it errors otherwise, since a missing
    /// ancestor means a message arrived for a chain this node never expected
    /// (a protocol bug or delivery past an already-timed-out entry). Only
    /// the leaf named by `chain`'s last entry may be newly created.
    pub fn insert(&mut self, chain: &Chain, value: V) -> Result<()> {
        debug_assert!(!chain.is_empty());
        debug_assert_eq!(chain[0], self.root.chain[0]);
        let mut node = &mut self.root;
        let mut prefix = vec![chain[0]];
        let rest = &chain[1..];
        for (i, id) in rest.iter().enumerate() {
            prefix.push(*id);
            if i + 1 == rest.len() {
                node = node
                    .children
                    .entry(*id)
                    .or_insert_with(|| TreeNode::empty(prefix.clone()));
            } else {
                node = node.children.get_mut(id).ok_or_else(|| {
                    ConsensusError::ProtocolAnomaly(format!(
                        "missing ancestor {id} while inserting chain {chain:?}"
                    ))
                })?;
            }
        }
        node.value = Some(value);
        Ok(())
    }

    /// The shortest fully-populated branch depth, counted in tree levels
    /// (root = depth 1). Used to detect that a branch has either reached
    /// its natural leaf depth (chain length > m) or is still missing
    /// expected children.
    pub fn min_branch_depth(&self) -> usize {
        Self::branch_depth(&self.root, self.m, self.total_nodes)
    }

    fn branch_depth(node: &TreeNode<V>, m: usize, total_nodes: usize) -> usize {
        let expected = Self::expected_children(node.chain.len(), m, total_nodes);
        if expected == 0 || node.children.is_empty() {
            return 1;
        }
        1 + node
            .children
            .values()
            .map(|c| Self::branch_depth(c, m, total_nodes))
            .min()
            .unwrap_or(0)
    }

    /// The expected-children set is "all nodes minus ancestor chain minus
    /// self" (spec §4.1): `chain_len` ancestors plus the receiving node
    /// itself are excluded, so `total_nodes - chain_len - 1`.
    fn expected_children(chain_len: usize, m: usize, total_nodes: usize) -> usize {
        if chain_len <= m {
            total_nodes.saturating_sub(chain_len + 1)
        } else {
            0
        }
    }

    /// True once every branch has either hit its natural leaf depth or has
    /// exactly as many (complete) children as expected, and every visited
    /// node carries a value.
    pub fn is_complete(&self) -> bool {
        Self::node_complete(&self.root, self.m, self.total_nodes)
    }

    fn node_complete(node: &TreeNode<V>, m: usize, total_nodes: usize) -> bool {
        if node.value.is_none() {
            return false;
        }
        let expected = Self::expected_children(node.chain.len(), m, total_nodes);
        if expected == 0 {
            return true;
        }
        node.children.len() == expected
            && node
                .children
                .values()
                .all(|c| Self::node_complete(c, m, total_nodes))
    }

    /// Bottom-up majority fold: a node's folded value is the majority of its
    /// own received value and the folded values of all its children,
    /// breaking ties with `default`.
    pub fn fold(&self, default: V) -> V {
        Self::fold_node(&self.root, &default)
    }

    fn fold_node(node: &TreeNode<V>, default: &V) -> V {
        let own = node.value.clone().unwrap_or_else(|| default.clone());
        if node.children.is_empty() {
            return own;
        }
        let mut values = Vec::with_capacity(node.children.len() + 1);
        values.push(own);
        for child in node.children.values() {
            values.push(Self::fold_node(child, default));
        }
        V::majority(&values, default.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn om0_tree_is_complete_immediately() {
        let tree: ResultTree<bool> = ResultTree::new(0, 4, NodeId(0), true);
        assert!(tree.is_complete());
        assert_eq!(tree.min_branch_depth(), 1);
        assert_eq!(tree.fold(false), true);
    }

    #[test]
    fn om1_tree_requires_all_relay_children() {
        // N=4, commander=0; the tree's owning node is implicitly one of
        // {1,2,3} (never a key in the tree), so exactly the other two of
        // {1,2,3} are expected children.
        let mut tree: ResultTree<bool> = ResultTree::new(1, 4, NodeId(0), true);
        assert!(!tree.is_complete());
        tree.insert(&vec![NodeId(0), NodeId(2)], true).unwrap();
        assert!(!tree.is_complete());
        tree.insert(&vec![NodeId(0), NodeId(3)], false).unwrap();
        assert!(tree.is_complete());
        assert_eq!(tree.min_branch_depth(), 2);
        assert_eq!(tree.fold(false), true);
    }

    #[test]
    fn insert_errors_on_missing_ancestor() {
        let mut tree: ResultTree<bool> = ResultTree::new(1, 5, NodeId(0), true);
        // Chain [0, 2, 3] requires the [0, 2] node to already exist.
        assert!(tree.insert(&vec![NodeId(0), NodeId(2), NodeId(3)], true).is_err());
    }

    #[test]
    fn majority_tie_falls_back_to_default() {
        // N=3, commander=0; owning node is implicitly node 1, leaving node 2
        // as the sole expected child.
        let mut tree: ResultTree<bool> = ResultTree::new(1, 3, NodeId(0), true);
        tree.insert(&vec![NodeId(0), NodeId(2)], false).unwrap();
        assert!(tree.is_complete());
        assert_eq!(tree.fold(true), true);
        assert_eq!(tree.fold(false), false);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    // Re-inserting a chain with the value it already holds must not
    // change the tree's fold, for an arbitrary commander value and set of
    // relay votes.
    proptest! {
        #[test]
        fn reinserting_same_value_does_not_change_fold(
            commander_value: bool,
            votes in proptest::collection::vec(any::<bool>(), 0..3),
            default: bool,
        ) {
            let mut tree: ResultTree<bool> = ResultTree::new(1, votes.len() + 1, NodeId(0), commander_value);
            for (i, v) in votes.iter().enumerate() {
                tree.insert(&vec![NodeId(0), NodeId((i + 1) as u32)], *v).unwrap();
            }
            let before = tree.fold(default);
            for (i, v) in votes.iter().enumerate() {
                tree.insert(&vec![NodeId(0), NodeId((i + 1) as u32)], *v).unwrap();
            }
            let after = tree.fold(default);
            prop_assert_eq!(before, after);
        }
    }
}
