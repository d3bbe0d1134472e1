// src/dag/graph.rs

//! Directed graph with sentinel anchors and cycle-detecting ordering.
//!
//! Edges are stored symmetrically in two adjacency maps (successors and
//! predecessors); every insertion and removal touches both sides. Two
//! sentinel nodes anchor the structure: a node with no real predecessors
//! hangs off [`Node::Leftmost`], a node with no real successors points at
//! [`Node::Rightmost`], so every added node is always reachable from the
//! left sentinel. A fresh graph holds the single edge
//! `Leftmost -> Rightmost`.
//!
//! Empty adjacency sets are deleted eagerly; "has no remaining incoming
//! edge" is therefore just a key-absence check, which is what the
//! frontier logic in Kahn's algorithm relies on.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

use crate::errors::GraphError;

/// Graph node: a real value or one of the two sentinel anchors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Node<N> {
    /// Sentinel predecessor of nodes without real predecessors.
    Leftmost,
    /// Sentinel successor of nodes without real successors.
    Rightmost,
    /// A real node.
    Value(N),
}

/// Neighbor sets of a node, sentinels excluded.
#[derive(Debug, Clone)]
pub struct Neighbors<N> {
    pub predecessors: HashSet<N>,
    pub successors: HashSet<N>,
}

/// Directed graph over arbitrary value-identity nodes.
///
/// `Clone` is the structural shallow copy: adjacency is duplicated, node
/// values are cloned (cheap for the ref types used as graph nodes).
#[derive(Debug, Clone)]
pub struct DirectedGraph<N> {
    succ: HashMap<Node<N>, HashSet<Node<N>>>,
    pred: HashMap<Node<N>, HashSet<Node<N>>>,
}

impl<N> DirectedGraph<N>
where
    N: Clone + Eq + Hash + fmt::Debug,
{
    pub fn new() -> Self {
        let mut graph = Self {
            succ: HashMap::new(),
            pred: HashMap::new(),
        };
        graph.insert_raw(Node::Leftmost, Node::Rightmost);
        graph
    }

    fn insert_raw(&mut self, from: Node<N>, to: Node<N>) {
        self.succ.entry(from.clone()).or_default().insert(to.clone());
        self.pred.entry(to).or_default().insert(from);
    }

    fn remove_raw(&mut self, from: &Node<N>, to: &Node<N>) {
        if let Some(set) = self.succ.get_mut(from) {
            set.remove(to);
            if set.is_empty() {
                self.succ.remove(from);
            }
        }
        if let Some(set) = self.pred.get_mut(to) {
            set.remove(from);
            if set.is_empty() {
                self.pred.remove(to);
            }
        }
    }

    /// Add an isolated node, anchored to both sentinels. Idempotent.
    pub fn add_node(&mut self, node: N) {
        if self.has(&node) {
            return;
        }
        let node = Node::Value(node);
        self.insert_raw(Node::Leftmost, node.clone());
        self.insert_raw(node, Node::Rightmost);
    }

    /// Add the directed edge `parent -> child`, anchoring fresh endpoints
    /// and removing the sentinel anchors the new edge makes redundant.
    pub fn add_edge(&mut self, parent: N, child: N) {
        let parent = Node::Value(parent);
        let child = Node::Value(child);

        self.insert_raw(parent.clone(), child.clone());

        // Anchor endpoints that still lack an edge on their far side.
        if !self.pred.contains_key(&parent) {
            self.insert_raw(Node::Leftmost, parent.clone());
        }
        if !self.succ.contains_key(&child) {
            self.insert_raw(child.clone(), Node::Rightmost);
        }

        // The child now has a real predecessor and the parent a real
        // successor; their anchors on those sides are redundant.
        self.remove_raw(&Node::Leftmost, &child);
        self.remove_raw(&parent, &Node::Rightmost);
    }

    pub fn has(&self, node: &N) -> bool {
        let key = Node::Value(node.clone());
        self.succ.contains_key(&key) || self.pred.contains_key(&key)
    }

    /// True when no edges remain at all (sentinel edges included).
    pub fn is_empty(&self) -> bool {
        self.succ.is_empty() && self.pred.is_empty()
    }

    /// Neighbor sets of `node`, sentinels excluded.
    pub fn neighbors(&self, node: &N) -> Neighbors<N> {
        let key = Node::Value(node.clone());
        let collect = |set: Option<&HashSet<Node<N>>>| {
            set.map(|nodes| {
                nodes
                    .iter()
                    .filter_map(|n| match n {
                        Node::Value(v) => Some(v.clone()),
                        Node::Leftmost | Node::Rightmost => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
        };
        Neighbors {
            predecessors: collect(self.pred.get(&key)),
            successors: collect(self.succ.get(&key)),
        }
    }

    /// Remove and return one arbitrary remaining successor edge of
    /// `from`, deleting adjacency entries that become empty.
    pub fn pop_edge(&mut self, from: &Node<N>) -> Result<Node<N>, GraphError<N>> {
        let set = self.succ.get_mut(from).ok_or(GraphError::EmptyNode)?;
        let to = set.iter().next().cloned().ok_or(GraphError::EmptyNode)?;
        set.remove(&to);
        if set.is_empty() {
            self.succ.remove(from);
        }
        if let Some(back) = self.pred.get_mut(&to) {
            back.remove(from);
            if back.is_empty() {
                self.pred.remove(&to);
            }
        }
        Ok(to)
    }

    /// Lazily pop every remaining successor edge of `from`.
    pub fn drain_edges(&mut self, from: Node<N>) -> impl Iterator<Item = Node<N>> + '_ {
        std::iter::from_fn(move || self.pop_edge(&from).ok())
    }

    /// Topological order of every real node; pure (works on a clone).
    pub fn topological_order(&self) -> Result<Vec<N>, GraphError<N>> {
        self.clone().into_topological_order()
    }

    /// Topological order of every real node, consuming the graph.
    ///
    /// Kahn's algorithm: the frontier starts at the left sentinel; each
    /// popped node has its outgoing edges drained, and children whose
    /// last incoming edge was removed join the frontier. Real nodes are
    /// emitted in pop order; sentinels never appear in the output.
    /// Emission order between independent branches is unspecified.
    ///
    /// Edges remaining after the frontier is exhausted form one or more
    /// cycles: fails with [`GraphError::Cycle`] carrying the residual
    /// real edges, never a partial order.
    pub fn into_topological_order(mut self) -> Result<Vec<N>, GraphError<N>> {
        let mut frontier = vec![Node::<N>::Leftmost];
        let mut order = Vec::new();

        while let Some(node) = frontier.pop() {
            if let Node::Value(value) = &node {
                order.push(value.clone());
            }
            let children: Vec<Node<N>> = self.drain_edges(node).collect();
            for child in children {
                if !self.pred.contains_key(&child) {
                    frontier.push(child);
                }
            }
        }

        if !self.is_empty() {
            return Err(GraphError::Cycle {
                residual: self.residual_edges(),
            });
        }
        Ok(order)
    }

    /// Remaining real edges, for cycle diagnostics.
    fn residual_edges(&self) -> Vec<(N, N)> {
        let mut edges = Vec::new();
        for (from, tos) in &self.succ {
            let Node::Value(from) = from else { continue };
            for to in tos {
                if let Node::Value(to) = to {
                    edges.push((from.clone(), to.clone()));
                }
            }
        }
        edges
    }
}

impl<N> Default for DirectedGraph<N>
where
    N: Clone + Eq + Hash + fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}
