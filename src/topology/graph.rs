//! Connection graph.
//!
//! Records realized peer connections: an adjacency list keyed by the
//! initiating node's alias, the identity key learned for each peer, and the
//! edges in the order they were established.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// A directed proposal or realization of a peer connection; `source` dials `target`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    /// Returns true if both edges join the same unordered pair
    pub fn same_pair(&self, other: &Edge) -> bool {
        (self.source == other.source && self.target == other.target)
            || (self.source == other.target && self.target == other.source)
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.target)
    }
}

/// Realized topology of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionGraph {
    adjacency: BTreeMap<String, Vec<String>>,
    identities: BTreeMap<String, String>,
    edges: Vec<Edge>,
}

impl ConnectionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `a` and `b` are connected in either direction
    pub fn contains(&self, a: &str, b: &str) -> bool {
        let has = |from: &str, to: &str| {
            self.adjacency
                .get(from)
                .map_or(false, |peers| peers.iter().any(|p| p == to))
        };
        has(a, b) || has(b, a)
    }

    /// Records a completed handshake and the identity learned for its target.
    ///
    /// # Arguments
    /// * `edge` - The connection that was established
    /// * `target_identity` - Identity key reported by `edge.target`
    ///
    /// # Returns
    /// `false` without changing the graph if the edge is a self-loop or
    /// its pair is already connected
    pub fn record(&mut self, edge: Edge, target_identity: String) -> bool {
        if edge.source == edge.target || self.contains(&edge.source, &edge.target) {
            return false;
        }
        self.adjacency
            .entry(edge.source.clone())
            .or_default()
            .push(edge.target.clone());
        self.identities.insert(edge.target.clone(), target_identity);
        self.edges.push(edge);
        true
    }

    /// Peers that `alias` dialed, in connection order
    pub fn peers(&self, alias: &str) -> &[String] {
        self.adjacency.get(alias).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn out_degree(&self, alias: &str) -> usize {
        self.peers(alias).len()
    }

    /// Identity key learned for `alias` while connecting to it
    pub fn identity(&self, alias: &str) -> Option<&str> {
        self.identities.get(alias).map(String::as_str)
    }

    /// Realized edges in the order they were established
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}
