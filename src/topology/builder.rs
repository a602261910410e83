//! Randomized topology construction.
//!
//! Every node draws a target out-degree `d_v` uniformly from `[1, k]` and
//! then tries to place that many edges. Each attempt scans the node list
//! cyclically from a random offset and takes the first node that is not
//! `v` itself and not yet paired with `v` in either direction.
//!
//! An attempt makes at most `d_v + n` probes. When none of them finds an
//! acceptable target the attempt is abandoned without retry, so realized
//! degrees can fall short of the drawn ones as the graph fills up.

use log::debug;
use rand::Rng;
use std::collections::HashSet;

use super::graph::Edge;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("topology needs at least 2 nodes, got {0}")]
    TooFewNodes(usize),

    #[error("max connections per node must be at least 1")]
    ZeroMaxConnections,
}

/// Proposes candidate edges over a node set
#[derive(Debug, Clone, Copy)]
pub struct TopologyBuilder {
    max_connections: usize,
}

impl TopologyBuilder {
    pub fn new(max_connections: usize) -> Result<Self, TopologyError> {
        if max_connections == 0 {
            return Err(TopologyError::ZeroMaxConnections);
        }
        Ok(Self { max_connections })
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Number of candidates examined per desired edge of a node with degree `d_v`
    pub fn probe_bound(degree: usize, nodes: usize) -> usize {
        degree + nodes
    }

    /// Proposes an ordered list of edges for `aliases`.
    ///
    /// # Arguments
    /// * `aliases` - The node set, in registry order
    /// * `rng` - Random source; a seeded source makes the proposal reproducible
    ///
    /// # Returns
    /// Edges in proposal order: grouped by source node in registry order.
    /// No edge is a self-loop and no unordered pair appears twice.
    pub fn propose<R: Rng + ?Sized>(&self, aliases: &[String], rng: &mut R) -> Result<Vec<Edge>, TopologyError> {
        let n = aliases.len();
        if n < 2 {
            return Err(TopologyError::TooFewNodes(n));
        }

        let mut taken: HashSet<(usize, usize)> = HashSet::new();
        let mut edges = Vec::new();

        for v in 0..n {
            let degree = rng.gen_range(1..=self.max_connections);
            let bound = Self::probe_bound(degree, n);

            for _ in 0..degree {
                let offset = rng.gen_range(0..n);
                let target = (0..bound)
                    .map(|probe| (offset + probe) % n)
                    .find(|&t| t != v && !taken.contains(&pair(v, t)));

                match target {
                    Some(t) => {
                        taken.insert(pair(v, t));
                        edges.push(Edge::new(aliases[v].clone(), aliases[t].clone()));
                    }
                    None => debug!("No free peer for {} within {} probes, edge abandoned", aliases[v], bound),
                }
            }
        }

        Ok(edges)
    }
}

fn pair(a: usize, b: usize) -> (usize, usize) {
    (a.min(b), a.max(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashMap;

    fn aliases(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("node{}", i)).collect()
    }

    #[test]
    fn test_no_self_loops_or_duplicate_pairs() {
        for seed in 0..50 {
            for (n, k) in [(2, 1), (3, 2), (5, 4), (8, 3), (10, 9)] {
                let builder = TopologyBuilder::new(k).unwrap();
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                let edges = builder.propose(&aliases(n), &mut rng).unwrap();

                for (i, edge) in edges.iter().enumerate() {
                    assert_ne!(edge.source, edge.target, "self-loop with seed {}", seed);
                    for other in &edges[i + 1..] {
                        assert!(!edge.same_pair(other), "duplicate pair {} with seed {}", edge, seed);
                    }
                }
            }
        }
    }

    #[test]
    fn test_out_degree_bounded_by_max() {
        for seed in 0..50 {
            let k = 3;
            let builder = TopologyBuilder::new(k).unwrap();
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let edges = builder.propose(&aliases(12), &mut rng).unwrap();

            let mut degrees: HashMap<&str, usize> = HashMap::new();
            for edge in &edges {
                *degrees.entry(edge.source.as_str()).or_default() += 1;
            }
            assert!(degrees.values().all(|&d| d <= k), "degree above {} with seed {}", k, seed);
        }
    }

    #[test]
    fn test_three_nodes_single_connection_terminates() {
        let names: Vec<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        let builder = TopologyBuilder::new(1).unwrap();
        for seed in 0..100 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let edges = builder.propose(&names, &mut rng).unwrap();
            assert!(edges.len() <= 3);
        }
    }

    #[test]
    fn test_dense_request_saturates_complete_graph() {
        // Asking for far more edges than exist must still terminate
        let builder = TopologyBuilder::new(50).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let edges = builder.propose(&aliases(4), &mut rng).unwrap();
        assert!(edges.len() <= 6);
    }

    #[test]
    fn test_seeded_proposal_is_reproducible() {
        let builder = TopologyBuilder::new(3).unwrap();
        let a = builder.propose(&aliases(9), &mut ChaCha8Rng::seed_from_u64(1234)).unwrap();
        let b = builder.propose(&aliases(9), &mut ChaCha8Rng::seed_from_u64(1234)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_every_node_proposes_at_least_when_sparse() {
        // With n=2 and k=1 the first node always finds its peer
        let builder = TopologyBuilder::new(1).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let edges = builder.propose(&aliases(2), &mut rng).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0], Edge::new("node0", "node1"));
    }

    #[test]
    fn test_preconditions() {
        assert_eq!(TopologyBuilder::new(0).unwrap_err(), TopologyError::ZeroMaxConnections);
        let builder = TopologyBuilder::new(2).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(
            builder.propose(&aliases(1), &mut rng).unwrap_err(),
            TopologyError::TooFewNodes(1)
        );
        assert_eq!(TopologyBuilder::probe_bound(2, 5), 7);
    }
}
