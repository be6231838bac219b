use std::collections::HashMap;

use petgraph::algo::connected_components;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;

/// Weighted undirected person graph (G1). Vertices carry interned person ids
/// that survive induction, so communities map straight back to persons.
#[derive(Debug, Clone, Default)]
pub struct PersonGraph {
    graph: UnGraph<u32, f64>,
    index_of: HashMap<u32, NodeIndex>,
}

impl PersonGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_person(&mut self, person: u32) -> NodeIndex {
        if let Some(ix) = self.index_of.get(&person) {
            return *ix;
        }
        let ix = self.graph.add_node(person);
        self.index_of.insert(person, ix);
        ix
    }

    /// Insert the edge `{a, b}` with the given weight, creating missing
    /// vertices. Re-inserting an existing edge overwrites its weight.
    pub fn add_pair(&mut self, a: u32, b: u32, weight: f64) {
        let ix_a = self.add_person(a);
        let ix_b = self.add_person(b);
        self.graph.update_edge(ix_a, ix_b, weight);
    }

    pub fn person_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains(&self, person: u32) -> bool {
        self.index_of.contains_key(&person)
    }

    /// Person ids in vertex insertion order.
    pub fn persons(&self) -> impl Iterator<Item = u32> + '_ {
        self.graph.node_weights().copied()
    }

    /// Subgraph induced on the given persons (ids absent from the graph are
    /// ignored). Edge weights are preserved.
    pub fn induce(&self, persons: &[u32]) -> PersonGraph {
        let mut sub = PersonGraph::new();
        for &person in persons {
            if self.contains(person) {
                sub.add_person(person);
            }
        }
        for edge in self.graph.edge_references() {
            let a = self.graph[edge.source()];
            let b = self.graph[edge.target()];
            if sub.contains(a) && sub.contains(b) {
                sub.add_pair(a, b, *edge.weight());
            }
        }
        sub
    }

    pub fn is_connected(&self) -> bool {
        self.graph.node_count() <= 1 || connected_components(&self.graph) == 1
    }

    pub fn mean_degree(&self) -> f64 {
        if self.graph.node_count() == 0 {
            return 0.0;
        }
        2.0 * self.graph.edge_count() as f64 / self.graph.node_count() as f64
    }

    pub(crate) fn graph(&self) -> &UnGraph<u32, f64> {
        &self.graph
    }
}
