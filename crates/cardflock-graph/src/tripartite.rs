use std::collections::HashMap;

use petgraph::stable_graph::{NodeIndex, StableUnGraph};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VertexKind {
    Person,
    Org,
    Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Vertex {
    pub kind: VertexKind,
    pub id: u32,
}

impl Vertex {
    pub fn person(id: u32) -> Self {
        Self {
            kind: VertexKind::Person,
            id,
        }
    }

    pub fn org(id: u32) -> Self {
        Self {
            kind: VertexKind::Org,
            id,
        }
    }

    pub fn date(id: u32) -> Self {
        Self {
            kind: VertexKind::Date,
            id,
        }
    }
}

/// Person / institution / date graph (G2). Edge weights count observations.
/// Invariant: edges only connect vertices of different kinds. Backed by a
/// stable graph because pruning removes vertices in place.
#[derive(Debug, Clone, Default)]
pub struct TripartiteGraph {
    graph: StableUnGraph<Vertex, u32>,
    index_of: HashMap<Vertex, NodeIndex>,
}

impl TripartiteGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(&mut self, vertex: Vertex) -> NodeIndex {
        if let Some(ix) = self.index_of.get(&vertex) {
            return *ix;
        }
        let ix = self.graph.add_node(vertex);
        self.index_of.insert(vertex, ix);
        ix
    }

    /// Increment the weight of `{a, b}`, creating vertices and the edge as
    /// needed.
    pub fn bump_edge(&mut self, a: Vertex, b: Vertex) {
        debug_assert!(a.kind != b.kind, "same-kind edges are not allowed");
        let ix_a = self.add_vertex(a);
        let ix_b = self.add_vertex(b);
        match self.graph.find_edge(ix_a, ix_b) {
            Some(edge) => {
                if let Some(weight) = self.graph.edge_weight_mut(edge) {
                    *weight += 1;
                }
            }
            None => {
                self.graph.add_edge(ix_a, ix_b, 1);
            }
        }
    }

    pub fn contains(&self, vertex: Vertex) -> bool {
        self.index_of.contains_key(&vertex)
    }

    pub fn vertex_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn count_kind(&self, kind: VertexKind) -> usize {
        self.graph
            .node_weights()
            .filter(|vertex| vertex.kind == kind)
            .count()
    }

    /// Vertices of one kind, ascending by id.
    pub fn vertices_of_kind(&self, kind: VertexKind) -> Vec<Vertex> {
        let mut vertices: Vec<Vertex> = self
            .graph
            .node_weights()
            .filter(|vertex| vertex.kind == kind)
            .copied()
            .collect();
        vertices.sort_unstable();
        vertices
    }

    pub fn degree(&self, vertex: Vertex) -> usize {
        match self.index_of.get(&vertex) {
            Some(ix) => self.graph.neighbors(*ix).count(),
            None => 0,
        }
    }

    pub fn neighbors(&self, vertex: Vertex) -> Vec<Vertex> {
        let Some(ix) = self.index_of.get(&vertex) else {
            return Vec::new();
        };
        let mut neighbors: Vec<Vertex> = self
            .graph
            .neighbors(*ix)
            .map(|other| self.graph[other])
            .collect();
        neighbors.sort_unstable();
        neighbors
    }

    pub fn kind_neighbor_count(&self, vertex: Vertex, kind: VertexKind) -> usize {
        match self.index_of.get(&vertex) {
            Some(ix) => self
                .graph
                .neighbors(*ix)
                .filter(|other| self.graph[*other].kind == kind)
                .count(),
            None => 0,
        }
    }

    pub fn remove(&mut self, vertex: Vertex) -> bool {
        match self.index_of.remove(&vertex) {
            Some(ix) => {
                self.graph.remove_node(ix);
                true
            }
            None => false,
        }
    }

    /// Subgraph induced on the given vertices; edges among them keep their
    /// weights.
    pub fn induce(&self, vertices: impl IntoIterator<Item = Vertex>) -> TripartiteGraph {
        let mut sub = TripartiteGraph::new();
        let mut kept: Vec<Vertex> = vertices
            .into_iter()
            .filter(|vertex| self.contains(*vertex))
            .collect();
        kept.sort_unstable();
        kept.dedup();
        for vertex in &kept {
            sub.add_vertex(*vertex);
        }

        for vertex in &kept {
            let ix = self.index_of[vertex];
            for other_ix in self.graph.neighbors(ix) {
                let other = self.graph[other_ix];
                if !sub.contains(other) {
                    continue;
                }
                let sub_a = sub.index_of[vertex];
                let sub_b = sub.index_of[&other];
                if sub.graph.find_edge(sub_a, sub_b).is_some() {
                    continue;
                }
                if let Some(edge) = self.graph.find_edge(ix, other_ix)
                    && let Some(weight) = self.graph.edge_weight(edge)
                {
                    sub.graph.add_edge(sub_a, sub_b, *weight);
                }
            }
        }
        sub
    }

    pub fn mean_degree_of_kind(&self, kind: VertexKind) -> f64 {
        let vertices = self.vertices_of_kind(kind);
        if vertices.is_empty() {
            return 0.0;
        }
        let total: usize = vertices.iter().map(|vertex| self.degree(*vertex)).sum();
        total as f64 / vertices.len() as f64
    }
}
