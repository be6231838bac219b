use cardflock_core::RiskPair;
use cardflock_graph::{PersonGraph, TripartiteGraph, Vertex};

use crate::frame::VisitFrame;

/// G1: one vertex per pair endpoint, edge weight = co-visit count.
pub fn build_person_graph(pairs: &[RiskPair]) -> PersonGraph {
    let mut graph = PersonGraph::new();
    for pair in pairs {
        graph.add_pair(pair.a, pair.b, f64::from(pair.jzcs));
    }
    graph
}

/// G2 over rows whose person is a G1 vertex: (person, institution) and
/// (date, person) edges weighted by observation count. Institutions and
/// dates only enter through observed rows, so G2 never links two vertices of
/// the same kind.
pub fn build_tripartite_graph(frame: &VisitFrame, graph1: &PersonGraph) -> TripartiteGraph {
    let mut graph = TripartiteGraph::new();
    for person in graph1.persons() {
        graph.add_vertex(Vertex::person(person));
    }
    for row in 0..frame.len() {
        let person = frame.person[row];
        if !graph1.contains(person) {
            continue;
        }
        graph.bump_edge(Vertex::person(person), Vertex::org(frame.org[row]));
        graph.bump_edge(Vertex::date(frame.date[row]), Vertex::person(person));
    }
    graph
}
