pub mod leiden;
pub mod person;
pub mod tripartite;

pub use leiden::{LeidenOptions, leiden_communities};
pub use person::PersonGraph;
pub use tripartite::{TripartiteGraph, Vertex, VertexKind};
