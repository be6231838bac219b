use cardflock_config::DetectionParams;
use cardflock_graph::{TripartiteGraph, Vertex, VertexKind};

const MAX_PRUNE_ROUNDS: usize = 10;

/// A community that survived tripartite pruning, with its remaining
/// institutions and dates and the induced-G2 degree means.
#[derive(Debug, Clone)]
pub struct Cohort {
    pub persons: Vec<u32>,
    pub orgs: Vec<u32>,
    pub dates: Vec<u32>,
    pub size: usize,
    /// Mean induced degree of date vertices.
    pub degree1: f64,
    /// Mean induced degree of institution vertices.
    pub degree2: f64,
    /// Mean induced degree of person vertices.
    pub degree3: f64,
}

/// Induce G2 on a community plus its institution/date neighborhood, then
/// iteratively shed weak vertices: persons active on too few dates, then
/// institutions and dates touched by too few of the remaining persons. The
/// floors tighten with every round, and pruning only removes vertices, so a
/// fixed point is reached within `MAX_PRUNE_ROUNDS`.
pub fn prune_community(
    graph2: &TripartiteGraph,
    persons: &[u32],
    params: &DetectionParams,
) -> Option<Cohort> {
    let mut keep: Vec<Vertex> = persons.iter().map(|&person| Vertex::person(person)).collect();
    for &person in persons {
        keep.extend(graph2.neighbors(Vertex::person(person)));
    }
    let mut sub = graph2.induce(keep);

    if !passes_gate(&sub, params) {
        return None;
    }

    for round in 1..=MAX_PRUNE_ROUNDS {
        let before = sub.vertex_count();

        let date_count = sub.count_kind(VertexKind::Date) as f64;
        let date_floor = f64::max(f64::from(params.min_count), 0.05 * round as f64 * date_count);
        for person in sub.vertices_of_kind(VertexKind::Person) {
            if (sub.kind_neighbor_count(person, VertexKind::Date) as f64) < date_floor {
                sub.remove(person);
            }
        }

        let person_count = sub.count_kind(VertexKind::Person) as f64;
        let degree_floor = f64::max(2.0, 0.05 * round as f64 * person_count);
        for kind in [VertexKind::Org, VertexKind::Date] {
            for vertex in sub.vertices_of_kind(kind) {
                if (sub.degree(vertex) as f64) < degree_floor {
                    sub.remove(vertex);
                }
            }
        }

        if sub.vertex_count() == before {
            break;
        }
    }

    if !passes_gate(&sub, params) {
        return None;
    }

    let persons_kept = kind_ids(&sub, VertexKind::Person);
    Some(Cohort {
        size: persons_kept.len(),
        degree1: sub.mean_degree_of_kind(VertexKind::Date),
        degree2: sub.mean_degree_of_kind(VertexKind::Org),
        degree3: sub.mean_degree_of_kind(VertexKind::Person),
        orgs: kind_ids(&sub, VertexKind::Org),
        dates: kind_ids(&sub, VertexKind::Date),
        persons: persons_kept,
    })
}

fn passes_gate(sub: &TripartiteGraph, params: &DetectionParams) -> bool {
    sub.count_kind(VertexKind::Date) >= params.min_count as usize
        && sub.count_kind(VertexKind::Org) >= params.min_jg_num as usize
        && sub.count_kind(VertexKind::Person) >= params.min_size as usize
}

fn kind_ids(sub: &TripartiteGraph, kind: VertexKind) -> Vec<u32> {
    sub.vertices_of_kind(kind)
        .into_iter()
        .map(|vertex| vertex.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(min_count: u32, min_size: u32, min_jg_num: u32) -> DetectionParams {
        DetectionParams {
            min_count,
            min_size,
            min_jg_num,
            ..DetectionParams::default()
        }
    }

    /// Persons 0..5 all visit institutions 0 and 1 on dates 0, 1 and 2;
    /// person 5 shows up once only.
    fn cohesive_core_with_straggler() -> TripartiteGraph {
        let mut graph = TripartiteGraph::new();
        for person in 0..5 {
            for date in 0..3 {
                for org in 0..2 {
                    graph.bump_edge(Vertex::person(person), Vertex::org(org));
                    graph.bump_edge(Vertex::date(date), Vertex::person(person));
                }
            }
        }
        graph.bump_edge(Vertex::person(5), Vertex::org(0));
        graph.bump_edge(Vertex::date(0), Vertex::person(5));
        graph
    }

    #[test]
    fn straggler_is_pruned_and_core_survives() {
        let graph = cohesive_core_with_straggler();
        let cohort = prune_community(&graph, &[0, 1, 2, 3, 4, 5], &params(2, 3, 1))
            .expect("core survives");

        assert_eq!(cohort.persons, vec![0, 1, 2, 3, 4]);
        assert_eq!(cohort.orgs, vec![0, 1]);
        assert_eq!(cohort.dates, vec![0, 1, 2]);
        assert_eq!(cohort.size, 5);
        // Every date touches the five remaining persons; every institution
        // does too; every person touches two institutions and three dates.
        assert!((cohort.degree1 - 5.0).abs() < 1e-9);
        assert!((cohort.degree2 - 5.0).abs() < 1e-9);
        assert!((cohort.degree3 - 5.0).abs() < 1e-9);
    }

    #[test]
    fn initial_gate_rejects_thin_slices() {
        let graph = cohesive_core_with_straggler();
        // Fewer distinct institutions than required.
        assert!(prune_community(&graph, &[0, 1, 2, 3, 4], &params(2, 3, 3)).is_none());
        // Fewer distinct dates than required.
        assert!(prune_community(&graph, &[0, 1, 2, 3, 4], &params(4, 3, 1)).is_none());
        // Fewer persons than required.
        assert!(prune_community(&graph, &[0, 1], &params(2, 5, 1)).is_none());
    }

    #[test]
    fn gate_is_rechecked_after_pruning() {
        // Three persons, but only one is active on both dates; after the
        // weak two are shed the size gate fails.
        let mut graph = TripartiteGraph::new();
        for date in 0..2 {
            graph.bump_edge(Vertex::person(0), Vertex::org(0));
            graph.bump_edge(Vertex::date(date), Vertex::person(0));
        }
        graph.bump_edge(Vertex::person(1), Vertex::org(0));
        graph.bump_edge(Vertex::date(0), Vertex::person(1));
        graph.bump_edge(Vertex::person(2), Vertex::org(0));
        graph.bump_edge(Vertex::date(1), Vertex::person(2));

        assert!(prune_community(&graph, &[0, 1, 2], &params(2, 3, 1)).is_none());
    }

    #[test]
    fn pruning_only_sees_the_community_neighborhood() {
        let mut graph = cohesive_core_with_straggler();
        // A dense unrelated block sharing no vertices with the community.
        for person in 10..14 {
            for date in 10..13 {
                graph.bump_edge(Vertex::person(person), Vertex::org(10));
                graph.bump_edge(Vertex::date(date), Vertex::person(person));
            }
        }

        let cohort = prune_community(&graph, &[0, 1, 2, 3, 4], &params(2, 3, 1))
            .expect("core survives");
        assert_eq!(cohort.persons, vec![0, 1, 2, 3, 4]);
        assert!(!cohort.orgs.contains(&10));
        assert!(cohort.dates.iter().all(|&date| date < 3));
    }
}
