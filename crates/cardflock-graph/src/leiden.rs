use std::collections::{HashMap, VecDeque};

use petgraph::visit::EdgeRef;

use crate::person::PersonGraph;

const GAIN_EPS: f64 = 1e-12;

#[derive(Debug, Clone, Copy)]
pub struct LeidenOptions {
    /// Resolution parameter. Higher values favor more, smaller communities.
    pub resolution: f64,
    /// Cap on aggregation passes; the loop normally converges much earlier.
    pub iterations: usize,
}

impl Default for LeidenOptions {
    fn default() -> Self {
        Self {
            resolution: 1.0,
            iterations: 300,
        }
    }
}

/// Leiden community detection maximizing weighted modularity: queue-based
/// local moving, greedy refinement within communities, then aggregation,
/// repeated until the partition stops compressing.
///
/// Nodes are processed in index order with lowest-community tie-breaks, so
/// the partition is deterministic for a given graph.
pub fn leiden_communities(graph: &PersonGraph, options: &LeidenOptions) -> Vec<Vec<u32>> {
    let persons: Vec<u32> = graph.persons().collect();
    let node_count = persons.len();
    if node_count == 0 {
        return Vec::new();
    }

    let mut level = Level::from_person_graph(graph);
    if level.two_m <= 0.0 {
        return persons.into_iter().map(|person| vec![person]).collect();
    }

    let gamma = options.resolution;
    // Aggregated node each original node currently belongs to.
    let mut home: Vec<usize> = (0..node_count).collect();
    let mut membership: Vec<usize> = (0..node_count).collect();

    for _ in 0..options.iterations.max(1) {
        local_move(&level, &mut membership, gamma);
        let refined = refine(&level, &membership, gamma);
        if distinct_count(&refined, level.len()) == level.len() {
            break;
        }
        let (next_level, node_map, parent) = aggregate(&level, &refined, &membership);
        for slot in home.iter_mut() {
            *slot = node_map[*slot];
        }
        level = next_level;
        membership = parent;
    }

    // Communities numbered by first appearance over original node order.
    let mut dense = vec![usize::MAX; level.len()];
    let mut communities: Vec<Vec<u32>> = Vec::new();
    for (node, &agg) in home.iter().enumerate() {
        let community = membership[agg];
        if dense[community] == usize::MAX {
            dense[community] = communities.len();
            communities.push(Vec::new());
        }
        communities[dense[community]].push(persons[node]);
    }
    communities
}

/// Flat adjacency view of one aggregation level. `strength[v]` includes
/// twice the self-loop weight; `two_m` is invariant across levels.
struct Level {
    adj: Vec<Vec<(usize, f64)>>,
    self_loop: Vec<f64>,
    strength: Vec<f64>,
    two_m: f64,
}

impl Level {
    fn len(&self) -> usize {
        self.adj.len()
    }

    fn from_person_graph(graph: &PersonGraph) -> Self {
        let inner = graph.graph();
        let node_count = inner.node_count();
        let mut adj = vec![Vec::new(); node_count];
        let mut strength = vec![0.0; node_count];
        for edge in inner.edge_references() {
            let a = edge.source().index();
            let b = edge.target().index();
            if a == b {
                continue;
            }
            let weight = *edge.weight();
            adj[a].push((b, weight));
            adj[b].push((a, weight));
            strength[a] += weight;
            strength[b] += weight;
        }
        for list in adj.iter_mut() {
            list.sort_unstable_by(|left, right| left.0.cmp(&right.0));
        }
        let two_m = strength.iter().sum();
        Self {
            adj,
            self_loop: vec![0.0; node_count],
            strength,
            two_m,
        }
    }
}

fn local_move(level: &Level, membership: &mut [usize], gamma: f64) -> bool {
    let node_count = level.len();
    let mut community_total = vec![0.0; node_count];
    for (node, &community) in membership.iter().enumerate() {
        community_total[community] += level.strength[node];
    }

    let mut queue: VecDeque<usize> = (0..node_count).collect();
    let mut queued = vec![true; node_count];
    let mut weight_to = vec![0.0; node_count];
    let mut touched: Vec<usize> = Vec::new();
    let mut moved_any = false;

    while let Some(node) = queue.pop_front() {
        queued[node] = false;
        for &(neighbor, weight) in &level.adj[node] {
            let community = membership[neighbor];
            if weight_to[community] == 0.0 {
                touched.push(community);
            }
            weight_to[community] += weight;
        }
        touched.sort_unstable();

        let current = membership[node];
        community_total[current] -= level.strength[node];

        let mut best = current;
        let mut best_gain = weight_to[current]
            - gamma * level.strength[node] * community_total[current] / level.two_m;
        for &community in &touched {
            if community == current {
                continue;
            }
            let gain = weight_to[community]
                - gamma * level.strength[node] * community_total[community] / level.two_m;
            if gain > best_gain + GAIN_EPS {
                best_gain = gain;
                best = community;
            }
        }

        community_total[best] += level.strength[node];
        membership[node] = best;
        if best != current {
            moved_any = true;
            for &(neighbor, _) in &level.adj[node] {
                if membership[neighbor] != best && !queued[neighbor] {
                    queued[neighbor] = true;
                    queue.push_back(neighbor);
                }
            }
        }

        for &community in &touched {
            weight_to[community] = 0.0;
        }
        touched.clear();
    }

    moved_any
}

/// Split each community into internally well-linked subcommunities: nodes
/// start as singletons and a still-singleton node greedily joins the best
/// positive-gain subcommunity inside its own community. The result refines
/// the input partition, which is what aggregation requires.
fn refine(level: &Level, membership: &[usize], gamma: f64) -> Vec<usize> {
    let node_count = level.len();
    let mut refined: Vec<usize> = (0..node_count).collect();
    let mut sub_total = level.strength.clone();
    let mut sub_size = vec![1usize; node_count];
    let mut weight_to = vec![0.0; node_count];
    let mut touched: Vec<usize> = Vec::new();

    for node in 0..node_count {
        if sub_size[refined[node]] > 1 {
            continue;
        }
        let parent = membership[node];
        for &(neighbor, weight) in &level.adj[node] {
            if membership[neighbor] != parent {
                continue;
            }
            let sub = refined[neighbor];
            if sub == refined[node] {
                continue;
            }
            if weight_to[sub] == 0.0 {
                touched.push(sub);
            }
            weight_to[sub] += weight;
        }
        touched.sort_unstable();

        let own = refined[node];
        sub_total[own] -= level.strength[node];
        let mut best = own;
        let mut best_gain = 0.0;
        for &sub in &touched {
            let gain =
                weight_to[sub] - gamma * level.strength[node] * sub_total[sub] / level.two_m;
            if gain > best_gain + GAIN_EPS {
                best_gain = gain;
                best = sub;
            }
        }
        sub_total[best] += level.strength[node];
        if best != own {
            refined[node] = best;
            sub_size[best] += 1;
            sub_size[own] -= 1;
        }

        for &sub in &touched {
            weight_to[sub] = 0.0;
        }
        touched.clear();
    }

    refined
}

fn aggregate(
    level: &Level,
    refined: &[usize],
    membership: &[usize],
) -> (Level, Vec<usize>, Vec<usize>) {
    let node_count = level.len();

    // Dense aggregated-node ids by first appearance in node order.
    let mut dense = vec![usize::MAX; node_count];
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for node in 0..node_count {
        let sub = refined[node];
        if dense[sub] == usize::MAX {
            dense[sub] = groups.len();
            groups.push(Vec::new());
        }
        groups[dense[sub]].push(node);
    }
    let group_count = groups.len();
    let node_map: Vec<usize> = (0..node_count).map(|node| dense[refined[node]]).collect();

    let mut self_loop = vec![0.0; group_count];
    let mut neighbor_weights: Vec<HashMap<usize, f64>> = vec![HashMap::new(); group_count];
    for (agg, group) in groups.iter().enumerate() {
        for &node in group {
            self_loop[agg] += level.self_loop[node];
            for &(neighbor, weight) in &level.adj[node] {
                let other = node_map[neighbor];
                if other == agg {
                    // Internal edge, counted once from its lower endpoint.
                    if neighbor > node {
                        self_loop[agg] += weight;
                    }
                } else {
                    *neighbor_weights[agg].entry(other).or_insert(0.0) += weight;
                }
            }
        }
    }

    let mut adj = Vec::with_capacity(group_count);
    let mut strength = vec![0.0; group_count];
    for (agg, weights) in neighbor_weights.into_iter().enumerate() {
        let mut list: Vec<(usize, f64)> = weights.into_iter().collect();
        list.sort_unstable_by(|left, right| left.0.cmp(&right.0));
        strength[agg] = 2.0 * self_loop[agg] + list.iter().map(|(_, weight)| weight).sum::<f64>();
        adj.push(list);
    }

    // Parent community for each aggregated node, densely renumbered so the
    // next level's membership ids stay within bounds.
    let mut parent_dense = vec![usize::MAX; node_count];
    let mut next_parent = 0usize;
    let mut parent = vec![0usize; group_count];
    for (agg, group) in groups.iter().enumerate() {
        let raw = membership[group[0]];
        if parent_dense[raw] == usize::MAX {
            parent_dense[raw] = next_parent;
            next_parent += 1;
        }
        parent[agg] = parent_dense[raw];
    }

    (
        Level {
            adj,
            self_loop,
            strength,
            two_m: level.two_m,
        },
        node_map,
        parent,
    )
}

fn distinct_count(values: &[usize], bound: usize) -> usize {
    let mut seen = vec![false; bound];
    let mut count = 0;
    for &value in values {
        if !seen[value] {
            seen[value] = true;
            count += 1;
        }
    }
    count
}
