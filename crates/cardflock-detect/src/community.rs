use cardflock_config::DetectionParams;
use cardflock_graph::{LeidenOptions, PersonGraph, leiden_communities};
use rayon::prelude::*;
use tracing::{debug, info, warn};

/// Recursion guard: community structure may not refine further (a near-clique
/// has none), so splitting stops here and leftovers are emitted unbroken.
const MAX_REFINE_LEVELS: usize = 10;
/// Oversize batch size above which inner Leiden runs go parallel.
const PARALLEL_SPLIT_MIN: usize = 20;
const LEIDEN_ITERATIONS: usize = 300;

#[derive(Debug, Clone)]
pub struct Community {
    pub persons: Vec<u32>,
    /// Set when the level cap left this community above `max_size`.
    pub oversize: bool,
}

/// Leiden over G1 at twice the configured resolution, then recursive
/// re-clustering of every community above `max_size` at the configured
/// resolution until all communities fit or the level cap fires. Communities
/// below `min_size` are dropped at every level.
pub fn detect_communities(graph: &PersonGraph, params: &DetectionParams) -> Vec<Community> {
    let min_size = params.min_size as usize;
    let max_size = params.max_size as usize;
    let outer = LeidenOptions {
        resolution: 2.0 * params.resolution_parameter,
        iterations: LEIDEN_ITERATIONS,
    };
    let inner = LeidenOptions {
        resolution: params.resolution_parameter,
        iterations: LEIDEN_ITERATIONS,
    };

    let coarse: Vec<Vec<u32>> = leiden_communities(graph, &outer)
        .into_iter()
        .filter(|community| community.len() >= min_size)
        .collect();
    let (mut big, mut ok): (Vec<Vec<u32>>, Vec<Vec<u32>>) = coarse
        .into_iter()
        .partition(|community| community.len() > max_size);
    info!(kept = ok.len(), oversize = big.len(), "coarse communities");

    let mut level = 0usize;
    while !big.is_empty() {
        if level >= MAX_REFINE_LEVELS {
            warn!(
                remaining = big.len(),
                "community refinement hit the level cap, emitting oversize communities unbroken"
            );
            return ok
                .into_iter()
                .map(|persons| Community {
                    persons,
                    oversize: false,
                })
                .chain(big.into_iter().map(|persons| Community {
                    persons,
                    oversize: true,
                }))
                .collect();
        }
        level += 1;

        let split: Vec<Vec<Vec<u32>>> = if params.n_jobs > 1 && big.len() > PARALLEL_SPLIT_MIN {
            let n_jobs = (params.n_jobs as usize).min(big.len() / PARALLEL_SPLIT_MIN);
            match rayon::ThreadPoolBuilder::new()
                .num_threads(n_jobs.max(1))
                .build()
            {
                Ok(pool) => pool.install(|| {
                    big.par_chunks(PARALLEL_SPLIT_MIN)
                        .flat_map_iter(|chunk| {
                            chunk
                                .iter()
                                .map(|community| split_community(graph, community, &inner, min_size))
                        })
                        .collect()
                }),
                Err(error) => {
                    warn!(%error, "thread pool unavailable, splitting communities sequentially");
                    big.iter()
                        .map(|community| split_community(graph, community, &inner, min_size))
                        .collect()
                }
            }
        } else {
            big.iter()
                .map(|community| split_community(graph, community, &inner, min_size))
                .collect()
        };

        big = Vec::new();
        for communities in split {
            for community in communities {
                if community.len() > max_size {
                    big.push(community);
                } else {
                    ok.push(community);
                }
            }
        }
        debug!(level, kept = ok.len(), oversize = big.len(), "refined communities");
    }

    ok.into_iter()
        .map(|persons| Community {
            persons,
            oversize: false,
        })
        .collect()
}

fn split_community(
    graph: &PersonGraph,
    persons: &[u32],
    options: &LeidenOptions,
    min_size: usize,
) -> Vec<Vec<u32>> {
    let induced = graph.induce(persons);
    leiden_communities(&induced, options)
        .into_iter()
        .filter(|community| community.len() >= min_size)
        .collect()
}
