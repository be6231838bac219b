use std::collections::{HashMap, HashSet};

use cardflock_config::DetectionParams;
use cardflock_core::{MedType, RiskPair};
use rayon::prelude::*;

use crate::frame::VisitFrame;

/// Per-batch work budget: the person batch size is chosen so that one batch
/// joins on the order of this many row pairs in the worst case. Tunable.
const BATCH_WORK_BUDGET: f64 = 1e10;

type JoinKey = (MedType, u32, i64);

/// Mine co-visit risk pairs: persons that settled at the same institution
/// with the same visit class within `time_interval` seconds, aggregated to
/// `jzcs` (co-occurring row pairs) and `jg_num` (distinct institutions), then
/// thresholded. A zero threshold disables that filter.
///
/// The emitted pair set does not depend on batch partitioning or `n_jobs`.
pub fn mine_risk_pairs(frame: &VisitFrame, params: &DetectionParams) -> Vec<RiskPair> {
    let Some(prepared) = prepare_rows(frame, params) else {
        return Vec::new();
    };

    let row_count = prepared.rows.len() as f64;
    let batch_size =
        ((BATCH_WORK_BUDGET * prepared.persons.len() as f64) / (row_count * row_count)).floor()
            as usize;
    let batch_size = batch_size.clamp(1, prepared.persons.len());

    mine_prepared(frame, params, &prepared, batch_size)
}

struct PreparedRows {
    /// Frame rows whose person passed the visit-count floor.
    rows: Vec<u32>,
    /// Eligible person ids, ascending.
    persons: Vec<u32>,
}

fn prepare_rows(frame: &VisitFrame, params: &DetectionParams) -> Option<PreparedRows> {
    if frame.is_empty() {
        return None;
    }

    let mut visits_per_person = vec![0u32; frame.person_ids.len()];
    for &person in &frame.person {
        visits_per_person[person as usize] += 1;
    }

    let rows: Vec<u32> = (0..frame.len() as u32)
        .filter(|&row| visits_per_person[frame.person[row as usize] as usize] >= params.min_count)
        .collect();
    if rows.is_empty() {
        return None;
    }
    let persons: Vec<u32> = (0..frame.person_ids.len() as u32)
        .filter(|&person| visits_per_person[person as usize] >= params.min_count)
        .collect();

    Some(PreparedRows { rows, persons })
}

fn mine_prepared(
    frame: &VisitFrame,
    params: &DetectionParams,
    prepared: &PreparedRows,
    batch_size: usize,
) -> Vec<RiskPair> {
    let batches: Vec<&[u32]> = prepared.persons.chunks(batch_size.max(1)).collect();
    let n_jobs = (params.n_jobs.max(1) as usize).min(batches.len());

    let occurrences: Vec<Vec<(u32, u32, u32)>> = if n_jobs > 1 {
        match rayon::ThreadPoolBuilder::new().num_threads(n_jobs).build() {
            Ok(pool) => pool.install(|| {
                batches
                    .par_iter()
                    .map(|batch| mine_batch(frame, params, &prepared.rows, batch))
                    .collect()
            }),
            Err(error) => {
                tracing::warn!(%error, "thread pool unavailable, mining pairs sequentially");
                batches
                    .iter()
                    .map(|batch| mine_batch(frame, params, &prepared.rows, batch))
                    .collect()
            }
        }
    } else {
        batches
            .iter()
            .map(|batch| mine_batch(frame, params, &prepared.rows, batch))
            .collect()
    };

    aggregate_pairs(occurrences, params)
}

/// Join one person batch against the tail (rows of persons at or above the
/// batch's first id). Same-bucket matches join directly; the two shifted
/// passes catch pairs straddling a bucket boundary, which cannot duplicate a
/// same-bucket match.
fn mine_batch(
    frame: &VisitFrame,
    params: &DetectionParams,
    rows: &[u32],
    batch: &[u32],
) -> Vec<(u32, u32, u32)> {
    let Some(&batch_min) = batch.first() else {
        return Vec::new();
    };
    let batch_max = batch[batch.len() - 1];
    let interval = i64::from(params.time_interval.max(1));

    let mut tail: HashMap<JoinKey, Vec<u32>> = HashMap::new();
    for &row in rows {
        if frame.person[row as usize] < batch_min {
            continue;
        }
        let ix = row as usize;
        tail.entry((frame.med_type[ix], frame.org[ix], frame.time_win[ix]))
            .or_default()
            .push(row);
    }

    let mut occurrences = Vec::new();
    for &row in rows {
        let ix = row as usize;
        let person = frame.person[ix];
        // Eligible rows within the id range are exactly the batch's rows.
        if person < batch_min || person > batch_max {
            continue;
        }
        let org = frame.org[ix];
        let key = (frame.med_type[ix], org, frame.time_win[ix]);

        if let Some(matches) = tail.get(&key) {
            for &other in matches {
                let other_person = frame.person[other as usize];
                if person < other_person {
                    occurrences.push((person, other_person, org));
                }
            }
        }
        if let Some(matches) = tail.get(&(key.0, key.1, key.2 + 1)) {
            for &other in matches {
                let other_person = frame.person[other as usize];
                if person < other_person
                    && frame.epoch_seconds[other as usize] - frame.epoch_seconds[ix] < interval
                {
                    occurrences.push((person, other_person, org));
                }
            }
        }
        if let Some(matches) = tail.get(&(key.0, key.1, key.2 - 1)) {
            for &other in matches {
                let other_person = frame.person[other as usize];
                if person < other_person
                    && frame.epoch_seconds[ix] - frame.epoch_seconds[other as usize] < interval
                {
                    occurrences.push((person, other_person, org));
                }
            }
        }
    }
    occurrences
}

fn aggregate_pairs(
    occurrences: Vec<Vec<(u32, u32, u32)>>,
    params: &DetectionParams,
) -> Vec<RiskPair> {
    let mut stats: HashMap<(u32, u32), (u32, HashSet<u32>)> = HashMap::new();
    for batch in occurrences {
        for (a, b, org) in batch {
            let entry = stats.entry((a, b)).or_insert_with(|| (0, HashSet::new()));
            entry.0 += 1;
            entry.1.insert(org);
        }
    }

    let mut pairs: Vec<RiskPair> = stats
        .into_iter()
        .map(|((a, b), (jzcs, orgs))| RiskPair {
            a,
            b,
            jzcs,
            jg_num: orgs.len() as u32,
        })
        .filter(|pair| {
            (params.min_count == 0 || pair.jzcs >= params.min_count)
                && (params.min_jg_num == 0 || pair.jg_num >= params.min_jg_num)
        })
        .collect();
    pairs.sort_unstable_by(|left, right| (left.a, left.b).cmp(&(right.a, right.b)));
    pairs
}
