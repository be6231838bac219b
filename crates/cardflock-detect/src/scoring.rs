use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use cardflock_config::DetectionParams;
use cardflock_core::RiskGroupRow;
use cardflock_graph::PersonGraph;

use crate::frame::VisitFrame;
use crate::pruning::Cohort;

/// Hard cap on emitted groups per window, best scores first.
const MAX_GROUPS: usize = 10_000;

#[derive(Debug, Clone)]
pub struct ScoredCohort {
    pub cohort: Cohort,
    pub connectivity: bool,
    pub degree4: f64,
    pub score: f64,
}

/// Attach G1 connectivity and mean induced degree, score, and keep the
/// top `MAX_GROUPS` cohorts. The sort is stable, so equal scores keep their
/// pruning order.
pub fn score_cohorts(graph: &PersonGraph, cohorts: Vec<Cohort>) -> Vec<ScoredCohort> {
    let mut scored: Vec<ScoredCohort> = cohorts
        .into_iter()
        .map(|cohort| {
            let induced = graph.induce(&cohort.persons);
            let connectivity = induced.is_connected();
            let degree4 = induced.mean_degree();
            let score = f64::from(u8::from(connectivity))
                + 0.1 * (cohort.degree1 + cohort.degree2 + cohort.degree3)
                + degree4 / cohort.size.max(1) as f64;
            ScoredCohort {
                cohort,
                connectivity,
                degree4,
                score,
            }
        })
        .collect();

    scored.sort_by(|left, right| {
        right
            .score
            .partial_cmp(&left.score)
            .unwrap_or(Ordering::Equal)
    });
    scored.truncate(MAX_GROUPS);
    scored
}

#[derive(Debug, Clone)]
pub struct GroupCandidate {
    pub group_id: String,
    pub rows: Vec<ExplodedRow>,
}

/// One exploded (person, institution, date) match joined back to a visit row.
#[derive(Debug, Clone, Copy)]
pub struct ExplodedRow {
    pub person: u32,
    pub org: u32,
    pub date: u32,
    pub row: u32,
}

/// Explode each cohort to its dates x institutions x persons Cartesian
/// product and inner-join against the visit frame; only observed triples
/// survive. Group ids carry the window epoch prefix and the 1-based rank.
pub fn explode_groups(
    frame: &VisitFrame,
    scored: &[ScoredCohort],
    epoch_seconds: i64,
) -> Vec<GroupCandidate> {
    let mut visits_by_triple: HashMap<(u32, u32, u32), Vec<u32>> = HashMap::new();
    for row in 0..frame.len() as u32 {
        let ix = row as usize;
        visits_by_triple
            .entry((frame.person[ix], frame.org[ix], frame.date[ix]))
            .or_default()
            .push(row);
    }

    scored
        .iter()
        .enumerate()
        .map(|(rank, entry)| {
            let group_id = format!("{epoch_seconds}_{}", rank + 1);
            let mut rows = Vec::new();
            for &date in &entry.cohort.dates {
                for &org in &entry.cohort.orgs {
                    for &person in &entry.cohort.persons {
                        let Some(matches) = visits_by_triple.get(&(person, org, date)) else {
                            continue;
                        };
                        for &row in matches {
                            rows.push(ExplodedRow {
                                person,
                                org,
                                date,
                                row,
                            });
                        }
                    }
                }
            }
            GroupCandidate { group_id, rows }
        })
        .collect()
}

/// Keep (institution, date) subgroups covering at least
/// `min_person_ratio_in_subgroup` of the group's persons, number them
/// sequentially, and keep the whole group only when the kept rows reach
/// `min_risk_clinic_ratio_in_group` of its visit rows.
pub fn filter_risk_groups(
    frame: &VisitFrame,
    groups: Vec<GroupCandidate>,
    params: &DetectionParams,
) -> Vec<RiskGroupRow> {
    let mut result = Vec::new();
    for group in groups {
        let GroupCandidate { group_id, rows } = group;
        if rows.is_empty() {
            continue;
        }
        let total_rows = rows.len();
        let group_persons: HashSet<u32> = rows.iter().map(|row| row.person).collect();
        let group_person_count = group_persons.len();

        let mut buckets: BTreeMap<(u32, u32), Vec<ExplodedRow>> = BTreeMap::new();
        for row in rows {
            buckets.entry((row.org, row.date)).or_default().push(row);
        }

        let mut kept: Vec<(String, Vec<ExplodedRow>)> = Vec::new();
        let mut risk_rows = 0usize;
        for (_, bucket) in buckets {
            let bucket_persons: HashSet<u32> = bucket.iter().map(|row| row.person).collect();
            let person_ratio = bucket_persons.len() as f64 / group_person_count as f64;
            if person_ratio >= params.min_person_ratio_in_subgroup {
                risk_rows += bucket.len();
                kept.push(((kept.len() + 1).to_string(), bucket));
            }
        }

        let risk_clinic_ratio = risk_rows as f64 / total_rows as f64;
        if risk_clinic_ratio < params.min_risk_clinic_ratio_in_group {
            continue;
        }

        for (subgroup_id, bucket) in kept {
            for exploded in bucket {
                result.push(output_row(
                    frame,
                    &group_id,
                    &subgroup_id,
                    risk_clinic_ratio,
                    exploded,
                ));
            }
        }
    }
    result
}

fn output_row(
    frame: &VisitFrame,
    group_id: &str,
    subgroup_id: &str,
    risk_clinic_ratio: f64,
    exploded: ExplodedRow,
) -> RiskGroupRow {
    let ix = exploded.row as usize;
    RiskGroupRow {
        group_id: group_id.to_owned(),
        subgroup_id: subgroup_id.to_owned(),
        risk_clinic_ratio,
        person_id: frame.person_ids.resolve(exploded.person).to_owned(),
        med_clinic_id: frame.med_clinic_id[ix].clone(),
        flx_med_org_id: frame.org_ids.resolve(exploded.org).to_owned(),
        med_type: frame.med_type[ix],
        adm_date: frame.date_of(exploded.date),
        adm_time: frame.adm_time[ix],
    }
}
