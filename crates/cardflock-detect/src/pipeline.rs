use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use cardflock_config::DetectionParams;
use cardflock_core::{RiskGroupRow, VisitRecord};
use thiserror::Error;
use tracing::info;

use crate::community::detect_communities;
use crate::frame::VisitFrame;
use crate::graphs::{build_person_graph, build_tripartite_graph};
use crate::pairs::mine_risk_pairs;
use crate::pruning::{Cohort, prune_community};
use crate::scoring::{explode_groups, filter_risk_groups, score_cohorts};

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("window run cancelled")]
    Cancelled,
}

/// Cooperative cancellation handle, polled between pipeline phases. A
/// cancelled window is abandoned wholesale; nothing partial escapes.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn checkpoint(&self) -> Result<(), DetectError> {
        if self.is_cancelled() {
            Err(DetectError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Card-aggregation detector for one time window: pair mining, dual-graph
/// construction, community detection, tripartite pruning, scoring and
/// subgroup filtering.
#[derive(Debug, Clone)]
pub struct MultiCardDetector {
    params: DetectionParams,
}

impl MultiCardDetector {
    pub fn new(params: DetectionParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &DetectionParams {
        &self.params
    }

    /// Run the pipeline over one window of visits. `Ok(None)` means nothing
    /// survived, including the empty-input case.
    pub fn run(
        &self,
        visits: &[VisitRecord],
        cancel: &CancelFlag,
    ) -> Result<Option<Vec<RiskGroupRow>>, DetectError> {
        if visits.is_empty() {
            info!("window has no visits");
            return Ok(None);
        }
        let started = Instant::now();

        let frame = VisitFrame::from_records(visits, self.params.time_interval);
        info!(
            rows = frame.len(),
            persons = frame.person_ids.len(),
            "visit frame built"
        );
        cancel.checkpoint()?;

        let pairs = mine_risk_pairs(&frame, &self.params);
        info!(pairs = pairs.len(), "risk pairs mined");
        if pairs.is_empty() {
            return Ok(None);
        }
        cancel.checkpoint()?;

        let graph1 = build_person_graph(&pairs);
        let graph2 = build_tripartite_graph(&frame, &graph1);
        info!(
            g1_nodes = graph1.person_count(),
            g1_edges = graph1.edge_count(),
            g2_nodes = graph2.vertex_count(),
            g2_edges = graph2.edge_count(),
            "graphs built"
        );
        cancel.checkpoint()?;

        let communities = detect_communities(&graph1, &self.params);
        info!(communities = communities.len(), "communities detected");
        cancel.checkpoint()?;

        let cohorts: Vec<Cohort> = communities
            .iter()
            .filter_map(|community| prune_community(&graph2, &community.persons, &self.params))
            .collect();
        info!(cohorts = cohorts.len(), "cohorts survived pruning");
        cancel.checkpoint()?;

        let scored = score_cohorts(&graph1, cohorts);
        if scored.is_empty() {
            info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "no cohorts to score"
            );
            return Ok(None);
        }

        let epoch_seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or(0);
        let groups = explode_groups(&frame, &scored, epoch_seconds);
        cancel.checkpoint()?;

        let rows = filter_risk_groups(&frame, groups, &self.params);
        info!(
            rows = rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "window finished"
        );
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(rows))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use cardflock_core::MedType;
    use chrono::NaiveDateTime;

    use super::*;

    fn visit(person: &str, org: &str, timestamp: &str) -> VisitRecord {
        let adm_time = NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%d %H:%M:%S")
            .expect("timestamp literal");
        VisitRecord {
            admdvs: "440100".to_owned(),
            med_clinic_id: format!("clinic-{person}-{timestamp}"),
            person_id: person.to_owned(),
            med_type: MedType::Outpatient,
            flx_med_org_id: org.to_owned(),
            adm_time,
            adm_date: adm_time.date(),
        }
    }

    fn ring_params() -> DetectionParams {
        DetectionParams {
            time_interval: 3600,
            min_count: 3,
            min_size: 3,
            max_size: 100,
            min_jg_num: 1,
            min_person_ratio_in_subgroup: 0.3,
            min_risk_clinic_ratio_in_group: 0.3,
            resolution_parameter: 0.5,
            n_jobs: 1,
        }
    }

    /// Six persons hitting the same institution together on four days.
    fn coordinated_ring() -> Vec<VisitRecord> {
        let persons = ["a", "b", "c", "d", "e", "f"];
        let days = ["2023-01-02", "2023-01-09", "2023-01-16", "2023-01-23"];
        let mut records = Vec::new();
        for day in days {
            for (slot, person) in persons.iter().enumerate() {
                records.push(visit(
                    person,
                    "org-1",
                    &format!("{day} 10:{:02}:00", slot * 5),
                ));
            }
        }
        records
    }

    #[test]
    fn coordinated_ring_is_detected_end_to_end() {
        let detector = MultiCardDetector::new(ring_params());
        let rows = detector
            .run(&coordinated_ring(), &CancelFlag::new())
            .expect("pipeline run")
            .expect("groups detected");

        // 4 dates x 1 institution x 6 persons, every triple observed once.
        assert_eq!(rows.len(), 24);
        assert!(rows.iter().all(|row| row.group_id.ends_with("_1")));
        assert!(rows.iter().all(|row| (row.risk_clinic_ratio - 1.0).abs() < 1e-9));
        let subgroups: HashSet<&str> = rows.iter().map(|row| row.subgroup_id.as_str()).collect();
        assert_eq!(subgroups.len(), 4);
        let persons: HashSet<&str> = rows.iter().map(|row| row.person_id.as_str()).collect();
        assert_eq!(persons.len(), 6);
        assert!(rows.iter().all(|row| row.flx_med_org_id == "org-1"));
    }

    #[test]
    fn empty_input_yields_no_result() {
        let detector = MultiCardDetector::new(ring_params());
        let result = detector.run(&[], &CancelFlag::new()).expect("pipeline run");
        assert!(result.is_none());
    }

    #[test]
    fn uncoordinated_visits_yield_no_result() {
        // Each person visits alone, hours apart.
        let mut records = Vec::new();
        for (slot, person) in ["a", "b", "c", "d"].iter().enumerate() {
            for day in 2..=5 {
                records.push(visit(
                    person,
                    "org-1",
                    &format!("2023-01-{day:02} {:02}:00:00", 6 + slot * 3),
                ));
            }
        }
        let detector = MultiCardDetector::new(ring_params());
        let result = detector.run(&records, &CancelFlag::new()).expect("pipeline run");
        assert!(result.is_none());
    }

    #[test]
    fn cancelled_window_aborts_without_output() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let detector = MultiCardDetector::new(ring_params());
        let result = detector.run(&coordinated_ring(), &cancel);
        assert!(matches!(result, Err(DetectError::Cancelled)));
    }

    #[test]
    fn repeated_runs_emit_the_same_groups_modulo_epoch_prefix() {
        let detector = MultiCardDetector::new(ring_params());
        let strip = |rows: Vec<RiskGroupRow>| -> Vec<(String, String, String, String)> {
            rows.into_iter()
                .map(|row| {
                    let rank = row
                        .group_id
                        .rsplit_once('_')
                        .map(|(_, rank)| rank.to_owned())
                        .unwrap_or_default();
                    (rank, row.subgroup_id, row.person_id, row.med_clinic_id)
                })
                .collect()
        };

        let first = strip(
            detector
                .run(&coordinated_ring(), &CancelFlag::new())
                .expect("run")
                .expect("groups"),
        );
        let second = strip(
            detector
                .run(&coordinated_ring(), &CancelFlag::new())
                .expect("run")
                .expect("groups"),
        );
        assert_eq!(first, second);
    }
}
