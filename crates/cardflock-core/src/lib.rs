use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod window;

pub type PersonIx = u32;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid date: {0}")]
    InvalidDate(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
#[serde(rename_all = "snake_case")]
pub enum MedType {
    Outpatient,
    Clinic,
}

impl MedType {
    /// Settlement code as it appears in claims data: "11" outpatient, "41" clinic.
    pub fn as_code(self) -> &'static str {
        match self {
            Self::Outpatient => "11",
            Self::Clinic => "41",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "11" => Some(Self::Outpatient),
            "41" => Some(Self::Clinic),
            _ => None,
        }
    }
}

/// One settlement row: a single visit by one insured person at one institution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitRecord {
    pub admdvs: String,
    pub med_clinic_id: String,
    pub person_id: String,
    pub med_type: MedType,
    pub flx_med_org_id: String,
    pub adm_time: NaiveDateTime,
    pub adm_date: NaiveDate,
}

/// Unordered person pair that co-visited within the time tolerance.
/// Invariant: `a < b` in interned (lexicographic) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskPair {
    pub a: PersonIx,
    pub b: PersonIx,
    pub jzcs: u32,
    pub jg_num: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskGroupRow {
    pub group_id: String,
    pub subgroup_id: String,
    pub risk_clinic_ratio: f64,
    pub person_id: String,
    pub med_clinic_id: String,
    pub flx_med_org_id: String,
    pub med_type: MedType,
    pub adm_date: NaiveDate,
    pub adm_time: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowMeta {
    pub model_no: String,
    pub begin_date: NaiveDate,
    pub end_date: NaiveDate,
    pub admdvs: Option<String>,
    pub run_time: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Failed,
    Succeeded,
}

impl RunStatus {
    pub fn as_code(self) -> &'static str {
        match self {
            Self::Running => "1",
            Self::Failed => "2",
            Self::Succeeded => "3",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "1" => Some(Self::Running),
            "2" => Some(Self::Failed),
            "3" => Some(Self::Succeeded),
            _ => None,
        }
    }
}

/// String-to-index table. Indices are dense and start at zero; callers that
/// need index order to mirror string order must intern in sorted order.
#[derive(Debug, Clone, Default)]
pub struct Interner {
    ids: HashMap<String, u32>,
    values: Vec<String>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, value: &str) -> u32 {
        if let Some(id) = self.ids.get(value) {
            return *id;
        }
        let id = self.values.len() as u32;
        self.ids.insert(value.to_owned(), id);
        self.values.push(value.to_owned());
        id
    }

    pub fn get(&self, value: &str) -> Option<u32> {
        self.ids.get(value).copied()
    }

    pub fn resolve(&self, id: u32) -> &str {
        self.values[id as usize].as_str()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn med_type_codes_round_trip() {
        assert_eq!(MedType::from_code("11"), Some(MedType::Outpatient));
        assert_eq!(MedType::from_code("41"), Some(MedType::Clinic));
        assert_eq!(MedType::from_code(" 41 "), Some(MedType::Clinic));
        assert_eq!(MedType::from_code("12"), None);
        assert_eq!(MedType::Outpatient.as_code(), "11");
    }

    #[test]
    fn run_status_codes_round_trip() {
        for status in [RunStatus::Running, RunStatus::Failed, RunStatus::Succeeded] {
            assert_eq!(RunStatus::from_code(status.as_code()), Some(status));
        }
        assert_eq!(RunStatus::from_code("4"), None);
    }

    #[test]
    fn interner_assigns_dense_stable_ids() {
        let mut interner = Interner::new();
        let a = interner.intern("p-001");
        let b = interner.intern("p-002");
        assert_eq!(interner.intern("p-001"), a);
        assert_eq!((a, b), (0, 1));
        assert_eq!(interner.resolve(b), "p-002");
        assert_eq!(interner.get("p-003"), None);
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn sorted_interning_preserves_lexicographic_order() {
        let mut values = vec!["p-10", "p-02", "p-01"];
        values.sort_unstable();
        let mut interner = Interner::new();
        let ids: Vec<u32> = values.iter().map(|v| interner.intern(v)).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!(interner.get("p-01") < interner.get("p-02"));
        assert!(interner.get("p-02") < interner.get("p-10"));
    }
}
