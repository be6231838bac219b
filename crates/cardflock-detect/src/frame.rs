use std::collections::HashMap;

use cardflock_core::{Interner, MedType, VisitRecord};
use chrono::{NaiveDate, NaiveDateTime};

/// Columnar view of one window's visits with interned identifier columns.
///
/// Person ids are interned in ascending lexicographic order of the raw
/// strings, so comparing interned ids reproduces string comparison; the pair
/// miner and the person batching rely on this.
#[derive(Debug, Clone)]
pub struct VisitFrame {
    pub person_ids: Interner,
    pub org_ids: Interner,
    date_values: Vec<NaiveDate>,
    date_index: HashMap<NaiveDate, u32>,

    pub person: Vec<u32>,
    pub org: Vec<u32>,
    pub date: Vec<u32>,
    pub med_type: Vec<MedType>,
    pub adm_time: Vec<NaiveDateTime>,
    pub epoch_seconds: Vec<i64>,
    /// `floor(epoch_seconds / time_interval)`: two visits share a window iff
    /// their timestamps fall into the same bucket.
    pub time_win: Vec<i64>,
    pub med_clinic_id: Vec<String>,
}

impl VisitFrame {
    pub fn from_records(records: &[VisitRecord], time_interval: u32) -> Self {
        let interval = i64::from(time_interval.max(1));

        let mut person_names: Vec<&str> =
            records.iter().map(|record| record.person_id.as_str()).collect();
        person_names.sort_unstable();
        person_names.dedup();
        let mut person_ids = Interner::new();
        for name in person_names {
            person_ids.intern(name);
        }

        let mut frame = Self {
            person_ids,
            org_ids: Interner::new(),
            date_values: Vec::new(),
            date_index: HashMap::new(),
            person: Vec::with_capacity(records.len()),
            org: Vec::with_capacity(records.len()),
            date: Vec::with_capacity(records.len()),
            med_type: Vec::with_capacity(records.len()),
            adm_time: Vec::with_capacity(records.len()),
            epoch_seconds: Vec::with_capacity(records.len()),
            time_win: Vec::with_capacity(records.len()),
            med_clinic_id: Vec::with_capacity(records.len()),
        };

        for record in records {
            let person = frame
                .person_ids
                .get(record.person_id.as_str())
                .unwrap_or_default();
            let org = frame.org_ids.intern(record.flx_med_org_id.as_str());
            let date = frame.intern_date(record.adm_date);
            let epoch = record.adm_time.and_utc().timestamp();

            frame.person.push(person);
            frame.org.push(org);
            frame.date.push(date);
            frame.med_type.push(record.med_type);
            frame.adm_time.push(record.adm_time);
            frame.epoch_seconds.push(epoch);
            frame.time_win.push(epoch.div_euclid(interval));
            frame.med_clinic_id.push(record.med_clinic_id.clone());
        }

        frame
    }

    pub fn len(&self) -> usize {
        self.person.len()
    }

    pub fn is_empty(&self) -> bool {
        self.person.is_empty()
    }

    pub fn date_count(&self) -> usize {
        self.date_values.len()
    }

    pub fn date_of(&self, date_ix: u32) -> NaiveDate {
        self.date_values[date_ix as usize]
    }

    fn intern_date(&mut self, value: NaiveDate) -> u32 {
        if let Some(ix) = self.date_index.get(&value) {
            return *ix;
        }
        let ix = self.date_values.len() as u32;
        self.date_index.insert(value, ix);
        self.date_values.push(value);
        ix
    }
}

#[cfg(test)]
mod tests {
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

    #[test]
    fn person_ids_are_interned_in_lexicographic_order() {
        let records = vec![
            visit("p-30", "org-a", "2023-01-02 10:00:00"),
            visit("p-10", "org-a", "2023-01-02 10:05:00"),
            visit("p-20", "org-b", "2023-01-03 11:00:00"),
            visit("p-10", "org-b", "2023-01-03 11:01:00"),
        ];
        let frame = VisitFrame::from_records(&records, 3600);

        assert_eq!(frame.person_ids.get("p-10"), Some(0));
        assert_eq!(frame.person_ids.get("p-20"), Some(1));
        assert_eq!(frame.person_ids.get("p-30"), Some(2));
        assert_eq!(frame.person, vec![2, 0, 1, 0]);
    }

    #[test]
    fn time_windows_bucket_by_interval() {
        let records = vec![
            visit("a", "org", "2023-01-02 10:00:00"),
            visit("a", "org", "2023-01-02 10:59:59"),
            visit("a", "org", "2023-01-02 11:00:00"),
        ];
        let frame = VisitFrame::from_records(&records, 3600);

        assert_eq!(frame.time_win[0], frame.time_win[1]);
        assert_eq!(frame.time_win[2], frame.time_win[0] + 1);
    }

    #[test]
    fn dates_are_interned_per_distinct_day() {
        let records = vec![
            visit("a", "org", "2023-01-02 10:00:00"),
            visit("b", "org", "2023-01-02 23:00:00"),
            visit("a", "org", "2023-01-03 00:30:00"),
        ];
        let frame = VisitFrame::from_records(&records, 600);

        assert_eq!(frame.date_count(), 2);
        assert_eq!(frame.date[0], frame.date[1]);
        assert_ne!(frame.date[0], frame.date[2]);
        assert_eq!(
            frame.date_of(frame.date[2]),
            NaiveDate::from_ymd_opt(2023, 1, 3).expect("date"),
        );
    }
}
