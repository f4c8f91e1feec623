//! Manifest filtering, grouping, and the rolling retention rebuild.

use serde::{Deserialize, Serialize};
use time::{Date, Duration};

/// Destination postal code of the receiving facility.
pub const FACILITY_POSTAL: &str = "75234";

/// Rolling retention window applied on every manifest rebuild.
pub const RETENTION_DAYS: i64 = 10;

/// A shipment projected for cross-carrier aggregation. Date fields are
/// `YYYY-MM-DD`-prefixed strings; ISO-8601 ordering makes string-lexical
/// comparison sufficient, and that is intentional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackingRecord {
    pub tracking: String,
    pub po: String,
    pub customer: String,
    pub source: String,
    pub ship_date: String,
    pub added_date: String,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub qty: Option<String>,
    #[serde(default)]
    pub origin_city: String,
    #[serde(default)]
    pub origin_state: String,
    #[serde(default)]
    pub origin_postal: String,
    #[serde(default)]
    pub destination_postal: String,
    #[serde(default)]
    pub destination_company: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub last_activity: String,
}

impl TrackingRecord {
    /// Grouping key: `"{originCity}, {originState} {originPostal}"`, trimmed.
    #[must_use]
    pub fn origin_key(&self) -> String {
        format!("{}, {} {}", self.origin_city.trim(), self.origin_state.trim(), self.origin_postal.trim())
            .trim()
            .to_string()
    }

    fn retention_date(&self) -> String {
        let added = super::date_prefix(&self.added_date);
        if added.is_empty() {
            super::date_prefix(&self.ship_date)
        } else {
            added
        }
    }
}

/// Filter criteria for inbound-arrivals views. All optional, AND-combined.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterCriteria {
    /// Destination postal code prefix; the facility view passes
    /// [`FACILITY_POSTAL`].
    #[serde(default)]
    pub destination_postal: Option<String>,
    /// Origin postal code prefix.
    #[serde(default)]
    pub origin_postal: Option<String>,
    /// Origin city substring, case-insensitive.
    #[serde(default)]
    pub origin_city: Option<String>,
    /// Destination company-name substring, case-insensitive; used as a
    /// supplier proxy.
    #[serde(default)]
    pub destination_company: Option<String>,
    /// Status substring, case-insensitive.
    #[serde(default)]
    pub status: Option<String>,
    /// Matches records whose ship date or last activity falls on today.
    #[serde(default)]
    pub arriving_today: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestGroup {
    pub origin: String,
    pub records: Vec<TrackingRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupedManifest {
    pub total: usize,
    pub groups: Vec<ManifestGroup>,
    pub records: Vec<TrackingRecord>,
}

fn digits_only(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}

fn matches_today(record: &TrackingRecord, today_yyyymmdd: &str) -> bool {
    if today_yyyymmdd.is_empty() {
        return false;
    }
    digits_only(&record.ship_date).starts_with(today_yyyymmdd)
        || digits_only(&record.last_activity).starts_with(today_yyyymmdd)
}

fn matches_criteria(record: &TrackingRecord, criteria: &FilterCriteria, today_yyyymmdd: &str) -> bool {
    if let Some(postal) = &criteria.destination_postal {
        if !record.destination_postal.trim().starts_with(postal.trim()) {
            return false;
        }
    }
    if let Some(postal) = &criteria.origin_postal {
        if !record.origin_postal.trim().starts_with(postal.trim()) {
            return false;
        }
    }
    if let Some(city) = &criteria.origin_city {
        if !record.origin_city.to_lowercase().contains(&city.to_lowercase()) {
            return false;
        }
    }
    if let Some(company) = &criteria.destination_company {
        if !record.destination_company.to_lowercase().contains(&company.to_lowercase()) {
            return false;
        }
    }
    if let Some(status) = &criteria.status {
        if !record.status.to_lowercase().contains(&status.to_lowercase()) {
            return false;
        }
    }
    if criteria.arriving_today && !matches_today(record, today_yyyymmdd) {
        return false;
    }
    true
}

/// Filter records for an inbound-arrivals view and bucket them by origin.
/// Insertion order is preserved within each bucket and across buckets; no
/// re-sort happens here. `today_yyyymmdd` is the rebuild-time calendar day
/// as an eight-digit string.
#[must_use]
pub fn filter_inbound(
    records: &[TrackingRecord],
    criteria: &FilterCriteria,
    today_yyyymmdd: &str,
) -> GroupedManifest {
    let mut groups: Vec<ManifestGroup> = Vec::new();
    let mut flat: Vec<TrackingRecord> = Vec::new();

    for record in records {
        if !matches_criteria(record, criteria, today_yyyymmdd) {
            continue;
        }
        let key = record.origin_key();
        match groups.iter_mut().find(|group| group.origin == key) {
            Some(group) => group.records.push(record.clone()),
            None => groups.push(ManifestGroup { origin: key, records: vec![record.clone()] }),
        }
        flat.push(record.clone());
    }

    GroupedManifest { total: flat.len(), groups, records: flat }
}

/// Retention cutoff for a rebuild at `today`: `today - 10 days`, `YYYY-MM-DD`.
#[must_use]
pub fn retention_cutoff(today: Date) -> String {
    let cutoff = today - Duration::days(RETENTION_DAYS);
    format!("{:04}-{:02}-{:02}", cutoff.year(), u8::from(cutoff.month()), cutoff.day())
}

/// Apply the rolling retention window: keep records whose `added_date`
/// (fallback `ship_date`) is within [`RETENTION_DAYS`] of `today`. Runs
/// before every persisted rebuild; this is the sole bound on growth.
/// Returns the retained records and the purge count.
#[must_use]
pub fn retain_recent(records: Vec<TrackingRecord>, today: Date) -> (Vec<TrackingRecord>, usize) {
    let cutoff = retention_cutoff(today);
    let before = records.len();
    let retained = records
        .into_iter()
        .filter(|record| record.retention_date() >= cutoff)
        .collect::<Vec<_>>();
    let purged = before - retained.len();
    (retained, purged)
}

/// Project records as tabular rows (header first) for spreadsheet or
/// delimited-text rendering. Cell formatting is the exporter's concern.
#[must_use]
pub fn manifest_rows(records: &[TrackingRecord]) -> Vec<Vec<String>> {
    let mut rows = Vec::with_capacity(records.len() + 1);
    rows.push(
        ["tracking", "po", "customer", "source", "ship_date", "added_date", "style", "color", "size", "qty", "origin", "status"]
            .iter()
            .map(ToString::to_string)
            .collect(),
    );
    for record in records {
        rows.push(vec![
            record.tracking.clone(),
            record.po.clone(),
            record.customer.clone(),
            record.source.clone(),
            record.ship_date.clone(),
            record.added_date.clone(),
            record.style.clone().unwrap_or_default(),
            record.color.clone().unwrap_or_default(),
            record.size.clone().unwrap_or_default(),
            record.qty.clone().unwrap_or_default(),
            record.origin_key(),
            record.status.clone(),
        ]);
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn mk_record(tracking: &str, destination_postal: &str, ship_date: &str) -> TrackingRecord {
        TrackingRecord {
            tracking: tracking.to_string(),
            po: "PO-1".to_string(),
            customer: "Acme".to_string(),
            source: "sanmar".to_string(),
            ship_date: ship_date.to_string(),
            added_date: String::new(),
            origin_city: "Irving".to_string(),
            origin_state: "TX".to_string(),
            origin_postal: "75063".to_string(),
            destination_postal: destination_postal.to_string(),
            destination_company: "Promos Ink".to_string(),
            status: "In Transit".to_string(),
            last_activity: String::new(),
            ..TrackingRecord::default()
        }
    }

    #[test]
    fn facility_filter_with_arriving_today_counts_one() {
        let records = vec![
            mk_record("1Z90A10R0307440981", FACILITY_POSTAL, "2024-01-15"),
            mk_record("1Z90A10R0307440982", FACILITY_POSTAL, "2024-01-14"),
            mk_record("1Z90A10R0307440983", "75001", "2024-01-15"),
        ];
        let criteria = FilterCriteria {
            destination_postal: Some(FACILITY_POSTAL.to_string()),
            arriving_today: true,
            ..FilterCriteria::default()
        };

        let grouped = filter_inbound(&records, &criteria, "20240115");
        assert_eq!(grouped.total, 1);
        assert_eq!(grouped.records[0].tracking, "1Z90A10R0307440981");
    }

    #[test]
    fn arriving_today_also_matches_last_activity() {
        let mut record = mk_record("1Z90A10R0307440981", FACILITY_POSTAL, "2024-01-10");
        record.last_activity = "20240115 09:12".to_string();
        let criteria = FilterCriteria { arriving_today: true, ..FilterCriteria::default() };

        let grouped = filter_inbound(&[record], &criteria, "20240115");
        assert_eq!(grouped.total, 1);
    }

    #[test]
    fn substring_criteria_are_case_insensitive() {
        let records = vec![mk_record("1Z90A10R0307440981", FACILITY_POSTAL, "2024-01-15")];
        let criteria = FilterCriteria {
            origin_city: Some("IRVING".to_string()),
            destination_company: Some("promos".to_string()),
            status: Some("transit".to_string()),
            ..FilterCriteria::default()
        };

        assert_eq!(filter_inbound(&records, &criteria, "20240115").total, 1);
    }

    #[test]
    fn grouping_buckets_by_origin_and_preserves_input_order() {
        let mut dallas = mk_record("1Z90A10R0307440984", FACILITY_POSTAL, "2024-01-15");
        dallas.origin_city = "Dallas".to_string();
        dallas.origin_postal = "75201".to_string();
        let records = vec![
            mk_record("1Z90A10R0307440981", FACILITY_POSTAL, "2024-01-15"),
            dallas,
            mk_record("1Z90A10R0307440982", FACILITY_POSTAL, "2024-01-15"),
        ];

        let grouped = filter_inbound(&records, &FilterCriteria::default(), "20240115");
        assert_eq!(grouped.groups.len(), 2);
        assert_eq!(grouped.groups[0].origin, "Irving, TX 75063");
        assert_eq!(grouped.groups[0].records.len(), 2);
        assert_eq!(grouped.groups[0].records[0].tracking, "1Z90A10R0307440981");
        assert_eq!(grouped.groups[0].records[1].tracking, "1Z90A10R0307440982");
        assert_eq!(grouped.groups[1].origin, "Dallas, TX 75201");
    }

    #[test]
    fn retention_keeps_window_and_drops_older() {
        let today = date!(2024 - 01 - 15);
        let mut fresh = mk_record("1Z90A10R0307440981", FACILITY_POSTAL, "");
        fresh.added_date = "2024-01-15".to_string();
        let mut mid = mk_record("1Z90A10R0307440982", FACILITY_POSTAL, "");
        mid.added_date = "2024-01-10".to_string();
        let mut stale = mk_record("1Z90A10R0307440983", FACILITY_POSTAL, "");
        stale.added_date = "2024-01-04".to_string();

        let (retained, purged) = retain_recent(vec![fresh, mid, stale], today);
        assert_eq!(retained.len(), 2);
        assert_eq!(purged, 1);
        assert!(retained.iter().all(|record| record.added_date.as_str() >= "2024-01-05"));
    }

    #[test]
    fn retention_falls_back_to_ship_date() {
        let today = date!(2024 - 01 - 15);
        let recent_ship = mk_record("1Z90A10R0307440981", FACILITY_POSTAL, "2024-01-12");
        let stale_ship = mk_record("1Z90A10R0307440982", FACILITY_POSTAL, "2024-01-01");

        let (retained, purged) = retain_recent(vec![recent_ship, stale_ship], today);
        assert_eq!(retained.len(), 1);
        assert_eq!(purged, 1);
        assert_eq!(retained[0].tracking, "1Z90A10R0307440981");
    }

    #[test]
    fn cutoff_is_ten_days_before_today() {
        assert_eq!(retention_cutoff(date!(2024 - 01 - 15)), "2024-01-05");
        assert_eq!(retention_cutoff(date!(2024 - 03 - 05)), "2024-02-24");
    }

    #[test]
    fn manifest_rows_start_with_header() {
        let rows = manifest_rows(&[mk_record("1Z90A10R0307440981", FACILITY_POSTAL, "2024-01-15")]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], "tracking");
        assert_eq!(rows[1][0], "1Z90A10R0307440981");
        assert_eq!(rows[1][10], "Irving, TX 75063");
    }
}
