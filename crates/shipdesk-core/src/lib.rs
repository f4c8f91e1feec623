use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub mod manifest;

/// Maximum number of live tracking events surfaced in a unified result.
pub const MAX_LIVE_EVENTS: usize = 5;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum TrackError {
    /// Caller input is missing or malformed; reported before any state change.
    #[error("validation error: {0}")]
    Validation(String),
    /// A mutation addressed a record id that does not exist. Lookup misses
    /// are a normal empty result, never this error.
    #[error("record not found: {0}")]
    NotFoundRecord(String),
    /// The requested carrier has no credentials configured.
    #[error("carrier not configured: {0}")]
    Configuration(String),
    /// Network, authentication, or carrier-side failure. Recoverable: the
    /// engine degrades to local-only data instead of failing the request.
    #[error("carrier adapter error: {0}")]
    Adapter(String),
    /// Persistence layer unavailable; fatal for the operation only.
    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Carrier {
    Ups,
    Fedex,
    Unknown,
}

impl Carrier {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ups => "ups",
            Self::Fedex => "fedex",
            Self::Unknown => "unknown",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ups" => Some(Self::Ups),
            "fedex" => Some(Self::Fedex),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl Display for Carrier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "inbound" => Some(Self::Inbound),
            "outbound" => Some(Self::Outbound),
            _ => None,
        }
    }
}

/// One locally observed shipment event from the scan log, with the
/// confirmation overlay already applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanRecord {
    pub id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub tracking: String,
    pub po_number: String,
    pub customer: String,
    pub due_date: String,
    pub status: String,
    pub direction: Direction,
    pub confirmed: bool,
    pub confirmed_by: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub confirmed_at: Option<OffsetDateTime>,
    pub notes: Option<String>,
}

impl ScanRecord {
    /// Composite key for one shipment event. The overlay and the raw log
    /// agree on this derivation, so re-ingesting the log never detaches
    /// existing confirmations.
    #[must_use]
    pub fn composite_id(tracking: &str, po_number: &str) -> String {
        format!("{}+{}", tracking.trim(), po_number.trim())
    }

    pub fn apply_overlay(&mut self, overlay: &Confirmation) {
        self.confirmed = overlay.confirmed;
        self.confirmed_by = Some(overlay.confirmed_by.clone());
        self.confirmed_at = Some(overlay.confirmed_at);
        self.notes.clone_from(&overlay.notes);
    }
}

/// Confirmation state layered atop raw scan data, keyed by [`ScanRecord::id`].
/// Owned independently of the raw log; always wins over any confirmed flag
/// embedded in raw data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Confirmation {
    pub confirmed: bool,
    pub confirmed_by: String,
    #[serde(with = "time::serde::rfc3339")]
    pub confirmed_at: OffsetDateTime,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum MatchField {
    Tracking,
    PoNumber,
    Customer,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Substring,
}

/// Baseline answer from the local record store. A miss is a normal result,
/// not an error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalLookup {
    pub found: bool,
    pub record: Option<ScanRecord>,
    pub matched_field: Option<MatchField>,
    pub match_kind: Option<MatchKind>,
}

impl LocalLookup {
    #[must_use]
    pub fn not_found() -> Self {
        Self { found: false, record: None, matched_field: None, match_kind: None }
    }

    #[must_use]
    pub fn hit(record: ScanRecord, field: MatchField, kind: MatchKind) -> Self {
        Self { found: true, record: Some(record), matched_field: Some(field), match_kind: Some(kind) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreStats {
    pub total: usize,
    pub confirmed: usize,
    pub pending: usize,
    pub today_scans: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackingEvent {
    pub timestamp: String,
    pub status: String,
    pub description: String,
    pub location: String,
}

/// Normalized live carrier response. Produced fresh per request and never
/// persisted. `events` is ordered newest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LiveTrackingResult {
    pub status_description: String,
    pub actual_delivery: Option<String>,
    pub estimated_delivery: Option<String>,
    #[serde(default)]
    pub events: Vec<TrackingEvent>,
    pub is_exception: bool,
    pub exception_reason: Option<String>,
    pub weight: Option<String>,
    pub service: Option<String>,
    pub shipper_reference: Option<String>,
    pub po_number: Option<String>,
    pub invoice_number: Option<String>,
    pub shipper_name: Option<String>,
    pub recipient_name: Option<String>,
    pub signed_by: Option<String>,
    pub customer_reference: Option<String>,
    pub origin: Option<String>,
    pub destination: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Pending,
    Overdue,
    Received,
}

impl PackageStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Overdue => "overdue",
            Self::Received => "received",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "overdue" => Some(Self::Overdue),
            "received" => Some(Self::Received),
            _ => None,
        }
    }
}

/// Purchase-order package with a simpler lifecycle than scan records:
/// pending until the expected date passes (overdue) or it is received.
/// Receiving is one-way; there is no un-confirm.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Package {
    pub id: String,
    pub order_number: String,
    pub supplier: String,
    pub description: String,
    pub expected_date: String,
    pub status: PackageStatus,
    pub received_date: Option<String>,
    pub received_by: Option<String>,
    pub notes: Option<String>,
}

/// Next sequential package id: `max(existing) + 1` rendered as a string.
/// Non-numeric ids are ignored; ids are never reused.
#[must_use]
pub fn next_package_id(existing: &[Package]) -> String {
    let max = existing.iter().filter_map(|package| package.id.parse::<u64>().ok()).max();
    (max.unwrap_or(0) + 1).to_string()
}

/// Whether a `YYYY-MM-DD`-prefixed expected date is strictly in the past.
/// String-lexical comparison is sufficient given ISO-8601 ordering.
#[must_use]
pub fn is_past_due(expected_date: &str, today: &str) -> bool {
    let prefix = date_prefix(expected_date);
    !prefix.is_empty() && prefix.as_str() < today
}

#[must_use]
pub fn date_prefix(value: &str) -> String {
    value.trim().chars().take(10).collect()
}

// ---------------------------------------------------------------------------
// Tracking identifier classifier
// ---------------------------------------------------------------------------

/// Strip non-alphanumerics and uppercase, for consistent identifier matching.
#[must_use]
pub fn normalize_tracking(value: &str) -> String {
    value.chars().filter(char::is_ascii_alphanumeric).collect::<String>().to_ascii_uppercase()
}

/// UPS format: exactly 18 characters after trimming, `1Z` prefix
/// (case-insensitive), remaining 16 ASCII alphanumeric.
#[must_use]
pub fn is_ups_format(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.len() != 18 {
        return false;
    }
    let mut chars = trimmed.chars();
    let Some(first) = chars.next() else { return false };
    let Some(second) = chars.next() else { return false };
    if first != '1' || !second.eq_ignore_ascii_case(&'Z') {
        return false;
    }
    chars.all(|ch| ch.is_ascii_alphanumeric())
}

/// FedEx format predicate: digits only after trimming, in one of the
/// published lengths (12, 15, 20, 22). Exposed to the engine as the single
/// validator the FedEx adapter agrees with.
#[must_use]
pub fn looks_like_fedex(raw: &str) -> bool {
    let trimmed = raw.trim();
    matches!(trimmed.len(), 12 | 15 | 20 | 22) && trimmed.chars().all(|ch| ch.is_ascii_digit())
}

/// Classify a tracking identifier by carrier format. Pure and total: any
/// string input yields a carrier, never an error. UPS is checked first;
/// the two formats are disjoint in practice (`1Z` prefix vs digits-only),
/// so the priority is unobservable for real numbers.
#[must_use]
pub fn classify(raw: &str) -> Carrier {
    if is_ups_format(raw) {
        Carrier::Ups
    } else if looks_like_fedex(raw) {
        Carrier::Fedex
    } else {
        Carrier::Unknown
    }
}

// ---------------------------------------------------------------------------
// Deduplication and local matching
// ---------------------------------------------------------------------------

/// Collapse raw scan events to at most one record per tracking number, the
/// most recent by timestamp. Output is ordered newest first. Older events
/// are suppressed here, not deleted at the source.
#[must_use]
pub fn dedup_latest(events: Vec<ScanRecord>) -> Vec<ScanRecord> {
    let mut latest: std::collections::BTreeMap<String, ScanRecord> =
        std::collections::BTreeMap::new();
    for event in events {
        let key = normalize_tracking(&event.tracking);
        match latest.get(&key) {
            Some(existing) if existing.timestamp >= event.timestamp => {}
            _ => {
                latest.insert(key, event);
            }
        }
    }
    let mut deduped = latest.into_values().collect::<Vec<_>>();
    deduped.sort_by(|lhs, rhs| rhs.timestamp.cmp(&lhs.timestamp));
    deduped
}

/// Match one query against deduplicated records: exact match on normalized
/// tracking, PO number, or customer is preferred across the whole set;
/// substring match is the fallback. The result discloses which field
/// matched and how.
#[must_use]
pub fn find_local(records: &[ScanRecord], query: &str) -> LocalLookup {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return LocalLookup::not_found();
    }
    let normalized = normalize_tracking(trimmed);
    let lowered = trimmed.to_lowercase();

    for record in records {
        if !normalized.is_empty() && normalize_tracking(&record.tracking) == normalized {
            return LocalLookup::hit(record.clone(), MatchField::Tracking, MatchKind::Exact);
        }
        if record.po_number.trim().eq_ignore_ascii_case(trimmed) {
            return LocalLookup::hit(record.clone(), MatchField::PoNumber, MatchKind::Exact);
        }
        if record.customer.trim().eq_ignore_ascii_case(trimmed) {
            return LocalLookup::hit(record.clone(), MatchField::Customer, MatchKind::Exact);
        }
    }

    for record in records {
        if !normalized.is_empty() && normalize_tracking(&record.tracking).contains(&normalized) {
            return LocalLookup::hit(record.clone(), MatchField::Tracking, MatchKind::Substring);
        }
        if record.po_number.to_lowercase().contains(&lowered) {
            return LocalLookup::hit(record.clone(), MatchField::PoNumber, MatchKind::Substring);
        }
        if record.customer.to_lowercase().contains(&lowered) {
            return LocalLookup::hit(record.clone(), MatchField::Customer, MatchKind::Substring);
        }
    }

    LocalLookup::not_found()
}

// ---------------------------------------------------------------------------
// Unified result merge
// ---------------------------------------------------------------------------

/// Outcome of the optional live-fetch leg of a lookup. Degradation is part
/// of the normal response, never a request failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum LiveStatus {
    Ok,
    SkippedUnknownFormat,
    NotConfigured,
    Degraded(String),
}

/// The merged answer for one query: the local baseline plus, when a live
/// fetch succeeded, a carrier-labeled live section. Live data is additive
/// and never overwrites baseline fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnifiedResult {
    pub query: String,
    pub carrier: Carrier,
    pub local: LocalLookup,
    pub ups_live: Option<LiveTrackingResult>,
    pub fedex_live: Option<LiveTrackingResult>,
    pub live_status: LiveStatus,
}

/// Attach an optional live result to a captured baseline. Events are
/// truncated to the [`MAX_LIVE_EVENTS`] most recent; callers needing full
/// history go through a separate path.
#[must_use]
pub fn merge_live(
    query: &str,
    carrier: Carrier,
    local: LocalLookup,
    live: Option<LiveTrackingResult>,
    live_status: LiveStatus,
) -> UnifiedResult {
    let live = live.map(|mut result| {
        result.events.truncate(MAX_LIVE_EVENTS);
        result
    });
    let (ups_live, fedex_live) = match carrier {
        Carrier::Ups => (live, None),
        Carrier::Fedex => (None, live),
        Carrier::Unknown => (None, None),
    };
    UnifiedResult { query: query.to_string(), carrier, local, ups_live, fedex_live, live_status }
}

/// Contract every carrier adapter satisfies. `is_configured` must be
/// checkable without a network call so the engine can short-circuit before
/// attempting authentication. A carrier-side "not found" is `Ok(None)`;
/// transport and auth failures are [`TrackError::Adapter`].
pub trait CarrierClient {
    fn carrier(&self) -> Carrier;
    fn is_configured(&self) -> bool;

    /// Fetch normalized live status for one identifier.
    ///
    /// # Errors
    /// Returns [`TrackError::Adapter`] on network, authentication, timeout,
    /// or carrier-side failure.
    fn track(&self, identifier: &str) -> Result<Option<LiveTrackingResult>, TrackError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn fixture_time() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::seconds(1_700_000_000)
    }

    fn mk_scan(tracking: &str, po: &str, customer: &str, offset_secs: i64) -> ScanRecord {
        ScanRecord {
            id: ScanRecord::composite_id(tracking, po),
            timestamp: fixture_time() + Duration::seconds(offset_secs),
            tracking: tracking.to_string(),
            po_number: po.to_string(),
            customer: customer.to_string(),
            due_date: "2024-02-01".to_string(),
            status: "In Transit".to_string(),
            direction: Direction::Inbound,
            confirmed: false,
            confirmed_by: None,
            confirmed_at: None,
            notes: None,
        }
    }

    #[test]
    fn classify_accepts_ups_shaped_identifiers() {
        assert_eq!(classify("1Z999AA10123456784"), Carrier::Ups);
        assert_eq!(classify("  1z999aa10123456784  "), Carrier::Ups);
        assert_eq!(classify("1Z90A10R0307440981"), Carrier::Ups);
    }

    #[test]
    fn classify_rejects_wrong_length_or_prefix() {
        assert_eq!(classify("1Z999AA1012345678"), Carrier::Unknown);
        assert_eq!(classify("2Z999AA10123456784"), Carrier::Unknown);
        assert_eq!(classify("1Z999AA10123456784X"), Carrier::Unknown);
        assert_eq!(classify("1Z999AA1012345678!"), Carrier::Unknown);
    }

    #[test]
    fn classify_accepts_fedex_digit_lengths() {
        assert_eq!(classify("123456789012"), Carrier::Fedex);
        assert_eq!(classify("123456789012345"), Carrier::Fedex);
        assert_eq!(classify("12345678901234567890"), Carrier::Fedex);
        assert_eq!(classify("1234567890123456789012"), Carrier::Fedex);
    }

    #[test]
    fn classify_returns_unknown_for_everything_else() {
        assert_eq!(classify(""), Carrier::Unknown);
        assert_eq!(classify("PO-4412"), Carrier::Unknown);
        assert_eq!(classify("12345678901"), Carrier::Unknown);
        assert_eq!(classify("1234567890123"), Carrier::Unknown);
    }

    #[test]
    fn normalize_tracking_strips_and_uppercases() {
        assert_eq!(normalize_tracking(" 1z 999-aa1.0123456784 "), "1Z999AA10123456784");
        assert_eq!(normalize_tracking(""), "");
    }

    #[test]
    fn dedup_surfaces_latest_event_per_tracking() {
        let older = mk_scan("1Z90A10R0307440981", "PO-1", "Acme", 0);
        let newer = mk_scan("1Z90A10R0307440981", "PO-2", "Acme", 60);
        let other = mk_scan("123456789012", "PO-3", "Globex", 30);

        let deduped = dedup_latest(vec![older, newer.clone(), other.clone()]);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0], newer);
        assert_eq!(deduped[1], other);
    }

    #[test]
    fn find_local_prefers_exact_over_substring() {
        let exact = mk_scan("1Z90A10R0307440981", "PO-77", "Acme", 0);
        let partial = mk_scan("1Z90A10R0307440982", "PO-778", "Acme Partial", 60);
        let records = vec![partial, exact.clone()];

        let result = find_local(&records, "po-77");
        assert!(result.found);
        assert_eq!(result.matched_field, Some(MatchField::PoNumber));
        assert_eq!(result.match_kind, Some(MatchKind::Exact));
        assert_eq!(result.record, Some(exact));
    }

    #[test]
    fn find_local_falls_back_to_substring_and_discloses_it() {
        let record = mk_scan("1Z90A10R0307440981", "PO-100", "Promos Ink", 0);
        let records = vec![record.clone()];

        let result = find_local(&records, "promos");
        assert!(result.found);
        assert_eq!(result.matched_field, Some(MatchField::Customer));
        assert_eq!(result.match_kind, Some(MatchKind::Substring));
    }

    #[test]
    fn find_local_miss_is_a_normal_empty_result() {
        let records = vec![mk_scan("1Z90A10R0307440981", "PO-100", "Acme", 0)];
        let result = find_local(&records, "no-such-shipment");
        assert!(!result.found);
        assert!(result.record.is_none());
    }

    #[test]
    fn find_local_is_idempotent_over_unchanged_records() {
        let records = vec![
            mk_scan("1Z90A10R0307440981", "PO-100", "Acme", 0),
            mk_scan("123456789012", "PO-200", "Globex", 45),
        ];
        let first = find_local(&records, "globex");
        let second = find_local(&records, "globex");
        assert_eq!(first, second);
    }

    #[test]
    fn merge_truncates_live_events_to_five_newest() {
        let live = LiveTrackingResult {
            status_description: "In Transit".to_string(),
            events: (0..8)
                .map(|index| TrackingEvent {
                    timestamp: format!("2024-01-0{} 10:00", 8 - index),
                    status: "IT".to_string(),
                    description: format!("scan {index}"),
                    location: "DFW".to_string(),
                })
                .collect(),
            ..LiveTrackingResult::default()
        };

        let merged = merge_live(
            "1Z999AA10123456784",
            Carrier::Ups,
            LocalLookup::not_found(),
            Some(live),
            LiveStatus::Ok,
        );
        let Some(ups_live) = merged.ups_live else { panic!("expected ups live section") };
        assert_eq!(ups_live.events.len(), MAX_LIVE_EVENTS);
        assert_eq!(ups_live.events[0].description, "scan 0");
        assert!(merged.fedex_live.is_none());
    }

    #[test]
    fn merge_labels_live_section_by_carrier() {
        let merged = merge_live(
            "123456789012",
            Carrier::Fedex,
            LocalLookup::not_found(),
            Some(LiveTrackingResult::default()),
            LiveStatus::Ok,
        );
        assert!(merged.ups_live.is_none());
        assert!(merged.fedex_live.is_some());
    }

    #[test]
    fn merge_keeps_baseline_when_degraded() {
        let record = mk_scan("1Z90A10R0307440981", "PO-100", "Acme", 0);
        let baseline = LocalLookup::hit(record, MatchField::Tracking, MatchKind::Exact);
        let merged = merge_live(
            "1Z90A10R0307440981",
            Carrier::Ups,
            baseline.clone(),
            None,
            LiveStatus::Degraded("token endpoint returned 500".to_string()),
        );
        assert_eq!(merged.local, baseline);
        assert!(merged.ups_live.is_none());
        assert_eq!(merged.live_status, LiveStatus::Degraded("token endpoint returned 500".to_string()));
    }

    #[test]
    fn next_package_id_is_max_plus_one() {
        let mk = |id: &str| Package {
            id: id.to_string(),
            order_number: "ORD-1".to_string(),
            supplier: "S&S".to_string(),
            description: "tees".to_string(),
            expected_date: "2024-02-01".to_string(),
            status: PackageStatus::Pending,
            received_date: None,
            received_by: None,
            notes: None,
        };
        assert_eq!(next_package_id(&[]), "1");
        assert_eq!(next_package_id(&[mk("1"), mk("7"), mk("3")]), "8");
        assert_eq!(next_package_id(&[mk("legacy"), mk("2")]), "3");
    }

    #[test]
    fn is_past_due_compares_date_prefixes_lexically() {
        assert!(is_past_due("2024-01-10", "2024-01-11"));
        assert!(!is_past_due("2024-01-11", "2024-01-11"));
        assert!(!is_past_due("2024-01-12 08:00", "2024-01-11"));
        assert!(!is_past_due("", "2024-01-11"));
    }

    #[test]
    fn overlay_wins_over_embedded_confirmed_flag() {
        let mut record = mk_scan("1Z90A10R0307440981", "PO-100", "Acme", 0);
        record.confirmed = false;
        let overlay = Confirmation {
            confirmed: true,
            confirmed_by: "huy".to_string(),
            confirmed_at: fixture_time(),
            notes: Some("dock 3".to_string()),
        };
        record.apply_overlay(&overlay);
        assert!(record.confirmed);
        assert_eq!(record.confirmed_by.as_deref(), Some("huy"));
        assert_eq!(record.notes.as_deref(), Some("dock 3"));
    }
}
