//! The reconciliation facade: local baseline first, carrier classification,
//! optional live fetch, merge. Everything the service and CLI expose goes
//! through [`ShipdeskApi`].

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shipdesk_core::manifest::{filter_inbound, retain_recent, FilterCriteria, GroupedManifest, TrackingRecord};
use shipdesk_core::{
    classify, find_local, merge_live, Carrier, CarrierClient, Direction, LiveStatus,
    LiveTrackingResult, Package, ScanRecord, StoreStats, TrackError, UnifiedResult,
};
use shipdesk_store_sqlite::{IngestSummary, SqliteStore};
use time::{Date, OffsetDateTime};

pub const API_CONTRACT_VERSION: &str = "api.v1";

const DEFAULT_RECENT_LIMIT: usize = 20;
const MAX_RECENT_LIMIT: usize = 200;

/// A carrier adapter shared across request handlers.
pub type SharedCarrier = Arc<dyn CarrierClient + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfirmRequest {
    pub confirmed_by: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddPackageRequest {
    pub order_number: String,
    pub supplier: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub expected_date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceivePackageRequest {
    pub received_by: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    Ok,
    NotFound,
    SkippedUnknownFormat,
    NotConfigured,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchTrackItem {
    pub identifier: String,
    pub carrier: Carrier,
    pub outcome: BatchOutcome,
    pub live: Option<LiveTrackingResult>,
    pub error: Option<String>,
}

/// One bad identifier never fails the batch; the summary reports partial
/// success counts instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchTrackResult {
    pub items: Vec<BatchTrackItem>,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RebuildSummary {
    pub received: usize,
    pub retained: usize,
    pub purged: usize,
    pub snapshot_id: String,
}

#[derive(Clone)]
pub struct ShipdeskApi {
    db_path: PathBuf,
    ups: SharedCarrier,
    fedex: SharedCarrier,
}

impl ShipdeskApi {
    #[must_use]
    pub fn new(db_path: PathBuf, ups: SharedCarrier, fedex: SharedCarrier) -> Self {
        Self { db_path, ups, fedex }
    }

    fn open_store(&self) -> Result<SqliteStore, TrackError> {
        let mut store = SqliteStore::open(&self.db_path).map_err(storage_error)?;
        store.migrate().map_err(storage_error)?;
        Ok(store)
    }

    /// Resolve one query into a unified result. The local baseline is
    /// captured first and survives every downstream failure; live tracking
    /// is strictly additive.
    ///
    /// # Errors
    /// Returns [`TrackError::Storage`] when the local store is unreadable.
    /// Adapter failures never propagate; they degrade the result.
    pub fn resolve(&self, query: &str) -> Result<UnifiedResult, TrackError> {
        let store = self.open_store()?;
        let baseline = find_local(&store.surfaced_records().map_err(storage_error)?, query);

        let carrier = classify(query);
        let (live, live_status) = match carrier {
            Carrier::Unknown => (None, LiveStatus::SkippedUnknownFormat),
            Carrier::Ups => fetch_live(self.ups.as_ref(), query),
            Carrier::Fedex => fetch_live(self.fedex.as_ref(), query),
        };

        Ok(merge_live(query.trim(), carrier, baseline, live, live_status))
    }

    /// Live-track a batch of identifiers, reporting per-identifier outcomes.
    #[must_use]
    pub fn track_batch(&self, identifiers: &[String]) -> BatchTrackResult {
        let mut items = Vec::with_capacity(identifiers.len());
        let mut succeeded = 0_usize;
        let mut failed = 0_usize;

        for identifier in identifiers {
            let carrier = classify(identifier);
            let item = match carrier {
                Carrier::Unknown => BatchTrackItem {
                    identifier: identifier.clone(),
                    carrier,
                    outcome: BatchOutcome::SkippedUnknownFormat,
                    live: None,
                    error: None,
                },
                Carrier::Ups | Carrier::Fedex => {
                    let client = if carrier == Carrier::Ups { &self.ups } else { &self.fedex };
                    if client.is_configured() {
                        match client.track(identifier.trim()) {
                            Ok(Some(live)) => BatchTrackItem {
                                identifier: identifier.clone(),
                                carrier,
                                outcome: BatchOutcome::Ok,
                                live: Some(live),
                                error: None,
                            },
                            Ok(None) => BatchTrackItem {
                                identifier: identifier.clone(),
                                carrier,
                                outcome: BatchOutcome::NotFound,
                                live: None,
                                error: None,
                            },
                            Err(err) => BatchTrackItem {
                                identifier: identifier.clone(),
                                carrier,
                                outcome: BatchOutcome::Error,
                                live: None,
                                error: Some(err.to_string()),
                            },
                        }
                    } else {
                        BatchTrackItem {
                            identifier: identifier.clone(),
                            carrier,
                            outcome: BatchOutcome::NotConfigured,
                            live: None,
                            error: None,
                        }
                    }
                }
            };
            match item.outcome {
                BatchOutcome::Ok | BatchOutcome::NotFound => succeeded += 1,
                _ => failed += 1,
            }
            items.push(item);
        }

        BatchTrackResult { items, succeeded, failed }
    }

    /// Ingest one delimited scan log.
    ///
    /// # Errors
    /// Returns [`TrackError::Storage`] when the batch cannot be written.
    pub fn ingest_scans(&self, csv_text: &str, direction: Direction) -> Result<IngestSummary, TrackError> {
        let mut store = self.open_store()?;
        let summary = store
            .ingest_scan_csv(csv_text.as_bytes(), direction)
            .map_err(storage_error)?;
        tracing::info!(
            batch_id = %summary.batch_id,
            ingested = summary.ingested,
            skipped = summary.skipped,
            direction = direction.as_str(),
            "scan log ingested"
        );
        Ok(summary)
    }

    /// The most recent surfaced records for one direction. A zero limit
    /// falls back to the default; the cap keeps responses bounded.
    ///
    /// # Errors
    /// Returns [`TrackError::Storage`] when the store is unreadable.
    pub fn recent(&self, direction: Direction, limit: Option<usize>) -> Result<Vec<ScanRecord>, TrackError> {
        let limit = limit.unwrap_or(DEFAULT_RECENT_LIMIT).clamp(1, MAX_RECENT_LIMIT);
        self.open_store()?.recent(direction, limit).map_err(storage_error)
    }

    /// # Errors
    /// Returns [`TrackError::Storage`] when the store is unreadable.
    pub fn stats(&self) -> Result<StoreStats, TrackError> {
        let now = local_now();
        self.open_store()?.stats(now.date(), now.offset()).map_err(storage_error)
    }

    /// Confirm one scan record.
    ///
    /// # Errors
    /// Returns [`TrackError::Validation`] when `confirmed_by` is blank
    /// (checked before any write), [`TrackError::NotFoundRecord`] for an
    /// unknown id, or [`TrackError::Storage`] when the write fails.
    pub fn confirm(&self, scan_id: &str, request: &ConfirmRequest) -> Result<ScanRecord, TrackError> {
        if request.confirmed_by.trim().is_empty() {
            return Err(TrackError::Validation("confirmed_by is required".to_string()));
        }
        let mut store = self.open_store()?;
        store
            .confirm(
                scan_id,
                request.confirmed_by.trim(),
                request.notes.as_deref(),
                OffsetDateTime::now_utc(),
            )
            .map_err(storage_error)?
            .ok_or_else(|| TrackError::NotFoundRecord(scan_id.to_string()))
    }

    /// Filter the persisted manifest for an inbound-arrivals view.
    ///
    /// # Errors
    /// Returns [`TrackError::Storage`] when the manifest cannot be read.
    pub fn manifest_filter(&self, criteria: &FilterCriteria) -> Result<GroupedManifest, TrackError> {
        let records = self.open_store()?.list_manifest().map_err(storage_error)?;
        Ok(filter_inbound(&records, criteria, &today_yyyymmdd()))
    }

    /// Rebuild the manifest from a full record batch: apply the retention
    /// window, then swap the persisted collection atomically.
    ///
    /// # Errors
    /// Returns [`TrackError::Storage`] when the swap cannot be committed.
    pub fn manifest_rebuild(&self, records: Vec<TrackingRecord>) -> Result<RebuildSummary, TrackError> {
        let received = records.len();
        let (retained, purged) = retain_recent(records, local_now().date());
        let mut store = self.open_store()?;
        store.replace_manifest(&retained).map_err(storage_error)?;
        let snapshot_id = rebuild_snapshot_id(&retained);
        tracing::info!(received, retained = retained.len(), purged, %snapshot_id, "manifest rebuilt");
        Ok(RebuildSummary { received, retained: retained.len(), purged, snapshot_id })
    }

    /// # Errors
    /// Returns [`TrackError::Storage`] when the manifest cannot be read.
    pub fn manifest_list(&self) -> Result<Vec<TrackingRecord>, TrackError> {
        self.open_store()?.list_manifest().map_err(storage_error)
    }

    /// # Errors
    /// Returns [`TrackError::Storage`] when the store is unreadable.
    pub fn list_packages(&self) -> Result<Vec<Package>, TrackError> {
        self.open_store()?.list_packages().map_err(storage_error)
    }

    /// Register one expected package.
    ///
    /// # Errors
    /// Returns [`TrackError::Validation`] when order number or supplier is
    /// blank, or [`TrackError::Storage`] when the insert fails.
    pub fn add_package(&self, request: &AddPackageRequest) -> Result<Package, TrackError> {
        if request.order_number.trim().is_empty() {
            return Err(TrackError::Validation("order_number is required".to_string()));
        }
        if request.supplier.trim().is_empty() {
            return Err(TrackError::Validation("supplier is required".to_string()));
        }
        self.open_store()?
            .add_package(
                request.order_number.trim(),
                request.supplier.trim(),
                request.description.trim(),
                request.expected_date.trim(),
            )
            .map_err(storage_error)
    }

    /// Mark one package received; one-way.
    ///
    /// # Errors
    /// Returns [`TrackError::Validation`] when `received_by` is blank,
    /// [`TrackError::NotFoundRecord`] for an unknown id, or
    /// [`TrackError::Storage`] when the update fails.
    pub fn receive_package(&self, id: &str, request: &ReceivePackageRequest) -> Result<Package, TrackError> {
        if request.received_by.trim().is_empty() {
            return Err(TrackError::Validation("received_by is required".to_string()));
        }
        self.open_store()?
            .confirm_package(id, request.received_by.trim(), request.notes.as_deref(), &today_iso())
            .map_err(storage_error)?
            .ok_or_else(|| TrackError::NotFoundRecord(id.to_string()))
    }

    /// Flip past-due pending packages to overdue; returns the update count.
    ///
    /// # Errors
    /// Returns [`TrackError::Storage`] when the update fails.
    pub fn mark_overdue_packages(&self) -> Result<usize, TrackError> {
        self.open_store()?.mark_overdue(&today_iso()).map_err(storage_error)
    }
}

fn fetch_live(
    client: &(dyn CarrierClient + Send + Sync),
    query: &str,
) -> (Option<LiveTrackingResult>, LiveStatus) {
    if !client.is_configured() {
        return (None, LiveStatus::NotConfigured);
    }
    match client.track(query.trim()) {
        Ok(live) => (live, LiveStatus::Ok),
        Err(err) => {
            tracing::warn!(
                carrier = client.carrier().as_str(),
                error = %err,
                "live fetch failed, returning local baseline only"
            );
            (None, LiveStatus::Degraded(err.to_string()))
        }
    }
}

fn storage_error(err: anyhow::Error) -> TrackError {
    TrackError::Storage(format!("{err:#}"))
}

/// Server-local time, falling back to UTC when the local offset is
/// indeterminable. Calendar-day logic is best effort by design.
fn local_now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

fn format_date(date: Date, separator: &str) -> String {
    format!(
        "{:04}{separator}{:02}{separator}{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

fn today_yyyymmdd() -> String {
    format_date(local_now().date(), "")
}

fn today_iso() -> String {
    format_date(local_now().date(), "-")
}

fn rebuild_snapshot_id(retained: &[TrackingRecord]) -> String {
    let mut hasher = Sha256::new();
    for record in retained {
        hasher.update(record.tracking.as_bytes());
        hasher.update(record.added_date.as_bytes());
        hasher.update(record.ship_date.as_bytes());
    }
    let digest = hasher.finalize();
    let digest_hex = format!("{digest:x}");
    format!("reb_{}", &digest_hex[..16])
}
