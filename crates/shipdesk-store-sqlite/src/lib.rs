use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use shipdesk_core::manifest::TrackingRecord;
use shipdesk_core::{
    dedup_latest, is_past_due, next_package_id, Confirmation, Direction, Package, PackageStatus,
    ScanRecord, StoreStats,
};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, UtcOffset};
use ulid::Ulid;

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS scan_events (
  rowid INTEGER PRIMARY KEY AUTOINCREMENT,
  scan_id TEXT NOT NULL,
  batch_id TEXT NOT NULL,
  timestamp TEXT NOT NULL,
  tracking TEXT NOT NULL,
  po_number TEXT NOT NULL,
  customer TEXT NOT NULL,
  due_date TEXT NOT NULL,
  status TEXT NOT NULL,
  direction TEXT NOT NULL CHECK (direction IN ('inbound','outbound'))
);

CREATE TABLE IF NOT EXISTS confirmations (
  scan_id TEXT PRIMARY KEY,
  confirmed INTEGER NOT NULL,
  confirmed_by TEXT NOT NULL,
  confirmed_at TEXT NOT NULL,
  notes TEXT
);

CREATE TABLE IF NOT EXISTS packages (
  id TEXT PRIMARY KEY,
  order_number TEXT NOT NULL,
  supplier TEXT NOT NULL,
  description TEXT NOT NULL,
  expected_date TEXT NOT NULL,
  status TEXT NOT NULL CHECK (status IN ('pending','overdue','received')),
  received_date TEXT,
  received_by TEXT,
  notes TEXT
);

CREATE TABLE IF NOT EXISTS manifest_records (
  rowid INTEGER PRIMARY KEY AUTOINCREMENT,
  record_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_scan_events_tracking ON scan_events(tracking);
CREATE INDEX IF NOT EXISTS idx_scan_events_timestamp ON scan_events(timestamp);
CREATE INDEX IF NOT EXISTS idx_scan_events_direction ON scan_events(direction);
";

/// Outcome of one CSV ingestion batch. Bad rows are skipped and counted,
/// never fatal for the batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestSummary {
    pub batch_id: String,
    pub ingested: usize,
    pub skipped: usize,
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open a SQLite-backed shipment store and configure runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot
    /// be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Apply all forward migrations up to the latest schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;
        if version == 0 {
            self.conn.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
            record_schema_version(&self.conn, 1)?;
            version = 1;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    /// Ingest one delimited scan log: rows of
    /// `timestamp, tracking, poNumber, customer, dueDate, status`.
    /// Rows with an empty tracking value or the status literal `Not Found`
    /// are excluded, as are rows whose timestamp cannot be parsed.
    ///
    /// # Errors
    /// Returns an error only when the batch itself cannot be read or written;
    /// per-row problems are reported as skip counts.
    pub fn ingest_scan_csv<R: Read>(
        &mut self,
        reader: R,
        direction: Direction,
    ) -> Result<IngestSummary> {
        let batch_id = Ulid::new().to_string();
        let mut csv_reader = csv::ReaderBuilder::new().has_headers(true).flexible(true).from_reader(reader);

        let tx = self.conn.transaction().context("failed to start ingest transaction")?;
        let mut ingested = 0_usize;
        let mut skipped = 0_usize;

        for row in csv_reader.records() {
            let Ok(row) = row else {
                skipped += 1;
                continue;
            };
            let field = |index: usize| row.get(index).unwrap_or("").trim().to_string();
            let timestamp_raw = field(0);
            let tracking = field(1);
            let po_number = field(2);
            let customer = field(3);
            let due_date = field(4);
            let status = field(5);

            if tracking.is_empty() || status == "Not Found" {
                skipped += 1;
                continue;
            }
            let Some(timestamp) = parse_scan_timestamp(&timestamp_raw) else {
                skipped += 1;
                continue;
            };

            tx.execute(
                "INSERT INTO scan_events(
                    scan_id, batch_id, timestamp, tracking, po_number, customer,
                    due_date, status, direction
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    ScanRecord::composite_id(&tracking, &po_number),
                    batch_id,
                    rfc3339(timestamp)?,
                    tracking,
                    po_number,
                    customer,
                    due_date,
                    status,
                    direction.as_str(),
                ],
            )
            .context("failed to insert scan event")?;
            ingested += 1;
        }

        tx.commit().context("failed to commit ingest transaction")?;
        Ok(IngestSummary { batch_id, ingested, skipped })
    }

    /// Load every raw scan event with the confirmation overlay applied.
    /// Callers that need the surfaced (one-per-tracking) view run the result
    /// through [`shipdesk_core::dedup_latest`].
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn load_scan_events(&self) -> Result<Vec<ScanRecord>> {
        let overlays = self.load_confirmations()?;
        let mut stmt = self.conn.prepare(
            "SELECT scan_id, timestamp, tracking, po_number, customer, due_date, status, direction
             FROM scan_events
             ORDER BY timestamp DESC, rowid DESC",
        )?;

        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let direction_raw: String = row.get(7)?;
            let direction = Direction::parse(&direction_raw)
                .ok_or_else(|| anyhow!("unknown scan direction: {direction_raw}"))?;
            let mut record = ScanRecord {
                id: row.get(0)?,
                timestamp: parse_rfc3339(&row.get::<_, String>(1)?)?,
                tracking: row.get(2)?,
                po_number: row.get(3)?,
                customer: row.get(4)?,
                due_date: row.get(5)?,
                status: row.get(6)?,
                direction,
                confirmed: false,
                confirmed_by: None,
                confirmed_at: None,
                notes: None,
            };
            if let Some(overlay) = overlays.get(&record.id) {
                record.apply_overlay(overlay);
            }
            records.push(record);
        }

        Ok(records)
    }

    /// The surfaced view: one record per tracking number, latest first.
    ///
    /// # Errors
    /// Returns an error when the scan log cannot be read.
    pub fn surfaced_records(&self) -> Result<Vec<ScanRecord>> {
        Ok(dedup_latest(self.load_scan_events()?))
    }

    /// The most recent surfaced records for one direction.
    ///
    /// # Errors
    /// Returns an error when the scan log cannot be read.
    pub fn recent(&self, direction: Direction, limit: usize) -> Result<Vec<ScanRecord>> {
        let mut records = self.surfaced_records()?;
        records.retain(|record| record.direction == direction);
        records.truncate(limit);
        Ok(records)
    }

    /// Aggregate counters over the surfaced view. `today_scans` counts
    /// records whose timestamp falls on `local_today` in the server's local
    /// offset; best effort, not an audit-grade metric.
    ///
    /// # Errors
    /// Returns an error when the scan log cannot be read.
    pub fn stats(&self, local_today: Date, local_offset: UtcOffset) -> Result<StoreStats> {
        let surfaced = self.surfaced_records()?;
        let confirmed = surfaced.iter().filter(|record| record.confirmed).count();
        let today_scans = surfaced
            .iter()
            .filter(|record| record.timestamp.to_offset(local_offset).date() == local_today)
            .count();
        Ok(StoreStats {
            total: surfaced.len(),
            confirmed,
            pending: surfaced.len() - confirmed,
            today_scans,
        })
    }

    fn load_confirmations(&self) -> Result<BTreeMap<String, Confirmation>> {
        let mut stmt = self.conn.prepare(
            "SELECT scan_id, confirmed, confirmed_by, confirmed_at, notes FROM confirmations",
        )?;
        let mut rows = stmt.query([])?;
        let mut overlays = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let scan_id: String = row.get(0)?;
            overlays.insert(
                scan_id,
                Confirmation {
                    confirmed: row.get::<_, i64>(1)? != 0,
                    confirmed_by: row.get(2)?,
                    confirmed_at: parse_rfc3339(&row.get::<_, String>(3)?)?,
                    notes: row.get(4)?,
                },
            );
        }
        Ok(overlays)
    }

    /// Replace the confirmation overlay entry for one scan id. The write is
    /// a single-row `INSERT OR REPLACE` inside a transaction, so concurrent
    /// confirmations for the same id resolve to one submitted state, never
    /// a merged corruption. Returns the updated surfaced record, or `None`
    /// when no scan event carries that id. Validation of `confirmed_by`
    /// happens at the API boundary, before this is called.
    ///
    /// # Errors
    /// Returns an error when the overlay write fails.
    pub fn confirm(
        &mut self,
        scan_id: &str,
        confirmed_by: &str,
        notes: Option<&str>,
        confirmed_at: OffsetDateTime,
    ) -> Result<Option<ScanRecord>> {
        let exists: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM scan_events WHERE scan_id = ?1 LIMIT 1",
                params![scan_id],
                |row| row.get(0),
            )
            .optional()
            .context("failed to check scan id")?;
        if exists.is_none() {
            return Ok(None);
        }

        let tx = self.conn.transaction().context("failed to start confirm transaction")?;
        tx.execute(
            "INSERT OR REPLACE INTO confirmations(scan_id, confirmed, confirmed_by, confirmed_at, notes)
             VALUES (?1, 1, ?2, ?3, ?4)",
            params![scan_id, confirmed_by, rfc3339(confirmed_at)?, notes],
        )
        .context("failed to write confirmation overlay")?;
        tx.commit().context("failed to commit confirmation")?;

        // The surfaced view can suppress this id behind a newer event for the
        // same tracking number; fall back to the raw log in that case.
        let record = match self.surfaced_records()?.into_iter().find(|record| record.id == scan_id) {
            Some(record) => Some(record),
            None => self.load_scan_events()?.into_iter().find(|record| record.id == scan_id),
        };
        Ok(record)
    }

    // ------------------------------------------------------------------
    // Packages
    // ------------------------------------------------------------------

    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_packages(&self) -> Result<Vec<Package>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, order_number, supplier, description, expected_date, status,
                    received_date, received_by, notes
             FROM packages
             ORDER BY CAST(id AS INTEGER) ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut packages = Vec::new();
        while let Some(row) = rows.next()? {
            let status_raw: String = row.get(5)?;
            packages.push(Package {
                id: row.get(0)?,
                order_number: row.get(1)?,
                supplier: row.get(2)?,
                description: row.get(3)?,
                expected_date: row.get(4)?,
                status: PackageStatus::parse(&status_raw)
                    .ok_or_else(|| anyhow!("unknown package status: {status_raw}"))?,
                received_date: row.get(6)?,
                received_by: row.get(7)?,
                notes: row.get(8)?,
            });
        }
        Ok(packages)
    }

    /// Register one expected purchase-order package. The id comes from
    /// [`shipdesk_core::next_package_id`] over the current registry, so ids
    /// are sequential and never reused.
    ///
    /// # Errors
    /// Returns an error when the insert fails.
    pub fn add_package(
        &mut self,
        order_number: &str,
        supplier: &str,
        description: &str,
        expected_date: &str,
    ) -> Result<Package> {
        let package = Package {
            id: next_package_id(&self.list_packages()?),
            order_number: order_number.to_string(),
            supplier: supplier.to_string(),
            description: description.to_string(),
            expected_date: expected_date.to_string(),
            status: PackageStatus::Pending,
            received_date: None,
            received_by: None,
            notes: None,
        };
        self.conn
            .execute(
                "INSERT INTO packages(id, order_number, supplier, description, expected_date, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending')",
                params![package.id, package.order_number, package.supplier, package.description, package.expected_date],
            )
            .context("failed to insert package")?;
        Ok(package)
    }

    /// Mark a package received. One-way: a package already received keeps
    /// its original receipt fields. Returns `None` for an unknown id.
    ///
    /// # Errors
    /// Returns an error when the update fails.
    pub fn confirm_package(
        &mut self,
        id: &str,
        received_by: &str,
        notes: Option<&str>,
        received_date: &str,
    ) -> Result<Option<Package>> {
        self.conn
            .execute(
                "UPDATE packages
                 SET status = 'received', received_date = ?2, received_by = ?3, notes = ?4
                 WHERE id = ?1 AND status != 'received'",
                params![id, received_date, received_by, notes],
            )
            .context("failed to mark package received")?;

        Ok(self.list_packages()?.into_iter().find(|package| package.id == id))
    }

    /// Flip pending packages whose expected date is past `today` to overdue.
    /// Past-due is decided by [`shipdesk_core::is_past_due`], so a blank
    /// expected date never goes overdue. Returns the number of packages
    /// updated.
    ///
    /// # Errors
    /// Returns an error when the update fails.
    pub fn mark_overdue(&mut self, today: &str) -> Result<usize> {
        let overdue_ids = self
            .list_packages()?
            .into_iter()
            .filter(|package| {
                package.status == PackageStatus::Pending && is_past_due(&package.expected_date, today)
            })
            .map(|package| package.id)
            .collect::<Vec<_>>();

        let tx = self.conn.transaction().context("failed to start overdue transaction")?;
        for id in &overdue_ids {
            tx.execute(
                "UPDATE packages SET status = 'overdue' WHERE id = ?1 AND status = 'pending'",
                params![id],
            )
            .context("failed to mark overdue package")?;
        }
        tx.commit().context("failed to commit overdue update")?;
        Ok(overdue_ids.len())
    }

    // ------------------------------------------------------------------
    // Manifest records
    // ------------------------------------------------------------------

    /// Replace the whole manifest collection in one transaction: the delete
    /// and inserts stage together and the commit is the swap, so a reader
    /// never observes a partially-written rebuild.
    ///
    /// # Errors
    /// Returns an error when serialization or the transaction fails.
    pub fn replace_manifest(&mut self, records: &[TrackingRecord]) -> Result<usize> {
        let tx = self.conn.transaction().context("failed to start manifest transaction")?;
        tx.execute("DELETE FROM manifest_records", [])
            .context("failed to clear manifest records")?;
        for record in records {
            tx.execute(
                "INSERT INTO manifest_records(record_json) VALUES (?1)",
                params![serde_json::to_string(record).context("failed to serialize manifest record")?],
            )
            .context("failed to insert manifest record")?;
        }
        tx.commit().context("failed to commit manifest rebuild")?;
        Ok(records.len())
    }

    /// Load manifest records in insertion order.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_manifest(&self) -> Result<Vec<TrackingRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT record_json FROM manifest_records ORDER BY rowid ASC")?;
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let json: String = row.get(0)?;
            records.push(
                serde_json::from_str(&json).context("failed to deserialize manifest record")?,
            );
        }
        Ok(records)
    }
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version: Option<i64> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
        .optional()
        .context("failed to read schema version")?
        .flatten();
    Ok(version.unwrap_or(0))
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, rfc3339(OffsetDateTime::now_utc())?],
    )
    .context("failed to record schema version")?;
    Ok(())
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value.format(&Rfc3339).context("failed to format timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &Rfc3339)
        .with_context(|| format!("invalid stored timestamp: {value}"))
}

/// Parse a scan-log timestamp. The capture tools write a few shapes; all are
/// treated as UTC when no offset is present.
#[must_use]
pub fn parse_scan_timestamp(value: &str) -> Option<OffsetDateTime> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(parsed) = OffsetDateTime::parse(trimmed, &Rfc3339) {
        return Some(parsed);
    }
    let seconds = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    if let Ok(parsed) = PrimitiveDateTime::parse(trimmed, &seconds) {
        return Some(parsed.assume_utc());
    }
    let minutes = format_description!("[year]-[month]-[day] [hour]:[minute]");
    if let Ok(parsed) = PrimitiveDateTime::parse(trimmed, &minutes) {
        return Some(parsed.assume_utc());
    }
    let date_only = format_description!("[year]-[month]-[day]");
    if let Ok(parsed) = Date::parse(trimmed, &date_only) {
        return Some(parsed.midnight().assume_utc());
    }
    None
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("shipdesk-store-{}.sqlite3", Ulid::new()))
    }

    fn open_migrated() -> (SqliteStore, PathBuf) {
        let path = unique_temp_db_path();
        let mut store = match SqliteStore::open(&path) {
            Ok(store) => store,
            Err(err) => panic!("store should open: {err}"),
        };
        if let Err(err) = store.migrate() {
            panic!("store should migrate: {err}");
        }
        (store, path)
    }

    const SCAN_CSV: &str = "\
timestamp,tracking,poNumber,customer,dueDate,status
2024-01-15 08:30:00,1Z90A10R0307440981,PO-100,Acme,2024-01-20,In Transit
2024-01-15 09:45:00,1Z90A10R0307440981,PO-100,Acme,2024-01-20,Out For Delivery
2024-01-15 10:00:00,123456789012,PO-200,Globex,2024-01-22,In Transit
2024-01-15 10:05:00,,PO-300,NoTracking,2024-01-22,In Transit
2024-01-15 10:06:00,1Z90A10R0307440999,PO-400,Missing,2024-01-22,Not Found
";

    #[test]
    fn ingest_skips_empty_tracking_and_not_found_rows() -> Result<()> {
        let (mut store, path) = open_migrated();
        let summary = store.ingest_scan_csv(SCAN_CSV.as_bytes(), Direction::Inbound)?;
        assert_eq!(summary.ingested, 3);
        assert_eq!(summary.skipped, 2);
        let _ = std::fs::remove_file(&path);
        Ok(())
    }

    #[test]
    fn surfaced_records_dedup_to_latest_per_tracking() -> Result<()> {
        let (mut store, path) = open_migrated();
        store.ingest_scan_csv(SCAN_CSV.as_bytes(), Direction::Inbound)?;

        let surfaced = store.surfaced_records()?;
        assert_eq!(surfaced.len(), 2);
        assert_eq!(surfaced[0].tracking, "123456789012");
        assert_eq!(surfaced[1].tracking, "1Z90A10R0307440981");
        assert_eq!(surfaced[1].status, "Out For Delivery");

        let _ = std::fs::remove_file(&path);
        Ok(())
    }

    #[test]
    fn confirm_writes_overlay_and_survives_reingest() -> Result<()> {
        let (mut store, path) = open_migrated();
        store.ingest_scan_csv(SCAN_CSV.as_bytes(), Direction::Inbound)?;

        let scan_id = ScanRecord::composite_id("1Z90A10R0307440981", "PO-100");
        let confirmed = store.confirm(&scan_id, "huy", Some("dock 3"), OffsetDateTime::now_utc())?;
        let Some(confirmed) = confirmed else { panic!("confirm should find the scan") };
        assert!(confirmed.confirmed);
        assert_eq!(confirmed.confirmed_by.as_deref(), Some("huy"));

        // Re-ingesting the raw log must not erase the overlay.
        store.ingest_scan_csv(SCAN_CSV.as_bytes(), Direction::Inbound)?;
        let surfaced = store.surfaced_records()?;
        let record = surfaced.iter().find(|record| record.id == scan_id);
        let Some(record) = record else { panic!("record should still surface") };
        assert!(record.confirmed);

        let _ = std::fs::remove_file(&path);
        Ok(())
    }

    #[test]
    fn confirm_unknown_id_returns_none() -> Result<()> {
        let (mut store, path) = open_migrated();
        store.ingest_scan_csv(SCAN_CSV.as_bytes(), Direction::Inbound)?;
        let result = store.confirm("nope+nothing", "huy", None, OffsetDateTime::now_utc())?;
        assert!(result.is_none());
        let _ = std::fs::remove_file(&path);
        Ok(())
    }

    #[test]
    fn recent_filters_by_direction_and_limits() -> Result<()> {
        let (mut store, path) = open_migrated();
        store.ingest_scan_csv(SCAN_CSV.as_bytes(), Direction::Inbound)?;
        let outbound_csv = "timestamp,tracking,poNumber,customer,dueDate,status\n\
                            2024-01-15 11:00:00,1Z90A10R0307441000,PO-500,Initech,2024-01-25,Shipped\n";
        store.ingest_scan_csv(outbound_csv.as_bytes(), Direction::Outbound)?;

        let inbound = store.recent(Direction::Inbound, 1)?;
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].tracking, "123456789012");

        let outbound = store.recent(Direction::Outbound, 10)?;
        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0].direction, Direction::Outbound);

        let _ = std::fs::remove_file(&path);
        Ok(())
    }

    #[test]
    fn package_ids_are_sequential_and_receipt_is_one_way() -> Result<()> {
        let (mut store, path) = open_migrated();
        let first = store.add_package("ORD-1", "S&S", "tees", "2024-01-20")?;
        let second = store.add_package("ORD-2", "Sanmar", "hoodies", "2024-01-21")?;
        assert_eq!(first.id, "1");
        assert_eq!(second.id, "2");

        let received = store.confirm_package("1", "huy", Some("all good"), "2024-01-19")?;
        let Some(received) = received else { panic!("package 1 should exist") };
        assert_eq!(received.status, PackageStatus::Received);
        assert_eq!(received.received_by.as_deref(), Some("huy"));

        // A second confirmation does not overwrite the original receipt.
        let again = store.confirm_package("1", "someone-else", None, "2024-01-25")?;
        let Some(again) = again else { panic!("package 1 should exist") };
        assert_eq!(again.received_by.as_deref(), Some("huy"));
        assert_eq!(again.received_date.as_deref(), Some("2024-01-19"));

        let _ = std::fs::remove_file(&path);
        Ok(())
    }

    #[test]
    fn mark_overdue_flips_past_due_pending_packages() -> Result<()> {
        let (mut store, path) = open_migrated();
        store.add_package("ORD-1", "S&S", "tees", "2024-01-10")?;
        store.add_package("ORD-2", "Sanmar", "hoodies", "2024-01-20")?;

        let updated = store.mark_overdue("2024-01-15")?;
        assert_eq!(updated, 1);
        let packages = store.list_packages()?;
        assert_eq!(packages[0].status, PackageStatus::Overdue);
        assert_eq!(packages[1].status, PackageStatus::Pending);

        let _ = std::fs::remove_file(&path);
        Ok(())
    }

    #[test]
    fn mark_overdue_leaves_blank_expected_dates_pending() -> Result<()> {
        let (mut store, path) = open_migrated();
        store.add_package("ORD-1", "S&S", "tees", "")?;
        store.add_package("ORD-2", "Sanmar", "hoodies", "2024-01-10")?;

        let updated = store.mark_overdue("2024-01-15")?;
        assert_eq!(updated, 1);
        let packages = store.list_packages()?;
        assert_eq!(packages[0].status, PackageStatus::Pending);
        assert_eq!(packages[1].status, PackageStatus::Overdue);

        let _ = std::fs::remove_file(&path);
        Ok(())
    }

    #[test]
    fn manifest_replace_is_a_full_swap() -> Result<()> {
        let (mut store, path) = open_migrated();
        let mk = |tracking: &str| TrackingRecord {
            tracking: tracking.to_string(),
            added_date: "2024-01-15".to_string(),
            ..TrackingRecord::default()
        };
        store.replace_manifest(&[mk("1Z90A10R0307440981"), mk("123456789012")])?;
        assert_eq!(store.list_manifest()?.len(), 2);

        store.replace_manifest(&[mk("1Z90A10R0307440999")])?;
        let records = store.list_manifest()?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tracking, "1Z90A10R0307440999");

        let _ = std::fs::remove_file(&path);
        Ok(())
    }

    #[test]
    fn stats_count_surfaced_records_and_today_scans() -> Result<()> {
        let (mut store, path) = open_migrated();
        store.ingest_scan_csv(SCAN_CSV.as_bytes(), Direction::Inbound)?;
        let scan_id = ScanRecord::composite_id("1Z90A10R0307440981", "PO-100");
        store.confirm(&scan_id, "huy", None, OffsetDateTime::now_utc())?;

        let on_day = match Date::from_calendar_date(2024, time::Month::January, 15) {
            Ok(date) => date,
            Err(err) => panic!("fixture date should build: {err}"),
        };
        let stats = store.stats(on_day, UtcOffset::UTC)?;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.confirmed, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.today_scans, 2);

        let off_day = match Date::from_calendar_date(2024, time::Month::February, 1) {
            Ok(date) => date,
            Err(err) => panic!("fixture date should build: {err}"),
        };
        let stats = store.stats(off_day, UtcOffset::UTC)?;
        assert_eq!(stats.today_scans, 0);

        let _ = std::fs::remove_file(&path);
        Ok(())
    }

    #[test]
    fn scan_timestamp_accepts_capture_tool_shapes() {
        assert!(parse_scan_timestamp("2024-01-15 08:30:00").is_some());
        assert!(parse_scan_timestamp("2024-01-15 08:30").is_some());
        assert!(parse_scan_timestamp("2024-01-15").is_some());
        assert!(parse_scan_timestamp("2024-01-15T08:30:00Z").is_some());
        assert!(parse_scan_timestamp("yesterday").is_none());
        assert!(parse_scan_timestamp("").is_none());
    }
}
