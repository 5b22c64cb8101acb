use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::analyzer::TicketAnalysis;

pub const AUDIT_SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

/// One persisted analysis, keyed by `file_path`.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    pub file_path: String,
    pub ticket_number: String,
    pub variant: String,
    /// `YYYY-MM` folder the scan came from.
    pub month: String,
    pub raw_ocr_text: String,
    pub technician_name: String,
    pub technician_role: Option<String>,
    pub name_confidence: f64,
    pub has_signature: bool,
    pub signature_confidence: f64,
    pub ink_density: f64,
    pub processed_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn from_analysis(analysis: &TicketAnalysis, month: &str, processed_at: DateTime<Utc>) -> Self {
        Self {
            file_path: analysis.file_path.to_string_lossy().into_owned(),
            ticket_number: analysis.ticket_number.clone(),
            variant: analysis.variant.clone(),
            month: month.to_string(),
            raw_ocr_text: analysis.raw_ocr_text.clone(),
            technician_name: analysis.technician_name.clone(),
            technician_role: analysis.technician_role.clone(),
            name_confidence: analysis.name_confidence,
            has_signature: analysis.has_signature,
            signature_confidence: analysis.signature_confidence,
            ink_density: analysis.ink_density,
            processed_at,
        }
    }
}

/// Signed/missing counts for one group of tickets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignatureCounts {
    pub total: u64,
    pub signed: u64,
}

impl SignatureCounts {
    pub fn missing(&self) -> u64 {
        self.total.saturating_sub(self.signed)
    }

    /// `signed / total`; `None` when there is nothing to divide by.
    pub fn rate(&self) -> Option<f64> {
        (self.total > 0).then(|| self.signed as f64 / self.total as f64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TechnicianStats {
    pub technician: String,
    pub counts: SignatureCounts,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonthStats {
    pub month: String,
    pub counts: SignatureCounts,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrossTabCell {
    pub month: String,
    pub technician: String,
    pub counts: SignatureCounts,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TotalStats {
    pub counts: SignatureCounts,
    pub technicians: u64,
    pub months: u64,
}

/// Where audit results live.
///
/// Writes are single-row and atomic: `upsert` either fully replaces the row
/// for a file or leaves the store untouched. Aggregates are computed at read
/// time from whatever rows are committed.
pub trait AuditStore {
    fn upsert(&self, record: &AuditRecord) -> Result<(), StorageError>;
    /// Remove every record tagged with `month`. Returns the number removed.
    fn clear_month(&self, month: &str) -> Result<usize, StorageError>;
    fn processed_paths(&self) -> Result<HashSet<String>, StorageError>;
    fn records_for_month(&self, month: &str) -> Result<Vec<AuditRecord>, StorageError>;
    fn records_for_technician(&self, technician: &str) -> Result<Vec<AuditRecord>, StorageError>;
    /// Lowest signature rate first, so problem technicians lead the report.
    fn query_by_technician(&self) -> Result<Vec<TechnicianStats>, StorageError>;
    fn query_by_month(&self) -> Result<Vec<MonthStats>, StorageError>;
    fn query_cross_tab(&self) -> Result<Vec<CrossTabCell>, StorageError>;
    fn query_totals(&self) -> Result<TotalStats, StorageError>;
}

pub struct SqliteAuditStore {
    conn: Connection,
}

impl SqliteAuditStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        let current = self.schema_version()?;
        if current > AUDIT_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: AUDIT_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_audit_records.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
        }

        Ok(())
    }

    fn select_records(&self, filter: &str, value: &str) -> Result<Vec<AuditRecord>, StorageError> {
        let sql = format!(
            "SELECT file_path, ticket_number, variant, month, raw_ocr_text, technician_name,
                    technician_role, name_confidence, has_signature, signature_confidence,
                    ink_density, processed_at
             FROM audit_records
             WHERE {filter} = ?1
             ORDER BY month, ticket_number, variant"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![value], raw_record)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_record()?);
        }
        Ok(out)
    }
}

const SIGNED: &str = "SUM(CASE WHEN has_signature = 1 THEN 1 ELSE 0 END)";

impl AuditStore for SqliteAuditStore {
    fn upsert(&self, record: &AuditRecord) -> Result<(), StorageError> {
        self.conn.execute(
            "
            INSERT INTO audit_records (
                file_path,
                ticket_number,
                variant,
                month,
                raw_ocr_text,
                technician_name,
                technician_role,
                name_confidence,
                has_signature,
                signature_confidence,
                ink_density,
                processed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(file_path) DO UPDATE SET
                ticket_number=excluded.ticket_number,
                variant=excluded.variant,
                month=excluded.month,
                raw_ocr_text=excluded.raw_ocr_text,
                technician_name=excluded.technician_name,
                technician_role=excluded.technician_role,
                name_confidence=excluded.name_confidence,
                has_signature=excluded.has_signature,
                signature_confidence=excluded.signature_confidence,
                ink_density=excluded.ink_density,
                processed_at=excluded.processed_at
            ",
            params![
                record.file_path,
                record.ticket_number,
                record.variant,
                record.month,
                record.raw_ocr_text,
                record.technician_name,
                record.technician_role,
                record.name_confidence,
                record.has_signature,
                record.signature_confidence,
                record.ink_density,
                record.processed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn clear_month(&self, month: &str) -> Result<usize, StorageError> {
        Ok(self
            .conn
            .execute("DELETE FROM audit_records WHERE month = ?1", params![month])?)
    }

    fn processed_paths(&self) -> Result<HashSet<String>, StorageError> {
        let mut stmt = self.conn.prepare("SELECT file_path FROM audit_records")?;
        let paths = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(paths)
    }

    fn records_for_month(&self, month: &str) -> Result<Vec<AuditRecord>, StorageError> {
        self.select_records("month", month)
    }

    fn records_for_technician(&self, technician: &str) -> Result<Vec<AuditRecord>, StorageError> {
        self.select_records("technician_name", technician)
    }

    fn query_by_technician(&self) -> Result<Vec<TechnicianStats>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT technician_name, COUNT(*), {SIGNED}
             FROM audit_records
             GROUP BY technician_name
             ORDER BY CAST({SIGNED} AS REAL) / COUNT(*), technician_name"
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok(TechnicianStats {
                technician: row.get(0)?,
                counts: counts_at(row, 1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn query_by_month(&self) -> Result<Vec<MonthStats>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT month, COUNT(*), {SIGNED}
             FROM audit_records
             GROUP BY month
             ORDER BY month"
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok(MonthStats {
                month: row.get(0)?,
                counts: counts_at(row, 1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn query_cross_tab(&self) -> Result<Vec<CrossTabCell>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT month, technician_name, COUNT(*), {SIGNED}
             FROM audit_records
             GROUP BY month, technician_name
             ORDER BY month, technician_name"
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok(CrossTabCell {
                month: row.get(0)?,
                technician: row.get(1)?,
                counts: counts_at(row, 2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn query_totals(&self) -> Result<TotalStats, StorageError> {
        Ok(self.conn.query_row(
            &format!(
                "SELECT COUNT(*), COALESCE({SIGNED}, 0),
                        COUNT(DISTINCT technician_name), COUNT(DISTINCT month)
                 FROM audit_records"
            ),
            [],
            |row| {
                Ok(TotalStats {
                    counts: counts_at(row, 0)?,
                    technicians: row.get::<_, i64>(2)?.max(0) as u64,
                    months: row.get::<_, i64>(3)?.max(0) as u64,
                })
            },
        )?)
    }
}

/// `COUNT(*)` at `idx`, signed-sum at `idx + 1`.
fn counts_at(row: &Row, idx: usize) -> rusqlite::Result<SignatureCounts> {
    let total: i64 = row.get(idx)?;
    let signed: Option<i64> = row.get(idx + 1)?;
    Ok(SignatureCounts {
        total: total.max(0) as u64,
        signed: signed.unwrap_or(0).max(0) as u64,
    })
}

/// Row as read from SQLite, before the timestamp is parsed.
struct RawRecord {
    record: AuditRecord,
    processed_at: String,
}

impl RawRecord {
    fn into_record(self) -> Result<AuditRecord, StorageError> {
        let processed_at = DateTime::parse_from_rfc3339(&self.processed_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|err| StorageError::Timestamp(format!("{}: {err}", self.processed_at)))?;
        Ok(AuditRecord { processed_at, ..self.record })
    }
}

fn raw_record(row: &Row) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        record: AuditRecord {
            file_path: row.get(0)?,
            ticket_number: row.get(1)?,
            variant: row.get(2)?,
            month: row.get(3)?,
            raw_ocr_text: row.get(4)?,
            technician_name: row.get(5)?,
            technician_role: row.get(6)?,
            name_confidence: row.get(7)?,
            has_signature: row.get(8)?,
            signature_confidence: row.get(9)?,
            ink_density: row.get(10)?,
            processed_at: DateTime::<Utc>::MIN_UTC,
        },
        processed_at: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::NamedTempFile;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 3, 9, 30, 0)
            .single()
            .expect("valid timestamp")
    }

    fn record(path: &str, month: &str, tech: &str, signed: bool) -> AuditRecord {
        let name = Path::new(path).file_stem().unwrap().to_str().unwrap();
        let (number, variant) = name.split_at(name.len() - 1);
        AuditRecord {
            file_path: path.to_string(),
            ticket_number: number.to_string(),
            variant: variant.to_string(),
            month: month.to_string(),
            raw_ocr_text: format!("by {tech} Tech"),
            technician_name: tech.to_string(),
            technician_role: Some("Tech".to_string()),
            name_confidence: 1.0,
            has_signature: signed,
            signature_confidence: if signed { 0.8 } else { 0.92 },
            ink_density: if signed { 0.05 } else { 0.0 },
            processed_at: ts(),
        }
    }

    fn seeded() -> SqliteAuditStore {
        let store = SqliteAuditStore::open_in_memory().expect("open store");
        for r in [
            record("/t/2026-01/1a.png", "2026-01", "Darren B", true),
            record("/t/2026-01/1b.png", "2026-01", "Darren B", false),
            record("/t/2026-01/2a.png", "2026-01", "Koby H", true),
            record("/t/2026-02/3a.png", "2026-02", "Darren B", true),
            record("/t/2026-02/4a.png", "2026-02", "UNKNOWN", false),
        ] {
            store.upsert(&r).expect("upsert");
        }
        store
    }

    #[test]
    fn migrate_sets_schema_version() {
        let store = SqliteAuditStore::open_in_memory().expect("open store");
        assert_eq!(store.schema_version().expect("version"), AUDIT_SCHEMA_VERSION);
        store.migrate().expect("second migrate is a no-op");
    }

    #[test]
    fn newer_schema_is_refused() {
        let file = NamedTempFile::new().expect("temp db");
        {
            let conn = Connection::open(file.path()).expect("open raw");
            conn.execute("PRAGMA user_version = 9", []).expect("bump version");
        }
        let err = SqliteAuditStore::open(file.path()).err().expect("should refuse");
        assert!(matches!(err, StorageError::UnsupportedSchemaVersion { found: 9, .. }));
    }

    #[test]
    fn upsert_is_idempotent_per_path() {
        let store = SqliteAuditStore::open_in_memory().expect("open store");
        let r = record("/t/2026-01/1a.png", "2026-01", "Darren B", true);
        store.upsert(&r).expect("first");
        store.upsert(&r).expect("second");
        assert_eq!(store.records_for_month("2026-01").expect("records").len(), 1);
    }

    #[test]
    fn upsert_replaces_every_field() {
        let store = SqliteAuditStore::open_in_memory().expect("open store");
        store
            .upsert(&record("/t/2026-01/1a.png", "2026-01", "Darren B", true))
            .expect("first");

        let mut replacement = record("/t/2026-01/1a.png", "2026-01", "Koby H", false);
        replacement.technician_role = None;
        store.upsert(&replacement).expect("second");

        let rows = store.records_for_month("2026-01").expect("records");
        assert_eq!(rows, vec![replacement]);
    }

    #[test]
    fn clear_month_is_scoped() {
        let store = seeded();
        assert_eq!(store.clear_month("2026-01").expect("clear"), 3);
        assert!(store.records_for_month("2026-01").expect("jan").is_empty());
        assert_eq!(store.records_for_month("2026-02").expect("feb").len(), 2);
        assert_eq!(store.clear_month("2025-07").expect("clear empty"), 0);
    }

    #[test]
    fn processed_paths_lists_stored_files() {
        let store = seeded();
        let paths = store.processed_paths().expect("paths");
        assert_eq!(paths.len(), 5);
        assert!(paths.contains("/t/2026-02/4a.png"));
    }

    #[test]
    fn aggregates_by_technician() {
        let rows = seeded().query_by_technician().expect("by tech");
        let darren = rows.iter().find(|r| r.technician == "Darren B").expect("darren");
        assert_eq!(darren.counts, SignatureCounts { total: 3, signed: 2 });
        assert_eq!(darren.counts.missing(), 1);
        assert!((darren.counts.rate().unwrap() - 2.0 / 3.0).abs() < 1e-12);

        let unknown = rows.iter().find(|r| r.technician == "UNKNOWN").expect("unknown");
        assert_eq!(unknown.counts.rate(), Some(0.0));
    }

    #[test]
    fn lowest_rate_technicians_come_first() {
        let rows = seeded().query_by_technician().expect("by tech");
        let names: Vec<&str> = rows.iter().map(|r| r.technician.as_str()).collect();
        assert_eq!(names, vec!["UNKNOWN", "Darren B", "Koby H"]);
    }

    #[test]
    fn records_for_technician_spans_months() {
        let records = seeded().records_for_technician("Darren B").expect("records");
        let paths: Vec<&str> = records.iter().map(|r| r.file_path.as_str()).collect();
        assert_eq!(paths, vec!["/t/2026-01/1a.png", "/t/2026-01/1b.png", "/t/2026-02/3a.png"]);
        assert!(seeded().records_for_technician("Nobody").expect("none").is_empty());
    }

    #[test]
    fn aggregates_by_month_and_cross_tab() {
        let store = seeded();
        let months = store.query_by_month().expect("by month");
        assert_eq!(
            months,
            vec![
                MonthStats { month: "2026-01".into(), counts: SignatureCounts { total: 3, signed: 2 } },
                MonthStats { month: "2026-02".into(), counts: SignatureCounts { total: 2, signed: 1 } },
            ]
        );

        let cells = store.query_cross_tab().expect("cross tab");
        assert_eq!(cells.len(), 4);
        assert_eq!(cells[0].month, "2026-01");
        assert_eq!(cells[0].technician, "Darren B");
        assert_eq!(cells[0].counts, SignatureCounts { total: 2, signed: 1 });
    }

    #[test]
    fn totals_on_empty_store_have_no_rate() {
        let store = SqliteAuditStore::open_in_memory().expect("open store");
        let totals = store.query_totals().expect("totals");
        assert_eq!(totals, TotalStats::default());
        assert_eq!(totals.counts.rate(), None);

        let totals = seeded().query_totals().expect("totals");
        assert_eq!(totals.counts, SignatureCounts { total: 5, signed: 3 });
        assert_eq!(totals.technicians, 3);
        assert_eq!(totals.months, 2);
    }

    #[test]
    fn zero_total_rate_is_not_applicable() {
        assert_eq!(SignatureCounts::default().rate(), None);
        assert_eq!(SignatureCounts::default().missing(), 0);
    }

    #[test]
    fn records_survive_reopen() {
        let file = NamedTempFile::new().expect("temp db");
        {
            let store = SqliteAuditStore::open(file.path()).expect("open");
            store
                .upsert(&record("/t/2026-01/9a.png", "2026-01", "Ky S", true))
                .expect("upsert");
        }
        let store = SqliteAuditStore::open(file.path()).expect("reopen");
        let rows = store.records_for_technician("Ky S").expect("records");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].processed_at, ts());
    }
}
