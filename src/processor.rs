use chrono::Utc;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use crate::analyzer::TicketAnalyzer;
use crate::scanner::{group_by_ticket, Month, ScanWindow, Scanner, TicketImage};
use crate::store::{AuditRecord, AuditStore, StorageError};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub months: Vec<Month>,
    /// Clear each month's stored records and analyze every file again.
    pub reprocess: bool,
    pub window: ScanWindow,
    /// Analyze only this many randomly chosen unprocessed files.
    /// Ignored together with `reprocess`, which must re-analyze everything it clears.
    pub sample: Option<usize>,
    /// Fixed seed for `sample`.
    pub seed: Option<u64>,
}

/// A file that could not be analyzed. The batch moved on without it.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// A month that could not be scanned.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedMonth {
    pub month: Month,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Ticket images found in the scanned months.
    pub found: usize,
    /// Distinct ticket numbers among them (variants of one ticket count once).
    pub tickets: usize,
    /// Analyzed and stored this run.
    pub processed: usize,
    pub signed: usize,
    /// Already in the store, left alone.
    pub skipped: usize,
    /// Records removed by `reprocess` before re-analysis.
    pub cleared: usize,
    pub failed: Vec<FailedFile>,
    pub failed_months: Vec<FailedMonth>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run summary")?;
        writeln!(f, "  Found: {} images across {} tickets", self.found, self.tickets)?;
        writeln!(f, "  Processed: {}", self.processed)?;
        writeln!(f, "  With signature: {}", self.signed)?;
        writeln!(f, "  Missing signature: {}", self.processed - self.signed)?;
        writeln!(f, "  Skipped (already audited): {}", self.skipped)?;
        writeln!(f, "  Failed: {}", self.failed.len())?;
        for file in &self.failed {
            writeln!(f, "    {}: {}", file.path.display(), file.reason)?;
        }
        for m in &self.failed_months {
            writeln!(f, "  Month {} not scanned: {}", m.month, m.reason)?;
        }
        Ok(())
    }
}

/// Scan → analyze → upsert, one file at a time.
///
/// A month that cannot be scanned and a file that cannot be analyzed are
/// recorded in the summary and the run continues. A storage failure ends the
/// run; every record upserted before it stays committed.
pub fn run_audit(
    scanner: &Scanner,
    analyzer: &TicketAnalyzer,
    store: &dyn AuditStore,
    options: &RunOptions,
) -> Result<RunSummary, StorageError> {
    let mut summary = RunSummary::default();

    let done: HashSet<String> = if options.reprocess {
        HashSet::new()
    } else {
        store.processed_paths()?
    };

    let mut pending: Vec<TicketImage> = Vec::new();
    for month in &options.months {
        let images = match scanner.scan_month_within(month, &options.window) {
            Ok(images) => images,
            Err(e) => {
                log::warn!("[audit] skipping month {month}: {e}");
                summary.failed_months.push(FailedMonth {
                    month: month.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        if options.reprocess {
            let n = store.clear_month(month.as_str())?;
            log::info!("[audit] cleared {n} stored records for {month}");
            summary.cleared += n;
        }

        let tickets = group_by_ticket(&images).len();
        log::info!("[audit] {month}: {} ticket images, {tickets} tickets", images.len());
        summary.found += images.len();
        summary.tickets += tickets;

        for image in images {
            if done.contains(&*image.path.to_string_lossy()) {
                summary.skipped += 1;
            } else {
                pending.push(image);
            }
        }
    }

    if let Some(n) = options.sample {
        if options.reprocess {
            log::warn!("[audit] sample ignored while reprocessing");
        } else if pending.len() > n {
            let mut rng = match options.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            pending.shuffle(&mut rng);
            pending.truncate(n);
            pending.sort_by(|a, b| a.path.cmp(&b.path));
            log::info!("[audit] sampled {n} unprocessed images");
        }
    }

    for image in pending {
        let analysis = match analyzer.analyze(&image.path) {
            Ok(a) => a,
            Err(e) => {
                log::warn!("[audit] {e}");
                summary.failed.push(FailedFile {
                    path: image.path.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let record = AuditRecord::from_analysis(&analysis, image.month.as_str(), Utc::now());
        if let Err(e) = store.upsert(&record) {
            log::error!("[audit] cannot store {}: {e}", image.path.display());
            return Err(e);
        }
        summary.processed += 1;
        if analysis.has_signature {
            summary.signed += 1;
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditConfig;
    use crate::store::{CrossTabCell, MonthStats, SqliteAuditStore, TechnicianStats, TotalStats};
    use image::{GrayImage, Luma};
    use std::cell::Cell;
    use std::fs;
    use std::path::Path;

    fn write_page(path: &Path, inked_rows: u32) {
        let mut img = GrayImage::from_pixel(200, 400, Luma([255]));
        // signature box on a 200×400 page: x 0..90, y 328..376
        for y in 330..330 + inked_rows {
            for x in 0..90 {
                img.put_pixel(x, y, Luma([10]));
            }
        }
        img.save(path).unwrap();
    }

    fn month(s: &str) -> Month {
        s.parse().unwrap()
    }

    #[test]
    fn failures_are_reported_and_the_batch_continues() {
        let dir = tempfile::tempdir().unwrap();
        let jan = dir.path().join("2026-01");
        fs::create_dir_all(&jan).unwrap();
        write_page(&jan.join("100a.png"), 4);
        write_page(&jan.join("101a.png"), 0);
        fs::write(jan.join("102a.png"), b"garbage").unwrap();

        let scanner = Scanner::new(dir.path()).unwrap();
        let analyzer = TicketAnalyzer::new(&AuditConfig::default(), vec![]);
        let store = SqliteAuditStore::open_in_memory().unwrap();
        let options = RunOptions {
            months: vec![month("2025-12"), month("2026-01")],
            ..RunOptions::default()
        };

        let summary = run_audit(&scanner, &analyzer, &store, &options).unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.signed, 1);
        assert_eq!(summary.failed.len(), 1);
        assert!(summary.failed[0].path.ends_with("102a.png"));
        assert_eq!(summary.failed_months.len(), 1);
        assert_eq!(summary.failed_months[0].month, month("2025-12"));
        assert_eq!(store.records_for_month("2026-01").unwrap().len(), 2);
    }

    #[test]
    fn second_run_skips_then_reprocess_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let jan = dir.path().join("2026-01");
        fs::create_dir_all(&jan).unwrap();
        write_page(&jan.join("100a.png"), 4);

        let scanner = Scanner::new(dir.path()).unwrap();
        let analyzer = TicketAnalyzer::new(&AuditConfig::default(), vec![]);
        let store = SqliteAuditStore::open_in_memory().unwrap();
        let mut options = RunOptions {
            months: vec![month("2026-01")],
            ..RunOptions::default()
        };

        run_audit(&scanner, &analyzer, &store, &options).unwrap();
        let again = run_audit(&scanner, &analyzer, &store, &options).unwrap();
        assert_eq!(again.processed, 0);
        assert_eq!(again.skipped, 1);

        options.reprocess = true;
        let redo = run_audit(&scanner, &analyzer, &store, &options).unwrap();
        assert_eq!(redo.cleared, 1);
        assert_eq!(redo.processed, 1);
        assert_eq!(store.records_for_month("2026-01").unwrap().len(), 1);
    }

    /// Delegates to SQLite but fails the `fail_on`-th upsert (1-based).
    struct FlakyStore {
        inner: SqliteAuditStore,
        fail_on: usize,
        upserts: Cell<usize>,
    }

    impl AuditStore for FlakyStore {
        fn upsert(&self, record: &AuditRecord) -> Result<(), StorageError> {
            let n = self.upserts.get() + 1;
            self.upserts.set(n);
            if n == self.fail_on {
                return Err(StorageError::Sqlite(rusqlite::Error::InvalidQuery));
            }
            self.inner.upsert(record)
        }
        fn clear_month(&self, month: &str) -> Result<usize, StorageError> {
            self.inner.clear_month(month)
        }
        fn processed_paths(&self) -> Result<HashSet<String>, StorageError> {
            self.inner.processed_paths()
        }
        fn records_for_month(&self, month: &str) -> Result<Vec<AuditRecord>, StorageError> {
            self.inner.records_for_month(month)
        }
        fn records_for_technician(&self, technician: &str) -> Result<Vec<AuditRecord>, StorageError> {
            self.inner.records_for_technician(technician)
        }
        fn query_by_technician(&self) -> Result<Vec<TechnicianStats>, StorageError> {
            self.inner.query_by_technician()
        }
        fn query_by_month(&self) -> Result<Vec<MonthStats>, StorageError> {
            self.inner.query_by_month()
        }
        fn query_cross_tab(&self) -> Result<Vec<CrossTabCell>, StorageError> {
            self.inner.query_cross_tab()
        }
        fn query_totals(&self) -> Result<TotalStats, StorageError> {
            self.inner.query_totals()
        }
    }

    #[test]
    fn storage_failure_aborts_and_keeps_earlier_rows() {
        let dir = tempfile::tempdir().unwrap();
        let jan = dir.path().join("2026-01");
        fs::create_dir_all(&jan).unwrap();
        for name in ["100a.png", "101a.png", "102a.png"] {
            write_page(&jan.join(name), 4);
        }

        let scanner = Scanner::new(dir.path()).unwrap();
        let analyzer = TicketAnalyzer::new(&AuditConfig::default(), vec![]);
        let store = FlakyStore {
            inner: SqliteAuditStore::open_in_memory().unwrap(),
            fail_on: 2,
            upserts: Cell::new(0),
        };
        let options = RunOptions {
            months: vec![month("2026-01")],
            ..RunOptions::default()
        };

        let err = run_audit(&scanner, &analyzer, &store, &options).unwrap_err();
        assert!(matches!(err, StorageError::Sqlite(_)));
        assert_eq!(store.upserts.get(), 2, "no upserts after the failure");

        let kept = store.records_for_month("2026-01").unwrap();
        assert_eq!(kept.len(), 1);
        assert!(kept[0].file_path.ends_with("100a.png"));
    }

    #[test]
    fn sample_limits_unprocessed_files() {
        let dir = tempfile::tempdir().unwrap();
        let jan = dir.path().join("2026-01");
        fs::create_dir_all(&jan).unwrap();
        for n in 100..106 {
            write_page(&jan.join(format!("{n}a.png")), 4);
        }

        let scanner = Scanner::new(dir.path()).unwrap();
        let analyzer = TicketAnalyzer::new(&AuditConfig::default(), vec![]);
        let store = SqliteAuditStore::open_in_memory().unwrap();
        let options = RunOptions {
            months: vec![month("2026-01")],
            sample: Some(2),
            seed: Some(7),
            ..RunOptions::default()
        };

        let first = run_audit(&scanner, &analyzer, &store, &options).unwrap();
        assert_eq!(first.processed, 2);
        assert_eq!(first.found, 6);

        // the sample is drawn from files not yet stored
        let second = run_audit(&scanner, &analyzer, &store, &options).unwrap();
        assert_eq!(second.processed, 2);
        assert_eq!(second.skipped, 2);
        assert_eq!(store.records_for_month("2026-01").unwrap().len(), 4);
    }

    #[test]
    fn summary_counts_variants_of_one_ticket_once() {
        let dir = tempfile::tempdir().unwrap();
        let jan = dir.path().join("2026-01");
        fs::create_dir_all(&jan).unwrap();
        write_page(&jan.join("100a.png"), 4);
        write_page(&jan.join("100b.png"), 0);
        write_page(&jan.join("101a.png"), 4);

        let scanner = Scanner::new(dir.path()).unwrap();
        let analyzer = TicketAnalyzer::new(&AuditConfig::default(), vec![]);
        let store = SqliteAuditStore::open_in_memory().unwrap();
        let options = RunOptions {
            months: vec![month("2026-01")],
            ..RunOptions::default()
        };

        let summary = run_audit(&scanner, &analyzer, &store, &options).unwrap();
        assert_eq!(summary.found, 3);
        assert_eq!(summary.tickets, 2);
        assert!(summary.to_string().contains("Found: 3 images across 2 tickets"));
    }

    #[test]
    fn summary_lists_failures() {
        let summary = RunSummary {
            processed: 3,
            signed: 2,
            failed: vec![FailedFile { path: PathBuf::from("7a.png"), reason: "bad".into() }],
            ..RunSummary::default()
        };
        let text = summary.to_string();
        assert!(text.contains("Processed: 3"));
        assert!(text.contains("Missing signature: 1"));
        assert!(text.contains("7a.png: bad"));
    }
}
