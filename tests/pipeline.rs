use std::fs;
use std::path::Path;

use image::{DynamicImage, GrayImage, Luma};
use ticket_auditor_lib::ocr::{OcrResult, Recognizer};
use ticket_auditor_lib::{
    run_audit, AuditConfig, AuditStore, RunOptions, Scanner, SqliteAuditStore, TicketAnalyzer,
};

/// Always reads the same technician line.
struct Printed(&'static str);

impl Recognizer for Printed {
    fn name(&self) -> &str {
        "printed"
    }

    fn recognize(&self, _crop: &DynamicImage) -> Option<OcrResult> {
        Some(OcrResult {
            text: self.0.to_string(),
            confidence: 0.9,
            engine_name: "printed".to_string(),
        })
    }
}

fn analyzer(line: &'static str) -> TicketAnalyzer {
    TicketAnalyzer::new(&AuditConfig::default(), vec![Box::new(Printed(line))])
}

/// 1000×2000 page. The default signature box is x 0..450, y 1640..1880, so
/// every inked row adds 450 / 108000 of density.
fn write_ticket(path: &Path, inked_rows: u32) {
    let mut img = GrayImage::from_pixel(1000, 2000, Luma([255]));
    for y in 1650..1650 + inked_rows {
        for x in 0..450 {
            img.put_pixel(x, y, Luma([20]));
        }
    }
    img.save(path).unwrap();
}

fn options(months: &[&str]) -> RunOptions {
    RunOptions {
        months: months.iter().map(|m| m.parse().unwrap()).collect(),
        ..RunOptions::default()
    }
}

#[test]
fn signed_ticket_is_read_and_stored() {
    let dir = tempfile::tempdir().unwrap();
    let month = dir.path().join("tickets/2026-01");
    fs::create_dir_all(&month).unwrap();
    write_ticket(&month.join("12345a.png"), 12);

    let scanner = Scanner::new(dir.path().join("tickets")).unwrap();
    let store = SqliteAuditStore::open(dir.path().join("audit.db")).unwrap();
    let summary = run_audit(&scanner, &analyzer("by Darren B Tech"), &store, &options(&["2026-01"]))
        .unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.signed, 1);
    assert!(summary.failed.is_empty());

    let records = store.records_for_month("2026-01").unwrap();
    assert_eq!(records.len(), 1);
    let r = &records[0];
    assert_eq!(r.ticket_number, "12345");
    assert_eq!(r.variant, "a");
    assert_eq!(r.raw_ocr_text, "by Darren B Tech");
    assert_eq!(r.technician_name, "Darren B");
    assert_eq!(r.technician_role.as_deref(), Some("Tech"));
    assert_eq!(r.name_confidence, 1.0);
    assert!(r.has_signature);
    assert!((r.ink_density - 0.05).abs() < 1e-9);
    assert!((0.72..=0.88).contains(&r.signature_confidence));
}

#[test]
fn rerunning_keeps_one_row_per_file() {
    let dir = tempfile::tempdir().unwrap();
    let month = dir.path().join("2026-02");
    fs::create_dir_all(&month).unwrap();
    write_ticket(&month.join("200a.png"), 12);
    write_ticket(&month.join("200b.png"), 0);

    let scanner = Scanner::new(dir.path()).unwrap();
    let store = SqliteAuditStore::open_in_memory().unwrap();
    let analyzer = analyzer("by Koby H Tech");
    let mut opts = options(&["2026-02"]);

    run_audit(&scanner, &analyzer, &store, &opts).unwrap();
    let second = run_audit(&scanner, &analyzer, &store, &opts).unwrap();
    assert_eq!(second.processed, 0);
    assert_eq!(second.skipped, 2);

    opts.reprocess = true;
    let third = run_audit(&scanner, &analyzer, &store, &opts).unwrap();
    assert_eq!(third.cleared, 2);
    assert_eq!(third.processed, 2);

    let totals = store.query_totals().unwrap();
    assert_eq!(totals.counts.total, 2);
    assert_eq!(totals.counts.signed, 1);
    assert_eq!(totals.counts.rate(), Some(0.5));
}

#[test]
fn reprocessing_one_month_leaves_others_alone() {
    let dir = tempfile::tempdir().unwrap();
    for m in ["2026-01", "2026-02"] {
        let month = dir.path().join(m);
        fs::create_dir_all(&month).unwrap();
        write_ticket(&month.join("1a.png"), 12);
    }

    let scanner = Scanner::new(dir.path()).unwrap();
    let store = SqliteAuditStore::open_in_memory().unwrap();
    let analyzer = analyzer("by Darren B Tech");
    run_audit(&scanner, &analyzer, &store, &options(&["2026-01", "2026-02"])).unwrap();

    let mut opts = options(&["2026-02"]);
    opts.reprocess = true;
    let summary = run_audit(&scanner, &analyzer, &store, &opts).unwrap();
    assert_eq!(summary.cleared, 1);

    assert_eq!(store.records_for_month("2026-01").unwrap().len(), 1);
    assert_eq!(store.records_for_month("2026-02").unwrap().len(), 1);
    assert_eq!(store.query_by_month().unwrap().len(), 2);
}

#[test]
fn heavy_and_blank_boxes() {
    let dir = tempfile::tempdir().unwrap();
    let month = dir.path().join("2026-03");
    fs::create_dir_all(&month).unwrap();
    // 36 rows → 15% ink
    write_ticket(&month.join("300a.png"), 36);
    write_ticket(&month.join("301a.png"), 0);

    let analyzer = analyzer("by Darren B Tech");
    let heavy = analyzer.analyze(&month.join("300a.png")).unwrap();
    assert!(heavy.has_signature);
    assert!((heavy.ink_density - 0.15).abs() < 1e-9);
    assert!((heavy.signature_confidence - 0.55).abs() < 1e-9);

    let blank = analyzer.analyze(&month.join("301a.png")).unwrap();
    assert!(!blank.has_signature);
    assert_eq!(blank.ink_density, 0.0);
    assert!(blank.signature_confidence >= 0.9);
}

#[test]
fn unreadable_name_is_unknown_but_still_counted() {
    let dir = tempfile::tempdir().unwrap();
    let month = dir.path().join("2026-04");
    fs::create_dir_all(&month).unwrap();
    write_ticket(&month.join("400a.png"), 12);

    let scanner = Scanner::new(dir.path()).unwrap();
    let store = SqliteAuditStore::open_in_memory().unwrap();
    run_audit(&scanner, &analyzer("~~ ##"), &store, &options(&["2026-04"])).unwrap();

    let stats = store.query_by_technician().unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].technician, "UNKNOWN");
    assert_eq!(stats[0].counts.signed, 1);
}
