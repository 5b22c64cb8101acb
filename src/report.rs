//! Text and CSV rendering of the store's aggregate projections.

use anyhow::{Context, Result};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use tabled::builder::Builder;
use tabled::settings::{object::Columns, Alignment, Style};
use tabled::Tabled;

use crate::store::{
    AuditRecord, CrossTabCell, MonthStats, SignatureCounts, TechnicianStats, TotalStats,
};

/// Shown wherever a rate has no denominator.
pub const NOT_APPLICABLE: &str = "N/A";

pub fn format_rate(rate: Option<f64>) -> String {
    match rate {
        Some(r) => format!("{:.1}%", r * 100.0),
        None => NOT_APPLICABLE.to_string(),
    }
}

// ── Row types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Tabled)]
pub struct TechnicianRow {
    #[tabled(rename = "Technician")]
    pub technician: String,
    #[tabled(rename = "Total")]
    pub total: u64,
    #[tabled(rename = "Signed")]
    pub signed: u64,
    #[tabled(rename = "Missing")]
    pub missing: u64,
    #[tabled(rename = "Rate")]
    pub rate: String,
}

impl From<&TechnicianStats> for TechnicianRow {
    fn from(s: &TechnicianStats) -> Self {
        Self {
            technician: s.technician.clone(),
            total: s.counts.total,
            signed: s.counts.signed,
            missing: s.counts.missing(),
            rate: format_rate(s.counts.rate()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Tabled)]
pub struct MonthRow {
    #[tabled(rename = "Month")]
    pub month: String,
    #[tabled(rename = "Total")]
    pub total: u64,
    #[tabled(rename = "Signed")]
    pub signed: u64,
    #[tabled(rename = "Missing")]
    pub missing: u64,
    #[tabled(rename = "Rate")]
    pub rate: String,
}

impl From<&MonthStats> for MonthRow {
    fn from(s: &MonthStats) -> Self {
        Self {
            month: s.month.clone(),
            total: s.counts.total,
            signed: s.counts.signed,
            missing: s.counts.missing(),
            rate: format_rate(s.counts.rate()),
        }
    }
}

/// One stored ticket, as listed by `stats --tech`.
#[derive(Debug, Clone, PartialEq, Tabled)]
pub struct RecordRow {
    #[tabled(rename = "Month")]
    pub month: String,
    #[tabled(rename = "Ticket")]
    pub ticket: String,
    #[tabled(rename = "Signature")]
    pub signature: String,
    #[tabled(rename = "Confidence")]
    pub confidence: String,
    #[tabled(rename = "Ink")]
    pub ink: String,
}

impl From<&AuditRecord> for RecordRow {
    fn from(r: &AuditRecord) -> Self {
        Self {
            month: r.month.clone(),
            ticket: format!("{}{}", r.ticket_number, r.variant),
            signature: if r.has_signature { "yes" } else { "no" }.to_string(),
            confidence: format!("{:.2}", r.signature_confidence),
            ink: format!("{:.1}%", r.ink_density * 100.0),
        }
    }
}

// ── Report ───────────────────────────────────────────────────────────────────

/// A titled grid of cells, rendered as a text table or exported as CSV.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub title: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Report {
    /// Header and cells taken from the rows' `Tabled` derive.
    pub fn from_rows<T: Tabled>(title: &str, rows: &[T]) -> Self {
        Self {
            title: title.to_string(),
            headers: T::headers().into_iter().map(Cow::into_owned).collect(),
            rows: rows
                .iter()
                .map(|r| r.fields().into_iter().map(Cow::into_owned).collect())
                .collect(),
        }
    }

    /// Title line followed by the table. Every column after the first is
    /// right-aligned.
    pub fn render(&self) -> String {
        let mut builder = Builder::default();
        builder.push_record(self.headers.clone());
        for row in &self.rows {
            builder.push_record(row.clone());
        }
        let mut table = builder.build();
        table.with(Style::psql());
        table.modify(Columns::new(1..), Alignment::right());
        format!("{}\n{table}\n", self.title)
    }

    /// Header line plus one record per row; fields are quoted only when needed.
    pub fn to_csv(&self) -> Result<String> {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        wtr.write_record(&self.headers)?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        let bytes = wtr.into_inner().context("flush csv")?;
        String::from_utf8(bytes).context("csv is not utf-8")
    }
}

pub fn technician_table(stats: &[TechnicianStats]) -> Report {
    let rows: Vec<TechnicianRow> = stats.iter().map(TechnicianRow::from).collect();
    Report::from_rows("Signature rates by technician", &rows)
}

pub fn month_table(stats: &[MonthStats]) -> Report {
    let rows: Vec<MonthRow> = stats.iter().map(MonthRow::from).collect();
    Report::from_rows("Signature rates by month", &rows)
}

pub fn records_table(technician: &str, records: &[AuditRecord]) -> Report {
    let rows: Vec<RecordRow> = records.iter().map(RecordRow::from).collect();
    Report::from_rows(&format!("Tickets for {technician}"), &rows)
}

/// Technicians down, months across, signature rate in each cell. A month in
/// which a technician has no tickets shows `N/A`.
pub fn cross_tab_table(cells: &[CrossTabCell]) -> Report {
    let months: BTreeSet<&str> = cells.iter().map(|c| c.month.as_str()).collect();
    let mut by_tech: BTreeMap<&str, BTreeMap<&str, SignatureCounts>> = BTreeMap::new();
    for c in cells {
        by_tech
            .entry(c.technician.as_str())
            .or_default()
            .insert(c.month.as_str(), c.counts);
    }

    let mut headers = vec!["Technician".to_string()];
    headers.extend(months.iter().map(|m| m.to_string()));
    let rows = by_tech
        .into_iter()
        .map(|(tech, per_month)| {
            let mut row = vec![tech.to_string()];
            for month in &months {
                let counts = per_month.get(month).copied().unwrap_or_default();
                row.push(format_rate(counts.rate()));
            }
            row
        })
        .collect();

    Report {
        title: "Signature rates by technician and month".to_string(),
        headers,
        rows,
    }
}

pub fn totals_text(t: &TotalStats) -> String {
    format!(
        "Overall\n  Total tickets: {}\n  Technicians: {}\n  Months covered: {}\n  Signed: {}\n  Missing: {}\n  Signature rate: {}\n",
        t.counts.total,
        t.technicians,
        t.months,
        t.counts.signed,
        t.counts.missing(),
        format_rate(t.counts.rate()),
    )
}
