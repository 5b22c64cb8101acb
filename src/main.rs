use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use ticket_auditor_lib::{
    config::{load_config, save_config, AuditConfig},
    ocr::build_engines,
    processor::{run_audit, RunOptions},
    report,
    scanner::{group_by_ticket, Month, ScanWindow, Scanner},
    store::{AuditStore, SqliteAuditStore},
    TicketAnalyzer,
};

/// Picked up from the working directory when `--config` is not given.
const DEFAULT_CONFIG: &str = "ticket-auditor.json";

#[derive(Parser)]
#[command(name = "ticket-auditor")]
#[command(about = "Audit scanned service tickets for signature compliance", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze ticket scans and store the results
    Audit {
        /// Months to process (YYYY-MM). Defaults to the latest month folder.
        months: Vec<String>,
        /// Process every month folder
        #[arg(long, conflicts_with = "months")]
        all: bool,
        /// Clear stored results for each month and analyze every file again
        #[arg(long, short)]
        reprocess: bool,
        /// Only files modified on or after this date (YYYY-MM-DD)
        #[arg(long)]
        since: Option<String>,
        /// Only files modified on or before this date (YYYY-MM-DD)
        #[arg(long)]
        until: Option<String>,
        /// Analyze a random subset of this many unprocessed files
        #[arg(long, conflicts_with = "reprocess")]
        sample: Option<usize>,
        /// Seed for --sample
        #[arg(long, requires = "sample")]
        seed: Option<u64>,
    },
    /// Analyze one image and print the result without storing it
    Analyze {
        /// Image path; alternatively use --month with --ticket
        #[arg(required_unless_present = "ticket")]
        file: Option<PathBuf>,
        /// Month folder to look the ticket up in
        #[arg(long, short, requires = "ticket")]
        month: Option<String>,
        /// Ticket number and variant, e.g. 12345a
        #[arg(long, short, requires = "month", conflicts_with = "file")]
        ticket: Option<String>,
    },
    /// Image and ticket counts per month folder
    Scan {
        /// List the tickets of one month with their page variants
        #[arg(long, short)]
        month: Option<String>,
    },
    /// Print an aggregate report
    Report {
        #[arg(value_enum, default_value_t = ReportView::ByTechnician)]
        view: ReportView,
        /// Only rows for this technician
        #[arg(long, short)]
        tech: Option<String>,
        /// Emit CSV instead of a text table
        #[arg(long)]
        csv: bool,
    },
    /// Overall totals, or one technician's stored tickets
    Stats {
        #[arg(long, short)]
        tech: Option<String>,
    },
    /// Write the default configuration to a file
    InitConfig { path: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportView {
    ByTechnician,
    ByMonth,
    CrossTab,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = resolve_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Audit { months, all, reprocess, since, until, sample, seed } => {
            let scanner = Scanner::new(&config.tickets_root)?;
            let months = select_months(&scanner, &months, all)?;
            if months.is_empty() {
                println!("No month folders under {}", scanner.root().display());
                return Ok(());
            }
            let window = ScanWindow {
                since: since.as_deref().map(|d| day_bound(d, false)).transpose()?,
                until: until.as_deref().map(|d| day_bound(d, true)).transpose()?,
            };

            let store = open_store(&config)?;
            let analyzer = TicketAnalyzer::new(&config, build_engines(&config.ocr));
            let options = RunOptions { months, reprocess, window, sample, seed };
            let summary = run_audit(&scanner, &analyzer, &store, &options)
                .context("audit aborted: results could not be stored")?;
            print!("{summary}");
        }
        Commands::Analyze { file, month, ticket } => {
            let file = match (file, month, ticket) {
                (Some(file), _, _) => file,
                (None, Some(month), Some(ticket)) => locate_ticket(&config, &month, &ticket)?,
                _ => bail!("give an image path or --month with --ticket"),
            };
            let analyzer = TicketAnalyzer::new(&config, build_engines(&config.ocr));
            let a = analyzer.analyze(&file)?;
            println!("File:        {}", a.file_path.display());
            println!("Ticket:      {}{}", a.ticket_number, a.variant);
            println!("OCR text:    {:?}", a.raw_ocr_text);
            println!("Technician:  {} ({:.2})", a.technician_name, a.name_confidence);
            if let Some(role) = &a.technician_role {
                println!("Role:        {role}");
            }
            println!(
                "Signature:   {} ({:.2}, ink {:.1}%)",
                if a.has_signature { "yes" } else { "no" },
                a.signature_confidence,
                a.ink_density * 100.0
            );
        }
        Commands::Report { view, tech, csv } => {
            let store = open_store(&config)?;
            let keep = |name: &str| tech.as_deref().map_or(true, |t| t.eq_ignore_ascii_case(name));
            let table = match view {
                ReportView::ByTechnician => {
                    let mut rows = store.query_by_technician()?;
                    rows.retain(|r| keep(&r.technician));
                    report::technician_table(&rows)
                }
                ReportView::ByMonth => {
                    if tech.is_some() {
                        bail!("--tech does not apply to the by-month report");
                    }
                    report::month_table(&store.query_by_month()?)
                }
                ReportView::CrossTab => {
                    let mut cells = store.query_cross_tab()?;
                    cells.retain(|c| keep(&c.technician));
                    report::cross_tab_table(&cells)
                }
            };
            if csv {
                print!("{}", table.to_csv()?);
            } else if table.rows.is_empty() {
                println!("No audit records match.");
            } else {
                print!("{}", table.render());
            }
        }
        Commands::Stats { tech: None } => {
            let store = open_store(&config)?;
            print!("{}", report::totals_text(&store.query_totals()?));
        }
        Commands::Stats { tech: Some(tech) } => {
            let store = open_store(&config)?;
            let records = store.records_for_technician(&tech)?;
            if records.is_empty() {
                println!("No audit records for {tech}.");
            } else {
                print!("{}", report::records_table(&tech, &records).render());
            }
        }
        Commands::Scan { month: None } => {
            let scanner = Scanner::new(&config.tickets_root)?;
            for (month, count) in scanner.count_by_month()? {
                println!("{month}  {count:>6}");
            }
        }
        Commands::Scan { month: Some(month) } => {
            let scanner = Scanner::new(&config.tickets_root)?;
            let images = scanner.scan_month(&month.parse::<Month>()?)?;
            let groups = group_by_ticket(&images);
            println!("{month}: {} images, {} tickets", images.len(), groups.len());
            for (number, pages) in groups {
                let variants: Vec<&str> = pages.iter().map(|p| p.id.variant.as_str()).collect();
                println!("  {number}  {}", variants.join(" "));
            }
        }
        Commands::InitConfig { path } => {
            save_config(&path, &config)?;
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}

fn resolve_config(path: Option<&Path>) -> Result<AuditConfig> {
    match path {
        Some(p) => load_config(p),
        None if Path::new(DEFAULT_CONFIG).exists() => load_config(Path::new(DEFAULT_CONFIG)),
        None => Ok(AuditConfig::default()),
    }
}

fn open_store(config: &AuditConfig) -> Result<SqliteAuditStore> {
    if let Some(parent) = config.database_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
    }
    SqliteAuditStore::open(&config.database_path)
        .with_context(|| format!("cannot open {}", config.database_path.display()))
}

fn select_months(scanner: &Scanner, requested: &[String], all: bool) -> Result<Vec<Month>> {
    if !requested.is_empty() {
        return requested
            .iter()
            .map(|m| m.parse::<Month>().map_err(anyhow::Error::from))
            .collect();
    }
    let mut available = scanner.list_month_folders()?;
    if all {
        return Ok(available);
    }
    Ok(available.pop().into_iter().collect())
}

/// Path of `{number}{variant}.png` in a month folder, e.g. ticket `12345a`.
fn locate_ticket(config: &AuditConfig, month: &str, ticket: &str) -> Result<PathBuf> {
    let month: Month = month.parse()?;
    let split = ticket.char_indices().last().map_or(0, |(i, _)| i);
    let (number, variant) = ticket.split_at(split);
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        bail!("ticket {ticket:?} should look like 12345a");
    }
    let scanner = Scanner::new(&config.tickets_root)?;
    scanner
        .find(&month, number, variant)
        .map(|image| image.path)
        .with_context(|| format!("ticket {ticket} not found in {month}"))
}

/// Start (or end, when `end_of_day`) of a `YYYY-MM-DD` day in local time.
fn day_bound(date: &str, end_of_day: bool) -> Result<DateTime<Local>> {
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .with_context(|| format!("invalid date {date:?}, use YYYY-MM-DD"))?;
    let (h, m, s) = if end_of_day { (23, 59, 59) } else { (0, 0, 0) };
    day.and_hms_opt(h, m, s)
        .and_then(|t| t.and_local_timezone(Local).earliest())
        .with_context(|| format!("{date} has no such local time"))
}
