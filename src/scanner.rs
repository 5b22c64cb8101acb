use chrono::{DateTime, Local, NaiveDate};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("tickets folder not found: {0}")]
    RootNotFound(PathBuf),
    #[error("month folder not found: {0}")]
    MonthNotFound(PathBuf),
    #[error("invalid month label {0:?}, expected YYYY-MM")]
    InvalidMonth(String),
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A `YYYY-MM` month label, validated on construction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Month(String);

impl Month {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Month {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let shaped = s.len() == 7 && s.as_bytes()[4] == b'-';
        if !shaped || NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d").is_err() {
            return Err(ScanError::InvalidMonth(s.to_string()));
        }
        Ok(Month(s.to_string()))
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ticket number and page variant parsed from `{digits}{letter}.png`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TicketId {
    pub number: String,
    /// Always lowercase.
    pub variant: String,
}

fn file_name_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(\d+)([a-z])\.png$").expect("valid regex"))
}

impl TicketId {
    /// `None` unless the file name follows the ticket convention.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let caps = file_name_pattern().captures(name)?;
        Some(TicketId {
            number: caps[1].to_string(),
            variant: caps[2].to_lowercase(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TicketImage {
    pub path: PathBuf,
    pub id: TicketId,
    pub month: Month,
    pub modified: DateTime<Local>,
}

/// Optional modification-time window; both ends inclusive.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanWindow {
    pub since: Option<DateTime<Local>>,
    pub until: Option<DateTime<Local>>,
}

impl ScanWindow {
    fn admits(&self, t: DateTime<Local>) -> bool {
        self.since.map_or(true, |s| t >= s) && self.until.map_or(true, |u| t <= u)
    }
}

/// Finds ticket scans under `root/YYYY-MM/`.
#[derive(Debug, Clone)]
pub struct Scanner {
    root: PathBuf,
}

impl Scanner {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ScanError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(ScanError::RootNotFound(root));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sub-folders named like a month, sorted oldest first.
    pub fn list_month_folders(&self) -> Result<Vec<Month>, ScanError> {
        let entries = fs::read_dir(&self.root).map_err(|source| ScanError::Io {
            path: self.root.clone(),
            source,
        })?;
        let mut months: Vec<Month> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str()?.parse().ok())
            .collect();
        months.sort();
        Ok(months)
    }

    /// Ticket images in one month folder, sorted by file name. Files that do
    /// not follow `{ticket}{variant}.png` are ignored.
    pub fn scan_month(&self, month: &Month) -> Result<Vec<TicketImage>, ScanError> {
        self.scan_month_within(month, &ScanWindow::default())
    }

    pub fn scan_month_within(
        &self,
        month: &Month,
        window: &ScanWindow,
    ) -> Result<Vec<TicketImage>, ScanError> {
        let folder = self.root.join(month.as_str());
        if !folder.is_dir() {
            return Err(ScanError::MonthNotFound(folder));
        }
        let entries = fs::read_dir(&folder).map_err(|source| ScanError::Io {
            path: folder.clone(),
            source,
        })?;

        let mut images = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(id) = TicketId::from_path(&path) else {
                continue;
            };
            let meta = entry.metadata().map_err(|source| ScanError::Io {
                path: path.clone(),
                source,
            })?;
            if !meta.is_file() {
                continue;
            }
            let modified = meta
                .modified()
                .map(DateTime::<Local>::from)
                .unwrap_or_else(|_| Local::now());
            if !window.admits(modified) {
                continue;
            }
            images.push(TicketImage {
                path,
                id,
                month: month.clone(),
                modified,
            });
        }
        images.sort_by(|a, b| a.path.file_name().cmp(&b.path.file_name()));
        Ok(images)
    }

    /// Look up one scan by ticket number and variant.
    pub fn find(&self, month: &Month, number: &str, variant: &str) -> Option<TicketImage> {
        let path = self
            .root
            .join(month.as_str())
            .join(format!("{number}{}.png", variant.to_lowercase()));
        let meta = fs::metadata(&path).ok()?;
        if !meta.is_file() {
            return None;
        }
        Some(TicketImage {
            id: TicketId::from_path(&path)?,
            modified: meta.modified().map(DateTime::<Local>::from).unwrap_or_else(|_| Local::now()),
            month: month.clone(),
            path,
        })
    }

    /// Number of ticket images per month folder.
    pub fn count_by_month(&self) -> Result<BTreeMap<Month, usize>, ScanError> {
        let mut counts = BTreeMap::new();
        for month in self.list_month_folders()? {
            let n = self.scan_month(&month)?.len();
            counts.insert(month, n);
        }
        Ok(counts)
    }
}

/// Pages of the same ticket, keyed by ticket number, variants in order.
pub fn group_by_ticket(images: &[TicketImage]) -> BTreeMap<&str, Vec<&TicketImage>> {
    let mut groups: BTreeMap<&str, Vec<&TicketImage>> = BTreeMap::new();
    for image in images {
        groups.entry(image.id.number.as_str()).or_default().push(image);
    }
    for pages in groups.values_mut() {
        pages.sort_by(|a, b| a.id.variant.cmp(&b.id.variant));
    }
    groups
}
