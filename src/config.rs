use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::similarity::SimilarityMetric;

// ── Regions ──────────────────────────────────────────────────────────────────

/// A rectangle expressed as fractions (0.0 – 1.0) of the page dimensions.
///
/// Ticket scans differ in resolution but share one printed template, so
/// regions are stored proportionally and resolved to pixels per image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionRect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

/// Pixel rectangle produced by `RegionRect::to_pixels`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl RegionRect {
    pub const fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self { left, top, right, bottom }
    }

    /// Resolve to pixels for an image of `width` × `height`.
    ///
    /// Edges are floored and clamped to the image, so the result never
    /// reaches outside the frame. An inverted rect resolves to zero size.
    pub fn to_pixels(&self, width: u32, height: u32) -> PixelRect {
        let x0 = edge(self.left, width);
        let x1 = edge(self.right, width);
        let y0 = edge(self.top, height);
        let y1 = edge(self.bottom, height);
        PixelRect {
            x: x0,
            y: y0,
            width: x1.saturating_sub(x0),
            height: y1.saturating_sub(y0),
        }
    }
}

fn edge(fraction: f64, dim: u32) -> u32 {
    let px = (fraction.clamp(0.0, 1.0) * dim as f64).floor() as u32;
    px.min(dim)
}

/// Where the technician line and the customer signature sit on a ticket.
///
/// This is the only copy of these coordinates; anything that draws or crops
/// ticket regions should read them from here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionLayout {
    /// "by Darren B Tech" line, bottom-left of the form.
    pub name: RegionRect,
    /// Customer signature box, directly below the technician line.
    pub signature: RegionRect,
}

impl Default for RegionLayout {
    fn default() -> Self {
        Self {
            name: RegionRect::new(0.0, 0.78, 0.50, 0.82),
            signature: RegionRect::new(0.0, 0.82, 0.45, 0.94),
        }
    }
}

// ── Signature classification ─────────────────────────────────────────────────

/// Density bands used to classify the signature region.
///
/// Bands are evaluated in order and each upper edge is inclusive:
///
/// | density                         | present | confidence                               |
/// |---------------------------------|---------|------------------------------------------|
/// | `< min_density`                 | no      | `absent_confidence`                      |
/// | `min_density ..= clean_max`     | yes     | `clean_low` → `clean_high`, linear       |
/// | `clean_max <  d ..= taper_max`  | yes     | `clean_high` → `taper_floor`, linear     |
/// | `> taper_max`                   | yes     | `noisy_confidence`                       |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureBands {
    /// Grayscale values strictly below this count as ink (0–255).
    pub dark_threshold: u8,
    pub min_density: f64,
    pub clean_max: f64,
    pub taper_max: f64,
    pub clean_low: f64,
    pub clean_high: f64,
    pub taper_floor: f64,
    pub noisy_confidence: f64,
    pub absent_confidence: f64,
}

impl Default for SignatureBands {
    fn default() -> Self {
        Self {
            dark_threshold: 170,
            min_density: 0.02,
            clean_max: 0.10,
            taper_max: 0.12,
            clean_low: 0.72,
            clean_high: 0.88,
            taper_floor: 0.55,
            noisy_confidence: 0.55,
            absent_confidence: 0.92,
        }
    }
}

// ── Names ────────────────────────────────────────────────────────────────────

/// Roster, correction table and matching knobs for the name normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Canonical technician names, "First L".
    pub roster: Vec<String>,
    /// Raw OCR reading → canonical name, for misreads that recur.
    pub corrections: BTreeMap<String, String>,
    /// Minimum similarity for a fuzzy match to be accepted (inclusive).
    pub min_similarity: f64,
    pub metric: SimilarityMetric,
}

const DEFAULT_ROSTER: &[&str] = &[
    "Ali Z", "Anthony A", "Anthony B", "Austin L", "Bryce K", "Chance H", "Chris S", "Chuck D",
    "Darren B", "Darrin S", "Derek F", "Jimmy Y", "Kelvin B", "Koby H", "Ky S", "Lucas H",
    "Mark F", "Michael M", "Mike F", "Nick F", "Rory T", "Shannon G", "Travis M",
];

const DEFAULT_CORRECTIONS: &[(&str, &str)] = &[
    ("Dgrtey B", "Darren B"),
    ("Nigh F", "Nick F"),
    ("Aap B", "Anthony B"),
    ("Chugk B", "Chuck D"),
    ("Chugk D", "Chuck D"),
    // H is read as A, I or D
    ("Koby A", "Koby H"),
    ("Koby I", "Koby H"),
    ("Koby D", "Koby H"),
    ("Chance A", "Chance H"),
    ("Chance I", "Chance H"),
    // B is read as P or D
    ("Darren P", "Darren B"),
    ("Darren D", "Darren B"),
    ("Chuck B", "Chuck D"),
];

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            roster: DEFAULT_ROSTER.iter().map(|s| s.to_string()).collect(),
            corrections: DEFAULT_CORRECTIONS
                .iter()
                .map(|(raw, canon)| (raw.to_string(), canon.to_string()))
                .collect(),
            min_similarity: 0.65,
            metric: SimilarityMetric::default(),
        }
    }
}

// ── OCR ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Tesseract language codes ("en"/"eng", "de"/"deu", ...).
    pub languages: Vec<String>,
    /// Directory containing `tessdata/`. `None` → system default.
    pub tessdata_dir: Option<PathBuf>,
    /// Directory holding the oar-ocr recognition model and dictionary.
    pub oar_model_dir: Option<PathBuf>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            languages: vec!["eng".to_string()],
            tessdata_dir: None,
            oar_model_dir: None,
        }
    }
}

// ── Top level ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Folder containing one `YYYY-MM` sub-folder per month of scans.
    pub tickets_root: PathBuf,
    pub database_path: PathBuf,
    pub layout: RegionLayout,
    pub signature: SignatureBands,
    pub names: NormalizerConfig,
    pub ocr: OcrConfig,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            tickets_root: PathBuf::from("tickets"),
            database_path: PathBuf::from("audit.db"),
            layout: RegionLayout::default(),
            signature: SignatureBands::default(),
            names: NormalizerConfig::default(),
            ocr: OcrConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<AuditConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let cfg: AuditConfig = serde_json::from_str(&text)
        .with_context(|| format!("parse error in {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(path: &Path, config: &AuditConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
    }
    let text = serde_json::to_string_pretty(config).context("serialise error")?;
    fs::write(path, text).with_context(|| format!("cannot write {}", path.display()))
}
