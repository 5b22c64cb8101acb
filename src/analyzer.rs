use image::{DynamicImage, GenericImageView};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::{AuditConfig, PixelRect, RegionLayout, SignatureBands};
use crate::names::{parse_technician_line, NameNormalizer};
use crate::ocr::{extract_text, Recognizer};
use crate::scanner::TicketId;
use crate::signature;

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("unreadable image {path}: {source}")]
    UnreadableImage {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("{0} does not follow the {{ticket}}{{variant}}.png naming convention")]
    UnrecognizedFileName(PathBuf),
}

/// Everything learned from one ticket scan.
#[derive(Debug, Clone, PartialEq)]
pub struct TicketAnalysis {
    pub file_path: PathBuf,
    pub ticket_number: String,
    pub variant: String,
    /// Unmodified OCR output of the name region (empty when nothing was read).
    pub raw_ocr_text: String,
    /// Canonical roster name, or `UNKNOWN`.
    pub technician_name: String,
    pub technician_role: Option<String>,
    pub name_confidence: f64,
    pub has_signature: bool,
    pub signature_confidence: f64,
    pub ink_density: f64,
}

/// Crops the technician line and signature box out of a ticket scan, reads
/// the name and classifies the signature.
pub struct TicketAnalyzer {
    layout: RegionLayout,
    bands: SignatureBands,
    normalizer: NameNormalizer,
    engines: Vec<Box<dyn Recognizer>>,
}

impl TicketAnalyzer {
    pub fn new(config: &AuditConfig, engines: Vec<Box<dyn Recognizer>>) -> Self {
        Self {
            layout: config.layout.clone(),
            bands: config.signature.clone(),
            normalizer: NameNormalizer::new(&config.names),
            engines,
        }
    }

    pub fn analyze(&self, path: &Path) -> Result<TicketAnalysis, AnalyzeError> {
        let id = TicketId::from_path(path)
            .ok_or_else(|| AnalyzeError::UnrecognizedFileName(path.to_path_buf()))?;
        let img = image::open(path).map_err(|source| AnalyzeError::UnreadableImage {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(self.analyze_image(path, id, &img))
    }

    /// Analysis of an already-decoded scan.
    pub fn analyze_image(&self, path: &Path, id: TicketId, img: &DynamicImage) -> TicketAnalysis {
        let (width, height) = img.dimensions();

        let name_rect = self.layout.name.to_pixels(width, height);
        let raw_ocr_text = if name_rect.is_empty() {
            String::new()
        } else {
            extract_text(&crop(img, name_rect), &self.engines)
        };
        let line = parse_technician_line(&raw_ocr_text);
        let name = self.normalizer.normalize(&line.name);

        let sig_rect = self.layout.signature.to_pixels(width, height);
        let verdict = signature::detect(&crop(img, sig_rect), &self.bands);

        log::info!(
            "[analyze] {} → {} ({:.2}), signature {} ({:.2}, ink {:.1}%)",
            path.display(),
            name.name,
            name.confidence,
            if verdict.present { "yes" } else { "no" },
            verdict.confidence,
            verdict.ink_density * 100.0,
        );

        let technician_role = line.role.filter(|_| name.is_known());
        TicketAnalysis {
            file_path: path.to_path_buf(),
            ticket_number: id.number,
            variant: id.variant,
            raw_ocr_text,
            technician_name: name.name,
            technician_role,
            name_confidence: name.confidence,
            has_signature: verdict.present,
            signature_confidence: verdict.confidence,
            ink_density: verdict.ink_density,
        }
    }
}

fn crop(img: &DynamicImage, rect: PixelRect) -> DynamicImage {
    img.crop_imm(rect.x, rect.y, rect.width, rect.height)
}
