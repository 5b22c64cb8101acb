use anyhow::{anyhow, Result};
use image::{DynamicImage, GenericImageView, GrayImage, Luma};
use imageproc::{contrast::equalize_histogram, filter::gaussian_blur_f32};
use tesseract::{PageSegMode, Tesseract};

use super::{OcrResult, Recognizer};
use crate::config::OcrConfig;

/// Upscale factor applied before the enhanced pipelines. The name line is
/// ~4 % of page height, which on a 150 dpi scan is too short for Tesseract.
const UPSCALE: u32 = 3;

/// How to prepare the crop before handing it to Tesseract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preprocess {
    /// Upscale → grayscale → auto-invert → hist-eq → blur → binary threshold.
    Binary,
    /// Same as `Binary` but without the final threshold (enhanced grayscale).
    Gray,
    /// Just `to_luma8()`, no enhancement.
    RawGray,
}

pub struct TesseractRecognizer {
    pub languages: Vec<String>,
    pub preprocess: Preprocess,
    /// Parent of `tessdata/`; `None` uses the system default.
    pub tessdata_dir: Option<String>,
}

impl Recognizer for TesseractRecognizer {
    fn name(&self) -> &str {
        match self.preprocess {
            Preprocess::Binary => "tesseract/binary",
            Preprocess::Gray => "tesseract/gray",
            Preprocess::RawGray => "tesseract/raw-gray",
        }
    }

    fn recognize(&self, crop: &DynamicImage) -> Option<OcrResult> {
        let gray = match self.preprocess {
            Preprocess::Binary => preprocess_bw(crop, true),
            Preprocess::Gray => preprocess_bw(crop, false),
            Preprocess::RawGray => crop.to_luma8(),
        };
        let lang = build_lang(&self.languages);
        match single_line(&gray, self.tessdata_dir.as_deref(), &lang) {
            Ok(Some((text, confidence))) => Some(OcrResult {
                text,
                confidence,
                engine_name: self.name().to_string(),
            }),
            Ok(None) => None,
            Err(e) => {
                log::warn!("[ocr] {} failed: {e:#}", self.name());
                None
            }
        }
    }
}

/// The standard Tesseract variants, enhanced first.
pub fn engines(config: &OcrConfig) -> Vec<Box<dyn Recognizer>> {
    let tessdata_dir = config
        .tessdata_dir
        .as_ref()
        .filter(|d| d.join("tessdata").is_dir())
        .map(|d| d.to_string_lossy().to_string());
    match &tessdata_dir {
        Some(td) => log::info!("tesseract tessdata found at {td:?}"),
        None => log::info!("using system tesseract tessdata"),
    }

    [Preprocess::Binary, Preprocess::Gray, Preprocess::RawGray]
        .into_iter()
        .map(|preprocess| {
            Box::new(TesseractRecognizer {
                languages: config.languages.clone(),
                preprocess,
                tessdata_dir: tessdata_dir.clone(),
            }) as Box<dyn Recognizer>
        })
        .collect()
}

/// Recognize one line of text (`--psm 7`). `Ok(None)` when the page is blank.
fn single_line(img: &GrayImage, datadir: Option<&str>, lang: &str) -> Result<Option<(String, f64)>> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Ok(None);
    }
    let mut tess = Tesseract::new(datadir, Some(lang))
        .map_err(|e| anyhow!("init ({lang}): {e}"))?
        .set_frame(img.as_raw(), w as i32, h as i32, 1, w as i32)
        .map_err(|e| anyhow!("set_frame: {e}"))?;
    tess.set_page_seg_mode(PageSegMode::PsmSingleLine);
    let mut tess = tess.recognize().map_err(|e| anyhow!("recognize: {e}"))?;

    let raw = tess.get_text().map_err(|e| anyhow!("get_text: {e}"))?;
    let trimmed = raw.trim().to_string();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let conf = tess.mean_text_conf().max(0) as f64 / 100.0;
    Ok(Some((trimmed, conf)))
}

/// Pipeline: Lanczos upscale → grayscale → auto-invert dark bg →
///           histogram equalisation → σ=1.0 Gaussian blur →
///           (optional binary threshold) → 15 px white border.
fn preprocess_bw(img: &DynamicImage, binarize: bool) -> GrayImage {
    let (w, h) = img.dimensions();
    let scaled = img.resize(
        (w * UPSCALE).max(1),
        (h * UPSCALE).max(1),
        image::imageops::FilterType::Lanczos3,
    );
    let mut gray = scaled.to_luma8();

    // Auto-invert if background is dark
    let mean: u64 = gray.pixels().map(|p| p[0] as u64).sum::<u64>()
        / (gray.width() as u64 * gray.height() as u64).max(1);
    if mean < 140 {
        for p in gray.pixels_mut() {
            p[0] = 255 - p[0];
        }
    }

    gray = equalize_histogram(&gray);
    gray = gaussian_blur_f32(&gray, 1.0);

    if binarize {
        for p in gray.pixels_mut() {
            p[0] = if p[0] > 100 { 255 } else { 0 };
        }
    }

    // White border helps Tesseract find the text block
    let pad = 15u32;
    let (gw, gh) = gray.dimensions();
    let mut padded = GrayImage::from_pixel(gw + pad * 2, gh + pad * 2, Luma([255u8]));
    image::imageops::overlay(&mut padded, &gray, pad as i64, pad as i64);
    padded
}

fn build_lang(languages: &[String]) -> String {
    if languages.is_empty() {
        return "eng".to_string();
    }
    languages
        .iter()
        .map(|l| match l.trim() {
            "en" | "eng" => "eng",
            "de" | "deu" => "deu",
            "fr" | "fra" => "fra",
            "es" | "spa" => "spa",
            other => other,
        })
        .collect::<Vec<_>>()
        .join("+")
}
