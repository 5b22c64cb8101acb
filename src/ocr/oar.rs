use anyhow::{anyhow, Result};
use image::{imageops::FilterType, DynamicImage};
use oar_ocr::predictors::TextRecognitionPredictor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{OcrResult, Recognizer};
use crate::config::OcrConfig;

/// Minimum height fed to PaddleOCR v5 mobile (normalises inputs to 48 px internally).
const MIN_HEIGHT: u32 = 48;

const REC_MODEL: &str = "pp-ocrv5_mobile_rec.onnx";
const DICT: &str = "ppocrv5_dict.txt";

// ── Pipeline ──────────────────────────────────────────────────────────────────

pub struct OarPipeline {
    rec: TextRecognitionPredictor,
}

/// Build the recognition-only pipeline. The name region is already cropped
/// to the text line, so no detection model is needed.
pub fn build_pipeline(rec_model: &Path, dict: &Path) -> Result<OarPipeline> {
    let rec = TextRecognitionPredictor::builder()
        .dict_path(dict)
        .score_threshold(0.0)
        .build(rec_model)
        .map_err(|e| anyhow!("oar-ocr init: {e}"))?;
    Ok(OarPipeline { rec })
}

// ── Recognizer impl ───────────────────────────────────────────────────────────

/// Which colour space to present to the recognition model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    /// Pass the crop as-is (RGB).
    Rgb,
    /// Convert to grayscale and promote back to RGB (L, L, L channels).
    Grayscale,
}

pub struct OarRecognizer {
    pub pipeline: Arc<OarPipeline>,
    pub color_mode: ColorMode,
}

impl Recognizer for OarRecognizer {
    fn name(&self) -> &str {
        match self.color_mode {
            ColorMode::Rgb => "oar-ocr/rgb",
            ColorMode::Grayscale => "oar-ocr/gray",
        }
    }

    fn recognize(&self, crop: &DynamicImage) -> Option<OcrResult> {
        let img = match self.color_mode {
            ColorMode::Rgb => crop.to_rgb8(),
            ColorMode::Grayscale => DynamicImage::ImageLuma8(crop.to_luma8()).to_rgb8(),
        };

        let (orig_w, orig_h) = (img.width(), img.height());
        if orig_w == 0 || orig_h == 0 {
            return None;
        }

        let img = if orig_h < MIN_HEIGHT {
            let scale = (MIN_HEIGHT + orig_h - 1) / orig_h;
            DynamicImage::ImageRgb8(img)
                .resize(orig_w * scale, orig_h * scale, FilterType::Lanczos3)
                .to_rgb8()
        } else {
            img
        };

        let result = match self.pipeline.rec.predict(vec![img]) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("[oar] predict error: {e}");
                return None;
            }
        };

        let text = result.texts.into_iter().next()?;
        let score = result.scores.into_iter().next().unwrap_or(0.0);

        if text.is_empty() {
            return None;
        }

        Some(OcrResult {
            text,
            confidence: score as f64,
            engine_name: self.name().to_string(),
        })
    }
}

/// RGB and grayscale recognizers sharing one pipeline, or none when the model
/// files cannot be found or loaded.
pub fn engines(config: &OcrConfig) -> Vec<Box<dyn Recognizer>> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(dir) = &config.oar_model_dir {
        candidates.push(dir.clone());
    }
    candidates.push(PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("models"));

    let Some(dir) = candidates
        .iter()
        .find(|d| d.join(REC_MODEL).exists() && d.join(DICT).exists())
    else {
        log::warn!("oar-ocr models not found in {candidates:?}");
        return vec![];
    };

    match build_pipeline(&dir.join(REC_MODEL), &dir.join(DICT)) {
        Ok(pipeline) => {
            log::info!("oar-ocr pipeline ready (models: {dir:?})");
            let pipeline = Arc::new(pipeline);
            vec![
                Box::new(OarRecognizer { pipeline: pipeline.clone(), color_mode: ColorMode::Rgb })
                    as Box<dyn Recognizer>,
                Box::new(OarRecognizer { pipeline, color_mode: ColorMode::Grayscale }),
            ]
        }
        Err(e) => {
            log::warn!("{e:#}");
            vec![]
        }
    }
}
