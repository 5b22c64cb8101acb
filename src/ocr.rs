#[cfg(feature = "oar")]
pub mod oar;
#[cfg(feature = "tesseract")]
pub mod tesseract;

use image::DynamicImage;

use crate::config::OcrConfig;

// ── Public types ─────────────────────────────────────────────────────────────

/// Result produced by a single `Recognizer` for one crop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OcrResult {
    pub text: String,
    pub confidence: f64,     // 0.0 – 1.0
    pub engine_name: String, // e.g. "tesseract/binary", "oar-ocr/rgb"
}

/// Every OCR backend implements this.
///
/// `recognize` gets the already-cropped region by reference and is expected to
/// read a single line of text from it. `None` means the engine produced nothing
/// usable (no text, or an engine error it has already logged).
pub trait Recognizer {
    fn name(&self) -> &str;
    fn recognize(&self, crop: &DynamicImage) -> Option<OcrResult>;
}

// ── Orchestration ────────────────────────────────────────────────────────────

/// Run every engine on `crop` and keep the most confident non-empty reading.
/// Ties go to the engine listed first.
pub fn read_line(crop: &DynamicImage, engines: &[Box<dyn Recognizer>]) -> Option<OcrResult> {
    let mut best: Option<OcrResult> = None;
    for engine in engines {
        let Some(r) = engine.recognize(crop) else {
            log::debug!("[ocr]  {:25}  <nothing>", engine.name());
            continue;
        };
        log::debug!(
            "[ocr]  {:25}  {:?}  conf={:.3}",
            r.engine_name, r.text, r.confidence
        );
        if r.text.trim().is_empty() {
            continue;
        }
        if best.as_ref().map_or(true, |b| r.confidence > b.confidence) {
            best = Some(r);
        }
    }
    best
}

/// Text of the best reading, or an empty string when no engine read anything.
pub fn extract_text(crop: &DynamicImage, engines: &[Box<dyn Recognizer>]) -> String {
    read_line(crop, engines).map(|r| r.text).unwrap_or_default()
}

/// Build the engine list for the backends compiled into this binary.
///
/// With oar-ocr enabled its recognizers come first; Tesseract variants follow.
/// To add a backend: implement `Recognizer` in `src/ocr/<backend>.rs` and push
/// it here.
#[allow(unused_mut, unused_variables)]
pub fn build_engines(config: &OcrConfig) -> Vec<Box<dyn Recognizer>> {
    let mut engines: Vec<Box<dyn Recognizer>> = Vec::new();

    #[cfg(feature = "oar")]
    engines.extend(oar::engines(config));

    #[cfg(feature = "tesseract")]
    engines.extend(tesseract::engines(config));

    if engines.is_empty() {
        log::warn!(
            "no OCR backend available (build with --features tesseract or oar); \
             every technician will read as unknown"
        );
    }
    engines
}
