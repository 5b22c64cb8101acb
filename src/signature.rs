use image::{DynamicImage, GrayImage};

use crate::config::SignatureBands;

/// Which band of `SignatureBands` a density fell into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DensityBand {
    Blank,
    Clean,
    Taper,
    Noisy,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignatureVerdict {
    pub present: bool,
    /// Certainty of the verdict: of presence when `present`, of absence otherwise.
    pub confidence: f64,
    pub ink_density: f64,
    pub band: DensityBand,
}

/// Fraction of pixels strictly darker than `threshold`. Empty images → 0.0.
pub fn ink_density(gray: &GrayImage, threshold: u8) -> f64 {
    let total = gray.width() as u64 * gray.height() as u64;
    if total == 0 {
        return 0.0;
    }
    let dark = gray.pixels().filter(|p| p[0] < threshold).count() as u64;
    dark as f64 / total as f64
}

/// Grayscale the crop, measure ink, classify.
pub fn detect(region: &DynamicImage, bands: &SignatureBands) -> SignatureVerdict {
    let gray = region.to_luma8();
    classify(ink_density(&gray, bands.dark_threshold), bands)
}

pub fn classify(density: f64, bands: &SignatureBands) -> SignatureVerdict {
    let (present, confidence, band) = if density < bands.min_density {
        (false, bands.absent_confidence, DensityBand::Blank)
    } else if density <= bands.clean_max {
        let t = progress(density, bands.min_density, bands.clean_max);
        (true, lerp(bands.clean_low, bands.clean_high, t), DensityBand::Clean)
    } else if density <= bands.taper_max {
        let t = progress(density, bands.clean_max, bands.taper_max);
        (true, lerp(bands.clean_high, bands.taper_floor, t), DensityBand::Taper)
    } else {
        (true, bands.noisy_confidence, DensityBand::Noisy)
    };

    SignatureVerdict {
        present,
        confidence,
        ink_density: density,
        band,
    }
}

/// Position of `x` within `[lo, hi]` as 0.0 – 1.0. A degenerate band counts as fully traversed.
fn progress(x: f64, lo: f64, hi: f64) -> f64 {
    if hi <= lo {
        return 1.0;
    }
    ((x - lo) / (hi - lo)).clamp(0.0, 1.0)
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}
