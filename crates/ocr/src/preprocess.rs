use facture_core::PreprocessOptions;
use image::{imageops::FilterType, DynamicImage, GrayImage, Luma};
use std::io::Cursor;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Failed to decode scan: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Failed to encode processed scan: {0}")]
    Encode(String),
}

/// Decode an uploaded scan and return PNG bytes tuned for handwriting OCR.
pub fn prepare_scan(data: &[u8], options: &PreprocessOptions) -> Result<Vec<u8>, PreprocessError> {
    let img = image::load_from_memory(data)?;
    encode_png(enhance(img, options))
}

/// Downsize, convert to grayscale, stretch contrast and optionally threshold.
fn enhance(img: DynamicImage, options: &PreprocessOptions) -> GrayImage {
    let max = options.max_dimension.max(1);
    let img = if img.width() > max || img.height() > max {
        img.resize(max, max, FilterType::Lanczos3)
    } else {
        img
    };

    let mut gray = img.to_luma8();
    stretch_contrast(&mut gray);
    if let Some(threshold) = options.binarize_threshold {
        for p in gray.pixels_mut() {
            *p = Luma([if p[0] >= threshold { 255 } else { 0 }]);
        }
    }
    gray
}

/// Pencil on paper tends to occupy a narrow luma band; spread it to 0..=255.
fn stretch_contrast(gray: &mut GrayImage) {
    let (lo, hi) = gray
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
    if hi <= lo {
        return;
    }
    let range = u32::from(hi - lo);
    for p in gray.pixels_mut() {
        p[0] = (u32::from(p[0] - lo) * 255 / range) as u8;
    }
}

fn encode_png(gray: GrayImage) -> Result<Vec<u8>, PreprocessError> {
    let mut buf = Vec::new();
    DynamicImage::ImageLuma8(gray)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| PreprocessError::Encode(e.to_string()))?;
    Ok(buf)
}
