//! Photo normalization ahead of text recognition.
//!
//! [`ImagePreprocessor::preprocess`] produces the binarized, deskewed page
//! used for the block-layout OCR pass. [`ImagePreprocessor::enhance_contrast`]
//! is a lighter pipeline whose output feeds the second, automatic-layout pass.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageError, ImageFormat, Luma};
use imageproc::contrast::stretch_contrast;
use imageproc::distance_transform::Norm;
use imageproc::filter::box_filter;
use imageproc::geometric_transformations::{warp_with, Interpolation};
use imageproc::geometry::min_area_rect;
use imageproc::morphology::close;
use imageproc::point::Point;
use thiserror::Error;

const DARK_LEVEL: u8 = 128;
const MIN_SKEW_POINTS: usize = 32;
const MIN_SKEW_DEGREES: f32 = 0.1;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("failed to decode photo: {0}")]
    Decode(#[source] ImageError),
    #[error("failed to encode image: {0}")]
    Encode(#[source] ImageError),
    #[error("photo has no pixels")]
    Empty,
}

#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    /// Larger photos are downscaled first; denoising cost grows with area.
    pub max_dimension: u32,
    pub denoise_strength: f32,
    pub denoise_search_radius: u32,
    pub threshold_block_radius: u32,
    /// A pixel is foreground when it is this much darker than its local mean.
    pub threshold_offset: i16,
    pub contrast_boost: f32,
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self {
            max_dimension: 1600,
            denoise_strength: 10.0,
            denoise_search_radius: 2,
            threshold_block_radius: 5,
            threshold_offset: 10,
            contrast_boost: 40.0,
        }
    }
}

impl ImagePreprocessor {
    pub fn decode(&self, photo: &[u8]) -> Result<DynamicImage, PreprocessError> {
        let image = image::load_from_memory(photo).map_err(PreprocessError::Decode)?;
        if image.width() == 0 || image.height() == 0 {
            return Err(PreprocessError::Empty);
        }
        Ok(image)
    }

    /// Grayscale, non-local-means denoise, adaptive binarization, closing,
    /// then deskew. Text ends up black on white.
    pub fn preprocess(&self, photo: &DynamicImage) -> Result<GrayImage, PreprocessError> {
        if photo.width() == 0 || photo.height() == 0 {
            return Err(PreprocessError::Empty);
        }

        let gray = self.bounded(photo).to_luma8();
        let denoised = denoise(&gray, self.denoise_strength, self.denoise_search_radius);
        let binary = self.binarize(&denoised);
        let closed = close_strokes(&binary);

        match estimate_skew(&closed) {
            Some(angle) if angle.abs() >= MIN_SKEW_DEGREES => {
                tracing::debug!(angle, "Deskewing photo");
                Ok(rotate(&closed, angle))
            }
            _ => Ok(closed),
        }
    }

    /// Grayscale, level stretch, contrast boost, sharpen.
    pub fn enhance_contrast(&self, photo: &DynamicImage) -> GrayImage {
        let stretched = autocontrast(&self.bounded(photo).to_luma8());
        DynamicImage::ImageLuma8(stretched)
            .adjust_contrast(self.contrast_boost)
            .unsharpen(1.0, 2)
            .to_luma8()
    }

    pub fn encode_jpeg_base64(&self, photo: &DynamicImage) -> Result<String, PreprocessError> {
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(self.bounded(photo).to_rgb8())
            .write_to(&mut buffer, ImageFormat::Jpeg)
            .map_err(PreprocessError::Encode)?;
        Ok(STANDARD.encode(buffer.into_inner()))
    }

    fn bounded(&self, photo: &DynamicImage) -> DynamicImage {
        if photo.width().max(photo.height()) <= self.max_dimension {
            return photo.clone();
        }
        photo.resize(self.max_dimension, self.max_dimension, FilterType::Triangle)
    }

    fn binarize(&self, image: &GrayImage) -> GrayImage {
        let radius = self.threshold_block_radius;
        let local_mean = box_filter(image, radius, radius);
        let offset = self.threshold_offset;

        GrayImage::from_fn(image.width(), image.height(), |x, y| {
            let value = i16::from(image.get_pixel(x, y)[0]);
            let mean = i16::from(local_mean.get_pixel(x, y)[0]);
            if value < mean - offset {
                Luma([0])
            } else {
                Luma([255])
            }
        })
    }
}

/// Non-local means with 3x3 patches. Each pixel becomes a weighted mean of
/// pixels in its search window, weighted by patch similarity.
fn denoise(image: &GrayImage, strength: f32, search_radius: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    let raw = image.as_raw();
    let max_x = i64::from(width) - 1;
    let max_y = i64::from(height) - 1;
    let at = |x: i64, y: i64| -> f32 {
        let index = y.clamp(0, max_y) * i64::from(width) + x.clamp(0, max_x);
        f32::from(raw[index as usize])
    };

    let h2 = (strength * strength).max(f32::EPSILON);
    let search = i64::from(search_radius);

    GrayImage::from_fn(width, height, |x, y| {
        let (x, y) = (i64::from(x), i64::from(y));
        let mut weighted = 0.0_f32;
        let mut total = 0.0_f32;

        for sy in -search..=search {
            for sx in -search..=search {
                let (qx, qy) = (x + sx, y + sy);
                let mut distance = 0.0_f32;
                for py in -1..=1 {
                    for px in -1..=1 {
                        let diff = at(x + px, y + py) - at(qx + px, qy + py);
                        distance += diff * diff;
                    }
                }
                let weight = (-(distance / 9.0) / h2).exp();
                weighted += weight * at(qx, qy);
                total += weight;
            }
        }

        Luma([(weighted / total).round().clamp(0.0, 255.0) as u8])
    })
}

fn close_strokes(binary: &GrayImage) -> GrayImage {
    // Morphology treats bright pixels as foreground, so invert around it.
    let mut strokes = binary.clone();
    image::imageops::invert(&mut strokes);
    let mut closed = close(&strokes, Norm::LInf, 1);
    image::imageops::invert(&mut closed);
    closed
}

/// Skew of the dark content in degrees, normalized into (-45, 45].
fn estimate_skew(image: &GrayImage) -> Option<f32> {
    let points: Vec<Point<i32>> = image
        .enumerate_pixels()
        .filter(|(_, _, pixel)| pixel[0] < DARK_LEVEL)
        .map(|(x, y, _)| Point::new(x as i32, y as i32))
        .collect();
    if points.len() < MIN_SKEW_POINTS {
        return None;
    }

    let corners = min_area_rect(&points);
    let dx = (corners[1].x - corners[0].x) as f32;
    let dy = (corners[1].y - corners[0].y) as f32;
    if dx == 0.0 && dy == 0.0 {
        return None;
    }

    let mut angle = dy.atan2(dx).to_degrees();
    while angle > 45.0 {
        angle -= 90.0;
    }
    while angle <= -45.0 {
        angle += 90.0;
    }
    Some(angle)
}

/// Rotates content tilted by `angle_degrees` back to horizontal about the
/// image center. Samples outside the page take the nearest edge pixel.
fn rotate(image: &GrayImage, angle_degrees: f32) -> GrayImage {
    let (width, height) = image.dimensions();
    let (sin, cos) = angle_degrees.to_radians().sin_cos();
    let cx = (width as f32 - 1.0) / 2.0;
    let cy = (height as f32 - 1.0) / 2.0;
    let max_x = width as f32 - 1.0;
    let max_y = height as f32 - 1.0;

    warp_with(
        image,
        move |x, y| {
            let (dx, dy) = (x - cx, y - cy);
            let sx = cx + dx * cos - dy * sin;
            let sy = cy + dx * sin + dy * cos;
            (sx.clamp(0.0, max_x), sy.clamp(0.0, max_y))
        },
        Interpolation::Bicubic,
        Luma([255]),
    )
}

fn autocontrast(image: &GrayImage) -> GrayImage {
    let (low, high) = image
        .pixels()
        .fold((u8::MAX, u8::MIN), |(low, high), pixel| (low.min(pixel[0]), high.max(pixel[0])));
    if high <= low {
        return image.clone();
    }
    stretch_contrast(image, low, high, 0, 255)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    fn tilted_band(angle_degrees: f32) -> GrayImage {
        let (sin, cos) = angle_degrees.to_radians().sin_cos();
        GrayImage::from_fn(200, 200, |x, y| {
            let dx = x as f32 - 100.0;
            let dy = y as f32 - 100.0;
            let along = dx * cos + dy * sin;
            let across = -dx * sin + dy * cos;
            if along.abs() < 80.0 && across.abs() < 3.0 {
                Luma([0])
            } else {
                Luma([255])
            }
        })
    }

    #[test]
    fn skew_of_tilted_band_is_detected() {
        let angle = estimate_skew(&tilted_band(10.0)).expect("angle");
        assert!((angle - 10.0).abs() < 1.5, "detected {angle}");

        let angle = estimate_skew(&tilted_band(-7.0)).expect("angle");
        assert!((angle + 7.0).abs() < 1.5, "detected {angle}");
    }

    #[test]
    fn rotation_levels_tilted_content() {
        let straightened = rotate(&tilted_band(10.0), 10.0);
        let angle = estimate_skew(&straightened).expect("angle");
        assert!(angle.abs() < 1.5, "residual skew {angle}");
    }

    #[test]
    fn blank_page_has_no_skew_and_stays_white() {
        let blank = DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 48, Luma([230])));
        let processed = ImagePreprocessor::default().preprocess(&blank).expect("preprocess");

        assert_eq!(processed.dimensions(), (64, 48));
        assert!(processed.pixels().all(|pixel| pixel[0] == 255));
        assert!(estimate_skew(&processed).is_none());
    }

    #[test]
    fn binarization_keeps_dark_strokes() {
        let page = GrayImage::from_fn(60, 60, |x, _| if (28..32).contains(&x) { Luma([40]) } else { Luma([210]) });
        let processed = ImagePreprocessor::default()
            .preprocess(&DynamicImage::ImageLuma8(page))
            .expect("preprocess");

        assert_eq!(processed.get_pixel(30, 30)[0], 0);
        assert_eq!(processed.get_pixel(5, 30)[0], 255);
    }

    #[test]
    fn denoise_flattens_fine_grain_noise() {
        let noisy =
            GrayImage::from_fn(24, 24, |x, y| if (x + y) % 2 == 0 { Luma([97]) } else { Luma([103]) });
        let smoothed = denoise(&noisy, 10.0, 2);

        assert!(smoothed.pixels().all(|pixel| (i16::from(pixel[0]) - 100).abs() < 3));
    }

    #[test]
    fn enhance_contrast_widens_the_tonal_range() {
        let flat = GrayImage::from_fn(40, 40, |x, _| Luma([100 + (x as u8)]));
        let enhanced = ImagePreprocessor::default().enhance_contrast(&DynamicImage::ImageLuma8(flat));

        let low = enhanced.pixels().map(|pixel| pixel[0]).min().expect("pixels");
        let high = enhanced.pixels().map(|pixel| pixel[0]).max().expect("pixels");
        assert!(high - low > 200, "range {low}..{high}");
    }

    #[test]
    fn autocontrast_maps_extremes_to_full_range() {
        let narrow = GrayImage::from_fn(4, 1, |x, _| Luma([[90, 100, 110, 120][x as usize]]));
        let stretched = autocontrast(&narrow);

        assert_eq!(stretched.get_pixel(0, 0)[0], 0);
        assert_eq!(stretched.get_pixel(3, 0)[0], 255);
        assert_eq!(autocontrast(&GrayImage::from_pixel(3, 3, Luma([77]))).get_pixel(1, 1)[0], 77);
    }

    #[test]
    fn large_photos_are_downscaled() {
        let preprocessor = ImagePreprocessor { max_dimension: 50, ..ImagePreprocessor::default() };
        let photo = DynamicImage::ImageLuma8(GrayImage::from_pixel(200, 100, Luma([255])));

        let processed = preprocessor.preprocess(&photo).expect("preprocess");
        assert_eq!(processed.dimensions(), (50, 25));
    }

    #[test]
    fn undecodable_bytes_are_rejected() {
        let err = ImagePreprocessor::default().decode(b"not an image").expect_err("decode fails");
        assert!(matches!(err, PreprocessError::Decode(_)));
    }

    #[test]
    fn jpeg_encoding_round_trips_through_decode() {
        let preprocessor = ImagePreprocessor::default();
        let photo = DynamicImage::ImageLuma8(GrayImage::from_pixel(16, 16, Luma([128])));
        let encoded = preprocessor.encode_jpeg_base64(&photo).expect("encode");
        let bytes = STANDARD.decode(encoded).expect("base64");

        assert_eq!(preprocessor.decode(&bytes).expect("decode").dimensions(), (16, 16));
    }
}
