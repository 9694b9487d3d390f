//! Deterministic image normalization.
//!
//! Every image entering the pipeline (catalog ingestion and search queries
//! alike) passes through the same canonicalization steps, so capture-condition
//! variance is removed before feature extraction:
//!
//! 1. non-local-means denoising (color-preserving, luminance-weighted)
//! 2. gray-world white balance in YCbCr
//! 3. histogram equalization of the luminance channel
//! 4. center square crop
//! 5. area resample to a fixed square resolution
//!
//! The transform is pure: identical input bytes produce byte-identical
//! canonical PNG output.

use image::imageops::FilterType;
use image::{ImageFormat, Rgb, RgbImage};
use rayon::prelude::*;
use std::io::Cursor;

use crate::error::{Error, Result};

/// Configuration for the normalization pipeline.
///
/// Defaults reproduce the production constants; they are surfaced here so
/// deployments can tune them without touching code.
#[derive(Debug, Clone)]
pub struct NormalizeConfig {
    /// Side length of the square canonical image.
    pub target_size: u32,
    /// Non-local-means filtering strength `h`.
    pub denoise_strength: f32,
    /// Patch size used for denoising weight comparison (odd).
    pub denoise_patch_size: u32,
    /// Search window around each pixel for denoising candidates (odd).
    pub denoise_search_window: u32,
    /// Gain applied to the gray-world chrominance correction.
    pub white_balance_gain: f32,
    /// Inputs larger than this are rejected before decoding.
    pub max_image_bytes: usize,
    /// Longest-side bound applied before denoising; `None` disables the
    /// bound and runs the five steps on the full-resolution input.
    pub max_input_dimension: Option<u32>,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            target_size: 512,
            denoise_strength: 10.0,
            denoise_patch_size: 7,
            denoise_search_window: 21,
            white_balance_gain: 1.1,
            max_image_bytes: 50 * 1024 * 1024,
            max_input_dimension: Some(2048),
        }
    }
}

/// A normalized, fixed-size square image ready for feature extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalImage {
    image: RgbImage,
}

impl CanonicalImage {
    #[inline]
    #[must_use]
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    #[inline]
    #[must_use]
    pub fn as_rgb(&self) -> &RgbImage {
        &self.image
    }

    #[must_use]
    pub fn into_rgb(self) -> RgbImage {
        self.image
    }

    /// Encode as PNG. Deterministic for a given pixel buffer; this is both
    /// the wire format to the extractor sidecar and the determinism contract
    /// of the normalizer.
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        self.image
            .write_to(&mut cursor, ImageFormat::Png)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(cursor.into_inner())
    }
}

/// Run the full normalization pipeline on raw image bytes.
///
/// Fails with [`Error::InvalidImage`] when the bytes cannot be decoded or
/// exceed the configured size bound; this is terminal and surfaced to the
/// caller as a rejected upload.
pub fn normalize(bytes: &[u8], cfg: &NormalizeConfig) -> Result<CanonicalImage> {
    if bytes.is_empty() {
        return Err(Error::InvalidImage("empty input".to_string()));
    }
    if bytes.len() > cfg.max_image_bytes {
        return Err(Error::InvalidImage(format!(
            "input of {} bytes exceeds limit of {}",
            bytes.len(),
            cfg.max_image_bytes
        )));
    }

    let decoded = image::load_from_memory(bytes)
        .map_err(|e| Error::InvalidImage(e.to_string()))?;
    let mut img = decoded.to_rgb8();

    if let Some(max_dim) = cfg.max_input_dimension {
        img = bound_input(&img, max_dim);
    }

    let img = denoise_nlm(&img, cfg);
    let img = gray_world_balance(&img, cfg.white_balance_gain);
    let img = equalize_luminance(&img);
    let img = center_square_crop(&img);
    let img = resize_square(&img, cfg.target_size);

    Ok(CanonicalImage::new(img))
}

#[inline]
fn luminance(p: &Rgb<u8>) -> f32 {
    0.299 * f32::from(p[0]) + 0.587 * f32::from(p[1]) + 0.114 * f32::from(p[2])
}

/// Full-range JPEG YCbCr, luminance and chrominance in 0..=255 with neutral
/// chrominance at 128.
#[inline]
fn rgb_to_ycbcr(p: &Rgb<u8>) -> (f32, f32, f32) {
    let r = f32::from(p[0]);
    let g = f32::from(p[1]);
    let b = f32::from(p[2]);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let cb = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
    let cr = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
    (y, cb, cr)
}

#[inline]
fn ycbcr_to_rgb(y: f32, cb: f32, cr: f32) -> Rgb<u8> {
    let r = y + 1.402 * (cr - 128.0);
    let g = y - 0.344_136 * (cb - 128.0) - 0.714_136 * (cr - 128.0);
    let b = y + 1.772 * (cb - 128.0);
    Rgb([clamp_u8(r), clamp_u8(g), clamp_u8(b)])
}

#[inline]
fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

#[inline]
fn clamp_index(i: isize, len: usize) -> usize {
    i.clamp(0, len as isize - 1) as usize
}

/// Pre-downscale oversized inputs so denoising cost stays bounded.
fn bound_input(img: &RgbImage, max_dim: u32) -> RgbImage {
    let (w, h) = img.dimensions();
    let longest = w.max(h);
    if longest <= max_dim || longest == 0 {
        return img.clone();
    }
    let scale = f64::from(max_dim) / f64::from(longest);
    let nw = ((f64::from(w) * scale).round() as u32).max(1);
    let nh = ((f64::from(h) * scale).round() as u32).max(1);
    image::imageops::thumbnail(img, nw, nh)
}

/// Color-preserving non-local-means denoising.
///
/// Weights are computed from luminance patch differences and applied to all
/// three channels, so chroma noise is averaged out without shifting hues.
/// The offset-loop formulation turns each patch SSD into an O(1) summed-area
/// lookup; the per-offset planes are parallelized over rows.
fn denoise_nlm(img: &RgbImage, cfg: &NormalizeConfig) -> RgbImage {
    let (w, h) = img.dimensions();
    let (w, h) = (w as usize, h as usize);
    if w == 0 || h == 0 {
        return img.clone();
    }

    let patch_r = (cfg.denoise_patch_size / 2) as isize;
    let search_r = (cfg.denoise_search_window / 2) as isize;
    let h2 = f64::from(cfg.denoise_strength * cfg.denoise_strength).max(f64::EPSILON);

    let luma: Vec<f32> = img.pixels().map(luminance).collect();

    // Per-pixel accumulators: weighted r, g, b and total weight.
    let mut acc = vec![[0.0f32; 4]; w * h];
    let mut d2 = vec![0.0f32; w * h];
    let mut integral = vec![0.0f64; (w + 1) * (h + 1)];
    let stride = w + 1;

    for dy in -search_r..=search_r {
        for dx in -search_r..=search_r {
            d2.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
                let sy = clamp_index(y as isize + dy, h);
                for (x, slot) in row.iter_mut().enumerate() {
                    let sx = clamp_index(x as isize + dx, w);
                    let d = luma[y * w + x] - luma[sy * w + sx];
                    *slot = d * d;
                }
            });

            for y in 0..h {
                let mut row_sum = 0.0f64;
                for x in 0..w {
                    row_sum += f64::from(d2[y * w + x]);
                    integral[(y + 1) * stride + (x + 1)] =
                        integral[y * stride + (x + 1)] + row_sum;
                }
            }

            let integral_ref: &[f64] = &integral;
            acc.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
                let sy = clamp_index(y as isize + dy, h);
                for (x, slot) in row.iter_mut().enumerate() {
                    let sx = clamp_index(x as isize + dx, w);
                    let ssd = patch_mean(integral_ref, stride, w, h, x, y, patch_r);
                    let weight = (-(ssd / h2)).exp() as f32;
                    let p = img.get_pixel(sx as u32, sy as u32);
                    slot[0] += weight * f32::from(p[0]);
                    slot[1] += weight * f32::from(p[1]);
                    slot[2] += weight * f32::from(p[2]);
                    slot[3] += weight;
                }
            });
        }
    }

    RgbImage::from_fn(w as u32, h as u32, |x, y| {
        let a = &acc[y as usize * w + x as usize];
        // total weight is >= 1 (the zero offset contributes weight 1)
        let inv = 1.0 / a[3];
        Rgb([
            clamp_u8(a[0] * inv),
            clamp_u8(a[1] * inv),
            clamp_u8(a[2] * inv),
        ])
    })
}

/// Mean squared luminance difference over the patch around `(x, y)`,
/// clamped to the image bounds.
#[inline]
fn patch_mean(
    integral: &[f64],
    stride: usize,
    w: usize,
    h: usize,
    x: usize,
    y: usize,
    r: isize,
) -> f64 {
    let x0 = (x as isize - r).max(0) as usize;
    let y0 = (y as isize - r).max(0) as usize;
    let x1 = (x as isize + r).min(w as isize - 1) as usize;
    let y1 = (y as isize + r).min(h as isize - 1) as usize;
    let sum = integral[(y1 + 1) * stride + (x1 + 1)]
        - integral[y0 * stride + (x1 + 1)]
        - integral[(y1 + 1) * stride + x0]
        + integral[y0 * stride + x0];
    let area = ((x1 - x0 + 1) * (y1 - y0 + 1)) as f64;
    sum / area
}

/// Gray-world white balance in YCbCr.
///
/// Shifts both chrominance channels toward neutral (128) proportionally to
/// the channel's average deviation and the per-pixel luminance fraction,
/// scaled by the configured gain. Compensates for colored ambient lighting.
fn gray_world_balance(img: &RgbImage, gain: f32) -> RgbImage {
    let (w, h) = img.dimensions();
    let count = f64::from(w) * f64::from(h);
    if count == 0.0 {
        return img.clone();
    }

    let mut sum_cb = 0.0f64;
    let mut sum_cr = 0.0f64;
    for p in img.pixels() {
        let (_, cb, cr) = rgb_to_ycbcr(p);
        sum_cb += f64::from(cb);
        sum_cr += f64::from(cr);
    }
    let avg_cb = (sum_cb / count) as f32;
    let avg_cr = (sum_cr / count) as f32;

    RgbImage::from_fn(w, h, |x, y| {
        let (yc, cb, cr) = rgb_to_ycbcr(img.get_pixel(x, y));
        let lum = yc / 255.0;
        let cb = cb - (avg_cb - 128.0) * lum * gain;
        let cr = cr - (avg_cr - 128.0) * lum * gain;
        ycbcr_to_rgb(yc, cb, cr)
    })
}

/// Histogram equalization of the luminance channel; chrominance untouched.
fn equalize_luminance(img: &RgbImage) -> RgbImage {
    let (w, h) = img.dimensions();
    let total = u64::from(w) * u64::from(h);
    if total == 0 {
        return img.clone();
    }

    let mut hist = [0u64; 256];
    for p in img.pixels() {
        let (yc, _, _) = rgb_to_ycbcr(p);
        hist[clamp_u8(yc) as usize] += 1;
    }

    let mut cdf = [0u64; 256];
    let mut running = 0u64;
    for (slot, count) in cdf.iter_mut().zip(hist.iter()) {
        running += count;
        *slot = running;
    }
    let cdf_min = cdf.iter().copied().find(|&c| c > 0).unwrap_or(0);
    if cdf_min == total {
        // constant luminance, nothing to equalize
        return img.clone();
    }

    let mut lut = [0u8; 256];
    let den = (total - cdf_min) as f64;
    for (i, slot) in lut.iter_mut().enumerate() {
        let num = cdf[i].saturating_sub(cdf_min) as f64;
        *slot = ((num / den) * 255.0).round() as u8;
    }

    RgbImage::from_fn(w, h, |x, y| {
        let (yc, cb, cr) = rgb_to_ycbcr(img.get_pixel(x, y));
        let equalized = f32::from(lut[clamp_u8(yc) as usize]);
        ycbcr_to_rgb(equalized, cb, cr)
    })
}

/// Crop to the largest centered square, discarding the longer axis
/// symmetrically. Origin uses the same integer arithmetic as the reference
/// pipeline (`w/2 - side/2`).
fn center_square_crop(img: &RgbImage) -> RgbImage {
    let (w, h) = img.dimensions();
    let side = w.min(h);
    if side == 0 || w == h {
        return img.clone();
    }
    let x0 = w / 2 - side / 2;
    let y0 = h / 2 - side / 2;
    image::imageops::crop_imm(img, x0, y0, side, side).to_image()
}

/// Resample a square image to the target resolution. Box sampling for
/// downscale (area averaging), triangle filter for the rare upscale.
fn resize_square(img: &RgbImage, target: u32) -> RgbImage {
    let (w, _) = img.dimensions();
    if w == target {
        return img.clone();
    }
    if w > target {
        image::imageops::thumbnail(img, target, target)
    } else {
        image::imageops::resize(img, target, target, FilterType::Triangle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cfg() -> NormalizeConfig {
        NormalizeConfig {
            target_size: 32,
            denoise_patch_size: 3,
            denoise_search_window: 5,
            ..NormalizeConfig::default()
        }
    }

    fn png_bytes(img: &RgbImage) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        img.write_to(&mut cursor, ImageFormat::Png).unwrap();
        cursor.into_inner()
    }

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            Rgb([
                (x * 5 % 256) as u8,
                (y * 7 % 256) as u8,
                ((x + y) * 3 % 256) as u8,
            ])
        })
    }

    #[test]
    fn test_determinism() {
        let bytes = png_bytes(&gradient(48, 20));
        let cfg = test_cfg();
        let a = normalize(&bytes, &cfg).unwrap();
        let b = normalize(&bytes, &cfg).unwrap();
        assert_eq!(a.as_rgb().as_raw(), b.as_rgb().as_raw());
        assert_eq!(a.to_png().unwrap(), b.to_png().unwrap());
    }

    #[test]
    fn test_output_is_square_at_target_size() {
        let cfg = test_cfg();
        for (w, h) in [(48, 20), (20, 48), (32, 32), (7, 300)] {
            let bytes = png_bytes(&gradient(w, h));
            let canonical = normalize(&bytes, &cfg).unwrap();
            assert_eq!(canonical.width(), cfg.target_size);
            assert_eq!(canonical.height(), cfg.target_size);
        }
    }

    #[test]
    fn test_undecodable_input_is_invalid_image() {
        let err = normalize(b"not an image", &test_cfg()).unwrap_err();
        assert!(matches!(err, Error::InvalidImage(_)));
    }

    #[test]
    fn test_empty_input_is_invalid_image() {
        let err = normalize(&[], &test_cfg()).unwrap_err();
        assert!(matches!(err, Error::InvalidImage(_)));
    }

    #[test]
    fn test_oversized_input_is_invalid_image() {
        let cfg = NormalizeConfig {
            max_image_bytes: 16,
            ..test_cfg()
        };
        let bytes = png_bytes(&gradient(8, 8));
        let err = normalize(&bytes, &cfg).unwrap_err();
        assert!(matches!(err, Error::InvalidImage(_)));
    }

    #[test]
    fn test_center_crop_origin() {
        // 6x3 image: side 3, x0 = 6/2 - 3/2 = 2, so columns 2..5 survive
        let img = RgbImage::from_fn(6, 3, |x, _| Rgb([x as u8, 0, 0]));
        let cropped = center_square_crop(&img);
        assert_eq!(cropped.dimensions(), (3, 3));
        assert_eq!(cropped.get_pixel(0, 0)[0], 2);
        assert_eq!(cropped.get_pixel(2, 0)[0], 4);
    }

    #[test]
    fn test_denoise_preserves_constant_image() {
        let img = RgbImage::from_pixel(10, 10, Rgb([90, 120, 40]));
        let out = denoise_nlm(&img, &test_cfg());
        assert_eq!(out.as_raw(), img.as_raw());
    }

    #[test]
    fn test_white_balance_neutral_gray_unchanged() {
        let img = RgbImage::from_pixel(8, 8, Rgb([128, 128, 128]));
        let out = gray_world_balance(&img, 1.1);
        assert_eq!(out.as_raw(), img.as_raw());
    }

    #[test]
    fn test_equalize_stretches_two_tone() {
        // half dark gray, half mid gray: equalization must push the brighter
        // half to full range
        let img = RgbImage::from_fn(8, 8, |x, _| {
            if x < 4 {
                Rgb([50, 50, 50])
            } else {
                Rgb([100, 100, 100])
            }
        });
        let out = equalize_luminance(&img);
        assert!(out.get_pixel(7, 0)[0] > 200);
        assert!(out.get_pixel(0, 0)[0] < out.get_pixel(7, 0)[0]);
    }

    #[test]
    fn test_input_bound_caps_longest_side() {
        let img = gradient(100, 40);
        let bounded = bound_input(&img, 50);
        assert_eq!(bounded.dimensions(), (50, 20));
        // already within the bound: untouched
        let small = gradient(30, 20);
        assert_eq!(bound_input(&small, 50).dimensions(), (30, 20));
    }
}
