//! Plate image preprocessing.
//!
//! OCR on small, glary plate crops is sensitive to which filter chain matches the
//! lighting, so [`PlateVariants`] keeps every intermediate and binary rendition.

use crate::image::{Image, ResizeFilter, resize_exact};
use image::{GrayImage, Luma};
use imageproc::{
    contrast::otsu_level,
    distance_transform::Norm,
    filter::gaussian_blur_f32,
    geometric_transformations::{Interpolation, rotate_about_center},
    geometry::min_area_rect,
    morphology::close,
    point::Point,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

/// Plates narrower than this are upscaled before preprocessing.
pub const MIN_PLATE_WIDTH: usize = 200;
/// Skew below this many degrees is left alone.
pub const DESKEW_MIN_ANGLE: f32 = 2.0;

const NLM_STRENGTH: f32 = 10.0;
const NLM_TEMPLATE_WINDOW: u32 = 7;
const NLM_SEARCH_WINDOW: u32 = 21;
const CLAHE_GRID: u32 = 8;
const ADAPTIVE_BLOCK_SIZE: u32 = 15;
const ADAPTIVE_C: i16 = 3;
const SHARPEN_KERNEL: [f32; 9] = [-1.0, -1.0, -1.0, -1.0, 9.0, -1.0, -1.0, -1.0, -1.0];

/// Contrast limited adaptive histogram equalization over a `grid` x `grid` tiling,
/// with bilinear blending between neighbouring tile mappings.
pub fn clahe(gray: &GrayImage, clip_limit: f32, grid: u32) -> GrayImage {
    let (width, height) = (gray.width() as usize, gray.height() as usize);
    if width == 0 || height == 0 {
        return gray.clone();
    }
    let grid = grid.max(1) as usize;
    let tile_w = width.div_ceil(grid.min(width));
    let tile_h = height.div_ceil(grid.min(height));
    let tiles_x = width.div_ceil(tile_w);
    let tiles_y = height.div_ceil(tile_h);
    let src = gray.as_raw();

    let mut luts = vec![[0u8; 256]; tiles_x * tiles_y];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let (x0, y0) = (tx * tile_w, ty * tile_h);
            let (x1, y1) = ((x0 + tile_w).min(width), (y0 + tile_h).min(height));
            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for &v in &src[y * width + x0..y * width + x1] {
                    hist[v as usize] += 1;
                }
            }
            let area = ((x1 - x0) * (y1 - y0)) as u32;
            if clip_limit > 0.0 {
                clip_histogram(&mut hist, ((clip_limit * area as f32 / 256.0) as u32).max(1));
            }
            let scale = 255.0 / area as f32;
            let lut = &mut luts[ty * tiles_x + tx];
            let mut cdf = 0u32;
            for (value, count) in hist.iter().enumerate() {
                cdf += count;
                lut[value] = (cdf as f32 * scale).round().min(255.0) as u8;
            }
        }
    }

    // Tile coordinate of a pixel center, split into the two tiles to blend and the blend weight.
    let blend = |pos: usize, tile: usize, tiles: usize| {
        let f = (pos as f32 + 0.5) / tile as f32 - 0.5;
        let lo = f.floor().max(0.0) as usize;
        let lo = lo.min(tiles - 1);
        let hi = (lo + 1).min(tiles - 1);
        let weight = (f - lo as f32).clamp(0.0, 1.0);
        (lo, hi, weight)
    };

    let mut out = GrayImage::new(width as u32, height as u32);
    for y in 0..height {
        let (ty0, ty1, wy) = blend(y, tile_h, tiles_y);
        for x in 0..width {
            let (tx0, tx1, wx) = blend(x, tile_w, tiles_x);
            let v = src[y * width + x] as usize;
            let top = luts[ty0 * tiles_x + tx0][v] as f32 * (1.0 - wx)
                + luts[ty0 * tiles_x + tx1][v] as f32 * wx;
            let bottom = luts[ty1 * tiles_x + tx0][v] as f32 * (1.0 - wx)
                + luts[ty1 * tiles_x + tx1][v] as f32 * wx;
            let value = top * (1.0 - wy) + bottom * wy;
            out.put_pixel(x as u32, y as u32, Luma([value.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

fn clip_histogram(hist: &mut [u32; 256], clip: u32) {
    let mut excess = 0u32;
    for count in hist.iter_mut() {
        if *count > clip {
            excess += *count - clip;
            *count = clip;
        }
    }
    let batch = excess / 256;
    let mut residual = excess % 256;
    for count in hist.iter_mut() {
        *count += batch;
    }
    if residual > 0 {
        let step = (256 / residual as usize).max(1);
        for count in hist.iter_mut().step_by(step) {
            if residual == 0 {
                break;
            }
            *count += 1;
            residual -= 1;
        }
    }
}

/// Non-local means denoising. Patch distances for each search offset come from one
/// integral image of squared differences.
pub fn nl_means_denoise(
    gray: &GrayImage,
    strength: f32,
    template_window: u32,
    search_window: u32,
) -> GrayImage {
    let (width, height) = (gray.width() as usize, gray.height() as usize);
    if width == 0 || height == 0 {
        return gray.clone();
    }
    let t = (template_window / 2) as usize;
    let s = (search_window / 2) as usize;
    let r = t + s;
    let (pw, ph) = (width + 2 * r, height + 2 * r);

    let src = gray.as_raw();
    let mut padded = vec![0f32; pw * ph];
    for py in 0..ph {
        let y = py.saturating_sub(r).min(height - 1);
        for px in 0..pw {
            let x = px.saturating_sub(r).min(width - 1);
            padded[py * pw + px] = src[y * width + x] as f32;
        }
    }

    // The difference image spans every pixel a template centred in the frame can touch.
    let (dw, dh) = (width + 2 * t, height + 2 * t);
    let patch_area = ((2 * t + 1) * (2 * t + 1)) as f32;
    let h2 = (strength * strength).max(f32::EPSILON);
    let mut integral = vec![0f64; (dw + 1) * (dh + 1)];
    let mut weight_sum = vec![0f32; width * height];
    let mut value_sum = vec![0f32; width * height];

    for dy in 0..=2 * s {
        for dx in 0..=2 * s {
            for y in 0..dh {
                let mut row = 0f64;
                let a = (y + s) * pw + s;
                let b = (y + dy) * pw + dx;
                for x in 0..dw {
                    let d = padded[a + x] - padded[b + x];
                    row += (d * d) as f64;
                    integral[(y + 1) * (dw + 1) + x + 1] = integral[y * (dw + 1) + x + 1] + row;
                }
            }
            for y in 0..height {
                for x in 0..width {
                    let (x1, y1) = (x + 2 * t + 1, y + 2 * t + 1);
                    let sum = integral[y1 * (dw + 1) + x1] - integral[y * (dw + 1) + x1]
                        - integral[y1 * (dw + 1) + x]
                        + integral[y * (dw + 1) + x];
                    let weight = (-(sum as f32 / patch_area) / h2).exp();
                    let i = y * width + x;
                    weight_sum[i] += weight;
                    value_sum[i] += weight * padded[(y + t + dy) * pw + x + t + dx];
                }
            }
        }
    }

    let pixels = value_sum
        .iter()
        .zip(&weight_sum)
        .map(|(v, w)| (v / w.max(f32::EPSILON)).round().clamp(0.0, 255.0) as u8)
        .collect();
    GrayImage::from_raw(width as u32, height as u32, pixels).unwrap_or_else(|| gray.clone())
}

/// `THRESH_BINARY` semantics: strictly above the level becomes white.
fn binarize(gray: &GrayImage, level: u8, inverse: bool) -> GrayImage {
    let (on, off) = if inverse { (0, 255) } else { (255, 0) };
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        Luma([if gray.get_pixel(x, y)[0] > level { on } else { off }])
    })
}

pub fn otsu_threshold(gray: &GrayImage, inverse: bool) -> GrayImage {
    binarize(gray, otsu_level(gray), inverse)
}

/// Gaussian weighted local mean threshold, `pixel > mean - c`.
pub fn adaptive_threshold(gray: &GrayImage, block_size: u32, c: i16, inverse: bool) -> GrayImage {
    if gray.width() == 0 || gray.height() == 0 {
        return gray.clone();
    }
    let sigma = 0.3 * ((block_size as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let mean = gaussian_blur_f32(gray, sigma);
    let (on, off) = if inverse { (0, 255) } else { (255, 0) };
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y)[0] as i16;
        let m = mean.get_pixel(x, y)[0] as i16;
        Luma([if v > m - c { on } else { off }])
    })
}

/// Skew of the dark foreground in degrees, normalized to [-45, 45].
pub fn skew_angle(gray: &GrayImage) -> Option<f32> {
    let foreground = otsu_threshold(gray, true);
    let points: Vec<Point<i32>> = foreground
        .enumerate_pixels()
        .filter(|(_, _, p)| p[0] > 0)
        .map(|(x, y, _)| Point::new(x as i32, y as i32))
        .collect();
    if points.len() < 4 {
        return None;
    }
    let corners = min_area_rect(&points);
    let edge = |a: Point<i32>, b: Point<i32>| ((b.x - a.x) as f32, (b.y - a.y) as f32);
    let (e1, e2) = (edge(corners[0], corners[1]), edge(corners[1], corners[2]));
    let longest = if e1.0.hypot(e1.1) >= e2.0.hypot(e2.1) {
        e1
    } else {
        e2
    };
    if longest.0 == 0.0 && longest.1 == 0.0 {
        return None;
    }
    let mut angle = longest.1.atan2(longest.0).to_degrees();
    while angle > 45.0 {
        angle -= 90.0;
    }
    while angle < -45.0 {
        angle += 90.0;
    }
    Some(angle)
}

/// Rotates the plate level when its foreground is tilted by more than [`DESKEW_MIN_ANGLE`].
pub fn deskew(gray: &GrayImage) -> GrayImage {
    let Some(angle) = skew_angle(gray) else {
        return gray.clone();
    };
    if angle.abs() <= DESKEW_MIN_ANGLE {
        return gray.clone();
    }
    debug!(angle, "Deskewing plate");
    let fill = mean_intensity(gray);
    rotate_about_center(
        gray,
        -angle.to_radians(),
        Interpolation::Bicubic,
        Luma([fill]),
    )
}

fn mean_intensity(gray: &GrayImage) -> u8 {
    let count = gray.as_raw().len().max(1) as u64;
    (gray.as_raw().iter().map(|&v| v as u64).sum::<u64>() / count) as u8
}

/// 3x3 sharpening. The one pixel border keeps its input value.
pub fn sharpen(gray: &GrayImage) -> GrayImage {
    let mut out: GrayImage = image::imageops::filter3x3(gray, &SHARPEN_KERNEL);
    let (w, h) = gray.dimensions();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        if x == 0 || y == 0 || x + 1 >= w || y + 1 >= h {
            *pixel = *gray.get_pixel(x, y);
        }
    }
    out
}

/// Drops a 2 px frame left behind by thresholding and closing, when the image is big enough.
pub fn trim_border(gray: &GrayImage) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w > 4 && h > 4 {
        image::imageops::crop_imm(gray, 2, 2, w - 4, h - 4).to_image()
    } else {
        gray.clone()
    }
}

/// 3x3 rectangular closing, bridging broken strokes.
pub fn close_strokes(binary: &GrayImage) -> GrayImage {
    close(binary, Norm::LInf, 1)
}

/// Upscales narrow plates by `max(1.5, 200 / width)`.
pub fn upscale_small_plate(plate: &Image) -> anyhow::Result<Image> {
    if plate.width >= MIN_PLATE_WIDTH || plate.is_empty() {
        return Ok(plate.clone());
    }
    let scale = (MIN_PLATE_WIDTH as f32 / plate.width as f32).max(1.5);
    let width = (plate.width as f32 * scale) as usize;
    let height = ((plate.height as f32 * scale) as usize).max(1);
    debug!(
        from = ?(plate.width, plate.height),
        to = ?(width, height),
        "Upscaling plate"
    );
    resize_exact(plate, width, height, ResizeFilter::Cubic)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum PlateVariant {
    Gray,
    Denoised,
    Deskewed,
    Contrast,
    Sharpened,
    Otsu,
    OtsuMorph,
    Adaptive,
    AdaptiveMorph,
    OtsuInv,
    AdaptiveInv,
}

impl PlateVariant {
    pub const ALL: [PlateVariant; 11] = [
        PlateVariant::Gray,
        PlateVariant::Denoised,
        PlateVariant::Deskewed,
        PlateVariant::Contrast,
        PlateVariant::Sharpened,
        PlateVariant::Otsu,
        PlateVariant::OtsuMorph,
        PlateVariant::Adaptive,
        PlateVariant::AdaptiveMorph,
        PlateVariant::OtsuInv,
        PlateVariant::AdaptiveInv,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PlateVariant::Gray => "gray",
            PlateVariant::Denoised => "denoised",
            PlateVariant::Deskewed => "deskewed",
            PlateVariant::Contrast => "contrast",
            PlateVariant::Sharpened => "sharpened",
            PlateVariant::Otsu => "otsu",
            PlateVariant::OtsuMorph => "otsu_morph",
            PlateVariant::Adaptive => "adaptive",
            PlateVariant::AdaptiveMorph => "adaptive_morph",
            PlateVariant::OtsuInv => "otsu_inv",
            PlateVariant::AdaptiveInv => "adaptive_inv",
        }
    }
}

/// Every rendition of one plate crop.
#[derive(Debug, Clone)]
pub struct PlateVariants {
    pub gray: GrayImage,
    pub denoised: GrayImage,
    pub deskewed: GrayImage,
    pub contrast: GrayImage,
    pub sharpened: GrayImage,
    pub otsu: GrayImage,
    pub otsu_morph: GrayImage,
    pub adaptive: GrayImage,
    pub adaptive_morph: GrayImage,
    pub otsu_inv: GrayImage,
    pub adaptive_inv: GrayImage,
}

impl PlateVariants {
    /// upscale, gray, denoise, deskew, CLAHE(3.0), sharpen, then threshold and close.
    pub fn compute(plate: &Image) -> anyhow::Result<Self> {
        let start = Instant::now();
        if plate.is_empty() {
            anyhow::bail!("Cannot preprocess an empty plate");
        }
        let gray = upscale_small_plate(plate)?.to_gray();
        let denoised = nl_means_denoise(&gray, NLM_STRENGTH, NLM_TEMPLATE_WINDOW, NLM_SEARCH_WINDOW);
        let deskewed = deskew(&denoised);
        let contrast = clahe(&deskewed, 3.0, CLAHE_GRID);
        let sharpened = sharpen(&contrast);

        let otsu = otsu_threshold(&sharpened, false);
        let otsu_inv = otsu_threshold(&sharpened, true);
        let adaptive = adaptive_threshold(&sharpened, ADAPTIVE_BLOCK_SIZE, ADAPTIVE_C, false);
        let adaptive_inv = adaptive_threshold(&sharpened, ADAPTIVE_BLOCK_SIZE, ADAPTIVE_C, true);
        let otsu_morph = trim_border(&close_strokes(&otsu));
        let adaptive_morph = trim_border(&close_strokes(&adaptive));

        debug!(
            width = gray.width(),
            height = gray.height(),
            elapsed = ?start.elapsed(),
            "Plate preprocessing done"
        );
        Ok(Self {
            gray,
            denoised,
            deskewed,
            contrast,
            sharpened,
            otsu,
            otsu_morph,
            adaptive,
            adaptive_morph,
            otsu_inv,
            adaptive_inv,
        })
    }

    pub fn get(&self, variant: PlateVariant) -> &GrayImage {
        match variant {
            PlateVariant::Gray => &self.gray,
            PlateVariant::Denoised => &self.denoised,
            PlateVariant::Deskewed => &self.deskewed,
            PlateVariant::Contrast => &self.contrast,
            PlateVariant::Sharpened => &self.sharpened,
            PlateVariant::Otsu => &self.otsu,
            PlateVariant::OtsuMorph => &self.otsu_morph,
            PlateVariant::Adaptive => &self.adaptive,
            PlateVariant::AdaptiveMorph => &self.adaptive_morph,
            PlateVariant::OtsuInv => &self.otsu_inv,
            PlateVariant::AdaptiveInv => &self.adaptive_inv,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (PlateVariant, &GrayImage)> {
        PlateVariant::ALL.into_iter().map(|v| (v, self.get(v)))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum EnhanceMode {
    /// Gray, CLAHE(2.0), denoise.
    #[default]
    Basic,
    /// Gray, denoise, CLAHE(2.0).
    Advanced,
}

pub fn enhance(image: &Image, mode: EnhanceMode) -> anyhow::Result<GrayImage> {
    if image.is_empty() {
        anyhow::bail!("Cannot enhance an empty image");
    }
    match mode {
        EnhanceMode::Basic => {
            let contrast = clahe(&image.to_gray(), 2.0, CLAHE_GRID);
            Ok(nl_means_denoise(
                &contrast,
                NLM_STRENGTH,
                NLM_TEMPLATE_WINDOW,
                NLM_SEARCH_WINDOW,
            ))
        }
        EnhanceMode::Advanced => {
            let denoised = nl_means_denoise(
                &image.to_gray(),
                NLM_STRENGTH,
                NLM_TEMPLATE_WINDOW,
                NLM_SEARCH_WINDOW,
            );
            Ok(clahe(&denoised, 2.0, CLAHE_GRID))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imageproc::drawing::draw_polygon_mut;

    fn uniform(width: u32, height: u32, value: u8) -> GrayImage {
        GrayImage::from_pixel(width, height, Luma([value]))
    }

    #[test]
    fn clahe_keeps_flat_image_flat() {
        let out = clahe(&uniform(64, 64, 50), 2.0, 8);
        let first = out.get_pixel(0, 0)[0];
        assert!(out.pixels().all(|p| p[0] == first));
    }

    #[test]
    fn clahe_stretches_two_level_tile() {
        let gray = GrayImage::from_fn(32, 32, |x, _| Luma([if x < 16 { 90 } else { 110 }]));
        let out = clahe(&gray, 40.0, 1);
        let dark = out.get_pixel(0, 0)[0];
        let bright = out.get_pixel(31, 0)[0];
        assert!(bright as i32 - dark as i32 > 40, "{dark} {bright}");
    }

    #[test]
    fn nl_means_removes_isolated_outlier() {
        let mut gray = uniform(24, 24, 100);
        gray.put_pixel(12, 12, Luma([200]));
        let out = nl_means_denoise(&gray, 10.0, 7, 21);
        assert!(out.get_pixel(12, 12)[0] < 150);
        assert!(out.get_pixel(0, 0)[0].abs_diff(100) <= 1);
    }

    #[test]
    fn thresholds_are_complementary() {
        let gray = GrayImage::from_fn(40, 20, |x, _| Luma([if x < 20 { 30 } else { 220 }]));
        let otsu = otsu_threshold(&gray, false);
        let inv = otsu_threshold(&gray, true);
        assert_eq!(otsu.get_pixel(0, 0)[0], 0);
        assert_eq!(otsu.get_pixel(39, 0)[0], 255);
        assert!(otsu.pixels().zip(inv.pixels()).all(|(a, b)| a[0] != b[0]));
    }

    #[test]
    fn adaptive_threshold_marks_dark_stroke() {
        let mut gray = uniform(40, 40, 200);
        for y in 10..30 {
            for x in 18..22 {
                gray.put_pixel(x, y, Luma([40]));
            }
        }
        let binary = adaptive_threshold(&gray, 15, 3, false);
        assert_eq!(binary.get_pixel(20, 20)[0], 0);
        assert_eq!(binary.get_pixel(2, 2)[0], 255);
    }

    #[test]
    fn close_bridges_one_pixel_gap() {
        let mut binary = uniform(20, 9, 0);
        for x in 2..18 {
            if x != 10 {
                binary.put_pixel(x, 4, Luma([255]));
            }
        }
        let closed = close_strokes(&binary);
        assert_eq!(closed.get_pixel(10, 4)[0], 255);
    }

    #[test]
    fn trim_border_removes_two_pixels() {
        assert_eq!(trim_border(&uniform(20, 10, 0)).dimensions(), (16, 6));
        assert_eq!(trim_border(&uniform(4, 10, 0)).dimensions(), (4, 10));
    }

    #[test]
    fn sharpen_keeps_flat_regions() {
        let out = sharpen(&uniform(10, 10, 77));
        assert!(out.pixels().all(|p| p[0] == 77));
    }

    fn tilted_bar(degrees: f32) -> GrayImage {
        let mut gray = uniform(200, 120, 230);
        let (cx, cy) = (100.0f32, 60.0f32);
        let (half_w, half_h) = (70.0f32, 12.0f32);
        let (sin, cos) = degrees.to_radians().sin_cos();
        let corners: Vec<Point<i32>> = [(-half_w, -half_h), (half_w, -half_h), (half_w, half_h), (-half_w, half_h)]
            .iter()
            .map(|&(x, y)| {
                Point::new(
                    (cx + x * cos - y * sin).round() as i32,
                    (cy + x * sin + y * cos).round() as i32,
                )
            })
            .collect();
        draw_polygon_mut(&mut gray, &corners, Luma([20]));
        gray
    }

    #[test]
    fn skew_angle_of_tilted_bar() {
        let angle = skew_angle(&tilted_bar(10.0)).unwrap();
        assert!((angle - 10.0).abs() < 2.0, "{angle}");
        let angle = skew_angle(&tilted_bar(-8.0)).unwrap();
        assert!((angle + 8.0).abs() < 2.0, "{angle}");
    }

    #[test]
    fn deskew_levels_tilted_bar() {
        let leveled = deskew(&tilted_bar(10.0));
        let angle = skew_angle(&leveled).unwrap();
        assert!(angle.abs() < 3.0, "{angle}");
    }

    #[test]
    fn small_skew_is_left_alone() {
        let gray = tilted_bar(0.5);
        assert_eq!(deskew(&gray), gray);
    }

    #[test]
    fn small_plates_are_upscaled() {
        let plate = Image::filled(80, 30, [200, 200, 200]);
        let up = upscale_small_plate(&plate).unwrap();
        assert_eq!((up.width, up.height), (200, 75));
        let wide = Image::filled(180, 40, [200, 200, 200]);
        let up = upscale_small_plate(&wide).unwrap();
        assert_eq!((up.width, up.height), (270, 60));
    }

    #[test]
    fn variants_cover_every_stage() {
        let mut plate = Image::filled(50, 20, [235, 235, 235]);
        for y in 5..15 {
            for x in (10..40).step_by(8) {
                let i = (y * 50 + x) * 3;
                plate.pixels[i..i + 6].copy_from_slice(&[20; 6]);
            }
        }
        let variants = PlateVariants::compute(&plate).unwrap();
        assert_eq!(variants.gray.dimensions(), (200, 80));
        assert_eq!(variants.otsu_morph.dimensions(), (196, 76));
        assert_eq!(variants.iter().count(), PlateVariant::ALL.len());
        assert!(variants.otsu.pixels().all(|p| p[0] == 0 || p[0] == 255));
    }

    #[test]
    fn basic_enhance_keeps_size() {
        let out = enhance(&Image::filled(30, 12, [128, 128, 128]), EnhanceMode::Basic).unwrap();
        assert_eq!(out.dimensions(), (30, 12));
        assert!(enhance(&Image::default(), EnhanceMode::Advanced).is_err());
    }

    #[test]
    fn advanced_enhance_denoises_before_equalizing() {
        let mut plate = Image::filled(40, 16, [100, 100, 100]);
        plate.pixels[(8 * 40 + 20) * 3..(8 * 40 + 21) * 3].copy_from_slice(&[220, 220, 220]);
        let out = enhance(&plate, EnhanceMode::Advanced).unwrap();
        assert_eq!(out.dimensions(), (40, 16));

        let gray = plate.to_gray();
        let denoised = nl_means_denoise(&gray, NLM_STRENGTH, NLM_TEMPLATE_WINDOW, NLM_SEARCH_WINDOW);
        assert_eq!(out, clahe(&denoised, 2.0, CLAHE_GRID));
    }
}
