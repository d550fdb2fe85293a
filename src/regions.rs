use crate::{
    api::BoundingBox,
    detector::{ObjectDetector, best_plate},
    enhance::clahe,
    image::{Image, ResizeFilter, resize_exact},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const VEHICLE_CROP_SIZE: (usize, usize) = (400, 300);
pub const PLATE_CROP_SIZE: (usize, usize) = (200, 80);
pub const DRIVER_CROP_SIZE: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionConfig {
    pub plate_confidence: f32,
    /// Fraction of the plate box added on every side.
    pub plate_padding: f32,
    /// `None` disables the search around the vehicle when the crop has no plate.
    pub fallback_confidence: Option<f32>,
    pub fallback_margin: usize,
    pub driver_clip_limit: f32,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            plate_confidence: 0.25,
            plate_padding: 0.1,
            fallback_confidence: Some(0.2),
            fallback_margin: 50,
            driver_clip_limit: 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlateSource {
    VehicleCrop,
    ExpandedRegion,
}

#[derive(Debug, Clone)]
pub struct LocatedPlate {
    /// Unresized crop, the input for preprocessing and OCR.
    pub image: Image,
    pub confidence: f32,
    pub source: PlateSource,
}

#[derive(Debug, Default)]
pub struct PlateSearch {
    pub plate: Option<LocatedPlate>,
    pub detector_failures: usize,
}

/// Right hand windshield area where the driver sits, `x` in [55%, 95%] and `y` in [10%, 55%].
pub fn driver_region(width: usize, height: usize) -> BoundingBox {
    let (w, h) = (width as f64, height as f64);
    BoundingBox::new(
        (w * 0.55) as usize,
        (h * 0.10) as usize,
        (w * 0.95) as usize,
        (h * 0.55) as usize,
    )
    .clamp(width, height)
}

/// Direct slice of the frame, `None` when nothing is left after clamping.
pub fn vehicle_crop(frame: &Image, bbox: &BoundingBox) -> Option<Image> {
    let crop = frame.crop(bbox);
    (!crop.is_empty()).then_some(crop)
}

pub fn stored_vehicle_crop(crop: &Image) -> anyhow::Result<Image> {
    resize_exact(crop, VEHICLE_CROP_SIZE.0, VEHICLE_CROP_SIZE.1, ResizeFilter::Area)
}

pub fn stored_plate_crop(plate: &Image) -> anyhow::Result<Image> {
    resize_exact(plate, PLATE_CROP_SIZE.0, PLATE_CROP_SIZE.1, ResizeFilter::Cubic)
}

/// Looks for a plate in the vehicle crop, then in the frame around the vehicle.
///
/// Detector errors are counted and treated as "no plate here".
pub fn locate_plate(
    detector: &mut dyn ObjectDetector,
    frame: &Image,
    vehicle_bbox: &BoundingBox,
    vehicle: &Image,
    config: &RegionConfig,
) -> PlateSearch {
    let mut search = PlateSearch::default();

    match best_plate(detector, vehicle, config.plate_confidence, config.plate_padding) {
        Ok(Some(plate)) => {
            let image = vehicle.crop(&plate.bbox);
            if !image.is_empty() {
                search.plate = Some(LocatedPlate {
                    image,
                    confidence: plate.confidence,
                    source: PlateSource::VehicleCrop,
                });
                return search;
            }
        }
        Ok(None) => {}
        Err(e) => {
            warn!(error = %e, "Plate detection on vehicle crop failed");
            search.detector_failures += 1;
        }
    }

    let Some(fallback_confidence) = config.fallback_confidence else {
        return search;
    };
    let region = vehicle_bbox
        .clamp(frame.width, frame.height)
        .expanded(config.fallback_margin, frame.width, frame.height);
    let expanded = frame.crop(&region);
    if expanded.is_empty() {
        return search;
    }
    match best_plate(detector, &expanded, fallback_confidence, 0.0) {
        Ok(Some(plate)) => {
            let image = expanded.crop(&plate.bbox);
            if !image.is_empty() {
                debug!(confidence = plate.confidence, "Plate found around the vehicle");
                search.plate = Some(LocatedPlate {
                    image,
                    confidence: plate.confidence,
                    source: PlateSource::ExpandedRegion,
                });
            }
        }
        Ok(None) => {}
        Err(e) => {
            warn!(error = %e, "Plate detection around vehicle failed");
            search.detector_failures += 1;
        }
    }
    search
}

fn rgb_to_ycbcr(p: &[u8]) -> [f32; 3] {
    let (r, g, b) = (p[0] as f32, p[1] as f32, p[2] as f32);
    [
        0.299 * r + 0.587 * g + 0.114 * b,
        128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b,
        128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b,
    ]
}

fn ycbcr_to_rgb(y: f32, cb: f32, cr: f32) -> [u8; 3] {
    let to_u8 = |v: f32| v.round().clamp(0.0, 255.0) as u8;
    [
        to_u8(y + 1.402 * (cr - 128.0)),
        to_u8(y - 0.344_136 * (cb - 128.0) - 0.714_136 * (cr - 128.0)),
        to_u8(y + 1.772 * (cb - 128.0)),
    ]
}

/// CLAHE on the luma channel only, chroma untouched.
pub fn equalize_luminance(image: &Image, clip_limit: f32) -> anyhow::Result<Image> {
    let ycbcr: Vec<[f32; 3]> = image.pixels.chunks_exact(3).map(rgb_to_ycbcr).collect();
    let luma = image::GrayImage::from_raw(
        image.width as u32,
        image.height as u32,
        ycbcr.iter().map(|c| c[0].round().clamp(0.0, 255.0) as u8).collect(),
    )
    .ok_or_else(|| anyhow::anyhow!("Failed to build luma plane"))?;
    let equalized = clahe(&luma, clip_limit, 8);
    let pixels = ycbcr
        .iter()
        .zip(equalized.as_raw())
        .flat_map(|(c, &y)| ycbcr_to_rgb(y as f32, c[1], c[2]))
        .collect();
    Image::new(image.width, image.height, pixels)
}

/// Contrast enhanced 200x200 driver seat crop, `None` when the region is empty.
pub fn driver_crop(vehicle: &Image, clip_limit: f32) -> anyhow::Result<Option<Image>> {
    let region = driver_region(vehicle.width, vehicle.height);
    let crop = vehicle.crop(&region);
    if crop.is_empty() {
        return Ok(None);
    }
    let enhanced = equalize_luminance(&crop, clip_limit)?;
    Ok(Some(resize_exact(
        &enhanced,
        DRIVER_CROP_SIZE,
        DRIVER_CROP_SIZE,
        ResizeFilter::Area,
    )?))
}
