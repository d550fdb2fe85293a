use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// A detector hit in pixel coordinates of the image it was run against.
#[derive(Serialize, Deserialize, Clone, PartialEq)]
pub struct Prediction {
    pub x_max: usize,
    pub x_min: usize,
    pub y_max: usize,
    pub y_min: usize,
    pub confidence: f32,
    pub label: String,
}

impl Debug for Prediction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prediction")
            .field("label", &self.label)
            .field("confidence", &self.confidence)
            .field(
                "bbox",
                &(self.x_min, self.y_min, self.x_max, self.y_max),
            )
            .finish()
    }
}

impl Prediction {
    pub fn bbox(&self) -> BoundingBox {
        BoundingBox {
            x1: self.x_min,
            y1: self.y_min,
            x2: self.x_max,
            y2: self.y_max,
        }
    }
}

/// Axis aligned box, `x2`/`y2` exclusive.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct BoundingBox {
    pub x1: usize,
    pub y1: usize,
    pub x2: usize,
    pub y2: usize,
}

impl BoundingBox {
    pub fn new(x1: usize, y1: usize, x2: usize, y2: usize) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> usize {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> usize {
        self.y2.saturating_sub(self.y1)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Integer center, rounded down like the detector grid expects.
    pub fn center(&self) -> (usize, usize) {
        ((self.x1 + self.x2) / 2, (self.y1 + self.y2) / 2)
    }

    pub fn clamp(&self, width: usize, height: usize) -> Self {
        Self {
            x1: self.x1.min(width),
            y1: self.y1.min(height),
            x2: self.x2.min(width),
            y2: self.y2.min(height),
        }
    }

    /// Grows the box by `fraction` of its own size on every side, clamped to the image.
    pub fn padded(&self, fraction: f32, width: usize, height: usize) -> Self {
        let pad_x = (self.width() as f32 * fraction) as usize;
        let pad_y = (self.height() as f32 * fraction) as usize;
        Self {
            x1: self.x1.saturating_sub(pad_x),
            y1: self.y1.saturating_sub(pad_y),
            x2: (self.x2 + pad_x).min(width),
            y2: (self.y2 + pad_y).min(height),
        }
    }

    /// Grows the box by a fixed number of pixels on every side, clamped to the image.
    pub fn expanded(&self, pixels: usize, width: usize, height: usize) -> Self {
        Self {
            x1: self.x1.saturating_sub(pixels),
            y1: self.y1.saturating_sub(pixels),
            x2: (self.x2 + pixels).min(width),
            y2: (self.y2 + pixels).min(height),
        }
    }
}

/// One physical vehicle observed in a video, as handed to the record store.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DetectedVehicleRecord {
    pub video_id: String,
    pub vehicle_index: usize,
    pub crop_image: String,
    pub plate_image: Option<String>,
    pub plate_text: Option<String>,
    pub car_color: String,
    pub driver_face_image: Option<String>,
    pub vehicle_confidence: f32,
    pub plate_confidence: Option<f32>,
    /// 1.0 whenever the driver region was captured. The region is geometric, not a face detection.
    pub face_confidence: Option<f32>,
    /// Seconds from the start of the video.
    pub timestamp: f64,
    pub created_at: DateTime<Utc>,
}

impl DetectedVehicleRecord {
    /// Equality ignoring `created_at`, used to compare repeated runs.
    pub fn same_detection(&self, other: &Self) -> bool {
        let mut other = other.clone();
        other.created_at = self.created_at;
        *self == other
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AnalysisSummary {
    pub vehicles_detected: usize,
    pub plates_detected: usize,
    pub faces_detected: usize,
}

impl AnalysisSummary {
    pub fn from_records(records: &[DetectedVehicleRecord]) -> Self {
        Self {
            vehicles_detected: records.len(),
            plates_detected: records.iter().filter(|r| r.plate_image.is_some()).count(),
            faces_detected: records
                .iter()
                .filter(|r| r.driver_face_image.is_some())
                .count(),
        }
    }
}

/// Counters for the non-fatal degradations of a run.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AnalysisStats {
    pub frames_sampled: usize,
    pub frames_failed: usize,
    pub vehicle_candidates: usize,
    pub plate_detector_failures: usize,
    pub empty_crops: usize,
    pub ocr_errors: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AnalysisResponse {
    pub video_id: String,
    pub run_id: String,
    pub summary: AnalysisSummary,
    pub stats: AnalysisStats,
    pub vehicles: Vec<DetectedVehicleRecord>,
    pub processing_ms: u128,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_box_is_clamped_to_image() {
        let plate = BoundingBox::new(2, 5, 102, 45);
        let padded = plate.padded(0.1, 105, 200);
        assert_eq!(padded, BoundingBox::new(0, 1, 105, 49));
    }

    #[test]
    fn expanded_box_is_clamped_to_frame() {
        let vehicle = BoundingBox::new(30, 100, 600, 400);
        let expanded = vehicle.expanded(50, 640, 420);
        assert_eq!(expanded, BoundingBox::new(0, 50, 640, 420));
    }

    #[test]
    fn summary_counts_optional_artifacts() {
        let record = DetectedVehicleRecord {
            video_id: "7".into(),
            vehicle_index: 0,
            crop_image: "car_7_v0.jpg".into(),
            plate_image: Some("plate_7_v0.jpg".into()),
            plate_text: None,
            car_color: "White".into(),
            driver_face_image: Some("face_7_v0.jpg".into()),
            vehicle_confidence: 0.9,
            plate_confidence: Some(0.5),
            face_confidence: Some(1.0),
            timestamp: 1.0,
            created_at: Utc::now(),
        };
        let mut without_plate = record.clone();
        without_plate.vehicle_index = 1;
        without_plate.plate_image = None;
        without_plate.plate_confidence = None;

        let summary = AnalysisSummary::from_records(&[record, without_plate]);
        assert_eq!(
            summary,
            AnalysisSummary {
                vehicles_detected: 2,
                plates_detected: 1,
                faces_detected: 2,
            }
        );
    }
}
