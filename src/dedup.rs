//! Collapses repeated sightings of a vehicle across sampled frames into one observation.
//!
//! Sightings are bucketed by a coarse 5x3 grid over the frame. Two vehicles that pass
//! through the same cell at different times become one record, and a vehicle that moves
//! between cells becomes two. Both are accepted approximations.

use crate::{api::BoundingBox, image::Image};
use std::{collections::HashMap, sync::Arc};
use tracing::trace;

pub const GRID_COLUMNS: usize = 5;
pub const GRID_ROWS: usize = 3;

/// Grid cell of the box center, `"{col}_{row}"`.
pub fn position_key(bbox: &BoundingBox, frame_width: usize, frame_height: usize) -> String {
    let cell_width = (frame_width / GRID_COLUMNS).max(1);
    let cell_height = (frame_height / GRID_ROWS).max(1);
    let (cx, cy) = bbox.center();
    format!("{}_{}", cx / cell_width, cy / cell_height)
}

/// Any detected plate outweighs every vehicle confidence.
pub fn plate_visibility_score(plate_confidence: f32, vehicle_confidence: f32) -> f32 {
    let has_plate = if plate_confidence > 0.0 { 10.0 } else { 0.0 };
    has_plate + plate_confidence + 0.1 * vehicle_confidence
}

#[derive(Debug, Clone)]
pub struct VehicleObservation {
    pub bbox: BoundingBox,
    pub vehicle_confidence: f32,
    /// 0.0 when no plate was found in this frame.
    pub plate_confidence: f32,
    pub timestamp: f64,
    pub frame_index: usize,
    pub frame: Arc<Image>,
}

impl VehicleObservation {
    pub fn score(&self) -> f32 {
        plate_visibility_score(self.plate_confidence, self.vehicle_confidence)
    }
}

/// Keeps the best observation per position key, in first-seen key order.
#[derive(Debug, Default)]
pub struct VehicleDeduplicator {
    order: Vec<String>,
    best: HashMap<String, VehicleObservation>,
}

impl VehicleDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offers a sighting. Returns true when it became the holder of its key.
    pub fn offer(&mut self, key: String, observation: VehicleObservation) -> bool {
        match self.best.get_mut(&key) {
            Some(incumbent) => {
                if observation.score() > incumbent.score() {
                    trace!(
                        key,
                        old_score = incumbent.score(),
                        new_score = observation.score(),
                        frame_index = observation.frame_index,
                        "Replacing observation"
                    );
                    *incumbent = observation;
                    true
                } else {
                    false
                }
            }
            None => {
                self.order.push(key.clone());
                self.best.insert(key, observation);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&VehicleObservation> {
        self.best.get(key)
    }

    /// Surviving observations in the order their keys were first seen.
    pub fn finish(mut self) -> Vec<(String, VehicleObservation)> {
        self.order
            .into_iter()
            .filter_map(|key| self.best.remove(&key).map(|obs| (key, obs)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(plate_confidence: f32, vehicle_confidence: f32, frame_index: usize) -> VehicleObservation {
        VehicleObservation {
            bbox: BoundingBox::new(100, 100, 200, 200),
            vehicle_confidence,
            plate_confidence,
            timestamp: frame_index as f64,
            frame_index,
            frame: Arc::new(Image::default()),
        }
    }

    #[test]
    fn position_key_uses_five_by_three_grid() {
        let bbox = BoundingBox::new(500, 300, 700, 500);
        assert_eq!(position_key(&bbox, 1000, 600), "3_2");
        assert_eq!(position_key(&bbox, 1000, 600), position_key(&bbox, 1000, 600));
        assert_eq!(position_key(&BoundingBox::new(0, 0, 10, 10), 1000, 600), "0_0");
    }

    #[test]
    fn position_key_survives_tiny_frames() {
        assert_eq!(position_key(&BoundingBox::new(0, 0, 2, 2), 2, 2), "1_1");
    }

    #[test]
    fn any_plate_beats_vehicle_confidence() {
        let with_plate = plate_visibility_score(0.01, 0.5);
        let without_plate = plate_visibility_score(0.0, 0.99);
        assert!((with_plate - 10.06).abs() < 1e-5);
        assert!((without_plate - 0.099).abs() < 1e-6);
        assert!(with_plate > without_plate);
    }

    #[test]
    fn replacement_is_strict() {
        let mut dedup = VehicleDeduplicator::new();
        assert!(dedup.offer("1_1".into(), observation(0.0, 0.8, 0)));
        assert!(!dedup.offer("1_1".into(), observation(0.0, 0.8, 10)));
        assert!(!dedup.offer("1_1".into(), observation(0.0, 0.7, 20)));
        assert!(dedup.offer("1_1".into(), observation(0.3, 0.5, 30)));
        assert_eq!(dedup.len(), 1);
        assert_eq!(dedup.get("1_1").unwrap().frame_index, 30);
    }

    #[test]
    fn finish_keeps_first_seen_key_order() {
        let mut dedup = VehicleDeduplicator::new();
        dedup.offer("4_0".into(), observation(0.0, 0.5, 0));
        dedup.offer("0_2".into(), observation(0.0, 0.5, 10));
        dedup.offer("4_0".into(), observation(0.9, 0.5, 20));
        dedup.offer("2_1".into(), observation(0.0, 0.5, 30));
        let keys: Vec<String> = dedup.finish().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["4_0", "0_2", "2_1"]);
    }
}
