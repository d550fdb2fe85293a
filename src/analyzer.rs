//! One blocking pass over a video: sample, detect, deduplicate, extract, read plates, persist.

use crate::{
    api::{AnalysisResponse, AnalysisStats, AnalysisSummary, DetectedVehicleRecord},
    color::classify_color,
    dedup::{VehicleDeduplicator, VehicleObservation, position_key},
    detector::{ObjectDetector, best_plate, detect_vehicles},
    enhance::PlateVariants,
    error::{AnalysisError, Degradation},
    image::{Image, ResizeFilter, resize_gray_exact, save_gray_jpeg, save_jpeg},
    ocr::OcrEngines,
    regions::{
        PLATE_CROP_SIZE, RegionConfig, driver_crop, locate_plate, stored_plate_crop,
        stored_vehicle_crop, vehicle_crop,
    },
    store::RecordStore,
    video::{FrameSampler, VideoSource, open_video_source},
};
use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub vehicle_confidence: f32,
    pub regions: RegionConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            vehicle_confidence: 0.4,
            regions: RegionConfig::default(),
        }
    }
}

/// Where the three image artifacts of a record are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDirs {
    pub cars: PathBuf,
    pub plates: PathBuf,
    pub faces: PathBuf,
}

impl OutputDirs {
    pub fn under(root: &Path) -> Self {
        Self {
            cars: root.join("cars"),
            plates: root.join("plates"),
            faces: root.join("faces"),
        }
    }

    pub fn create(&self) -> anyhow::Result<()> {
        for dir in [&self.cars, &self.plates, &self.faces] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    /// Deletes every artifact written for `video_id` by earlier runs.
    pub fn remove_artifacts(&self, video_id: &str) -> usize {
        let mut removed = 0;
        for (kind, dir) in [("car", &self.cars), ("plate", &self.plates), ("face", &self.faces)] {
            let entries = match std::fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(?dir, error = %e, "Failed to list artifacts");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let name = entry.file_name();
                if is_artifact_of(&name.to_string_lossy(), kind, video_id) && remove_stale(&entry.path()) {
                    removed += 1;
                }
            }
        }
        removed
    }
}

/// Matches `{kind}_{video_id}_v{index}.jpg` and its `_enhanced.jpg` sibling, nothing else.
fn is_artifact_of(file_name: &str, kind: &str, video_id: &str) -> bool {
    let Some(rest) = file_name
        .strip_prefix(kind)
        .and_then(|r| r.strip_prefix('_'))
        .and_then(|r| r.strip_prefix(video_id))
        .and_then(|r| r.strip_prefix("_v"))
    else {
        return false;
    };
    let Some(index) = rest
        .strip_suffix("_enhanced.jpg")
        .or_else(|| rest.strip_suffix(".jpg"))
    else {
        return false;
    };
    !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit())
}

/// `{kind}_{video_id}_v{index}.jpg`
pub fn artifact_name(kind: &str, video_id: &str, vehicle_index: usize) -> String {
    format!("{kind}_{video_id}_v{vehicle_index}.jpg")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisState {
    Idle,
    Sampling,
    Detecting,
    Deduplicating,
    Extracting,
    Persisting,
    Done,
    Failed,
}

/// Models loaded once per process and handed to every run.
pub struct Engines {
    pub vehicle_detector: Box<dyn ObjectDetector + Send>,
    pub plate_detector: Box<dyn ObjectDetector + Send>,
    pub ocr: OcrEngines,
}

pub struct Analyzer {
    config: AnalysisConfig,
    engines: Engines,
    dirs: OutputDirs,
    state: AnalysisState,
    history: Vec<AnalysisState>,
}

impl Analyzer {
    pub fn new(config: AnalysisConfig, engines: Engines, dirs: OutputDirs) -> Self {
        if engines.ocr.available() == 0 {
            warn!(
                degradation = %Degradation::OcrBackendUnavailable,
                "No OCR engine available, plate text will stay empty"
            );
        }
        Self {
            config,
            engines,
            dirs,
            state: AnalysisState::Idle,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> AnalysisState {
        self.state
    }

    /// States the last run went through, in order.
    pub fn history(&self) -> &[AnalysisState] {
        &self.history
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Opens `path` and analyzes it.
    pub fn analyze_path(
        &mut self,
        video_id: &str,
        path: &Path,
        fps_override: Option<f64>,
        store: &mut dyn RecordStore,
    ) -> Result<AnalysisResponse, AnalysisError> {
        let mut source = open_video_source(path, fps_override).inspect_err(|e| {
            self.history = vec![AnalysisState::Failed];
            self.state = AnalysisState::Failed;
            error!(%video_id, error = %e, "Failed to open video");
        })?;
        self.analyze(video_id, &mut source, store)
    }

    /// Replaces every stored record of `video_id` with the result of this run.
    pub fn analyze(
        &mut self,
        video_id: &str,
        source: &mut dyn VideoSource,
        store: &mut dyn RecordStore,
    ) -> Result<AnalysisResponse, AnalysisError> {
        let start = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!(%video_id, %run_id, fps = source.fps(), frames = source.frame_count(), "Analysis started");
        self.history.clear();

        match self.run(video_id, source, store) {
            Ok((vehicles, stats)) => {
                self.transition(AnalysisState::Done);
                let summary = AnalysisSummary::from_records(&vehicles);
                let processing_ms = start.elapsed().as_millis();
                info!(
                    %video_id,
                    vehicles = summary.vehicles_detected,
                    plates = summary.plates_detected,
                    faces = summary.faces_detected,
                    ?stats,
                    processing_ms,
                    "Analysis done"
                );
                Ok(AnalysisResponse {
                    video_id: video_id.to_string(),
                    run_id,
                    summary,
                    stats,
                    vehicles,
                    processing_ms,
                })
            }
            Err(e) => {
                self.transition(AnalysisState::Failed);
                error!(%video_id, %run_id, error = %e, "Analysis failed");
                Err(e)
            }
        }
    }

    fn transition(&mut self, state: AnalysisState) {
        debug!(from = ?self.state, to = ?state, "Analysis state");
        self.state = state;
        self.history.push(state);
    }

    fn run(
        &mut self,
        video_id: &str,
        source: &mut dyn VideoSource,
        store: &mut dyn RecordStore,
    ) -> Result<(Vec<DetectedVehicleRecord>, AnalysisStats), AnalysisError> {
        let mut stats = AnalysisStats::default();
        if source.frame_count() == 0 {
            return Err(AnalysisError::source_unreadable("video has no frames"));
        }
        self.dirs.create().map_err(AnalysisError::storage)?;

        self.transition(AnalysisState::Sampling);
        let mut dedup = VehicleDeduplicator::new();
        for sample in FrameSampler::new(source) {
            let frame = match sample {
                Ok(frame) => frame,
                Err((frame_index, e)) => {
                    warn!(frame_index, degradation = %Degradation::FrameDecodeFailure, error = %e, "Skipping frame");
                    stats.frames_failed += 1;
                    continue;
                }
            };
            stats.frames_sampled += 1;
            self.transition(AnalysisState::Detecting);
            self.observe_frame(frame.frame_index, frame.timestamp, Arc::new(frame.image), &mut dedup, &mut stats);
            self.transition(AnalysisState::Sampling);
        }
        if stats.frames_sampled == 0 {
            return Err(AnalysisError::source_unreadable(format!(
                "none of the {} sampled frames could be decoded",
                stats.frames_failed
            )));
        }

        self.transition(AnalysisState::Deduplicating);
        let survivors = dedup.finish();
        debug!(
            %video_id,
            candidates = stats.vehicle_candidates,
            survivors = survivors.len(),
            "Deduplicated vehicles"
        );

        self.transition(AnalysisState::Extracting);
        // Earlier records must not outlive the artifacts they name.
        store
            .replace_video_records(video_id, AnalysisSummary::default(), Vec::new())
            .map_err(AnalysisError::storage)?;
        let removed = self.dirs.remove_artifacts(video_id);
        debug!(%video_id, removed, "Cleared earlier artifacts");
        let mut records = Vec::with_capacity(survivors.len());
        for (key, observation) in survivors {
            let vehicle_index = records.len();
            if let Some(record) = self
                .extract(video_id, vehicle_index, &observation, &mut stats)
                .map_err(AnalysisError::storage)?
            {
                debug!(%video_id, vehicle_index, %key, timestamp = record.timestamp, "Vehicle extracted");
                records.push(record);
            }
        }

        self.transition(AnalysisState::Persisting);
        store
            .replace_video_records(video_id, AnalysisSummary::from_records(&records), records.clone())
            .map_err(AnalysisError::storage)?;
        Ok((records, stats))
    }

    fn observe_frame(
        &mut self,
        frame_index: usize,
        timestamp: f64,
        frame: Arc<Image>,
        dedup: &mut VehicleDeduplicator,
        stats: &mut AnalysisStats,
    ) {
        let vehicles = match detect_vehicles(
            self.engines.vehicle_detector.as_mut(),
            &frame,
            self.config.vehicle_confidence,
        ) {
            Ok(vehicles) => vehicles,
            Err(e) => {
                warn!(frame_index, error = %e, "Vehicle detection failed, skipping frame");
                stats.frames_failed += 1;
                return;
            }
        };

        for vehicle in vehicles {
            let bbox = vehicle.bbox().clamp(frame.width, frame.height);
            let Some(crop) = vehicle_crop(&frame, &bbox) else {
                debug!(frame_index, ?bbox, degradation = %Degradation::EmptyCropDiscarded, "Empty vehicle crop");
                stats.empty_crops += 1;
                continue;
            };
            stats.vehicle_candidates += 1;

            let plate_confidence = match best_plate(
                self.engines.plate_detector.as_mut(),
                &crop,
                self.config.regions.plate_confidence,
                self.config.regions.plate_padding,
            ) {
                Ok(plate) => plate.map_or(0.0, |p| p.confidence),
                Err(e) => {
                    warn!(frame_index, degradation = %Degradation::PlateDetectorFailure, error = %e, "Plate detection failed");
                    stats.plate_detector_failures += 1;
                    0.0
                }
            };

            let key = position_key(&bbox, frame.width, frame.height);
            dedup.offer(
                key,
                VehicleObservation {
                    bbox,
                    vehicle_confidence: vehicle.confidence,
                    plate_confidence,
                    timestamp,
                    frame_index,
                    frame: Arc::clone(&frame),
                },
            );
        }
    }

    /// Writes the artifacts of one surviving vehicle. `Ok(None)` when its crop turned out empty.
    fn extract(
        &mut self,
        video_id: &str,
        vehicle_index: usize,
        observation: &VehicleObservation,
        stats: &mut AnalysisStats,
    ) -> anyhow::Result<Option<DetectedVehicleRecord>> {
        let frame = observation.frame.as_ref();
        let Some(vehicle) = vehicle_crop(frame, &observation.bbox) else {
            stats.empty_crops += 1;
            return Ok(None);
        };

        let crop_image = artifact_name("car", video_id, vehicle_index);
        save_jpeg(&stored_vehicle_crop(&vehicle)?, &self.dirs.cars.join(&crop_image))?;
        let car_color = classify_color(&vehicle);

        let plate_name = artifact_name("plate", video_id, vehicle_index);
        let enhanced_name = format!("plate_{video_id}_v{vehicle_index}_enhanced.jpg");
        let search = locate_plate(
            self.engines.plate_detector.as_mut(),
            frame,
            &observation.bbox,
            &vehicle,
            &self.config.regions,
        );
        stats.plate_detector_failures += search.detector_failures;

        let (plate_image, plate_confidence, plate_text) = match search.plate {
            Some(plate) => {
                save_jpeg(&stored_plate_crop(&plate.image)?, &self.dirs.plates.join(&plate_name))?;
                match PlateVariants::compute(&plate.image) {
                    Ok(variants) => {
                        let enhanced = resize_gray_exact(
                            &variants.contrast,
                            PLATE_CROP_SIZE.0,
                            PLATE_CROP_SIZE.1,
                            ResizeFilter::Cubic,
                        )?;
                        save_gray_jpeg(&enhanced, &self.dirs.plates.join(&enhanced_name))?;
                    }
                    Err(e) => warn!(%video_id, vehicle_index, error = %e, "Plate enhancement failed"),
                }
                let outcome = self.engines.ocr.read_plate(&plate.image);
                stats.ocr_errors += outcome.errors;
                (
                    Some(plate_name),
                    Some(plate.confidence),
                    outcome.best.map(|reading| reading.text),
                )
            }
            None => (None, None, None),
        };

        let face_name = artifact_name("face", video_id, vehicle_index);
        let driver_face_image = match driver_crop(&vehicle, self.config.regions.driver_clip_limit) {
            Ok(Some(driver)) => {
                save_jpeg(&driver, &self.dirs.faces.join(&face_name))?;
                Some(face_name)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(%video_id, vehicle_index, error = %e, "Driver region extraction failed");
                None
            }
        };

        Ok(Some(DetectedVehicleRecord {
            video_id: video_id.to_string(),
            vehicle_index,
            crop_image,
            plate_image,
            plate_text,
            car_color: car_color.label().to_string(),
            face_confidence: driver_face_image.as_ref().map(|_| 1.0),
            driver_face_image,
            vehicle_confidence: observation.vehicle_confidence,
            plate_confidence,
            timestamp: observation.timestamp,
            created_at: Utc::now(),
        }))
    }
}

fn remove_stale(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(?path, "Removed stale artifact");
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!(?path, error = %e, "Failed to remove stale artifact");
            false
        }
    }
}
