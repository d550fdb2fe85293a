use crate::{
    COCO_CLASSES_STR, LogLevel, PLATE_CLASSES_STR, VEHICLE_CLASSES,
    analyzer::{AnalysisConfig, Engines, OutputDirs},
    detector::{DetectorConfig, ObjectDetectionModel, OnnxConfig, OnnxDetector},
    enhance::{EnhanceMode, PlateVariant, enhance},
    error::AnalysisError,
    image::{load_image, save_gray_jpeg},
    ocr::{BoxedOcr, CtcRecognizer, CtcRecognizerConfig, OcrEngines},
    regions::RegionConfig,
    store::RecordStore,
};
use clap::{Args, Parser, Subcommand};
use std::{
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(version = env!("CARGO_PKG_VERSION"), about = "Vehicle, plate and driver analysis for gas station video")]
pub struct Cli {
    /// Sets the level of logging
    #[clap(long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,
    /// If log_path is set, then stdout logging will be disabled and it will log to file
    #[clap(long)]
    pub log_path: Option<PathBuf>,
    /// JSON file holding analysis records and billing status
    #[clap(long, default_value = "forecourt_records.json")]
    pub store: PathBuf,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Analyze one video file or frame directory, replacing its earlier records
    Analyze {
        video_id: String,
        path: PathBuf,
        #[command(flatten)]
        analysis: AnalysisArgs,
    },
    /// Analyze every video and frame directory inside a directory, one after the other.
    /// The video id is the file stem.
    AnalyzeAll {
        dir: PathBuf,
        #[command(flatten)]
        analysis: AnalysisArgs,
    },
    /// Print the records of a video
    Vehicles { video_id: String },
    /// Find records by plate text
    Lookup { plate: String },
    /// Correct the plate text of a record, omit the text to clear it
    UpdatePlate {
        video_id: String,
        vehicle_index: usize,
        plate: Option<String>,
    },
    MarkPaid { plate: String },
    MarkUnpaid { plate: String },
    /// List recognized plates not marked as paid
    Unpaid,
    /// Enhance a plate image
    Enhance {
        image: PathBuf,
        #[clap(long, value_enum, default_value_t = EnhanceMode::Basic)]
        mode: EnhanceMode,
        /// Where to write the result, default is <image>_enhanced.jpg next to the input
        #[clap(long)]
        output: Option<PathBuf>,
        /// Write the result over the input image
        #[clap(long, default_value_t = false, conflicts_with = "output")]
        overwrite: bool,
    },
    /// Enhance the car, plate and driver images of a stored record
    EnhanceRecord {
        video_id: String,
        vehicle_index: usize,
        /// Root holding the cars, plates and faces directories
        #[clap(long, default_value = "media")]
        output_dir: PathBuf,
        #[clap(long, value_enum, default_value_t = EnhanceMode::Basic)]
        mode: EnhanceMode,
        /// Write the results over the stored images instead of next to them
        #[clap(long, default_value_t = false)]
        save: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct OnnxArgs {
    /// Force using CPU for inference
    #[clap(long, default_value_t = false)]
    pub force_cpu: bool,
    /// Intra thread parallelism max is cpu cores - 1
    #[clap(long, default_value_t = 192)]
    pub intra_threads: usize,
    /// Inter thread parallelism max is cpu cores - 1
    #[clap(long, default_value_t = 192)]
    pub inter_threads: usize,
    /// GPU Index, best effort to select the correct one if multiple GPUs exist.
    #[clap(long, default_value_t = 0)]
    pub gpu_index: i32,
}

impl OnnxArgs {
    pub fn config(&self, model: &Path) -> OnnxConfig {
        OnnxConfig {
            intra_threads: self.intra_threads,
            inter_threads: self.inter_threads,
            gpu_index: self.gpu_index,
            force_cpu: self.force_cpu,
            model: model.to_path_buf(),
        }
    }
}

/// Plate detection and OCR models.
#[derive(Args, Debug, Clone)]
pub struct PlateArgs {
    /// ONNX license plate detector
    #[clap(long, default_value = "models/plate_detector.onnx")]
    pub plate_model: PathBuf,
    #[clap(long, value_enum, default_value_t = ObjectDetectionModel::Yolo8)]
    pub plate_model_type: ObjectDetectionModel,
    /// Plate detector classes yaml file, default is a single license_plate class
    #[clap(long)]
    pub plate_classes: Option<PathBuf>,
    /// Confidence threshold for plates inside a vehicle crop
    #[clap(long, default_value_t = 0.25)]
    pub plate_confidence: f32,
    /// Script-specific text recognizer (engine A)
    #[clap(long, requires = "ocr_primary_dict")]
    pub ocr_primary_model: Option<PathBuf>,
    /// Character dictionary of engine A, one symbol per line
    #[clap(long)]
    pub ocr_primary_dict: Option<PathBuf>,
    /// General purpose text recognizer (engine B)
    #[clap(long, requires = "ocr_fallback_dict")]
    pub ocr_fallback_model: Option<PathBuf>,
    /// Character dictionary of engine B, one symbol per line
    #[clap(long)]
    pub ocr_fallback_dict: Option<PathBuf>,
    #[clap(long, default_value_t = 48)]
    pub ocr_input_height: usize,
    #[clap(long, default_value_t = 320)]
    pub ocr_max_width: usize,
    /// Preprocessed plate variants read by OCR besides the color image, separated by ','
    #[arg(long, value_enum, value_delimiter = ',', default_value = "otsu-morph")]
    pub ocr_variants: Vec<PlateVariant>,
}

impl PlateArgs {
    pub fn plate_detector(&self, onnx: &OnnxArgs) -> Result<OnnxDetector, AnalysisError> {
        OnnxDetector::new(DetectorConfig {
            object_classes: self.plate_classes.clone(),
            default_classes: PLATE_CLASSES_STR,
            object_filter: Vec::new(),
            onnx: onnx.config(&self.plate_model),
            model_kind: self.plate_model_type,
        })
        .map_err(|e| AnalysisError::detector_unavailable(format!("plate detector: {e:#}")))
    }

    /// Engines that fail to load are left out.
    pub fn ocr_engines(&self, onnx: &OnnxArgs) -> OcrEngines {
        let primary = self.recognizer("arabic", &self.ocr_primary_model, &self.ocr_primary_dict, onnx);
        let fallback =
            self.recognizer("general", &self.ocr_fallback_model, &self.ocr_fallback_dict, onnx);
        OcrEngines::new(primary, fallback).with_variants(self.ocr_variants.clone())
    }

    fn recognizer(
        &self,
        name: &str,
        model: &Option<PathBuf>,
        dictionary: &Option<PathBuf>,
        onnx: &OnnxArgs,
    ) -> Option<BoxedOcr> {
        let (model, dictionary) = (model.as_ref()?, dictionary.as_ref()?);
        match CtcRecognizer::new(CtcRecognizerConfig {
            name: name.to_string(),
            onnx: onnx.config(model),
            dictionary: dictionary.clone(),
            input_height: self.ocr_input_height,
            max_input_width: self.ocr_max_width,
            use_space_char: true,
        }) {
            Ok(recognizer) => Some(Box::new(recognizer)),
            Err(e) => {
                warn!(engine = name, error = %format!("{e:#}"), "Failed to load OCR engine");
                None
            }
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct AnalysisArgs {
    /// ONNX vehicle detector trained on COCO classes
    #[clap(long, default_value = "models/vehicle_detector.onnx")]
    pub vehicle_model: PathBuf,
    #[clap(long, value_enum, default_value_t = ObjectDetectionModel::RtDetrv2)]
    pub vehicle_model_type: ObjectDetectionModel,
    /// Vehicle detector classes yaml file, default is the 80 COCO classes
    #[clap(long)]
    pub vehicle_classes: Option<PathBuf>,
    #[clap(long, default_value_t = 0.4)]
    pub vehicle_confidence: f32,
    /// Confidence threshold for plates searched around the vehicle
    #[clap(long, default_value_t = 0.2)]
    pub fallback_confidence: f32,
    /// Skip the search around the vehicle when its crop shows no plate
    #[clap(long, default_value_t = false)]
    pub no_fallback: bool,
    /// Pixels added on every side of the vehicle for the fallback search
    #[clap(long, default_value_t = 50)]
    pub fallback_margin: usize,
    /// Frame rate for frame directories without fps.txt, or to override the container
    #[clap(long)]
    pub fps: Option<f64>,
    /// Root directory for the cars, plates and faces images
    #[clap(long, default_value = "media")]
    pub output_dir: PathBuf,
    #[command(flatten)]
    pub plate: PlateArgs,
    #[command(flatten)]
    pub onnx: OnnxArgs,
}

impl AnalysisArgs {
    pub fn analysis_config(&self) -> AnalysisConfig {
        let defaults = RegionConfig::default();
        AnalysisConfig {
            vehicle_confidence: self.vehicle_confidence,
            regions: RegionConfig {
                plate_confidence: self.plate.plate_confidence,
                fallback_confidence: (!self.no_fallback).then_some(self.fallback_confidence),
                fallback_margin: self.fallback_margin,
                ..defaults
            },
        }
    }

    pub fn output_dirs(&self) -> OutputDirs {
        OutputDirs::under(&self.output_dir)
    }

    /// Loads every model. A missing detector is fatal, a missing OCR engine is not.
    pub fn engines(&self) -> Result<Engines, AnalysisError> {
        let vehicle_detector = OnnxDetector::new(DetectorConfig {
            object_classes: self.vehicle_classes.clone(),
            default_classes: COCO_CLASSES_STR,
            object_filter: VEHICLE_CLASSES.iter().map(|c| c.to_string()).collect(),
            onnx: self.onnx.config(&self.vehicle_model),
            model_kind: self.vehicle_model_type,
        })
        .map_err(|e| AnalysisError::detector_unavailable(format!("vehicle detector: {e:#}")))?;
        info!(
            endpoint = vehicle_detector.get_endpoint_provider_name(),
            gpu = vehicle_detector.is_using_gpu(),
            classes = vehicle_detector.object_classes().len(),
            "Vehicle detector ready"
        );
        let plate_detector = self.plate.plate_detector(&self.onnx)?;
        info!(
            endpoint = plate_detector.get_endpoint_provider_name(),
            gpu = plate_detector.is_using_gpu(),
            "Plate detector ready"
        );
        Ok(Engines {
            vehicle_detector: Box::new(vehicle_detector),
            plate_detector: Box::new(plate_detector),
            ocr: self.plate.ocr_engines(&self.onnx),
        })
    }

    pub fn print_config(&self) {
        match serde_json::to_string(&self.analysis_config()) {
            Ok(config) => info!(%config, output_dir = ?self.output_dir, "Analysis configuration"),
            Err(e) => warn!(error = %e, "Failed to serialize analysis configuration"),
        }
    }
}

/// Executes the subcommands that only touch the record store.
///
/// Returns `Ok(false)` for commands that need models or media instead.
pub fn run_record_command(
    command: &Command,
    store: &mut dyn RecordStore,
    out: &mut dyn Write,
) -> anyhow::Result<bool> {
    match command {
        Command::Vehicles { video_id } => {
            let records = store.records_for_video(video_id)?;
            let summary = store.summary_for_video(video_id)?;
            writeln!(
                out,
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "video_id": video_id,
                    "summary": summary,
                    "vehicles": records,
                }))?
            )?;
        }
        Command::Lookup { plate } => {
            let records = store.find_by_plate(plate)?;
            writeln!(out, "{}", serde_json::to_string_pretty(&records)?)?;
        }
        Command::UpdatePlate {
            video_id,
            vehicle_index,
            plate,
        } => {
            if !store.update_plate_text(video_id, *vehicle_index, plate.clone())? {
                anyhow::bail!("Video {video_id} has no vehicle {vehicle_index}");
            }
            writeln!(out, "Updated vehicle {vehicle_index} of video {video_id}")?;
        }
        Command::MarkPaid { plate } => {
            store.set_paid(plate, true)?;
            writeln!(out, "{plate} marked as paid")?;
        }
        Command::MarkUnpaid { plate } => {
            store.set_paid(plate, false)?;
            writeln!(out, "{plate} marked as unpaid")?;
        }
        Command::Unpaid => {
            for plate in store.unpaid_plates()? {
                writeln!(out, "{plate}")?;
            }
        }
        Command::Analyze { .. }
        | Command::AnalyzeAll { .. }
        | Command::Enhance { .. }
        | Command::EnhanceRecord { .. } => {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Enhances `image` and returns where the result was written.
pub fn run_enhance(
    image: &Path,
    mode: EnhanceMode,
    output: Option<&Path>,
    overwrite: bool,
) -> anyhow::Result<PathBuf> {
    let input = load_image(image)?;
    let enhanced = enhance(&input, mode)?;
    let target = match (output, overwrite) {
        (Some(output), _) => output.to_path_buf(),
        (None, true) => image.to_path_buf(),
        (None, false) => {
            let stem = image
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "plate".to_string());
            image.with_file_name(format!("{stem}_enhanced.jpg"))
        }
    };
    save_gray_jpeg(&enhanced, &target)?;
    info!(?mode, target = %target.display(), "Enhanced image saved");
    Ok(target)
}

/// Enhances every image a record names. A missing or unreadable image is skipped.
pub fn run_enhance_record(
    store: &dyn RecordStore,
    dirs: &OutputDirs,
    video_id: &str,
    vehicle_index: usize,
    mode: EnhanceMode,
    save: bool,
) -> anyhow::Result<Vec<PathBuf>> {
    let Some(record) = store
        .records_for_video(video_id)?
        .into_iter()
        .find(|r| r.vehicle_index == vehicle_index)
    else {
        anyhow::bail!("Video {video_id} has no vehicle {vehicle_index}");
    };

    let images = [
        (&dirs.cars, Some(record.crop_image)),
        (&dirs.plates, record.plate_image),
        (&dirs.faces, record.driver_face_image),
    ];
    let mut written = Vec::new();
    for (dir, name) in images {
        let Some(name) = name else { continue };
        let path = dir.join(&name);
        if !path.exists() {
            warn!(path = %path.display(), "Record image is missing");
            continue;
        }
        match run_enhance(&path, mode, None, save) {
            Ok(target) => written.push(target),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to enhance record image"),
        }
    }
    Ok(written)
}
