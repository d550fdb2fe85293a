use crate::{
    VEHICLE_CLASSES,
    api::{BoundingBox, Prediction},
    get_object_classes,
    image::{Image, Resizer},
};
use anyhow::{Context, anyhow, bail};
use ndarray::Array;
use ort::{session::Session, value::Tensor};
use smallvec::SmallVec;
use std::{fmt::Debug, path::PathBuf, time::Instant};
use tracing::{debug, info, warn};

/// Side of the square input every supported model expects.
pub const MODEL_INPUT_SIZE: usize = 640;

pub type Predictions = SmallVec<[Prediction; 10]>;

/// Anything that turns an image into labelled boxes.
pub trait ObjectDetector {
    fn detect(&mut self, image: &Image, confidence_threshold: f32) -> anyhow::Result<Predictions>;

    fn name(&self) -> &str;
}

impl<T: ObjectDetector + ?Sized> ObjectDetector for Box<T> {
    fn detect(&mut self, image: &Image, confidence_threshold: f32) -> anyhow::Result<Predictions> {
        (**self).detect(image, confidence_threshold)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[derive(Debug, Clone)]
pub struct OnnxConfig {
    pub intra_threads: usize,
    pub inter_threads: usize,
    pub gpu_index: i32,
    pub force_cpu: bool,
    pub model: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ObjectDetectionModel {
    #[default]
    RtDetrv2,
    Yolo5,
    Yolo8,
}

impl std::fmt::Display for ObjectDetectionModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectDetectionModel::RtDetrv2 => write!(f, "rt-detrv2"),
            ObjectDetectionModel::Yolo5 => write!(f, "yolo5"),
            ObjectDetectionModel::Yolo8 => write!(f, "yolo8"),
        }
    }
}

/// Raw tensors copied out of a session run, one variant per output layout.
#[derive(Debug, Clone)]
pub enum RawDetections {
    RtDetrv2 {
        labels: Vec<i64>,
        boxes: Vec<f32>,
        scores: Vec<f32>,
    },
    Yolo {
        shape: Vec<usize>,
        data: Vec<f32>,
    },
}

pub struct PostProcess<'a> {
    pub confidence_threshold: f32,
    pub resize_factor_x: f32,
    pub resize_factor_y: f32,
    pub object_filter: Option<&'a [bool]>,
    pub object_classes: &'a [String],
}

impl PostProcess<'_> {
    /// Class name for a model class id, or `None` when the id is unknown or filtered out.
    fn accept(&self, class_idx: usize) -> Option<&String> {
        let label = self.object_classes.get(class_idx)?;
        match self.object_filter {
            Some(filter) if !filter.get(class_idx).copied().unwrap_or(false) => None,
            _ => Some(label),
        }
    }

    fn prediction(&self, corners: [f32; 4], confidence: f32, label: &str) -> Prediction {
        Prediction {
            x_min: (corners[0] * self.resize_factor_x).max(0.0) as usize,
            y_min: (corners[1] * self.resize_factor_y).max(0.0) as usize,
            x_max: (corners[2] * self.resize_factor_x).max(0.0) as usize,
            y_max: (corners[3] * self.resize_factor_y).max(0.0) as usize,
            confidence,
            label: label.to_string(),
        }
    }
}

impl ObjectDetectionModel {
    fn input_names(&self) -> &'static [&'static str] {
        match self {
            Self::RtDetrv2 => &["images", "orig_target_sizes"],
            Self::Yolo5 | Self::Yolo8 => &["images"],
        }
    }

    pub fn post_process(
        &self,
        raw: &RawDetections,
        params: &PostProcess<'_>,
    ) -> anyhow::Result<Predictions> {
        match (self, raw) {
            (Self::RtDetrv2, RawDetections::RtDetrv2 { labels, boxes, scores }) => {
                rt_detrv2_post_process(labels, boxes, scores, params)
            }
            (Self::Yolo5, RawDetections::Yolo { shape, data }) => {
                yolo5_post_process(shape, data, params)
            }
            (Self::Yolo8, RawDetections::Yolo { shape, data }) => {
                yolo8_post_process(shape, data, params)
            }
            _ => bail!("Model output does not match the {self} layout"),
        }
    }
}

fn rt_detrv2_post_process(
    labels: &[i64],
    boxes: &[f32],
    scores: &[f32],
    params: &PostProcess<'_>,
) -> anyhow::Result<Predictions> {
    if boxes.len() != scores.len() * 4 || labels.len() != scores.len() {
        bail!(
            "Inconsistent rt-detrv2 outputs: {} labels, {} boxes, {} scores",
            labels.len(),
            boxes.len() / 4,
            scores.len()
        );
    }
    let mut predictions = Predictions::new();

    for (i, bbox) in boxes.chunks_exact(4).enumerate() {
        if scores[i] <= params.confidence_threshold {
            continue;
        }
        let Some(label) = usize::try_from(labels[i]).ok().and_then(|idx| params.accept(idx))
        else {
            continue;
        };
        let prediction = params.prediction([bbox[0], bbox[1], bbox[2], bbox[3]], scores[i], label);
        debug!("Prediction - {}: {:?}", predictions.len() + 1, prediction);
        predictions.push(prediction);
    }

    Ok(predictions)
}

/// `[1, N, 5 + C]` rows of center box, objectness and class scores.
fn yolo5_post_process(
    shape: &[usize],
    data: &[f32],
    params: &PostProcess<'_>,
) -> anyhow::Result<Predictions> {
    let rows = *shape.get(1).context("yolo5 output has no row axis")?;
    let stride = *shape.last().context("yolo5 output has no column axis")?;
    if stride != 5 + params.object_classes.len() || data.len() < rows * stride {
        bail!(
            "Unexpected yolo5 output shape {shape:?}, expected {} columns. This probably means that your classes YAML file does not match the model.",
            5 + params.object_classes.len()
        );
    }

    let mut predictions = Predictions::new();
    for row in data.chunks_exact(stride).take(rows) {
        if row[4] <= params.confidence_threshold {
            continue;
        }
        let Some((class_idx, _)) = arg_max(&row[5..]) else {
            continue;
        };
        let Some(label) = params.accept(class_idx) else {
            continue;
        };
        predictions.push(params.prediction(center_to_corners(row[0], row[1], row[2], row[3]), row[4], label));
    }

    let predictions = non_maximum_suppression(predictions, 0.5);
    for (i, prediction) in predictions.iter().enumerate() {
        debug!("Prediction - {}: {:?}", i + 1, prediction);
    }
    Ok(predictions)
}

/// `[1, 4 + C, N]` columns of center box followed by class scores, no objectness.
fn yolo8_post_process(
    shape: &[usize],
    data: &[f32],
    params: &PostProcess<'_>,
) -> anyhow::Result<Predictions> {
    let (features, anchors) = match shape {
        [_, features, anchors] => (*features, *anchors),
        _ => bail!("Unexpected yolo8 output rank {shape:?}"),
    };
    if features != 4 + params.object_classes.len() || data.len() < features * anchors {
        bail!(
            "Unexpected yolo8 output shape {shape:?}, expected {} features. This probably means that your classes YAML file does not match the model.",
            4 + params.object_classes.len()
        );
    }
    let at = |feature: usize, anchor: usize| data[feature * anchors + anchor];

    let mut predictions = Predictions::new();
    let mut class_scores = Vec::with_capacity(features - 4);
    for anchor in 0..anchors {
        class_scores.clear();
        class_scores.extend((4..features).map(|f| at(f, anchor)));
        let Some((class_idx, confidence)) = arg_max(&class_scores) else {
            continue;
        };
        if confidence <= params.confidence_threshold {
            continue;
        }
        let Some(label) = params.accept(class_idx) else {
            continue;
        };
        let corners = center_to_corners(at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
        predictions.push(params.prediction(corners, confidence, label));
    }

    let predictions = non_maximum_suppression(predictions, 0.5);
    for (i, prediction) in predictions.iter().enumerate() {
        debug!("Prediction - {}: {:?}", i + 1, prediction);
    }
    Ok(predictions)
}

fn center_to_corners(x_center: f32, y_center: f32, width: f32, height: f32) -> [f32; 4] {
    [
        x_center - width / 2.0,
        y_center - height / 2.0,
        x_center + width / 2.0,
        y_center + height / 2.0,
    ]
}

fn arg_max(values: &[f32]) -> Option<(usize, f32)> {
    values
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

pub fn non_maximum_suppression(mut predictions: Predictions, iou_threshold: f32) -> Predictions {
    let mut filtered_predictions = Predictions::new();

    predictions.sort_by(|a, b| {
        a.label
            .cmp(&b.label)
            .then(b.confidence.total_cmp(&a.confidence))
    });

    let mut current_class = None;
    let mut kept: Predictions = SmallVec::new();

    for pred in predictions.iter() {
        if Some(&pred.label) != current_class {
            filtered_predictions.extend(kept.drain(..));
            current_class = Some(&pred.label);
        }
        if kept
            .iter()
            .all(|kept_pred| calculate_iou(pred, kept_pred) < iou_threshold)
        {
            kept.push(pred.clone());
        }
    }
    filtered_predictions.extend(kept);

    filtered_predictions
}

pub fn calculate_iou(a: &Prediction, b: &Prediction) -> f32 {
    let x_min = a.x_min.max(b.x_min) as f32;
    let y_min = a.y_min.max(b.y_min) as f32;
    let x_max = a.x_max.min(b.x_max) as f32;
    let y_max = a.y_max.min(b.y_max) as f32;
    let intersection = (x_max - x_min).max(0.0) * (y_max - y_min).max(0.0);
    let area_a = a.x_max.saturating_sub(a.x_min) as f32 * a.y_max.saturating_sub(a.y_min) as f32;
    let area_b = b.x_max.saturating_sub(b.x_min) as f32 * b.y_max.saturating_sub(b.y_min) as f32;
    let union = area_a + area_b - intersection;

    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// YAML class file, the embedded `default_classes` when absent.
    pub object_classes: Option<PathBuf>,
    pub default_classes: &'static str,
    pub object_filter: Vec<String>,
    pub onnx: OnnxConfig,
    pub model_kind: ObjectDetectionModel,
}

pub struct OnnxDetector {
    session: Session,
    resizer: Resizer,
    resized_image: Image,
    object_classes: Vec<String>,
    object_filter: Option<Vec<bool>>,
    input: ndarray::Array4<f32>,
    output_names: Vec<String>,
    device_type: DeviceType,
    endpoint_provider: EndpointProvider,
    model_name: String,
    model_kind: ObjectDetectionModel,
}

impl OnnxDetector {
    pub fn new(config: DetectorConfig) -> anyhow::Result<Self> {
        let object_classes = get_object_classes(config.object_classes, config.default_classes)?;
        let object_filter = build_object_filter(&object_classes, &config.object_filter);

        let (device_type, model_name, session, endpoint_provider) = initialize_onnx(&config.onnx)?;
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        for required in config.model_kind.input_names() {
            if !session.inputs.iter().any(|i| i.name == *required) {
                bail!("{model_name} has no input named {required}, is it a {} model?", config.model_kind);
            }
        }

        let mut detector = Self {
            session,
            resizer: Resizer::new(MODEL_INPUT_SIZE, MODEL_INPUT_SIZE)?,
            resized_image: Image::default(),
            object_classes,
            object_filter,
            input: Array::zeros((1, 3, MODEL_INPUT_SIZE, MODEL_INPUT_SIZE)),
            output_names,
            device_type,
            endpoint_provider,
            model_name,
            model_kind: config.model_kind,
        };

        info!(model = %detector.model_name, "Warming up the detector");
        let detector_warmup_start_time = Instant::now();
        detector.detect(&Image::filled(MODEL_INPUT_SIZE, MODEL_INPUT_SIZE, [114; 3]), 1.0)?;
        info!(
            "Detector warmed up in: {:?}",
            detector_warmup_start_time.elapsed()
        );

        Ok(detector)
    }

    pub fn object_classes(&self) -> &[String] {
        &self.object_classes
    }

    pub fn get_endpoint_provider_name(&self) -> String {
        self.endpoint_provider.to_string()
    }

    pub fn is_using_gpu(&self) -> bool {
        self.device_type == DeviceType::GPU
    }

    fn output_tensor(&self, index: usize) -> anyhow::Result<&str> {
        self.output_names
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("{} has no output {index}", self.model_name))
    }

    fn run(&mut self) -> anyhow::Result<RawDetections> {
        let images = Tensor::from_array(self.input.clone())?;
        match self.model_kind {
            ObjectDetectionModel::RtDetrv2 => {
                let orig_size = Array::from_shape_vec(
                    (1, 2),
                    vec![MODEL_INPUT_SIZE as i64, MODEL_INPUT_SIZE as i64],
                )?;
                let outputs = self.session.run(ort::inputs![
                    "images" => images,
                    "orig_target_sizes" => Tensor::from_array(orig_size)?
                ])?;
                let (_, labels) = outputs["labels"].try_extract_tensor::<i64>()?;
                let (_, boxes) = outputs["boxes"].try_extract_tensor::<f32>()?;
                let (_, scores) = outputs["scores"].try_extract_tensor::<f32>()?;
                Ok(RawDetections::RtDetrv2 {
                    labels: labels.to_vec(),
                    boxes: boxes.to_vec(),
                    scores: scores.to_vec(),
                })
            }
            ObjectDetectionModel::Yolo5 | ObjectDetectionModel::Yolo8 => {
                let output_name = self.output_tensor(0)?.to_string();
                let outputs = self.session.run(ort::inputs!["images" => images])?;
                let (shape, data) = outputs[output_name.as_str()].try_extract_tensor::<f32>()?;
                Ok(RawDetections::Yolo {
                    shape: shape.as_ref().iter().map(|&d| d as usize).collect(),
                    data: data.to_vec(),
                })
            }
        }
    }
}

impl ObjectDetector for OnnxDetector {
    fn detect(&mut self, image: &Image, confidence_threshold: f32) -> anyhow::Result<Predictions> {
        let processing_time_start = Instant::now();
        if image.is_empty() {
            bail!("Cannot run detection on an empty image");
        }
        let resize_factor_x = image.width as f32 / MODEL_INPUT_SIZE as f32;
        let resize_factor_y = image.height as f32 / MODEL_INPUT_SIZE as f32;

        self.resizer.resize_image(image, &mut self.resized_image)?;
        for (index, chunk) in self.resized_image.pixels.chunks_exact(3).enumerate() {
            let y = index / MODEL_INPUT_SIZE;
            let x = index % MODEL_INPUT_SIZE;
            self.input[[0, 0, y, x]] = chunk[0] as f32 / 255.0;
            self.input[[0, 1, y, x]] = chunk[1] as f32 / 255.0;
            self.input[[0, 2, y, x]] = chunk[2] as f32 / 255.0;
        }
        let pre_processing_time = processing_time_start.elapsed();

        let start_inference_time = Instant::now();
        let raw = self.run()?;
        let inference_time = start_inference_time.elapsed();

        let predictions = self.model_kind.post_process(
            &raw,
            &PostProcess {
                confidence_threshold,
                resize_factor_x,
                resize_factor_y,
                object_filter: self.object_filter.as_deref(),
                object_classes: &self.object_classes,
            },
        )?;
        let predictions = predictions
            .into_iter()
            .map(|mut p| {
                p.x_max = p.x_max.min(image.width);
                p.y_max = p.y_max.min(image.height);
                p
            })
            .filter(|p| !p.bbox().is_empty())
            .collect();

        debug!(
            detector = %self.model_name,
            ?pre_processing_time,
            ?inference_time,
            processing_time = ?processing_time_start.elapsed(),
            "Detection done"
        );
        Ok(predictions)
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}

fn build_object_filter(object_classes: &[String], wanted: &[String]) -> Option<Vec<bool>> {
    if wanted.is_empty() {
        return None;
    }
    let mut object_filter = vec![false; object_classes.len()];
    for object in wanted {
        match object_classes
            .iter()
            .position(|x| x.eq_ignore_ascii_case(object))
        {
            Some(index) => object_filter[index] = true,
            None => warn!(%object, "Object filter names a class the model does not know"),
        }
    }
    Some(object_filter)
}

fn clamp_threads(requested: usize) -> usize {
    requested
        .min(num_cpus::get_physical().saturating_sub(1))
        .max(1)
}

pub(crate) fn initialize_onnx(
    onnx_config: &OnnxConfig,
) -> anyhow::Result<(DeviceType, String, Session, EndpointProvider)> {
    let model_name = onnx_config.model.to_string_lossy().to_string();
    if !onnx_config.model.exists() {
        bail!("Model file {model_name} does not exist");
    }

    let mut builder = Session::builder()?;
    let mut device_type = DeviceType::CPU;

    let (num_intra_threads, num_inter_threads) = if onnx_config.force_cpu {
        let threads = (
            clamp_threads(onnx_config.intra_threads),
            clamp_threads(onnx_config.inter_threads),
        );
        info!(
            "Forcing CPU for inference with {} intra and {} inter threads",
            threads.0, threads.1
        );
        threads
    } else if direct_ml_available() {
        info!(
            gpu_index = onnx_config.gpu_index,
            "DirectML available, using DirectML for inference"
        );
        builder = with_direct_ml(builder, onnx_config.gpu_index)?;
        device_type = DeviceType::GPU;
        (1, 1)
    } else {
        let threads = (
            clamp_threads(onnx_config.intra_threads),
            clamp_threads(onnx_config.inter_threads),
        );
        debug!(
            "No GPU provider available, running inference on CPU with {} intra and {} inter threads",
            threads.0, threads.1
        );
        threads
    };

    info!(
        "Initializing detector with model: {:?} and inference running on {}",
        model_name, device_type,
    );

    let session = builder
        .with_intra_threads(num_intra_threads)?
        .with_inter_threads(num_inter_threads)?
        .commit_from_file(&onnx_config.model)
        .with_context(|| format!("Failed to load model {model_name}"))?;

    let endpoint_provider = match device_type {
        DeviceType::GPU => EndpointProvider::DirectML,
        DeviceType::CPU => EndpointProvider::CPU,
    };

    Ok((device_type, model_name, session, endpoint_provider))
}

#[cfg(windows)]
fn with_direct_ml(
    builder: ort::session::builder::SessionBuilder,
    gpu_index: i32,
) -> anyhow::Result<ort::session::builder::SessionBuilder> {
    use ort::execution_providers::DirectMLExecutionProvider;
    Ok(builder.with_execution_providers([DirectMLExecutionProvider::default()
        .with_device_id(gpu_index)
        .build()
        .error_on_failure()])?)
}

#[cfg(not(windows))]
fn with_direct_ml(
    builder: ort::session::builder::SessionBuilder,
    _gpu_index: i32,
) -> anyhow::Result<ort::session::builder::SessionBuilder> {
    Ok(builder)
}

pub fn direct_ml_available() -> bool {
    #[cfg(not(windows))]
    {
        false
    }
    #[cfg(windows)]
    {
        let Ok(exe_path) = std::env::current_exe() else {
            return false;
        };
        let Some(exe_dir) = exe_path.parent() else {
            return false;
        };
        exe_dir.join("DirectML.dll").exists()
    }
}

#[derive(Debug, Clone, Copy)]
pub enum EndpointProvider {
    CPU,
    DirectML,
}

impl std::fmt::Display for EndpointProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndpointProvider::CPU => write!(f, "CPU"),
            EndpointProvider::DirectML => write!(f, "DirectML"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    CPU,
    GPU,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::CPU => write!(f, "CPU"),
            DeviceType::GPU => write!(f, "GPU"),
        }
    }
}

/// Vehicle detections from a full frame, restricted to car, truck and bus.
pub fn detect_vehicles(
    detector: &mut dyn ObjectDetector,
    frame: &Image,
    confidence_threshold: f32,
) -> anyhow::Result<Vec<Prediction>> {
    let predictions = detector.detect(frame, confidence_threshold)?;
    Ok(predictions
        .into_iter()
        .filter(|p| VEHICLE_CLASSES.contains(&p.label.as_str()))
        .collect())
}

/// Plate box in the coordinates of the image it was found in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlateCandidate {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Highest confidence plate in `image`, its box grown by `pad_fraction` per side.
pub fn best_plate(
    detector: &mut dyn ObjectDetector,
    image: &Image,
    confidence_threshold: f32,
    pad_fraction: f32,
) -> anyhow::Result<Option<PlateCandidate>> {
    let predictions = detector.detect(image, confidence_threshold)?;
    Ok(predictions
        .iter()
        .filter(|p| p.confidence >= confidence_threshold)
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        .map(|p| PlateCandidate {
            bbox: p
                .bbox()
                .clamp(image.width, image.height)
                .padded(pad_fraction, image.width, image.height),
            confidence: p.confidence,
        })
        .filter(|plate| !plate.bbox.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedDetector;

    fn classes() -> Vec<String> {
        vec!["person".into(), "car".into(), "truck".into()]
    }

    fn params<'a>(classes: &'a [String], filter: Option<&'a [bool]>) -> PostProcess<'a> {
        PostProcess {
            confidence_threshold: 0.4,
            resize_factor_x: 2.0,
            resize_factor_y: 1.0,
            object_filter: filter,
            object_classes: classes,
        }
    }

    fn prediction(label: &str, confidence: f32, x_min: usize, x_max: usize) -> Prediction {
        Prediction {
            x_min,
            x_max,
            y_min: 0,
            y_max: 100,
            confidence,
            label: label.into(),
        }
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = prediction("car", 0.9, 0, 100);
        let b = prediction("car", 0.9, 200, 300);
        assert_eq!(calculate_iou(&a, &a), 1.0);
        assert_eq!(calculate_iou(&a, &b), 0.0);
    }

    #[test]
    fn nms_is_per_class() {
        let predictions: Predictions = SmallVec::from_vec(vec![
            prediction("car", 0.6, 0, 100),
            prediction("car", 0.9, 5, 105),
            prediction("truck", 0.5, 0, 100),
            prediction("car", 0.7, 300, 400),
        ]);
        let kept = non_maximum_suppression(predictions, 0.5);
        assert_eq!(kept.len(), 3);
        assert!(kept.iter().any(|p| p.label == "car" && p.confidence == 0.9));
        assert!(kept.iter().any(|p| p.label == "truck"));
        assert!(!kept.iter().any(|p| p.confidence == 0.6));
    }

    #[test]
    fn rt_detrv2_skips_unknown_and_filtered_classes() {
        let classes = classes();
        let filter = [false, true, true];
        let raw = RawDetections::RtDetrv2 {
            labels: vec![1, 0, 42, 2, -1],
            boxes: vec![
                10.0, 20.0, 30.0, 40.0, //
                0.0, 0.0, 5.0, 5.0, //
                0.0, 0.0, 5.0, 5.0, //
                50.0, 60.0, 70.0, 80.0, //
                0.0, 0.0, 5.0, 5.0,
            ],
            scores: vec![0.9, 0.9, 0.9, 0.3, 0.9],
        };
        let predictions = ObjectDetectionModel::RtDetrv2
            .post_process(&raw, &params(&classes, Some(&filter)))
            .unwrap();
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].label, "car");
        assert_eq!(predictions[0].bbox(), BoundingBox::new(20, 20, 60, 40));
    }

    #[test]
    fn yolo5_rows_are_decoded() {
        let classes = classes();
        let raw = RawDetections::Yolo {
            shape: vec![1, 2, 8],
            data: vec![
                50.0, 50.0, 20.0, 10.0, 0.8, 0.1, 0.7, 0.2, //
                10.0, 10.0, 4.0, 4.0, 0.2, 0.9, 0.0, 0.0,
            ],
        };
        let predictions = ObjectDetectionModel::Yolo5
            .post_process(&raw, &params(&classes, None))
            .unwrap();
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].label, "car");
        assert_eq!(predictions[0].bbox(), BoundingBox::new(80, 45, 120, 55));
    }

    #[test]
    fn yolo8_columns_are_decoded() {
        let classes = classes();
        // Two anchors, features laid out feature-major.
        let raw = RawDetections::Yolo {
            shape: vec![1, 7, 2],
            data: vec![
                50.0, 10.0, // cx
                50.0, 10.0, // cy
                20.0, 4.0, // w
                10.0, 4.0, // h
                0.0, 0.1, // person
                0.1, 0.2, // car
                0.95, 0.3, // truck
            ],
        };
        let predictions = ObjectDetectionModel::Yolo8
            .post_process(&raw, &params(&classes, None))
            .unwrap();
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].label, "truck");
        assert_eq!(predictions[0].confidence, 0.95);
    }

    #[test]
    fn mismatched_layout_is_an_error() {
        let classes = classes();
        let raw = RawDetections::Yolo {
            shape: vec![1, 2, 6],
            data: vec![0.0; 12],
        };
        assert!(
            ObjectDetectionModel::Yolo5
                .post_process(&raw, &params(&classes, None))
                .is_err()
        );
        assert!(
            ObjectDetectionModel::RtDetrv2
                .post_process(&raw, &params(&classes, None))
                .is_err()
        );
    }

    #[test]
    fn object_filter_is_case_insensitive() {
        let filter = build_object_filter(&classes(), &["Car".into(), "bus".into()]).unwrap();
        assert_eq!(filter, vec![false, true, false]);
        assert!(build_object_filter(&classes(), &[]).is_none());
    }

    #[test]
    fn vehicle_detection_keeps_vehicle_classes() {
        let mut detector = ScriptedDetector::always(vec![
            prediction("car", 0.9, 0, 100),
            prediction("person", 0.9, 0, 100),
            prediction("bus", 0.5, 0, 100),
        ]);
        let vehicles = detect_vehicles(&mut detector, &Image::filled(400, 200, [0; 3]), 0.4).unwrap();
        let labels: Vec<&str> = vehicles.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["car", "bus"]);
    }

    #[test]
    fn best_plate_is_padded_and_clamped() {
        let mut detector = ScriptedDetector::always(vec![
            Prediction {
                x_min: 2,
                x_max: 102,
                y_min: 5,
                y_max: 45,
                confidence: 0.6,
                label: "license_plate".into(),
            },
            Prediction {
                x_min: 10,
                x_max: 20,
                y_min: 10,
                y_max: 20,
                confidence: 0.3,
                label: "license_plate".into(),
            },
        ]);
        let plate = best_plate(&mut detector, &Image::filled(105, 200, [0; 3]), 0.25, 0.1)
            .unwrap()
            .unwrap();
        assert_eq!(plate.confidence, 0.6);
        assert_eq!(plate.bbox, BoundingBox::new(0, 1, 105, 49));
    }

    #[test]
    fn no_plate_found() {
        let mut detector = ScriptedDetector::always(vec![]);
        assert!(
            best_plate(&mut detector, &Image::filled(10, 10, [0; 3]), 0.25, 0.1)
                .unwrap()
                .is_none()
        );
    }
}
