//! Dual engine plate OCR.
//!
//! Each available engine reads the plate twice, once in color and once per selected
//! preprocessed variant. Hits go through [`clean_plate_text`] and the most confident
//! survivor wins.

use crate::{
    detector::{OnnxConfig, initialize_onnx},
    enhance::{PlateVariant, PlateVariants},
    error::Degradation,
    image::{Image, ResizeFilter, resize_exact},
    plate_text::clean_plate_text,
};
use anyhow::{Context, bail};
use ndarray::Array;
use ort::{session::Session, value::Tensor};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Instant};
use tracing::{debug, info, warn};

/// Width the color plate is scaled to before recognition.
pub const OCR_PLATE_WIDTH: usize = 400;

#[derive(Debug, Clone, PartialEq)]
pub struct OcrHit {
    pub text: String,
    pub confidence: f32,
}

pub trait OcrBackend {
    fn name(&self) -> &str;

    fn recognize(&mut self, image: &Image) -> anyhow::Result<Vec<OcrHit>>;
}

pub type BoxedOcr = Box<dyn OcrBackend + Send>;

/// A cleaned hit and where it came from, e.g. `arabic_color` or `general_otsu_morph`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateReading {
    pub text: String,
    pub confidence: f32,
    pub source: String,
}

#[derive(Debug, Default)]
pub struct OcrOutcome {
    pub best: Option<PlateReading>,
    pub candidates: Vec<PlateReading>,
    pub errors: usize,
}

/// The script-specific engine A and the general fallback engine B, either may be absent.
pub struct OcrEngines {
    primary: Option<BoxedOcr>,
    fallback: Option<BoxedOcr>,
    variants: Vec<PlateVariant>,
}

impl OcrEngines {
    pub fn new(primary: Option<BoxedOcr>, fallback: Option<BoxedOcr>) -> Self {
        if primary.is_none() {
            warn!("Primary OCR engine unavailable");
        }
        if fallback.is_none() {
            warn!("Fallback OCR engine unavailable");
        }
        Self {
            primary,
            fallback,
            variants: vec![PlateVariant::OtsuMorph],
        }
    }

    pub fn none() -> Self {
        Self {
            primary: None,
            fallback: None,
            variants: vec![PlateVariant::OtsuMorph],
        }
    }

    /// Preprocessed variants each engine reads besides the color image.
    pub fn with_variants(mut self, variants: Vec<PlateVariant>) -> Self {
        self.variants = variants;
        self
    }

    pub fn available(&self) -> usize {
        self.primary.is_some() as usize + self.fallback.is_some() as usize
    }

    pub fn read_plate(&mut self, plate: &Image) -> OcrOutcome {
        let mut outcome = OcrOutcome::default();
        if self.available() == 0 || plate.is_empty() {
            return outcome;
        }
        let start = Instant::now();

        let inputs = match prepare_inputs(plate, &self.variants) {
            Ok(inputs) => inputs,
            Err(e) => {
                warn!(error = %e, "Failed to prepare plate for OCR");
                outcome.errors += 1;
                return outcome;
            }
        };

        for engine in [self.primary.as_mut(), self.fallback.as_mut()]
            .into_iter()
            .flatten()
        {
            for (input_name, image) in &inputs {
                let source = format!("{}_{}", engine.name(), input_name);
                match engine.recognize(image) {
                    Ok(hits) => outcome.candidates.extend(hits.into_iter().filter_map(|hit| {
                        clean_plate_text(&hit.text).map(|text| PlateReading {
                            text,
                            confidence: hit.confidence,
                            source: source.clone(),
                        })
                    })),
                    Err(e) => {
                        warn!(%source, degradation = %Degradation::OcrBackendError, error = %e, "OCR engine failed");
                        outcome.errors += 1;
                    }
                }
            }
        }

        outcome.best = best_reading(&outcome.candidates).cloned();
        debug!(
            candidates = ?outcome
                .candidates
                .iter()
                .map(|r| (r.text.as_str(), r.confidence, r.source.as_str()))
                .collect::<Vec<_>>(),
            best = ?outcome.best,
            elapsed = ?start.elapsed(),
            "Plate OCR done"
        );
        outcome
    }
}

/// Highest confidence reading, the earliest one on a tie.
pub fn best_reading(candidates: &[PlateReading]) -> Option<&PlateReading> {
    candidates.iter().fold(None, |best, reading| match best {
        Some(b) if b.confidence >= reading.confidence => Some(b),
        _ => Some(reading),
    })
}

/// The color plate scaled to [`OCR_PLATE_WIDTH`] followed by the requested binary renditions of it.
fn prepare_inputs(
    plate: &Image,
    variants: &[PlateVariant],
) -> anyhow::Result<Vec<(&'static str, Image)>> {
    let height = ((plate.height as f32 * OCR_PLATE_WIDTH as f32 / plate.width as f32) as usize).max(1);
    let color = resize_exact(plate, OCR_PLATE_WIDTH, height, ResizeFilter::Cubic)?;
    let mut inputs = Vec::with_capacity(1 + variants.len());
    if !variants.is_empty() {
        let rendered = PlateVariants::compute(&color)?;
        for variant in variants {
            inputs.push((variant.name(), Image::from_gray(rendered.get(*variant))));
        }
    }
    inputs.insert(0, ("color", color));
    Ok(inputs)
}

#[derive(Debug, Clone)]
pub struct CtcRecognizerConfig {
    pub name: String,
    pub onnx: OnnxConfig,
    /// One symbol per line. Index 0 of the model output is the CTC blank.
    pub dictionary: PathBuf,
    pub input_height: usize,
    pub max_input_width: usize,
    pub use_space_char: bool,
}

/// Text line recognizer for CRNN/SVTR style models with a greedy CTC head.
pub struct CtcRecognizer {
    name: String,
    session: Session,
    output_name: String,
    symbols: Vec<String>,
    input_height: usize,
    max_input_width: usize,
}

impl CtcRecognizer {
    pub fn new(config: CtcRecognizerConfig) -> anyhow::Result<Self> {
        let dictionary = std::fs::read_to_string(&config.dictionary).with_context(|| {
            format!("Failed to read OCR dictionary {}", config.dictionary.display())
        })?;
        let symbols = load_symbols(&dictionary, config.use_space_char);
        if symbols.len() < 2 {
            bail!("OCR dictionary {} is empty", config.dictionary.display());
        }
        let (device_type, model_name, session, _) = initialize_onnx(&config.onnx)?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .with_context(|| format!("{model_name} has no outputs"))?;
        info!(
            engine = %config.name,
            model = %model_name,
            symbols = symbols.len(),
            %device_type,
            "OCR engine ready"
        );
        Ok(Self {
            name: config.name,
            session,
            output_name,
            symbols,
            input_height: config.input_height,
            max_input_width: config.max_input_width,
        })
    }

    fn input_tensor(&self, image: &Image) -> anyhow::Result<ndarray::Array4<f32>> {
        let ratio = image.width as f32 / image.height.max(1) as f32;
        let width = ((self.input_height as f32 * ratio).ceil() as usize).clamp(1, self.max_input_width);
        let resized = resize_exact(image, width, self.input_height, ResizeFilter::Linear)?;
        let mut input = Array::zeros((1, 3, self.input_height, self.max_input_width));
        for (index, chunk) in resized.pixels.chunks_exact(3).enumerate() {
            let (y, x) = (index / width, index % width);
            for c in 0..3 {
                input[[0, c, y, x]] = (chunk[c] as f32 / 255.0 - 0.5) / 0.5;
            }
        }
        Ok(input)
    }
}

impl OcrBackend for CtcRecognizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn recognize(&mut self, image: &Image) -> anyhow::Result<Vec<OcrHit>> {
        if image.is_empty() {
            return Ok(Vec::new());
        }
        let input = Tensor::from_array(self.input_tensor(image)?)?;
        let outputs = self.session.run(ort::inputs![input])?;
        let (shape, data) = outputs[self.output_name.as_str()].try_extract_tensor::<f32>()?;
        let shape: Vec<usize> = shape.as_ref().iter().map(|&d| d as usize).collect();
        Ok(ctc_greedy_decode(&shape, data, &self.symbols)?
            .into_iter()
            .collect())
    }
}

/// Blank at index 0, then the dictionary lines, then an optional space.
pub fn load_symbols(dictionary: &str, use_space_char: bool) -> Vec<String> {
    let mut symbols = vec![String::new()];
    symbols.extend(
        dictionary
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.is_empty())
            .map(str::to_string),
    );
    if use_space_char {
        symbols.push(" ".to_string());
    }
    symbols
}

/// Greedy CTC over a `[1, steps, classes]` probability tensor.
///
/// Confidence is the mean of the winning probability over emitted symbols.
pub fn ctc_greedy_decode(
    shape: &[usize],
    data: &[f32],
    symbols: &[String],
) -> anyhow::Result<Option<OcrHit>> {
    let [_, steps, classes] = shape else {
        bail!("Unexpected recognizer output shape {shape:?}");
    };
    let (steps, classes) = (*steps, *classes);
    if data.len() < steps * classes || classes == 0 {
        bail!("Recognizer output of {} values does not match {shape:?}", data.len());
    }
    let needs_softmax = data.iter().any(|&p| !(0.0..=1.0).contains(&p));

    let mut text = String::new();
    let mut confidences = Vec::new();
    let mut previous = 0usize;
    let mut row = vec![0f32; classes];
    for step in data.chunks_exact(classes).take(steps) {
        row.copy_from_slice(step);
        if needs_softmax {
            softmax(&mut row);
        }
        let (index, probability) = row
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .unwrap_or((0, 0.0));
        if index != 0 && index != previous {
            if let Some(symbol) = symbols.get(index) {
                text.push_str(symbol);
                confidences.push(probability);
            }
        }
        previous = index;
    }

    if text.trim().is_empty() {
        return Ok(None);
    }
    let confidence = confidences.iter().sum::<f32>() / confidences.len() as f32;
    Ok(Some(OcrHit { text, confidence }))
}

fn softmax(row: &mut [f32]) {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for v in row.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    if sum > 0.0 {
        for v in row.iter_mut() {
            *v /= sum;
        }
    }
}
