//! Canned detectors, OCR engines and videos for driving the pipeline without model files.

use crate::{
    api::Prediction,
    detector::{ObjectDetector, Predictions},
    image::Image,
    ocr::{OcrBackend, OcrHit},
    video::VideoSource,
};
use std::sync::atomic::{AtomicUsize, Ordering};

type DetectFn = Box<dyn FnMut(&Image, f32) -> anyhow::Result<Vec<Prediction>> + Send>;

pub struct ScriptedDetector {
    script: DetectFn,
    calls: AtomicUsize,
}

impl ScriptedDetector {
    pub fn from_fn<F>(script: F) -> Self
    where
        F: FnMut(&Image, f32) -> anyhow::Result<Vec<Prediction>> + Send + 'static,
    {
        Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always(predictions: Vec<Prediction>) -> Self {
        Self::from_fn(move |_, _| Ok(predictions.clone()))
    }

    pub fn failing() -> Self {
        Self::from_fn(|_, _| anyhow::bail!("inference failed"))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl ObjectDetector for ScriptedDetector {
    fn detect(&mut self, image: &Image, confidence_threshold: f32) -> anyhow::Result<Predictions> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok((self.script)(image, confidence_threshold)?.into_iter().collect())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

type RecognizeFn = Box<dyn FnMut(&Image) -> anyhow::Result<Vec<OcrHit>> + Send>;

pub struct ScriptedOcr {
    name: String,
    script: RecognizeFn,
}

impl ScriptedOcr {
    pub fn new<F>(name: &str, script: F) -> Self
    where
        F: FnMut(&Image) -> anyhow::Result<Vec<OcrHit>> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            script: Box::new(script),
        }
    }

    pub fn reading(name: &str, text: &str, confidence: f32) -> Self {
        let text = text.to_string();
        Self::new(name, move |_| {
            Ok(vec![OcrHit {
                text: text.clone(),
                confidence,
            }])
        })
    }
}

impl OcrBackend for ScriptedOcr {
    fn name(&self) -> &str {
        &self.name
    }

    fn recognize(&mut self, image: &Image) -> anyhow::Result<Vec<OcrHit>> {
        (self.script)(image)
    }
}

type FrameFn = Box<dyn Fn(usize) -> Image + Send>;

/// In-memory video whose frames are produced on demand.
pub struct SyntheticVideo {
    frame_count: usize,
    fps: f64,
    render: FrameFn,
    failing: Vec<usize>,
}

impl SyntheticVideo {
    pub fn from_fn<F>(frame_count: usize, fps: f64, render: F) -> Self
    where
        F: Fn(usize) -> Image + Send + 'static,
    {
        Self {
            frame_count,
            fps,
            render: Box::new(render),
            failing: Vec::new(),
        }
    }

    pub fn uniform(frame_count: usize, fps: f64, width: usize, height: usize) -> Self {
        Self::from_fn(frame_count, fps, move |_| Image::filled(width, height, [90, 90, 90]))
    }

    /// Red channel of every pixel holds the frame index.
    pub fn indexed(frame_count: usize, fps: f64, width: usize, height: usize) -> Self {
        Self::from_fn(frame_count, fps, move |index| {
            Image::filled(width, height, [index as u8, 128, 128])
        })
    }

    pub fn failing_at(mut self, indices: &[usize]) -> Self {
        self.failing.extend_from_slice(indices);
        self
    }
}

impl VideoSource for SyntheticVideo {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_count(&self) -> usize {
        self.frame_count
    }

    fn read_frame(&mut self, index: usize) -> anyhow::Result<Image> {
        if self.failing.contains(&index) {
            anyhow::bail!("corrupt frame {index}");
        }
        if index >= self.frame_count {
            anyhow::bail!("frame {index} past the end");
        }
        Ok((self.render)(index))
    }
}
