//! Frame sampling over decodable video sources.
//!
//! A [`VideoSource`] exposes random access by frame index. The [`FrameSampler`]
//! walks a source at roughly one frame per second of video.

use crate::error::AnalysisError;
use crate::image::{Image, decode_jpeg, is_jpeg};
use anyhow::{Context, bail};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub trait VideoSource {
    /// Frames per second, 0.0 when the container does not say.
    fn fps(&self) -> f64;
    fn frame_count(&self) -> usize;
    /// Seeks to `index` and decodes that frame.
    fn read_frame(&mut self, index: usize) -> anyhow::Result<Image>;
}

impl<T: VideoSource + ?Sized> VideoSource for Box<T> {
    fn fps(&self) -> f64 {
        (**self).fps()
    }

    fn frame_count(&self) -> usize {
        (**self).frame_count()
    }

    fn read_frame(&mut self, index: usize) -> anyhow::Result<Image> {
        (**self).read_frame(index)
    }
}

/// Frames are sampled every `max(1, round(fps))` frames.
pub fn frame_interval(fps: f64) -> usize {
    if fps.is_finite() && fps > 0.0 {
        (fps.round() as usize).max(1)
    } else {
        1
    }
}

/// Seconds from the start of the video, 0 for a degenerate frame rate.
pub fn frame_timestamp(frame_index: usize, fps: f64) -> f64 {
    if fps.is_finite() && fps > 0.0 {
        frame_index as f64 / fps
    } else {
        0.0
    }
}

#[derive(Debug)]
pub struct SampledFrame {
    pub frame_index: usize,
    pub timestamp: f64,
    pub image: Image,
}

/// One entry per sampled index. A failed seek or decode yields `Err` for that index only.
pub type SampleResult = Result<SampledFrame, (usize, anyhow::Error)>;

pub struct FrameSampler<'a, S: VideoSource + ?Sized> {
    source: &'a mut S,
    fps: f64,
    interval: usize,
    frame_count: usize,
    next_index: usize,
}

impl<'a, S: VideoSource + ?Sized> FrameSampler<'a, S> {
    pub fn new(source: &'a mut S) -> Self {
        let fps = source.fps();
        let frame_count = source.frame_count();
        let interval = frame_interval(fps);
        debug!(fps, frame_count, interval, "Frame sampler created");
        Self {
            source,
            fps,
            interval,
            frame_count,
            next_index: 0,
        }
    }

    /// Number of frames the sampler will attempt.
    pub fn planned_samples(&self) -> usize {
        self.frame_count.div_ceil(self.interval)
    }

    pub fn restart(&mut self) {
        self.next_index = 0;
    }
}

impl<S: VideoSource + ?Sized> Iterator for FrameSampler<'_, S> {
    type Item = SampleResult;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_index >= self.frame_count {
            return None;
        }
        let frame_index = self.next_index;
        self.next_index += self.interval;
        let sample = match self.source.read_frame(frame_index) {
            Ok(image) if !image.is_empty() => Ok(SampledFrame {
                frame_index,
                timestamp: frame_timestamp(frame_index, self.fps),
                image,
            }),
            Ok(_) => Err((frame_index, anyhow::anyhow!("decoded an empty frame"))),
            Err(e) => Err((frame_index, e)),
        };
        Some(sample)
    }
}

/// A directory of JPEG frames sorted by file name, one file per video frame.
///
/// The frame rate comes from the caller or from an `fps.txt` file inside the directory.
pub struct FrameDirectorySource {
    frames: Vec<PathBuf>,
    fps: f64,
}

impl FrameDirectorySource {
    pub fn open(dir: &Path, fps: Option<f64>) -> anyhow::Result<Self> {
        let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to list frame directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_jpeg(&path.to_string_lossy()))
            .collect();
        frames.sort();

        let fps = match fps {
            Some(fps) => fps,
            None => read_fps_file(&dir.join("fps.txt")).unwrap_or_else(|e| {
                warn!(?dir, error = %e, "No usable fps.txt, timestamps will be 0");
                0.0
            }),
        };

        info!(
            ?dir,
            frames = frames.len(),
            fps,
            "Opened frame directory source"
        );
        Ok(Self { frames, fps })
    }
}

fn read_fps_file(path: &Path) -> anyhow::Result<f64> {
    let text = std::fs::read_to_string(path)?;
    let fps: f64 = text.trim().parse().context("fps.txt does not hold a number")?;
    if !fps.is_finite() || fps < 0.0 {
        bail!("fps.txt holds an invalid frame rate {fps}");
    }
    Ok(fps)
}

impl VideoSource for FrameDirectorySource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn read_frame(&mut self, index: usize) -> anyhow::Result<Image> {
        let path = self
            .frames
            .get(index)
            .with_context(|| format!("Frame {index} is past the end of the source"))?;
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read frame {}", path.display()))?;
        let mut image = Image::default();
        decode_jpeg(Some(path.to_string_lossy().to_string()), &bytes, &mut image)?;
        Ok(image)
    }
}

/// Opens `path` with the backend that understands it.
///
/// Directories are read as JPEG frame sequences; files need the `ffmpeg` feature.
pub fn open_video_source(
    path: &Path,
    fps_override: Option<f64>,
) -> Result<Box<dyn VideoSource>, AnalysisError> {
    if !path.exists() {
        return Err(AnalysisError::SourceNotFound(path.to_path_buf()));
    }
    if path.is_dir() {
        let source = FrameDirectorySource::open(path, fps_override)
            .map_err(|e| AnalysisError::SourceUnreadable(format!("{e:#}")))?;
        return Ok(Box::new(source));
    }
    open_video_file(path, fps_override)
}

#[cfg(feature = "ffmpeg")]
fn open_video_file(
    path: &Path,
    fps_override: Option<f64>,
) -> Result<Box<dyn VideoSource>, AnalysisError> {
    let source = crate::video_ffmpeg::FfmpegVideoSource::open(path, fps_override)
        .map_err(|e| AnalysisError::SourceUnreadable(format!("{e:#}")))?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "ffmpeg"))]
fn open_video_file(
    path: &Path,
    _fps_override: Option<f64>,
) -> Result<Box<dyn VideoSource>, AnalysisError> {
    Err(AnalysisError::SourceUnreadable(format!(
        "{} is a video file, decoding it requires the ffmpeg feature",
        path.display()
    )))
}

const VIDEO_EXTENSIONS: [&str; 7] = ["mp4", "avi", "mov", "mkv", "m4v", "webm", "ts"];

/// Videos and frame directories directly inside `dir`, keyed by file stem and sorted.
pub fn list_video_inputs(dir: &Path) -> anyhow::Result<Vec<(String, PathBuf)>> {
    let mut inputs: Vec<(String, PathBuf)> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_dir()
                || path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        })
        .filter_map(|path| {
            let video_id = path.file_stem()?.to_string_lossy().to_string();
            Some((video_id, path))
        })
        .collect();
    inputs.sort();
    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::save_jpeg;
    use crate::test_utils::SyntheticVideo;

    #[test]
    fn interval_is_one_second_of_frames() {
        assert_eq!(frame_interval(10.0), 10);
        assert_eq!(frame_interval(29.97), 30);
        assert_eq!(frame_interval(0.4), 1);
        assert_eq!(frame_interval(0.0), 1);
        assert_eq!(frame_interval(f64::NAN), 1);
    }

    #[test]
    fn timestamp_handles_unknown_fps() {
        assert_eq!(frame_timestamp(30, 10.0), 3.0);
        assert_eq!(frame_timestamp(30, 0.0), 0.0);
    }

    #[test]
    fn samples_one_frame_per_second() {
        let mut video = SyntheticVideo::uniform(100, 10.0, 32, 24);
        let indices: Vec<usize> = FrameSampler::new(&mut video)
            .map(|s| s.map(|f| f.frame_index).unwrap())
            .collect();
        assert_eq!(indices, vec![0, 10, 20, 30, 40, 50, 60, 70, 80, 90]);
    }

    #[test]
    fn unreadable_frame_does_not_stop_sampling() {
        let mut video = SyntheticVideo::uniform(30, 10.0, 32, 24).failing_at(&[10]);
        let samples: Vec<SampleResult> = FrameSampler::new(&mut video).collect();
        assert_eq!(samples.len(), 3);
        assert!(samples[0].is_ok());
        assert!(matches!(samples[1], Err((10, _))));
        assert_eq!(samples[2].as_ref().unwrap().timestamp, 2.0);
    }

    #[test]
    fn sampler_can_restart() {
        let mut video = SyntheticVideo::uniform(20, 10.0, 8, 8);
        let mut sampler = FrameSampler::new(&mut video);
        assert_eq!(sampler.planned_samples(), 2);
        assert_eq!(sampler.by_ref().count(), 2);
        sampler.restart();
        assert_eq!(sampler.count(), 2);
    }

    #[test]
    fn frame_directory_reads_sorted_jpegs_and_fps_file() {
        let dir = tempfile::tempdir().unwrap();
        for (i, shade) in [10u8, 120, 240].iter().enumerate() {
            save_jpeg(
                &Image::filled(16, 16, [*shade; 3]),
                &dir.path().join(format!("frame_{i:05}.jpg")),
            )
            .unwrap();
        }
        std::fs::write(dir.path().join("fps.txt"), "2\n").unwrap();

        let mut source = FrameDirectorySource::open(dir.path(), None).unwrap();
        assert_eq!(source.frame_count(), 3);
        assert_eq!(source.fps(), 2.0);
        let last = source.read_frame(2).unwrap();
        assert!(last.pixel(8, 8)[0] > 200);
        assert!(source.read_frame(3).is_err());
    }

    #[test]
    fn missing_source_is_reported() {
        let err = open_video_source(Path::new("/definitely/not/here.mp4"), None)
            .err()
            .unwrap();
        assert!(matches!(err, AnalysisError::SourceNotFound(_)));
    }

    #[test]
    fn lists_videos_and_frame_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.MP4"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        let inputs = list_video_inputs(dir.path()).unwrap();
        let ids: Vec<&str> = inputs.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
