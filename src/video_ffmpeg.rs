//! Container and codec decoding through FFmpeg.

use crate::{image::Image, video::VideoSource};
use anyhow::{Context, bail};
use ffmpeg_next as ffmpeg;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Seeks by decoding forward. Asking for an earlier frame reopens the file.
pub struct FfmpegVideoSource {
    path: PathBuf,
    fps_override: Option<f64>,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    fps: f64,
    frame_count: usize,
    next_index: usize,
    eof_sent: bool,
}

impl FfmpegVideoSource {
    pub fn open(path: &Path, fps_override: Option<f64>) -> anyhow::Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open {} with ffmpeg", path.display()))?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("{} has no video track", path.display()))?;
        let stream_index = stream.index();

        let stream_fps = f64::from(stream.avg_frame_rate());
        let fps = match fps_override {
            Some(fps) => fps,
            None if stream_fps.is_finite() && stream_fps > 0.0 => stream_fps,
            None => 0.0,
        };
        let frame_count = match usize::try_from(stream.frames()) {
            Ok(frames) if frames > 0 => frames,
            _ => estimated_frame_count(input.duration(), fps),
        };

        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;
        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        info!(
            path = %path.display(),
            fps,
            frame_count,
            width = decoder.width(),
            height = decoder.height(),
            "Opened video file"
        );
        Ok(Self {
            path: path.to_path_buf(),
            fps_override,
            input,
            stream_index,
            decoder,
            scaler,
            fps,
            frame_count,
            next_index: 0,
            eof_sent: false,
        })
    }

    fn next_packet(&mut self) -> Option<ffmpeg::Packet> {
        let stream_index = self.stream_index;
        self.input
            .packets()
            .find(|(stream, _)| stream.index() == stream_index)
            .map(|(_, packet)| packet)
    }

    /// Next frame in decode order, converted to RGB only when `convert` is set.
    fn decode_next(&mut self, convert: bool) -> anyhow::Result<Option<Image>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                self.next_index += 1;
                if !convert {
                    return Ok(Some(Image::default()));
                }
                let mut rgb_frame = ffmpeg::frame::Video::empty();
                self.scaler
                    .run(&decoded, &mut rgb_frame)
                    .context("scale frame to RGB")?;
                return Ok(Some(frame_to_image(&rgb_frame)?));
            }
            if self.eof_sent {
                return Ok(None);
            }
            match self.next_packet() {
                Some(packet) => self
                    .decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?,
                None => {
                    self.decoder.send_eof().context("flush ffmpeg decoder")?;
                    self.eof_sent = true;
                }
            }
        }
    }
}

impl VideoSource for FfmpegVideoSource {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_count(&self) -> usize {
        self.frame_count
    }

    fn read_frame(&mut self, index: usize) -> anyhow::Result<Image> {
        if index < self.next_index {
            debug!(index, next_index = self.next_index, "Rewinding video");
            *self = Self::open(&self.path, self.fps_override)?;
        }
        while self.next_index < index {
            if self.decode_next(false)?.is_none() {
                bail!("video ended at frame {} before frame {index}", self.next_index);
            }
        }
        self.decode_next(true)?
            .with_context(|| format!("video ended before frame {index}"))
    }
}

/// Container duration is in `AV_TIME_BASE` units (microseconds).
fn estimated_frame_count(duration: i64, fps: f64) -> usize {
    if duration <= 0 || fps <= 0.0 {
        return 0;
    }
    (duration as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE) * fps).round() as usize
}

fn frame_to_image(frame: &ffmpeg::frame::Video) -> anyhow::Result<Image> {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let row_bytes = width * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let pixels = data
            .get(..row_bytes * height)
            .context("ffmpeg frame is shorter than its dimensions")?;
        return Image::new(width, height, pixels.to_vec());
    }

    let mut pixels = Vec::with_capacity(row_bytes * height);
    for row in 0..height {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }
    Image::new(width, height, pixels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_count_from_duration() {
        assert_eq!(estimated_frame_count(10_000_000, 10.0), 100);
        assert_eq!(estimated_frame_count(2_500_000, 29.97), 75);
        assert_eq!(estimated_frame_count(0, 30.0), 0);
        assert_eq!(estimated_frame_count(1_000_000, 0.0), 0);
    }

    #[test]
    fn missing_file_fails_to_open() {
        assert!(FfmpegVideoSource::open(Path::new("/nonexistent/clip.mp4"), None).is_err());
    }
}
