use crate::api::BoundingBox;
use anyhow::{anyhow, bail};
use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions};
use image::{GrayImage, RgbImage};
use jpeg_encoder::{ColorType, Encoder};
use std::{fmt, path::Path, time::Instant};
use tracing::debug;
use zune_core::{colorspace::ColorSpace, options::DecoderOptions};
use zune_jpeg::JpegDecoder;

/// Interleaved RGB8 image.
#[derive(Clone, PartialEq)]
pub struct Image {
    pub name: Option<String>,
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
}

impl Image {
    pub fn new(width: usize, height: usize, pixels: Vec<u8>) -> anyhow::Result<Self> {
        if pixels.len() != width * height * 3 {
            bail!(
                "Pixel buffer of {} bytes does not match {}x{} RGB",
                pixels.len(),
                width,
                height
            );
        }
        Ok(Self {
            name: None,
            width,
            height,
            pixels,
        })
    }

    pub fn filled(width: usize, height: usize, rgb: [u8; 3]) -> Self {
        let mut pixels = Vec::with_capacity(width * height * 3);
        for _ in 0..width * height {
            pixels.extend_from_slice(&rgb);
        }
        Self {
            name: None,
            width,
            height,
            pixels,
        }
    }

    pub fn resize(&mut self, size: usize) {
        self.pixels.resize(size, 0);
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        let i = (y * self.width + x) * 3;
        [self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]]
    }

    /// Copies the region under `bbox`. Out of bounds parts are clipped, so the result may be empty.
    pub fn crop(&self, bbox: &BoundingBox) -> Image {
        let bbox = bbox.clamp(self.width, self.height);
        let (width, height) = (bbox.width(), bbox.height());
        let mut pixels = Vec::with_capacity(width * height * 3);
        for y in bbox.y1..bbox.y1 + height {
            let start = (y * self.width + bbox.x1) * 3;
            pixels.extend_from_slice(&self.pixels[start..start + width * 3]);
        }
        Image {
            name: self.name.clone(),
            width,
            height,
            pixels,
        }
    }

    pub fn to_rgb_image(&self) -> anyhow::Result<RgbImage> {
        RgbImage::from_raw(self.width as u32, self.height as u32, self.pixels.clone())
            .ok_or_else(|| anyhow!("Failed to create image buffer"))
    }

    pub fn from_rgb_image(image: RgbImage) -> Self {
        Self {
            name: None,
            width: image.width() as usize,
            height: image.height() as usize,
            pixels: image.into_raw(),
        }
    }

    /// BT.601 luma, the weights OpenCV-trained OCR models expect.
    pub fn to_gray(&self) -> GrayImage {
        let luma = self
            .pixels
            .chunks_exact(3)
            .map(|p| {
                (0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32).round() as u8
            })
            .collect();
        GrayImage::from_raw(self.width as u32, self.height as u32, luma).unwrap_or_default()
    }

    pub fn from_gray(gray: &GrayImage) -> Self {
        let mut pixels = Vec::with_capacity(gray.as_raw().len() * 3);
        for &v in gray.as_raw() {
            pixels.extend_from_slice(&[v, v, v]);
        }
        Self {
            name: None,
            width: gray.width() as usize,
            height: gray.height() as usize,
            pixels,
        }
    }
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}, Resolution: {}x{}",
            self.name, self.width, self.height
        )
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Image({self})")
    }
}

impl Default for Image {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            pixels: Vec::new(),
            name: None,
        }
    }
}

pub fn decode_jpeg(name: Option<String>, jpeg: &[u8], image: &mut Image) -> anyhow::Result<()> {
    let options = DecoderOptions::default()
        .set_strict_mode(true)
        .jpeg_set_out_colorspace(ColorSpace::RGB);
    let mut decoder = JpegDecoder::new_with_options(jpeg, options);
    // We need to decode the headers first to get the output buffer size
    decoder.decode_headers()?;
    let output_buffer_size = decoder
        .output_buffer_size()
        .ok_or_else(|| anyhow!("Failed to get decoder output buffer size"))?;
    image.resize(output_buffer_size);
    decoder.decode_into(&mut image.pixels)?;
    let (width, height) = decoder
        .dimensions()
        .ok_or_else(|| anyhow!("Failed to get image dimensions"))?;
    image.width = width;
    image.height = height;
    image.name = name;
    Ok(())
}

pub fn load_image(jpeg_file: &Path) -> anyhow::Result<Image> {
    let name = jpeg_file.to_string_lossy().to_string();
    if !is_jpeg(&name) {
        bail!("Image is not a JPEG file: {name}")
    }
    let bytes = std::fs::read(jpeg_file)?;
    let mut image = Image::default();
    decode_jpeg(Some(name), &bytes, &mut image)?;
    Ok(image)
}

pub fn is_jpeg(image_name: &str) -> bool {
    image_name.to_lowercase().ends_with(".jpg") || image_name.to_lowercase().ends_with(".jpeg")
}

fn encoder_dimensions(width: usize, height: usize) -> anyhow::Result<(u16, u16)> {
    if width == 0 || height == 0 {
        bail!("Refusing to encode an empty {width}x{height} image");
    }
    Ok((u16::try_from(width)?, u16::try_from(height)?))
}

pub fn save_jpeg(image: &Image, jpeg_file: &Path) -> anyhow::Result<()> {
    let encode_image_start_time = Instant::now();
    let (width, height) = encoder_dimensions(image.width, image.height)?;
    let encoder = Encoder::new_file(jpeg_file, 95)?;
    encoder.encode(&image.pixels, width, height, ColorType::Rgb)?;
    debug!(
        encode_image_time = ?encode_image_start_time.elapsed(),
        ?jpeg_file,
        "Image saved"
    );
    Ok(())
}

pub fn save_gray_jpeg(image: &GrayImage, jpeg_file: &Path) -> anyhow::Result<()> {
    let (width, height) = encoder_dimensions(image.width() as usize, image.height() as usize)?;
    let encoder = Encoder::new_file(jpeg_file, 95)?;
    encoder.encode(image.as_raw(), width, height, ColorType::Luma)?;
    debug!(?jpeg_file, "Image saved");
    Ok(())
}

/// Writes `image` with a red outline around every box, used for inspecting the chosen evidence frame.
pub fn save_annotated_jpeg(
    image: &Image,
    jpeg_file: &Path,
    boxes: &[BoundingBox],
) -> anyhow::Result<()> {
    let mut img = image.to_rgb_image()?;
    for bbox in boxes.iter().filter(|b| !b.is_empty()) {
        imageproc::drawing::draw_hollow_rect_mut(
            &mut img,
            imageproc::rect::Rect::at(bbox.x1 as i32, bbox.y1 as i32)
                .of_size(bbox.width() as u32, bbox.height() as u32),
            image::Rgb([255, 0, 0]),
        );
    }
    save_jpeg(&Image::from_rgb_image(img), jpeg_file)
}

/// Interpolation used when resizing, named after the OpenCV flag it stands in for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeFilter {
    Area,
    Linear,
    Cubic,
}

impl ResizeFilter {
    fn options(self) -> ResizeOptions {
        let filter = match self {
            ResizeFilter::Area => FilterType::Box,
            ResizeFilter::Linear => FilterType::Bilinear,
            ResizeFilter::Cubic => FilterType::CatmullRom,
        };
        ResizeOptions::new().resize_alg(ResizeAlg::Convolution(filter))
    }
}

pub struct Resizer {
    resizer: fast_image_resize::Resizer,
    target_width: usize,
    target_height: usize,
    filter: ResizeFilter,
}

impl Default for Resizer {
    fn default() -> Self {
        Self {
            resizer: fast_image_resize::Resizer::new(),
            target_width: 640,
            target_height: 640,
            filter: ResizeFilter::Linear,
        }
    }
}

impl Resizer {
    pub fn new(target_width: usize, target_height: usize) -> anyhow::Result<Self> {
        if target_width == 0 || target_height == 0 {
            bail!("Resize target {target_width}x{target_height} is empty");
        }
        Ok(Self {
            resizer: fast_image_resize::Resizer::new(),
            target_width,
            target_height,
            filter: ResizeFilter::Linear,
        })
    }

    pub fn with_filter(mut self, filter: ResizeFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn resize_image(
        &mut self,
        original_image: &Image,
        resized_image: &mut Image,
    ) -> anyhow::Result<()> {
        debug!(
            "Resizing image from {}x{} to {}x{}",
            original_image.width, original_image.height, self.target_width, self.target_height
        );
        if original_image.is_empty() {
            bail!("Cannot resize an empty image");
        }
        let src_image = fast_image_resize::images::ImageRef::new(
            original_image.width as u32,
            original_image.height as u32,
            &original_image.pixels,
            PixelType::U8x3,
        )?;

        resized_image.width = self.target_width;
        resized_image.height = self.target_height;
        resized_image.name = original_image.name.clone();
        resized_image.resize(self.target_width * self.target_height * 3);

        let mut dst_image = fast_image_resize::images::Image::from_slice_u8(
            resized_image.width as u32,
            resized_image.height as u32,
            &mut resized_image.pixels,
            PixelType::U8x3,
        )?;

        self.resizer
            .resize(&src_image, &mut dst_image, &self.filter.options())?;

        Ok(())
    }

    pub fn resize_gray(&mut self, original_image: &GrayImage) -> anyhow::Result<GrayImage> {
        if original_image.width() == 0 || original_image.height() == 0 {
            bail!("Cannot resize an empty image");
        }
        let src_image = fast_image_resize::images::ImageRef::new(
            original_image.width(),
            original_image.height(),
            original_image.as_raw(),
            PixelType::U8,
        )?;
        let mut pixels = vec![0u8; self.target_width * self.target_height];
        let mut dst_image = fast_image_resize::images::Image::from_slice_u8(
            self.target_width as u32,
            self.target_height as u32,
            &mut pixels,
            PixelType::U8,
        )?;
        self.resizer
            .resize(&src_image, &mut dst_image, &self.filter.options())?;
        GrayImage::from_raw(self.target_width as u32, self.target_height as u32, pixels)
            .ok_or_else(|| anyhow!("Failed to create resized gray image"))
    }
}

pub fn resize_exact(
    image: &Image,
    width: usize,
    height: usize,
    filter: ResizeFilter,
) -> anyhow::Result<Image> {
    let mut resized = Image::default();
    Resizer::new(width, height)?
        .with_filter(filter)
        .resize_image(image, &mut resized)?;
    Ok(resized)
}

pub fn resize_gray_exact(
    image: &GrayImage,
    width: usize,
    height: usize,
    filter: ResizeFilter,
) -> anyhow::Result<GrayImage> {
    Resizer::new(width, height)?
        .with_filter(filter)
        .resize_gray(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crop_copies_region_rows() {
        let mut image = Image::filled(4, 3, [0, 0, 0]);
        for y in 0..3 {
            for x in 0..4 {
                let i = (y * 4 + x) * 3;
                image.pixels[i] = (y * 10 + x) as u8;
            }
        }
        let crop = image.crop(&BoundingBox::new(1, 1, 3, 3));
        assert_eq!((crop.width, crop.height), (2, 2));
        assert_eq!(crop.pixel(0, 0)[0], 11);
        assert_eq!(crop.pixel(1, 1)[0], 22);
    }

    #[test]
    fn crop_outside_image_is_empty() {
        let image = Image::filled(4, 3, [9, 9, 9]);
        assert!(image.crop(&BoundingBox::new(5, 0, 9, 3)).is_empty());
        assert!(image.crop(&BoundingBox::new(2, 2, 2, 3)).is_empty());
    }

    #[test]
    fn resize_keeps_uniform_color() {
        let image = Image::filled(37, 21, [200, 100, 50]);
        let resized = resize_exact(&image, 10, 10, ResizeFilter::Area).unwrap();
        assert_eq!((resized.width, resized.height), (10, 10));
        for p in resized.pixels.chunks_exact(3) {
            assert!(p[0].abs_diff(200) <= 1 && p[1].abs_diff(100) <= 1 && p[2].abs_diff(50) <= 1);
        }
    }

    #[test]
    fn jpeg_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gray.jpg");
        save_jpeg(&Image::filled(16, 8, [128, 128, 128]), &path).unwrap();
        let loaded = load_image(&path).unwrap();
        assert_eq!((loaded.width, loaded.height), (16, 8));
        assert!(loaded.pixels.iter().all(|&p| (120..=136).contains(&p)));
    }

    #[test]
    fn refuses_empty_encode() {
        let dir = tempfile::tempdir().unwrap();
        assert!(save_jpeg(&Image::default(), &dir.path().join("x.jpg")).is_err());
    }
}
