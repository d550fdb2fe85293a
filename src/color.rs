use crate::{
    api::BoundingBox,
    image::{Image, ResizeFilter, resize_exact},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CarColor {
    White,
    Black,
    SilverGray,
    Red,
    Orange,
    Yellow,
    Green,
    Blue,
    Purple,
    Unknown,
}

impl CarColor {
    pub fn label(&self) -> &'static str {
        match self {
            CarColor::White => "White",
            CarColor::Black => "Black",
            CarColor::SilverGray => "Silver/Gray",
            CarColor::Red => "Red",
            CarColor::Orange => "Orange",
            CarColor::Yellow => "Yellow",
            CarColor::Green => "Green",
            CarColor::Blue => "Blue",
            CarColor::Purple => "Purple",
            CarColor::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for CarColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Mean hue, saturation and value on the 8 bit scale (hue 0..180).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeanHsv {
    pub hue: f32,
    pub saturation: f32,
    pub value: f32,
}

/// First matching rule wins. Chromatic bands need saturation above 50.
pub fn classify_hsv(hsv: MeanHsv) -> CarColor {
    let MeanHsv {
        hue: h,
        saturation: s,
        value: v,
    } = hsv;
    let chromatic = s > 50.0;
    if v > 180.0 && s < 40.0 {
        CarColor::White
    } else if v < 50.0 {
        CarColor::Black
    } else if s < 40.0 && (50.0..=180.0).contains(&v) {
        CarColor::SilverGray
    } else if (h < 10.0 || h > 170.0) && chromatic {
        CarColor::Red
    } else if (10.0..25.0).contains(&h) && chromatic {
        CarColor::Orange
    } else if (25.0..35.0).contains(&h) && chromatic {
        CarColor::Yellow
    } else if (35.0..85.0).contains(&h) && chromatic {
        CarColor::Green
    } else if (85.0..130.0).contains(&h) && chromatic {
        CarColor::Blue
    } else if (130.0..170.0).contains(&h) && chromatic {
        CarColor::Purple
    } else {
        CarColor::Unknown
    }
}

/// RGB to 8 bit HSV as OpenCV computes it: hue in degrees halved, saturation and value in 0..255.
pub fn rgb_to_hsv(rgb: [u8; 3]) -> [u8; 3] {
    let [r, g, b] = rgb.map(|c| c as f32);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let saturation = if max > 0.0 { delta * 255.0 / max } else { 0.0 };
    let mut hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (g - b) / delta
    } else if max == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    if hue < 0.0 {
        hue += 360.0;
    }
    [
        (hue / 2.0).round().min(180.0) as u8,
        saturation.round() as u8,
        max as u8,
    ]
}

/// Center band of the crop the color is read from.
pub fn color_sample_region(width: usize, height: usize) -> BoundingBox {
    BoundingBox::new(
        (width as f32 * 0.2) as usize,
        (height as f32 * 0.3) as usize,
        (width as f32 * 0.8) as usize,
        (height as f32 * 0.7) as usize,
    )
}

pub fn mean_hsv(image: &Image) -> anyhow::Result<MeanHsv> {
    let hsv_pixels = image
        .pixels
        .chunks_exact(3)
        .flat_map(|p| rgb_to_hsv([p[0], p[1], p[2]]))
        .collect();
    let hsv = Image::new(image.width, image.height, hsv_pixels)?;
    let small = resize_exact(&hsv, 30, 30, ResizeFilter::Linear)?;

    let mut sums = [0f64; 3];
    for p in small.pixels.chunks_exact(3) {
        for (sum, &c) in sums.iter_mut().zip(p) {
            *sum += c as f64;
        }
    }
    let count = (small.width * small.height).max(1) as f64;
    Ok(MeanHsv {
        hue: (sums[0] / count) as f32,
        saturation: (sums[1] / count) as f32,
        value: (sums[2] / count) as f32,
    })
}

/// Color label of a vehicle crop. Empty crops are `Unknown`.
pub fn classify_color(vehicle_crop: &Image) -> CarColor {
    if vehicle_crop.is_empty() {
        return CarColor::Unknown;
    }
    let region = color_sample_region(vehicle_crop.width, vehicle_crop.height);
    let mut center = vehicle_crop.crop(&region);
    if center.is_empty() {
        center = vehicle_crop.clone();
    }
    match mean_hsv(&center) {
        Ok(hsv) => {
            let color = classify_hsv(hsv);
            debug!(?hsv, %color, "Classified vehicle color");
            color
        }
        Err(e) => {
            debug!(error = %e, "Color sampling failed");
            CarColor::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hsv(hue: f32, saturation: f32, value: f32) -> MeanHsv {
        MeanHsv {
            hue,
            saturation,
            value,
        }
    }

    #[test]
    fn rule_table() {
        assert_eq!(classify_hsv(hsv(0.0, 10.0, 200.0)), CarColor::White);
        assert_eq!(classify_hsv(hsv(100.0, 200.0, 30.0)), CarColor::Black);
        assert_eq!(classify_hsv(hsv(0.0, 20.0, 120.0)), CarColor::SilverGray);
        assert_eq!(classify_hsv(hsv(175.0, 120.0, 120.0)), CarColor::Red);
        assert_eq!(classify_hsv(hsv(15.0, 120.0, 120.0)), CarColor::Orange);
        assert_eq!(classify_hsv(hsv(30.0, 120.0, 120.0)), CarColor::Yellow);
        assert_eq!(classify_hsv(hsv(60.0, 120.0, 120.0)), CarColor::Green);
        assert_eq!(classify_hsv(hsv(100.0, 80.0, 120.0)), CarColor::Blue);
        assert_eq!(classify_hsv(hsv(150.0, 120.0, 120.0)), CarColor::Purple);
        assert_eq!(classify_hsv(hsv(100.0, 45.0, 120.0)), CarColor::Unknown);
    }

    #[test]
    fn opencv_hsv_scale() {
        assert_eq!(rgb_to_hsv([255, 0, 0]), [0, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 0, 255]), [120, 255, 255]);
        assert_eq!(rgb_to_hsv([82, 107, 120]), [100, 81, 120]);
        assert_eq!(rgb_to_hsv([0, 0, 0]), [0, 0, 0]);
    }

    #[test]
    fn classifies_uniform_crops() {
        assert_eq!(classify_color(&Image::filled(80, 60, [200, 200, 200])), CarColor::White);
        assert_eq!(classify_color(&Image::filled(80, 60, [30, 30, 30])), CarColor::Black);
        assert_eq!(classify_color(&Image::filled(80, 60, [82, 107, 120])), CarColor::Blue);
    }

    #[test]
    fn only_center_band_counts() {
        let mut crop = Image::filled(100, 100, [30, 30, 30]);
        let region = color_sample_region(100, 100);
        assert_eq!(region, BoundingBox::new(20, 30, 80, 70));
        for y in region.y1..region.y2 {
            for x in region.x1..region.x2 {
                let i = (y * 100 + x) * 3;
                crop.pixels[i..i + 3].copy_from_slice(&[200, 200, 200]);
            }
        }
        assert_eq!(classify_color(&crop), CarColor::White);
    }

    #[test]
    fn tiny_crop_falls_back_to_whole_image() {
        assert_eq!(classify_color(&Image::filled(1, 1, [200, 200, 200])), CarColor::White);
        assert_eq!(classify_color(&Image::default()), CarColor::Unknown);
    }
}
