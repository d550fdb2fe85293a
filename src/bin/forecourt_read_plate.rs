//! Runs plate detection and dual OCR on a single JPEG.
//!
//! ```sh
//! cargo run --bin forecourt_read_plate -- --image car.jpg --ocr-primary-model rec.onnx --ocr-primary-dict dict.txt
//! ```
use clap::Parser;
use forecourt::{
    LogLevel,
    cli::{OnnxArgs, PlateArgs},
    detector::best_plate,
    image::{load_image, save_annotated_jpeg},
    init_logging,
};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(version = env!("CARGO_PKG_VERSION"), about = "Detect and read the license plate in one image")]
struct Cli {
    /// JPEG holding a vehicle
    #[clap(long)]
    image: PathBuf,
    /// Sets the level of logging
    #[clap(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
    /// Padding added to the plate box on every side, as a fraction of its size
    #[clap(long, default_value_t = 0.1)]
    plate_padding: f32,
    /// Write a copy of the image with the plate box drawn on it
    #[clap(long)]
    save_image_path: Option<PathBuf>,
    #[command(flatten)]
    plate: PlateArgs,
    #[command(flatten)]
    onnx: OnnxArgs,
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    let _guard = init_logging(args.log_level, &mut None)?;

    let image = load_image(&args.image)?;
    let mut detector = args.plate.plate_detector(&args.onnx)?;
    let mut ocr = args.plate.ocr_engines(&args.onnx);

    let Some(plate) = best_plate(
        &mut detector,
        &image,
        args.plate.plate_confidence,
        args.plate_padding,
    )?
    else {
        println!("No plate found");
        return Ok(());
    };
    info!(bbox = ?plate.bbox, confidence = plate.confidence, "Plate found");

    if let Some(path) = &args.save_image_path {
        save_annotated_jpeg(&image, path, &[plate.bbox])?;
    }

    let outcome = ocr.read_plate(&image.crop(&plate.bbox));
    for reading in &outcome.candidates {
        println!("{:<24} {:.3} {}", reading.text, reading.confidence, reading.source);
    }
    match outcome.best {
        Some(best) => println!("Plate: {} ({:.3}, {})", best.text, best.confidence, best.source),
        None => println!("Plate text unreadable ({} OCR errors)", outcome.errors),
    }
    Ok(())
}
