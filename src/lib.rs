use clap::ValueEnum;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{Level, info};

pub mod analyzer;
pub mod api;
pub mod cli;
pub mod color;
pub mod dedup;
pub mod detector;
pub mod enhance;
pub mod error;
pub mod image;
pub mod ocr;
pub mod plate_text;
pub mod regions;
pub mod store;
pub mod video;
#[cfg(feature = "ffmpeg")]
pub mod video_ffmpeg;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_utils;

pub static COCO_CLASSES_STR: &str = include_str!("../assets/coco_classes.yaml");
pub static PLATE_CLASSES_STR: &str = include_str!("../assets/plate_classes.yaml");

/// Detector classes that count as a vehicle at the pump.
pub const VEHICLE_CLASSES: [&str; 3] = ["car", "truck", "bus"];

#[allow(non_snake_case)]
#[derive(Debug, Deserialize)]
struct ClassNames {
    NAMES: Vec<String>,
}

/// Loads detector class names from a YAML file, or from the embedded default.
pub fn get_object_classes(yaml_file: Option<PathBuf>, default: &str) -> anyhow::Result<Vec<String>> {
    let yaml_data = match yaml_file {
        Some(yaml_file) => std::fs::read_to_string(yaml_file)?,
        None => default.to_string(),
    };
    Ok(serde_yaml::from_str::<ClassNames>(yaml_data.as_str())?.NAMES)
}

pub fn init_logging(
    log_level: LogLevel,
    log_path: &mut Option<PathBuf>,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    setup_ansi_support();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_to_filter_string(log_level)));

    let guard = if let Some(path) = log_path.clone() {
        let log_directory = if path.starts_with(".") {
            let stripped = path.strip_prefix(".").unwrap_or(&path).to_path_buf();
            std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(|p| p.join(stripped.clone())))
                .unwrap_or(stripped)
        } else {
            path
        };

        *log_path = Some(log_directory.clone());

        let log_file = log_directory.join("forecourt.log");
        println!("Starting forecourt, logging into: {}", log_file.display());

        let file_appender = tracing_appender::rolling::daily(&log_directory, "forecourt.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .try_init()
            .map_err(|_| anyhow::anyhow!("Logging already initialized"))?;

        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .map_err(|_| anyhow::anyhow!("Logging already initialized"))?;

        None
    };

    info!(?log_level, "Logging initialized");
    Ok(guard)
}

fn level_to_filter_string(log_level: LogLevel) -> String {
    match log_level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
    .to_string()
}

fn setup_ansi_support() {
    #[cfg(target_os = "windows")]
    if let Err(e) = ansi_term::enable_ansi_support() {
        eprintln!("Failed to enable ANSI support: {e}");
    }
}

#[derive(
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    ValueEnum,
    Debug,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_coco_classes_contain_vehicle_classes() {
        let classes = get_object_classes(None, COCO_CLASSES_STR).unwrap();
        assert_eq!(classes.len(), 80);
        for vehicle in VEHICLE_CLASSES {
            assert!(classes.iter().any(|c| c == vehicle), "missing {vehicle}");
        }
    }

    #[test]
    fn embedded_plate_classes() {
        let classes = get_object_classes(None, PLATE_CLASSES_STR).unwrap();
        assert_eq!(classes, vec!["license_plate".to_string()]);
    }
}
