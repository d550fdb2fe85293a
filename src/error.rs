use std::path::PathBuf;
use thiserror::Error;

/// Failures that abort an analysis run.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("source not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("source unreadable: {0}")]
    SourceUnreadable(String),

    #[error("detector unavailable: {0}")]
    DetectorUnavailable(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl AnalysisError {
    pub fn source_unreadable(msg: impl Into<String>) -> Self {
        Self::SourceUnreadable(msg.into())
    }

    pub fn detector_unavailable(msg: impl Into<String>) -> Self {
        Self::DetectorUnavailable(msg.into())
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(format!("{err:#}"))
    }
}

/// Conditions that only degrade part of a run. They are logged and counted, never returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Degradation {
    FrameDecodeFailure,
    PlateDetectorFailure,
    EmptyCropDiscarded,
    OcrBackendUnavailable,
    OcrBackendError,
}

impl Degradation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Degradation::FrameDecodeFailure => "frame_decode_failure",
            Degradation::PlateDetectorFailure => "plate_detector_failure",
            Degradation::EmptyCropDiscarded => "empty_crop_discarded",
            Degradation::OcrBackendUnavailable => "ocr_backend_unavailable",
            Degradation::OcrBackendError => "ocr_backend_error",
        }
    }
}

impl std::fmt::Display for Degradation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_carry_reason() {
        let err = AnalysisError::SourceNotFound(PathBuf::from("missing.mp4"));
        assert_eq!(err.to_string(), "source not found: missing.mp4");
        let err = AnalysisError::source_unreadable("no frames");
        assert_eq!(err.to_string(), "source unreadable: no frames");
    }

    #[test]
    fn storage_error_keeps_context_chain() {
        let inner = anyhow::anyhow!("disk full").context("writing records");
        let err = AnalysisError::storage(inner);
        assert_eq!(err.to_string(), "storage error: writing records: disk full");
    }
}
