use crate::audio::PcmFormat;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the audio mixing pipeline.
#[derive(Error, Debug)]
pub enum MixError {
    #[error("no background track found in {}", dir.display())]
    NoBackgroundTrackFound { dir: PathBuf },

    #[error("invalid background track: {reason}")]
    InvalidBackgroundTrack { reason: String },

    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("fade-out of {fade_ms} ms exceeds buffer length of {duration_ms} ms")]
    InvalidFadeDuration { fade_ms: u64, duration_ms: u64 },

    #[error("loudness is undefined for a silent track")]
    SilentTrack,

    #[error("sample format mismatch: {left:?} vs {right:?}")]
    FormatMismatch { left: PcmFormat, right: PcmFormat },

    #[error("failed to decode {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    #[error("failed to encode {}: {reason}", path.display())]
    Encode { path: PathBuf, reason: String },

    #[error("mixing task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised by the story and speech collaborators.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("story generation failed: {0}")]
    StoryGenerationFailed(String),

    #[error("speech synthesis failed (status {status:?}): {payload}")]
    SpeechSynthesisFailed { status: Option<u16>, payload: String },
}
