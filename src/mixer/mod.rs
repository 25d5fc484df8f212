//! Narration and background music mixing.
//!
//! The narration is the foundation track. A background track is picked from a
//! catalog directory, looped or trimmed to the narration length plus a tail,
//! set a fixed number of decibels under the narration, overlaid, and faded
//! out. The result is written next to the destination and renamed into place
//! only once encoding has succeeded.

pub mod catalog;
pub mod compose;
pub mod fit;
pub mod loudness;

pub use catalog::{AUDIO_EXTENSIONS, list_tracks, select_track};
pub use compose::{FadeCurve, compose, fade_out, overlay};
pub use fit::fit_to_duration;
pub use loudness::{balance, loudness_delta};

use crate::audio::{AudioBuffer, Codec};
use crate::error::MixError;
use crate::{logi, logok, logw};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Which buffer the other one is laid onto. Both give the same length because
/// the narration is padded with silence up to the fitted music first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayBase {
    #[default]
    Narration,
    Music,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixPolicy {
    /// Music kept playing after the narration ends.
    pub tail_padding_ms: u64,
    /// How far below the narration the music sits, in dB.
    pub target_gain_offset_db: f64,
    pub fade_out_ms: u64,
    pub fade_curve: FadeCurve,
    pub overlay_base: OverlayBase,
    /// Upper bound on repeats of a short background track.
    pub max_loops: usize,
    /// Tracks shorter than this are rejected instead of looped.
    pub min_track_ms: u64,
}

impl Default for MixPolicy {
    fn default() -> Self {
        Self {
            tail_padding_ms: 5_000,
            target_gain_offset_db: 12.0,
            fade_out_ms: 6_000,
            fade_curve: FadeCurve::Linear,
            overlay_base: OverlayBase::Narration,
            max_loops: 512,
            min_track_ms: 100,
        }
    }
}

/// Mixes decoded narration with a decoded background track.
///
/// The result lasts `narration + tail_padding_ms` and never cuts the
/// narration short.
pub fn mix_buffers(
    narration: &AudioBuffer,
    track: &AudioBuffer,
    policy: &MixPolicy,
) -> Result<AudioBuffer, MixError> {
    if narration.is_empty() {
        return Err(MixError::InvalidInput {
            reason: "narration has no audio".to_owned(),
        });
    }
    if narration.format() != track.format() {
        return Err(MixError::FormatMismatch {
            left: narration.format(),
            right: track.format(),
        });
    }

    let target_ms = narration.duration_ms() + policy.tail_padding_ms;
    let fitted = fit_to_duration(track, target_ms, policy)?;
    let frames = fitted.frames().max(narration.frames());

    let music = balance(narration, &fitted, policy.target_gain_offset_db).padded_to(frames);
    let voice = narration.padded_to(frames);
    debug!(
        narration_dbfs = narration.dbfs(),
        music_before_dbfs = fitted.dbfs(),
        music_after_dbfs = music.dbfs(),
        "balanced background music"
    );

    match policy.overlay_base {
        OverlayBase::Narration => compose(&voice, &music, policy.fade_out_ms, policy.fade_curve),
        OverlayBase::Music => compose(&music, &voice, policy.fade_out_ms, policy.fade_curve),
    }
}

/// File-level mixing pipeline: decode, select, mix, encode, rename.
#[derive(Debug, Clone)]
pub struct Mixer {
    codec: Codec,
    policy: MixPolicy,
}

impl Mixer {
    pub fn new(codec: Codec, policy: MixPolicy) -> Self {
        Self { codec, policy }
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub async fn mix<R: Rng + Send + ?Sized>(
        &self,
        narration_path: &Path,
        catalog_dir: &Path,
        output_path: &Path,
        rng: &mut R,
    ) -> Result<PathBuf, MixError> {
        let narration = self.codec.decode(narration_path).await?;
        if narration.is_empty() {
            return Err(MixError::InvalidInput {
                reason: format!("{} decoded to zero frames", narration_path.display()),
            });
        }
        logi(format!(
            "Narration {} lasts {} ms at {:.2} dBFS",
            narration_path.display(),
            narration.duration_ms(),
            narration.dbfs()
        ));

        let track = self.load_background(catalog_dir, rng).await?;

        let policy = self.policy;
        let mixed = tokio::task::spawn_blocking(move || mix_buffers(&narration, &track, &policy))
            .await
            .map_err(|e| MixError::Task(e.to_string()))??;

        self.persist(&mixed, output_path).await?;
        logok(format!(
            "Mixed audio saved: {} ({} ms)",
            output_path.display(),
            mixed.duration_ms()
        ));
        Ok(output_path.to_path_buf())
    }

    /// Decodes a randomly selected background track. A track that fails to
    /// decode is swapped for another pick once before giving up.
    async fn load_background<R: Rng + Send + ?Sized>(
        &self,
        catalog_dir: &Path,
        rng: &mut R,
    ) -> Result<AudioBuffer, MixError> {
        let first = select_track(catalog_dir, rng)?;
        logi(format!("Selected background music: {}", first.display()));

        let err = match self.codec.decode(&first).await {
            Ok(track) => return Ok(track),
            Err(err) => err,
        };
        logw(format!("Background track failed to decode: {err}"));

        let rest: Vec<PathBuf> = list_tracks(catalog_dir)
            .into_iter()
            .filter(|path| *path != first)
            .collect();
        let Some(second) = catalog::choose_track(&rest, rng) else {
            return Err(MixError::InvalidBackgroundTrack {
                reason: err.to_string(),
            });
        };

        logi(format!("Retrying with background music: {}", second.display()));
        self.codec
            .decode(&second)
            .await
            .map_err(|e| MixError::InvalidBackgroundTrack {
                reason: e.to_string(),
            })
    }

    async fn persist(&self, mixed: &AudioBuffer, output_path: &Path) -> Result<(), MixError> {
        let dir = match output_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        tokio::fs::create_dir_all(dir).await?;

        let suffix = output_path
            .extension()
            .and_then(OsStr::to_str)
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default();
        let staging = tempfile::Builder::new()
            .prefix(".mix-")
            .suffix(&suffix)
            .tempfile_in(dir)?;

        self.codec.encode(mixed, staging.path()).await?;
        staging
            .persist(output_path)
            .map_err(|e| MixError::Io(e.error))?;
        Ok(())
    }
}
