use crate::audio::AudioBuffer;
use crate::error::MixError;
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    #[default]
    Linear,
    EqualPower,
}

impl FadeCurve {
    /// Gain for a fade position where `remaining` runs from 1.0 down to 0.0.
    ///
    /// `Linear` drops by a fixed step per frame, so faded samples fall strictly
    /// at any sample rate. `EqualPower` is flat near the top of the fade and only
    /// guarantees that no faded sample rises above the one before it.
    pub fn gain(self, remaining: f64) -> f64 {
        let remaining = remaining.clamp(0.0, 1.0);
        match self {
            Self::Linear => remaining,
            Self::EqualPower => (remaining * FRAC_PI_2).sin(),
        }
    }
}

/// Sums `top` onto `base` from position 0, clamped to full scale. The result
/// is as long as the longer input.
pub fn overlay(base: &AudioBuffer, top: &AudioBuffer) -> Result<AudioBuffer, MixError> {
    if base.format() != top.format() {
        return Err(MixError::FormatMismatch {
            left: base.format(),
            right: top.format(),
        });
    }

    let (long, short) = if base.samples().len() >= top.samples().len() {
        (base.samples(), top.samples())
    } else {
        (top.samples(), base.samples())
    };

    let mut mixed = long.to_vec();
    for (out, &s) in mixed.iter_mut().zip(short) {
        *out = (*out + s).clamp(-1.0, 1.0);
    }
    AudioBuffer::new(mixed, base.format())
}

/// Fades the last `fade_ms` of `buffer` down to silence.
///
/// Frames before the fade window are untouched. Inside it the gain never
/// rises and is exactly zero on the final frame.
pub fn fade_out(buffer: &AudioBuffer, fade_ms: u64, curve: FadeCurve) -> Result<AudioBuffer, MixError> {
    let duration_ms = buffer.duration_ms();
    if fade_ms > duration_ms {
        return Err(MixError::InvalidFadeDuration {
            fade_ms,
            duration_ms,
        });
    }

    let format = buffer.format();
    let fade_frames = format.frames_for_ms(fade_ms).min(buffer.frames());
    if fade_frames == 0 {
        return Ok(buffer.clone());
    }

    let ch = usize::from(format.channels);
    let start = buffer.frames() - fade_frames;
    let mut samples = buffer.samples().to_vec();
    for (i, frame) in samples[start * ch..].chunks_exact_mut(ch).enumerate() {
        let remaining = (fade_frames - 1 - i) as f64 / fade_frames as f64;
        let gain = curve.gain(remaining) as f32;
        for s in frame {
            *s *= gain;
        }
    }
    AudioBuffer::new(samples, format)
}

/// Overlays the two buffers and fades out the tail.
pub fn compose(
    foreground: &AudioBuffer,
    background: &AudioBuffer,
    fade_out_ms: u64,
    curve: FadeCurve,
) -> Result<AudioBuffer, MixError> {
    let mixed = overlay(foreground, background)?;
    fade_out(&mixed, fade_out_ms, curve)
}
