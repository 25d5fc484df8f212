use crate::error::MixError;
use serde::{Deserialize, Serialize};

/// Sample rate and channel layout every decoded buffer is normalized to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmFormat {
    pub frame_rate: u32,
    pub channels: u16,
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self {
            frame_rate: 44_100,
            channels: 2,
        }
    }
}

impl PcmFormat {
    pub const fn new(frame_rate: u32, channels: u16) -> Self {
        Self {
            frame_rate,
            channels,
        }
    }

    /// Number of frames covering `ms` milliseconds, rounded to the nearest frame.
    pub fn frames_for_ms(&self, ms: u64) -> usize {
        let rate = u128::from(self.frame_rate);
        ((u128::from(ms) * rate + 500) / 1000) as usize
    }

    pub fn ms_for_frames(&self, frames: usize) -> u64 {
        let rate = u128::from(self.frame_rate.max(1));
        ((frames as u128 * 1000 + rate / 2) / rate) as u64
    }
}

/// Decoded interleaved PCM audio with samples in `[-1.0, 1.0]`.
///
/// Every transform returns a new buffer; nothing mutates in place once a
/// buffer has been handed out.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    format: PcmFormat,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, format: PcmFormat) -> Result<Self, MixError> {
        if format.frame_rate == 0 || format.channels == 0 {
            return Err(MixError::InvalidInput {
                reason: format!("unusable pcm format {format:?}"),
            });
        }
        if samples.len() % usize::from(format.channels) != 0 {
            return Err(MixError::InvalidInput {
                reason: format!(
                    "{} samples do not divide into {} channels",
                    samples.len(),
                    format.channels
                ),
            });
        }
        Ok(Self { samples, format })
    }

    pub fn silent(format: PcmFormat, frames: usize) -> Self {
        Self {
            samples: vec![0.0; frames * usize::from(format.channels)],
            format,
        }
    }

    /// Builds a buffer by evaluating `f(frame, channel)` for every sample.
    pub fn from_fn(format: PcmFormat, frames: usize, mut f: impl FnMut(usize, u16) -> f32) -> Self {
        let mut samples = Vec::with_capacity(frames * usize::from(format.channels));
        for frame in 0..frames {
            for channel in 0..format.channels {
                samples.push(f(frame, channel));
            }
        }
        Self { samples, format }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    pub fn frame_rate(&self) -> u32 {
        self.format.frame_rate
    }

    pub fn channels(&self) -> u16 {
        self.format.channels
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.format.channels)
    }

    pub fn duration_ms(&self) -> u64 {
        self.format.ms_for_frames(self.frames())
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Frames `[start, end)`, clamped to the buffer.
    pub fn slice_frames(&self, start: usize, end: usize) -> Self {
        let ch = usize::from(self.format.channels);
        let end = end.min(self.frames());
        let start = start.min(end);
        Self {
            samples: self.samples[start * ch..end * ch].to_vec(),
            format: self.format,
        }
    }

    pub fn slice_ms(&self, start_ms: u64, end_ms: u64) -> Self {
        self.slice_frames(
            self.format.frames_for_ms(start_ms),
            self.format.frames_for_ms(end_ms),
        )
    }

    /// The buffer played `times` times back to back, with no crossfade.
    pub fn repeat(&self, times: usize) -> Self {
        Self {
            samples: self.samples.repeat(times),
            format: self.format,
        }
    }

    /// Appends silence up to `frames`. Never shortens the buffer.
    pub fn padded_to(&self, frames: usize) -> Self {
        let mut samples = self.samples.clone();
        let wanted = frames * usize::from(self.format.channels);
        if wanted > samples.len() {
            samples.resize(wanted, 0.0);
        }
        Self {
            samples,
            format: self.format,
        }
    }

    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()))
    }

    /// RMS loudness relative to full scale. Silence yields negative infinity.
    pub fn dbfs(&self) -> f64 {
        if self.samples.is_empty() {
            return f64::NEG_INFINITY;
        }
        let energy: f64 = self
            .samples
            .iter()
            .map(|&s| f64::from(s) * f64::from(s))
            .sum();
        let rms = (energy / self.samples.len() as f64).sqrt();
        if rms == 0.0 {
            f64::NEG_INFINITY
        } else {
            20.0 * rms.log10()
        }
    }

    /// Copy scaled by `db` decibels. Samples are not clipped here.
    pub fn with_gain_db(&self, db: f64) -> Self {
        let factor = 10_f64.powf(db / 20.0) as f32;
        Self {
            samples: self.samples.iter().map(|s| s * factor).collect(),
            format: self.format,
        }
    }
}
