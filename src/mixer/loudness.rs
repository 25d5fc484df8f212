use crate::audio::AudioBuffer;
use crate::error::MixError;
use crate::logw;

/// Gain in dB that puts `background` exactly `target_offset_db` below
/// `foreground`. Fails with [`MixError::SilentTrack`] when either side has no
/// measurable loudness.
pub fn loudness_delta(
    foreground: &AudioBuffer,
    background: &AudioBuffer,
    target_offset_db: f64,
) -> Result<f64, MixError> {
    let fg_db = foreground.dbfs();
    let bg_db = background.dbfs();
    if !fg_db.is_finite() || !bg_db.is_finite() {
        return Err(MixError::SilentTrack);
    }
    Ok(fg_db - bg_db - target_offset_db)
}

/// Gain-adjusted copy of `background`. A silent side leaves the background
/// untouched instead of applying an unbounded gain.
pub fn balance(
    foreground: &AudioBuffer,
    background: &AudioBuffer,
    target_offset_db: f64,
) -> AudioBuffer {
    match loudness_delta(foreground, background, target_offset_db) {
        Ok(delta) => background.with_gain_db(delta),
        Err(_) => {
            logw(format!(
                "Loudness undefined (narration {:.2} dBFS, music {:.2} dBFS); leaving music level as is",
                foreground.dbfs(),
                background.dbfs()
            ));
            background.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::PcmFormat;

    const FORMAT: PcmFormat = PcmFormat::new(8000, 2);

    fn constant_at_db(db: f64) -> AudioBuffer {
        let amp = 10_f64.powf(db / 20.0) as f32;
        AudioBuffer::from_fn(FORMAT, 8000, |_, _| amp)
    }

    fn tone(freq: f32, amp: f32) -> AudioBuffer {
        AudioBuffer::from_fn(FORMAT, 16_000, |i, ch| {
            let t = i as f32 / 8000.0;
            amp * (std::f32::consts::TAU * freq * t + f32::from(ch)).sin()
        })
    }

    #[test]
    fn test_delta_for_quiet_narration_and_quieter_music() {
        let narration = constant_at_db(-16.0);
        let music = constant_at_db(-22.0);
        let delta = loudness_delta(&narration, &music, 12.0).unwrap();
        assert!((delta - -6.0).abs() < 1e-4);
    }

    #[test]
    fn test_balance_hits_target_offset() {
        let narration = tone(220.0, 0.3);
        for (music, offset) in [(tone(55.0, 0.9), 12.0), (tone(440.0, 0.01), 5.0), (tone(97.0, 0.3), 10.0)] {
            let adjusted = balance(&narration, &music, offset);
            let gap = narration.dbfs() - adjusted.dbfs();
            assert!((gap - offset).abs() < 0.1, "gap {gap} vs offset {offset}");
        }
    }

    #[test]
    fn test_balance_never_touches_foreground() {
        let narration = tone(220.0, 0.3);
        let before = narration.clone();
        let _ = balance(&narration, &tone(55.0, 0.9), 12.0);
        assert_eq!(narration, before);
    }

    #[test]
    fn test_silent_music_is_left_alone() {
        let narration = tone(220.0, 0.3);
        let silent = AudioBuffer::silent(FORMAT, 8000);

        assert!(matches!(
            loudness_delta(&narration, &silent, 12.0),
            Err(MixError::SilentTrack)
        ));
        let adjusted = balance(&narration, &silent, 12.0);
        assert_eq!(adjusted, silent);
        assert!(adjusted.samples().iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_silent_narration_applies_no_gain() {
        let music = tone(55.0, 0.5);
        let adjusted = balance(&AudioBuffer::silent(FORMAT, 8000), &music, 12.0);
        assert_eq!(adjusted, music);
    }
}
