use crate::audio::AudioBuffer;
use crate::error::MixError;
use crate::mixer::MixPolicy;

/// Loops or trims `track` so it lasts exactly `target_ms`.
///
/// Longer tracks keep their first `target_ms`. Shorter ones are repeated
/// `ceil(target / track)` times with hard loop boundaries and then cut.
pub fn fit_to_duration(
    track: &AudioBuffer,
    target_ms: u64,
    policy: &MixPolicy,
) -> Result<AudioBuffer, MixError> {
    if target_ms == 0 {
        return Err(MixError::InvalidInput {
            reason: "target duration must be greater than zero".to_owned(),
        });
    }

    let track_ms = track.duration_ms();
    if track.is_empty() || track_ms < policy.min_track_ms {
        return Err(MixError::InvalidBackgroundTrack {
            reason: format!(
                "track lasts {track_ms} ms, minimum is {} ms",
                policy.min_track_ms
            ),
        });
    }

    let target_frames = track.format().frames_for_ms(target_ms);
    if track.frames() >= target_frames {
        return Ok(track.slice_frames(0, target_frames));
    }

    let loops = target_frames.div_ceil(track.frames());
    if loops > policy.max_loops {
        return Err(MixError::InvalidBackgroundTrack {
            reason: format!(
                "{track_ms} ms track would need {loops} loops to cover {target_ms} ms (limit {})",
                policy.max_loops
            ),
        });
    }

    Ok(track.repeat(loops).slice_frames(0, target_frames))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::PcmFormat;

    const MS_MONO: PcmFormat = PcmFormat::new(1000, 1);

    fn ramp(ms: usize) -> AudioBuffer {
        AudioBuffer::from_fn(MS_MONO, ms, |i, _| i as f32 / ms as f32)
    }

    #[test]
    fn test_longer_track_is_truncated() {
        let track = ramp(20_000);
        let fitted = fit_to_duration(&track, 15_000, &MixPolicy::default()).unwrap();
        assert_eq!(fitted.duration_ms(), 15_000);
        assert_eq!(fitted.samples(), &track.samples()[..15_000]);
    }

    #[test]
    fn test_narration_plus_tail_over_short_track() {
        let policy = MixPolicy::default();
        let track = ramp(4_000);
        let fitted = fit_to_duration(&track, 10_000 + policy.tail_padding_ms, &policy).unwrap();

        assert_eq!(fitted.duration_ms(), 15_000);
        for loop_start in [0, 4_000, 8_000] {
            assert_eq!(
                &fitted.samples()[loop_start..loop_start + 4_000],
                track.samples()
            );
        }
        // Fourth loop is cut 3000 ms in.
        assert_eq!(&fitted.samples()[12_000..], &track.samples()[..3_000]);
    }

    #[test]
    fn test_length_holds_for_any_target() {
        let policy = MixPolicy::default();
        let track = ramp(1_300);
        for narration_ms in [1, 999, 1_300, 1_301, 7_777] {
            for tail in [0, 1, 5_000] {
                let fitted = fit_to_duration(&track, narration_ms + tail, &policy).unwrap();
                assert_eq!(fitted.duration_ms(), narration_ms + tail);
                let head = fitted.samples().len().min(1_300);
                assert_eq!(&fitted.samples()[..head], &track.samples()[..head]);
            }
        }
    }

    #[test]
    fn test_zero_target_is_invalid_input() {
        let err = fit_to_duration(&ramp(1_000), 0, &MixPolicy::default()).unwrap_err();
        assert!(matches!(err, MixError::InvalidInput { .. }));
    }

    #[test]
    fn test_near_empty_track_is_rejected() {
        let policy = MixPolicy::default();
        let err = fit_to_duration(&ramp(5), 10_000, &policy).unwrap_err();
        assert!(matches!(err, MixError::InvalidBackgroundTrack { .. }));

        let empty = AudioBuffer::silent(MS_MONO, 0);
        let err = fit_to_duration(&empty, 10_000, &policy).unwrap_err();
        assert!(matches!(err, MixError::InvalidBackgroundTrack { .. }));
    }

    #[test]
    fn test_loop_cap() {
        let policy = MixPolicy {
            max_loops: 3,
            ..MixPolicy::default()
        };
        let err = fit_to_duration(&ramp(1_000), 3_001, &policy).unwrap_err();
        assert!(matches!(err, MixError::InvalidBackgroundTrack { .. }));
        assert!(fit_to_duration(&ramp(1_000), 3_000, &policy).is_ok());
    }
}
