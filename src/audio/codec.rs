use crate::audio::{AudioBuffer, PcmFormat};
use crate::error::MixError;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

const ENCODE_BITRATE: &str = "192k";

/// Decodes files into [`AudioBuffer`]s of one fixed [`PcmFormat`] and encodes
/// them back out.
///
/// WAV goes through `hound`. Everything else, and WAV at a foreign sample
/// rate, is piped through `ffmpeg` as raw little-endian `f32`. Both paths are
/// bounded by `timeout`, and child processes are killed when the future is
/// dropped.
#[derive(Debug, Clone)]
pub struct Codec {
    format: PcmFormat,
    timeout: Duration,
}

fn is_wav(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
}

fn decode_err(path: &Path, reason: impl Into<String>) -> MixError {
    MixError::Decode {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn encode_err(path: &Path, reason: impl Into<String>) -> MixError {
    MixError::Encode {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Converts interleaved samples between channel counts. Only mono up-mixing
/// and down-mixing to mono are handled; anything else returns `None`.
fn remix_channels(samples: Vec<f32>, from: u16, to: u16) -> Option<Vec<f32>> {
    if from == to {
        return Some(samples);
    }
    if from == 1 {
        return Some(
            samples
                .iter()
                .flat_map(|&s| std::iter::repeat_n(s, usize::from(to)))
                .collect(),
        );
    }
    if to == 1 {
        let n = usize::from(from);
        return Some(
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect(),
        );
    }
    None
}

fn read_wav(path: &Path, format: PcmFormat) -> Result<Option<AudioBuffer>, MixError> {
    let reader = WavReader::open(path).map_err(|e| decode_err(path, e.to_string()))?;
    let spec = reader.spec();
    if spec.sample_rate != format.frame_rate {
        return Ok(None);
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| decode_err(path, e.to_string()))?,
        SampleFormat::Int => {
            let scale = 1.0 / (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()
                .map_err(|e| decode_err(path, e.to_string()))?
        }
    };

    match remix_channels(interleaved, spec.channels, format.channels) {
        Some(samples) => AudioBuffer::new(samples, format).map(Some),
        None => Ok(None),
    }
}

fn write_wav(buffer: &AudioBuffer, path: &Path) -> Result<(), MixError> {
    let spec = WavSpec {
        channels: buffer.channels(),
        sample_rate: buffer.frame_rate(),
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).map_err(|e| encode_err(path, e.to_string()))?;
    for &s in buffer.samples() {
        let v = (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16;
        writer
            .write_sample(v)
            .map_err(|e| encode_err(path, e.to_string()))?;
    }
    writer.finalize().map_err(|e| encode_err(path, e.to_string()))
}

/// Runs a blocking hound job on the blocking pool, bounded like the ffmpeg path.
async fn run_bounded<T, F>(
    limit: Duration,
    job: F,
    on_timeout: impl FnOnce(String) -> MixError,
) -> Result<T, MixError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, MixError> + Send + 'static,
{
    match tokio::time::timeout(limit, tokio::task::spawn_blocking(job)).await {
        Ok(joined) => joined.map_err(|e| MixError::Task(e.to_string()))?,
        Err(_) => Err(on_timeout(format!("timed out after {limit:?}"))),
    }
}

impl Codec {
    pub fn new(format: PcmFormat, timeout: Duration) -> Self {
        Self { format, timeout }
    }

    pub fn format(&self) -> PcmFormat {
        self.format
    }

    pub async fn decode(&self, path: &Path) -> Result<AudioBuffer, MixError> {
        if !path.is_file() {
            return Err(decode_err(path, "no such file"));
        }

        if is_wav(path) {
            let owned = path.to_path_buf();
            let format = self.format;
            let decoded = run_bounded(self.timeout, move || read_wav(&owned, format), |reason| {
                decode_err(path, reason)
            })
            .await?;
            if let Some(buffer) = decoded {
                return Ok(buffer);
            }
            debug!(path = %path.display(), "wav layout differs from target format; using ffmpeg");
        }

        self.ffmpeg_decode(path).await
    }

    pub async fn encode(&self, buffer: &AudioBuffer, path: &Path) -> Result<(), MixError> {
        if is_wav(path) {
            let owned = path.to_path_buf();
            let buffer = buffer.clone();
            return run_bounded(self.timeout, move || write_wav(&buffer, &owned), |reason| {
                encode_err(path, reason)
            })
            .await;
        }
        self.ffmpeg_encode(buffer, path).await
    }

    async fn ffmpeg_decode(&self, path: &Path) -> Result<AudioBuffer, MixError> {
        let rate = self.format.frame_rate.to_string();
        let channels = self.format.channels.to_string();

        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-hide_banner", "-loglevel", "error", "-i"])
            .arg(path)
            .args(["-f", "f32le", "-acodec", "pcm_f32le"])
            .args(["-ar", rate.as_str(), "-ac", channels.as_str(), "pipe:1"])
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| decode_err(path, format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| decode_err(path, format!("failed to run ffmpeg: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(decode_err(path, stderr.trim().to_owned()));
        }

        let ch = usize::from(self.format.channels);
        let mut samples: Vec<f32> = output
            .stdout
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        samples.truncate(samples.len() - samples.len() % ch);
        AudioBuffer::new(samples, self.format)
    }

    async fn ffmpeg_encode(&self, buffer: &AudioBuffer, path: &Path) -> Result<(), MixError> {
        let rate = buffer.frame_rate().to_string();
        let channels = buffer.channels().to_string();

        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-y", "-hide_banner", "-loglevel", "error"])
            .args(["-f", "f32le", "-ar", rate.as_str(), "-ac", channels.as_str()])
            .args(["-i", "pipe:0", "-b:a", ENCODE_BITRATE])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| encode_err(path, format!("failed to run ffmpeg: {e}")))?;

        let mut bytes = Vec::with_capacity(buffer.samples().len() * 4);
        for s in buffer.samples() {
            bytes.extend_from_slice(&s.clamp(-1.0, 1.0).to_le_bytes());
        }

        let run = async move {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(&bytes).await?;
                stdin.shutdown().await?;
            }
            child.wait_with_output().await
        };

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| encode_err(path, format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| encode_err(path, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(encode_err(path, stderr.trim().to_owned()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_int_wav(path: &Path, rate: u32, channels: u16, samples: &[i16]) {
        let spec = WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[tokio::test]
    async fn test_slow_wav_job_times_out() {
        let result: Result<(), MixError> = run_bounded(
            Duration::from_millis(20),
            || {
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            },
            |reason| decode_err(Path::new("slow.wav"), reason),
        )
        .await;
        match result {
            Err(MixError::Decode { reason, .. }) => assert!(reason.contains("timed out")),
            other => panic!("expected a decode timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fast_wav_job_finishes_within_limit() {
        let value = run_bounded(Duration::from_secs(5), || Ok(7), |reason| {
            encode_err(Path::new("fast.wav"), reason)
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_remix_mono_to_stereo_duplicates() {
        let out = remix_channels(vec![0.1, 0.2], 1, 2).unwrap();
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn test_remix_stereo_to_mono_averages() {
        let out = remix_channels(vec![0.2, 0.4, -1.0, 1.0], 2, 1).unwrap();
        assert!((out[0] - 0.3).abs() < 1e-6);
        assert_eq!(out[1], 0.0);
        assert!(remix_channels(vec![0.0; 6], 3, 2).is_none());
    }

    #[tokio::test]
    async fn test_decode_mono_wav_into_stereo_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("voice.wav");
        write_int_wav(&path, 8000, 1, &[0, 16384, -16384, 32767]);

        let codec = Codec::new(PcmFormat::new(8000, 2), Duration::from_secs(5));
        let buffer = codec.decode(&path).await.unwrap();

        assert_eq!(buffer.frames(), 4);
        assert_eq!(buffer.channels(), 2);
        assert_eq!(buffer.samples()[2], 0.5);
        assert_eq!(buffer.samples()[3], 0.5);
        assert_eq!(buffer.samples()[4], -0.5);
    }

    #[tokio::test]
    async fn test_wav_encode_keeps_length_and_level() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mix.wav");
        let format = PcmFormat::new(8000, 1);
        let codec = Codec::new(format, Duration::from_secs(5));
        let buffer = AudioBuffer::from_fn(format, 800, |i, _| if i % 2 == 0 { 0.25 } else { -0.25 });

        codec.encode(&buffer, &path).await.unwrap();
        let back = codec.decode(&path).await.unwrap();

        assert_eq!(back.frames(), 800);
        assert!((back.dbfs() - buffer.dbfs()).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_decode_garbage_wav_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.wav");
        std::fs::write(&path, b"definitely not a riff header").unwrap();

        let codec = Codec::new(PcmFormat::new(8000, 1), Duration::from_secs(5));
        let err = codec.decode(&path).await.unwrap_err();
        assert!(matches!(err, MixError::Decode { .. }));
    }
}
