use crate::api::{self, ElevenLabsVoice, OpenAiStoryWriter, SpeechSynthesizer, StoryWriter};
use crate::audio::Codec;
use crate::config::{Config, MixSettings};
use crate::mixer::Mixer;
use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use chrono::Local;
use once_cell::sync::OnceCell;
use rand::{Rng, SeedableRng};
use regex::Regex;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;

const MAX_SLUG_CHARS: usize = 60;

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub title: String,
    pub word_count: u32,
}

/// Artifacts of one successful run, all inside the output directory.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub story_path: PathBuf,
    pub narration_path: PathBuf,
    pub mixed_path: PathBuf,
}

impl GenerationOutput {
    pub fn mime_type(&self) -> &'static str {
        match self.mixed_path.extension().and_then(OsStr::to_str) {
            Some(ext) if ext.eq_ignore_ascii_case("wav") => "audio/wav",
            Some(ext) if ext.eq_ignore_ascii_case("ogg") => "audio/ogg",
            Some(ext) if ext.eq_ignore_ascii_case("flac") => "audio/flac",
            Some(ext) if ext.eq_ignore_ascii_case("m4a") => "audio/mp4",
            _ => "audio/mpeg",
        }
    }
}

pub fn now_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() ^ u64::from(d.subsec_nanos()))
        .unwrap_or(0)
}

fn slug_regex() -> Result<&'static Regex> {
    static SLUG_RE: OnceCell<Regex> = OnceCell::new();
    SLUG_RE.get_or_try_init(|| Regex::new(r"[^a-z0-9]+").context("failed to compile slug regex"))
}

/// Lowercase, dash-separated form of a story title for file names.
pub fn story_slug(title: &str) -> Result<String> {
    let lower = title.to_lowercase();
    let slug = slug_regex()?.replace_all(&lower, "-");
    let slug: String = slug.trim_matches('-').chars().take(MAX_SLUG_CHARS).collect();
    let slug = slug.trim_end_matches('-');
    Ok(if slug.is_empty() {
        "story".to_owned()
    } else {
        slug.to_owned()
    })
}

/// File stem unique to one run: slug, local timestamp, random suffix.
fn run_stem<R: Rng + ?Sized>(title: &str, rng: &mut R) -> Result<String> {
    Ok(format!(
        "{}_{}_{:04x}",
        story_slug(title)?,
        Local::now().format("%Y%m%d-%H%M%S"),
        rng.gen_range(0..=0xffff_u32)
    ))
}

/// Story → speech → mix, one isolated run at a time.
///
/// Every run gets its own scratch directory under `work_dir`, removed when
/// the run ends, so concurrent runs never share intermediate paths. Output
/// files appear only after the mix has been written successfully.
pub struct Generator {
    writer: Box<dyn StoryWriter>,
    voice: Box<dyn SpeechSynthesizer>,
    mixer: Mixer,
    settings: MixSettings,
    api_attempts: u32,
}

impl Generator {
    pub fn new(
        writer: Box<dyn StoryWriter>,
        voice: Box<dyn SpeechSynthesizer>,
        settings: MixSettings,
        api_attempts: u32,
    ) -> Self {
        let codec = Codec::new(settings.format, settings.codec_timeout());
        let mixer = Mixer::new(codec, settings.mix);
        Self {
            writer,
            voice,
            mixer,
            settings,
            api_attempts,
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::new(
            Box::new(OpenAiStoryWriter::new(client.clone(), cfg)),
            Box::new(ElevenLabsVoice::new(client, cfg)),
            cfg.mixing.clone(),
            cfg.api_attempts,
        ))
    }

    pub async fn generate<R: Rng + Send + ?Sized>(
        &self,
        request: &GenerationRequest,
        rng: &mut R,
    ) -> Result<GenerationOutput> {
        if request.word_count == 0 {
            anyhow::bail!("word count must be positive");
        }

        let output_dir = &self.settings.output_dir;
        fs::create_dir_all(output_dir)
            .await
            .with_context(|| format!("Failed to create {}", output_dir.display()))?;
        fs::create_dir_all(&self.settings.work_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.settings.work_dir.display()))?;

        let stem = run_stem(&request.title, rng)?;
        let workspace = tempfile::Builder::new()
            .prefix(&format!("{stem}-"))
            .tempdir_in(&self.settings.work_dir)
            .context("Failed to create run workspace")?;

        logi(format!(
            "Generating horror story \"{}\" ({} words)...",
            request.title, request.word_count
        ));
        let writer = self.writer.as_ref();
        let title = request.title.as_str();
        let words = request.word_count;
        let story = api::with_retries("Story generation", self.api_attempts, move || {
            writer.write_story(title, words)
        })
        .await?;
        logok("Horror story generated.");

        let voice = self.voice.as_ref();
        let ext = voice.file_extension().to_owned();
        let staged_narration = workspace.path().join(format!("narration.{ext}"));
        logi("Converting story to speech...");
        let text = story.as_str();
        let staged = staged_narration.as_path();
        api::with_retries("Speech synthesis", self.api_attempts, move || {
            voice.synthesize(text, staged)
        })
        .await?;
        logok(format!("Narration saved: {}", staged_narration.display()));

        logi("Mixing narration with background music...");
        let staged_mix = workspace
            .path()
            .join(format!("mixed.{}", self.settings.output_extension));
        self.mixer
            .mix(
                &staged_narration,
                &self.settings.background_music_dir,
                &staged_mix,
                rng,
            )
            .await
            .context("Mixing failed")?;

        let staged_story = workspace.path().join("story.txt");
        fs::write(&staged_story, story.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", staged_story.display()))?;

        let story_path = output_dir.join(format!("{stem}.txt"));
        let narration_path = output_dir.join(format!("{stem}_narration.{ext}"));
        let mixed_path = output_dir.join(format!("{stem}.{}", self.settings.output_extension));
        publish_all(&[
            (staged_story.as_path(), story_path.as_path()),
            (staged_narration.as_path(), narration_path.as_path()),
            (staged_mix.as_path(), mixed_path.as_path()),
        ])
        .await?;
        logok(format!("Mixed audio published: {}", mixed_path.display()));

        if let Err(err) = workspace.close() {
            logw(format!("Failed to remove run workspace: {err}"));
        }

        Ok(GenerationOutput {
            story_path,
            narration_path,
            mixed_path,
        })
    }
}

async fn publish(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).await.is_err() {
        fs::copy(from, to)
            .await
            .with_context(|| format!("Failed to copy {} -> {}", from.display(), to.display()))?;
    }
    Ok(())
}

/// Moves every staged file into place. If one move fails, the files already
/// moved are removed again so a failed run leaves nothing in the output dir.
async fn publish_all(moves: &[(&Path, &Path)]) -> Result<()> {
    for (done, (from, to)) in moves.iter().enumerate() {
        if let Err(err) = publish(from, to).await {
            for (_, published) in &moves[..done] {
                if let Err(e) = fs::remove_file(published).await {
                    logw(format!("Failed to remove {}: {e}", published.display()));
                }
            }
            return Err(err);
        }
    }
    Ok(())
}

/// Builds the real collaborators from `cfg` and runs one generation.
pub async fn run_generation(
    cfg: &Config,
    request: &GenerationRequest,
    seed: Option<u64>,
) -> Result<GenerationOutput> {
    let generator = Generator::from_config(cfg)?;
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed.unwrap_or_else(now_seed));
    generator.generate(request, &mut rng).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioBuffer, PcmFormat};
    use crate::error::GenerationError;
    use crate::mixer::MixPolicy;
    use async_trait::async_trait;
    use rand::rngs::StdRng;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    const FORMAT: PcmFormat = PcmFormat::new(8000, 1);

    struct FlakyWriter {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl StoryWriter for FlakyWriter {
        async fn write_story(&self, title: &str, word_count: u32) -> Result<String, GenerationError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(GenerationError::StoryGenerationFailed("rate limited".to_owned()));
            }
            Ok(format!("{title}: {word_count} words of dread."))
        }
    }

    struct ToneVoice;

    #[async_trait]
    impl SpeechSynthesizer for ToneVoice {
        async fn synthesize(&self, _text: &str, out_path: &Path) -> Result<(), GenerationError> {
            let frames = FORMAT.frames_for_ms(1_500);
            let tone = AudioBuffer::from_fn(FORMAT, frames, |i, _| 0.4 * (i as f32 * 0.2).sin());
            Codec::new(FORMAT, Duration::from_secs(5))
                .encode(&tone, out_path)
                .await
                .map_err(|e| GenerationError::SpeechSynthesisFailed {
                    status: None,
                    payload: e.to_string(),
                })
        }

        fn file_extension(&self) -> &str {
            "wav"
        }
    }

    fn settings(root: &Path) -> MixSettings {
        MixSettings {
            background_music_dir: root.join("music"),
            output_dir: root.join("output"),
            work_dir: root.join("work"),
            output_extension: "wav".to_owned(),
            codec_timeout_secs: 5,
            format: FORMAT,
            mix: MixPolicy {
                tail_padding_ms: 1_000,
                fade_out_ms: 500,
                ..MixPolicy::default()
            },
        }
    }

    fn generator(root: &Path, failures: u32) -> Generator {
        Generator::new(
            Box::new(FlakyWriter {
                failures_left: AtomicU32::new(failures),
            }),
            Box::new(ToneVoice),
            settings(root),
            3,
        )
    }

    async fn add_music(root: &Path) {
        let music = root.join("music");
        std::fs::create_dir_all(&music).unwrap();
        let drone = AudioBuffer::from_fn(FORMAT, FORMAT.frames_for_ms(800), |i, _| {
            0.6 * (i as f32 * 0.05).sin()
        });
        Codec::new(FORMAT, Duration::from_secs(5))
            .encode(&drone, &music.join("drone.wav"))
            .await
            .unwrap();
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            title: "The Thing in the Attic!".to_owned(),
            word_count: 50,
        }
    }

    #[tokio::test]
    async fn test_publish_all_rolls_back_on_failure() {
        let root = tempdir().unwrap();
        let staged = root.path().join("work");
        let out = root.path().join("output");
        std::fs::create_dir_all(&staged).unwrap();
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(staged.join("story.txt"), "boo").unwrap();
        std::fs::write(staged.join("narration.wav"), "wav").unwrap();

        let result = publish_all(&[
            (staged.join("story.txt").as_path(), out.join("run.txt").as_path()),
            (staged.join("narration.wav").as_path(), out.join("run_narration.wav").as_path()),
            (staged.join("mixed.wav").as_path(), out.join("run.wav").as_path()),
        ])
        .await;

        assert!(result.is_err());
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_publish_all_moves_every_file() {
        let root = tempdir().unwrap();
        let from = root.path().join("a.txt");
        let to = root.path().join("b.txt");
        std::fs::write(&from, "boo").unwrap();

        publish_all(&[(from.as_path(), to.as_path())]).await.unwrap();

        assert!(!from.exists());
        assert_eq!(std::fs::read_to_string(&to).unwrap(), "boo");
    }

    #[test]
    fn test_story_slug() {
        assert_eq!(story_slug("The Thing in the Attic!").unwrap(), "the-thing-in-the-attic");
        assert_eq!(story_slug("  ???  ").unwrap(), "story");
        assert!(story_slug(&"long title ".repeat(20)).unwrap().len() <= MAX_SLUG_CHARS);
    }

    #[test]
    fn test_run_stems_differ_between_runs() {
        let mut rng = StdRng::seed_from_u64(9);
        let a = run_stem("Same", &mut rng).unwrap();
        let b = run_stem("Same", &mut rng).unwrap();
        assert!(a.starts_with("same_"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_generate_writes_story_narration_and_mix() {
        let root = tempdir().unwrap();
        add_music(root.path()).await;

        let out = generator(root.path(), 1)
            .generate(&request(), &mut StdRng::seed_from_u64(5))
            .await
            .unwrap();

        let story = std::fs::read_to_string(&out.story_path).unwrap();
        assert!(story.contains("50 words"));
        assert!(out.narration_path.exists());
        assert_eq!(out.mime_type(), "audio/wav");

        let codec = Codec::new(FORMAT, Duration::from_secs(5));
        let mixed = codec.decode(&out.mixed_path).await.unwrap();
        assert_eq!(mixed.duration_ms(), 2_500);

        let work_left = std::fs::read_dir(root.path().join("work")).unwrap().count();
        assert_eq!(work_left, 0);
    }

    #[tokio::test]
    async fn test_failed_mix_publishes_nothing() {
        let root = tempdir().unwrap();

        let err = generator(root.path(), 0)
            .generate(&request(), &mut StdRng::seed_from_u64(5))
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("no background track"));
        let published = std::fs::read_dir(root.path().join("output")).unwrap().count();
        assert_eq!(published, 0);
        let work_left = std::fs::read_dir(root.path().join("work")).unwrap().count();
        assert_eq!(work_left, 0);
    }

    #[tokio::test]
    async fn test_story_failures_exhaust_attempts() {
        let root = tempdir().unwrap();
        add_music(root.path()).await;

        let err = generator(root.path(), 5)
            .generate(&request(), &mut StdRng::seed_from_u64(5))
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<GenerationError>(),
            Some(GenerationError::StoryGenerationFailed(_))
        ));
    }
}
